//! Scale bar sizing.

use std::fmt;

/// Round distances a scale bar may show, in kilometres.
pub const SCALE_LENGTHS_KM: [f64; 12] = [
    0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0,
];

/// Fraction of the larger map dimension used as bar height.
const BAR_HEIGHT_FRACTION: f64 = 0.0025;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleChoice(pub f64);

impl ScaleChoice {
    pub fn km(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for ScaleChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} km", self.0)
    }
}

/// Largest candidate length not exceeding `plot_width_km * max_width_fraction`.
/// Maps too narrow for any candidate still get the smallest one.
pub fn choose_scale_length_km(plot_width_km: f64, max_width_fraction: f64) -> ScaleChoice {
    let max_scale_km = plot_width_km * max_width_fraction;
    let chosen = SCALE_LENGTHS_KM
        .iter()
        .rev()
        .copied()
        .find(|&len| len <= max_scale_km)
        .unwrap_or(SCALE_LENGTHS_KM[0]);
    ScaleChoice(chosen)
}

/// A scale bar measured in plane units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleBar {
    pub length: ScaleChoice,
    pub width: f64,
    pub height: f64,
}

impl ScaleBar {
    pub fn new(plot_width_km: f64, max_width_fraction: f64, dx: f64, dy: f64) -> Self {
        let length = choose_scale_length_km(plot_width_km, max_width_fraction);
        ScaleBar {
            length,
            width: length.km() / plot_width_km * dx,
            height: dx.max(dy) * BAR_HEIGHT_FRACTION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_largest_fitting_length() {
        assert_eq!(choose_scale_length_km(100.0, 0.15), ScaleChoice(10.0));
        assert_eq!(choose_scale_length_km(40.0, 0.15), ScaleChoice(5.0));
        assert_eq!(choose_scale_length_km(10_000.0, 0.15), ScaleChoice(500.0));
    }

    #[test]
    fn exact_candidate_is_kept() {
        assert_eq!(choose_scale_length_km(20.0, 0.1), ScaleChoice(2.0));
    }

    #[test]
    fn narrow_maps_fall_through_to_smallest() {
        assert_eq!(choose_scale_length_km(1.0, 0.15), ScaleChoice(0.1));
        assert_eq!(choose_scale_length_km(0.2, 0.15), ScaleChoice(0.1));
        assert_eq!(choose_scale_length_km(0.0, 0.15), ScaleChoice(0.1));
    }

    #[test]
    fn label_formats_whole_and_fractional_lengths() {
        assert_eq!(ScaleChoice(10.0).to_string(), "10 km");
        assert_eq!(ScaleChoice(0.5).to_string(), "0.5 km");
    }

    #[test]
    fn bar_dimensions_follow_plane_units() {
        let bar = ScaleBar::new(100.0, 0.15, 2000.0, 1000.0);
        assert_eq!(bar.length, ScaleChoice(10.0));
        assert!((bar.width - 200.0).abs() < 1e-9);
        assert!((bar.height - 5.0).abs() < 1e-9);
    }
}
