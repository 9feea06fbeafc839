//! Transforms between geographic lon/lat, the Web Mercator plane and
//! figure-relative coordinates in [0, 1] x [0, 1].

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

use crate::config_params::{MapExtent, Place};
use crate::error::{MapError, Result};

/// Sphere radius of EPSG:3857, in metres.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;
/// Mean Earth radius used for distances, in kilometres.
pub const MEAN_EARTH_RADIUS_KM: f64 = 6_371.0088;

const HALF_WORLD_M: f64 = PI * EARTH_RADIUS_M;

pub fn geo_to_plane(lon: f64, lat: f64) -> Result<(f64, f64)> {
    let fail = |reason| Err(MapError::Projection { x: lon, y: lat, reason });
    if !lon.is_finite() || !lat.is_finite() {
        return fail("coordinates must be finite");
    }
    if !(-180.0..=180.0).contains(&lon) {
        return fail("longitude outside [-180, 180]");
    }
    if !(-90.0..=90.0).contains(&lat) {
        return fail("latitude outside [-90, 90]");
    }
    if lat.abs() == 90.0 {
        return fail("projection is undefined at the poles");
    }
    let x = EARTH_RADIUS_M * lon.to_radians();
    let y = EARTH_RADIUS_M * (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    Ok((x, y))
}

pub fn plane_to_geo(x: f64, y: f64) -> Result<(f64, f64)> {
    if !x.is_finite() || !y.is_finite() {
        return Err(MapError::Projection { x, y, reason: "coordinates must be finite" });
    }
    if x.abs() > HALF_WORLD_M * (1.0 + 1e-12) {
        return Err(MapError::Projection { x, y, reason: "x outside the projected world" });
    }
    let lon = (x / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS_M).exp().atan() - FRAC_PI_2).to_degrees();
    Ok((lon, lat))
}

pub fn plane_to_figure(x: f64, y: f64, extent: &MapExtent) -> Result<(f64, f64)> {
    let (dx, dy) = non_degenerate(extent)?;
    Ok(((x - extent.x_min) / dx, (y - extent.y_min) / dy))
}

pub fn figure_to_plane(fx: f64, fy: f64, extent: &MapExtent) -> Result<(f64, f64)> {
    let (dx, dy) = non_degenerate(extent)?;
    Ok((fx * dx + extent.x_min, fy * dy + extent.y_min))
}

fn non_degenerate(extent: &MapExtent) -> Result<(f64, f64)> {
    let dx = extent.dx();
    let dy = extent.dy();
    if dx == 0.0 || dy == 0.0 {
        return Err(MapError::DegenerateExtent);
    }
    Ok((dx, dy))
}

/// Figure (width, height) keeping the data aspect ratio, with the longer
/// side equal to `max_dim`.
pub fn compute_figure_dimensions(max_dim: f64, dx: f64, dy: f64) -> Result<(f64, f64)> {
    if !(dx > 0.0) || !(dy > 0.0) {
        return Err(MapError::InvalidAspect { dx, dy });
    }
    if dx >= dy {
        Ok((max_dim, max_dim * dy / dx))
    } else {
        Ok((max_dim * dx / dy, max_dim))
    }
}

/// Great-circle (haversine) distance in kilometres.
pub fn geodesic_distance_km(lat_a: f64, lon_a: f64, lat_b: f64, lon_b: f64) -> f64 {
    let phi_a = lat_a.to_radians();
    let phi_b = lat_b.to_radians();
    let d_phi = (lat_b - lat_a).to_radians();
    let d_lambda = (lon_b - lon_a).to_radians();
    let h = (d_phi / 2.0).sin().powi(2) + phi_a.cos() * phi_b.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * MEAN_EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Width of the place measured along its central latitude.
pub fn plot_width_km(place: &Place) -> f64 {
    let lat = (place.north + place.south) / 2.0;
    geodesic_distance_km(lat, place.east, lat, place.west)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: (f64, f64), b: (f64, f64), tol: f64) -> bool {
        (a.0 - b.0).abs() <= tol && (a.1 - b.1).abs() <= tol
    }

    fn extent() -> MapExtent {
        MapExtent { x_min: -500.0, x_max: 1500.0, y_min: 2000.0, y_max: 2500.0 }
    }

    #[test]
    fn origin_maps_to_origin() {
        let (x, y) = geo_to_plane(0.0, 0.0).unwrap();
        assert!(x.abs() < 1e-9 && y.abs() < 1e-9);
    }

    #[test]
    fn antimeridian_is_half_world() {
        let (x, _) = geo_to_plane(180.0, 0.0).unwrap();
        assert!((x - 20_037_508.342789244).abs() < 1e-6);
    }

    #[test]
    fn geo_plane_round_trip() {
        let mut lat = -84.5;
        while lat < 85.0 {
            let mut lon = -179.5;
            while lon < 180.0 {
                let (x, y) = geo_to_plane(lon, lat).unwrap();
                let back = plane_to_geo(x, y).unwrap();
                assert!(close(back, (lon, lat), 1e-9), "{lon},{lat} -> {back:?}");
                lon += 17.3;
            }
            lat += 6.1;
        }
    }

    #[test]
    fn poles_and_out_of_range_are_rejected() {
        assert!(matches!(geo_to_plane(0.0, 90.0), Err(MapError::Projection { .. })));
        assert!(matches!(geo_to_plane(0.0, -90.0), Err(MapError::Projection { .. })));
        assert!(matches!(geo_to_plane(180.5, 0.0), Err(MapError::Projection { .. })));
        assert!(matches!(geo_to_plane(0.0, 91.0), Err(MapError::Projection { .. })));
        assert!(matches!(geo_to_plane(f64::NAN, 0.0), Err(MapError::Projection { .. })));
        assert!(matches!(plane_to_geo(f64::INFINITY, 0.0), Err(MapError::Projection { .. })));
    }

    #[test]
    fn plane_figure_round_trip() {
        let e = extent();
        for &(x, y) in &[(-500.0, 2000.0), (1500.0, 2500.0), (12.5, 2222.2), (-9000.0, 4000.0)] {
            let (fx, fy) = plane_to_figure(x, y, &e).unwrap();
            let back = figure_to_plane(fx, fy, &e).unwrap();
            assert!(close(back, (x, y), 1e-9));
        }
    }

    #[test]
    fn plane_to_figure_normalises_corners() {
        let e = extent();
        assert_eq!(plane_to_figure(-500.0, 2000.0, &e).unwrap(), (0.0, 0.0));
        assert_eq!(plane_to_figure(1500.0, 2500.0, &e).unwrap(), (1.0, 1.0));
        assert_eq!(plane_to_figure(500.0, 2250.0, &e).unwrap(), (0.5, 0.5));
    }

    #[test]
    fn degenerate_extent_is_rejected() {
        let flat = MapExtent { x_min: 1.0, x_max: 1.0, y_min: 0.0, y_max: 2.0 };
        assert!(matches!(plane_to_figure(1.0, 1.0, &flat), Err(MapError::DegenerateExtent)));
        assert!(matches!(figure_to_plane(0.5, 0.5, &flat), Err(MapError::DegenerateExtent)));
    }

    #[test]
    fn figure_dimensions_keep_aspect() {
        assert_eq!(compute_figure_dimensions(10.0, 2.0, 1.0).unwrap(), (10.0, 5.0));
        assert_eq!(compute_figure_dimensions(10.0, 1.0, 2.0).unwrap(), (5.0, 10.0));
        assert_eq!(compute_figure_dimensions(8.0, 3.0, 3.0).unwrap(), (8.0, 8.0));
    }

    #[test]
    fn figure_dimensions_reject_bad_aspect() {
        assert!(matches!(
            compute_figure_dimensions(10.0, 0.0, 1.0),
            Err(MapError::InvalidAspect { .. })
        ));
        assert!(matches!(
            compute_figure_dimensions(10.0, 1.0, -2.0),
            Err(MapError::InvalidAspect { .. })
        ));
    }

    #[test]
    fn one_degree_on_equator() {
        let d = geodesic_distance_km(0.0, 0.0, 0.0, 1.0);
        assert!((d - 111.195).abs() < 0.01, "{d}");
    }

    #[test]
    fn plot_width_shrinks_with_latitude() {
        let equator = Place::new("eq", -1.0, 1.0, -1.0, 1.0);
        let north = Place::new("north", -1.0, 1.0, 59.0, 61.0);
        let w_eq = plot_width_km(&equator);
        let w_north = plot_width_km(&north);
        assert!((w_eq - 222.39).abs() < 0.05, "{w_eq}");
        assert!((w_north - w_eq * 60f64.to_radians().cos()).abs() < 0.5, "{w_north}");
    }
}
