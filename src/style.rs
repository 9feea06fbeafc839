//! Feature styling.
//!
//! Styles are looked up in two steps: a tag table maps an OSM tag
//! (`highway=path`) to a semantic style name (`trail`), and the style table
//! maps that name to drawing parameters.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::config_params::read_json;
use crate::error::{MapError, Result};
use crate::layer::Feature;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStyle {
    Solid,
    Dashed,
    Dotted,
    /// Markers only.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Marker {
    Circle,
    Square,
    Triangle,
    Cross,
}

/// Drawing parameters. Unset fields fall back to the canvas defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StyleParams {
    pub color: Option<String>,
    /// Line width in points.
    pub width: Option<f64>,
    pub line_style: Option<LineStyle>,
    pub marker: Option<Marker>,
    /// Marker diameter in points.
    pub marker_size: Option<f64>,
    /// Fill colour for closed rings.
    pub fill: Option<String>,
    pub opacity: Option<f64>,
}

impl StyleParams {
    pub fn is_empty(&self) -> bool {
        *self == StyleParams::default()
    }

    fn line(color: &str, width: f64, line_style: LineStyle) -> Self {
        StyleParams {
            color: Some(color.to_string()),
            width: Some(width),
            line_style: Some(line_style),
            ..StyleParams::default()
        }
    }

    fn marker(color: &str, marker: Marker, size: f64) -> Self {
        StyleParams {
            color: Some(color.to_string()),
            line_style: Some(LineStyle::None),
            marker: Some(marker),
            marker_size: Some(size),
            ..StyleParams::default()
        }
    }
}

/// Semantic style name -> drawing parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StyleTable {
    pub styles: BTreeMap<String, StyleParams>,
}

impl StyleTable {
    /// Built-in styles, sized for a map whose longest side is `max_dim` inches.
    pub fn builtin(max_dim: f64) -> Self {
        let s = max_dim / 10.0;
        let mut styles = BTreeMap::new();
        let mut add = |name: &str, style: StyleParams| {
            styles.insert(name.to_string(), style);
        };
        add("campsite", StyleParams::marker("#2e7d32", Marker::Triangle, 6.0 * s));
        add("point_of_interest", StyleParams::marker("#6a1b9a", Marker::Circle, 5.0 * s));
        add("barrier", StyleParams::marker("#c62828", Marker::Cross, 5.0 * s));
        add("mountain", StyleParams::marker("#5d4037", Marker::Triangle, 7.0 * s));
        add("main_road", StyleParams::line("#e65100", 2.0 * s, LineStyle::Solid));
        add("secondary_road", StyleParams::line("#f9a825", 1.5 * s, LineStyle::Solid));
        add("tertiary_road", StyleParams::line("#9e9d24", 1.2 * s, LineStyle::Solid));
        add("trail", StyleParams::line("#8d6e63", 1.0 * s, LineStyle::Dashed));
        add("park_boundary", StyleParams::line("#1b5e20", 1.5 * s, LineStyle::Dotted));
        add("stream", StyleParams::line("#1e88e5", 0.8 * s, LineStyle::Solid));
        add(
            "water",
            StyleParams {
                fill: Some("#90caf9".to_string()),
                opacity: Some(0.8),
                ..StyleParams::line("#1565c0", 0.6 * s, LineStyle::Solid)
            },
        );
        StyleTable { styles }
    }

    pub fn get(&self, name: &str) -> Option<&StyleParams> {
        self.styles.get(name)
    }
}

/// Tag key -> tag value -> semantic style name.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct TagStyleTable {
    pub map: BTreeMap<String, BTreeMap<String, String>>,
}

impl TagStyleTable {
    pub fn lookup(&self, key: &str, value: &str) -> Option<&str> {
        self.map.get(key)?.get(value).map(|s| s.as_str())
    }

    fn style_names(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.map.iter().flat_map(|(key, values)| {
            values
                .iter()
                .map(move |(value, name)| (key.as_str(), value.as_str(), name.as_str()))
        })
    }
}

/// Style for a feature. Tags are checked in the feature's order and the
/// last tag with a mapping wins.
pub fn resolve_style(feature: &Feature, tag_styles: &TagStyleTable, styles: &StyleTable) -> StyleParams {
    let mut style = StyleParams::default();
    for (key, value) in &feature.tags {
        if let Some(params) = tag_styles.lookup(key, value).and_then(|name| styles.get(name)) {
            style = params.clone();
        }
    }
    style
}

/// Names the legend shows when the styles file does not list any.
pub const DEFAULT_LEGEND: [&str; 9] = [
    "campsite",
    "point_of_interest",
    "barrier",
    "mountain",
    "main_road",
    "secondary_road",
    "tertiary_road",
    "trail",
    "park_boundary",
];

/// `main_road` -> `Main road`
pub fn legend_label(name: &str) -> String {
    let spaced = name.replace('_', " ").to_lowercase();
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegendEntry {
    pub label: String,
    pub style: StyleParams,
}

#[derive(Deserialize)]
struct StylesFile {
    #[serde(default)]
    styles: BTreeMap<String, StyleParams>,
    tag_styles: TagStyleTable,
    legend: Option<Vec<String>>,
}

/// Everything loaded from the styles file, merged over the built-in styles.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleConfig {
    pub styles: StyleTable,
    pub tag_styles: TagStyleTable,
    pub legend: Vec<String>,
}

impl StyleConfig {
    pub fn load(path: &Path, max_dim: f64) -> Result<Self> {
        let file: StylesFile = read_json(path)?;
        Self::from_parts(path, file, max_dim)
    }

    fn from_parts(path: &Path, file: StylesFile, max_dim: f64) -> Result<Self> {
        let mut styles = StyleTable::builtin(max_dim);
        styles.styles.extend(file.styles);

        for (key, value, name) in file.tag_styles.style_names() {
            if styles.get(name).is_none() {
                return Err(MapError::config(
                    path,
                    format!("tag {}={} maps to unknown style '{}'", key, value, name),
                ));
            }
        }

        let legend = match file.legend {
            Some(names) => {
                if let Some(missing) = names.iter().find(|n| styles.get(n).is_none()) {
                    return Err(MapError::config(path, format!("legend lists unknown style '{}'", missing)));
                }
                names
            }
            None => DEFAULT_LEGEND
                .iter()
                .filter(|n| {
                    let known = styles.get(n).is_some();
                    if !known {
                        warn!(style = **n, "default legend style missing, skipping");
                    }
                    known
                })
                .map(|n| n.to_string())
                .collect(),
        };

        Ok(StyleConfig {
            styles,
            tag_styles: file.tag_styles,
            legend,
        })
    }

    pub fn legend_entries(&self) -> Vec<LegendEntry> {
        self.legend
            .iter()
            .filter_map(|name| {
                self.styles.get(name).map(|style| LegendEntry {
                    label: legend_label(name),
                    style: style.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::ElementType;
    use geojson::Value;

    fn feature(tags: &[(&str, &str)]) -> Feature {
        Feature {
            element_type: ElementType::Way,
            geometry: Value::LineString(vec![vec![0.0, 0.0], vec![1.0, 1.0]]),
            name: None,
            tags: tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    fn tables() -> (TagStyleTable, StyleTable) {
        let tag_styles: TagStyleTable = serde_json::from_str(
            r#"{
                "natural": {"water": "water"},
                "waterway": {"stream": "stream"},
                "highway": {"path": "trail", "primary": "main_road"}
            }"#,
        )
        .unwrap();
        (tag_styles, StyleTable::builtin(10.0))
    }

    #[test]
    fn last_matching_tag_wins() {
        let (tag_styles, styles) = tables();

        let water_then_stream = feature(&[("natural", "water"), ("waterway", "stream")]);
        assert_eq!(
            resolve_style(&water_then_stream, &tag_styles, &styles),
            styles.styles["stream"]
        );

        let stream_then_water = feature(&[("waterway", "stream"), ("natural", "water")]);
        assert_eq!(
            resolve_style(&stream_then_water, &tag_styles, &styles),
            styles.styles["water"]
        );
    }

    #[test]
    fn unmatched_tags_do_not_reset_the_candidate() {
        let (tag_styles, styles) = tables();
        let f = feature(&[("highway", "path"), ("natural", "scrub")]);
        assert_eq!(resolve_style(&f, &tag_styles, &styles), styles.styles["trail"]);
    }

    #[test]
    fn unresolved_feature_gets_empty_style() {
        let (tag_styles, styles) = tables();
        let f = feature(&[("highway", "motorway"), ("tourism", "hotel")]);
        assert!(resolve_style(&f, &tag_styles, &styles).is_empty());
        assert!(resolve_style(&feature(&[]), &tag_styles, &styles).is_empty());
    }

    #[test]
    fn builtin_styles_scale_with_dimension() {
        let small = StyleTable::builtin(5.0);
        let large = StyleTable::builtin(20.0);
        assert_eq!(small.styles["main_road"].width, Some(1.0));
        assert_eq!(large.styles["main_road"].width, Some(4.0));
    }

    #[test]
    fn legend_labels_are_humanised() {
        assert_eq!(legend_label("main_road"), "Main road");
        assert_eq!(legend_label("point_of_interest"), "Point of interest");
        assert_eq!(legend_label(""), "");
    }

    #[test]
    fn styles_file_overrides_builtins() {
        let file: StylesFile = serde_json::from_str(
            r##"{
                "styles": {"trail": {"color": "#000000", "width": 3.0}},
                "tag_styles": {"highway": {"path": "trail"}},
                "legend": ["trail"]
            }"##,
        )
        .unwrap();
        let config = StyleConfig::from_parts(Path::new("styles.json"), file, 10.0).unwrap();
        assert_eq!(config.styles.styles["trail"].color.as_deref(), Some("#000000"));
        assert_eq!(config.styles.styles["trail"].line_style, None);
        let entries = config.legend_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].label, "Trail");
    }

    #[test]
    fn default_legend_is_used_when_absent() {
        let file: StylesFile = serde_json::from_str(r#"{"tag_styles": {}}"#).unwrap();
        let config = StyleConfig::from_parts(Path::new("styles.json"), file, 10.0).unwrap();
        assert_eq!(config.legend.len(), DEFAULT_LEGEND.len());
    }

    #[test]
    fn unknown_style_names_are_config_errors() {
        let file: StylesFile =
            serde_json::from_str(r#"{"tag_styles": {"highway": {"path": "footpath"}}}"#).unwrap();
        let err = StyleConfig::from_parts(Path::new("styles.json"), file, 10.0).unwrap_err();
        assert!(err.to_string().contains("unknown style 'footpath'"));

        let file: StylesFile =
            serde_json::from_str(r#"{"tag_styles": {}, "legend": ["nope"]}"#).unwrap();
        assert!(StyleConfig::from_parts(Path::new("styles.json"), file, 10.0).is_err());
    }
}
