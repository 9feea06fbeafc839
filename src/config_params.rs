//! Run configuration and the JSON input files it points at.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::{MapError, Result};
use crate::projection::geo_to_plane;

/// A named bounding box in geographic degrees.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Place {
    pub name: String,
    pub west: f64,
    pub east: f64,
    pub south: f64,
    pub north: f64,
}

impl Place {
    pub fn new(name: &str, west: f64, east: f64, south: f64, north: f64) -> Self {
        Place {
            name: name.to_string(),
            west,
            east,
            south,
            north,
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if !(self.west < self.east) {
            return Err(format!("place '{}': west must be < east", self.name));
        }
        if !(self.south < self.north) {
            return Err(format!("place '{}': south must be < north", self.name));
        }
        Ok(())
    }

    /// File name for this place's map: whitespace dropped, anything that is
    /// not ASCII alphanumeric, `-`, `_` or `.` replaced by `_`.
    pub fn file_stem(&self) -> String {
        self.name
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

/// Planar bounding box in EPSG:3857 metres.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct MapExtent {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl MapExtent {
    pub fn from_place(place: &Place) -> Result<Self> {
        let (x_min, y_min) = geo_to_plane(place.west, place.south)?;
        let (x_max, y_max) = geo_to_plane(place.east, place.north)?;
        Ok(MapExtent { x_min, x_max, y_min, y_max })
    }

    pub fn dx(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn dy(&self) -> f64 {
        self.y_max - self.y_min
    }
}

/// Which values of a tag key to request from the feature source.
#[derive(Debug, Clone, PartialEq)]
pub enum TagFilter {
    Any,
    Values(Vec<String>),
}

/// Tag keys to request, in file order. The order also fixes the order of
/// each fetched feature's tags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagQuery {
    pub entries: Vec<(String, TagFilter)>,
}

impl TagQuery {
    pub fn from_json(path: &Path, value: JsonValue) -> Result<Self> {
        let map = match value {
            JsonValue::Object(map) => map,
            _ => return Err(MapError::config(path, "expected an object of tag keys")),
        };
        let mut entries = Vec::with_capacity(map.len());
        for (key, filter) in map {
            let filter = match filter {
                JsonValue::Bool(true) => TagFilter::Any,
                JsonValue::String(v) => TagFilter::Values(vec![v]),
                JsonValue::Array(values) => {
                    let mut out = Vec::with_capacity(values.len());
                    for v in values {
                        match v {
                            JsonValue::String(s) => out.push(s),
                            other => {
                                return Err(MapError::config(
                                    path,
                                    format!("tag '{}': expected string values, got {}", key, other),
                                ))
                            }
                        }
                    }
                    TagFilter::Values(out)
                }
                other => {
                    return Err(MapError::config(
                        path,
                        format!("tag '{}': expected true, a string or a list, got {}", key, other),
                    ))
                }
            };
            entries.push((key, filter));
        }
        Ok(TagQuery { entries })
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Svg,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Svg => "svg",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = &'static str;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "png" | "PNG" => Ok(OutputFormat::Png),
            "svg" | "SVG" => Ok(OutputFormat::Svg),
            _ => Err("Invalid output format, expected png or svg"),
        }
    }
}

/// Everything one run needs, gathered from the command line.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub places_path: PathBuf,
    pub tags_path: PathBuf,
    pub styles_path: PathBuf,
    pub tiles_path: PathBuf,
    pub background: String,
    /// Longest side of the printed map, in inches.
    pub max_dim: f64,
    pub dpi: f64,
    pub output_dir: PathBuf,
    pub format: OutputFormat,
    pub jobs: usize,
    pub timeout_secs: u64,
    pub interactive: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            places_path: PathBuf::from("nation_lakes.json"),
            tags_path: PathBuf::from("tags_osm.json"),
            styles_path: PathBuf::from("tag_styles.json"),
            tiles_path: PathBuf::from("tiles.json"),
            background: String::from("StamenTonerLite"),
            max_dim: 10.0,
            dpi: 300.0,
            output_dir: PathBuf::from("maps"),
            format: OutputFormat::Png,
            jobs: 1,
            timeout_secs: 180,
            interactive: false,
        }
    }
}

impl RunConfig {
    pub fn output_path(&self, place: &Place) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", place.file_stem(), self.format.extension()))
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .map_err(|err| MapError::config(path, format!("unable to read file: {}", err)))?;
    serde_json::from_str(&raw).map_err(|err| MapError::config(path, err))
}

pub fn load_places(path: &Path) -> Result<Vec<Place>> {
    let places: Vec<Place> = read_json(path)?;
    for place in &places {
        place.validate().map_err(|msg| MapError::config(path, msg))?;
    }
    Ok(places)
}

pub fn load_tag_query(path: &Path) -> Result<TagQuery> {
    let value: JsonValue = read_json(path)?;
    TagQuery::from_json(path, value)
}
