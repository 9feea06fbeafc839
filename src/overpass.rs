//! OpenStreetMap features through the Overpass API.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use geojson::Value;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config_params::{Place, TagFilter, TagQuery};
use crate::error::{MapError, Result};
use crate::layer::{ElementType, Feature};
use crate::tiles::http_client;

pub const DEFAULT_ENDPOINT: &str = "https://overpass-api.de/api/interpreter";

/// Anything that can return the features of a place matching a tag query.
pub trait FeatureSource: Sync {
    fn fetch(&self, place: &Place, query: &TagQuery) -> Result<Vec<Feature>>;
}

pub struct OverpassSource {
    client: Client,
    endpoint: String,
    timeout_secs: u64,
}

impl OverpassSource {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        Ok(OverpassSource {
            client: http_client(timeout)?,
            endpoint: endpoint.to_string(),
            timeout_secs: timeout.as_secs(),
        })
    }
}

impl FeatureSource for OverpassSource {
    fn fetch(&self, place: &Place, query: &TagQuery) -> Result<Vec<Feature>> {
        let ql = build_query(place, query, self.timeout_secs);
        debug!(place = place.name.as_str(), query = ql.as_str(), "querying overpass");
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("data", ql.as_str())])
            .send()
            .map_err(|e| MapError::fetch(&self.endpoint, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(MapError::fetch(&self.endpoint, format!("status {}", status)));
        }
        let body = response.text().map_err(|e| MapError::fetch(&self.endpoint, e))?;
        parse_response(&body, query).map_err(|e| MapError::fetch(&self.endpoint, e))
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn regex_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Overpass QL requesting every node, way and relation inside the place
/// that carries one of the queried tags, with inline geometry.
pub fn build_query(place: &Place, query: &TagQuery, timeout_secs: u64) -> String {
    let bbox = format!("({},{},{},{})", place.south, place.west, place.north, place.east);
    let mut ql = format!("[out:json][timeout:{}];\n(\n", timeout_secs);
    for (key, filter) in &query.entries {
        let selector = match filter {
            TagFilter::Any => format!("[{}]", quote(key)),
            TagFilter::Values(values) if values.len() == 1 => {
                format!("[{}={}]", quote(key), quote(&values[0]))
            }
            TagFilter::Values(values) => {
                let alternatives: Vec<String> = values.iter().map(|v| regex_escape(v)).collect();
                format!("[{}~{}]", quote(key), quote(&format!("^({})$", alternatives.join("|"))))
            }
        };
        let _ = writeln!(ql, "  nwr{}{};", selector, bbox);
    }
    ql.push_str(");\nout geom;\n");
    ql
}

#[derive(Debug, Deserialize)]
struct Response {
    elements: Vec<Element>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
struct LatLon {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct Element {
    #[serde(rename = "type")]
    kind: String,
    id: i64,
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(default)]
    geometry: Vec<Option<LatLon>>,
    #[serde(default)]
    members: Vec<Member>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Member {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    geometry: Vec<Option<LatLon>>,
}

type Coords = Vec<(f64, f64)>;

pub fn parse_response(body: &str, query: &TagQuery) -> std::result::Result<Vec<Feature>, String> {
    let response: Response = serde_json::from_str(body).map_err(|e| format!("malformed response: {}", e))?;
    let mut features = Vec::with_capacity(response.elements.len());
    for element in response.elements {
        let (element_type, geometry) = match element.kind.as_str() {
            "node" => match (element.lon, element.lat) {
                (Some(lon), Some(lat)) => (ElementType::Node, Some(Value::Point(vec![lon, lat]))),
                _ => (ElementType::Node, None),
            },
            "way" => (ElementType::Way, way_geometry(&element)),
            "relation" if is_area_relation(&element.tags) => (ElementType::Relation, relation_geometry(&element)),
            "relation" => {
                debug!(
                    id = element.id,
                    relation = element.tags.get("type").map(String::as_str).unwrap_or(""),
                    "skipping relation without area geometry"
                );
                continue;
            }
            other => {
                debug!(kind = other, id = element.id, "skipping element");
                continue;
            }
        };
        let geometry = match geometry {
            Some(g) => g,
            None => {
                warn!(kind = element.kind.as_str(), id = element.id, "no usable geometry, skipping");
                continue;
            }
        };
        let tags = query
            .keys()
            .filter_map(|k| element.tags.get(k).map(|v| (k.to_string(), v.clone())))
            .collect();
        features.push(Feature {
            element_type,
            geometry,
            name: element.tags.get("name").cloned(),
            tags,
        });
    }
    Ok(features)
}

fn coords(geometry: &[Option<LatLon>]) -> Coords {
    geometry.iter().flatten().map(|p| (p.lon, p.lat)).collect()
}

fn to_positions(ring: &[(f64, f64)]) -> Vec<Vec<f64>> {
    ring.iter().map(|&(x, y)| vec![x, y]).collect()
}

fn is_closed(ring: &[(f64, f64)]) -> bool {
    ring.len() >= 4 && ring.first() == ring.last()
}

/// Whether a closed way with these tags is an area rather than a loop line.
fn is_area(tags: &BTreeMap<String, String>) -> bool {
    match tags.get("area").map(String::as_str) {
        Some("yes") => return true,
        Some("no") => return false,
        _ => {}
    }
    const AREA_KEYS: [&str; 10] = [
        "building", "landuse", "leisure", "amenity", "boundary", "tourism", "water", "place",
        "man_made", "aeroway",
    ];
    if AREA_KEYS.iter().any(|k| tags.contains_key(*k)) {
        return true;
    }
    if let Some(natural) = tags.get("natural") {
        return !matches!(natural.as_str(), "coastline" | "cliff" | "ridge" | "arete" | "tree_row");
    }
    if let Some(waterway) = tags.get("waterway") {
        return matches!(waterway.as_str(), "riverbank" | "dock" | "boatyard" | "dam");
    }
    false
}

fn way_geometry(element: &Element) -> Option<Value> {
    let line = coords(&element.geometry);
    if line.len() < 2 {
        return None;
    }
    if is_closed(&line) && is_area(&element.tags) {
        Some(Value::Polygon(vec![to_positions(&line)]))
    } else {
        Some(Value::LineString(to_positions(&line)))
    }
}

fn is_area_relation(tags: &BTreeMap<String, String>) -> bool {
    matches!(tags.get("type").map(String::as_str), Some("multipolygon") | Some("boundary"))
}

/// Polygons of a multipolygon or boundary relation, built from its way
/// members.
fn relation_geometry(element: &Element) -> Option<Value> {
    let mut outer = Vec::new();
    let mut inner = Vec::new();
    for member in element.members.iter().filter(|m| m.kind == "way") {
        let segment = coords(&member.geometry);
        if segment.len() < 2 {
            continue;
        }
        if member.role == "inner" {
            inner.push(segment);
        } else {
            outer.push(segment);
        }
    }
    polygons_from_rings(merge_rings(outer), merge_rings(inner))
}

/// Join way segments end to end into closed rings. Chains that never
/// close are dropped.
fn merge_rings(mut segments: Vec<Coords>) -> Vec<Coords> {
    let mut rings = Vec::new();
    while let Some(mut ring) = segments.pop() {
        loop {
            if is_closed(&ring) {
                rings.push(ring);
                break;
            }
            let end = ring[ring.len() - 1];
            let next = segments
                .iter()
                .position(|s| s.first() == Some(&end) || s.last() == Some(&end));
            match next {
                Some(i) => {
                    let mut segment = segments.swap_remove(i);
                    if segment.first() != Some(&end) {
                        segment.reverse();
                    }
                    ring.extend(segment.into_iter().skip(1));
                }
                None => {
                    debug!(points = ring.len(), "dropping unclosed ring");
                    break;
                }
            }
        }
    }
    rings
}

fn contains(ring: &[(f64, f64)], (x, y): (f64, f64)) -> bool {
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn polygons_from_rings(outer: Vec<Coords>, inner: Vec<Coords>) -> Option<Value> {
    if outer.is_empty() {
        return None;
    }
    let mut polygons: Vec<Vec<Vec<Vec<f64>>>> = outer.iter().map(|r| vec![to_positions(r)]).collect();
    for hole in inner {
        if let Some(i) = outer.iter().position(|o| contains(o, hole[0])) {
            polygons[i].push(to_positions(&hole));
        }
    }
    if polygons.len() == 1 {
        polygons.pop().map(Value::Polygon)
    } else {
        Some(Value::MultiPolygon(polygons))
    }
}
