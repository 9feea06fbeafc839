use geojson::{Geometry, Value};

use crate::error::{MapError, Result};

/// One drawable contour: a point, a line or a polygon boundary.
pub type Ring = Vec<(f64, f64)>;

/// OpenStreetMap element kind a feature came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Node,
    Way,
    Relation,
}

/// A fetched map element. Tags are ordered and only carry the keys that
/// were queried for.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub element_type: ElementType,
    pub geometry: Value,
    pub name: Option<String>,
    pub tags: Vec<(String, String)>,
}

impl Feature {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

pub fn geometry_kind(value: &Value) -> &'static str {
    match value {
        Value::Point(_) => "Point",
        Value::MultiPoint(_) => "MultiPoint",
        Value::LineString(_) => "LineString",
        Value::MultiLineString(_) => "MultiLineString",
        Value::Polygon(_) => "Polygon",
        Value::MultiPolygon(_) => "MultiPolygon",
        Value::GeometryCollection(_) => "GeometryCollection",
    }
}

/// Split a geometry into the rings a renderer draws one by one.
///
/// Polygons yield their exterior first, then each hole. Multi-polygons yield
/// the rings of each member in order.
pub fn flatten(value: &Value) -> Result<Vec<Ring>> {
    match value {
        Value::Point(point) => Ok(vec![vec![position(point)?]]),
        Value::LineString(positions) => Ok(vec![ring(positions)?]),
        Value::Polygon(rings) => polygon_rings(rings),
        Value::MultiPolygon(polygons) => {
            let mut res = Vec::new();
            for polygon in polygons {
                res.extend(polygon_rings(polygon)?);
            }
            Ok(res)
        }
        other => Err(MapError::UnsupportedGeometry(geometry_kind(other).to_string())),
    }
}

fn polygon_rings(rings: &[Vec<Vec<f64>>]) -> Result<Vec<Ring>> {
    rings.iter().map(|r| ring(r)).collect()
}

fn ring(positions: &[Vec<f64>]) -> Result<Ring> {
    positions.iter().map(|p| position(p)).collect()
}

fn position(p: &[f64]) -> Result<(f64, f64)> {
    match p {
        [x, y, ..] => Ok((*x, *y)),
        _ => Err(MapError::UnsupportedGeometry(format!(
            "position with {} coordinate(s)",
            p.len()
        ))),
    }
}

/// Run every coordinate of a geometry through `project`.
pub fn reproject<F>(value: &Value, project: &F) -> Result<Value>
where
    F: Fn(f64, f64) -> Result<(f64, f64)>,
{
    let point = |p: &Vec<f64>| -> Result<Vec<f64>> {
        let (x, y) = position(p)?;
        let (px, py) = project(x, y)?;
        Ok(vec![px, py])
    };
    let line = |l: &Vec<Vec<f64>>| -> Result<Vec<Vec<f64>>> { l.iter().map(point).collect() };
    let poly = |r: &Vec<Vec<Vec<f64>>>| -> Result<Vec<Vec<Vec<f64>>>> { r.iter().map(line).collect() };

    Ok(match value {
        Value::Point(p) => Value::Point(point(p)?),
        Value::MultiPoint(points) => Value::MultiPoint(line(points)?),
        Value::LineString(positions) => Value::LineString(line(positions)?),
        Value::MultiLineString(lines) => {
            Value::MultiLineString(lines.iter().map(line).collect::<Result<_>>()?)
        }
        Value::Polygon(rings) => Value::Polygon(poly(rings)?),
        Value::MultiPolygon(polygons) => {
            Value::MultiPolygon(polygons.iter().map(poly).collect::<Result<_>>()?)
        }
        Value::GeometryCollection(geometries) => {
            let mut res = Vec::with_capacity(geometries.len());
            for geom in geometries {
                res.push(Geometry::new(reproject(&geom.value, project)?));
            }
            Value::GeometryCollection(res)
        }
    })
}
