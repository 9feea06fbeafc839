//! End-to-end runs of the map pipeline against in-memory feature and tile
//! sources.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use geojson::Value;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

use lakemaps::{
    run, ElementType, FallbackResolver, Feature, FeatureSource, MapError, OutputFormat, Place, Result,
    RunConfig, ScaleChoice, Stage, TagQuery, TileProvider,
};

/// Features per place name; places not listed fail to fetch.
struct FakeFeatures {
    by_place: HashMap<String, Vec<Feature>>,
}

impl FeatureSource for FakeFeatures {
    fn fetch(&self, place: &Place, _query: &TagQuery) -> Result<Vec<Feature>> {
        self.by_place
            .get(&place.name)
            .cloned()
            .ok_or_else(|| MapError::fetch("fake://overpass", "gateway timeout"))
    }
}

/// Serves a 1x1 PNG for every tile and remembers the requested URLs.
struct FakeTiles {
    png: Vec<u8>,
    requested: Mutex<Vec<String>>,
}

impl FakeTiles {
    fn new() -> Self {
        let mut pixmap = tiny_skia::Pixmap::new(1, 1).unwrap();
        pixmap.fill(tiny_skia::Color::from_rgba8(200, 220, 240, 255));
        FakeTiles {
            png: pixmap.encode_png().unwrap(),
            requested: Mutex::new(Vec::new()),
        }
    }
}

impl TileProvider for FakeTiles {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.requested.lock().unwrap().push(url.to_string());
        Ok(self.png.clone())
    }
}

fn write_json(dir: &Path, name: &str, value: serde_json::Value) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, value.to_string()).unwrap();
    path
}

fn setup(dir: &TempDir, places: serde_json::Value) -> RunConfig {
    let root = dir.path();
    RunConfig {
        places_path: write_json(root, "places.json", places),
        tags_path: write_json(
            root,
            "tags.json",
            json!({"natural": ["water", "peak"], "waterway": "stream", "highway": true}),
        ),
        styles_path: write_json(
            root,
            "styles.json",
            json!({
                "tag_styles": {
                    "natural": {"water": "water", "peak": "mountain"},
                    "waterway": {"stream": "stream"},
                    "highway": {"path": "trail"}
                }
            }),
        ),
        tiles_path: write_json(
            root,
            "tiles.json",
            json!({
                "StamenTonerLite": "https://tiles.stadiamaps.com/stamen_toner_lite/{z}/{x}/{y}.png?api_key=API_KEY",
                "GoogleMaps": "https://mt1.google.com/vt/lyrs=m&x={x}&y={y}&z={z}"
            }),
        ),
        background: "GoogleMaps".to_string(),
        max_dim: 10.0,
        dpi: 40.0,
        output_dir: root.join("maps"),
        format: OutputFormat::Png,
        jobs: 1,
        timeout_secs: 5,
        interactive: false,
    }
}

fn no_env(_: &str) -> Option<String> {
    None
}

/// Pixels in the given pixel box that are much darker than the tile colour.
fn dark_pixels(pixmap: &tiny_skia::Pixmap, xs: std::ops::Range<u32>, ys: std::ops::Range<u32>) -> usize {
    let width = pixmap.width();
    let pixels = pixmap.pixels();
    ys.flat_map(|y| xs.clone().map(move |x| (x, y)))
        .filter(|&(x, y)| pixels[(y * width + x) as usize].red() < 150)
        .count()
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn empty_place_produces_one_annotated_image() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(
        &dir,
        json!([{"name": "Equator Lake", "west": -1.0, "east": 1.0, "south": -1.0, "north": 1.0}]),
    );
    let features = FakeFeatures {
        by_place: HashMap::from([("Equator Lake".to_string(), vec![])]),
    };
    let tiles = FakeTiles::new();

    let summary = run(&config, &features, &tiles, &FallbackResolver, no_env).unwrap();
    assert!(summary.failed.is_empty());
    assert_eq!(summary.rendered.len(), 1);

    let map = &summary.rendered[0];
    assert_eq!(files_in(&config.output_dir), vec!["EquatorLake.png".to_string()]);
    let bytes = fs::read(&map.path).unwrap();
    assert!(bytes.starts_with(b"\x89PNG"));

    // 10 in at 40 dpi; the title baseline sits at 10% from the top.
    let pixmap = tiny_skia::Pixmap::decode_png(&bytes).unwrap();
    assert_eq!((pixmap.width(), pixmap.height()), (400, 400));
    assert!(dark_pixels(&pixmap, 120..280, 15..48) > 0, "title missing from the PNG");
    assert_eq!(dark_pixels(&pixmap, 120..280, 120..280), 0);

    // 2 degrees of longitude on the equator is ~222 km; 15% of that is ~33 km.
    assert_eq!(map.scale.length, ScaleChoice(20.0));
    let extent_dx = 2.0 * 111_319.490_793_273_6;
    assert!((map.scale.width - 20.0 / 222.39 * extent_dx).abs() < 50.0);

    assert!(map.svg.contains("Equator Lake"));
    assert!(map.svg.contains("class=\"scale-bar\""));
    assert!(map.svg.contains("20 km"));
    assert!(map.svg.contains("Legend"));
    assert_eq!(map.features_drawn, 0);
    assert!(!tiles.requested.lock().unwrap().is_empty());
}

#[test]
fn features_are_drawn_and_unsupported_ones_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = setup(
        &dir,
        json!([{"name": "Pond", "west": 10.0, "east": 10.2, "south": 50.0, "north": 50.1}]),
    );
    config.format = OutputFormat::Svg;

    let peak = Feature {
        element_type: ElementType::Node,
        geometry: Value::Point(vec![10.1, 50.05]),
        name: Some("Lookout Hill".to_string()),
        tags: vec![("natural".to_string(), "peak".to_string())],
    };
    let lake = Feature {
        element_type: ElementType::Way,
        geometry: Value::Polygon(vec![vec![
            vec![10.05, 50.02],
            vec![10.15, 50.02],
            vec![10.15, 50.08],
            vec![10.05, 50.02],
        ]]),
        name: None,
        tags: vec![
            ("natural".to_string(), "water".to_string()),
            ("waterway".to_string(), "stream".to_string()),
        ],
    };
    let route = Feature {
        element_type: ElementType::Relation,
        geometry: Value::MultiLineString(vec![vec![vec![10.0, 50.0], vec![10.1, 50.1]]]),
        name: None,
        tags: vec![("highway".to_string(), "path".to_string())],
    };
    let features = FakeFeatures {
        by_place: HashMap::from([("Pond".to_string(), vec![peak, lake, route])]),
    };

    let summary = run(&config, &features, &FakeTiles::new(), &FallbackResolver, no_env).unwrap();
    let map = &summary.rendered[0];
    assert_eq!(map.features_drawn, 2);
    assert_eq!(map.features_skipped, 1);
    assert!(map.path.ends_with("Pond.svg"));
    assert!(map.svg.contains("Lookout Hill"));
    // Last matching tag wins: the lake is drawn with the stream style, no fill.
    assert!(map.svg.contains("#1e88e5"));
    assert!(!map.svg.contains("fill=\"#90caf9\""));
    assert_eq!(fs::read_to_string(&map.path).unwrap(), map.svg);
}

#[test]
fn failed_fetch_skips_only_that_place() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(
        &dir,
        json!([
            {"name": "Unreachable", "west": 0.0, "east": 0.1, "south": 0.0, "north": 0.1},
            {"name": "Fine", "west": 1.0, "east": 1.1, "south": 0.0, "north": 0.1}
        ]),
    );
    let features = FakeFeatures {
        by_place: HashMap::from([("Fine".to_string(), vec![])]),
    };

    let summary = run(&config, &features, &FakeTiles::new(), &FallbackResolver, no_env).unwrap();
    assert_eq!(summary.rendered.len(), 1);
    assert_eq!(summary.failed.len(), 1);
    match &summary.failed[0] {
        MapError::PlaceFailed { place, stage, .. } => {
            assert_eq!(place, "Unreachable");
            assert_eq!(*stage, Stage::Features);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(files_in(&config.output_dir), vec!["Fine.png".to_string()]);
}

#[test]
fn parallel_run_renders_every_place() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = setup(
        &dir,
        json!([
            {"name": "North Arm", "west": 0.0, "east": 0.1, "south": 0.0, "north": 0.1},
            {"name": "South Arm", "west": 0.0, "east": 0.1, "south": -0.1, "north": 0.0},
            {"name": "West Bay", "west": -0.1, "east": 0.0, "south": 0.0, "north": 0.1}
        ]),
    );
    config.jobs = 3;
    config.format = OutputFormat::Svg;
    let features = FakeFeatures {
        by_place: ["North Arm", "South Arm", "West Bay"]
            .iter()
            .map(|n| (n.to_string(), vec![]))
            .collect(),
    };

    let summary = run(&config, &features, &FakeTiles::new(), &FallbackResolver, no_env).unwrap();
    assert!(summary.failed.is_empty());
    assert_eq!(
        files_in(&config.output_dir),
        vec!["NorthArm.svg".to_string(), "SouthArm.svg".to_string(), "WestBay.svg".to_string()]
    );
}

#[test]
fn missing_stamen_key_falls_back_to_free_tiles() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = setup(
        &dir,
        json!([{"name": "Bay", "west": 0.0, "east": 0.1, "south": 0.0, "north": 0.1}]),
    );
    config.background = "StamenTonerLite".to_string();
    config.format = OutputFormat::Svg;
    let features = FakeFeatures {
        by_place: HashMap::from([("Bay".to_string(), vec![])]),
    };
    let tiles = FakeTiles::new();

    run(&config, &features, &tiles, &FallbackResolver, no_env).unwrap();
    let requested = tiles.requested.lock().unwrap();
    assert!(requested.iter().all(|u| u.starts_with("https://mt1.google.com/")));
}

#[test]
fn invalid_places_abort_before_rendering() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(
        &dir,
        json!([{"name": "Upside Down", "west": 0.0, "east": 1.0, "south": 1.0, "north": 0.0}]),
    );
    let features = FakeFeatures { by_place: HashMap::new() };
    let err = run(&config, &features, &FakeTiles::new(), &FallbackResolver, no_env).unwrap_err();
    assert!(matches!(err, MapError::Config { .. }));
    assert!(!config.output_dir.exists());
}
