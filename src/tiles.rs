//! Background tiles: picking a tile source, working out which slippy-map
//! tiles cover a place, and downloading them.

use std::cell::RefCell;
use std::f64::consts::PI;
use std::io::{self, BufRead};
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::config_params::{read_json, MapExtent, Place};
use crate::error::{MapError, Result};
use crate::projection::EARTH_RADIUS_M;

pub const STAMEN_KEY_VAR: &str = "STAMEN_API_KEY";
pub const KEY_PLACEHOLDER: &str = "API_KEY";
pub const FALLBACK_BACKGROUND: &str = "GoogleMaps";
pub const MAX_ZOOM: u8 = 19;
/// Upper bound on tiles fetched for one place.
pub const MAX_TILES: u32 = 64;

const USER_AGENT: &str = concat!("lakemaps/", env!("CARGO_PKG_VERSION"));

/// Background name -> URL template, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileTable {
    entries: Vec<(String, String)>,
}

impl TileTable {
    pub fn load(path: &Path) -> Result<Self> {
        let value: JsonValue = read_json(path)?;
        let map = match value {
            JsonValue::Object(map) => map,
            _ => return Err(MapError::config(path, "expected an object of background names")),
        };
        let mut entries = Vec::with_capacity(map.len());
        for (name, url) in map {
            match url {
                JsonValue::String(url) => entries.push((name, url)),
                _ => return Err(MapError::config(path, format!("background '{}' must be a URL string", name))),
            }
        }
        Ok(TileTable { entries })
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        TileTable {
            entries: entries.into_iter().map(|(n, u)| (n.into(), u.into())).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, u)| u.as_str())
    }

    /// Backgrounds usable without a credential.
    pub fn free_backgrounds(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|(n, _)| n.as_str())
            .filter(|n| !needs_credential(n))
            .collect()
    }
}

pub fn needs_credential(background: &str) -> bool {
    background.to_lowercase().contains("stamen")
}

/// Chooses a replacement when a background's credential is missing.
pub trait CredentialResolver {
    fn choose_alternative(&self, background: &str, free: &[&str]) -> Option<String>;
}

/// Non-interactive: substitute a known free background.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackResolver;

impl CredentialResolver for FallbackResolver {
    fn choose_alternative(&self, _background: &str, free: &[&str]) -> Option<String> {
        free.iter()
            .find(|n| **n == FALLBACK_BACKGROUND)
            .or_else(|| free.first())
            .map(|n| n.to_string())
    }
}

/// Interactive: list the free backgrounds and read a number.
pub struct PromptResolver<R> {
    input: RefCell<R>,
}

impl<R: BufRead> PromptResolver<R> {
    pub fn new(input: R) -> Self {
        PromptResolver {
            input: RefCell::new(input),
        }
    }
}

impl PromptResolver<io::StdinLock<'static>> {
    pub fn stdin() -> Self {
        PromptResolver::new(io::stdin().lock())
    }
}

impl<R: BufRead> CredentialResolver for PromptResolver<R> {
    fn choose_alternative(&self, background: &str, free: &[&str]) -> Option<String> {
        eprintln!("No {} found for '{}'. Choose one of the following free tiles:", STAMEN_KEY_VAR, background);
        for (i, name) in free.iter().enumerate() {
            eprintln!("{}\t{}", i, name);
        }
        eprint!("Select a tile by number: ");
        let mut line = String::new();
        self.input.borrow_mut().read_line(&mut line).ok()?;
        match line.trim().parse::<usize>().ok().and_then(|i| free.get(i)) {
            Some(name) => Some(name.to_string()),
            None => {
                eprintln!("Number selected is not available");
                None
            }
        }
    }
}

/// The background actually used and its ready-to-fill URL template.
#[derive(Debug, Clone, PartialEq)]
pub struct TileSource {
    pub background: String,
    pub template: String,
}

impl TileSource {
    pub fn url(&self, z: u8, x: u32, y: u32) -> String {
        self.template
            .replace("{z}", &z.to_string())
            .replace("{x}", &x.to_string())
            .replace("{y}", &y.to_string())
            .replace("{r}", "")
    }
}

pub fn resolve_tile_source<E>(
    tiles: &TileTable,
    tiles_path: &Path,
    background: &str,
    env: E,
    resolver: &dyn CredentialResolver,
) -> Result<TileSource>
where
    E: Fn(&str) -> Option<String>,
{
    let template = tiles.get(background).ok_or_else(|| {
        MapError::config(tiles_path, format!("unknown background '{}'", background))
    })?;
    if !needs_credential(background) {
        return Ok(TileSource {
            background: background.to_string(),
            template: template.to_string(),
        });
    }
    if let Some(key) = env(STAMEN_KEY_VAR) {
        info!(background, "using API key from {}", STAMEN_KEY_VAR);
        return Ok(TileSource {
            background: background.to_string(),
            template: template.replace(KEY_PLACEHOLDER, &key),
        });
    }

    let free = tiles.free_backgrounds();
    let missing = || MapError::CredentialMissing {
        background: background.to_string(),
        variable: STAMEN_KEY_VAR,
    };
    let chosen = resolver.choose_alternative(background, &free).ok_or_else(missing)?;
    let template = match tiles.get(&chosen) {
        Some(t) if !needs_credential(&chosen) => t,
        _ => return Err(missing()),
    };
    warn!(
        requested = background,
        substitute = chosen.as_str(),
        "no {} in environment, substituting background",
        STAMEN_KEY_VAR
    );
    Ok(TileSource {
        background: chosen,
        template: template.to_string(),
    })
}

/// Zoom level with a bit more detail than the bounding box needs.
pub fn calculate_zoom(place: &Place) -> u8 {
    let zoom_lon = (720.0 / (place.east - place.west)).log2().ceil();
    let zoom_lat = (720.0 / (place.north - place.south)).log2().ceil();
    let zoom = zoom_lon.max(zoom_lat) + 1.0;
    zoom.clamp(0.0, MAX_ZOOM as f64) as u8
}

/// Inclusive range of tiles covering a place at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub z: u8,
    pub x_min: u32,
    pub x_max: u32,
    pub y_min: u32,
    pub y_max: u32,
}

impl TileGrid {
    pub fn covering(place: &Place, z: u8) -> Self {
        let (x_min, y_min) = lonlat_to_tile(place.west, place.north, z);
        let (x_max, y_max) = lonlat_to_tile(place.east, place.south, z);
        TileGrid { z, x_min, x_max, y_min, y_max }
    }

    /// Covering grid at the computed zoom, lowered until it holds at most
    /// `MAX_TILES` tiles.
    pub fn for_place(place: &Place) -> Self {
        let mut grid = TileGrid::covering(place, calculate_zoom(place));
        while grid.count() > MAX_TILES && grid.z > 0 {
            grid = TileGrid::covering(place, grid.z - 1);
        }
        grid
    }

    pub fn count(&self) -> u32 {
        (self.x_max - self.x_min + 1) * (self.y_max - self.y_min + 1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (self.y_min..=self.y_max).flat_map(move |y| (self.x_min..=self.x_max).map(move |x| (x, y)))
    }
}

pub fn lonlat_to_tile(lon: f64, lat: f64, z: u8) -> (u32, u32) {
    let n = 2f64.powi(z as i32);
    let lat_rad = lat.clamp(-85.051_128_78, 85.051_128_78).to_radians();
    let x = ((lon + 180.0) / 360.0 * n).floor();
    let y = ((1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n).floor();
    let last = n - 1.0;
    (x.clamp(0.0, last) as u32, y.clamp(0.0, last) as u32)
}

/// Plane bounds of one slippy-map tile.
pub fn tile_bounds(z: u8, x: u32, y: u32) -> MapExtent {
    let half = PI * EARTH_RADIUS_M;
    let size = 2.0 * half / 2f64.powi(z as i32);
    let x_min = -half + x as f64 * size;
    let y_max = half - y as f64 * size;
    MapExtent {
        x_min,
        x_max: x_min + size,
        y_min: y_max - size,
        y_max,
    }
}

/// A downloaded tile image and where it sits in the plane.
#[derive(Debug, Clone)]
pub struct Tile {
    pub bounds: MapExtent,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF8") {
        Some("image/gif")
    } else if bytes.len() > 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

/// Anything that can hand back raw tile image bytes for a URL.
pub trait TileProvider: Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| MapError::fetch("<client>", e))
}

pub struct HttpTileProvider {
    client: Client,
}

impl HttpTileProvider {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(HttpTileProvider {
            client: http_client(timeout)?,
        })
    }
}

impl TileProvider for HttpTileProvider {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().map_err(|e| MapError::fetch(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(MapError::fetch(url, format!("status {}", status)));
        }
        let bytes = response.bytes().map_err(|e| MapError::fetch(url, e))?;
        Ok(bytes.to_vec())
    }
}

pub fn fetch_tiles(place: &Place, source: &TileSource, provider: &dyn TileProvider) -> Result<Vec<Tile>> {
    let grid = TileGrid::for_place(place);
    debug!(place = place.name.as_str(), z = grid.z, count = grid.count(), "fetching tiles");
    let mut tiles = Vec::with_capacity(grid.count() as usize);
    for (x, y) in grid.iter() {
        let url = source.url(grid.z, x, y);
        let bytes = provider.fetch(&url)?;
        let mime = sniff_mime(&bytes).ok_or_else(|| MapError::fetch(&url, "response is not an image"))?;
        tiles.push(Tile {
            bounds: tile_bounds(grid.z, x, y),
            mime,
            bytes,
        });
    }
    Ok(tiles)
}
