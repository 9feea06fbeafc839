//! Drives one run: load the configuration, then render every place.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::canvas::{Anchor, BoxStyle, MapCanvas};
use crate::config_params::{load_places, load_tag_query, MapExtent, Place, RunConfig, TagQuery};
use crate::error::{MapError, Result, Stage};
use crate::layer::{flatten, reproject, ElementType, Feature};
use crate::overpass::FeatureSource;
use crate::projection::{compute_figure_dimensions, figure_to_plane, geo_to_plane, plot_width_km};
use crate::scale::ScaleBar;
use crate::style::{resolve_style, StyleConfig};
use crate::tiles::{fetch_tiles, resolve_tile_source, CredentialResolver, TileProvider, TileSource, TileTable};

/// Largest share of the map width the scale bar may take.
pub const SCALE_MAX_WIDTH_PCT: f64 = 0.15;
const SCALE_ANCHOR_FIG_Y: f64 = 0.025;
const TITLE_ANCHOR_FIG: (f64, f64) = (0.5, 0.9);
const BORDER_COLOR: &str = "#04253a";

/// What was produced for one place.
#[derive(Debug, Clone)]
pub struct RenderedMap {
    pub place: String,
    pub path: PathBuf,
    pub scale: ScaleBar,
    pub features_drawn: usize,
    pub features_skipped: usize,
    pub svg: String,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub rendered: Vec<RenderedMap>,
    pub failed: Vec<MapError>,
}

/// Read-only state shared by every place of a run.
pub struct Renderer<'a> {
    config: &'a RunConfig,
    query: TagQuery,
    styles: StyleConfig,
    tile_source: TileSource,
    features: &'a dyn FeatureSource,
    tiles: &'a dyn TileProvider,
}

impl<'a> Renderer<'a> {
    pub fn new(
        config: &'a RunConfig,
        query: TagQuery,
        styles: StyleConfig,
        tile_source: TileSource,
        features: &'a dyn FeatureSource,
        tiles: &'a dyn TileProvider,
    ) -> Self {
        Renderer {
            config,
            query,
            styles,
            tile_source,
            features,
            tiles,
        }
    }

    fn text_size(&self) -> f64 {
        self.config.max_dim * 0.5
    }

    pub fn render_place(&self, place: &Place) -> Result<RenderedMap> {
        info!(place = place.name.as_str(), "making map");
        let name = place.name.as_str();

        let extent = MapExtent::from_place(place).map_err(|e| e.at(name, Stage::Extent))?;
        let (width_in, height_in) = compute_figure_dimensions(self.config.max_dim, extent.dx(), extent.dy())
            .map_err(|e| e.at(name, Stage::Extent))?;

        let features = self
            .features
            .fetch(place, &self.query)
            .map_err(|e| e.at(name, Stage::Features))?;
        if features.is_empty() {
            warn!(place = name, "feature source returned no features");
        }

        let mut canvas = MapCanvas::new(extent, width_in, height_in, self.config.dpi)
            .map_err(|e| e.at(name, Stage::Draw))?;

        let tiles = fetch_tiles(place, &self.tile_source, self.tiles).map_err(|e| e.at(name, Stage::Tiles))?;
        for tile in &tiles {
            canvas.draw_image(tile).map_err(|e| e.at(name, Stage::Draw))?;
        }

        let mut drawn = 0;
        let mut skipped = 0;
        for feature in &features {
            match self.draw_feature(&mut canvas, feature) {
                Ok(()) => drawn += 1,
                Err(MapError::DegenerateExtent) => return Err(MapError::DegenerateExtent.at(name, Stage::Draw)),
                Err(err) => {
                    warn!(place = name, error = %err, "skipping feature");
                    skipped += 1;
                }
            }
        }
        debug!(place = name, drawn, skipped, "features drawn");

        let scale = self.annotate(&mut canvas, place, &extent).map_err(|e| e.at(name, Stage::Draw))?;

        let path = self.config.output_path(place);
        canvas
            .save(&path, self.config.format)
            .map_err(|e| e.at(name, Stage::Save))?;
        info!(place = name, path = %path.display(), "map saved");

        Ok(RenderedMap {
            place: place.name.clone(),
            path,
            scale,
            features_drawn: drawn,
            features_skipped: skipped,
            svg: canvas.to_svg_string(),
        })
    }

    fn draw_feature(&self, canvas: &mut MapCanvas, feature: &Feature) -> Result<()> {
        let projected = reproject(&feature.geometry, &geo_to_plane)?;
        let rings = flatten(&projected)?;
        let style = resolve_style(feature, &self.styles.tag_styles, &self.styles.styles);
        for ring in &rings {
            canvas.draw_ring(ring, &style)?;
        }
        if feature.element_type == ElementType::Node {
            if let (Some(name), Some(&(x, y))) = (&feature.name, rings.first().and_then(|r| r.first())) {
                let size = self.text_size();
                canvas.draw_text(x, y, name, size, Anchor::Middle, size * 0.75)?;
            }
        }
        Ok(())
    }

    /// Legend, scale bar, title and frame.
    fn annotate(&self, canvas: &mut MapCanvas, place: &Place, extent: &MapExtent) -> Result<ScaleBar> {
        let size = self.text_size();
        canvas.draw_legend(&self.styles.legend_entries(), size);

        let width_km = plot_width_km(place);
        let bar = ScaleBar::new(width_km, SCALE_MAX_WIDTH_PCT, extent.dx(), extent.dy());
        let (ax, ay) = figure_to_plane(1.0 - SCALE_MAX_WIDTH_PCT, SCALE_ANCHOR_FIG_Y, extent)?;
        canvas.draw_rectangle(
            ax,
            ay,
            bar.width,
            bar.height,
            &BoxStyle {
                fill: "lightgrey".to_string(),
                stroke: "black".to_string(),
                stroke_width_pt: 0.5,
            },
        )?;
        canvas.draw_text(ax + bar.width / 2.0, ay, &bar.length.to_string(), size, Anchor::Middle, -size)?;
        debug!(place = place.name.as_str(), width_km, scale = %bar.length, "scale bar");

        let (tx, ty) = figure_to_plane(TITLE_ANCHOR_FIG.0, TITLE_ANCHOR_FIG.1, extent)?;
        canvas.draw_text(tx, ty, &place.name, size * 4.0, Anchor::Middle, 0.0)?;

        canvas.draw_border(BORDER_COLOR, 1.0);
        Ok(bar)
    }

    /// Render every place, in order or on a pool of `config.jobs` threads.
    pub fn render_all(&self, places: &[Place]) -> Result<RunSummary> {
        let results: Vec<Result<RenderedMap>> = if self.config.jobs > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.jobs)
                .build()
                .map_err(|e| MapError::Render(e.to_string()))?;
            pool.install(|| places.par_iter().map(|p| self.render_place(p)).collect())
        } else {
            places.iter().map(|p| self.render_place(p)).collect()
        };

        let mut summary = RunSummary::default();
        for result in results {
            match result {
                Ok(map) => summary.rendered.push(map),
                Err(err) => {
                    error!(error = %err, "map failed");
                    summary.failed.push(err);
                }
            }
        }
        Ok(summary)
    }
}

/// Two places whose names sanitise to the same file would overwrite each
/// other.
fn check_output_paths(config: &RunConfig, places: &[Place]) -> Result<()> {
    let mut seen: HashMap<PathBuf, &str> = HashMap::new();
    for place in places {
        let path = config.output_path(place);
        if let Some(other) = seen.insert(path.clone(), &place.name) {
            return Err(MapError::config(
                &config.places_path,
                format!("places '{}' and '{}' both map to {}", other, place.name, path.display()),
            ));
        }
    }
    Ok(())
}

/// Load every input named by `config` and render all places.
pub fn run<E>(
    config: &RunConfig,
    features: &dyn FeatureSource,
    tiles: &dyn TileProvider,
    resolver: &dyn CredentialResolver,
    env: E,
) -> Result<RunSummary>
where
    E: Fn(&str) -> Option<String>,
{
    let places = load_places(&config.places_path)?;
    let query = load_tag_query(&config.tags_path)?;
    let styles = StyleConfig::load(&config.styles_path, config.max_dim)?;
    let table = TileTable::load(&config.tiles_path)?;
    let tile_source = resolve_tile_source(&table, &config.tiles_path, &config.background, env, resolver)?;
    info!(background = tile_source.background.as_str(), "selected background");

    check_output_paths(config, &places)?;
    fs::create_dir_all(&config.output_dir)?;

    let renderer = Renderer::new(config, query, styles, tile_source, features, tiles);
    renderer.render_all(&places)
}
