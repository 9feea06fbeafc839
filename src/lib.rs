//! Static maps of lakes and parks.
//!
//! For each configured place, features matching a tag query are fetched from
//! OpenStreetMap, projected to Web Mercator, styled through a tag-to-style
//! table and drawn over raster background tiles, together with a legend, a
//! scale bar and a title.

pub mod canvas;
pub mod config_params;
pub mod error;
pub mod layer;
pub mod overpass;
pub mod projection;
pub mod render;
pub mod scale;
pub mod style;
pub mod tiles;

pub use config_params::{MapExtent, OutputFormat, Place, RunConfig, TagFilter, TagQuery};
pub use error::{MapError, Result, Stage};
pub use layer::{flatten, ElementType, Feature, Ring};
pub use overpass::{FeatureSource, OverpassSource};
pub use render::{run, RenderedMap, Renderer, RunSummary};
pub use scale::{choose_scale_length_km, ScaleBar, ScaleChoice};
pub use style::{resolve_style, StyleConfig, StyleParams, StyleTable, TagStyleTable};
pub use tiles::{CredentialResolver, FallbackResolver, PromptResolver, TileProvider, TileSource, TileTable};
