//! SVG drawing surface in plane coordinates, rasterised with resvg on save.

use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use base64::Engine;
use svg::node::element::path::Data;
use svg::node::element::{Circle, Group, Image, Path as SvgPath, Rectangle as Rect, Text};
use svg::node::Text as NodeText;
use svg::{Document, Node};
use tracing::{debug, warn};

use crate::config_params::{MapExtent, OutputFormat};
use crate::error::{MapError, Result};
use crate::projection::plane_to_figure;
use crate::style::{LegendEntry, LineStyle, Marker, StyleParams};
use crate::tiles::Tile;

/// Matplotlib's first cycle colour, used for unstyled features.
pub const DEFAULT_COLOR: &str = "#1f77b4";
pub const DEFAULT_WIDTH_PT: f64 = 1.5;
pub const DEFAULT_MARKER_PT: f64 = 6.0;
const FONT_FAMILY: &str = "sans-serif";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Start,
    Middle,
    End,
}

impl Anchor {
    fn as_str(&self) -> &'static str {
        match self {
            Anchor::Start => "start",
            Anchor::Middle => "middle",
            Anchor::End => "end",
        }
    }
}

/// Outline and fill for a plain rectangle.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxStyle {
    pub fill: String,
    pub stroke: String,
    pub stroke_width_pt: f64,
}

pub struct MapCanvas {
    pub width_px: u32,
    pub height_px: u32,
    extent: MapExtent,
    /// Pixels per typographic point.
    px_per_pt: f64,
    document: Document,
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn fmt_px(v: f64) -> String {
    format!("{:.2}", v)
}

/// Families tried, in order, for the generic `sans-serif` name.
const SANS_SERIF_FAMILIES: [&str; 6] = [
    "DejaVu Sans",
    "Liberation Sans",
    "Noto Sans",
    "Arial",
    "Helvetica",
    "FreeSans",
];

fn sans_serif_family(db: &usvg::fontdb::Database) -> Option<String> {
    let loaded: Vec<&str> = db
        .faces()
        .flat_map(|face| face.families.iter().map(|(name, _)| name.as_str()))
        .collect();
    SANS_SERIF_FAMILIES
        .iter()
        .copied()
        .find(|family| loaded.contains(family))
        .or_else(|| loaded.first().copied())
        .map(str::to_string)
}

fn font_db() -> Arc<usvg::fontdb::Database> {
    static FONTS: OnceLock<Arc<usvg::fontdb::Database>> = OnceLock::new();
    FONTS
        .get_or_init(|| {
            let mut db = usvg::fontdb::Database::new();
            db.load_system_fonts();
            match sans_serif_family(&db) {
                Some(family) => {
                    debug!(family = family.as_str(), faces = db.len(), "sans-serif font");
                    db.set_sans_serif_family(family);
                }
                None => warn!("no system fonts found, map text cannot be rasterised"),
            }
            Arc::new(db)
        })
        .clone()
}

impl MapCanvas {
    /// A canvas of `width_in` x `height_in` inches at `dpi`, showing `extent`.
    pub fn new(extent: MapExtent, width_in: f64, height_in: f64, dpi: f64) -> Result<Self> {
        if extent.dx() == 0.0 || extent.dy() == 0.0 {
            return Err(MapError::DegenerateExtent);
        }
        let width_px = (width_in * dpi).round().max(1.0) as u32;
        let height_px = (height_in * dpi).round().max(1.0) as u32;
        let document = Document::new()
            .set("xmlns", "http://www.w3.org/2000/svg")
            .set("width", width_px)
            .set("height", height_px)
            .set("viewBox", format!("0 0 {} {}", width_px, height_px));
        Ok(MapCanvas {
            width_px,
            height_px,
            extent,
            px_per_pt: dpi / 72.0,
            document,
        })
    }

    pub fn extent(&self) -> &MapExtent {
        &self.extent
    }

    /// Plane coordinates to pixels, y pointing down.
    pub fn to_pixel(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let (fx, fy) = plane_to_figure(x, y, &self.extent)?;
        Ok((fx * self.width_px as f64, (1.0 - fy) * self.height_px as f64))
    }

    fn pt(&self, points: f64) -> f64 {
        points * self.px_per_pt
    }

    fn plane_len_x(&self, len: f64) -> f64 {
        len / self.extent.dx() * self.width_px as f64
    }

    fn plane_len_y(&self, len: f64) -> f64 {
        len / self.extent.dy() * self.height_px as f64
    }

    pub fn draw_image(&mut self, tile: &Tile) -> Result<()> {
        let (left, top) = self.to_pixel(tile.bounds.x_min, tile.bounds.y_max)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&tile.bytes);
        self.document.append(
            Image::new()
                .set("x", fmt_px(left))
                .set("y", fmt_px(top))
                .set("width", fmt_px(self.plane_len_x(tile.bounds.dx())))
                .set("height", fmt_px(self.plane_len_y(tile.bounds.dy())))
                .set("preserveAspectRatio", "none")
                .set("href", format!("data:{};base64,{}", tile.mime, encoded)),
        );
        Ok(())
    }

    /// Draw one ring in plane coordinates. A single-coordinate ring is a
    /// point and always gets a marker.
    pub fn draw_ring(&mut self, ring: &[(f64, f64)], style: &StyleParams) -> Result<()> {
        let pixels = ring
            .iter()
            .map(|&(x, y)| self.to_pixel(x, y))
            .collect::<Result<Vec<_>>>()?;
        if pixels.is_empty() {
            return Ok(());
        }
        let mut group = Group::new();
        if pixels.len() > 1 && style.line_style != Some(LineStyle::None) {
            group.append(self.path_for(&pixels, style));
        }
        let marker = match (style.marker, pixels.len()) {
            (Some(m), _) => Some(m),
            (None, 1) => Some(Marker::Circle),
            (None, _) => None,
        };
        if let Some(marker) = marker {
            for &(px, py) in &pixels {
                group.append(self.marker_node(marker, px, py, style));
            }
        }
        self.document.append(group);
        Ok(())
    }

    fn path_for(&self, pixels: &[(f64, f64)], style: &StyleParams) -> SvgPath {
        let mut data = Data::new().move_to(pixels[0]);
        for &p in &pixels[1..] {
            data = data.line_to(p);
        }
        let closed = pixels.len() > 2 && pixels.first() == pixels.last();
        if closed {
            data = data.close();
        }
        let width = self.pt(style.width.unwrap_or(DEFAULT_WIDTH_PT));
        let mut path = SvgPath::new()
            .set("stroke", style.color.clone().unwrap_or_else(|| DEFAULT_COLOR.to_string()))
            .set("stroke-width", fmt_px(width))
            .set("stroke-linejoin", "round")
            .set("stroke-linecap", "round")
            .set("d", data);
        path = match style.fill.as_ref() {
            Some(fill) if closed => path.set("fill", fill.as_str()).set("fill-rule", "evenodd"),
            _ => path.set("fill", "none"),
        };
        if let Some(opacity) = style.opacity {
            path = path.set("opacity", opacity);
        }
        match style.line_style {
            Some(LineStyle::Dashed) => path.set("stroke-dasharray", format!("{},{}", fmt_px(3.7 * width), fmt_px(1.6 * width))),
            Some(LineStyle::Dotted) => path.set("stroke-dasharray", format!("{},{}", fmt_px(width), fmt_px(1.65 * width))),
            _ => path,
        }
    }

    fn marker_node(&self, marker: Marker, cx: f64, cy: f64, style: &StyleParams) -> Box<dyn Node> {
        let color = style.color.clone().unwrap_or_else(|| DEFAULT_COLOR.to_string());
        let r = self.pt(style.marker_size.unwrap_or(DEFAULT_MARKER_PT)) / 2.0;
        let outline = fmt_px(self.pt(0.5));
        match marker {
            Marker::Circle => Box::new(
                Circle::new()
                    .set("cx", fmt_px(cx))
                    .set("cy", fmt_px(cy))
                    .set("r", fmt_px(r))
                    .set("fill", color),
            ),
            Marker::Square => Box::new(
                Rect::new()
                    .set("x", fmt_px(cx - r))
                    .set("y", fmt_px(cy - r))
                    .set("width", fmt_px(2.0 * r))
                    .set("height", fmt_px(2.0 * r))
                    .set("fill", color),
            ),
            Marker::Triangle => {
                let data = Data::new()
                    .move_to((cx, cy - r))
                    .line_to((cx + r, cy + r))
                    .line_to((cx - r, cy + r))
                    .close();
                Box::new(SvgPath::new().set("d", data).set("fill", color))
            }
            Marker::Cross => {
                let data = Data::new()
                    .move_to((cx - r, cy - r))
                    .line_to((cx + r, cy + r))
                    .move_to((cx - r, cy + r))
                    .line_to((cx + r, cy - r));
                Box::new(
                    SvgPath::new()
                        .set("d", data)
                        .set("fill", "none")
                        .set("stroke", color)
                        .set("stroke-width", outline),
                )
            }
        }
    }

    /// Text at a plane position, shifted up by `offset_pt` points.
    pub fn draw_text(&mut self, x: f64, y: f64, text: &str, size_pt: f64, anchor: Anchor, offset_pt: f64) -> Result<()> {
        let (px, py) = self.to_pixel(x, y)?;
        let node = self.text_node(px, py - self.pt(offset_pt), text, size_pt, anchor);
        self.document.append(node.set("class", "annotation"));
        Ok(())
    }

    fn text_node(&self, px: f64, py: f64, text: &str, size_pt: f64, anchor: Anchor) -> Text {
        Text::new()
            .set("x", fmt_px(px))
            .set("y", fmt_px(py))
            .set("font-family", FONT_FAMILY)
            .set("font-size", fmt_px(self.pt(size_pt)))
            .set("text-anchor", anchor.as_str())
            .add(NodeText::new(escape(text)))
    }

    /// Rectangle with its lower-left corner at plane `(x, y)`, sized in
    /// plane units.
    pub fn draw_rectangle(&mut self, x: f64, y: f64, width: f64, height: f64, style: &BoxStyle) -> Result<()> {
        let (left, bottom) = self.to_pixel(x, y)?;
        let h = self.plane_len_y(height);
        self.document.append(
            Rect::new()
                .set("class", "scale-bar")
                .set("x", fmt_px(left))
                .set("y", fmt_px(bottom - h))
                .set("width", fmt_px(self.plane_len_x(width)))
                .set("height", fmt_px(h))
                .set("fill", style.fill.as_str())
                .set("stroke", style.stroke.as_str())
                .set("stroke-width", fmt_px(self.pt(style.stroke_width_pt))),
        );
        Ok(())
    }

    /// Opaque legend box in the lower-left corner.
    pub fn draw_legend(&mut self, entries: &[LegendEntry], text_size_pt: f64) {
        if entries.is_empty() {
            return;
        }
        let font = self.pt(text_size_pt);
        let title_font = self.pt(text_size_pt + 1.0);
        let pad = 1.5 * font;
        let row = 1.4 * font;
        let sample = 2.0 * font;
        let longest = entries.iter().map(|e| e.label.chars().count()).max().unwrap_or(0);
        let width = pad * 2.0 + sample + 0.8 * font + 0.6 * font * longest.max(6) as f64;
        let height = pad * 2.0 + title_font * 1.4 + row * entries.len() as f64;
        let left = 0.0;
        let top = self.height_px as f64 - height;

        let mut group = Group::new().set("class", "legend");
        group.append(
            Rect::new()
                .set("x", fmt_px(left))
                .set("y", fmt_px(top))
                .set("width", fmt_px(width))
                .set("height", fmt_px(height))
                .set("fill", "white")
                .set("stroke", "#cccccc")
                .set("stroke-width", fmt_px(self.pt(0.8))),
        );
        let title_y = top + pad + title_font;
        group.append(self.text_node(left + pad, title_y, " Legend", text_size_pt + 1.0, Anchor::Start));

        for (i, entry) in entries.iter().enumerate() {
            let cy = title_y + title_font * 0.4 + row * (i as f64 + 0.5);
            let x0 = left + pad;
            let x1 = x0 + sample;
            let line = entry.style.line_style != Some(LineStyle::None);
            if line {
                group.append(self.path_for(&[(x0, cy), (x1, cy)], &entry.style));
            }
            if let Some(marker) = entry.style.marker {
                group.append(self.marker_node(marker, (x0 + x1) / 2.0, cy, &entry.style));
            }
            group.append(self.text_node(x1 + 0.8 * font, cy + font * 0.35, &entry.label, text_size_pt, Anchor::Start));
        }
        self.document.append(group);
    }

    /// Frame around the whole figure.
    pub fn draw_border(&mut self, color: &str, width_pt: f64) {
        let w = self.pt(width_pt);
        self.document.append(
            Rect::new()
                .set("x", fmt_px(w / 2.0))
                .set("y", fmt_px(w / 2.0))
                .set("width", fmt_px(self.width_px as f64 - w))
                .set("height", fmt_px(self.height_px as f64 - w))
                .set("fill", "none")
                .set("stroke", color)
                .set("stroke-width", fmt_px(w)),
        );
    }

    pub fn to_svg_string(&self) -> String {
        self.document.to_string()
    }

    fn encode(&self, format: OutputFormat) -> Result<Vec<u8>> {
        let svg = self.to_svg_string();
        match format {
            OutputFormat::Svg => Ok(svg.into_bytes()),
            OutputFormat::Png => {
                let fonts = font_db();
                if fonts.is_empty() {
                    return Err(MapError::Render("no system fonts available for map text".to_string()));
                }
                let mut opt = usvg::Options::default();
                opt.fontdb = fonts;
                let tree = usvg::Tree::from_str(&svg, &opt).map_err(|e| MapError::Render(e.to_string()))?;
                let mut pixmap = tiny_skia::Pixmap::new(self.width_px, self.height_px)
                    .ok_or_else(|| MapError::Render("failed to allocate pixmap".to_string()))?;
                pixmap.fill(tiny_skia::Color::WHITE);
                resvg::render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());
                pixmap.encode_png().map_err(|e| MapError::Render(e.to_string()))
            }
        }
    }

    /// Write the image next to `path` first and move it into place only
    /// once it is complete.
    pub fn save(&self, path: &Path, format: OutputFormat) -> Result<()> {
        let bytes = self.encode(format)?;
        let mut partial = path.as_os_str().to_owned();
        partial.push(".part");
        let partial = Path::new(&partial);
        let written = fs::write(partial, &bytes).and_then(|_| fs::rename(partial, path));
        if let Err(err) = written {
            let _ = fs::remove_file(partial);
            return Err(err.into());
        }
        Ok(())
    }
}
