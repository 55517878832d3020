use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use image::RgbaImage;
use log::{info, warn};
use serde::Deserialize;
use simplelog::{Config, LevelFilter, WriteLogger};

use pagesurface::checker::CheckerRenderer;
use pagesurface::settings::{load_settings, parse_hex_color};
use pagesurface::surface::{
    IRect, Overlay, OverlayKind, OverlayStore, PageSurface, PatchDecision, PointF, SharedBuffer,
    Size, SizeF, SurfaceEvent, VecOverlayStore,
};

const RENDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Render a synthetic page at minimum zoom plus a high-res patch for one viewport
#[derive(Parser, Debug)]
#[command(name = "pagesurface", version, about)]
struct Args {
    /// Page width in page units
    #[arg(long, default_value_t = 1000.0)]
    page_width: f32,

    #[arg(long, default_value_t = 1500.0)]
    page_height: f32,

    /// Viewport (parent) width in pixels
    #[arg(long, default_value_t = 500)]
    parent_width: u32,

    #[arg(long, default_value_t = 800)]
    parent_height: u32,

    /// Zoom relative to the fitted page
    #[arg(short, long, default_value_t = 1.0)]
    zoom: f32,

    /// Page view offset from the viewport origin, in pixels
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pan_x: i32,

    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pan_y: i32,

    #[arg(short, long, default_value_t = 0)]
    page: usize,

    /// JSON overlay manifest
    #[arg(long)]
    overlays: Option<PathBuf>,

    /// Directory receiving full.png and patch.png
    #[arg(short, long, default_value = "out")]
    output: PathBuf,

    /// Settings file; defaults to the user config directory
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "pagesurface.log")]
    log_file: PathBuf,

    /// Log at debug level
    #[arg(short, long)]
    debug: bool,
}

#[derive(Debug, Deserialize)]
struct OverlayManifest {
    #[serde(default)]
    overlays: Vec<OverlayEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ManifestKind {
    Signature,
    UserImage,
    Generic,
}

impl From<ManifestKind> for OverlayKind {
    fn from(kind: ManifestKind) -> Self {
        match kind {
            ManifestKind::Signature => OverlayKind::Signature,
            ManifestKind::UserImage => OverlayKind::UserImage,
            ManifestKind::Generic => OverlayKind::Generic,
        }
    }
}

fn default_kind() -> ManifestKind {
    ManifestKind::Generic
}

fn default_removable() -> bool {
    true
}

/// One overlay entry; `x`/`y` is the centre in page units, origin bottom-left
#[derive(Debug, Deserialize)]
struct OverlayEntry {
    #[serde(default)]
    page: usize,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    #[serde(default = "default_kind")]
    kind: ManifestKind,
    /// Solid fill, RRGGBB or RRGGBBAA
    #[serde(default)]
    color: Option<String>,
    /// Image file; wins over `color`
    #[serde(default)]
    image: Option<PathBuf>,
    #[serde(default = "default_removable")]
    removable: bool,
    #[serde(default)]
    metadata: std::collections::BTreeMap<String, String>,
}

impl OverlayEntry {
    fn bitmap(&self, base: &Path) -> Result<SharedBuffer> {
        if let Some(image) = &self.image {
            let path = base.join(image);
            let decoded = image::open(&path)
                .with_context(|| format!("Failed to open overlay image {}", path.display()))?;
            return Ok(SharedBuffer::from_image(decoded.to_rgba8()));
        }

        let color = self.color.as_deref().unwrap_or("FF000080");
        let Some(rgba) = parse_hex_color(color) else {
            bail!("overlay colour {color:?} is not RRGGBB or RRGGBBAA");
        };
        // Bitmap resolution is irrelevant, the compositor rescales it
        let w = self.width.max(1.0).ceil() as u32;
        let h = self.height.max(1.0).ceil() as u32;
        Ok(SharedBuffer::from_image(RgbaImage::from_pixel(w, h, rgba)))
    }
}

fn load_overlays(path: &Path, store: &mut VecOverlayStore) -> Result<()> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read overlay manifest {}", path.display()))?;
    let manifest: OverlayManifest = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse overlay manifest {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    for entry in manifest.overlays {
        let mut overlay = Overlay::new(
            entry.page,
            PointF::new(entry.x, entry.y),
            entry.width,
            entry.height,
            OverlayKind::Generic,
            entry.bitmap(base)?,
        )
        .removable(entry.removable);
        overlay.metadata = entry.metadata;
        overlay.kind = entry.kind.into();
        let id = store.add(overlay);
        info!("Loaded overlay {id:?} on page {}", entry.page);
    }
    Ok(())
}

fn wait_for(
    surface: &mut PageSurface,
    store: &VecOverlayStore,
    what: &str,
    done: impl Fn(&SurfaceEvent) -> bool,
) -> Result<()> {
    let deadline = std::time::Instant::now() + RENDER_TIMEOUT;
    while std::time::Instant::now() < deadline {
        for event in surface.wait_and_pump(store, Duration::from_millis(50)) {
            if let SurfaceEvent::RenderFailed { tier, fault } = &event {
                bail!("{} render failed: {fault}", tier.name());
            }
            if done(&event) {
                return Ok(());
            }
        }
    }
    bail!("timed out waiting for {what}")
}

fn save(buffer: &SharedBuffer, path: &Path) -> Result<()> {
    let Some(image) = buffer.snapshot() else {
        bail!("buffer for {} was released", path.display());
    };
    image
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {}x{} to {}", image.width(), image.height(), path.display());
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    let settings = load_settings(args.config.as_deref())?;
    let page_size = SizeF::new(args.page_width, args.page_height);
    let renderer = CheckerRenderer::new(page_size).with_parallel_rows(settings.parallel_row_threshold);

    let mut store = VecOverlayStore::new();
    if let Some(path) = &args.overlays {
        load_overlays(path, &mut store)?;
    }

    let parent = Size::new(args.parent_width, args.parent_height);
    let mut surface = PageSurface::new(Arc::new(renderer), settings, parent);
    surface.set_page(args.page, page_size)?;
    wait_for(&mut surface, &store, "full page", |e| {
        matches!(e, SurfaceEvent::FullPagePresented { .. })
    })?;

    fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    if let Some(full) = surface.full_page() {
        save(full, &args.output.join("full.png"))?;
    }

    let Some(display) = surface.display_size() else {
        bail!("surface has no layout after presenting");
    };
    let zoom = args.zoom.max(1.0);
    if zoom != args.zoom {
        warn!("Zoom {} is below the fitted size, using 1.0", args.zoom);
    }
    let width = (display.width as f32 * zoom).round() as i32;
    let height = (display.height as f32 * zoom).round() as i32;
    surface.on_layout(IRect::new(
        args.pan_x,
        args.pan_y,
        args.pan_x + width,
        args.pan_y + height,
    ));

    match surface.update_hq(false)? {
        PatchDecision::Render { region, .. } => {
            info!("Rendering patch {:?} of {:?}", region.area, region.view_size);
            wait_for(&mut surface, &store, "patch", |e| {
                matches!(e, SurfaceEvent::PatchPresented { .. })
            })?;
            if let Some(tile) = surface.patch() {
                save(&tile.buffer, &args.output.join("patch.png"))?;
            }
        }
        other => info!("No patch rendered: {other:?}"),
    }

    surface.release();
    let stats = surface.buffer_stats();
    info!("Released surface, {} live buffers", stats.live_buffers);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    WriteLogger::init(
        level,
        Config::default(),
        File::create(&args.log_file)
            .with_context(|| format!("Failed to create log file {}", args.log_file.display()))?,
    )?;
    better_panic::install();

    info!("Starting pagesurface with {args:?}");
    run(&args).inspect_err(|e| log::error!("{e:#}"))
}
