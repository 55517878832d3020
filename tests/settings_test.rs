use std::fs;
use std::sync::Arc;
use std::time::Duration;

use image::Rgba;
use pagesurface::checker::CheckerRenderer;
use pagesurface::settings::{OverlayFilter, load_settings};
use pagesurface::surface::{
    PageSurface, Phase, RenderFault, Size, SizeF, SurfaceEvent, Tier, VecOverlayStore,
};
use pagesurface::test_utils::pump_idle;
use tempfile::TempDir;

#[test]
fn settings_file_drives_the_surface() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(
        &path,
        "version: 2\n\
         background: \"#202020\"\n\
         max_buffer_bytes: 4096\n\
         busy_delay_ms: 0\n\
         overlay_filter: lanczos3\n",
    )
    .unwrap();

    let settings = load_settings(Some(&path)).unwrap();
    assert_eq!(settings.background_rgba(), Rgba([32, 32, 32, 255]));
    assert_eq!(settings.overlay_filter, OverlayFilter::Lanczos3);
    assert_eq!(settings.busy_delay(), Duration::ZERO);

    // 4096 bytes cannot hold a 500x750 page
    let store = VecOverlayStore::new();
    let page = SizeF::new(1000.0, 1500.0);
    let mut surface = PageSurface::new(
        Arc::new(CheckerRenderer::new(page)),
        settings,
        Size::new(500, 800),
    );
    surface.set_page(0, page).unwrap();
    let events = pump_idle(&mut surface, &store, Duration::from_secs(5));

    assert!(events.contains(&SurfaceEvent::RenderFailed {
        tier: Tier::FullPage,
        fault: RenderFault::OutOfMemory {
            bytes: 500 * 750 * 4
        },
    }));
    assert!(surface.full_page().is_none());
    assert_eq!(surface.phase(), Phase::Ready);
    assert_eq!(surface.buffer_stats().live_buffers, 0);
}

#[test]
fn busy_indicator_waits_for_the_delay() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(&path, "busy_delay_ms: 60000\n").unwrap();
    let settings = load_settings(Some(&path)).unwrap();

    let page = SizeF::new(100.0, 100.0);
    let mut surface = PageSurface::new(
        Arc::new(CheckerRenderer::new(page)),
        settings,
        Size::new(100, 100),
    );
    surface.blank(4).unwrap();
    assert_eq!(surface.phase(), Phase::Blank);
    let now = std::time::Instant::now();
    assert!(!surface.busy_indicator_visible(now));
    assert!(surface.busy_indicator_visible(now + Duration::from_secs(61)));
}
