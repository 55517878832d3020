use std::sync::Arc;
use std::time::Duration;

use image::{Rgba, RgbaImage};
use pagesurface::checker::CheckerRenderer;
use pagesurface::settings::Settings;
use pagesurface::surface::{
    IRect, Overlay, OverlayKind, OverlayStore, PageSurface, PatchDecision, PatchMode, Phase,
    PointF, RenderFault, SharedBuffer, Size, SizeF, SurfaceError, SurfaceEvent, Tier,
    VecOverlayStore,
};
use pagesurface::test_utils::{RecordingRenderer, pump_idle, pump_until};

const TIMEOUT: Duration = Duration::from_secs(10);
const PAGE: SizeF = SizeF::new(1000.0, 1500.0);
const PARENT: Size = Size::new(500, 800);
const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

fn presented(e: &SurfaceEvent) -> bool {
    matches!(e, SurfaceEvent::FullPagePresented { .. })
}

fn patch_presented(e: &SurfaceEvent) -> bool {
    matches!(e, SurfaceEvent::PatchPresented { .. })
}

fn is_red(px: Rgba<u8>) -> bool {
    px[0] > 200 && px[1] < 60 && px[2] < 60
}

fn ready_surface(renderer: CheckerRenderer, store: &VecOverlayStore) -> PageSurface {
    let mut surface = PageSurface::new(Arc::new(renderer), Settings::default(), PARENT);
    surface.set_page(0, PAGE).unwrap();
    pump_until(&mut surface, store, TIMEOUT, presented);
    surface
}

#[test]
fn full_page_then_patch_then_back_to_minimum_zoom() {
    let store = VecOverlayStore::new();
    let checker = CheckerRenderer::new(PAGE);
    let mut surface = ready_surface(checker.clone(), &store);

    assert_eq!(surface.display_size(), Some(Size::new(500, 750)));
    assert_eq!(surface.phase(), Phase::Ready);
    let full = surface.full_page().unwrap().snapshot().unwrap();
    assert_eq!(full.dimensions(), (500, 750));
    assert_eq!(*full.get_pixel(10, 10), checker.pixel(0, 10, 10, 500, 750));

    // Zoom 2x, page view anchored at the viewport origin
    surface.on_layout(IRect::new(0, 0, 1000, 1500));
    let decision = surface.update_hq(false).unwrap();
    match decision {
        PatchDecision::Render { region, mode } => {
            assert_eq!(region.view_size, Size::new(1000, 1500));
            assert_eq!(region.area, IRect::new(0, 0, 500, 800));
            assert_eq!(mode, PatchMode::Redraw);
        }
        other => panic!("expected a patch render, got {other:?}"),
    }

    let events = pump_until(&mut surface, &store, TIMEOUT, patch_presented);
    assert!(events.contains(&SurfaceEvent::PatchPresented {
        page: 0,
        area: IRect::new(0, 0, 500, 800),
    }));
    let tile = surface.patch().unwrap();
    let pixels = tile.buffer.snapshot().unwrap();
    assert_eq!(pixels.dimensions(), (500, 800));
    for (x, y) in [(0, 0), (123, 456), (499, 799)] {
        assert_eq!(*pixels.get_pixel(x, y), checker.pixel(0, x as i32, y as i32, 1000, 1500));
    }

    // Same layout again is a no-op
    assert_eq!(surface.update_hq(false).unwrap(), PatchDecision::Unchanged);

    // Back to the fitted size: the tile is dropped
    surface.on_layout(IRect::new(0, 25, 500, 775));
    assert_eq!(surface.update_hq(false).unwrap(), PatchDecision::Discard);
    assert!(surface.patch().is_none());
    let events = surface.pump(&store);
    assert!(events.contains(&SurfaceEvent::PatchDiscarded));
}

#[test]
fn page_view_outside_viewport_aborts_patch() {
    let store = VecOverlayStore::new();
    let mut surface = ready_surface(CheckerRenderer::new(PAGE), &store);

    surface.on_layout(IRect::new(600, 0, 1600, 1500));
    assert_eq!(surface.update_hq(false).unwrap(), PatchDecision::Abort);
    assert!(surface.patch().is_none());
}

#[test]
fn overlays_are_drawn_on_both_tiers_at_matching_positions() {
    let mut store = VecOverlayStore::new();
    let red = || SharedBuffer::from_image(RgbaImage::from_pixel(40, 40, RED));
    // Bottom-right: outside the zoomed patch
    store.add(Overlay::new(
        0,
        PointF::new(900.0, 100.0),
        40.0,
        40.0,
        OverlayKind::UserImage,
        red(),
    ));
    // Top-left: inside it
    store.add(Overlay::new(
        0,
        PointF::new(100.0, 1400.0),
        40.0,
        40.0,
        OverlayKind::Signature,
        red(),
    ));
    // Another page entirely
    store.add(Overlay::new(
        3,
        PointF::new(500.0, 750.0),
        400.0,
        400.0,
        OverlayKind::Generic,
        red(),
    ));

    let checker = CheckerRenderer::new(PAGE);
    let mut surface = ready_surface(checker.clone(), &store);
    let full = surface.full_page().unwrap().snapshot().unwrap();
    assert!(is_red(*full.get_pixel(450, 700)));
    assert!(is_red(*full.get_pixel(50, 50)));
    assert_eq!(*full.get_pixel(250, 375), checker.pixel(0, 250, 375, 500, 750));

    surface.on_layout(IRect::new(0, 0, 1000, 1500));
    surface.update_hq(false).unwrap();
    pump_until(&mut surface, &store, TIMEOUT, patch_presented);

    let patch = surface.patch().unwrap().buffer.snapshot().unwrap();
    assert!(is_red(*patch.get_pixel(100, 100)));
    assert_eq!(*patch.get_pixel(300, 600), checker.pixel(0, 300, 600, 1000, 1500));
}

#[test]
fn incremental_update_keeps_presentation_and_marks_calls() {
    let store = VecOverlayStore::new();
    let renderer = Arc::new(RecordingRenderer::new(PAGE, Duration::ZERO));
    let mut surface = PageSurface::new(renderer.clone(), Settings::default(), PARENT);
    surface.set_page(0, PAGE).unwrap();
    pump_until(&mut surface, &store, TIMEOUT, presented);

    surface.on_layout(IRect::new(-100, -100, 900, 1400));
    surface.update_hq(false).unwrap();
    pump_until(&mut surface, &store, TIMEOUT, patch_presented);

    surface.update().unwrap();
    assert!(surface.full_page().is_some());
    pump_until(&mut surface, &store, TIMEOUT, presented);
    pump_idle(&mut surface, &store, TIMEOUT);

    let calls = renderer.calls();
    assert!(!calls[0].incremental);
    let updates: Vec<_> = calls.iter().filter(|c| c.incremental).collect();
    assert_eq!(updates.len(), 2, "one full-page and one patch update: {calls:?}");
    assert!(updates.iter().any(|c| c.region.area == IRect::new(100, 100, 600, 900)));
}

#[test]
fn failed_update_keeps_last_presentation() {
    let store = VecOverlayStore::new();
    let renderer = Arc::new(RecordingRenderer::new(PAGE, Duration::ZERO));
    let mut surface = PageSurface::new(renderer.clone(), Settings::default(), PARENT);
    surface.set_page(0, PAGE).unwrap();
    pump_until(&mut surface, &store, TIMEOUT, presented);
    let before = surface.full_page().unwrap().snapshot().unwrap();

    renderer.fail_next(RenderFault::OutOfMemory { bytes: 1 << 30 });
    surface.update().unwrap();
    let events = pump_until(&mut surface, &store, TIMEOUT, |e| {
        matches!(e, SurfaceEvent::RenderFailed { .. })
    });

    assert!(events.contains(&SurfaceEvent::RenderFailed {
        tier: Tier::FullPage,
        fault: RenderFault::OutOfMemory { bytes: 1 << 30 },
    }));
    assert!(!events.iter().any(presented));
    assert_eq!(surface.phase(), Phase::Ready);
    assert_eq!(surface.full_page().unwrap().snapshot().unwrap(), before);
}

#[test]
fn oversized_patch_is_abandoned_without_losing_the_page() {
    let store = VecOverlayStore::new();
    // Room for the 500x750 page but not the 500x800 patch
    let settings = Settings {
        max_buffer_bytes: 500 * 780 * 4,
        ..Settings::default()
    };
    let mut surface = PageSurface::new(Arc::new(CheckerRenderer::new(PAGE)), settings, PARENT);
    surface.set_page(0, PAGE).unwrap();
    pump_until(&mut surface, &store, TIMEOUT, presented);

    surface.on_layout(IRect::new(0, 0, 1000, 1500));
    surface.update_hq(false).unwrap();
    let events = surface.pump(&store);
    assert!(events.iter().any(|e| matches!(
        e,
        SurfaceEvent::RenderFailed {
            tier: Tier::Patch,
            fault: RenderFault::OutOfMemory { .. },
        }
    )));
    assert!(surface.patch().is_none());
    assert!(surface.full_page().is_some());
    assert!(surface.buffer_stats().failures >= 1);
}

#[test]
fn release_is_idempotent_and_frees_everything() {
    let store = VecOverlayStore::new();
    let mut surface = ready_surface(CheckerRenderer::new(PAGE), &store);
    surface.on_layout(IRect::new(0, 0, 1000, 1500));
    surface.update_hq(false).unwrap();
    pump_until(&mut surface, &store, TIMEOUT, patch_presented);
    assert!(surface.buffer_stats().live_buffers >= 2);

    let full = surface.full_page().unwrap().clone();
    surface.release();
    surface.release();

    assert_eq!(surface.phase(), Phase::Disposed);
    assert_eq!(surface.buffer_stats().live_buffers, 0);
    assert_eq!(surface.buffer_stats().live_bytes, 0);
    assert!(full.is_released());
    assert!(surface.full_page().is_none());
    assert!(surface.patch().is_none());
    assert!(!surface.has_pending_work());
    assert_eq!(surface.set_page(1, PAGE), Err(SurfaceError::Disposed));
    assert_eq!(surface.update_hq(true), Err(SurfaceError::Disposed));
    assert!(surface.pump(&store).is_empty());
}

#[test]
fn parent_resize_relayouts_the_page() {
    let store = VecOverlayStore::new();
    let mut surface = ready_surface(CheckerRenderer::new(PAGE), &store);

    surface.set_parent_size(Size::new(1000, 3000)).unwrap();
    pump_until(&mut surface, &store, TIMEOUT, presented);
    assert_eq!(surface.display_size(), Some(Size::new(1000, 1500)));
    assert_eq!(surface.full_page().unwrap().size(), Size::new(1000, 1500));
}
