// Export modules for use in tests
pub mod checker;
pub mod settings;
pub mod surface;

pub mod test_utils;

// Re-export the surface entry points
pub use surface::{PageRenderer, PageSurface, SurfaceEvent};
