//! Pixel buffer lifecycle
//!
//! A [`SharedBuffer`] is a reference-counted RGBA image whose pixels can be
//! released explicitly. Release takes the pixels out of the slot, so every
//! later access through [`SharedBuffer::write`] or [`SharedBuffer::read`]
//! observes the release instead of touching freed memory.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::{Rgba, RgbaImage};
use log::{debug, warn};

use super::geometry::Size;
use super::request::SurfaceError;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an allocated buffer, stable across clones
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

struct BufferSlot {
    id: BufferId,
    size: Size,
    pixels: Mutex<Option<RgbaImage>>,
    stats: Option<Arc<LifecycleStats>>,
}

impl BufferSlot {
    fn lock(&self) -> MutexGuard<'_, Option<RgbaImage>> {
        self.pixels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for BufferSlot {
    fn drop(&mut self) {
        let pixels = self
            .pixels
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let (Some(_), Some(stats)) = (pixels, &self.stats) {
            stats.record_release(self.size);
        }
    }
}

/// Reference-counted RGBA pixel buffer with explicit release
#[derive(Clone)]
pub struct SharedBuffer {
    slot: Arc<BufferSlot>,
}

impl std::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("id", &self.slot.id)
            .field("size", &self.slot.size)
            .field("released", &self.is_released())
            .finish()
    }
}

impl SharedBuffer {
    /// Wrap an existing image; not tracked by any lifecycle
    #[must_use]
    pub fn from_image(image: RgbaImage) -> Self {
        let size = Size::new(image.width(), image.height());
        Self::from_parts(image, size, None)
    }

    fn from_parts(image: RgbaImage, size: Size, stats: Option<Arc<LifecycleStats>>) -> Self {
        Self {
            slot: Arc::new(BufferSlot {
                id: BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed)),
                size,
                pixels: Mutex::new(Some(image)),
                stats,
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> BufferId {
        self.slot.id
    }

    #[must_use]
    pub fn size(&self) -> Size {
        self.slot.size
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.slot.lock().is_none()
    }

    /// Two handles refer to the same allocation
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// Mutate the pixels; `None` when the buffer was released
    pub fn write<R>(&self, f: impl FnOnce(&mut RgbaImage) -> R) -> Option<R> {
        let mut guard = self.slot.lock();
        match guard.as_mut() {
            Some(image) => Some(f(image)),
            None => {
                warn!("Skipped write to released buffer {:?}", self.slot.id);
                None
            }
        }
    }

    /// Read the pixels; `None` when the buffer was released
    pub fn read<R>(&self, f: impl FnOnce(&RgbaImage) -> R) -> Option<R> {
        let guard = self.slot.lock();
        guard.as_ref().map(f)
    }

    /// Copy of the current pixels
    #[must_use]
    pub fn snapshot(&self) -> Option<RgbaImage> {
        self.read(RgbaImage::clone)
    }

    /// Drop the pixels. Idempotent; clones observe the release.
    pub fn release(&self) {
        let taken = self.slot.lock().take();
        if taken.is_some() {
            debug!("Released buffer {:?} {:?}", self.slot.id, self.slot.size);
            if let Some(stats) = &self.slot.stats {
                stats.record_release(self.slot.size);
            }
        }
    }
}

/// Counters of live buffers across one lifecycle
#[derive(Debug, Default)]
pub struct LifecycleStats {
    live_buffers: AtomicUsize,
    live_bytes: AtomicUsize,
    allocations: AtomicUsize,
    failures: AtomicUsize,
}

impl LifecycleStats {
    fn record_alloc(&self, size: Size) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.live_buffers.fetch_add(1, Ordering::Relaxed);
        self.live_bytes
            .fetch_add(size.rgba_bytes().unwrap_or(0), Ordering::Relaxed);
    }

    fn record_release(&self, size: Size) {
        self.live_buffers.fetch_sub(1, Ordering::Relaxed);
        self.live_bytes
            .fetch_sub(size.rgba_bytes().unwrap_or(0), Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of [`LifecycleStats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub live_buffers: usize,
    pub live_bytes: usize,
    pub allocations: usize,
    pub failures: usize,
}

/// Allocates buffers under a byte budget and tracks which are live
#[derive(Clone, Debug)]
pub struct BufferLifecycle {
    max_buffer_bytes: usize,
    background: Rgba<u8>,
    stats: Arc<LifecycleStats>,
}

impl BufferLifecycle {
    #[must_use]
    pub fn new(max_buffer_bytes: usize, background: Rgba<u8>) -> Self {
        Self {
            max_buffer_bytes,
            background,
            stats: Arc::new(LifecycleStats::default()),
        }
    }

    /// Allocate a buffer filled with the background colour
    pub fn allocate(&self, size: Size) -> Result<SharedBuffer, SurfaceError> {
        if size.is_empty() {
            return Err(SurfaceError::EmptyBuffer);
        }
        let fail = || {
            self.stats.record_failure();
            warn!(
                "Buffer allocation of {}x{} failed",
                size.width, size.height
            );
            SurfaceError::Allocation {
                width: size.width,
                height: size.height,
            }
        };

        let Some(bytes) = size.rgba_bytes() else {
            return Err(fail());
        };
        if bytes > self.max_buffer_bytes {
            return Err(fail());
        }

        let mut data: Vec<u8> = Vec::new();
        if data.try_reserve_exact(bytes).is_err() {
            return Err(fail());
        }
        for _ in 0..(bytes / 4) {
            data.extend_from_slice(&self.background.0);
        }

        let Some(image) = RgbaImage::from_raw(size.width, size.height, data) else {
            return Err(fail());
        };

        self.stats.record_alloc(size);
        debug!("Allocated {}x{} buffer", size.width, size.height);
        Ok(SharedBuffer::from_parts(
            image,
            size,
            Some(Arc::clone(&self.stats)),
        ))
    }

    /// Reuse `existing` when it matches `size`, otherwise release it and allocate
    pub fn reuse_or_allocate(
        &self,
        existing: Option<SharedBuffer>,
        size: Size,
    ) -> Result<SharedBuffer, SurfaceError> {
        match existing {
            Some(buffer) if buffer.size() == size && !buffer.is_released() => {
                self.clear(&buffer);
                Ok(buffer)
            }
            Some(buffer) => {
                buffer.release();
                self.allocate(size)
            }
            None => self.allocate(size),
        }
    }

    /// Fill with the background colour
    pub fn clear(&self, buffer: &SharedBuffer) {
        let background = self.background;
        buffer.write(|image| {
            for px in image.pixels_mut() {
                *px = background;
            }
        });
    }

    #[must_use]
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            live_buffers: self.stats.live_buffers.load(Ordering::Relaxed),
            live_bytes: self.stats.live_bytes.load(Ordering::Relaxed),
            allocations: self.stats.allocations.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
        }
    }
}
