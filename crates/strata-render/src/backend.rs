// SPDX-License-Identifier: CEPL-1.0
//! The seam between the frame orchestrator and a concrete graphics API.
//!
//! A backend owns every GPU object. The orchestrator owns the backend and
//! decides *when* each object is built, used and released; the backend only
//! knows *how*. Builds and releases come in pairs per resource group and
//! every `release_*` must be idempotent.
use std::time::Duration;

use anyhow::Result;

use crate::uniforms::FrameUniforms;
use crate::{RenderSize, SurfaceInfo};

/// Result of blocking on a frame slot's completion fence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    TimedOut,
}

/// Result of asking the presentation engine for an image.
#[derive(Debug)]
pub enum AcquireOutcome {
    /// Index is usable now; contents are ready once the slot's
    /// image-available semaphore fires on the GPU.
    Acquired(u32),
    /// Surface no longer matches the window; rebuild before retrying.
    OutOfDate,
    /// Anything else. The frame is dropped, rendering continues.
    Failed(anyhow::Error),
}

/// Result of queueing an image for presentation.
#[derive(Debug)]
pub enum PresentOutcome {
    Presented,
    /// Displayed, but the surface should be rebuilt before the next frame.
    Suboptimal,
    OutOfDate,
    Failed(anyhow::Error),
}

/// Proof that a frame slot's previous submission has retired and its fence
/// has been reset.
///
/// Only the orchestrator can mint one, and recording or submitting requires
/// it, so a command buffer can never be reset while the GPU still reads it.
/// Submitting consumes the token.
#[derive(Debug)]
pub struct RetiredSlot {
    index: usize,
}

impl RetiredSlot {
    pub(crate) fn new(index: usize) -> Self {
        Self { index }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }
}

pub trait GpuBackend {
    // --- presentation surface -------------------------------------------

    /// (Re)build the swapchain, its images and views at `size`.
    ///
    /// `Ok(None)` means the window surface currently has no area (it may
    /// report 0x0 before the window's own resize arrives). Nothing is
    /// created; build again once the window has a size.
    fn build_surface(&mut self, size: RenderSize, vsync: bool) -> Result<Option<SurfaceInfo>>;
    fn release_surface(&mut self);

    // --- attachments and targets ----------------------------------------

    fn build_depth(&mut self, extent: RenderSize) -> Result<()>;
    fn release_depth(&mut self);

    /// Objects referencing surface images and the depth view
    /// (render pass, framebuffers, pipeline).
    fn build_targets(&mut self) -> Result<()>;
    fn release_targets(&mut self);

    /// One render-finished semaphore per surface image.
    fn build_present_signals(&mut self, count: usize) -> Result<()>;
    fn release_present_signals(&mut self);

    // --- frame slots ----------------------------------------------------

    /// Create `count` slots with signaled fences.
    fn build_frame_slots(&mut self, count: usize) -> Result<()>;
    /// Replace every slot's fence (signaled) and image-available semaphore.
    /// Only called with the device idle.
    fn rebuild_slot_sync(&mut self) -> Result<()>;
    fn release_frame_slots(&mut self);

    // --- per frame ------------------------------------------------------

    /// Block until the slot's last submission retires. `None` waits forever.
    fn wait_for_slot(&mut self, slot: usize, timeout: Option<Duration>) -> Result<FenceStatus>;
    fn acquire_image(&mut self, slot: usize, timeout: Option<Duration>) -> AcquireOutcome;
    fn reset_slot_fence(&mut self, slot: usize) -> Result<()>;
    fn write_uniforms(&mut self, slot: &RetiredSlot, uniforms: &FrameUniforms) -> Result<()>;
    fn record(&mut self, slot: &RetiredSlot, image: u32, clear: [f32; 4]) -> Result<()>;
    /// Wait on the slot's image-available semaphore at color output, signal
    /// the image's present signal and the slot's fence.
    fn submit(&mut self, slot: RetiredSlot, image: u32) -> Result<()>;
    /// Present `image` once its present signal fires.
    fn present(&mut self, image: u32) -> PresentOutcome;

    // --- device ---------------------------------------------------------

    fn wait_idle(&mut self) -> Result<()>;
    /// Last call on a backend. Releases anything still alive, then the device.
    fn release_device(&mut self);
}
