// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
pub mod backend;
pub mod config;
pub mod cursor;
pub mod error;
pub mod orchestrator;
pub mod uniforms;

#[cfg(test)]
mod mock;

pub use backend::{AcquireOutcome, FenceStatus, GpuBackend, PresentOutcome, RetiredSlot};
pub use config::{RenderConfig, DEFAULT_FRAMES_IN_FLIGHT};
pub use cursor::FrameCursor;
pub use error::RenderError;
pub use orchestrator::{DropReason, FrameOrchestrator, FrameOutcome, FrameStats, RenderState};
pub use uniforms::FrameUniforms;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Minimized windows report a zero-area client rect.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What a freshly built surface looks like.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceInfo {
    pub extent: RenderSize,
    /// `K`, chosen by the presentation engine; may change across rebuilds.
    pub image_count: usize,
}
