// SPDX-License-Identifier: CEPL-1.0
use std::time::Duration;

use thiserror::Error;

/// Errors that stop the renderer.
///
/// Out-of-date and suboptimal surfaces never show up here; the orchestrator
/// absorbs them and reports a dropped frame instead.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid render config: {0}")]
    InvalidConfig(String),

    /// Initialization failed. Kept apart from steady-state errors so callers
    /// can report "could not start" differently from "stopped".
    #[error("startup failed while creating {stage}: {cause:#}")]
    Startup {
        stage: &'static str,
        cause: anyhow::Error,
    },

    #[error("frame slot {slot} did not retire within {timeout:?}")]
    FenceTimeout { slot: usize, timeout: Duration },

    #[error("{op} failed: {cause:#}")]
    Device {
        op: &'static str,
        cause: anyhow::Error,
    },

    #[error("queue submission failed: {0:#}")]
    Submit(anyhow::Error),

    #[error("presentation failed: {0:#}")]
    Present(anyhow::Error),

    #[error("resize recovery to {width}x{height} failed: {cause:#}")]
    Recovery {
        width: u32,
        height: u32,
        cause: anyhow::Error,
    },
}

impl RenderError {
    pub fn is_startup(&self) -> bool {
        matches!(self, RenderError::Startup { .. } | RenderError::InvalidConfig(_))
    }

    pub(crate) fn device(op: &'static str) -> impl FnOnce(anyhow::Error) -> RenderError {
        move |cause| RenderError::Device { op, cause }
    }

    pub(crate) fn startup(stage: &'static str) -> impl FnOnce(anyhow::Error) -> RenderError {
        move |cause| RenderError::Startup { stage, cause }
    }
}
