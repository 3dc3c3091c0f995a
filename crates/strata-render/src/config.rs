// SPDX-License-Identifier: CEPL-1.0
use std::time::Duration;

use crate::RenderError;

pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Static renderer settings, fixed for the orchestrator's lifetime.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderConfig {
    /// Number of frame slots (`F`). Independent of the surface image count.
    pub frames_in_flight: usize,
    pub vsync: bool,
    pub clear_color: [f32; 4],
    /// Upper bound on a frame-slot fence wait; `None` waits forever.
    pub fence_timeout: Option<Duration>,
    /// Upper bound on image acquisition; `None` waits forever.
    pub acquire_timeout: Option<Duration>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            vsync: true,
            clear_color: [0.02, 0.02, 0.04, 1.0],
            fence_timeout: Some(Duration::from_secs(5)),
            acquire_timeout: None,
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<(), RenderError> {
        if self.frames_in_flight == 0 {
            return Err(RenderError::InvalidConfig(
                "frames_in_flight must be at least 1".into(),
            ));
        }
        if self.fence_timeout == Some(Duration::ZERO) {
            return Err(RenderError::InvalidConfig(
                "fence_timeout of zero would fail every frame; use None for no limit".into(),
            ));
        }
        Ok(())
    }
}
