// SPDX-License-Identifier: CEPL-1.0
//! Drives a [`GpuBackend`] through startup, per-frame rendering, surface
//! recovery and teardown.
//!
//! Per frame the order is fixed: wait on the current slot's fence, acquire a
//! surface image, reset the fence, write uniforms, record, submit, present,
//! advance the cursor. The fence is only reset once an image is in hand, so a
//! dropped frame leaves the slot signaled and the next wait returns at once.
use std::time::Duration;

use anyhow::{anyhow, Context};
use strata_math::Camera;
use tracing::{debug, error, info, warn};

use crate::backend::{AcquireOutcome, FenceStatus, GpuBackend, PresentOutcome, RetiredSlot};
use crate::{FrameCursor, FrameUniforms, RenderConfig, RenderError, RenderSize, SurfaceInfo};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderState {
    Uninitialized,
    Ready,
    /// Inside `render_frame`.
    Rendering,
    /// Surface-dependent resources are being rebuilt.
    Resizing,
    /// Zero-area or minimized window; frames are skipped without GPU work.
    /// If the surface itself reported no area, the surface group is already
    /// released and the next non-zero size rebuilds it.
    Suspended,
    /// A fatal error was returned. Only `finalize` does anything now.
    Faulted,
    Finalized,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Surface went stale; it has been rebuilt.
    OutOfDate,
    /// Acquisition failed for another reason. The slot is left untouched.
    AcquireFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { slot: usize, image: u32 },
    Dropped(DropReason),
    Suspended,
    /// Not initialized, faulted or finalized.
    Skipped,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub presented: u64,
    pub dropped: u64,
    pub recreations: u64,
    /// Submissions per frame slot.
    pub submissions: Vec<u64>,
}

pub struct FrameOrchestrator<B: GpuBackend> {
    backend: B,
    config: RenderConfig,
    state: RenderState,
    cursor: FrameCursor,
    surface: Option<SurfaceInfo>,
    /// Size the live surface was requested at. The surface may report a
    /// different extent.
    built_for: Option<RenderSize>,
    /// Most recent client size reported by the window.
    last_size: RenderSize,
    camera: Camera,
    elapsed: f32,
    stats: FrameStats,
}

impl<B: GpuBackend> FrameOrchestrator<B> {
    pub fn new(backend: B, config: RenderConfig) -> Result<Self, RenderError> {
        config.validate()?;
        Ok(Self {
            backend,
            state: RenderState::Uninitialized,
            cursor: FrameCursor::new(config.frames_in_flight),
            surface: None,
            built_for: None,
            last_size: RenderSize::default(),
            camera: Camera::default(),
            elapsed: 0.0,
            stats: FrameStats {
                submissions: vec![0; config.frames_in_flight],
                ..Default::default()
            },
            config,
        })
    }

    /// Build the surface, depth attachment, targets, present signals and
    /// frame slots, in that order.
    ///
    /// Every failure here is a [`RenderError::Startup`].
    pub fn init(&mut self, size: RenderSize) -> Result<(), RenderError> {
        if self.state != RenderState::Uninitialized {
            warn!(state = ?self.state, "init called more than once; ignoring");
            return Ok(());
        }
        self.last_size = size;
        match self.build_all(size) {
            Ok(surface) => {
                self.surface = Some(surface);
                self.built_for = Some(size);
                self.state = RenderState::Ready;
                info!(
                    width = surface.extent.width,
                    height = surface.extent.height,
                    images = surface.image_count,
                    frames_in_flight = self.cursor.count(),
                    "renderer ready"
                );
                Ok(())
            }
            Err(e) => {
                error!("renderer startup failed: {e}");
                self.state = RenderState::Faulted;
                Err(e)
            }
        }
    }

    fn build_all(&mut self, size: RenderSize) -> Result<SurfaceInfo, RenderError> {
        if size.is_empty() {
            return Err(RenderError::Startup {
                stage: "surface",
                cause: anyhow!("window has no area ({}x{})", size.width, size.height),
            });
        }
        let surface = self
            .backend
            .build_surface(size, self.config.vsync)
            .map_err(RenderError::startup("surface"))?
            .ok_or_else(|| RenderError::Startup {
                stage: "surface",
                cause: anyhow!("window surface reports no area"),
            })?;
        self.backend
            .build_depth(surface.extent)
            .map_err(RenderError::startup("depth attachment"))?;
        self.backend
            .build_targets()
            .map_err(RenderError::startup("render targets"))?;
        self.backend
            .build_present_signals(surface.image_count)
            .map_err(RenderError::startup("present signals"))?;
        self.backend
            .build_frame_slots(self.config.frames_in_flight)
            .map_err(RenderError::startup("frame slots"))?;
        Ok(surface)
    }

    /// Render one frame. `dt` is seconds since the previous call and only
    /// advances the animation.
    ///
    /// Out-of-date surfaces and failed acquisitions come back as
    /// [`FrameOutcome::Dropped`]; errors are fatal and leave the orchestrator
    /// [`RenderState::Faulted`].
    pub fn render_frame(&mut self, dt: f32) -> Result<FrameOutcome, RenderError> {
        match self.state {
            RenderState::Ready => {}
            RenderState::Suspended => return Ok(FrameOutcome::Suspended),
            _ => return Ok(FrameOutcome::Skipped),
        }
        if dt.is_finite() && dt > 0.0 {
            self.elapsed += dt;
        }

        self.state = RenderState::Rendering;
        let result = self.draw();
        match &result {
            Ok(_) if self.state == RenderState::Rendering => self.state = RenderState::Ready,
            Ok(_) => {}
            Err(e) => {
                error!("rendering stopped: {e}");
                self.state = RenderState::Faulted;
            }
        }
        result
    }

    fn draw(&mut self) -> Result<FrameOutcome, RenderError> {
        let slot = self.cursor.current();

        let status = self
            .backend
            .wait_for_slot(slot, self.config.fence_timeout)
            .map_err(RenderError::device("frame fence wait"))?;
        if status == FenceStatus::TimedOut {
            return Err(RenderError::FenceTimeout {
                slot,
                timeout: self.config.fence_timeout.unwrap_or(Duration::MAX),
            });
        }

        let image = match self.backend.acquire_image(slot, self.config.acquire_timeout) {
            AcquireOutcome::Acquired(image) => image,
            AcquireOutcome::OutOfDate => {
                debug!(slot, "surface out of date on acquire");
                self.stats.dropped += 1;
                self.recreate_surface(self.last_size)?;
                return Ok(FrameOutcome::Dropped(DropReason::OutOfDate));
            }
            AcquireOutcome::Failed(cause) => {
                warn!(slot, "image acquisition failed, dropping frame: {cause:#}");
                self.stats.dropped += 1;
                return Ok(FrameOutcome::Dropped(DropReason::AcquireFailed));
            }
        };

        self.backend
            .reset_slot_fence(slot)
            .map_err(RenderError::device("frame fence reset"))?;
        let retired = RetiredSlot::new(slot);

        let extent = self.surface.map_or(self.last_size, |s| s.extent);
        let uniforms = FrameUniforms::spinning(&self.camera, self.elapsed, extent);
        self.backend
            .write_uniforms(&retired, &uniforms)
            .map_err(RenderError::device("uniform upload"))?;
        self.backend
            .record(&retired, image, self.config.clear_color)
            .map_err(RenderError::device("command recording"))?;
        self.backend
            .submit(retired, image)
            .map_err(RenderError::Submit)?;
        self.stats.submissions[slot] += 1;

        let outcome = match self.backend.present(image) {
            PresentOutcome::Presented => {
                self.stats.presented += 1;
                FrameOutcome::Presented { slot, image }
            }
            PresentOutcome::Suboptimal => {
                debug!(slot, image, "surface suboptimal on present");
                self.stats.presented += 1;
                self.cursor.advance();
                self.recreate_surface(self.last_size)?;
                return Ok(FrameOutcome::Presented { slot, image });
            }
            PresentOutcome::OutOfDate => {
                debug!(slot, image, "surface out of date on present");
                self.stats.dropped += 1;
                self.cursor.advance();
                self.recreate_surface(self.last_size)?;
                return Ok(FrameOutcome::Dropped(DropReason::OutOfDate));
            }
            PresentOutcome::Failed(cause) => return Err(RenderError::Present(cause)),
        };

        self.cursor.advance();
        Ok(outcome)
    }

    /// React to a new client size. A zero-area size suspends rendering and
    /// releases nothing; any other size rebuilds the surface-dependent
    /// resources exactly once.
    pub fn handle_resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        let size = RenderSize::new(width, height);
        match self.state {
            RenderState::Uninitialized => {
                self.last_size = size;
                return Ok(());
            }
            RenderState::Faulted | RenderState::Finalized => return Ok(()),
            _ => {}
        }
        self.last_size = size;
        self.recreate_surface(size)
    }

    pub fn notify_resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        self.handle_resize(width, height)
    }

    /// Minimizing suspends. Restoring resumes at the last reported size,
    /// rebuilding only if the surface is gone or was requested at another
    /// size.
    pub fn notify_minimized(&mut self, minimized: bool) -> Result<(), RenderError> {
        if minimized {
            if self.state == RenderState::Ready {
                self.suspend("window minimized");
            }
            return Ok(());
        }
        if self.state != RenderState::Suspended || self.last_size.is_empty() {
            return Ok(());
        }
        if self.surface.is_some() && self.built_for == Some(self.last_size) {
            info!("rendering resumed");
            self.state = RenderState::Ready;
            Ok(())
        } else {
            self.recreate_surface(self.last_size)
        }
    }

    pub fn notify_closing(&mut self) {
        self.finalize();
    }

    fn suspend(&mut self, why: &str) {
        if self.state != RenderState::Suspended {
            info!("rendering suspended ({why})");
        }
        self.state = RenderState::Suspended;
    }

    fn recreate_surface(&mut self, size: RenderSize) -> Result<(), RenderError> {
        if size.is_empty() {
            self.suspend("zero-area surface");
            return Ok(());
        }
        self.state = RenderState::Resizing;
        match self.rebuild_surface_group(size) {
            Ok(Some(surface)) => {
                self.surface = Some(surface);
                self.built_for = Some(size);
                self.stats.recreations += 1;
                self.state = RenderState::Ready;
                info!(
                    width = surface.extent.width,
                    height = surface.extent.height,
                    images = surface.image_count,
                    "surface rebuilt"
                );
                Ok(())
            }
            Ok(None) => {
                self.surface = None;
                self.built_for = None;
                self.suspend("surface reports zero area");
                Ok(())
            }
            Err(cause) => {
                self.surface = None;
                self.built_for = None;
                self.state = RenderState::Faulted;
                Err(RenderError::Recovery {
                    width: size.width,
                    height: size.height,
                    cause,
                })
            }
        }
    }

    /// `None` when the surface reports no area. The old group is released
    /// either way; slots and the device stay alive.
    fn rebuild_surface_group(&mut self, size: RenderSize) -> anyhow::Result<Option<SurfaceInfo>> {
        // In-flight frames may still reference everything released below.
        self.backend.wait_idle().context("waiting for device idle")?;
        self.backend.release_targets();
        self.backend.release_depth();
        self.backend.release_present_signals();
        self.backend.release_surface();

        let Some(surface) = self
            .backend
            .build_surface(size, self.config.vsync)
            .context("surface")?
        else {
            return Ok(None);
        };
        self.backend
            .build_depth(surface.extent)
            .context("depth attachment")?;
        self.backend.build_targets().context("render targets")?;
        self.backend
            .build_present_signals(surface.image_count)
            .context("present signals")?;
        // A dropped acquire may have left an image-available semaphore
        // signaled with nobody waiting on it.
        self.backend
            .rebuild_slot_sync()
            .context("frame slot sync objects")?;
        Ok(Some(surface))
    }

    /// Wait for the GPU, then release every resource in reverse creation
    /// order. Safe to call more than once; later calls do nothing.
    pub fn finalize(&mut self) {
        if self.state == RenderState::Finalized {
            return;
        }
        if let Err(e) = self.backend.wait_idle() {
            warn!("device did not go idle before teardown: {e:#}");
        }
        self.backend.release_frame_slots();
        self.backend.release_present_signals();
        self.backend.release_targets();
        self.backend.release_depth();
        self.backend.release_surface();
        self.backend.release_device();
        self.surface = None;
        self.built_for = None;
        self.state = RenderState::Finalized;
        info!(
            presented = self.stats.presented,
            dropped = self.stats.dropped,
            recreations = self.stats.recreations,
            "renderer finalized"
        );
    }

    #[inline]
    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn surface(&self) -> Option<SurfaceInfo> {
        self.surface
    }
}

impl<B: GpuBackend> Drop for FrameOrchestrator<B> {
    fn drop(&mut self) {
        self.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, Fence, MockBackend, ScriptedAcquire, ScriptedPresent};

    const HD: RenderSize = RenderSize::new(1280, 720);

    fn ready(frames: usize, images: usize) -> FrameOrchestrator<MockBackend> {
        let cfg = RenderConfig {
            frames_in_flight: frames,
            ..Default::default()
        };
        let mut orch = FrameOrchestrator::new(MockBackend::new(images), cfg).unwrap();
        orch.init(HD).unwrap();
        orch
    }

    fn assert_clean(orch: &FrameOrchestrator<MockBackend>) {
        assert!(
            orch.backend.violations.is_empty(),
            "{:?}",
            orch.backend.violations
        );
    }

    #[test]
    fn init_builds_slots_signals_and_depth() {
        let orch = ready(2, 3);
        let b = &orch.backend;
        assert_eq!(orch.state(), RenderState::Ready);
        assert_eq!(b.fences, vec![Fence::Signaled; 2]);
        assert_eq!(b.present_signals.len(), 3);
        assert_eq!(b.depth, Some(HD));
        assert_eq!(
            orch.surface(),
            Some(SurfaceInfo {
                extent: HD,
                image_count: 3
            })
        );
        assert_eq!(
            b.calls,
            vec![
                Call::BuildSurface(HD),
                Call::BuildDepth(HD),
                Call::BuildTargets,
                Call::BuildPresentSignals(3),
                Call::BuildFrameSlots(2),
            ]
        );
        assert_clean(&orch);
    }

    #[test]
    fn frame_steps_run_in_order() {
        let mut orch = ready(2, 3);
        orch.backend.calls.clear();
        let out = orch.render_frame(0.016).unwrap();
        assert_eq!(out, FrameOutcome::Presented { slot: 0, image: 0 });
        assert_eq!(
            orch.backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::ResetFence(0),
                Call::WriteUniforms(0),
                Call::Record(0, 0),
                Call::Submit(0, 0),
                Call::Present(0),
            ]
        );
    }

    #[test]
    fn cursor_is_round_robin_for_any_slot_count() {
        for frames in 1..=4 {
            let mut orch = ready(frames, 3);
            let slots: Vec<usize> = (0..frames * 3)
                .map(|_| match orch.render_frame(0.01).unwrap() {
                    FrameOutcome::Presented { slot, .. } => slot,
                    other => panic!("unexpected {other:?}"),
                })
                .collect();
            let expected: Vec<usize> = (0..frames * 3).map(|i| i % frames).collect();
            assert_eq!(slots, expected, "frames_in_flight = {frames}");
            assert_eq!(orch.backend.fences.len(), frames);
            assert_clean(&orch);
        }
    }

    #[test]
    fn slot_count_is_independent_of_image_count() {
        let mut orch = ready(3, 2);
        for _ in 0..6 {
            orch.render_frame(0.01).unwrap();
        }
        assert_eq!(orch.backend.fences.len(), 3);
        assert_eq!(orch.backend.present_signals.len(), 2);
        assert_eq!(orch.stats().submissions, vec![2, 2, 2]);
        assert_clean(&orch);
    }

    #[test]
    fn hundred_frames_complete_evenly() {
        let mut orch = ready(2, 3);
        for _ in 0..100 {
            assert!(matches!(
                orch.render_frame(1.0 / 60.0).unwrap(),
                FrameOutcome::Presented { .. }
            ));
        }
        orch.finalize();
        let b = &orch.backend;
        assert_eq!(b.completions, vec![50, 50]);
        let alternating: Vec<usize> = (0..100).map(|i| i % 2).collect();
        assert_eq!(b.retire_order, alternating);
        assert_eq!(orch.stats().presented, 100);
        assert_clean(&orch);
    }

    #[test]
    fn out_of_date_acquire_drops_frame_and_rebuilds_once() {
        let mut orch = ready(2, 3);
        orch.render_frame(0.01).unwrap();
        orch.backend.acquire_script.push_back(ScriptedAcquire::OutOfDate);
        let before = orch.backend.calls.len();

        let out = orch.render_frame(0.01).unwrap();
        assert_eq!(out, FrameOutcome::Dropped(DropReason::OutOfDate));
        let frame_calls = &orch.backend.calls[before..];
        assert!(!frame_calls
            .iter()
            .any(|c| matches!(c, Call::Submit(..) | Call::Present(_))));
        assert!(frame_calls.contains(&Call::BuildSurface(HD)));
        assert_eq!(orch.backend.surface_builds(), 2);
        assert_eq!(orch.stats().recreations, 1);
        assert_eq!(orch.state(), RenderState::Ready);

        assert!(matches!(
            orch.render_frame(0.01).unwrap(),
            FrameOutcome::Presented { slot: 1, .. }
        ));
        assert_eq!(orch.backend.surface_builds(), 2);
        assert_clean(&orch);
    }

    #[test]
    fn out_of_date_recovery_uses_last_reported_size() {
        let mut orch = ready(2, 3);
        let vga = RenderSize::new(800, 600);
        orch.handle_resize(800, 600).unwrap();
        orch.render_frame(0.01).unwrap();
        orch.backend.calls.clear();

        orch.backend.acquire_script.push_back(ScriptedAcquire::OutOfDate);
        orch.render_frame(0.01).unwrap();
        let builds: Vec<&Call> = orch
            .backend
            .calls
            .iter()
            .filter(|c| matches!(c, Call::BuildSurface(_)))
            .collect();
        assert_eq!(builds, vec![&Call::BuildSurface(vga)]);
        assert_eq!(orch.backend.depth, Some(vga));
        assert_clean(&orch);
    }

    #[test]
    fn surface_without_area_suspends_instead_of_faulting() {
        let mut orch = ready(2, 3);
        orch.render_frame(0.01).unwrap();

        // Window still reports 1280x720 but its surface is already 0x0.
        orch.backend.zero_area_surface = true;
        orch.backend.acquire_script.push_back(ScriptedAcquire::OutOfDate);
        assert_eq!(
            orch.render_frame(0.01).unwrap(),
            FrameOutcome::Dropped(DropReason::OutOfDate)
        );
        assert_eq!(orch.state(), RenderState::Suspended);
        assert_eq!(orch.surface(), None);
        assert!(orch.backend.device_alive);
        assert_eq!(orch.backend.fences, vec![Fence::Signaled; 2]);

        let before = orch.backend.calls.len();
        assert_eq!(orch.render_frame(0.01).unwrap(), FrameOutcome::Suspended);
        assert_eq!(orch.backend.calls.len(), before);

        orch.handle_resize(0, 0).unwrap();
        assert_eq!(orch.state(), RenderState::Suspended);

        orch.backend.zero_area_surface = false;
        orch.handle_resize(1280, 720).unwrap();
        assert_eq!(orch.state(), RenderState::Ready);
        assert_eq!(orch.backend.depth, Some(HD));
        assert!(matches!(
            orch.render_frame(0.01).unwrap(),
            FrameOutcome::Presented { .. }
        ));
        assert_clean(&orch);
    }

    #[test]
    fn present_into_zero_area_surface_suspends() {
        let mut orch = ready(2, 3);
        orch.backend.zero_area_surface = true;
        orch.backend.present_script.push_back(ScriptedPresent::OutOfDate);
        orch.render_frame(0.01).unwrap();
        assert_eq!(orch.state(), RenderState::Suspended);
        assert_clean(&orch);
    }

    #[test]
    fn restore_rebuilds_a_released_surface() {
        let mut orch = ready(2, 3);
        orch.backend.zero_area_surface = true;
        orch.backend.acquire_script.push_back(ScriptedAcquire::OutOfDate);
        orch.render_frame(0.01).unwrap();
        assert_eq!(orch.surface(), None);

        // Still no area: stays suspended.
        orch.notify_minimized(false).unwrap();
        assert_eq!(orch.state(), RenderState::Suspended);

        orch.backend.zero_area_surface = false;
        let builds = orch.backend.surface_builds();
        orch.notify_minimized(false).unwrap();
        assert_eq!(orch.state(), RenderState::Ready);
        assert_eq!(orch.backend.surface_builds(), builds + 1);
        assert_eq!(orch.backend.calls.last(), Some(&Call::RebuildSlotSync));
        assert_eq!(orch.surface().map(|s| s.extent), Some(HD));
        assert!(matches!(
            orch.render_frame(0.01).unwrap(),
            FrameOutcome::Presented { .. }
        ));
        assert_clean(&orch);
    }

    #[test]
    fn restore_ignores_extent_the_surface_clamped() {
        let mut backend = MockBackend::new(3);
        let clamped = RenderSize::new(1264, 681);
        backend.reported_extent = Some(clamped);
        let mut orch = FrameOrchestrator::new(backend, RenderConfig::default()).unwrap();
        orch.init(HD).unwrap();
        assert_eq!(orch.surface().map(|s| s.extent), Some(clamped));

        orch.notify_minimized(true).unwrap();
        orch.notify_minimized(false).unwrap();
        assert_eq!(orch.state(), RenderState::Ready);
        assert_eq!(orch.backend.surface_builds(), 1);
        assert_clean(&orch);
    }

    #[test]
    fn zero_area_suspends_then_restore_rebuilds_once() {
        let mut orch = ready(2, 3);
        orch.render_frame(0.01).unwrap();

        orch.handle_resize(0, 0).unwrap();
        assert_eq!(orch.state(), RenderState::Suspended);
        assert_eq!(orch.backend.surface_builds(), 1);
        assert_eq!(orch.backend.depth, Some(HD));

        let before = orch.backend.calls.len();
        for _ in 0..5 {
            assert_eq!(orch.render_frame(0.01).unwrap(), FrameOutcome::Suspended);
        }
        assert_eq!(orch.backend.calls.len(), before);

        orch.handle_resize(800, 600).unwrap();
        assert_eq!(orch.state(), RenderState::Ready);
        assert_eq!(orch.backend.surface_builds(), 2);
        for _ in 0..5 {
            assert!(matches!(
                orch.render_frame(0.01).unwrap(),
                FrameOutcome::Presented { .. }
            ));
        }
        assert_eq!(orch.backend.surface_builds(), 2);
        assert_eq!(orch.backend.depth, Some(RenderSize::new(800, 600)));
        assert_clean(&orch);
    }

    #[test]
    fn minimized_window_sees_no_surface_traffic() {
        let mut orch = ready(2, 3);
        orch.notify_minimized(true).unwrap();
        let before = orch.backend.calls.len();
        for _ in 0..10 {
            assert_eq!(orch.render_frame(0.01).unwrap(), FrameOutcome::Suspended);
        }
        assert_eq!(
            orch.backend.calls[before..]
                .iter()
                .filter(|c| c.is_surface_traffic())
                .count(),
            0
        );

        orch.notify_minimized(false).unwrap();
        assert_eq!(orch.state(), RenderState::Ready);
        assert_eq!(orch.backend.surface_builds(), 1);
        assert!(matches!(
            orch.render_frame(0.01).unwrap(),
            FrameOutcome::Presented { .. }
        ));
        assert_clean(&orch);
    }

    #[test]
    fn restore_after_zero_area_waits_for_real_size() {
        let mut orch = ready(2, 3);
        orch.handle_resize(0, 0).unwrap();
        orch.notify_minimized(false).unwrap();
        assert_eq!(orch.state(), RenderState::Suspended);
        assert_eq!(orch.backend.surface_builds(), 1);
    }

    #[test]
    fn repeated_resize_to_same_size_is_stable() {
        let mut orch = ready(2, 3);
        orch.handle_resize(800, 600).unwrap();
        let first = (
            orch.surface(),
            orch.backend.depth,
            orch.backend.present_signals.len(),
            orch.backend.fences.len(),
        );
        orch.handle_resize(800, 600).unwrap();
        let second = (
            orch.surface(),
            orch.backend.depth,
            orch.backend.present_signals.len(),
            orch.backend.fences.len(),
        );
        assert_eq!(first, second);
        assert_eq!(orch.stats().recreations, 2);
        assert_clean(&orch);
    }

    #[test]
    fn image_count_change_follows_surface_not_slots() {
        let mut orch = ready(2, 3);
        orch.render_frame(0.01).unwrap();
        orch.backend.image_count = 4;
        orch.handle_resize(1024, 768).unwrap();
        assert_eq!(orch.backend.present_signals.len(), 4);
        assert_eq!(orch.backend.fences.len(), 2);
        assert_eq!(orch.surface().map(|s| s.image_count), Some(4));
        for _ in 0..8 {
            orch.render_frame(0.01).unwrap();
        }
        assert_clean(&orch);
    }

    #[test]
    fn resize_drains_in_flight_work_first() {
        let mut orch = ready(2, 3);
        orch.render_frame(0.01).unwrap();
        orch.render_frame(0.01).unwrap();
        assert!(orch.backend.fences.iter().all(|f| *f == Fence::Pending));
        orch.handle_resize(640, 480).unwrap();
        assert!(orch.backend.fences.iter().all(|f| *f == Fence::Signaled));
        assert_clean(&orch);
    }

    #[test]
    fn suboptimal_present_counts_and_rebuilds() {
        let mut orch = ready(2, 3);
        orch.backend.present_script.push_back(ScriptedPresent::Suboptimal);
        assert_eq!(
            orch.render_frame(0.01).unwrap(),
            FrameOutcome::Presented { slot: 0, image: 0 }
        );
        assert_eq!(orch.backend.surface_builds(), 2);
        assert_eq!(orch.stats().presented, 1);
        assert!(matches!(
            orch.render_frame(0.01).unwrap(),
            FrameOutcome::Presented { slot: 1, .. }
        ));
        assert_clean(&orch);
    }

    #[test]
    fn out_of_date_present_rebuilds_before_next_frame() {
        let mut orch = ready(2, 3);
        orch.backend.present_script.push_back(ScriptedPresent::OutOfDate);
        assert_eq!(
            orch.render_frame(0.01).unwrap(),
            FrameOutcome::Dropped(DropReason::OutOfDate)
        );
        assert_eq!(orch.backend.surface_builds(), 2);
        assert_eq!(orch.stats().submissions, vec![1, 0]);
        assert!(matches!(
            orch.render_frame(0.01).unwrap(),
            FrameOutcome::Presented { slot: 1, .. }
        ));
        assert_clean(&orch);
    }

    #[test]
    fn failed_acquire_leaves_slot_usable() {
        let mut orch = ready(2, 3);
        orch.backend.acquire_script.push_back(ScriptedAcquire::Fail);
        assert_eq!(
            orch.render_frame(0.01).unwrap(),
            FrameOutcome::Dropped(DropReason::AcquireFailed)
        );
        assert_eq!(orch.backend.fences[0], Fence::Signaled);
        for _ in 0..5 {
            assert!(matches!(
                orch.render_frame(0.01).unwrap(),
                FrameOutcome::Presented { .. }
            ));
        }
        assert_eq!(orch.stats().dropped, 1);
        assert_clean(&orch);
    }

    #[test]
    fn present_failure_is_fatal() {
        let mut orch = ready(2, 3);
        orch.backend.present_script.push_back(ScriptedPresent::Fail);
        let err = orch.render_frame(0.01).unwrap_err();
        assert!(matches!(err, RenderError::Present(_)));
        assert!(!err.is_startup());
        assert_eq!(orch.state(), RenderState::Faulted);
        assert_eq!(orch.render_frame(0.01).unwrap(), FrameOutcome::Skipped);
    }

    #[test]
    fn submit_failure_is_fatal() {
        let mut orch = ready(2, 3);
        orch.backend.fail_submit = true;
        let err = orch.render_frame(0.01).unwrap_err();
        assert!(matches!(err, RenderError::Submit(_)));
        assert_eq!(orch.state(), RenderState::Faulted);
    }

    #[test]
    fn stuck_fence_times_out() {
        let mut orch = ready(2, 3);
        orch.backend.fences[0] = Fence::Reset;
        let err = orch.render_frame(0.01).unwrap_err();
        assert!(matches!(err, RenderError::FenceTimeout { slot: 0, .. }));
        assert_eq!(orch.state(), RenderState::Faulted);
    }

    #[test]
    fn startup_failure_is_distinguishable() {
        let mut backend = MockBackend::new(3);
        backend.fail_build_depth = true;
        let mut orch = FrameOrchestrator::new(backend, RenderConfig::default()).unwrap();
        let err = orch.init(HD).unwrap_err();
        assert!(err.is_startup());
        assert!(matches!(
            err,
            RenderError::Startup {
                stage: "depth attachment",
                ..
            }
        ));
        assert_eq!(orch.state(), RenderState::Faulted);
        orch.finalize();
        assert!(!orch.backend.device_alive);
        assert_clean(&orch);
    }

    #[test]
    fn zero_area_init_is_a_startup_error() {
        let mut orch =
            FrameOrchestrator::new(MockBackend::new(3), RenderConfig::default()).unwrap();
        assert!(orch.init(RenderSize::new(0, 720)).unwrap_err().is_startup());
        assert_eq!(orch.backend.surface_builds(), 0);
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let cfg = RenderConfig {
            frames_in_flight: 0,
            ..Default::default()
        };
        let err = FrameOrchestrator::new(MockBackend::new(3), cfg)
            .err()
            .unwrap();
        assert!(err.is_startup());
    }

    #[test]
    fn failed_recovery_is_fatal_and_not_startup() {
        let mut orch = ready(2, 3);
        orch.backend.fail_build_depth = true;
        let err = orch.handle_resize(800, 600).unwrap_err();
        assert!(matches!(
            err,
            RenderError::Recovery {
                width: 800,
                height: 600,
                ..
            }
        ));
        assert!(!err.is_startup());
        assert_eq!(orch.state(), RenderState::Faulted);
        assert_eq!(orch.render_frame(0.01).unwrap(), FrameOutcome::Skipped);
    }

    #[test]
    fn resize_before_init_only_records_size() {
        let mut orch =
            FrameOrchestrator::new(MockBackend::new(3), RenderConfig::default()).unwrap();
        orch.handle_resize(800, 600).unwrap();
        assert!(orch.backend.calls.is_empty());
        assert_eq!(orch.render_frame(0.01).unwrap(), FrameOutcome::Skipped);
    }

    #[test]
    fn finalize_releases_in_reverse_and_only_once() {
        let mut orch = ready(2, 3);
        for _ in 0..3 {
            orch.render_frame(0.01).unwrap();
        }
        orch.notify_closing();
        let tail = orch.backend.calls[orch.backend.calls.len() - 7..].to_vec();
        assert_eq!(
            tail,
            vec![
                Call::WaitIdle,
                Call::ReleaseFrameSlots,
                Call::ReleasePresentSignals,
                Call::ReleaseTargets,
                Call::ReleaseDepth,
                Call::ReleaseSurface,
                Call::ReleaseDevice,
            ]
        );
        let len = orch.backend.calls.len();
        orch.finalize();
        assert_eq!(orch.backend.calls.len(), len);
        assert_eq!(orch.render_frame(0.01).unwrap(), FrameOutcome::Skipped);
        orch.handle_resize(800, 600).unwrap();
        assert_eq!(orch.backend.calls.len(), len);
        assert_eq!(orch.state(), RenderState::Finalized);
        assert_clean(&orch);
    }

    #[test]
    fn delta_time_only_moves_the_animation() {
        let mut orch = ready(2, 3);
        orch.render_frame(0.0).unwrap();
        orch.render_frame(0.0).unwrap();
        assert_eq!(orch.backend.uniforms[0], orch.backend.uniforms[1]);

        orch.render_frame(0.25).unwrap();
        assert_ne!(orch.backend.uniforms[0], orch.backend.uniforms[1]);

        // Non-finite deltas are ignored.
        let before = orch.backend.uniforms[0];
        orch.render_frame(f32::NAN).unwrap();
        orch.render_frame(f32::NAN).unwrap();
        assert_eq!(orch.backend.uniforms[0], before);
    }
}
