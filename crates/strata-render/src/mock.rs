// SPDX-License-Identifier: CEPL-1.0
//! In-memory backend for orchestrator tests.
//!
//! Models the GPU timeline just enough to catch ordering bugs: each slot
//! fence is signaled, reset or pending, each present signal is pending or
//! not, and a submission only retires when the CPU waits on it. Anything
//! that would be undefined behavior on a real device is pushed onto
//! `violations` instead of panicking, so tests can assert on the full list.
use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};

use crate::backend::{AcquireOutcome, FenceStatus, GpuBackend, PresentOutcome, RetiredSlot};
use crate::{FrameUniforms, RenderSize, SurfaceInfo};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Fence {
    Signaled,
    Reset,
    Pending,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    BuildSurface(RenderSize),
    ReleaseSurface,
    BuildDepth(RenderSize),
    ReleaseDepth,
    BuildTargets,
    ReleaseTargets,
    BuildPresentSignals(usize),
    ReleasePresentSignals,
    BuildFrameSlots(usize),
    RebuildSlotSync,
    ReleaseFrameSlots,
    Wait(usize),
    Acquire(usize),
    ResetFence(usize),
    WriteUniforms(usize),
    Record(usize, u32),
    Submit(usize, u32),
    Present(u32),
    WaitIdle,
    ReleaseDevice,
}

impl Call {
    /// Calls that touch the presentation surface during a frame.
    pub(crate) fn is_surface_traffic(&self) -> bool {
        matches!(self, Call::Acquire(_) | Call::Submit(..) | Call::Present(_))
    }
}

pub(crate) enum ScriptedAcquire {
    OutOfDate,
    Fail,
}

pub(crate) enum ScriptedPresent {
    Suboptimal,
    OutOfDate,
    Fail,
}

pub(crate) struct MockBackend {
    pub calls: Vec<Call>,
    /// `K` handed out by the next surface build.
    pub image_count: usize,
    pub surface: Option<SurfaceInfo>,
    pub depth: Option<RenderSize>,
    pub targets: bool,
    pub present_signals: Vec<bool>,
    pub fences: Vec<Fence>,
    pub uniforms: Vec<Option<FrameUniforms>>,
    pub device_alive: bool,
    next_image: u32,
    pub acquire_script: VecDeque<ScriptedAcquire>,
    pub present_script: VecDeque<ScriptedPresent>,
    pub fail_build_depth: bool,
    pub fail_submit: bool,
    /// Surface builds report no area, as a minimized window's surface does.
    pub zero_area_surface: bool,
    /// Extent the surface reports instead of the requested size.
    pub reported_extent: Option<RenderSize>,
    pub violations: Vec<String>,
    pub completions: Vec<u64>,
    pub retire_order: Vec<usize>,
}

impl MockBackend {
    pub(crate) fn new(image_count: usize) -> Self {
        Self {
            calls: Vec::new(),
            image_count,
            surface: None,
            depth: None,
            targets: false,
            present_signals: Vec::new(),
            fences: Vec::new(),
            uniforms: Vec::new(),
            device_alive: true,
            next_image: 0,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            fail_build_depth: false,
            fail_submit: false,
            zero_area_surface: false,
            reported_extent: None,
            violations: Vec::new(),
            completions: Vec::new(),
            retire_order: Vec::new(),
        }
    }

    pub(crate) fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub(crate) fn surface_builds(&self) -> usize {
        self.count(|c| matches!(c, Call::BuildSurface(_)))
    }

    fn violation(&mut self, msg: impl Into<String>) {
        self.violations.push(msg.into());
    }

    fn any_pending(&self) -> bool {
        self.fences.iter().any(|f| *f == Fence::Pending)
    }

    fn check_drained(&mut self, what: &str) {
        if self.any_pending() {
            self.violation(format!("{what} destroyed while a frame was in flight"));
        }
    }

    fn retire(&mut self, slot: usize) {
        self.fences[slot] = Fence::Signaled;
        self.completions[slot] += 1;
        self.retire_order.push(slot);
    }

    fn expect_reset(&mut self, slot: usize, op: &str) {
        match self.fences.get(slot) {
            Some(Fence::Reset) => {}
            other => {
                let msg = format!("{op} on slot {slot} with fence {other:?}");
                self.violation(msg);
            }
        }
    }
}

impl GpuBackend for MockBackend {
    fn build_surface(&mut self, size: RenderSize, _vsync: bool) -> Result<Option<SurfaceInfo>> {
        self.calls.push(Call::BuildSurface(size));
        if self.any_pending() {
            self.violation("surface built with frames in flight");
        }
        if self.surface.is_some() {
            self.violation("surface built over a live surface");
        }
        if self.zero_area_surface {
            self.surface = None;
            return Ok(None);
        }
        let info = SurfaceInfo {
            extent: self.reported_extent.unwrap_or(size),
            image_count: self.image_count,
        };
        self.surface = Some(info);
        self.next_image = 0;
        Ok(Some(info))
    }

    fn release_surface(&mut self) {
        self.calls.push(Call::ReleaseSurface);
        self.check_drained("surface");
        self.surface = None;
    }

    fn build_depth(&mut self, extent: RenderSize) -> Result<()> {
        self.calls.push(Call::BuildDepth(extent));
        if self.fail_build_depth {
            bail!("out of device memory");
        }
        if self.surface.map(|s| s.extent) != Some(extent) {
            self.violation("depth built before the surface it matches");
        }
        self.depth = Some(extent);
        Ok(())
    }

    fn release_depth(&mut self) {
        self.calls.push(Call::ReleaseDepth);
        self.check_drained("depth attachment");
        self.depth = None;
    }

    fn build_targets(&mut self) -> Result<()> {
        self.calls.push(Call::BuildTargets);
        if self.surface.is_none() || self.depth.is_none() {
            self.violation("targets built before surface and depth");
        }
        self.targets = true;
        Ok(())
    }

    fn release_targets(&mut self) {
        self.calls.push(Call::ReleaseTargets);
        self.check_drained("targets");
        self.targets = false;
    }

    fn build_present_signals(&mut self, count: usize) -> Result<()> {
        self.calls.push(Call::BuildPresentSignals(count));
        if self.surface.map(|s| s.image_count) != Some(count) {
            self.violation("present signal count differs from image count");
        }
        self.present_signals = vec![false; count];
        Ok(())
    }

    fn release_present_signals(&mut self) {
        self.calls.push(Call::ReleasePresentSignals);
        self.check_drained("present signals");
        self.present_signals.clear();
    }

    fn build_frame_slots(&mut self, count: usize) -> Result<()> {
        self.calls.push(Call::BuildFrameSlots(count));
        self.fences = vec![Fence::Signaled; count];
        self.uniforms = vec![None; count];
        self.completions = vec![0; count];
        Ok(())
    }

    fn rebuild_slot_sync(&mut self) -> Result<()> {
        self.calls.push(Call::RebuildSlotSync);
        self.check_drained("slot sync");
        self.fences.iter_mut().for_each(|f| *f = Fence::Signaled);
        Ok(())
    }

    fn release_frame_slots(&mut self) {
        self.calls.push(Call::ReleaseFrameSlots);
        self.check_drained("frame slots");
        self.fences.clear();
    }

    fn wait_for_slot(&mut self, slot: usize, _timeout: Option<Duration>) -> Result<FenceStatus> {
        self.calls.push(Call::Wait(slot));
        match self.fences.get(slot).copied() {
            Some(Fence::Signaled) => Ok(FenceStatus::Signaled),
            Some(Fence::Pending) => {
                self.retire(slot);
                Ok(FenceStatus::Signaled)
            }
            // Reset but never submitted: a real device would never signal it.
            Some(Fence::Reset) => Ok(FenceStatus::TimedOut),
            None => bail!("no frame slot {slot}"),
        }
    }

    fn acquire_image(&mut self, slot: usize, _timeout: Option<Duration>) -> AcquireOutcome {
        self.calls.push(Call::Acquire(slot));
        if self.fences.get(slot) == Some(&Fence::Pending) {
            self.violation(format!("acquire on slot {slot} before it retired"));
        }
        match self.acquire_script.pop_front() {
            Some(ScriptedAcquire::OutOfDate) => return AcquireOutcome::OutOfDate,
            Some(ScriptedAcquire::Fail) => {
                return AcquireOutcome::Failed(anyhow!("surface lost"));
            }
            None => {}
        }
        let Some(surface) = self.surface else {
            return AcquireOutcome::Failed(anyhow!("no surface"));
        };
        let image = self.next_image % surface.image_count as u32;
        self.next_image += 1;
        AcquireOutcome::Acquired(image)
    }

    fn reset_slot_fence(&mut self, slot: usize) -> Result<()> {
        self.calls.push(Call::ResetFence(slot));
        if self.fences.get(slot) != Some(&Fence::Signaled) {
            self.violation(format!("fence {slot} reset before its wait retired it"));
        }
        if let Some(f) = self.fences.get_mut(slot) {
            *f = Fence::Reset;
        }
        Ok(())
    }

    fn write_uniforms(&mut self, slot: &RetiredSlot, uniforms: &FrameUniforms) -> Result<()> {
        self.calls.push(Call::WriteUniforms(slot.index()));
        self.expect_reset(slot.index(), "uniform write");
        self.uniforms[slot.index()] = Some(*uniforms);
        Ok(())
    }

    fn record(&mut self, slot: &RetiredSlot, image: u32, _clear: [f32; 4]) -> Result<()> {
        self.calls.push(Call::Record(slot.index(), image));
        self.expect_reset(slot.index(), "record");
        if !self.targets || image as usize >= self.present_signals.len() {
            self.violation(format!("record into image {image} without live targets"));
        }
        Ok(())
    }

    fn submit(&mut self, slot: RetiredSlot, image: u32) -> Result<()> {
        let slot = slot.index();
        self.calls.push(Call::Submit(slot, image));
        if self.fail_submit {
            bail!("device lost");
        }
        self.expect_reset(slot, "submit");
        self.fences[slot] = Fence::Pending;
        match self.present_signals.get_mut(image as usize) {
            Some(pending) if *pending => {
                self.violation(format!("present signal {image} signaled twice"));
            }
            Some(pending) => *pending = true,
            None => self.violation(format!("no present signal for image {image}")),
        }
        Ok(())
    }

    fn present(&mut self, image: u32) -> PresentOutcome {
        self.calls.push(Call::Present(image));
        match self.present_signals.get_mut(image as usize) {
            Some(pending) if *pending => *pending = false,
            _ => self.violation(format!("present of image {image} with nothing to wait on")),
        }
        match self.present_script.pop_front() {
            Some(ScriptedPresent::Suboptimal) => PresentOutcome::Suboptimal,
            Some(ScriptedPresent::OutOfDate) => PresentOutcome::OutOfDate,
            Some(ScriptedPresent::Fail) => PresentOutcome::Failed(anyhow!("surface lost")),
            None => PresentOutcome::Presented,
        }
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.calls.push(Call::WaitIdle);
        for slot in 0..self.fences.len() {
            if self.fences[slot] == Fence::Pending {
                self.retire(slot);
            }
        }
        Ok(())
    }

    fn release_device(&mut self) {
        self.calls.push(Call::ReleaseDevice);
        if self.surface.is_some() || self.depth.is_some() || self.targets || !self.fences.is_empty()
        {
            self.violation("device released before its children");
        }
        self.device_alive = false;
    }
}
