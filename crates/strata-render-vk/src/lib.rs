// SPDX-License-Identifier: CEPL-1.0
//! Vulkan implementation of [`GpuBackend`], drawing a spinning cube through
//! a classic render pass with a depth attachment.
mod depth;
mod device;
mod frame;
mod geometry;
mod swapchain;
mod targets;

pub use device::select_memory_type;

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use strata_render::{
    AcquireOutcome, FenceStatus, FrameUniforms, GpuBackend, PresentOutcome, RenderSize,
    RetiredSlot, SurfaceInfo,
};
use tracing::{debug, info, warn};

use crate::depth::DepthAttachment;
use crate::device::{timeout_ns, DeviceContext};
use crate::frame::{FrameSlot, FrameSlots};
use crate::geometry::Mesh;
use crate::swapchain::SurfaceChain;
use crate::targets::Targets;

pub struct VkBackend {
    ctx: DeviceContext,
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    mesh: Option<Mesh>,
    depth_format: vk::Format,

    chain: Option<SurfaceChain>,
    depth: Option<DepthAttachment>,
    targets: Targets,
    /// Render-finished semaphores, indexed by surface image.
    present_signals: Vec<vk::Semaphore>,
    slots: FrameSlots,

    released: bool,
}

impl VkBackend {
    /// Create the instance, surface, device and everything that does not
    /// depend on the surface size.
    pub fn new(window: &dyn HasWindowHandle, display: &dyn HasDisplayHandle) -> Result<Self> {
        let ctx = unsafe { DeviceContext::new(window, display)? };
        let mut backend = VkBackend {
            ctx,
            set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            mesh: None,
            depth_format: vk::Format::UNDEFINED,
            chain: None,
            depth: None,
            targets: Targets::default(),
            present_signals: Vec::new(),
            slots: FrameSlots::default(),
            released: false,
        };
        // On error, Drop releases whatever was created.
        unsafe { backend.create_device_objects()? };
        info!(
            gpu = %backend.ctx.device_name,
            depth_format = ?backend.depth_format,
            "vulkan backend ready"
        );
        Ok(backend)
    }

    unsafe fn create_device_objects(&mut self) -> Result<()> {
        self.depth_format = depth::query_depth_format(&self.ctx)?;
        self.set_layout = targets::create_set_layout(&self.ctx.device)?;
        self.pipeline_layout = targets::create_pipeline_layout(&self.ctx.device, self.set_layout)?;
        self.mesh = Some(Mesh::cube(&self.ctx).context("uploading cube geometry")?);
        Ok(())
    }

    fn slot(&self, index: usize) -> Result<&FrameSlot> {
        self.slots
            .get(index)
            .ok_or_else(|| anyhow!("no frame slot {index}"))
    }

    fn chain(&self) -> Result<&SurfaceChain> {
        self.chain.as_ref().ok_or_else(|| anyhow!("no surface"))
    }

    fn present_signal(&self, image: u32) -> Result<vk::Semaphore> {
        self.present_signals
            .get(image as usize)
            .copied()
            .ok_or_else(|| anyhow!("no present signal for image {image}"))
    }

    unsafe fn record_cube(&self, slot: &FrameSlot, image: u32, clear: [f32; 4]) -> Result<()> {
        let d = &self.ctx.device;
        let chain = self.chain()?;
        let mesh = self
            .mesh
            .as_ref()
            .ok_or_else(|| anyhow!("geometry not uploaded"))?;
        let framebuffer = self
            .targets
            .framebuffer(image)
            .ok_or_else(|| anyhow!("no framebuffer for image {image}"))?;
        let cmd = slot.cmd;
        let extent = chain.extent;

        d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        d.begin_command_buffer(cmd, &begin)?;

        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue { float32: clear },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: self.targets.render_pass(),
            framebuffer,
            render_area: area,
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
        d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.targets.pipeline());

        // Negative height flips to a y-up clip space (core since 1.1).
        let vp = vk::Viewport {
            x: 0.0,
            y: extent.height as f32,
            width: extent.width as f32,
            height: -(extent.height as f32),
            min_depth: 0.0,
            max_depth: 1.0,
        };
        d.cmd_set_viewport(cmd, 0, std::slice::from_ref(&vp));
        d.cmd_set_scissor(cmd, 0, std::slice::from_ref(&area));
        d.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipeline_layout,
            0,
            std::slice::from_ref(&slot.descriptor_set),
            &[],
        );
        mesh.bind(d, cmd);
        d.cmd_draw_indexed(cmd, mesh.index_count, 1, 0, 0, 0);

        d.cmd_end_render_pass(cmd);
        d.end_command_buffer(cmd)?;
        Ok(())
    }
}

impl GpuBackend for VkBackend {
    fn build_surface(&mut self, size: RenderSize, vsync: bool) -> Result<Option<SurfaceInfo>> {
        self.release_surface();
        let Some(chain) = (unsafe { SurfaceChain::create(&self.ctx, size, vsync)? }) else {
            return Ok(None);
        };
        let info = SurfaceInfo {
            extent: RenderSize::new(chain.extent.width, chain.extent.height),
            image_count: chain.image_count(),
        };
        self.chain = Some(chain);
        Ok(Some(info))
    }

    fn release_surface(&mut self) {
        if let Some(mut chain) = self.chain.take() {
            unsafe { chain.destroy(&self.ctx) };
        }
    }

    fn build_depth(&mut self, extent: RenderSize) -> Result<()> {
        self.release_depth();
        let extent = vk::Extent2D {
            width: extent.width,
            height: extent.height,
        };
        let depth = unsafe { DepthAttachment::create(&self.ctx, extent, self.depth_format)? };
        self.depth = Some(depth);
        Ok(())
    }

    fn release_depth(&mut self) {
        if let Some(mut depth) = self.depth.take() {
            unsafe { depth.destroy(&self.ctx) };
        }
    }

    fn build_targets(&mut self) -> Result<()> {
        let chain = self
            .chain
            .as_ref()
            .ok_or_else(|| anyhow!("render targets need a surface"))?;
        let depth = self
            .depth
            .as_ref()
            .ok_or_else(|| anyhow!("render targets need a depth attachment"))?;
        unsafe {
            self.targets.build(
                &self.ctx.device,
                self.pipeline_layout,
                chain.format.format,
                depth.format,
                &chain.views,
                depth.view,
                chain.extent,
            )
        }
    }

    fn release_targets(&mut self) {
        unsafe { self.targets.release_framebuffers(&self.ctx.device) };
    }

    fn build_present_signals(&mut self, count: usize) -> Result<()> {
        self.release_present_signals();
        for _ in 0..count {
            let sem = unsafe {
                self.ctx
                    .device
                    .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
            };
            self.present_signals.push(sem);
        }
        debug!(count, "present signals created");
        Ok(())
    }

    fn release_present_signals(&mut self) {
        for sem in self.present_signals.drain(..) {
            unsafe { self.ctx.device.destroy_semaphore(sem, None) };
        }
    }

    fn build_frame_slots(&mut self, count: usize) -> Result<()> {
        self.release_frame_slots();
        self.slots = unsafe {
            FrameSlots::create(
                &self.ctx,
                count,
                self.set_layout,
                std::mem::size_of::<FrameUniforms>(),
            )?
        };
        Ok(())
    }

    fn rebuild_slot_sync(&mut self) -> Result<()> {
        unsafe { self.slots.rebuild_sync(&self.ctx.device) }
    }

    fn release_frame_slots(&mut self) {
        unsafe { self.slots.destroy(&self.ctx) };
    }

    fn wait_for_slot(&mut self, slot: usize, timeout: Option<Duration>) -> Result<FenceStatus> {
        let fence = self.slot(slot)?.fence;
        match unsafe {
            self.ctx
                .device
                .wait_for_fences(&[fence], true, timeout_ns(timeout))
        } {
            Ok(()) => Ok(FenceStatus::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceStatus::TimedOut),
            Err(e) => Err(anyhow::Error::new(e).context("wait_for_fences")),
        }
    }

    fn acquire_image(&mut self, slot: usize, timeout: Option<Duration>) -> AcquireOutcome {
        let signal = match self.slot(slot) {
            Ok(s) => s.image_available,
            Err(e) => return AcquireOutcome::Failed(e),
        };
        match self.chain() {
            Ok(chain) => unsafe { chain.acquire(&self.ctx, signal, timeout) },
            Err(e) => AcquireOutcome::Failed(e),
        }
    }

    fn reset_slot_fence(&mut self, slot: usize) -> Result<()> {
        let fence = self.slot(slot)?.fence;
        unsafe { self.ctx.device.reset_fences(&[fence]) }.context("reset_fences")
    }

    fn write_uniforms(&mut self, slot: &RetiredSlot, uniforms: &FrameUniforms) -> Result<()> {
        let s = self.slot(slot.index())?;
        unsafe { s.write_uniforms(uniforms.as_bytes()) }
    }

    fn record(&mut self, slot: &RetiredSlot, image: u32, clear: [f32; 4]) -> Result<()> {
        let s = self.slot(slot.index())?;
        unsafe { self.record_cube(s, image, clear) }
    }

    fn submit(&mut self, slot: RetiredSlot, image: u32) -> Result<()> {
        let s = self.slot(slot.index())?;
        let signal = self.present_signal(image)?;
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &s.cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &signal,
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device
                .queue_submit(self.ctx.queue, std::slice::from_ref(&submit), s.fence)
        }
        .context("queue_submit")
    }

    fn present(&mut self, image: u32) -> PresentOutcome {
        let signal = match self.present_signal(image) {
            Ok(s) => s,
            Err(e) => return PresentOutcome::Failed(e),
        };
        match self.chain() {
            Ok(chain) => unsafe { chain.present(&self.ctx, image, signal) },
            Err(e) => PresentOutcome::Failed(e),
        }
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.ctx.device.device_wait_idle() }.context("device_wait_idle")
    }

    fn release_device(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.wait_idle() {
            warn!("{e:#}");
        }
        self.release_frame_slots();
        self.release_present_signals();
        unsafe { self.targets.destroy(&self.ctx.device) };
        self.release_depth();
        self.release_surface();
        unsafe {
            let d = &self.ctx.device;
            if let Some(mut mesh) = self.mesh.take() {
                mesh.destroy(d);
            }
            if self.pipeline_layout != vk::PipelineLayout::null() {
                d.destroy_pipeline_layout(self.pipeline_layout, None);
            }
            if self.set_layout != vk::DescriptorSetLayout::null() {
                d.destroy_descriptor_set_layout(self.set_layout, None);
            }
            self.ctx.destroy();
        }
        self.released = true;
    }
}

impl Drop for VkBackend {
    fn drop(&mut self) {
        self.release_device();
    }
}
