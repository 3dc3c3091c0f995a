// SPDX-License-Identifier: CEPL-1.0
//! Swapchain, its images and color views.
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use ash::vk;
use strata_render::{AcquireOutcome, PresentOutcome, RenderSize};
use tracing::debug;

use crate::device::{timeout_ns, DeviceContext};

pub struct SurfaceChain {
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
}

/// sRGB 8-bit BGRA or RGBA with the standard color space, else whatever
/// the surface lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    let first = formats
        .first()
        .copied()
        .ok_or_else(|| anyhow!("surface reports no formats"))?;
    if formats.len() == 1 && first.format == vk::Format::UNDEFINED {
        return Ok(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        });
    }
    let preferred = [vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB];
    Ok(preferred
        .iter()
        .find_map(|&want| {
            formats
                .iter()
                .copied()
                .find(|f| f.format == want && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        })
        .unwrap_or(first))
}

/// FIFO when vsync is on. Otherwise MAILBOX, then IMMEDIATE, then FIFO,
/// which every implementation must support.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface dictates the extent unless it reports the `u32::MAX`
/// sentinel, in which case the window size is clamped into range.
pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum so the CPU is not blocked on the compositor.
/// A maximum of zero means unbounded.
pub fn pick_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

pub fn pick_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&a| supported.contains(a))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

pub fn pick_pre_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

impl SurfaceChain {
    /// `None` while the surface reports no area.
    pub unsafe fn create(
        ctx: &DeviceContext,
        want: RenderSize,
        vsync: bool,
    ) -> Result<Option<Self>> {
        let caps = ctx
            .surface_loader
            .get_physical_device_surface_capabilities(ctx.phys, ctx.surface)
            .context("surface capabilities")?;
        let formats = ctx
            .surface_loader
            .get_physical_device_surface_formats(ctx.phys, ctx.surface)
            .context("surface formats")?;
        let modes = ctx
            .surface_loader
            .get_physical_device_surface_present_modes(ctx.phys, ctx.surface)
            .context("surface present modes")?;

        let format = choose_surface_format(&formats)?;
        let present_mode = choose_present_mode(&modes, vsync);
        let extent = extent_from_caps(&caps, want);
        if extent.width == 0 || extent.height == 0 {
            debug!(
                width = extent.width,
                height = extent.height,
                "surface has no area; swapchain not created"
            );
            return Ok(None);
        }

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: ctx.surface,
            min_image_count: pick_image_count(&caps),
            image_format: format.format,
            image_color_space: format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: pick_pre_transform(&caps),
            composite_alpha: pick_composite_alpha(caps.supported_composite_alpha),
            present_mode,
            clipped: vk::TRUE,
            ..Default::default()
        };
        let swapchain = ctx
            .swapchain_loader
            .create_swapchain(&swap_info, None)
            .context("create_swapchain")?;

        let mut chain = SurfaceChain {
            swapchain,
            format,
            extent,
            images: Vec::new(),
            views: Vec::new(),
        };
        if let Err(e) = chain.create_views(ctx) {
            chain.destroy(ctx);
            return Err(e);
        }

        debug!(
            width = extent.width,
            height = extent.height,
            images = chain.images.len(),
            format = ?format.format,
            mode = ?present_mode,
            "swapchain created"
        );
        Ok(Some(chain))
    }

    unsafe fn create_views(&mut self, ctx: &DeviceContext) -> Result<()> {
        self.images = ctx
            .swapchain_loader
            .get_swapchain_images(self.swapchain)?;
        for &image in &self.images {
            let iv_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: self.format.format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            self.views.push(ctx.device.create_image_view(&iv_info, None)?);
        }
        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Suboptimal acquisitions still render; the present that follows
    /// reports it again and triggers the rebuild.
    pub unsafe fn acquire(
        &self,
        ctx: &DeviceContext,
        signal: vk::Semaphore,
        timeout: Option<Duration>,
    ) -> AcquireOutcome {
        match ctx.swapchain_loader.acquire_next_image(
            self.swapchain,
            timeout_ns(timeout),
            signal,
            vk::Fence::null(),
        ) {
            Ok((index, _suboptimal)) => AcquireOutcome::Acquired(index),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => AcquireOutcome::OutOfDate,
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => {
                AcquireOutcome::Failed(anyhow!("no image available within {timeout:?}"))
            }
            Err(e) => AcquireOutcome::Failed(anyhow::Error::new(e).context("acquire_next_image")),
        }
    }

    pub unsafe fn present(
        &self,
        ctx: &DeviceContext,
        image: u32,
        wait: vk::Semaphore,
    ) -> PresentOutcome {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &self.swapchain,
            p_image_indices: &image,
            ..Default::default()
        };
        match ctx.swapchain_loader.queue_present(ctx.queue, &present) {
            Ok(false) => PresentOutcome::Presented,
            Ok(true) => PresentOutcome::Suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => PresentOutcome::OutOfDate,
            Err(e) => PresentOutcome::Failed(anyhow::Error::new(e).context("queue_present")),
        }
    }

    pub unsafe fn destroy(&mut self, ctx: &DeviceContext) {
        for view in self.views.drain(..) {
            ctx.device.destroy_image_view(view, None);
        }
        self.images.clear();
        if self.swapchain != vk::SwapchainKHR::null() {
            ctx.swapchain_loader.destroy_swapchain(self.swapchain, None);
            self.swapchain = vk::SwapchainKHR::null();
        }
    }
}
