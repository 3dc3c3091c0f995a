// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Result};
use ash::vk;

use crate::device::DeviceContext;

/// Most precise first.
pub const DEPTH_CANDIDATES: [vk::Format; 4] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

/// First candidate `usable` accepts as an optimal-tiling depth attachment.
pub fn pick_depth_format(usable: impl Fn(vk::Format) -> bool) -> Result<vk::Format> {
    DEPTH_CANDIDATES
        .into_iter()
        .find(|&f| usable(f))
        .ok_or_else(|| {
            anyhow!("device supports none of {DEPTH_CANDIDATES:?} as a depth attachment")
        })
}

pub unsafe fn query_depth_format(ctx: &DeviceContext) -> Result<vk::Format> {
    pick_depth_format(|fmt| {
        ctx.instance
            .get_physical_device_format_properties(ctx.phys, fmt)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
    )
}

pub fn aspect_for(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// Depth image sized to the surface. Rebuilt with it, never reused across
/// extents.
pub struct DepthAttachment {
    pub format: vk::Format,
    image: vk::Image,
    memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

impl DepthAttachment {
    pub unsafe fn create(
        ctx: &DeviceContext,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> Result<Self> {
        let d = &ctx.device;
        let img_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = d.create_image(&img_ci, None)?;
        let mut depth = DepthAttachment {
            format,
            image,
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
        };
        if let Err(e) = depth.bind_memory_and_view(ctx) {
            depth.destroy(ctx);
            return Err(e);
        }
        Ok(depth)
    }

    unsafe fn bind_memory_and_view(&mut self, ctx: &DeviceContext) -> Result<()> {
        let d = &ctx.device;
        let req = d.get_image_memory_requirements(self.image);
        self.memory = ctx.allocate(req, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        d.bind_image_memory(self.image, self.memory, 0)?;

        let view_ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image: self.image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: self.format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: aspect_for(self.format),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        self.view = d.create_image_view(&view_ci, None)?;
        Ok(())
    }

    pub unsafe fn destroy(&mut self, ctx: &DeviceContext) {
        let d = &ctx.device;
        if self.view != vk::ImageView::null() {
            d.destroy_image_view(self.view, None);
            self.view = vk::ImageView::null();
        }
        if self.image != vk::Image::null() {
            d.destroy_image(self.image, None);
            self.image = vk::Image::null();
        }
        if self.memory != vk::DeviceMemory::null() {
            d.free_memory(self.memory, None);
            self.memory = vk::DeviceMemory::null();
        }
    }
}
