// SPDX-License-Identifier: CEPL-1.0
//! Frame slots: everything the CPU touches while recording one frame.
use std::ffi::c_void;

use anyhow::{ensure, Result};
use ash::vk;

use crate::device::DeviceContext;

pub struct FrameSlot {
    pub cmd: vk::CommandBuffer,
    /// Signaled when the slot's last submission has retired. Created signaled.
    pub fence: vk::Fence,
    pub image_available: vk::Semaphore,
    pub descriptor_set: vk::DescriptorSet,
    ubo: vk::Buffer,
    ubo_mem: vk::DeviceMemory,
    /// Persistently mapped, host-coherent.
    mapped: *mut c_void,
    ubo_size: usize,
}

impl FrameSlot {
    /// Takes ownership of `cmd` only on success.
    unsafe fn create(
        ctx: &DeviceContext,
        cmd: vk::CommandBuffer,
        descriptor_set: vk::DescriptorSet,
        ubo_size: usize,
    ) -> Result<Self> {
        let (ubo, ubo_mem) = ctx.create_buffer(
            ubo_size as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let mut slot = FrameSlot {
            cmd,
            fence: vk::Fence::null(),
            image_available: vk::Semaphore::null(),
            descriptor_set,
            ubo,
            ubo_mem,
            mapped: std::ptr::null_mut(),
            ubo_size,
        };
        if let Err(e) = slot.map_and_sync(&ctx.device) {
            slot.release_objects(&ctx.device);
            return Err(e);
        }
        Ok(slot)
    }

    unsafe fn map_and_sync(&mut self, device: &ash::Device) -> Result<()> {
        self.mapped = device.map_memory(
            self.ubo_mem,
            0,
            self.ubo_size as vk::DeviceSize,
            vk::MemoryMapFlags::empty(),
        )?;
        (self.fence, self.image_available) = create_sync(device)?;

        let info = vk::DescriptorBufferInfo {
            buffer: self.ubo,
            offset: 0,
            range: self.ubo_size as vk::DeviceSize,
        };
        let write = vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: self.descriptor_set,
            dst_binding: 0,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            p_buffer_info: &info,
            ..Default::default()
        };
        device.update_descriptor_sets(std::slice::from_ref(&write), &[]);
        Ok(())
    }

    /// Everything except the command buffer, which belongs to the pool.
    unsafe fn release_objects(&mut self, device: &ash::Device) {
        if self.fence != vk::Fence::null() {
            device.destroy_fence(self.fence, None);
            self.fence = vk::Fence::null();
        }
        if self.image_available != vk::Semaphore::null() {
            device.destroy_semaphore(self.image_available, None);
            self.image_available = vk::Semaphore::null();
        }
        if !self.mapped.is_null() {
            device.unmap_memory(self.ubo_mem);
            self.mapped = std::ptr::null_mut();
        }
        device.destroy_buffer(self.ubo, None);
        device.free_memory(self.ubo_mem, None);
    }

    /// Caller guarantees the slot's fence has been waited on.
    pub unsafe fn write_uniforms(&self, bytes: &[u8]) -> Result<()> {
        ensure!(
            bytes.len() <= self.ubo_size,
            "uniform block of {} bytes exceeds buffer of {}",
            bytes.len(),
            self.ubo_size
        );
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped.cast::<u8>(), bytes.len());
        Ok(())
    }
}

unsafe fn create_sync(device: &ash::Device) -> Result<(vk::Fence, vk::Semaphore)> {
    let fence_ci = vk::FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO,
        flags: vk::FenceCreateFlags::SIGNALED,
        ..Default::default()
    };
    let fence = device.create_fence(&fence_ci, None)?;
    let semaphore = match device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) {
        Ok(s) => s,
        Err(e) => {
            device.destroy_fence(fence, None);
            return Err(e.into());
        }
    };
    Ok((fence, semaphore))
}

#[derive(Default)]
pub struct FrameSlots {
    slots: Vec<FrameSlot>,
    desc_pool: vk::DescriptorPool,
}

impl FrameSlots {
    pub unsafe fn create(
        ctx: &DeviceContext,
        count: usize,
        set_layout: vk::DescriptorSetLayout,
        ubo_size: usize,
    ) -> Result<Self> {
        let mut built = FrameSlots::default();
        if let Err(e) = built.populate(ctx, count, set_layout, ubo_size) {
            built.destroy(ctx);
            return Err(e);
        }
        Ok(built)
    }

    unsafe fn populate(
        &mut self,
        ctx: &DeviceContext,
        count: usize,
        set_layout: vk::DescriptorSetLayout,
        ubo_size: usize,
    ) -> Result<()> {
        let d = &ctx.device;

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: count as u32,
        }];
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: count as u32,
            pool_size_count: pool_sizes.len() as u32,
            p_pool_sizes: pool_sizes.as_ptr(),
            ..Default::default()
        };
        self.desc_pool = d.create_descriptor_pool(&pool_ci, None)?;

        let layouts = vec![set_layout; count];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.desc_pool,
            descriptor_set_count: count as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        let sets = d.allocate_descriptor_sets(&alloc)?;

        let cmd_alloc = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: ctx.cmd_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count as u32,
            ..Default::default()
        };
        let cmds = d.allocate_command_buffers(&cmd_alloc)?;

        for (i, (&cmd, &set)) in cmds.iter().zip(&sets).enumerate() {
            match FrameSlot::create(ctx, cmd, set, ubo_size) {
                Ok(slot) => self.slots.push(slot),
                Err(e) => {
                    d.free_command_buffers(ctx.cmd_pool, &cmds[i..]);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    /// Fresh signaled fences and unsignaled acquire semaphores for every
    /// slot. The device must be idle.
    pub unsafe fn rebuild_sync(&mut self, device: &ash::Device) -> Result<()> {
        for slot in &mut self.slots {
            device.destroy_fence(slot.fence, None);
            device.destroy_semaphore(slot.image_available, None);
            slot.fence = vk::Fence::null();
            slot.image_available = vk::Semaphore::null();
            (slot.fence, slot.image_available) = create_sync(device)?;
        }
        Ok(())
    }

    pub unsafe fn destroy(&mut self, ctx: &DeviceContext) {
        let d = &ctx.device;
        for mut slot in self.slots.drain(..) {
            slot.release_objects(d);
            d.free_command_buffers(ctx.cmd_pool, std::slice::from_ref(&slot.cmd));
        }
        if self.desc_pool != vk::DescriptorPool::null() {
            // Frees the sets with it.
            d.destroy_descriptor_pool(self.desc_pool, None);
            self.desc_pool = vk::DescriptorPool::null();
        }
    }
}
