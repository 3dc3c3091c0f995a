// SPDX-License-Identifier: CEPL-1.0
//! The cube drawn every frame, uploaded once into device-local memory.
use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::device::DeviceContext;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
}

const fn v(pos: [f32; 3], color: [f32; 3]) -> Vertex {
    Vertex { pos, color }
}

pub const CUBE_VERTICES: [Vertex; 8] = [
    v([-0.5, -0.5, -0.5], [0.1, 0.1, 0.1]),
    v([0.5, -0.5, -0.5], [1.0, 0.1, 0.1]),
    v([0.5, 0.5, -0.5], [1.0, 1.0, 0.1]),
    v([-0.5, 0.5, -0.5], [0.1, 1.0, 0.1]),
    v([-0.5, -0.5, 0.5], [0.1, 0.1, 1.0]),
    v([0.5, -0.5, 0.5], [1.0, 0.1, 1.0]),
    v([0.5, 0.5, 0.5], [1.0, 1.0, 1.0]),
    v([-0.5, 0.5, 0.5], [0.1, 1.0, 1.0]),
];

/// Counter-clockwise seen from outside, two triangles per face.
#[rustfmt::skip]
pub const CUBE_INDICES: [u32; 36] = [
    4, 5, 6, 6, 7, 4, // +z
    1, 0, 3, 3, 2, 1, // -z
    5, 1, 2, 2, 6, 5, // +x
    0, 4, 7, 7, 3, 0, // -x
    3, 7, 6, 6, 2, 3, // +y
    4, 0, 1, 1, 5, 4, // -y
];

pub struct Mesh {
    vbuf: vk::Buffer,
    vmem: vk::DeviceMemory,
    ibuf: vk::Buffer,
    imem: vk::DeviceMemory,
    pub index_count: u32,
}

impl Mesh {
    pub unsafe fn cube(ctx: &DeviceContext) -> Result<Self> {
        let (vbuf, vmem) = ctx.upload_device_local(
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&CUBE_VERTICES),
        )?;
        let (ibuf, imem) = match ctx.upload_device_local(
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(&CUBE_INDICES),
        ) {
            Ok(pair) => pair,
            Err(e) => {
                ctx.device.destroy_buffer(vbuf, None);
                ctx.device.free_memory(vmem, None);
                return Err(e);
            }
        };
        Ok(Mesh {
            vbuf,
            vmem,
            ibuf,
            imem,
            index_count: CUBE_INDICES.len() as u32,
        })
    }

    pub unsafe fn bind(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        device.cmd_bind_vertex_buffers(cmd, 0, std::slice::from_ref(&self.vbuf), &[0]);
        device.cmd_bind_index_buffer(cmd, self.ibuf, 0, vk::IndexType::UINT32);
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.destroy_buffer(self.vbuf, None);
        device.free_memory(self.vmem, None);
        device.destroy_buffer(self.ibuf, None);
        device.free_memory(self.imem, None);
    }
}
