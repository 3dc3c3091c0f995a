// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};
use strata_math::Camera;

use crate::RenderSize;

/// Per-frame uniform block, binding 0 of set 0 in the vertex shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub mvp: [[f32; 4]; 4],
}

impl FrameUniforms {
    pub fn spinning(camera: &Camera, elapsed: f32, extent: RenderSize) -> Self {
        let mvp = strata_math::spin_mvp(camera, elapsed, extent.width, extent.height);
        Self {
            mvp: mvp.to_cols_array_2d(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}
