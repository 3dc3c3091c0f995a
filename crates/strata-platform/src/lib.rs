// SPDX-License-Identifier: CEPL-1.0
//! Windowing for the app. The renderer never sees winit types, only the
//! raw handles winit hands out.
pub use winit;

use winit::dpi::PhysicalSize;

/// Client-area size in physical pixels, as reported by the window.
pub fn client_size(size: PhysicalSize<u32>) -> (u32, u32) {
    (size.width, size.height)
}

/// A window reports zero area while minimized on most platforms.
pub fn is_zero_area(size: PhysicalSize<u32>) -> bool {
    size.width == 0 || size.height == 0
}
