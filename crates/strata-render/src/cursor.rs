// SPDX-License-Identifier: CEPL-1.0

/// Which frame slot the next frame records into.
///
/// Advances round-robin over `[0, count)` after every submitted frame, no
/// matter which surface image was acquired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameCursor {
    index: usize,
    count: usize,
}

impl FrameCursor {
    /// `count` is the frames-in-flight setting and is never zero.
    pub fn new(count: usize) -> Self {
        debug_assert!(count > 0);
        Self {
            index: 0,
            count: count.max(1),
        }
    }

    #[inline]
    pub fn current(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn advance(&mut self) {
        self.index = (self.index + 1) % self.count;
    }
}
