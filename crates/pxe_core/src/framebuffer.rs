//! CPU-side pixel buffer that scripts draw into.
//!
//! Pixels are packed `u32` values in ARGB order (`0xAARRGGBB`). Read as
//! little-endian bytes that is B, G, R, A, which uploads into a `Bgra8`
//! texture. On little-endian hosts the byte views are free.

use std::borrow::Cow;

use glam::IVec2;

pub const OPAQUE_BLACK: u32 = 0xFF00_0000;

pub struct FrameBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl FrameBuffer {
    /// Allocate the buffer once. Its size never changes afterwards.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![OPAQUE_BLACK; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// Pixels as B, G, R, A bytes on any host.
    pub fn bgra_bytes(&self) -> Cow<'_, [u8]> {
        if cfg!(target_endian = "little") {
            Cow::Borrowed(bytemuck::cast_slice(&self.pixels))
        } else {
            Cow::Owned(self.pixels.iter().flat_map(|p| p.to_le_bytes()).collect())
        }
    }

    pub fn clear(&mut self, color: u32) {
        self.pixels.fill(color);
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    pub fn pixel(&self, x: i32, y: i32) -> Option<u32> {
        self.index(x, y).map(|i| self.pixels[i])
    }

    /// Out-of-range writes are dropped.
    pub fn set_pixel(&mut self, x: i32, y: i32, color: u32) {
        if let Some(i) = self.index(x, y) {
            self.pixels[i] = color;
        }
    }

    /// Clip `[origin, origin + size)` against the buffer. Returns the visible
    /// corners, or `None` when nothing is visible.
    fn clip(&self, origin: IVec2, size: IVec2) -> Option<(IVec2, IVec2)> {
        let bounds = IVec2::new(self.width as i32, self.height as i32);
        let min = origin.max(IVec2::ZERO);
        let max = origin.saturating_add(size).min(bounds);
        (max.x > min.x && max.y > min.y).then_some((min, max))
    }

    pub fn fill_rect(&mut self, x: i32, y: i32, w: i32, h: i32, color: u32) {
        let Some((min, max)) = self.clip(IVec2::new(x, y), IVec2::new(w, h)) else {
            return;
        };
        let stride = self.width as usize;
        for row in min.y..max.y {
            let start = row as usize * stride;
            self.pixels[start + min.x as usize..start + max.x as usize].fill(color);
        }
    }

    /// Copy a `src_width`-wide ARGB image to `(x, y)`, skipping pixels whose alpha is zero.
    pub fn blit_masked(&mut self, src: &[u32], src_width: u32, x: i32, y: i32) {
        if src_width == 0 {
            return;
        }
        let src_height = (src.len() / src_width as usize) as i32;
        let origin = IVec2::new(x, y);
        let Some((min, max)) = self.clip(origin, IVec2::new(src_width as i32, src_height))
        else {
            return;
        };
        let stride = self.width as usize;
        for row in min.y..max.y {
            let src_row = (row - origin.y) as usize * src_width as usize;
            for col in min.x..max.x {
                let color = src[src_row + (col - origin.x) as usize];
                if color >> 24 != 0 {
                    self.pixels[row as usize * stride + col as usize] = color;
                }
            }
        }
    }
}

/// Repack one ARGB pixel as ABGR: red and blue trade places, alpha and green stay.
pub fn argb_to_abgr(color: u32) -> u32 {
    let a = color & 0xFF00_0000;
    let r = (color >> 16) & 0xFF;
    let g = color & 0x0000_FF00;
    let b = color & 0xFF;
    a | (b << 16) | g | r
}

/// Rewrite `words` in place so their memory reads as little-endian bytes, and
/// return that byte view. A no-op on little-endian hosts.
pub fn words_to_le_bytes(words: &mut [u32]) -> &mut [u8] {
    for word in words.iter_mut() {
        *word = word.to_le();
    }
    bytemuck::cast_slice_mut(words)
}

/// Swizzle a whole frame into `dst`. Both slices must be the same length.
pub fn swizzle_frame(src: &[u32], dst: &mut [u32]) {
    debug_assert_eq!(src.len(), dst.len());
    for (out, &color) in dst.iter_mut().zip(src) {
        *out = argb_to_abgr(color);
    }
}
