// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! CPU pixel buffers.
//!
//! A [`Bitmap`] is the raw-pixel currency of the compositor: the renderer
//! paints into one, popups and proxy views hand theirs over by value, and
//! [`PaintSink::on_paint`](crate::delivery::PaintSink::on_paint) receives the
//! merged result. Pixels are premultiplied `0xAARRGGBB` words stored row-major
//! with no padding.

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::geometry::{PixelRect, PixelSize};

/// Fully transparent.
pub const TRANSPARENT: u32 = 0x0000_0000;
/// Opaque black.
pub const BLACK: u32 = 0xFF00_0000;
/// Opaque white.
pub const WHITE: u32 = 0xFFFF_FFFF;

/// A row-major premultiplied ARGB pixel buffer.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    size: PixelSize,
    pixels: Vec<u32>,
}

impl Bitmap {
    /// Creates a transparent bitmap of the given size.
    #[must_use]
    pub fn new(size: PixelSize) -> Self {
        Self::filled(size, TRANSPARENT)
    }

    /// Creates a bitmap with every pixel set to `color`.
    #[must_use]
    pub fn filled(size: PixelSize, color: u32) -> Self {
        Self {
            size,
            pixels: vec![color; size.area()],
        }
    }

    /// Wraps existing pixel storage.
    ///
    /// Returns `None` if `pixels` does not hold exactly `size.area()` words.
    #[must_use]
    pub fn from_pixels(size: PixelSize, pixels: Vec<u32>) -> Option<Self> {
        (pixels.len() == size.area()).then_some(Self { size, pixels })
    }

    /// Size of the bitmap in pixels.
    #[inline]
    #[must_use]
    pub fn size(&self) -> PixelSize {
        self.size
    }

    /// Returns `true` if the bitmap has no pixels to draw.
    #[inline]
    #[must_use]
    pub fn draws_nothing(&self) -> bool {
        self.size.is_empty()
    }

    /// Returns the pixel at `(x, y)`, or `None` if out of bounds.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.size.width as usize + x as usize)
            .copied()
    }

    /// Pixel words in row-major order.
    #[inline]
    #[must_use]
    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// Mutable pixel words in row-major order.
    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [u32] {
        &mut self.pixels
    }

    /// Raw pixel bytes in native byte order.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    /// Sets every pixel inside `rect` to `color`, clipped to the bitmap.
    pub fn fill_rect(&mut self, rect: PixelRect, color: u32) {
        let clipped = rect.intersect(PixelRect::from_size(self.size));
        if clipped.is_empty() {
            return;
        }
        let stride = self.size.width as usize;
        let x0 = clipped.x.unsigned_abs() as usize;
        let y0 = clipped.y.unsigned_abs() as usize;
        for row in y0..y0 + clipped.height as usize {
            let start = row * stride + x0;
            self.pixels[start..start + clipped.width as usize].fill(color);
        }
    }

    /// Copies `src` into this bitmap with its top-left corner at `(x, y)`.
    ///
    /// Pixels are replaced, not blended. Parts of `src` that fall outside the
    /// destination are discarded. Returns the destination rectangle that was
    /// written, which is empty if nothing overlapped.
    pub fn write_pixels(&mut self, src: &Self, x: i32, y: i32) -> PixelRect {
        let target = PixelRect::new(x, y, src.size.width, src.size.height);
        let clipped = target.intersect(PixelRect::from_size(self.size));
        if clipped.is_empty() {
            return PixelRect::ZERO;
        }
        let dst_stride = self.size.width as usize;
        let src_stride = src.size.width as usize;
        // Offset of the clipped region within `src`; non-negative by construction.
        let sx = (i64::from(clipped.x) - i64::from(x)).unsigned_abs() as usize;
        let sy = (i64::from(clipped.y) - i64::from(y)).unsigned_abs() as usize;
        let dx = clipped.x.unsigned_abs() as usize;
        let dy = clipped.y.unsigned_abs() as usize;
        let w = clipped.width as usize;
        for row in 0..clipped.height as usize {
            let s = (sy + row) * src_stride + sx;
            let d = (dy + row) * dst_stride + dx;
            self.pixels[d..d + w].copy_from_slice(&src.pixels[s..s + w]);
        }
        clipped
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_pixels_checks_length() {
        let size = PixelSize::new(2, 2);
        assert!(Bitmap::from_pixels(size, vec![0; 4]).is_some(), "exact fit");
        assert!(Bitmap::from_pixels(size, vec![0; 3]).is_none(), "short");
    }

    #[test]
    fn write_pixels_clips_to_destination() {
        let mut dst = Bitmap::filled(PixelSize::new(4, 4), BLACK);
        let src = Bitmap::filled(PixelSize::new(3, 3), WHITE);
        let written = dst.write_pixels(&src, 2, -1);
        assert_eq!(written, PixelRect::new(2, 0, 2, 2), "clipped on two sides");
        assert_eq!(dst.pixel(3, 1), Some(WHITE), "inside overlap");
        assert_eq!(dst.pixel(1, 1), Some(BLACK), "left of overlap");
        assert_eq!(dst.pixel(3, 2), Some(BLACK), "below overlap");
    }

    #[test]
    fn write_pixels_disjoint_is_noop() {
        let mut dst = Bitmap::filled(PixelSize::new(4, 4), BLACK);
        let src = Bitmap::filled(PixelSize::new(2, 2), WHITE);
        assert!(dst.write_pixels(&src, 10, 10).is_empty(), "nothing written");
        assert!(dst.pixels().iter().all(|&p| p == BLACK), "untouched");
    }

    #[test]
    fn fill_rect_clips() {
        let mut bmp = Bitmap::new(PixelSize::new(3, 3));
        bmp.fill_rect(PixelRect::new(-1, -1, 2, 2), WHITE);
        assert_eq!(bmp.pixel(0, 0), Some(WHITE), "overlap filled");
        assert_eq!(bmp.pixel(1, 1), Some(TRANSPARENT), "outside untouched");
    }

    #[test]
    fn bytes_view_matches_pixel_count() {
        let bmp = Bitmap::filled(PixelSize::new(5, 2), WHITE);
        assert_eq!(bmp.as_bytes().len(), 40, "four bytes per pixel");
    }
}
