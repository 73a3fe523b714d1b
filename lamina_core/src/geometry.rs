// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Integer pixel-space geometry.
//!
//! View bounds, popup positions, and scale factors are expressed in
//! device-independent pixels using [`kurbo`] types. Buffers, damage, and
//! bitmaps live in *physical* pixels, where coordinates are integral. The
//! conversions in this module are the only place the two spaces meet:
//!
//! - [`PixelSize::from_dip`] ceils, so a surface always covers its view.
//! - [`PixelRect::enclosing`] floors the origin and ceils the far edge, so a
//!   damage rectangle never loses coverage.
//! - [`PixelRect::rounded`] rounds every edge, matching how overlay views lay
//!   out their backing stores.

use core::fmt;

use kurbo::{Rect, Size};

/// A width and height in physical pixels.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PixelSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl PixelSize {
    /// The empty size.
    pub const ZERO: Self = Self::new(0, 0);

    /// Creates a size from a width and height.
    #[inline]
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns `true` if either dimension is zero.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of pixels covered by this size.
    #[inline]
    #[must_use]
    pub const fn area(self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Converts a device-independent size to pixels, rounding each dimension
    /// up.
    #[must_use]
    pub fn from_dip(size: Size, scale: f64) -> Self {
        let scaled = (size * scale).ceil();
        Self::new(to_pixel_extent(scaled.width), to_pixel_extent(scaled.height))
    }

    /// Returns the size in device-independent units at the given scale.
    #[must_use]
    pub fn to_dip(self, scale: f64) -> Size {
        if scale <= 0.0 {
            return Size::ZERO;
        }
        Size::new(f64::from(self.width) / scale, f64::from(self.height) / scale)
    }
}

impl fmt::Debug for PixelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An axis-aligned rectangle in physical pixels.
///
/// Empty rectangles compare equal to one another only if all fields match;
/// use [`is_empty`](Self::is_empty) to test for emptiness.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PixelRect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl PixelRect {
    /// The empty rectangle at the origin.
    pub const ZERO: Self = Self::new(0, 0, 0, 0);

    /// Creates a rectangle from its origin and extent.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Creates a rectangle at the origin covering `size`.
    #[inline]
    #[must_use]
    pub const fn from_size(size: PixelSize) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    /// Returns the extent of this rectangle.
    #[inline]
    #[must_use]
    pub const fn size(self) -> PixelSize {
        PixelSize::new(self.width, self.height)
    }

    /// Returns `true` if the rectangle covers no pixels.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Exclusive right edge.
    #[inline]
    #[must_use]
    pub const fn right(self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Exclusive bottom edge.
    #[inline]
    #[must_use]
    pub const fn bottom(self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Returns the rectangle translated by `(dx, dy)`.
    #[inline]
    #[must_use]
    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.width,
            self.height,
        )
    }

    /// Smallest rectangle containing both `self` and `other`.
    ///
    /// An empty operand contributes nothing.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        if other.is_empty() {
            return self;
        }
        if self.is_empty() {
            return other;
        }
        let x0 = i64::from(self.x.min(other.x));
        let y0 = i64::from(self.y.min(other.y));
        let x1 = self.right().max(other.right());
        let y1 = self.bottom().max(other.bottom());
        Self::from_edges(x0, y0, x1, y1)
    }

    /// Overlap of `self` and `other`, or [`ZERO`](Self::ZERO) if they are
    /// disjoint.
    #[must_use]
    pub fn intersect(self, other: Self) -> Self {
        let x0 = i64::from(self.x.max(other.x));
        let y0 = i64::from(self.y.max(other.y));
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            return Self::ZERO;
        }
        Self::from_edges(x0, y0, x1, y1)
    }

    /// Returns `true` if `other` lies entirely within `self`.
    ///
    /// Every rectangle contains the empty rectangle.
    #[must_use]
    pub fn contains_rect(self, other: Self) -> bool {
        if other.is_empty() {
            return true;
        }
        i64::from(other.x) >= i64::from(self.x)
            && i64::from(other.y) >= i64::from(self.y)
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Returns `true` if the pixel at `(x, y)` lies within `self`.
    #[must_use]
    pub fn contains(self, x: i32, y: i32) -> bool {
        x >= self.x
            && y >= self.y
            && i64::from(x) < self.right()
            && i64::from(y) < self.bottom()
    }

    /// Converts a device-independent rectangle to the smallest pixel
    /// rectangle that encloses it at `scale`.
    #[must_use]
    pub fn enclosing(rect: Rect, scale: f64) -> Self {
        let r = rect.abs().scale_from_origin(scale).expand();
        Self::from_float_edges(r.x0, r.y0, r.x1, r.y1)
    }

    /// Converts a device-independent rectangle to pixels at `scale`, rounding
    /// each edge to the nearest pixel.
    #[must_use]
    pub fn rounded(rect: Rect, scale: f64) -> Self {
        let r = rect.abs().scale_from_origin(scale).round();
        Self::from_float_edges(r.x0, r.y0, r.x1, r.y1)
    }

    /// Returns this rectangle as a [`kurbo::Rect`] in the same units.
    #[must_use]
    pub fn to_rect(self) -> Rect {
        Rect::new(
            f64::from(self.x),
            f64::from(self.y),
            self.right() as f64,
            self.bottom() as f64,
        )
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "edges are clamped into the i32/u32 range before narrowing"
    )]
    fn from_edges(x0: i64, y0: i64, x1: i64, y1: i64) -> Self {
        let x0 = x0.clamp(i64::from(i32::MIN), i64::from(i32::MAX));
        let y0 = y0.clamp(i64::from(i32::MIN), i64::from(i32::MAX));
        let w = (x1 - x0).clamp(0, i64::from(u32::MAX));
        let h = (y1 - y0).clamp(0, i64::from(u32::MAX));
        Self::new(x0 as i32, y0 as i32, w as u32, h as u32)
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "float edges are already integral and saturate on conversion"
    )]
    fn from_float_edges(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self::from_edges(x0 as i64, y0 as i64, x1 as i64, y1 as i64)
    }
}

impl fmt::Debug for PixelRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}) {}x{}",
            self.x, self.y, self.width, self.height
        )
    }
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "value is integral and clamped into the u32 range first"
)]
fn to_pixel_extent(v: f64) -> u32 {
    if v.is_nan() || v <= 0.0 {
        0
    } else if v >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        v as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_ignores_empty() {
        let a = PixelRect::new(10, 10, 20, 20);
        assert_eq!(a.union(PixelRect::ZERO), a, "empty rhs is identity");
        assert_eq!(PixelRect::ZERO.union(a), a, "empty lhs is identity");
    }

    #[test]
    fn union_covers_both() {
        let a = PixelRect::new(0, 0, 10, 10);
        let b = PixelRect::new(20, 5, 5, 30);
        let u = a.union(b);
        assert_eq!(u, PixelRect::new(0, 0, 25, 35), "bounding box");
        assert!(u.contains_rect(a) && u.contains_rect(b), "covers operands");
    }

    #[test]
    fn intersect_clamps_to_bounds() {
        let bounds = PixelRect::from_size(PixelSize::new(100, 100));
        let r = PixelRect::new(-5, 90, 20, 20);
        assert_eq!(r.intersect(bounds), PixelRect::new(0, 90, 15, 10), "clipped");
        let far = PixelRect::new(200, 200, 5, 5);
        assert!(far.intersect(bounds).is_empty(), "disjoint is empty");
    }

    #[test]
    fn enclosing_expands_fractional_edges() {
        let r = Rect::new(10.2, 10.5, 20.1, 20.9);
        assert_eq!(
            PixelRect::enclosing(r, 1.0),
            PixelRect::new(10, 10, 11, 11),
            "floor origin, ceil far edge"
        );
        assert_eq!(
            PixelRect::enclosing(Rect::new(10.0, 10.0, 30.0, 30.0), 1.5),
            PixelRect::new(15, 15, 30, 30),
            "scaled by device factor"
        );
    }

    #[test]
    fn rounded_rounds_each_edge() {
        let r = Rect::new(0.0, 0.0, 33.0, 10.0);
        assert_eq!(
            PixelRect::rounded(r, 1.5),
            PixelRect::new(0, 0, 50, 15),
            "49.5 rounds up"
        );
    }

    #[test]
    fn from_dip_ceils() {
        assert_eq!(
            PixelSize::from_dip(Size::new(100.0, 33.0), 1.5),
            PixelSize::new(150, 50),
            "49.5 ceils to 50"
        );
        assert_eq!(
            PixelSize::from_dip(Size::new(-4.0, 3.0), 1.0),
            PixelSize::new(0, 3),
            "negative extents clamp to zero"
        );
    }

    #[test]
    fn contains_point_is_half_open() {
        let r = PixelRect::new(10, 10, 20, 20);
        assert!(r.contains(10, 10), "top-left inclusive");
        assert!(r.contains(29, 29), "last pixel inside");
        assert!(!r.contains(30, 15), "right edge exclusive");
    }
}
