// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Surface and host configuration.

use crate::bitmap::WHITE;
use crate::buffer::{BufferFormat, ColorSpace, SurfaceHandle};
use crate::geometry::PixelSize;

/// Parameters for an [`OverlaySurface`](crate::surface::OverlaySurface) and
/// its buffer queue.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceConfig {
    /// Size the surface is reshaped to on construction.
    pub initial_size: PixelSize,
    /// Scale factor applied on construction.
    pub initial_scale: f32,
    /// Pixel format of every buffer.
    pub format: BufferFormat,
    /// Color space of every buffer.
    pub color_space: ColorSpace,
    /// Whether buffers carry alpha.
    pub has_alpha: bool,
    /// Upper bound on buffers in rotation (current, in flight, displayed, and
    /// available together).
    pub max_buffers: u32,
    /// Native presentation target, or [`SurfaceHandle::NULL`] off-screen.
    pub surface: SurfaceHandle,
}

impl SurfaceConfig {
    /// Triple-buffered RGBA sRGB, starting at 50×50.
    pub const DEFAULT: Self = Self {
        initial_size: PixelSize::new(50, 50),
        initial_scale: 1.0,
        format: BufferFormat::Rgba8888,
        color_space: ColorSpace::Srgb,
        has_alpha: true,
        max_buffers: 3,
        surface: SurfaceHandle::NULL,
    };

    /// Double-buffered variant: one buffer on display, one being painted.
    #[must_use]
    pub const fn low_latency() -> Self {
        Self {
            max_buffers: 2,
            ..Self::DEFAULT
        }
    }
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Parameters for an [`OffscreenHost`](crate::host::OffscreenHost).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HostConfig {
    /// Frame rate new root views start at.
    pub default_frame_rate: u32,
    /// Lowest accepted frame rate.
    pub min_frame_rate: u32,
    /// Highest accepted frame rate.
    pub max_frame_rate: u32,
    /// Background painted behind content, as premultiplied `0xAARRGGBB`.
    pub background_color: u32,
    /// Whether delivered frames keep their alpha channel.
    pub transparent: bool,
    /// Template for each view's surface. Its initial size and scale are
    /// replaced by the view's own.
    pub surface: SurfaceConfig,
}

impl HostConfig {
    /// 60 Hz within 1..=240, opaque white background, default surfaces.
    pub const DEFAULT: Self = Self {
        default_frame_rate: 60,
        min_frame_rate: 1,
        max_frame_rate: 240,
        background_color: WHITE,
        transparent: false,
        surface: SurfaceConfig::DEFAULT,
    };

    /// Clamps `rate` into the accepted range.
    #[must_use]
    pub fn clamp_frame_rate(&self, rate: u32) -> u32 {
        rate.clamp(self.min_frame_rate, self.max_frame_rate)
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rate_is_clamped() {
        let c = HostConfig::DEFAULT;
        assert_eq!(c.clamp_frame_rate(0), 1, "floor");
        assert_eq!(c.clamp_frame_rate(1000), 240, "ceiling");
        assert_eq!(c.clamp_frame_rate(30), 30, "in range");
    }

    #[test]
    fn low_latency_differs_only_in_depth() {
        let l = SurfaceConfig::low_latency();
        assert_eq!(l.max_buffers, 2, "double buffered");
        assert_eq!(l.initial_size, SurfaceConfig::DEFAULT.initial_size, "same size");
    }
}
