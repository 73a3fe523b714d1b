// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! GPU command-layer contract.
//!
//! [`GpuContext`] is the narrow set of commands an
//! [`OverlaySurface`](crate::surface::OverlaySurface) issues: framebuffer and
//! texture management, shared-image access scoping, overlay scheduling, and
//! fences. Backend crates implement it over a real device; tests implement it
//! with a recording fake.
//!
//! Contexts are shared behind `Rc` and every method takes `&self`. Sharing is
//! for issuing commands only; no two owners ever restructure the same buffer
//! queue.

use core::fmt;

use kurbo::{Affine, Rect};

use crate::buffer::{BufferFormat, BufferHandle, BufferUsage, ColorSpace};
use crate::geometry::PixelSize;
use crate::sync::SyncToken;

/// Names a framebuffer object in a [`GpuContext`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub u32);

/// Names a texture in a [`GpuContext`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// Texture binding point a buffer must be attached through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    /// Ordinary 2D texture.
    Texture2d,
    /// Rectangle texture (IOSurface-style buffers).
    Rectangle,
    /// External image (platform video/overlay memory).
    External,
}

/// How a texture wrapping a shared image will be accessed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    /// Sampling only.
    Read,
    /// Rendering into and sampling.
    ReadWrite,
}

/// Filtering used when an overlay is scaled to its bounds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverlayFilter {
    /// Nearest-neighbor.
    #[default]
    Nearest,
    /// Bilinear.
    Linear,
}

/// Per-quad state shared by overlay layers scheduled together.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OverlaySharedState {
    /// Layer opacity in `0.0..=1.0`.
    pub opacity: f32,
    /// Clip rectangle in surface pixels, or `None` for unclipped.
    pub clip: Option<Rect>,
    /// Transform from layer space to surface space.
    pub transform: Affine,
}

impl OverlaySharedState {
    /// Fully opaque, unclipped, untransformed.
    pub const IDENTITY: Self = Self {
        opacity: 1.0,
        clip: None,
        transform: Affine::IDENTITY,
    };
}

/// One hardware-composited rectangle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OverlayPlane {
    /// Texture to present, or `None` to present only the background.
    pub texture: Option<TextureId>,
    /// Sub-rectangle of the texture in normalized coordinates.
    pub contents_rect: Rect,
    /// Destination rectangle in surface pixels.
    pub bounds: Rect,
    /// Color painted behind the texture, as premultiplied `0xAARRGGBB`.
    pub background_color: u32,
    /// Scaling filter.
    pub filter: OverlayFilter,
    /// Shared quad state.
    pub shared: OverlaySharedState,
}

/// Why a GPU command failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GpuError {
    /// The context was lost; the owner must recreate every surface.
    ContextLost,
    /// An object could not be created.
    OutOfResources,
    /// A draw targeted a texture with no write access scope open.
    NoWriteAccess,
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContextLost => f.write_str("GPU context lost"),
            Self::OutOfResources => f.write_str("GPU object allocation failed"),
            Self::NoWriteAccess => f.write_str("draw outside a write access scope"),
        }
    }
}

impl core::error::Error for GpuError {}

/// Commands an off-screen surface issues against the GPU.
pub trait GpuContext {
    /// Creates a framebuffer object.
    fn gen_framebuffer(&self) -> Result<FramebufferId, GpuError>;

    /// Deletes a framebuffer object.
    fn delete_framebuffer(&self, fbo: FramebufferId);

    /// Binds `fbo` as the draw target, or the default target for `None`.
    fn bind_framebuffer(&self, fbo: Option<FramebufferId>);

    /// Attaches `texture` as color attachment 0 of the bound framebuffer, or
    /// detaches it for `None`.
    fn attach_color_texture(&self, target: TextureTarget, texture: Option<TextureId>);

    /// Creates a texture that aliases the shared image `buffer`.
    fn create_texture_for_shared_image(&self, buffer: BufferHandle) -> Result<TextureId, GpuError>;

    /// Deletes a texture.
    fn delete_texture(&self, texture: TextureId);

    /// Opens a shared-image access scope on `texture`.
    fn begin_shared_image_access(&self, texture: TextureId, mode: AccessMode);

    /// Closes the access scope opened by
    /// [`begin_shared_image_access`](Self::begin_shared_image_access).
    fn end_shared_image_access(&self, texture: TextureId);

    /// Schedules `plane` for presentation on the next swap.
    fn schedule_overlay(&self, plane: &OverlayPlane);

    /// Fence at the current position in this context's command stream.
    fn gen_unverified_sync_token(&self) -> SyncToken;

    /// Enqueues a GPU-side wait on `token`. An empty token is ignored.
    fn wait_sync_token(&self, token: &SyncToken);

    /// Resizes the native surface backing the context.
    fn resize(&self, size: PixelSize, scale: f32, color_space: ColorSpace, has_alpha: bool);

    /// Binding point for buffers allocated with `usage` and `format`.
    fn buffer_texture_target(&self, usage: BufferUsage, format: BufferFormat) -> TextureTarget;
}
