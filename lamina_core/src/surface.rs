// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Framebuffer-backed off-screen surface.
//!
//! An [`OverlaySurface`] owns one framebuffer object and a
//! [`BufferQueue`]. Binding attaches a texture aliasing the queue's current
//! buffer as the framebuffer's color target, so whatever the renderer draws
//! lands in that buffer. Swapping schedules the buffer as a full-surface
//! overlay, hands it to the queue, and immediately binds the next one.
//!
//! Textures are created lazily, one per buffer, and cached by handle. A
//! reshape that invalidates the queue's buffers empties the cache in the same
//! call, so the cache never names a dead buffer.
//!
//! Teardown order is fixed: framebuffer, then cached textures, then buffers.
//! The buffer queue goes last because destroying buffers needs fences, which
//! this surface provides.

use alloc::rc::Rc;
use core::fmt;

use hashbrown::HashMap;
use kurbo::Rect;

use crate::bitmap::BLACK;
use crate::buffer::{AllocError, BufferHandle, BufferUsage, SharedImageInterface};
use crate::buffer_queue::BufferQueue;
use crate::config::SurfaceConfig;
use crate::geometry::{PixelRect, PixelSize};
use crate::gpu::{
    AccessMode, FramebufferId, GpuContext, GpuError, OverlayFilter, OverlayPlane,
    OverlaySharedState, TextureId, TextureTarget,
};
use crate::sync::{SyncToken, SyncTokenProvider};

/// Why a surface operation failed.
///
/// Every variant is fatal to the surface; the owner is expected to drop it
/// and build a new one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceError {
    /// A buffer could not be allocated.
    Alloc(AllocError),
    /// The GPU context failed.
    Gpu(GpuError),
    /// The surface has no buffer to render into (zero size, or every buffer
    /// is busy) at construction time.
    NoBuffer,
    /// The surface was already torn down.
    Destroyed,
}

impl fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alloc(e) => write!(f, "buffer allocation failed: {e}"),
            Self::Gpu(e) => write!(f, "GPU command failed: {e}"),
            Self::NoBuffer => f.write_str("no buffer available to bind"),
            Self::Destroyed => f.write_str("surface already destroyed"),
        }
    }
}

impl core::error::Error for SurfaceError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Alloc(e) => Some(e),
            Self::Gpu(e) => Some(e),
            Self::NoBuffer | Self::Destroyed => None,
        }
    }
}

impl From<AllocError> for SurfaceError {
    fn from(e: AllocError) -> Self {
        Self::Alloc(e)
    }
}

impl From<GpuError> for SurfaceError {
    fn from(e: GpuError) -> Self {
        Self::Gpu(e)
    }
}

/// The buffer and texture the framebuffer renders into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Binding {
    /// Buffer receiving paint.
    pub buffer: BufferHandle,
    /// Texture aliasing the buffer.
    pub texture: TextureId,
    /// `true` if the texture was created by this bind.
    pub texture_created: bool,
    /// `true` if the buffer was allocated by this bind.
    pub buffer_allocated: bool,
}

/// Result of [`OverlaySurface::swap_buffers`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Swap {
    /// Buffer handed to the display pipeline, or `None` if nothing was bound.
    pub presented: Option<BufferHandle>,
    /// Binding for the next frame, or `None` if no buffer was free.
    pub rebound: Option<Binding>,
}

/// Fence source that reads straight from the GPU context.
///
/// Lets the buffer queue borrow fences while the surface is mutably borrowed.
struct ContextTokens<'a, C>(&'a C);

impl<C: GpuContext> SyncTokenProvider for ContextTokens<'_, C> {
    fn gen_sync_token(&self) -> SyncToken {
        self.0.gen_unverified_sync_token()
    }
}

/// An off-screen render target backed by a rotating set of shared buffers.
pub struct OverlaySurface<C: GpuContext, S: SharedImageInterface> {
    context: Rc<C>,
    buffer_queue: Option<BufferQueue<S>>,
    fbo: Option<FramebufferId>,
    textures: HashMap<BufferHandle, TextureId>,
    /// Texture attached to the framebuffer with shared access open.
    current_texture: Option<TextureId>,
    last_bound: Option<(BufferHandle, TextureId)>,
    texture_target: Option<TextureTarget>,
    config: SurfaceConfig,
    size: PixelSize,
    scale: f32,
}

impl<C: GpuContext, S: SharedImageInterface> fmt::Debug for OverlaySurface<C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlaySurface")
            .field("fbo", &self.fbo)
            .field("size", &self.size)
            .field("scale", &self.scale)
            .field("current_texture", &self.current_texture)
            .field("cached_textures", &self.textures.len())
            .field("buffer_queue", &self.buffer_queue)
            .finish_non_exhaustive()
    }
}

impl<C: GpuContext, S: SharedImageInterface> OverlaySurface<C, S> {
    /// Creates a surface, reshapes it to `config.initial_size`, and binds its
    /// first buffer.
    ///
    /// Fails if the framebuffer or the first buffer cannot be created. Nothing
    /// allocated along the way outlives the error.
    pub fn new(
        context: Rc<C>,
        shared_images: Rc<S>,
        config: SurfaceConfig,
    ) -> Result<Self, SurfaceError> {
        let fbo = context.gen_framebuffer()?;
        let buffer_queue = BufferQueue::new(shared_images, config.surface, config.max_buffers);
        let mut surface = Self {
            context,
            buffer_queue: Some(buffer_queue),
            fbo: Some(fbo),
            textures: HashMap::new(),
            current_texture: None,
            last_bound: None,
            texture_target: None,
            config,
            size: PixelSize::ZERO,
            scale: 0.0,
        };
        surface.reshape(config.initial_size, config.initial_scale);
        match surface.bind_framebuffer()? {
            Some(_) => Ok(surface),
            None => Err(SurfaceError::NoBuffer),
        }
    }

    /// Commits a new size and scale.
    ///
    /// Returns `true` if the buffer queue discarded its buffers. In that case
    /// the current texture is detached and every cached texture is deleted;
    /// the next [`bind_framebuffer`](Self::bind_framebuffer) starts over.
    ///
    /// # Panics
    ///
    /// Panics if the surface has been destroyed.
    pub fn reshape(&mut self, size: PixelSize, scale: f32) -> bool {
        let fbo = self.live_fbo();
        let Some(queue) = self.buffer_queue.as_mut() else {
            unreachable!("buffer queue outlives the framebuffer");
        };
        self.context
            .resize(size, scale, self.config.color_space, self.config.has_alpha);
        let freed = queue.reshape(
            size,
            self.config.color_space,
            self.config.format,
            &ContextTokens(&*self.context),
        );
        self.size = size;
        self.scale = scale;
        if freed {
            self.context.bind_framebuffer(Some(fbo));
            if let Some(target) = self.texture_target {
                self.context.attach_color_texture(target, None);
                if let Some(texture) = self.current_texture {
                    self.context.end_shared_image_access(texture);
                }
                for (_, texture) in self.textures.drain() {
                    self.context.delete_texture(texture);
                }
            }
            self.current_texture = None;
            self.last_bound = None;
        }
        self.texture_target = Some(
            self.context
                .buffer_texture_target(BufferUsage::PRESENTABLE, self.config.format),
        );
        freed
    }

    /// Binds the framebuffer, attaching the current buffer if nothing is
    /// attached yet.
    ///
    /// Idempotent: with a texture already attached this only rebinds the
    /// framebuffer and reports the existing binding. Returns `Ok(None)` if
    /// the buffer queue has no buffer to give out this frame.
    pub fn bind_framebuffer(&mut self) -> Result<Option<Binding>, SurfaceError> {
        let fbo = self.fbo.ok_or(SurfaceError::Destroyed)?;
        self.context.bind_framebuffer(Some(fbo));
        if let (Some(texture), Some((buffer, _))) = (self.current_texture, self.last_bound) {
            return Ok(Some(Binding {
                buffer,
                texture,
                texture_created: false,
                buffer_allocated: false,
            }));
        }

        let queue = self.buffer_queue.as_mut().ok_or(SurfaceError::Destroyed)?;
        let Some(current) = queue.current_buffer()? else {
            return Ok(None);
        };
        self.context.wait_sync_token(&current.creation_token);

        let (texture, texture_created) = match self.textures.get(&current.handle) {
            Some(&texture) => (texture, false),
            None => {
                let texture = self.context.create_texture_for_shared_image(current.handle)?;
                self.textures.insert(current.handle, texture);
                (texture, true)
            }
        };
        self.context
            .begin_shared_image_access(texture, AccessMode::ReadWrite);
        self.context.attach_color_texture(
            self.texture_target.unwrap_or(TextureTarget::Texture2d),
            Some(texture),
        );
        self.current_texture = Some(texture);
        self.last_bound = Some((current.handle, texture));
        Ok(Some(Binding {
            buffer: current.handle,
            texture,
            texture_created,
            buffer_allocated: current.newly_allocated,
        }))
    }

    /// Presents the bound buffer and binds the next one.
    ///
    /// Schedules a full-surface overlay, closes shared access, unbinds the
    /// framebuffer, advances the queue, and rebinds, all before returning.
    pub fn swap_buffers(&mut self) -> Result<Swap, SurfaceError> {
        if self.fbo.is_none() {
            return Err(SurfaceError::Destroyed);
        }
        self.context.schedule_overlay(&OverlayPlane {
            texture: self.current_texture,
            contents_rect: Rect::new(0.0, 0.0, 1.0, 1.0),
            bounds: PixelRect::from_size(self.size).to_rect(),
            background_color: BLACK,
            filter: OverlayFilter::Nearest,
            shared: OverlaySharedState::IDENTITY,
        });

        let mut presented = None;
        if let Some(texture) = self.current_texture.take() {
            self.context.end_shared_image_access(texture);
            self.context.bind_framebuffer(None);
            presented = self.last_bound.map(|(buffer, _)| buffer);
        }
        let damage = PixelRect::from_size(self.size);
        if let Some(queue) = self.buffer_queue.as_mut() {
            queue.swap_buffers(damage);
        }

        let rebound = self.bind_framebuffer()?;
        Ok(Swap { presented, rebound })
    }

    /// Tells the buffer queue the oldest swap has been presented.
    ///
    /// Returns the buffer now on display. A no-op without an outstanding swap.
    pub fn swap_buffers_complete(&mut self) -> Option<BufferHandle> {
        self.buffer_queue.as_mut()?.page_flip_complete()
    }

    /// Tears the surface down: framebuffer, then textures, then buffers.
    ///
    /// Calling this again is a no-op.
    pub fn destroy(&mut self) {
        let Some(fbo) = self.fbo else {
            return;
        };
        if let Some(texture) = self.current_texture.take() {
            self.context.end_shared_image_access(texture);
        }
        self.context.bind_framebuffer(None);
        self.context.delete_framebuffer(fbo);
        for (_, texture) in self.textures.drain() {
            self.context.delete_texture(texture);
        }
        self.last_bound = None;
        if let Some(mut queue) = self.buffer_queue.take() {
            // Still a valid fence source here: the context is alive and the
            // framebuffer handle has not been cleared yet.
            queue.release_all(&ContextTokens(&*self.context));
        }
        self.fbo = None;
    }

    /// Returns `true` once [`destroy`](Self::destroy) has run.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.fbo.is_none()
    }

    /// Size committed by the last reshape.
    #[must_use]
    pub fn size(&self) -> PixelSize {
        self.size
    }

    /// Scale committed by the last reshape.
    #[must_use]
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Texture attached to the framebuffer.
    #[must_use]
    pub fn current_texture(&self) -> Option<TextureId> {
        self.current_texture
    }

    /// Buffer attached to the framebuffer.
    #[must_use]
    pub fn current_buffer(&self) -> Option<BufferHandle> {
        self.current_texture
            .and(self.last_bound)
            .map(|(buffer, _)| buffer)
    }

    /// Number of buffer textures in the cache.
    #[must_use]
    pub fn cached_texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Region of the bound buffer that must be repainted this frame.
    #[must_use]
    pub fn current_buffer_damage(&self) -> PixelRect {
        self.buffer_queue
            .as_ref()
            .map_or(PixelRect::ZERO, BufferQueue::current_buffer_damage)
    }

    /// The underlying buffer queue, or `None` after teardown.
    #[must_use]
    pub fn buffer_queue(&self) -> Option<&BufferQueue<S>> {
        self.buffer_queue.as_ref()
    }

    /// The framebuffer object, or `None` after teardown.
    #[must_use]
    pub fn framebuffer(&self) -> Option<FramebufferId> {
        self.fbo
    }

    fn live_fbo(&self) -> FramebufferId {
        let Some(fbo) = self.fbo else {
            panic!("operation on a destroyed OverlaySurface");
        };
        fbo
    }
}

impl<C: GpuContext, S: SharedImageInterface> SyncTokenProvider for OverlaySurface<C, S> {
    /// Fresh unverified fence from the surface's context.
    ///
    /// # Panics
    ///
    /// Panics if the surface has been destroyed.
    fn gen_sync_token(&self) -> SyncToken {
        self.live_fbo();
        self.context.gen_unverified_sync_token()
    }
}

impl<C: GpuContext, S: SharedImageInterface> Drop for OverlaySurface<C, S> {
    fn drop(&mut self) {
        self.destroy();
    }
}
