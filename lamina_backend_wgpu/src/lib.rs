// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! wgpu backend for lamina surfaces.
//!
//! [`WgpuGpu`] implements both [`GpuContext`] and [`SharedImageInterface`]
//! over one wgpu device, so a single `Rc<WgpuGpu>` can back an
//! [`OverlaySurface`](lamina_core::surface::OverlaySurface) or an
//! [`OffscreenOutput`](lamina_core::output::OffscreenOutput).
//!
//! Shared images are plain 2D textures. Framebuffers and texture aliases are
//! bookkeeping over those textures; "rendering into the framebuffer" means
//! recording passes against the attached texture, as
//! [`clear_framebuffer`](WgpuGpu::clear_framebuffer) does. Sync tokens map to
//! queue flushes: generating one submits pending work. Waiting on one only
//! records the dependency, since the single queue already orders later work
//! after it; [`read_pixels`](WgpuGpu::read_pixels) is the one call that blocks.
//!
//! Overlays are recorded rather than scanned out; an embedder reads them back
//! with [`take_scheduled_overlays`](WgpuGpu::take_scheduled_overlays) and
//! [`read_pixels`](WgpuGpu::read_pixels).

use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::mpsc;

use hashbrown::{HashMap, HashSet};

use lamina_core::buffer::{
    AllocError, BufferFormat, BufferHandle, BufferUsage, ColorSpace, SharedImageInterface,
    SurfaceHandle,
};
use lamina_core::geometry::PixelSize;
use lamina_core::gpu::{
    AccessMode, FramebufferId, GpuContext, GpuError, OverlayPlane, TextureId, TextureTarget,
};
use lamina_core::sync::{CommandBufferNamespace, SyncToken};

/// Why a headless device could not be created.
#[derive(Debug)]
pub enum BackendError {
    /// No adapter matched the request.
    NoAdapter(wgpu::RequestAdapterError),
    /// The adapter refused to open a device.
    Device(wgpu::RequestDeviceError),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAdapter(e) => write!(f, "no wgpu adapter: {e}"),
            Self::Device(e) => write!(f, "wgpu device request failed: {e}"),
        }
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NoAdapter(e) => Some(e),
            Self::Device(e) => Some(e),
        }
    }
}

struct Image {
    texture: wgpu::Texture,
    size: PixelSize,
    color_space: ColorSpace,
}

/// A wgpu device exposed as a lamina GPU context and shared-image allocator.
pub struct WgpuGpu {
    device: wgpu::Device,
    queue: wgpu::Queue,
    command_buffer_id: u64,
    next_name: Cell<u128>,
    next_object: Cell<u32>,
    issued: Cell<u64>,
    waited: Cell<u64>,
    lost: Cell<bool>,
    images: RefCell<HashMap<BufferHandle, Image>>,
    textures: RefCell<HashMap<TextureId, BufferHandle>>,
    framebuffers: RefCell<HashMap<FramebufferId, Option<TextureId>>>,
    bound: Cell<Option<FramebufferId>>,
    open_access: RefCell<HashSet<TextureId>>,
    overlays: RefCell<Vec<OverlayPlane>>,
    surface_size: Cell<PixelSize>,
}

impl fmt::Debug for WgpuGpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuGpu")
            .field("images", &self.images.borrow().len())
            .field("textures", &self.textures.borrow().len())
            .field("framebuffers", &self.framebuffers.borrow().len())
            .field("issued", &self.issued.get())
            .field("waited", &self.waited.get())
            .field("lost", &self.lost.get())
            .finish_non_exhaustive()
    }
}

impl WgpuGpu {
    /// Wraps an existing device and queue.
    #[must_use]
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            command_buffer_id: 1,
            next_name: Cell::new(0),
            next_object: Cell::new(0),
            issued: Cell::new(0),
            waited: Cell::new(0),
            lost: Cell::new(false),
            images: RefCell::default(),
            textures: RefCell::default(),
            framebuffers: RefCell::default(),
            bound: Cell::new(None),
            open_access: RefCell::default(),
            overlays: RefCell::default(),
            surface_size: Cell::new(PixelSize::ZERO),
        }
    }

    /// Opens a device on any available adapter, without a window surface.
    pub async fn headless() -> Result<Self, BackendError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::LowPower,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(BackendError::NoAdapter)?;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("lamina.headless"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(BackendError::Device)?;
        Ok(Self::new(device, queue))
    }

    /// The underlying device.
    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// The underlying queue.
    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// The texture backing `buffer`.
    #[must_use]
    pub fn texture(&self, buffer: BufferHandle) -> Option<wgpu::Texture> {
        self.images.borrow().get(&buffer).map(|i| i.texture.clone())
    }

    /// Color space `buffer` was allocated with.
    #[must_use]
    pub fn color_space(&self, buffer: BufferHandle) -> Option<ColorSpace> {
        self.images.borrow().get(&buffer).map(|i| i.color_space)
    }

    /// Number of shared images alive.
    #[must_use]
    pub fn live_images(&self) -> usize {
        self.images.borrow().len()
    }

    /// Size last passed to [`GpuContext::resize`].
    #[must_use]
    pub fn surface_size(&self) -> PixelSize {
        self.surface_size.get()
    }

    /// Highest release count passed to [`GpuContext::wait_sync_token`].
    #[must_use]
    pub fn waited_release_count(&self) -> u64 {
        self.waited.get()
    }

    /// Returns `true` once the device has failed.
    #[must_use]
    pub fn is_lost(&self) -> bool {
        self.lost.get()
    }

    /// Overlays scheduled since the last call, oldest first.
    pub fn take_scheduled_overlays(&self) -> Vec<OverlayPlane> {
        core::mem::take(&mut *self.overlays.borrow_mut())
    }

    /// Clears the texture attached to the bound framebuffer to `color`
    /// (premultiplied `0xAARRGGBB`).
    ///
    /// Fails with [`GpuError::NoWriteAccess`] unless the texture is open for
    /// [`AccessMode::ReadWrite`].
    pub fn clear_framebuffer(&self, color: u32) -> Result<(), GpuError> {
        let texture = self
            .bound
            .get()
            .and_then(|fbo| self.framebuffers.borrow().get(&fbo).copied().flatten())
            .ok_or(GpuError::OutOfResources)?;
        if !self.open_access.borrow().contains(&texture) {
            return Err(GpuError::NoWriteAccess);
        }
        let buffer = self.buffer_for(texture)?;
        let target = self.texture(buffer).ok_or(GpuError::ContextLost)?;
        let view = target.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lamina.clear"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("lamina.clear.pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(argb_to_color(color)),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    /// Copies `buffer` back to the CPU as tightly packed 4-byte pixels.
    ///
    /// Blocks until the GPU has finished every earlier command.
    pub fn read_pixels(&self, buffer: BufferHandle) -> Result<Vec<u8>, GpuError> {
        let (texture, size) = {
            let images = self.images.borrow();
            let image = images.get(&buffer).ok_or(GpuError::OutOfResources)?;
            (image.texture.clone(), image.size)
        };
        // Allocation caps each side at the device limit, well below u32::MAX / 4.
        let row_bytes = size.width * 4;
        let padded_row = row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lamina.readback"),
            size: u64::from(padded_row) * u64::from(size.height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lamina.readback.encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(size.height),
                },
            },
            extent(size),
        );
        self.queue.submit(Some(encoder.finish()));

        let (sender, receiver) = mpsc::channel();
        readback
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                _ = sender.send(result);
            });
        self.wait_idle()?;
        match receiver.recv() {
            Ok(Ok(())) => {}
            _ => return Err(self.mark_lost()),
        }

        let mapped = readback.slice(..).get_mapped_range();
        let row_len = row_bytes as usize;
        let mut pixels = Vec::with_capacity(row_len * size.height as usize);
        for row in mapped.chunks(padded_row as usize) {
            pixels.extend_from_slice(&row[..row_len]);
        }
        drop(mapped);
        readback.unmap();
        Ok(pixels)
    }

    fn mark_lost(&self) -> GpuError {
        self.lost.set(true);
        GpuError::ContextLost
    }

    fn wait_idle(&self) -> Result<(), GpuError> {
        match self.device.poll(wgpu::PollType::wait_indefinitely()) {
            Ok(_) => Ok(()),
            Err(_) => Err(self.mark_lost()),
        }
    }

    fn buffer_for(&self, texture: TextureId) -> Result<BufferHandle, GpuError> {
        self.textures
            .borrow()
            .get(&texture)
            .copied()
            .ok_or(GpuError::OutOfResources)
    }

    fn next_object(&self) -> u32 {
        let id = self.next_object.get() + 1;
        self.next_object.set(id);
        id
    }

    fn flush(&self) -> SyncToken {
        self.queue.submit(std::iter::empty());
        let count = self.issued.get() + 1;
        self.issued.set(count);
        SyncToken::new(CommandBufferNamespace::GpuIo, self.command_buffer_id, count)
    }

    fn allocate(
        &self,
        format: BufferFormat,
        size: PixelSize,
        color_space: ColorSpace,
        usage: BufferUsage,
    ) -> Result<(BufferHandle, wgpu::Texture), AllocError> {
        if self.lost.get() {
            return Err(AllocError::ContextLost);
        }
        let max = self.device.limits().max_texture_dimension_2d;
        if size.is_empty() || size.width > max || size.height > max {
            return Err(AllocError::InvalidSize);
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("lamina.shared_image"),
            size: extent(size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(format),
            usage: texture_usages(usage),
            view_formats: &[],
        });
        let name = self.next_name.get() + 1;
        self.next_name.set(name);
        let handle = BufferHandle::from_u128(name);
        self.images.borrow_mut().insert(
            handle,
            Image {
                texture: texture.clone(),
                size,
                color_space,
            },
        );
        Ok((handle, texture))
    }
}

fn extent(size: PixelSize) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.width,
        height: size.height,
        depth_or_array_layers: 1,
    }
}

fn texture_format(format: BufferFormat) -> wgpu::TextureFormat {
    match format {
        BufferFormat::Rgba8888 => wgpu::TextureFormat::Rgba8Unorm,
        BufferFormat::Bgra8888 => wgpu::TextureFormat::Bgra8Unorm,
    }
}

fn texture_usages(usage: BufferUsage) -> wgpu::TextureUsages {
    let mut usages = wgpu::TextureUsages::COPY_SRC
        | wgpu::TextureUsages::COPY_DST
        | wgpu::TextureUsages::TEXTURE_BINDING;
    if usage.contains(BufferUsage::FRAMEBUFFER) || usage.contains(BufferUsage::SCANOUT) {
        usages |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    usages
}

fn argb_to_color(argb: u32) -> wgpu::Color {
    let channel = |shift: u32| f64::from((argb >> shift) & 0xFF) / 255.0;
    wgpu::Color {
        r: channel(16),
        g: channel(8),
        b: channel(0),
        a: channel(24),
    }
}

impl SharedImageInterface for WgpuGpu {
    fn create_shared_image(
        &self,
        format: BufferFormat,
        size: PixelSize,
        color_space: ColorSpace,
        usage: BufferUsage,
        _surface: SurfaceHandle,
    ) -> Result<BufferHandle, AllocError> {
        self.allocate(format, size, color_space, usage)
            .map(|(handle, _)| handle)
    }

    fn create_shared_image_with_data(
        &self,
        format: BufferFormat,
        size: PixelSize,
        color_space: ColorSpace,
        usage: BufferUsage,
        pixels: &[u8],
    ) -> Result<BufferHandle, AllocError> {
        let row_bytes = size.width * format.bytes_per_pixel();
        if pixels.len() != row_bytes as usize * size.height as usize {
            return Err(AllocError::InvalidSize);
        }
        let (handle, texture) = self.allocate(format, size, color_space, usage)?;
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(row_bytes),
                rows_per_image: Some(size.height),
            },
            extent(size),
        );
        Ok(handle)
    }

    fn destroy_shared_image(&self, token: SyncToken, handle: BufferHandle) {
        self.wait_sync_token(&token);
        if let Some(image) = self.images.borrow_mut().remove(&handle) {
            image.texture.destroy();
        }
    }

    fn gen_unverified_sync_token(&self) -> SyncToken {
        self.flush()
    }

    fn gen_verified_sync_token(&self) -> SyncToken {
        self.flush().verified()
    }
}

impl GpuContext for WgpuGpu {
    fn gen_framebuffer(&self) -> Result<FramebufferId, GpuError> {
        if self.lost.get() {
            return Err(GpuError::ContextLost);
        }
        let fbo = FramebufferId(self.next_object());
        self.framebuffers.borrow_mut().insert(fbo, None);
        Ok(fbo)
    }

    fn delete_framebuffer(&self, fbo: FramebufferId) {
        self.framebuffers.borrow_mut().remove(&fbo);
        if self.bound.get() == Some(fbo) {
            self.bound.set(None);
        }
    }

    fn bind_framebuffer(&self, fbo: Option<FramebufferId>) {
        self.bound.set(fbo);
    }

    fn attach_color_texture(&self, _target: TextureTarget, texture: Option<TextureId>) {
        if let Some(fbo) = self.bound.get()
            && let Some(slot) = self.framebuffers.borrow_mut().get_mut(&fbo)
        {
            *slot = texture;
        }
    }

    fn create_texture_for_shared_image(&self, buffer: BufferHandle) -> Result<TextureId, GpuError> {
        if self.lost.get() {
            return Err(GpuError::ContextLost);
        }
        if !self.images.borrow().contains_key(&buffer) {
            return Err(GpuError::OutOfResources);
        }
        let texture = TextureId(self.next_object());
        self.textures.borrow_mut().insert(texture, buffer);
        Ok(texture)
    }

    fn delete_texture(&self, texture: TextureId) {
        self.textures.borrow_mut().remove(&texture);
        self.open_access.borrow_mut().remove(&texture);
    }

    fn begin_shared_image_access(&self, texture: TextureId, mode: AccessMode) {
        if mode == AccessMode::ReadWrite {
            self.open_access.borrow_mut().insert(texture);
        }
    }

    fn end_shared_image_access(&self, texture: TextureId) {
        self.open_access.borrow_mut().remove(&texture);
    }

    fn schedule_overlay(&self, plane: &OverlayPlane) {
        self.overlays.borrow_mut().push(*plane);
    }

    fn gen_unverified_sync_token(&self) -> SyncToken {
        self.flush()
    }

    fn wait_sync_token(&self, token: &SyncToken) {
        // Every submission lands on the one queue in order, so later work
        // already runs after the token's flush. Only the dependency is kept.
        if token.has_data() && token.release_count > self.waited.get() {
            self.waited.set(token.release_count);
        }
    }

    fn resize(&self, size: PixelSize, _scale: f32, _color_space: ColorSpace, _has_alpha: bool) {
        self.surface_size.set(size);
    }

    fn buffer_texture_target(&self, _usage: BufferUsage, _format: BufferFormat) -> TextureTarget {
        TextureTarget::Texture2d
    }
}
