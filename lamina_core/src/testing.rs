// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recording GPU double shared by unit tests.

use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use hashbrown::{HashMap, HashSet};

use crate::buffer::{
    AllocError, BufferFormat, BufferHandle, BufferUsage, ColorSpace, ExternalHandle,
    SharedImageInterface, SurfaceHandle,
};
use crate::geometry::PixelSize;
use crate::gpu::{
    AccessMode, FramebufferId, GpuContext, GpuError, OverlayPlane, TextureId, TextureTarget,
};
use crate::sync::{CommandBufferNamespace, SyncToken, SyncTokenProvider};

/// In-memory GPU context and shared-image allocator that records every call.
#[derive(Debug, Default)]
pub(crate) struct FakeGpu {
    next_name: Cell<u128>,
    next_object: Cell<u32>,
    release_count: Cell<u64>,
    fail_allocations: Cell<bool>,
    images: RefCell<HashMap<BufferHandle, PixelSize>>,
    textures: RefCell<HashMap<TextureId, BufferHandle>>,
    textures_created: Cell<usize>,
    framebuffers: RefCell<HashSet<FramebufferId>>,
    bound_fbo: Cell<Option<FramebufferId>>,
    attached: Cell<Option<TextureId>>,
    open_access: RefCell<HashSet<TextureId>>,
    overlays: RefCell<Vec<OverlayPlane>>,
    waits: RefCell<Vec<SyncToken>>,
    destroyed: RefCell<Vec<(SyncToken, BufferHandle)>>,
    resizes: RefCell<Vec<(PixelSize, f32)>>,
    calls: RefCell<Vec<&'static str>>,
}

impl FakeGpu {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_fail_allocations(&self, fail: bool) {
        self.fail_allocations.set(fail);
    }

    pub(crate) fn live_images(&self) -> usize {
        self.images.borrow().len()
    }

    pub(crate) fn image_size(&self, handle: BufferHandle) -> Option<PixelSize> {
        self.images.borrow().get(&handle).copied()
    }

    pub(crate) fn textures_created(&self) -> usize {
        self.textures_created.get()
    }

    pub(crate) fn live_textures(&self) -> usize {
        self.textures.borrow().len()
    }

    pub(crate) fn live_framebuffers(&self) -> usize {
        self.framebuffers.borrow().len()
    }

    pub(crate) fn bound_framebuffer(&self) -> Option<FramebufferId> {
        self.bound_fbo.get()
    }

    pub(crate) fn attached_texture(&self) -> Option<TextureId> {
        self.attached.get()
    }

    pub(crate) fn open_access_count(&self) -> usize {
        self.open_access.borrow().len()
    }

    pub(crate) fn overlays(&self) -> Vec<OverlayPlane> {
        self.overlays.borrow().clone()
    }

    pub(crate) fn waits(&self) -> Vec<SyncToken> {
        self.waits.borrow().clone()
    }

    pub(crate) fn destroyed(&self) -> Vec<(SyncToken, BufferHandle)> {
        self.destroyed.borrow().clone()
    }

    pub(crate) fn resizes(&self) -> Vec<(PixelSize, f32)> {
        self.resizes.borrow().clone()
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.borrow_mut().push(call);
    }

    fn next_token(&self) -> SyncToken {
        let count = self.release_count.get() + 1;
        self.release_count.set(count);
        SyncToken::new(CommandBufferNamespace::InProcess, 1, count)
    }

    fn next_object(&self) -> u32 {
        let id = self.next_object.get() + 1;
        self.next_object.set(id);
        id
    }

    fn allocate(&self, size: PixelSize) -> Result<BufferHandle, AllocError> {
        if self.fail_allocations.get() {
            return Err(AllocError::OutOfMemory);
        }
        if size.is_empty() {
            return Err(AllocError::InvalidSize);
        }
        let name = self.next_name.get() + 1;
        self.next_name.set(name);
        let handle = BufferHandle::from_u128(name);
        self.images.borrow_mut().insert(handle, size);
        self.record("create_shared_image");
        Ok(handle)
    }
}

impl SharedImageInterface for FakeGpu {
    fn create_shared_image(
        &self,
        _format: BufferFormat,
        size: PixelSize,
        _color_space: ColorSpace,
        _usage: BufferUsage,
        _surface: SurfaceHandle,
    ) -> Result<BufferHandle, AllocError> {
        self.allocate(size)
    }

    fn create_shared_image_with_data(
        &self,
        format: BufferFormat,
        size: PixelSize,
        _color_space: ColorSpace,
        _usage: BufferUsage,
        pixels: &[u8],
    ) -> Result<BufferHandle, AllocError> {
        let expected = size.area() * format.bytes_per_pixel() as usize;
        if pixels.len() != expected {
            return Err(AllocError::InvalidSize);
        }
        self.allocate(size)
    }

    fn import_external(
        &self,
        _handle: ExternalHandle,
        _format: BufferFormat,
        size: PixelSize,
        _color_space: ColorSpace,
        _usage: BufferUsage,
    ) -> Result<BufferHandle, AllocError> {
        self.allocate(size)
    }

    fn destroy_shared_image(&self, token: SyncToken, handle: BufferHandle) {
        self.record("destroy_shared_image");
        let removed = self.images.borrow_mut().remove(&handle);
        assert!(removed.is_some(), "double destroy of {handle:?}");
        self.destroyed.borrow_mut().push((token, handle));
    }

    fn gen_unverified_sync_token(&self) -> SyncToken {
        self.next_token()
    }

    fn gen_verified_sync_token(&self) -> SyncToken {
        self.next_token().verified()
    }
}

impl GpuContext for FakeGpu {
    fn gen_framebuffer(&self) -> Result<FramebufferId, GpuError> {
        let fbo = FramebufferId(self.next_object());
        self.framebuffers.borrow_mut().insert(fbo);
        Ok(fbo)
    }

    fn delete_framebuffer(&self, fbo: FramebufferId) {
        self.record("delete_framebuffer");
        self.framebuffers.borrow_mut().remove(&fbo);
        if self.bound_fbo.get() == Some(fbo) {
            self.bound_fbo.set(None);
        }
    }

    fn bind_framebuffer(&self, fbo: Option<FramebufferId>) {
        self.bound_fbo.set(fbo);
    }

    fn attach_color_texture(&self, _target: TextureTarget, texture: Option<TextureId>) {
        assert!(
            self.bound_fbo.get().is_some(),
            "attachment requires a bound framebuffer"
        );
        if let Some(t) = texture {
            assert!(
                self.textures.borrow().contains_key(&t),
                "attaching deleted texture {t:?}"
            );
        }
        self.attached.set(texture);
    }

    fn create_texture_for_shared_image(&self, buffer: BufferHandle) -> Result<TextureId, GpuError> {
        assert!(
            self.images.borrow().contains_key(&buffer),
            "texture for unknown buffer {buffer:?}"
        );
        let texture = TextureId(self.next_object());
        self.textures.borrow_mut().insert(texture, buffer);
        self.textures_created.set(self.textures_created.get() + 1);
        Ok(texture)
    }

    fn delete_texture(&self, texture: TextureId) {
        self.record("delete_texture");
        self.textures.borrow_mut().remove(&texture);
        if self.attached.get() == Some(texture) {
            self.attached.set(None);
        }
    }

    fn begin_shared_image_access(&self, texture: TextureId, _mode: AccessMode) {
        let fresh = self.open_access.borrow_mut().insert(texture);
        assert!(fresh, "access already open on {texture:?}");
    }

    fn end_shared_image_access(&self, texture: TextureId) {
        let open = self.open_access.borrow_mut().remove(&texture);
        assert!(open, "no access open on {texture:?}");
    }

    fn schedule_overlay(&self, plane: &OverlayPlane) {
        self.overlays.borrow_mut().push(*plane);
    }

    fn gen_unverified_sync_token(&self) -> SyncToken {
        self.next_token()
    }

    fn wait_sync_token(&self, token: &SyncToken) {
        if token.has_data() {
            self.waits.borrow_mut().push(*token);
        }
    }

    fn resize(&self, size: PixelSize, scale: f32, _color_space: ColorSpace, _has_alpha: bool) {
        self.resizes.borrow_mut().push((size, scale));
    }

    fn buffer_texture_target(&self, _usage: BufferUsage, _format: BufferFormat) -> TextureTarget {
        TextureTarget::Texture2d
    }
}

impl SyncTokenProvider for FakeGpu {
    fn gen_sync_token(&self) -> SyncToken {
        self.next_token()
    }
}
