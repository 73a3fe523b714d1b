// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared GPU buffers and the allocation boundary.
//!
//! A shared buffer (a "shared image") is a GPU allocation that several
//! command streams can name through an opaque [`BufferHandle`]. The core
//! never touches the memory itself; it asks a [`SharedImageInterface`] to
//! create and destroy buffers and passes handles around.
//!
//! Buffers that originate outside the GPU layer (for example a DXGI shared
//! handle exported by another device) enter through an
//! [`ExternalBufferImporter`]. Both importers build everywhere; which one a
//! target gets is chosen at build time by [`platform_importer`].

use alloc::rc::Rc;
use core::fmt;
use core::ops::BitOr;

use crate::geometry::PixelSize;
use crate::sync::SyncToken;

/// Opaque name of a shared buffer: 16 bytes of identity plus a flag marking
/// it as a shared image.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle {
    name: [u8; 16],
    shared_image: bool,
}

impl BufferHandle {
    /// The null handle.
    pub const ZERO: Self = Self {
        name: [0; 16],
        shared_image: false,
    };

    /// Creates a handle from raw name bytes.
    #[inline]
    #[must_use]
    pub const fn new(name: [u8; 16], shared_image: bool) -> Self {
        Self { name, shared_image }
    }

    /// Creates a shared-image handle whose name is `value` in little-endian
    /// byte order.
    #[inline]
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self::new(value.to_le_bytes(), true)
    }

    /// Raw name bytes.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> [u8; 16] {
        self.name
    }

    /// Returns `true` if this handle names a shared image.
    #[inline]
    #[must_use]
    pub const fn is_shared_image(&self) -> bool {
        self.shared_image
    }

    /// Returns `true` if every name byte is zero.
    #[inline]
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.name.iter().all(|&b| b == 0)
    }
}

impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BufferHandle(")?;
        for b in self.name.iter().rev() {
            write!(f, "{b:02x}")?;
        }
        if self.shared_image {
            f.write_str(", shared")?;
        }
        f.write_str(")")
    }
}

/// Pixel layout of a buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BufferFormat {
    /// 8-bit RGBA.
    #[default]
    Rgba8888,
    /// 8-bit BGRA.
    Bgra8888,
}

impl BufferFormat {
    /// Bytes per pixel.
    #[inline]
    #[must_use]
    pub const fn bytes_per_pixel(self) -> u32 {
        4
    }
}

/// Color space tag attached to a buffer.
///
/// Only sRGB is interpreted; `Unspecified` passes through untouched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    /// No color space attached.
    Unspecified,
    /// Standard sRGB.
    #[default]
    Srgb,
}

/// Intended uses of a shared buffer, as a set of flags.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BufferUsage(u32);

impl BufferUsage {
    /// No usage.
    pub const NONE: Self = Self(0);
    /// Presented directly by the display pipeline as an overlay.
    pub const SCANOUT: Self = Self(1 << 0);
    /// Read by the display compositor.
    pub const DISPLAY: Self = Self(1 << 1);
    /// Rendered into through a framebuffer.
    pub const FRAMEBUFFER: Self = Self(1 << 2);
    /// Sampled by another GPU context.
    pub const GPU_READ: Self = Self(1 << 3);

    /// Usage of buffers rotated by a [`BufferQueue`](crate::buffer_queue::BufferQueue).
    pub const PRESENTABLE: Self = Self(Self::SCANOUT.0 | Self::DISPLAY.0 | Self::FRAMEBUFFER.0);

    /// Returns `true` if every flag in `other` is set in `self`.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw flag bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for BufferUsage {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for BufferUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferUsage({:#06b})", self.0)
    }
}

/// Native surface or window a buffer may be presented to.
///
/// Off-screen surfaces use [`SurfaceHandle::NULL`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

impl SurfaceHandle {
    /// No native target.
    pub const NULL: Self = Self(0);
}

/// Raw operating-system handle to memory exported by another device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExternalHandle(pub u64);

/// Why a shared buffer could not be allocated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// Requested size was empty or exceeds device limits.
    InvalidSize,
    /// The device is out of memory.
    OutOfMemory,
    /// The allocator does not support this kind of allocation.
    Unsupported,
    /// The GPU context backing the allocator was lost.
    ContextLost,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSize => f.write_str("invalid shared image size"),
            Self::OutOfMemory => f.write_str("out of GPU memory"),
            Self::Unsupported => f.write_str("allocation kind not supported"),
            Self::ContextLost => f.write_str("GPU context lost"),
        }
    }
}

impl core::error::Error for AllocError {}

/// Creates and destroys shared buffers.
///
/// Methods take `&self`: implementations own a command stream and are shared
/// by reference count between the surface, its buffer queue, and the host.
pub trait SharedImageInterface {
    /// Allocates a buffer suitable for `usage`, optionally tied to a native
    /// presentation target.
    fn create_shared_image(
        &self,
        format: BufferFormat,
        size: PixelSize,
        color_space: ColorSpace,
        usage: BufferUsage,
        surface: SurfaceHandle,
    ) -> Result<BufferHandle, AllocError>;

    /// Allocates a buffer and uploads `pixels` (tightly packed rows in
    /// `format`) into it.
    fn create_shared_image_with_data(
        &self,
        format: BufferFormat,
        size: PixelSize,
        color_space: ColorSpace,
        usage: BufferUsage,
        pixels: &[u8],
    ) -> Result<BufferHandle, AllocError>;

    /// Wraps memory exported by another device as a shared buffer.
    ///
    /// The default implementation reports [`AllocError::Unsupported`].
    fn import_external(
        &self,
        handle: ExternalHandle,
        format: BufferFormat,
        size: PixelSize,
        color_space: ColorSpace,
        usage: BufferUsage,
    ) -> Result<BufferHandle, AllocError> {
        _ = (handle, format, size, color_space, usage);
        Err(AllocError::Unsupported)
    }

    /// Destroys `handle` once the GPU has passed `token`.
    fn destroy_shared_image(&self, token: SyncToken, handle: BufferHandle);

    /// Fence after all allocations issued so far, not yet flushed.
    fn gen_unverified_sync_token(&self) -> SyncToken;

    /// Fence after all allocations issued so far, flushed so that any context
    /// may wait on it.
    fn gen_verified_sync_token(&self) -> SyncToken;
}

/// Why an external buffer could not be imported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportError {
    /// This platform cannot import external buffers.
    Unsupported,
    /// The OS handle was null.
    InvalidHandle,
    /// The allocator refused the import.
    Alloc(AllocError),
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => f.write_str("external buffer import is not supported here"),
            Self::InvalidHandle => f.write_str("null external handle"),
            Self::Alloc(e) => write!(f, "import failed: {e}"),
        }
    }
}

impl core::error::Error for ImportError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Alloc(e) => Some(e),
            _ => None,
        }
    }
}

impl From<AllocError> for ImportError {
    fn from(e: AllocError) -> Self {
        Self::Alloc(e)
    }
}

/// Turns OS handles to foreign GPU memory into shared buffers.
pub trait ExternalBufferImporter {
    /// Imports `handle`, which refers to a `size` BGRA/RGBA texture.
    fn import(
        &self,
        handle: ExternalHandle,
        size: PixelSize,
    ) -> Result<BufferHandle, ImportError>;

    /// Releases a handle returned by [`import`](Self::import).
    fn release(&self, handle: BufferHandle);

    /// Imports `handle`, yielding [`BufferHandle::ZERO`] on any failure.
    fn import_or_zero(&self, handle: ExternalHandle, size: PixelSize) -> BufferHandle {
        self.import(handle, size).unwrap_or(BufferHandle::ZERO)
    }
}

/// Imports DXGI-style shared handles through the allocator's external entry
/// point.
///
/// Compiled on every target since it only forwards to the allocator;
/// [`platform_importer`] hands it out on Windows alone.
pub struct SharedHandleImporter<S> {
    shared_images: Rc<S>,
}

impl<S> SharedHandleImporter<S> {
    /// Creates an importer backed by `shared_images`.
    #[must_use]
    pub fn new(shared_images: Rc<S>) -> Self {
        Self { shared_images }
    }
}

impl<S> fmt::Debug for SharedHandleImporter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedHandleImporter").finish_non_exhaustive()
    }
}

impl<S: SharedImageInterface> ExternalBufferImporter for SharedHandleImporter<S> {
    fn import(
        &self,
        handle: ExternalHandle,
        size: PixelSize,
    ) -> Result<BufferHandle, ImportError> {
        if handle.0 == 0 {
            return Err(ImportError::InvalidHandle);
        }
        let imported = self.shared_images.import_external(
            handle,
            BufferFormat::Bgra8888,
            size,
            ColorSpace::Srgb,
            BufferUsage::DISPLAY | BufferUsage::FRAMEBUFFER,
        )?;
        Ok(imported)
    }

    fn release(&self, handle: BufferHandle) {
        if handle.is_zero() {
            return;
        }
        let token = self.shared_images.gen_unverified_sync_token();
        self.shared_images.destroy_shared_image(token, handle);
    }
}

/// Importer for platforms without cross-device buffer sharing.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnsupportedImporter;

impl ExternalBufferImporter for UnsupportedImporter {
    fn import(&self, _: ExternalHandle, _: PixelSize) -> Result<BufferHandle, ImportError> {
        Err(ImportError::Unsupported)
    }

    fn release(&self, _: BufferHandle) {}
}

/// Returns the importer available on the build target.
#[cfg(windows)]
pub fn platform_importer<S: SharedImageInterface>(
    shared_images: Rc<S>,
) -> impl ExternalBufferImporter {
    SharedHandleImporter::new(shared_images)
}

/// Returns the importer available on the build target.
#[cfg(not(windows))]
pub fn platform_importer<S: SharedImageInterface>(
    shared_images: Rc<S>,
) -> impl ExternalBufferImporter {
    _ = shared_images;
    UnsupportedImporter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeGpu;

    #[test]
    fn zero_handle_detection() {
        assert!(BufferHandle::ZERO.is_zero(), "all zero");
        assert!(!BufferHandle::from_u128(1).is_zero(), "non-zero name");
        assert!(BufferHandle::from_u128(1).is_shared_image(), "flag set");
    }

    #[test]
    fn usage_flags_combine() {
        let u = BufferUsage::SCANOUT | BufferUsage::GPU_READ;
        assert!(u.contains(BufferUsage::SCANOUT), "has scanout");
        assert!(!u.contains(BufferUsage::DISPLAY), "no display");
        assert!(BufferUsage::PRESENTABLE.contains(BufferUsage::FRAMEBUFFER), "preset");
    }

    #[test]
    fn shared_handle_importer_round_trip() {
        let gpu = Rc::new(FakeGpu::new());
        let importer = SharedHandleImporter::new(gpu.clone());
        let handle = importer
            .import(ExternalHandle(0xD3D), PixelSize::new(64, 32))
            .expect("fake allocator imports");
        assert_eq!(gpu.live_images(), 1, "one imported image");
        importer.release(handle);
        assert_eq!(gpu.live_images(), 0, "released");
    }

    #[test]
    fn null_external_handle_is_rejected() {
        let gpu = Rc::new(FakeGpu::new());
        let importer = SharedHandleImporter::new(gpu);
        assert_eq!(
            importer.import(ExternalHandle(0), PixelSize::new(1, 1)),
            Err(ImportError::InvalidHandle),
            "null handle"
        );
        assert!(
            importer
                .import_or_zero(ExternalHandle(0), PixelSize::new(1, 1))
                .is_zero(),
            "falls back to the zero handle"
        );
    }

    #[test]
    fn unsupported_importer_yields_zero() {
        let importer = UnsupportedImporter;
        assert_eq!(
            importer.import(ExternalHandle(5), PixelSize::new(1, 1)),
            Err(ImportError::Unsupported),
            "never imports"
        );
    }

    #[test]
    fn platform_importer_matches_the_target() {
        let gpu = Rc::new(FakeGpu::new());
        let importer = platform_importer(gpu.clone());
        let imported = importer.import(ExternalHandle(0xD3D), PixelSize::new(4, 4));
        if cfg!(windows) {
            assert!(imported.is_ok(), "shared handles import on Windows");
            assert_eq!(gpu.live_images(), 1, "allocator saw the import");
        } else {
            assert_eq!(imported, Err(ImportError::Unsupported), "no sharing here");
            assert_eq!(gpu.live_images(), 0, "allocator untouched");
        }
    }
}
