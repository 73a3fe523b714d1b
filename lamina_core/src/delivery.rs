// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frame delivery to the embedding application.
//!
//! Frames leave the compositor one of two ways: as a CPU [`Bitmap`] handed to
//! a [`PaintSink`], or as a GPU buffer handed to a [`TextureSink`]. A texture
//! frame carries a [`ReleaseCallback`] that the receiver fires once it no
//! longer reads the buffer. Until then the buffer is not reused.

use alloc::boxed::Box;
use core::fmt;

use crate::bitmap::Bitmap;
use crate::buffer::BufferHandle;
use crate::geometry::PixelRect;
use crate::sync::SyncToken;

/// Receives software-composited frames.
pub trait PaintSink {
    /// Called with the composited frame and the region that changed.
    ///
    /// `frame` is only valid for the duration of the call.
    fn on_paint(&mut self, damage: PixelRect, frame: &Bitmap);
}

/// Receives GPU texture frames.
pub trait TextureSink {
    /// Called with a presented buffer. The receiver owns `frame.release`.
    fn on_texture_paint(&mut self, frame: TextureFrame);
}

/// One GPU buffer handed to the embedder.
#[derive(Debug)]
pub struct TextureFrame {
    /// Buffer holding the frame.
    pub buffer: BufferHandle,
    /// Fence to wait on before reading `buffer`.
    pub sync_token: SyncToken,
    /// Region of the buffer with valid content, in physical pixels.
    pub content_rect: PixelRect,
    /// `true` for popup widget content.
    pub is_popup: bool,
    /// Fired once the receiver is done with `buffer`.
    pub release: ReleaseCallback,
}

type ReleaseFn = Box<dyn FnOnce(Option<SyncToken>)>;

/// One-shot notification that a delivered buffer may be reused.
///
/// Call [`release`](Self::release) with the fence guarding the receiver's
/// last read, if any. Dropping an unfired callback releases without a fence.
#[must_use = "dropping a ReleaseCallback releases the buffer immediately"]
pub struct ReleaseCallback(Option<ReleaseFn>);

impl ReleaseCallback {
    /// Wraps `f`.
    pub fn new(f: impl FnOnce(Option<SyncToken>) + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    /// A callback that does nothing.
    pub fn noop() -> Self {
        Self(None)
    }

    /// Releases the buffer after `token` (if any) has passed.
    pub fn release(mut self, token: Option<SyncToken>) {
        if let Some(f) = self.0.take() {
            f(token);
        }
    }
}

impl fmt::Debug for ReleaseCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReleaseCallback")
            .field(&if self.0.is_some() { "pending" } else { "fired" })
            .finish()
    }
}

impl Drop for ReleaseCallback {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f(None);
        }
    }
}
