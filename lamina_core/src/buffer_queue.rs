// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Rotating set of presentable shared buffers.
//!
//! A [`BufferQueue`] hands out one *current* buffer to paint into. Swapping
//! moves it to the back of an *in-flight* FIFO; each acknowledgment from the
//! display pipeline ([`page_flip_complete`](BufferQueue::page_flip_complete))
//! promotes the oldest in-flight buffer to *displayed* and returns the
//! previously displayed one to the *available* pool, where the next
//! [`current_buffer`](BufferQueue::current_buffer) call picks it up again.
//!
//! ```text
//!   allocate ──► current ──swap──► in flight ──flip──► displayed ──flip──► available
//!                   ▲                                                         │
//!                   └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Every buffer tracks the damage accumulated since it was last painted, so a
//! recycled buffer only needs the region that changed while it was away.
//!
//! The queue destroys buffers on reshape and teardown. Destruction is fenced
//! with a token from a [`SyncTokenProvider`] supplied by the caller; the queue
//! never holds on to its provider.

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::fmt;

use crate::buffer::{
    AllocError, BufferFormat, BufferHandle, BufferUsage, ColorSpace, SharedImageInterface,
    SurfaceHandle,
};
use crate::geometry::{PixelRect, PixelSize};
use crate::sync::{SyncToken, SyncTokenProvider};

#[derive(Clone, Copy, Debug)]
struct AllocatedBuffer {
    handle: BufferHandle,
    /// Region that changed since this buffer was last painted.
    damage: PixelRect,
}

/// The buffer to paint into next, as returned by
/// [`BufferQueue::current_buffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CurrentBuffer {
    /// The buffer.
    pub handle: BufferHandle,
    /// Fence after the buffer's creation. Empty for recycled buffers.
    pub creation_token: SyncToken,
    /// `true` if the buffer was allocated by this call.
    pub newly_allocated: bool,
}

/// Rotating set of GPU buffers for an off-screen surface.
pub struct BufferQueue<S: SharedImageInterface> {
    shared_images: Rc<S>,
    surface: SurfaceHandle,
    size: PixelSize,
    color_space: ColorSpace,
    format: BufferFormat,
    max_buffers: u32,
    /// Buffers currently alive, wherever they sit in the rotation.
    live: u32,
    current: Option<AllocatedBuffer>,
    displayed: Option<AllocatedBuffer>,
    available: Vec<AllocatedBuffer>,
    /// Swapped buffers awaiting acknowledgment. `None` entries are swaps that
    /// carried no buffer, or whose buffer was freed by a reshape; they still
    /// pair with exactly one acknowledgment.
    in_flight: VecDeque<Option<AllocatedBuffer>>,
}

impl<S: SharedImageInterface> fmt::Debug for BufferQueue<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferQueue")
            .field("size", &self.size)
            .field("format", &self.format)
            .field("live", &self.live)
            .field("current", &self.current.map(|b| b.handle))
            .field("displayed", &self.displayed.map(|b| b.handle))
            .field("available", &self.available.len())
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl<S: SharedImageInterface> BufferQueue<S> {
    /// Creates an empty queue. Nothing is allocated until the first
    /// [`reshape`](Self::reshape) and [`current_buffer`](Self::current_buffer).
    ///
    /// # Panics
    ///
    /// Panics if `max_buffers` is zero.
    #[must_use]
    pub fn new(shared_images: Rc<S>, surface: SurfaceHandle, max_buffers: u32) -> Self {
        assert!(max_buffers > 0, "a buffer queue needs at least one buffer");
        Self {
            shared_images,
            surface,
            size: PixelSize::ZERO,
            color_space: ColorSpace::default(),
            format: BufferFormat::default(),
            max_buffers,
            live: 0,
            current: None,
            displayed: None,
            available: Vec::new(),
            in_flight: VecDeque::new(),
        }
    }

    /// Commits a new size, color space, and format.
    ///
    /// Returns `true` if anything changed, in which case every buffer has been
    /// destroyed and handles previously returned by this queue are dead;
    /// callers must drop textures they cached for them. Returns `false` and
    /// leaves the queue untouched otherwise.
    pub fn reshape(
        &mut self,
        size: PixelSize,
        color_space: ColorSpace,
        format: BufferFormat,
        tokens: &dyn SyncTokenProvider,
    ) -> bool {
        if size == self.size && color_space == self.color_space && format == self.format {
            return false;
        }
        self.size = size;
        self.color_space = color_space;
        self.format = format;
        self.free_all(tokens);
        true
    }

    /// Returns the buffer to paint into next, allocating one if needed.
    ///
    /// Returns `Ok(None)` when no buffer can be handed out: the queue has no
    /// size yet, or every permitted buffer is in flight or on display. Callers
    /// skip texture binding for that frame. Allocation failure is reported as
    /// an error and is fatal to the owning surface.
    pub fn current_buffer(&mut self) -> Result<Option<CurrentBuffer>, AllocError> {
        if let Some(current) = self.current {
            return Ok(Some(CurrentBuffer {
                handle: current.handle,
                creation_token: SyncToken::EMPTY,
                newly_allocated: false,
            }));
        }
        if let Some(recycled) = self.available.pop() {
            self.current = Some(recycled);
            return Ok(Some(CurrentBuffer {
                handle: recycled.handle,
                creation_token: SyncToken::EMPTY,
                newly_allocated: false,
            }));
        }
        if self.size.is_empty() || self.live >= self.max_buffers {
            return Ok(None);
        }
        let handle = self.shared_images.create_shared_image(
            self.format,
            self.size,
            self.color_space,
            BufferUsage::PRESENTABLE,
            self.surface,
        )?;
        if handle.is_zero() {
            return Err(AllocError::OutOfMemory);
        }
        self.live += 1;
        self.current = Some(AllocatedBuffer {
            handle,
            damage: PixelRect::from_size(self.size),
        });
        Ok(Some(CurrentBuffer {
            handle,
            creation_token: self.shared_images.gen_unverified_sync_token(),
            newly_allocated: true,
        }))
    }

    /// Region of the next buffer that must be repainted.
    ///
    /// Full surface damage when the next buffer would be freshly allocated.
    #[must_use]
    pub fn current_buffer_damage(&self) -> PixelRect {
        if let Some(current) = &self.current {
            return current.damage;
        }
        // The buffer `current_buffer` would pick up next.
        if let Some(next) = self.available.last() {
            return next.damage;
        }
        PixelRect::from_size(self.size)
    }

    /// Submits the current buffer for display.
    ///
    /// `damage` is added to every other buffer, since each of them now lags
    /// behind by that region. A swap without a current buffer still occupies
    /// an in-flight slot so acknowledgments stay paired.
    pub fn swap_buffers(&mut self, damage: PixelRect) {
        let damage = damage.intersect(PixelRect::from_size(self.size));
        if let Some(displayed) = &mut self.displayed {
            displayed.damage = displayed.damage.union(damage);
        }
        for buffer in &mut self.available {
            buffer.damage = buffer.damage.union(damage);
        }
        for buffer in self.in_flight.iter_mut().flatten() {
            buffer.damage = buffer.damage.union(damage);
        }
        let mut swapped = self.current.take();
        if let Some(buffer) = &mut swapped {
            buffer.damage = PixelRect::ZERO;
        }
        self.in_flight.push_back(swapped);
    }

    /// Acknowledges the oldest outstanding swap.
    ///
    /// Returns the buffer now on display, if the acknowledged swap carried
    /// one. With no outstanding swap this does nothing.
    pub fn page_flip_complete(&mut self) -> Option<BufferHandle> {
        let flipped = self.in_flight.pop_front()?;
        let flipped = flipped?;
        if let Some(previous) = self.displayed.replace(flipped) {
            self.available.push(previous);
        }
        Some(flipped.handle)
    }

    /// Destroys every buffer and forgets all rotation state, including
    /// outstanding swaps. Used when the owning surface is torn down.
    pub fn release_all(&mut self, tokens: &dyn SyncTokenProvider) {
        self.free_all(tokens);
        self.in_flight.clear();
    }

    fn free_all(&mut self, tokens: &dyn SyncTokenProvider) {
        let displayed = self.displayed.take();
        let current = self.current.take();
        let available = core::mem::take(&mut self.available);
        for buffer in displayed.into_iter().chain(current).chain(available) {
            self.free_buffer(buffer, tokens.gen_sync_token());
        }
        // Acknowledgments for these swaps are still on their way.
        let in_flight: Vec<_> = self.in_flight.iter_mut().filter_map(Option::take).collect();
        for buffer in in_flight {
            self.free_buffer(buffer, tokens.gen_sync_token());
        }
    }

    fn free_buffer(&mut self, buffer: AllocatedBuffer, token: SyncToken) {
        self.shared_images.destroy_shared_image(token, buffer.handle);
        self.live -= 1;
    }

    /// Size committed by the last reshape.
    #[must_use]
    pub fn size(&self) -> PixelSize {
        self.size
    }

    /// Color space committed by the last reshape.
    #[must_use]
    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    /// Format committed by the last reshape.
    #[must_use]
    pub fn format(&self) -> BufferFormat {
        self.format
    }

    /// Buffers currently alive.
    #[must_use]
    pub fn live_buffers(&self) -> u32 {
        self.live
    }

    /// Swaps awaiting acknowledgment.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Buffer the oldest outstanding swap carried, if any swap is outstanding.
    #[must_use]
    pub fn oldest_in_flight(&self) -> Option<Option<BufferHandle>> {
        self.in_flight.front().map(|b| b.map(|b| b.handle))
    }

    /// Buffer currently on display.
    #[must_use]
    pub fn displayed(&self) -> Option<BufferHandle> {
        self.displayed.map(|b| b.handle)
    }
}

impl<S: SharedImageInterface> Drop for BufferQueue<S> {
    fn drop(&mut self) {
        // Owners tear down through `release_all` with a real fence; anything
        // left at this point is destroyed unfenced.
        let leftovers = self
            .displayed
            .take()
            .into_iter()
            .chain(self.current.take())
            .chain(self.available.drain(..))
            .chain(self.in_flight.drain(..).flatten());
        for buffer in leftovers {
            self.shared_images
                .destroy_shared_image(SyncToken::EMPTY, buffer.handle);
        }
    }
}
