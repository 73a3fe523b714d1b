// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracing and diagnostics for surfaces, compositing, and delivery.
//!
//! [`TraceSink`] has one method per event and every method defaults to a
//! no-op, so a sink implements only what it cares about.
//!
//! [`Tracer`] wraps an optional `&mut dyn TraceSink`, or a borrow of a
//! [`SharedTraceSink`]. With the `trace` feature **off** its methods compile
//! to nothing; with it **on** each call is a single `Option` branch.
//! [`OffscreenHost`](crate::host::OffscreenHost) and
//! [`OffscreenOutput`](crate::output::OffscreenOutput) hold a shared sink, so
//! a host and the outputs of its views report into one stream.
//!
//! [`FrameSummaryBuilder`] collects phase timestamps during a frame and
//! produces a [`FrameSummary`] at the end.
//!
//! # Crate features
//!
//! - `trace`: enables the `Tracer` method bodies.
//! - `trace-rich` (implies `trace`): adds per-frame damage rectangle events.

use alloc::rc::Rc;
use core::cell::RefCell;
#[cfg(feature = "trace")]
use core::cell::RefMut;
#[cfg(feature = "trace")]
use core::ops::{Deref, DerefMut};

use crate::buffer::BufferHandle;
use crate::geometry::{PixelRect, PixelSize};
use crate::gpu::TextureId;
use crate::time::{Duration, HostTime};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which part of a frame is being measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    /// Binding the framebuffer to the next buffer.
    Bind,
    /// The renderer painting into the bound buffer.
    Paint,
    /// Merging popup and proxy overlays.
    Composite,
    /// Scheduling the overlay and advancing the buffer queue.
    Swap,
}

/// What the resize coalescer did with a request or completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResizeAction {
    /// Geometry changed and the resize went out.
    Applied,
    /// A resize is outstanding; the request was parked.
    Deferred,
    /// Geometry was unchanged and not forced.
    Unchanged,
    /// The outstanding resize completed with nothing parked.
    Released,
    /// The outstanding resize completed and the parked one went out.
    Reissued,
}

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// A buffer queue allocated a new shared image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferAllocatedEvent {
    /// The new buffer.
    pub buffer: BufferHandle,
    /// Its size.
    pub size: PixelSize,
    /// Buffers allocated at this size so far, including this one.
    pub allocated_count: u32,
}

/// A reshape invalidated every buffer and cached texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuffersFreedEvent {
    /// Cached textures released alongside the buffers.
    pub textures_released: u32,
    /// Size the queue was reshaped to.
    pub size: PixelSize,
}

/// The framebuffer was bound to a buffer's texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureBoundEvent {
    /// Buffer now being painted.
    pub buffer: BufferHandle,
    /// Texture aliasing the buffer.
    pub texture: TextureId,
    /// `true` if the texture was created for this bind rather than reused.
    pub created: bool,
}

/// A frame was swapped to the display pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapEvent {
    /// Monotonic frame counter of the output.
    pub frame_index: u64,
    /// Buffer submitted, or `None` if nothing was bound.
    pub buffer: Option<BufferHandle>,
    /// Damage submitted with the swap.
    pub damage: PixelRect,
}

/// The display pipeline finished with a swapped buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageFlipEvent {
    /// Buffer now on display, if the acknowledged swap carried one.
    pub displayed: Option<BufferHandle>,
    /// Swaps still awaiting acknowledgment.
    pub in_flight: u32,
}

/// The resize coalescer acted on a request or completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResizeEvent {
    /// What happened.
    pub action: ResizeAction,
    /// Pixel size involved.
    pub size: PixelSize,
}

/// A frame went through the compositor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompositeEvent {
    /// Monotonic composite counter of the view.
    pub frame_index: u64,
    /// `true` if the base frame was delivered without a copy.
    pub fast_path: bool,
    /// Overlays painted over the base frame.
    pub overlays: u32,
    /// Damage delivered with the frame.
    pub damage: PixelRect,
}

/// A texture frame was handed to the embedder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDeliveredEvent {
    /// Buffer the embedder may now read.
    pub buffer: BufferHandle,
    /// Region of the consumer surface the texture covers.
    pub content_rect: PixelRect,
    /// `true` for popup and proxy layers.
    pub is_popup: bool,
}

/// The embedder released a texture frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureReleasedEvent {
    /// Buffer the embedder has finished reading.
    pub buffer: BufferHandle,
    /// `true` if the release carried a consumer fence.
    pub fenced: bool,
}

/// A surface identity changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceIdEvent {
    /// Parent sequence number.
    pub parent_sequence: u32,
    /// Child sequence number.
    pub child_sequence: u32,
    /// `false` after invalidation.
    pub valid: bool,
}

/// A begin-frame signal went out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BeginFrameEvent {
    /// Monotonic begin-frame counter.
    pub frame_index: u64,
    /// When the signal was issued.
    pub timestamp: HostTime,
    /// Interval to the next signal.
    pub interval: Duration,
}

/// Marks the start of a frame phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseBeginEvent {
    /// Frame the phase belongs to.
    pub frame_index: u64,
    /// Which phase.
    pub phase: PhaseKind,
    /// When it began.
    pub timestamp: HostTime,
}

/// Marks the end of a frame phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseEndEvent {
    /// Frame the phase belongs to.
    pub frame_index: u64,
    /// Which phase.
    pub phase: PhaseKind,
    /// When it ended.
    pub timestamp: HostTime,
}

/// Per-frame timing produced by [`FrameSummaryBuilder`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSummary {
    /// Frame index.
    pub frame_index: u64,
    /// When the frame began.
    pub begin: HostTime,
    /// Ticks spent binding.
    pub bind_ticks: u64,
    /// Ticks spent painting.
    pub paint_ticks: u64,
    /// Ticks spent compositing.
    pub composite_ticks: u64,
    /// Ticks spent swapping.
    pub swap_ticks: u64,
    /// Pixels covered by the delivered damage.
    pub damage_area: u64,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events.
///
/// All methods have default no-op implementations.
pub trait TraceSink {
    /// Called when a buffer queue allocates a buffer.
    fn on_buffer_allocated(&mut self, _e: &BufferAllocatedEvent) {}

    /// Called when a reshape invalidates all buffers.
    fn on_buffers_freed(&mut self, _e: &BuffersFreedEvent) {}

    /// Called when the framebuffer binds a texture.
    fn on_texture_bound(&mut self, _e: &TextureBoundEvent) {}

    /// Called after each swap.
    fn on_swap(&mut self, _e: &SwapEvent) {}

    /// Called when a swap is acknowledged.
    fn on_page_flip(&mut self, _e: &PageFlipEvent) {}

    /// Called when the resize coalescer acts.
    fn on_resize(&mut self, _e: &ResizeEvent) {}

    /// Called after each composite.
    fn on_composite(&mut self, _e: &CompositeEvent) {}

    /// Called when a texture frame is delivered.
    fn on_texture_delivered(&mut self, _e: &TextureDeliveredEvent) {}

    /// Called when a texture frame is released.
    fn on_texture_released(&mut self, _e: &TextureReleasedEvent) {}

    /// Called when a surface identity is allocated or invalidated.
    fn on_surface_id(&mut self, _e: &SurfaceIdEvent) {}

    /// Called when a begin-frame signal is issued.
    fn on_begin_frame(&mut self, _e: &BeginFrameEvent) {}

    /// Called at the start of a frame phase.
    fn on_phase_begin(&mut self, _e: &PhaseBeginEvent) {}

    /// Called at the end of a frame phase.
    fn on_phase_end(&mut self, _e: &PhaseEndEvent) {}

    /// Called with the completed per-frame summary.
    fn on_frame_summary(&mut self, _s: &FrameSummary) {}

    /// Called with the damage rectangles of a frame.
    #[cfg(feature = "trace-rich")]
    fn on_damage_rects(&mut self, _frame_index: u64, _rects: &[PixelRect]) {}
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// A sink shared between a host and the outputs it drives.
pub type SharedTraceSink = Rc<RefCell<dyn TraceSink>>;

#[cfg(feature = "trace")]
enum SinkRef<'a> {
    Borrowed(&'a mut (dyn TraceSink + 'a)),
    Shared(RefMut<'a, dyn TraceSink + 'static>),
}

#[cfg(feature = "trace")]
impl<'a> Deref for SinkRef<'a> {
    type Target = dyn TraceSink + 'a;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Borrowed(s) => &**s,
            Self::Shared(s) => &**s,
        }
    }
}

#[cfg(feature = "trace")]
impl DerefMut for SinkRef<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            Self::Borrowed(s) => &mut **s,
            Self::Shared(s) => &mut **s,
        }
    }
}

/// Thin wrapper around an optional [`TraceSink`].
///
/// When the `trace` feature is **off**, every method compiles to nothing.
pub struct Tracer<'a> {
    #[cfg(feature = "trace")]
    sink: Option<SinkRef<'a>>,
    #[cfg(not(feature = "trace"))]
    _marker: core::marker::PhantomData<&'a mut dyn TraceSink>,
}

impl core::fmt::Debug for Tracer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

macro_rules! tracer_methods {
    ($($(#[$doc:meta])* $name:ident => $sink_fn:ident($ty:ty);)*) => {
        $(
            $(#[$doc])*
            #[inline]
            pub fn $name(&mut self, e: &$ty) {
                #[cfg(feature = "trace")]
                if let Some(s) = &mut self.sink {
                    s.$sink_fn(e);
                }
                #[cfg(not(feature = "trace"))]
                {
                    _ = e;
                }
            }
        )*
    };
}

impl<'a> Tracer<'a> {
    /// Creates a tracer that dispatches to `sink`.
    #[inline]
    #[must_use]
    pub fn new(sink: &'a mut dyn TraceSink) -> Self {
        #[cfg(feature = "trace")]
        {
            Self {
                sink: Some(SinkRef::Borrowed(sink)),
            }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Creates a tracer that borrows `sink` for its lifetime.
    ///
    /// If the sink is already borrowed (an event emitted from inside a sink
    /// callback), the tracer discards its events.
    #[inline]
    #[must_use]
    pub fn shared(sink: &'a RefCell<dyn TraceSink>) -> Self {
        #[cfg(feature = "trace")]
        {
            Self {
                sink: sink.try_borrow_mut().ok().map(SinkRef::Shared),
            }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self::none()
        }
    }

    /// A tracer over `sink`, or one that discards everything.
    #[inline]
    #[must_use]
    pub fn from_shared(sink: Option<&'a SharedTraceSink>) -> Self {
        match sink {
            Some(sink) => Self::shared(sink),
            None => Self::none(),
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: None }
        }
        #[cfg(not(feature = "trace"))]
        {
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    tracer_methods! {
        /// Emits a [`BufferAllocatedEvent`].
        buffer_allocated => on_buffer_allocated(BufferAllocatedEvent);
        /// Emits a [`BuffersFreedEvent`].
        buffers_freed => on_buffers_freed(BuffersFreedEvent);
        /// Emits a [`TextureBoundEvent`].
        texture_bound => on_texture_bound(TextureBoundEvent);
        /// Emits a [`SwapEvent`].
        swap => on_swap(SwapEvent);
        /// Emits a [`PageFlipEvent`].
        page_flip => on_page_flip(PageFlipEvent);
        /// Emits a [`ResizeEvent`].
        resize => on_resize(ResizeEvent);
        /// Emits a [`CompositeEvent`].
        composite => on_composite(CompositeEvent);
        /// Emits a [`TextureDeliveredEvent`].
        texture_delivered => on_texture_delivered(TextureDeliveredEvent);
        /// Emits a [`TextureReleasedEvent`].
        texture_released => on_texture_released(TextureReleasedEvent);
        /// Emits a [`SurfaceIdEvent`].
        surface_id => on_surface_id(SurfaceIdEvent);
        /// Emits a [`BeginFrameEvent`].
        begin_frame => on_begin_frame(BeginFrameEvent);
        /// Emits a [`PhaseBeginEvent`].
        phase_begin => on_phase_begin(PhaseBeginEvent);
        /// Emits a [`PhaseEndEvent`].
        phase_end => on_phase_end(PhaseEndEvent);
        /// Emits a [`FrameSummary`].
        frame_summary => on_frame_summary(FrameSummary);
    }

    /// Emits damage rectangles (requires `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    #[inline]
    pub fn damage_rects(&mut self, frame_index: u64, rects: &[PixelRect]) {
        if let Some(s) = &mut self.sink {
            s.on_damage_rects(frame_index, rects);
        }
    }
}

// ---------------------------------------------------------------------------
// FrameSummaryBuilder
// ---------------------------------------------------------------------------

/// Collects phase timestamps for one frame.
#[derive(Clone, Debug)]
pub struct FrameSummaryBuilder {
    frame_index: u64,
    begin: HostTime,
    starts: [Option<HostTime>; 4],
    ticks: [u64; 4],
    damage_area: u64,
}

impl FrameSummaryBuilder {
    /// Starts a summary for `frame_index` beginning at `begin`.
    #[must_use]
    pub fn new(frame_index: u64, begin: HostTime) -> Self {
        Self {
            frame_index,
            begin,
            starts: [None; 4],
            ticks: [0; 4],
            damage_area: 0,
        }
    }

    /// Frame being summarized.
    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Records the start of `phase`.
    pub fn phase_begin(&mut self, phase: PhaseKind, at: HostTime) {
        self.starts[phase_slot(phase)] = Some(at);
    }

    /// Records the end of `phase`; phases without a start are ignored.
    ///
    /// A phase measured more than once accumulates.
    pub fn phase_end(&mut self, phase: PhaseKind, at: HostTime) {
        let slot = phase_slot(phase);
        if let Some(start) = self.starts[slot].take() {
            self.ticks[slot] += at.saturating_duration_since(start).ticks();
        }
    }

    /// Records the damage delivered for the frame.
    pub fn set_damage(&mut self, damage: PixelRect) {
        self.damage_area = u64::from(damage.width) * u64::from(damage.height);
    }

    /// Produces the summary.
    #[must_use]
    pub fn finish(self) -> FrameSummary {
        FrameSummary {
            frame_index: self.frame_index,
            begin: self.begin,
            bind_ticks: self.ticks[0],
            paint_ticks: self.ticks[1],
            composite_ticks: self.ticks[2],
            swap_ticks: self.ticks[3],
            damage_area: self.damage_area,
        }
    }
}

fn phase_slot(phase: PhaseKind) -> usize {
    match phase {
        PhaseKind::Bind => 0,
        PhaseKind::Paint => 1,
        PhaseKind::Composite => 2,
        PhaseKind::Swap => 3,
    }
}
