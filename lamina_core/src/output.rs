// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Zero-copy frame output.
//!
//! [`OffscreenOutput`] drives an [`OverlaySurface`] and hands each presented
//! buffer to a [`TextureSink`]. The receiver returns buffers by firing the
//! frame's [`ReleaseCallback`]; releases are queued and applied on the next
//! [`process_releases`](OffscreenOutput::process_releases).
//!
//! Page flips are acknowledged strictly in swap order, and only once the
//! matching frame has been released. Because the buffer queue recycles a
//! buffer only after a later flip replaces it on display, a buffer the
//! receiver still reads never comes back through
//! [`TextureSink::on_texture_paint`].
//!
//! A frame runs bind, then an optional [`paint`](OffscreenOutput::paint),
//! then swap. Each phase is timed with the installed [`Clock`] and reported
//! to the trace sink, followed by a [`FrameSummary`](crate::trace::FrameSummary)
//! once the frame is delivered.

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;

use hashbrown::HashMap;

use crate::buffer::{BufferHandle, SharedImageInterface};
use crate::config::SurfaceConfig;
use crate::delivery::{ReleaseCallback, TextureFrame, TextureSink};
use crate::geometry::{PixelRect, PixelSize};
use crate::gpu::GpuContext;
use crate::surface::{Binding, OverlaySurface, SurfaceError};
use crate::sync::{SyncToken, SyncTokenProvider};
use crate::time::{Clock, HostTime};
use crate::trace::{
    BufferAllocatedEvent, BuffersFreedEvent, FrameSummaryBuilder, PageFlipEvent, PhaseBeginEvent,
    PhaseEndEvent, PhaseKind, SharedTraceSink, SwapEvent, TextureBoundEvent,
    TextureDeliveredEvent, TextureReleasedEvent, Tracer,
};

#[derive(Clone, Copy, Debug)]
struct Released {
    buffer: BufferHandle,
    token: Option<SyncToken>,
}

type ReleaseQueue = Rc<RefCell<Vec<Released>>>;

/// A frame between its first bind and its swap.
#[derive(Clone, Debug)]
struct PendingFrame {
    binding: Binding,
    summary: FrameSummaryBuilder,
}

/// Presents an [`OverlaySurface`] to a [`TextureSink`].
pub struct OffscreenOutput<C: GpuContext, S: SharedImageInterface> {
    context: Rc<C>,
    surface: OverlaySurface<C, S>,
    releases: ReleaseQueue,
    /// Released buffers still waiting for their turn in swap order, with the
    /// receiver's fence.
    released: HashMap<BufferHandle, Option<SyncToken>>,
    /// Delivered buffers in swap order.
    outstanding: VecDeque<BufferHandle>,
    pending: Option<PendingFrame>,
    frame_index: u64,
    trace_sink: Option<SharedTraceSink>,
    clock: Option<Rc<dyn Clock>>,
}

impl<C: GpuContext, S: SharedImageInterface> fmt::Debug for OffscreenOutput<C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffscreenOutput")
            .field("surface", &self.surface)
            .field("outstanding", &self.outstanding)
            .field("painting", &self.pending.is_some())
            .field("frame_index", &self.frame_index)
            .finish_non_exhaustive()
    }
}

impl<C: GpuContext, S: SharedImageInterface> OffscreenOutput<C, S> {
    /// Creates the output and its surface.
    pub fn new(
        context: Rc<C>,
        shared_images: Rc<S>,
        config: SurfaceConfig,
    ) -> Result<Self, SurfaceError> {
        let surface = OverlaySurface::new(Rc::clone(&context), shared_images, config)?;
        Ok(Self {
            context,
            surface,
            releases: Rc::default(),
            released: HashMap::new(),
            outstanding: VecDeque::new(),
            pending: None,
            frame_index: 0,
            trace_sink: None,
            clock: None,
        })
    }

    /// Installs (or removes) the sink receiving buffer lifecycle events.
    pub fn set_trace_sink(&mut self, sink: Option<SharedTraceSink>) {
        self.trace_sink = sink;
    }

    /// Installs (or removes) the clock timing frame phases. Without one,
    /// every phase is stamped at zero.
    pub fn set_clock(&mut self, clock: Option<Rc<dyn Clock>>) {
        self.clock = clock;
    }

    fn tracer(&self) -> Tracer<'_> {
        Tracer::from_shared(self.trace_sink.as_ref())
    }

    fn now(&self) -> HostTime {
        self.clock.as_ref().map_or(HostTime(0), |clock| clock.now())
    }

    /// The surface being presented.
    #[must_use]
    pub fn surface(&self) -> &OverlaySurface<C, S> {
        &self.surface
    }

    /// Mutable access to the surface, for painting into its framebuffer.
    pub fn surface_mut(&mut self) -> &mut OverlaySurface<C, S> {
        &mut self.surface
    }

    /// Delivered frames not yet acknowledged.
    #[must_use]
    pub fn outstanding_frames(&self) -> usize {
        self.outstanding.len()
    }

    /// Resizes the surface. Returns `true` if buffers were reallocated.
    ///
    /// A reallocating resize binds a buffer of the new size right away, so
    /// the next frame paints at the new size.
    pub fn resize(&mut self, size: PixelSize, scale: f32) -> Result<bool, SurfaceError> {
        let cached = self.surface.cached_texture_count();
        if !self.surface.reshape(size, scale) {
            return Ok(false);
        }
        self.pending = None;
        #[expect(
            clippy::cast_possible_truncation,
            reason = "texture cache is bounded by the buffer cap"
        )]
        let textures_released = cached as u32;
        self.tracer().buffers_freed(&BuffersFreedEvent {
            textures_released,
            size,
        });
        if let Some(binding) = self.surface.bind_framebuffer()? {
            self.trace_binding(&binding);
        }
        Ok(true)
    }

    /// Binds the next buffer and runs `paint` while it is the render target.
    ///
    /// Returns `Ok(None)` without calling `paint` if every buffer is held by
    /// the receiver or the display pipeline.
    pub fn paint<R>(
        &mut self,
        paint: impl FnOnce(&Binding) -> R,
    ) -> Result<Option<R>, SurfaceError> {
        let Some(mut frame) = self.begin_frame()? else {
            return Ok(None);
        };
        self.phase_begin(&mut frame.summary, PhaseKind::Paint);
        let out = paint(&frame.binding);
        self.phase_end(&mut frame.summary, PhaseKind::Paint);
        self.pending = Some(frame);
        Ok(Some(out))
    }

    /// Presents the bound buffer and delivers it to `sink`.
    ///
    /// Returns the delivered buffer, or `None` if every buffer is still held
    /// by the receiver or the display pipeline.
    pub fn present(
        &mut self,
        sink: &mut dyn TextureSink,
    ) -> Result<Option<BufferHandle>, SurfaceError> {
        let Some(mut frame) = self.begin_frame()? else {
            return Ok(None);
        };
        let damage = self.surface.current_buffer_damage();

        self.phase_begin(&mut frame.summary, PhaseKind::Swap);
        let swap = self.surface.swap_buffers();
        self.phase_end(&mut frame.summary, PhaseKind::Swap);
        let swap = swap?;
        if let Some(rebound) = swap.rebound {
            self.trace_binding(&rebound);
        }
        let Some(buffer) = swap.presented else {
            return Ok(None);
        };
        let frame_index = frame.summary.frame_index();
        self.frame_index += 1;
        let content_rect = PixelRect::from_size(self.surface.size());
        let sync_token = self.surface.gen_sync_token();
        self.outstanding.push_back(buffer);

        frame.summary.set_damage(damage);
        let mut tracer = self.tracer();
        tracer.swap(&SwapEvent {
            frame_index,
            buffer: Some(buffer),
            damage,
        });
        tracer.texture_delivered(&TextureDeliveredEvent {
            buffer,
            content_rect,
            is_popup: false,
        });
        tracer.frame_summary(&frame.summary.finish());
        #[cfg(feature = "trace-rich")]
        tracer.damage_rects(frame_index, &[damage]);
        drop(tracer);

        let releases = Rc::clone(&self.releases);
        sink.on_texture_paint(TextureFrame {
            buffer,
            sync_token,
            content_rect,
            is_popup: false,
            release: ReleaseCallback::new(move |token| {
                releases.borrow_mut().push(Released { buffer, token });
            }),
        });
        Ok(Some(buffer))
    }

    /// Applies queued releases and acknowledges every page flip that is now
    /// in order. Returns the number of flips acknowledged.
    pub fn process_releases(&mut self) -> usize {
        let drained: Vec<Released> = self.releases.borrow_mut().drain(..).collect();
        for r in drained {
            self.tracer().texture_released(&TextureReleasedEvent {
                buffer: r.buffer,
                fenced: r.token.is_some(),
            });
            self.released.insert(r.buffer, r.token);
        }

        let mut acked = 0;
        while let Some(&front) = self.outstanding.front() {
            let Some(token) = self.released.remove(&front) else {
                break;
            };
            if let Some(token) = token {
                self.context.wait_sync_token(&token);
            }
            self.outstanding.pop_front();
            let displayed = self.surface.swap_buffers_complete();
            #[expect(
                clippy::cast_possible_truncation,
                reason = "in-flight depth is bounded by the buffer cap"
            )]
            let in_flight = self.outstanding.len() as u32;
            self.tracer().page_flip(&PageFlipEvent {
                displayed,
                in_flight,
            });
            acked += 1;
        }
        acked
    }

    /// The frame in progress, binding a buffer to start one if needed.
    fn begin_frame(&mut self) -> Result<Option<PendingFrame>, SurfaceError> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        let mut summary = FrameSummaryBuilder::new(self.frame_index, self.now());
        self.phase_begin(&mut summary, PhaseKind::Bind);
        let binding = self.surface.bind_framebuffer();
        self.phase_end(&mut summary, PhaseKind::Bind);
        let Some(binding) = binding? else {
            return Ok(None);
        };
        self.trace_binding(&binding);
        Ok(Some(PendingFrame { binding, summary }))
    }

    fn phase_begin(&self, summary: &mut FrameSummaryBuilder, phase: PhaseKind) {
        let timestamp = self.now();
        summary.phase_begin(phase, timestamp);
        self.tracer().phase_begin(&PhaseBeginEvent {
            frame_index: summary.frame_index(),
            phase,
            timestamp,
        });
    }

    fn phase_end(&self, summary: &mut FrameSummaryBuilder, phase: PhaseKind) {
        let timestamp = self.now();
        summary.phase_end(phase, timestamp);
        self.tracer().phase_end(&PhaseEndEvent {
            frame_index: summary.frame_index(),
            phase,
            timestamp,
        });
    }

    fn trace_binding(&self, binding: &Binding) {
        let mut tracer = self.tracer();
        if binding.buffer_allocated {
            tracer.buffer_allocated(&BufferAllocatedEvent {
                buffer: binding.buffer,
                size: self.surface.size(),
                allocated_count: self
                    .surface
                    .buffer_queue()
                    .map_or(0, |queue| queue.live_buffers()),
            });
        }
        tracer.texture_bound(&TextureBoundEvent {
            buffer: binding.buffer,
            texture: binding.texture,
            created: binding.texture_created,
        });
    }
}
