// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr). Timestamps
//! are converted to microseconds using a [`Timebase`].

use std::io::Write;

use lamina_core::geometry::PixelRect;
use lamina_core::time::{HostTime, Timebase};
use lamina_core::trace::{
    BeginFrameEvent, BufferAllocatedEvent, BuffersFreedEvent, CompositeEvent, FrameSummary,
    PageFlipEvent, PhaseBeginEvent, PhaseEndEvent, PhaseKind, ResizeEvent, SurfaceIdEvent,
    SwapEvent, TextureBoundEvent, TextureDeliveredEvent, TextureReleasedEvent, TraceSink,
};

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
pub struct PrettyPrintSink<W: Write = Box<dyn Write>> {
    writer: W,
    timebase: Timebase,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink")
            .field("timebase", &self.timebase)
            .finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr(timebase: Timebase) -> Self {
        Self {
            writer: Box::new(std::io::stderr()),
            timebase,
        }
    }

    /// Creates a sink that writes to a boxed writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write>, timebase: Timebase) -> Self {
        Self { writer, timebase }
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W, timebase: Timebase) -> Self {
        Self { writer, timebase }
    }

    /// Consumes the sink and returns its writer.
    pub fn into_writer(self) -> W {
        self.writer
    }

    fn ticks_to_us(&self, ticks: u64) -> f64 {
        self.timebase.ticks_to_nanos(ticks) as f64 / 1000.0
    }

    fn host_us(&self, t: HostTime) -> f64 {
        self.ticks_to_us(t.ticks())
    }
}

fn phase_name(phase: PhaseKind) -> &'static str {
    match phase {
        PhaseKind::Bind => "bind",
        PhaseKind::Paint => "paint",
        PhaseKind::Composite => "composite",
        PhaseKind::Swap => "swap",
    }
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_buffer_allocated(&mut self, e: &BufferAllocatedEvent) {
        let _ = writeln!(
            self.writer,
            "[alloc] {:?} size={:?} count={}",
            e.buffer, e.size, e.allocated_count,
        );
    }

    fn on_buffers_freed(&mut self, e: &BuffersFreedEvent) {
        let _ = writeln!(
            self.writer,
            "[freed] size={:?} textures={}",
            e.size, e.textures_released,
        );
    }

    fn on_texture_bound(&mut self, e: &TextureBoundEvent) {
        let created = if e.created { "new" } else { "cached" };
        let _ = writeln!(
            self.writer,
            "[bind] {:?} texture={} {created}",
            e.buffer, e.texture.0,
        );
    }

    fn on_swap(&mut self, e: &SwapEvent) {
        match e.buffer {
            Some(buffer) => {
                let _ = writeln!(
                    self.writer,
                    "[swap] frame={} {buffer:?} damage={:?}",
                    e.frame_index, e.damage,
                );
            }
            None => {
                let _ = writeln!(self.writer, "[swap] frame={} empty", e.frame_index);
            }
        }
    }

    fn on_page_flip(&mut self, e: &PageFlipEvent) {
        let _ = writeln!(
            self.writer,
            "[flip] displayed={:?} in_flight={}",
            e.displayed, e.in_flight,
        );
    }

    fn on_resize(&mut self, e: &ResizeEvent) {
        let _ = writeln!(self.writer, "[resize] {:?} size={:?}", e.action, e.size);
    }

    fn on_composite(&mut self, e: &CompositeEvent) {
        let path = if e.fast_path { "fast" } else { "copy" };
        let _ = writeln!(
            self.writer,
            "[composite] frame={} {path} overlays={} damage={:?}",
            e.frame_index, e.overlays, e.damage,
        );
    }

    fn on_texture_delivered(&mut self, e: &TextureDeliveredEvent) {
        let popup = if e.is_popup { " popup" } else { "" };
        let _ = writeln!(
            self.writer,
            "[deliver] {:?} rect={:?}{popup}",
            e.buffer, e.content_rect,
        );
    }

    fn on_texture_released(&mut self, e: &TextureReleasedEvent) {
        let fence = if e.fenced { "fenced" } else { "unfenced" };
        let _ = writeln!(self.writer, "[release] {:?} {fence}", e.buffer);
    }

    fn on_surface_id(&mut self, e: &SurfaceIdEvent) {
        let valid = if e.valid { "valid" } else { "INVALID" };
        let _ = writeln!(
            self.writer,
            "[surface] {}.{} {valid}",
            e.parent_sequence, e.child_sequence,
        );
    }

    fn on_begin_frame(&mut self, e: &BeginFrameEvent) {
        let _ = writeln!(
            self.writer,
            "[begin] frame={} at {:.1}µs interval={:.1}µs",
            e.frame_index,
            self.host_us(e.timestamp),
            self.ticks_to_us(e.interval.ticks()),
        );
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        let _ = writeln!(
            self.writer,
            "[phase:begin] frame={} {} at {:.1}µs",
            e.frame_index,
            phase_name(e.phase),
            self.host_us(e.timestamp),
        );
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        let _ = writeln!(
            self.writer,
            "[phase:end] frame={} {} at {:.1}µs",
            e.frame_index,
            phase_name(e.phase),
            self.host_us(e.timestamp),
        );
    }

    fn on_frame_summary(&mut self, s: &FrameSummary) {
        let _ = writeln!(
            self.writer,
            "[summary] frame={} bind={:.1}µs paint={:.1}µs \
             composite={:.1}µs swap={:.1}µs damage={}px",
            s.frame_index,
            self.ticks_to_us(s.bind_ticks),
            self.ticks_to_us(s.paint_ticks),
            self.ticks_to_us(s.composite_ticks),
            self.ticks_to_us(s.swap_ticks),
            s.damage_area,
        );
    }

    fn on_damage_rects(&mut self, frame_index: u64, rects: &[PixelRect]) {
        let _ = writeln!(
            self.writer,
            "[damage] frame={frame_index} rects={}",
            rects.len(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lamina_core::buffer::BufferHandle;
    use lamina_core::geometry::PixelSize;
    use lamina_core::time::Duration;
    use lamina_core::trace::ResizeAction;

    fn output(sink: PrettyPrintSink<Vec<u8>>) -> String {
        String::from_utf8(sink.into_writer()).unwrap()
    }

    #[test]
    fn pretty_print_swap() {
        let mut sink = PrettyPrintSink::with_writer(Vec::<u8>::new(), Timebase::NANOS);
        sink.on_swap(&SwapEvent {
            frame_index: 4,
            buffer: Some(BufferHandle::from_u128(1)),
            damage: PixelRect::new(0, 0, 10, 10),
        });
        sink.on_swap(&SwapEvent {
            frame_index: 5,
            buffer: None,
            damage: PixelRect::ZERO,
        });
        let out = output(sink);
        assert!(out.contains("[swap] frame=4"), "got: {out}");
        assert!(out.contains("frame=5 empty"), "got: {out}");
    }

    #[test]
    fn pretty_print_resize_and_begin_frame() {
        let mut sink = PrettyPrintSink::with_writer(Vec::<u8>::new(), Timebase::NANOS);
        sink.on_resize(&ResizeEvent {
            action: ResizeAction::Deferred,
            size: PixelSize::new(640, 480),
        });
        sink.on_begin_frame(&BeginFrameEvent {
            frame_index: 2,
            timestamp: HostTime(2_000),
            interval: Duration(16_666_666),
        });
        let out = output(sink);
        assert!(out.contains("[resize] Deferred"), "got: {out}");
        assert!(out.contains("at 2.0µs"), "got: {out}");
    }
}
