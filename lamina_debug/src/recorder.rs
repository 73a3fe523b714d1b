// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary event recording and decoding.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events into a
//! `Vec<u8>` as fixed-size little-endian records. [`decode`] reads them back
//! as an iterator of [`RecordedEvent`].
//!
//! [`on_damage_rects`](TraceSink::on_damage_rects) stores only the count.

use lamina_core::buffer::BufferHandle;
use lamina_core::geometry::{PixelRect, PixelSize};
use lamina_core::gpu::TextureId;
use lamina_core::time::{Duration, HostTime};
use lamina_core::trace::{
    BeginFrameEvent, BufferAllocatedEvent, BuffersFreedEvent, CompositeEvent, FrameSummary,
    PageFlipEvent, PhaseBeginEvent, PhaseEndEvent, PhaseKind, ResizeAction, ResizeEvent,
    SurfaceIdEvent, SwapEvent, TextureBoundEvent, TextureDeliveredEvent, TextureReleasedEvent,
    TraceSink,
};

// ---------------------------------------------------------------------------
// Event type discriminants
// ---------------------------------------------------------------------------

const TAG_BUFFER_ALLOCATED: u8 = 1;
const TAG_BUFFERS_FREED: u8 = 2;
const TAG_TEXTURE_BOUND: u8 = 3;
const TAG_SWAP: u8 = 4;
const TAG_PAGE_FLIP: u8 = 5;
const TAG_RESIZE: u8 = 6;
const TAG_COMPOSITE: u8 = 7;
const TAG_TEXTURE_DELIVERED: u8 = 8;
const TAG_TEXTURE_RELEASED: u8 = 9;
const TAG_SURFACE_ID: u8 = 10;
const TAG_BEGIN_FRAME: u8 = 11;
const TAG_PHASE_BEGIN: u8 = 12;
const TAG_PHASE_END: u8 = 13;
const TAG_FRAME_SUMMARY: u8 = 14;
const TAG_DAMAGE_RECTS_COUNT: u8 = 15;

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that encodes events into a compact binary buffer.
#[derive(Debug, Default)]
pub struct RecorderSink {
    buf: Vec<u8>,
}

impl RecorderSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a view of the recorded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the recorder and returns the recorded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // -- encoding helpers --------------------------------------------------

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_bool(&mut self, v: bool) {
        self.write_u8(u8::from(v));
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_buffer(&mut self, b: BufferHandle) {
        self.buf.extend_from_slice(&b.name());
        self.write_bool(b.is_shared_image());
    }

    // Fixed width: absent buffers are written as a zero handle.
    fn write_option_buffer(&mut self, b: Option<BufferHandle>) {
        self.write_bool(b.is_some());
        self.write_buffer(b.unwrap_or(BufferHandle::ZERO));
    }

    fn write_size(&mut self, s: PixelSize) {
        self.write_u32(s.width);
        self.write_u32(s.height);
    }

    fn write_rect(&mut self, r: PixelRect) {
        self.write_i32(r.x);
        self.write_i32(r.y);
        self.write_u32(r.width);
        self.write_u32(r.height);
    }

    fn write_phase(&mut self, p: PhaseKind) {
        self.write_u8(match p {
            PhaseKind::Bind => 0,
            PhaseKind::Paint => 1,
            PhaseKind::Composite => 2,
            PhaseKind::Swap => 3,
        });
    }

    fn write_resize_action(&mut self, a: ResizeAction) {
        self.write_u8(match a {
            ResizeAction::Applied => 0,
            ResizeAction::Deferred => 1,
            ResizeAction::Unchanged => 2,
            ResizeAction::Released => 3,
            ResizeAction::Reissued => 4,
        });
    }
}

impl TraceSink for RecorderSink {
    fn on_buffer_allocated(&mut self, e: &BufferAllocatedEvent) {
        self.write_u8(TAG_BUFFER_ALLOCATED);
        self.write_buffer(e.buffer);
        self.write_size(e.size);
        self.write_u32(e.allocated_count);
    }

    fn on_buffers_freed(&mut self, e: &BuffersFreedEvent) {
        self.write_u8(TAG_BUFFERS_FREED);
        self.write_u32(e.textures_released);
        self.write_size(e.size);
    }

    fn on_texture_bound(&mut self, e: &TextureBoundEvent) {
        self.write_u8(TAG_TEXTURE_BOUND);
        self.write_buffer(e.buffer);
        self.write_u32(e.texture.0);
        self.write_bool(e.created);
    }

    fn on_swap(&mut self, e: &SwapEvent) {
        self.write_u8(TAG_SWAP);
        self.write_u64(e.frame_index);
        self.write_option_buffer(e.buffer);
        self.write_rect(e.damage);
    }

    fn on_page_flip(&mut self, e: &PageFlipEvent) {
        self.write_u8(TAG_PAGE_FLIP);
        self.write_option_buffer(e.displayed);
        self.write_u32(e.in_flight);
    }

    fn on_resize(&mut self, e: &ResizeEvent) {
        self.write_u8(TAG_RESIZE);
        self.write_resize_action(e.action);
        self.write_size(e.size);
    }

    fn on_composite(&mut self, e: &CompositeEvent) {
        self.write_u8(TAG_COMPOSITE);
        self.write_u64(e.frame_index);
        self.write_bool(e.fast_path);
        self.write_u32(e.overlays);
        self.write_rect(e.damage);
    }

    fn on_texture_delivered(&mut self, e: &TextureDeliveredEvent) {
        self.write_u8(TAG_TEXTURE_DELIVERED);
        self.write_buffer(e.buffer);
        self.write_rect(e.content_rect);
        self.write_bool(e.is_popup);
    }

    fn on_texture_released(&mut self, e: &TextureReleasedEvent) {
        self.write_u8(TAG_TEXTURE_RELEASED);
        self.write_buffer(e.buffer);
        self.write_bool(e.fenced);
    }

    fn on_surface_id(&mut self, e: &SurfaceIdEvent) {
        self.write_u8(TAG_SURFACE_ID);
        self.write_u32(e.parent_sequence);
        self.write_u32(e.child_sequence);
        self.write_bool(e.valid);
    }

    fn on_begin_frame(&mut self, e: &BeginFrameEvent) {
        self.write_u8(TAG_BEGIN_FRAME);
        self.write_u64(e.frame_index);
        self.write_u64(e.timestamp.ticks());
        self.write_u64(e.interval.ticks());
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        self.write_u8(TAG_PHASE_BEGIN);
        self.write_u64(e.frame_index);
        self.write_phase(e.phase);
        self.write_u64(e.timestamp.ticks());
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        self.write_u8(TAG_PHASE_END);
        self.write_u64(e.frame_index);
        self.write_phase(e.phase);
        self.write_u64(e.timestamp.ticks());
    }

    fn on_frame_summary(&mut self, s: &FrameSummary) {
        self.write_u8(TAG_FRAME_SUMMARY);
        self.write_u64(s.frame_index);
        self.write_u64(s.begin.ticks());
        self.write_u64(s.bind_ticks);
        self.write_u64(s.paint_ticks);
        self.write_u64(s.composite_ticks);
        self.write_u64(s.swap_ticks);
        self.write_u64(s.damage_area);
    }

    fn on_damage_rects(&mut self, frame_index: u64, rects: &[PixelRect]) {
        self.write_u8(TAG_DAMAGE_RECTS_COUNT);
        self.write_u64(frame_index);
        #[expect(
            clippy::cast_possible_truncation,
            reason = "damage rect count capped at u32::MAX for recording"
        )]
        self.write_u32(rects.len().min(u32::MAX as usize) as u32);
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A decoded event from a binary recording.
#[derive(Clone, Debug)]
pub enum RecordedEvent {
    /// A [`BufferAllocatedEvent`].
    BufferAllocated(BufferAllocatedEvent),
    /// A [`BuffersFreedEvent`].
    BuffersFreed(BuffersFreedEvent),
    /// A [`TextureBoundEvent`].
    TextureBound(TextureBoundEvent),
    /// A [`SwapEvent`].
    Swap(SwapEvent),
    /// A [`PageFlipEvent`].
    PageFlip(PageFlipEvent),
    /// A [`ResizeEvent`].
    Resize(ResizeEvent),
    /// A [`CompositeEvent`].
    Composite(CompositeEvent),
    /// A [`TextureDeliveredEvent`].
    TextureDelivered(TextureDeliveredEvent),
    /// A [`TextureReleasedEvent`].
    TextureReleased(TextureReleasedEvent),
    /// A [`SurfaceIdEvent`].
    SurfaceId(SurfaceIdEvent),
    /// A [`BeginFrameEvent`].
    BeginFrame(BeginFrameEvent),
    /// A [`PhaseBeginEvent`].
    PhaseBegin(PhaseBeginEvent),
    /// A [`PhaseEndEvent`].
    PhaseEnd(PhaseEndEvent),
    /// A [`FrameSummary`].
    FrameSummary(FrameSummary),
    /// Damage-rect count for a frame.
    DamageRectsCount {
        /// Frame counter.
        frame_index: u64,
        /// Number of damage rects.
        count: u32,
    },
}

/// Decodes a byte slice produced by [`RecorderSink`] into an iterator of
/// [`RecordedEvent`].
pub fn decode(bytes: &[u8]) -> DecodeIter<'_> {
    DecodeIter {
        data: bytes,
        pos: 0,
    }
}

/// Iterator over decoded events.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.data.get(self.pos..self.pos + N)?.try_into().ok()?;
        self.pos += N;
        Some(bytes)
    }

    fn read_u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|[b]| b)
    }

    fn read_bool(&mut self) -> Option<bool> {
        self.read_u8().map(|b| b != 0)
    }

    fn read_u32(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }

    fn read_i32(&mut self) -> Option<i32> {
        self.take().map(i32::from_le_bytes)
    }

    fn read_u64(&mut self) -> Option<u64> {
        self.take().map(u64::from_le_bytes)
    }

    fn read_buffer(&mut self) -> Option<BufferHandle> {
        let name = self.take::<16>()?;
        Some(BufferHandle::new(name, self.read_bool()?))
    }

    fn read_option_buffer(&mut self) -> Option<Option<BufferHandle>> {
        let present = self.read_bool()?;
        let buffer = self.read_buffer()?;
        Some(present.then_some(buffer))
    }

    fn read_size(&mut self) -> Option<PixelSize> {
        Some(PixelSize::new(self.read_u32()?, self.read_u32()?))
    }

    fn read_rect(&mut self) -> Option<PixelRect> {
        Some(PixelRect::new(
            self.read_i32()?,
            self.read_i32()?,
            self.read_u32()?,
            self.read_u32()?,
        ))
    }

    fn read_phase(&mut self) -> Option<PhaseKind> {
        Some(match self.read_u8()? {
            0 => PhaseKind::Bind,
            1 => PhaseKind::Paint,
            2 => PhaseKind::Composite,
            _ => PhaseKind::Swap,
        })
    }

    fn read_resize_action(&mut self) -> Option<ResizeAction> {
        Some(match self.read_u8()? {
            0 => ResizeAction::Applied,
            1 => ResizeAction::Deferred,
            2 => ResizeAction::Unchanged,
            3 => ResizeAction::Released,
            _ => ResizeAction::Reissued,
        })
    }

    fn decode_event(&mut self, tag: u8) -> Option<RecordedEvent> {
        Some(match tag {
            TAG_BUFFER_ALLOCATED => RecordedEvent::BufferAllocated(BufferAllocatedEvent {
                buffer: self.read_buffer()?,
                size: self.read_size()?,
                allocated_count: self.read_u32()?,
            }),
            TAG_BUFFERS_FREED => RecordedEvent::BuffersFreed(BuffersFreedEvent {
                textures_released: self.read_u32()?,
                size: self.read_size()?,
            }),
            TAG_TEXTURE_BOUND => RecordedEvent::TextureBound(TextureBoundEvent {
                buffer: self.read_buffer()?,
                texture: TextureId(self.read_u32()?),
                created: self.read_bool()?,
            }),
            TAG_SWAP => RecordedEvent::Swap(SwapEvent {
                frame_index: self.read_u64()?,
                buffer: self.read_option_buffer()?,
                damage: self.read_rect()?,
            }),
            TAG_PAGE_FLIP => RecordedEvent::PageFlip(PageFlipEvent {
                displayed: self.read_option_buffer()?,
                in_flight: self.read_u32()?,
            }),
            TAG_RESIZE => RecordedEvent::Resize(ResizeEvent {
                action: self.read_resize_action()?,
                size: self.read_size()?,
            }),
            TAG_COMPOSITE => RecordedEvent::Composite(CompositeEvent {
                frame_index: self.read_u64()?,
                fast_path: self.read_bool()?,
                overlays: self.read_u32()?,
                damage: self.read_rect()?,
            }),
            TAG_TEXTURE_DELIVERED => RecordedEvent::TextureDelivered(TextureDeliveredEvent {
                buffer: self.read_buffer()?,
                content_rect: self.read_rect()?,
                is_popup: self.read_bool()?,
            }),
            TAG_TEXTURE_RELEASED => RecordedEvent::TextureReleased(TextureReleasedEvent {
                buffer: self.read_buffer()?,
                fenced: self.read_bool()?,
            }),
            TAG_SURFACE_ID => RecordedEvent::SurfaceId(SurfaceIdEvent {
                parent_sequence: self.read_u32()?,
                child_sequence: self.read_u32()?,
                valid: self.read_bool()?,
            }),
            TAG_BEGIN_FRAME => RecordedEvent::BeginFrame(BeginFrameEvent {
                frame_index: self.read_u64()?,
                timestamp: HostTime(self.read_u64()?),
                interval: Duration(self.read_u64()?),
            }),
            TAG_PHASE_BEGIN => RecordedEvent::PhaseBegin(PhaseBeginEvent {
                frame_index: self.read_u64()?,
                phase: self.read_phase()?,
                timestamp: HostTime(self.read_u64()?),
            }),
            TAG_PHASE_END => RecordedEvent::PhaseEnd(PhaseEndEvent {
                frame_index: self.read_u64()?,
                phase: self.read_phase()?,
                timestamp: HostTime(self.read_u64()?),
            }),
            TAG_FRAME_SUMMARY => RecordedEvent::FrameSummary(FrameSummary {
                frame_index: self.read_u64()?,
                begin: HostTime(self.read_u64()?),
                bind_ticks: self.read_u64()?,
                paint_ticks: self.read_u64()?,
                composite_ticks: self.read_u64()?,
                swap_ticks: self.read_u64()?,
                damage_area: self.read_u64()?,
            }),
            TAG_DAMAGE_RECTS_COUNT => RecordedEvent::DamageRectsCount {
                frame_index: self.read_u64()?,
                count: self.read_u32()?,
            },
            _ => return None, // unknown tag → stop iteration
        })
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = RecordedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let tag = self.read_u8()?;
        self.decode_event(tag)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(n: u128) -> BufferHandle {
        BufferHandle::from_u128(n)
    }

    /// Records one frame of a presenting surface: bind, swap, flip, deliver,
    /// release.
    fn record_frame(rec: &mut RecorderSink) {
        rec.on_buffer_allocated(&BufferAllocatedEvent {
            buffer: buffer(1),
            size: PixelSize::new(640, 480),
            allocated_count: 1,
        });
        rec.on_texture_bound(&TextureBoundEvent {
            buffer: buffer(1),
            texture: TextureId(3),
            created: true,
        });
        rec.on_swap(&SwapEvent {
            frame_index: 0,
            buffer: Some(buffer(1)),
            damage: PixelRect::new(0, 0, 640, 480),
        });
        rec.on_page_flip(&PageFlipEvent {
            displayed: Some(buffer(1)),
            in_flight: 0,
        });
        rec.on_texture_delivered(&TextureDeliveredEvent {
            buffer: buffer(1),
            content_rect: PixelRect::new(-4, 2, 640, 480),
            is_popup: true,
        });
        rec.on_texture_released(&TextureReleasedEvent {
            buffer: buffer(1),
            fenced: false,
        });
    }

    #[test]
    fn presented_frame_decodes_in_order() {
        let mut rec = RecorderSink::new();
        record_frame(&mut rec);

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(events.len(), 6, "every event decoded");
        assert!(matches!(events[0], RecordedEvent::BufferAllocated(_)), "alloc first");
        match &events[1] {
            RecordedEvent::TextureBound(e) => {
                assert_eq!(e.texture, TextureId(3), "texture kept");
                assert!(e.created, "created flag kept");
            }
            other => panic!("expected TextureBound, got {other:?}"),
        }
        match &events[2] {
            RecordedEvent::Swap(e) => {
                assert_eq!(e.buffer, Some(buffer(1)), "swapped buffer");
                assert_eq!(e.damage, PixelRect::new(0, 0, 640, 480), "damage");
            }
            other => panic!("expected Swap, got {other:?}"),
        }
        match &events[4] {
            RecordedEvent::TextureDelivered(e) => {
                assert_eq!(e.content_rect.x, -4, "negative offsets survive");
                assert!(e.is_popup, "popup flag");
            }
            other => panic!("expected TextureDelivered, got {other:?}"),
        }
        assert!(matches!(events[5], RecordedEvent::TextureReleased(_)), "release last");
    }

    #[test]
    fn empty_swap_keeps_fixed_width() {
        let mut rec = RecorderSink::new();
        rec.on_swap(&SwapEvent {
            frame_index: 9,
            buffer: None,
            damage: PixelRect::ZERO,
        });
        rec.on_resize(&ResizeEvent {
            action: ResizeAction::Reissued,
            size: PixelSize::new(10, 20),
        });

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        match &events[..] {
            [RecordedEvent::Swap(swap), RecordedEvent::Resize(resize)] => {
                assert_eq!(swap.buffer, None, "no buffer");
                assert_eq!(resize.action, ResizeAction::Reissued, "action");
                assert_eq!(resize.size, PixelSize::new(10, 20), "size");
            }
            other => panic!("expected swap then resize, got {other:?}"),
        }
    }

    #[test]
    fn frame_summary_and_phases() {
        let mut rec = RecorderSink::new();
        rec.on_phase_begin(&PhaseBeginEvent {
            frame_index: 5,
            phase: PhaseKind::Composite,
            timestamp: HostTime(2000),
        });
        rec.on_phase_end(&PhaseEndEvent {
            frame_index: 5,
            phase: PhaseKind::Composite,
            timestamp: HostTime(3000),
        });
        rec.on_frame_summary(&FrameSummary {
            frame_index: 5,
            begin: HostTime(1000),
            bind_ticks: 10,
            paint_ticks: 400,
            composite_ticks: 1000,
            swap_ticks: 20,
            damage_area: 640 * 480,
        });

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(events.len(), 3, "three events");
        match &events[1] {
            RecordedEvent::PhaseEnd(e) => {
                assert_eq!(e.phase, PhaseKind::Composite, "phase");
                assert_eq!(e.timestamp, HostTime(3000), "timestamp");
            }
            other => panic!("expected PhaseEnd, got {other:?}"),
        }
        match &events[2] {
            RecordedEvent::FrameSummary(s) => {
                assert_eq!(s.composite_ticks, 1000, "composite time");
                assert_eq!(s.damage_area, 640 * 480, "damage area");
            }
            other => panic!("expected FrameSummary, got {other:?}"),
        }
    }

    #[test]
    fn truncated_record_stops_iteration() {
        let mut rec = RecorderSink::new();
        record_frame(&mut rec);
        let bytes = rec.into_bytes();
        let events = decode(&bytes[..bytes.len() - 1]).count();
        assert_eq!(events, 5, "partial trailing record dropped");
    }

    #[test]
    fn empty_buffer_decodes_to_nothing() {
        assert_eq!(decode(&[]).count(), 0, "no events");
    }

    #[test]
    fn damage_rects_count() {
        let mut rec = RecorderSink::new();
        rec.on_damage_rects(42, &[PixelRect::new(0, 0, 1, 1), PixelRect::new(5, 5, 2, 2)]);
        match decode(rec.as_bytes()).next() {
            Some(RecordedEvent::DamageRectsCount { frame_index, count }) => {
                assert_eq!(frame_index, 42, "frame");
                assert_eq!(count, 2, "count");
            }
            other => panic!("expected DamageRectsCount, got {other:?}"),
        }
    }
}
