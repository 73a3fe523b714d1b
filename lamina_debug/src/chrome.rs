// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format exporter.
//!
//! [`export`] reads recorded bytes from a [`RecorderSink`](super::recorder::RecorderSink)
//! and writes [Chrome Trace Event Format][spec] JSON to the given writer.
//!
//! Most surface events carry no timestamp of their own. They are placed at
//! the latest timestamp seen so far in the recording (begin-frame, phase, or
//! summary), so they line up with the frame they belong to.
//!
//! [spec]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use std::io::{self, Write};

use serde_json::{Value, json};

use lamina_core::time::Timebase;

use crate::recorder::{RecordedEvent, decode};

const TID_SURFACE: u32 = 0;
const TID_HOST: u32 = 1;

/// Exports recorded events as Chrome Trace Event Format JSON.
///
/// The output is a complete JSON array of trace event objects, suitable for
/// loading into `chrome://tracing` or [Perfetto](https://ui.perfetto.dev/).
///
/// Timestamps are converted to microseconds using the provided [`Timebase`].
pub fn export(bytes: &[u8], timebase: Timebase, writer: &mut dyn Write) -> io::Result<()> {
    let mut events: Vec<Value> = Vec::new();
    let mut now_us = 0.0;

    for recorded in decode(bytes) {
        let event = match recorded {
            RecordedEvent::BufferAllocated(e) => instant(
                "BufferAllocated",
                "Buffers",
                TID_SURFACE,
                now_us,
                json!({
                    "buffer": format!("{:?}", e.buffer),
                    "width": e.size.width,
                    "height": e.size.height,
                    "allocated_count": e.allocated_count,
                }),
            ),
            RecordedEvent::BuffersFreed(e) => instant(
                "BuffersFreed",
                "Buffers",
                TID_SURFACE,
                now_us,
                json!({
                    "textures_released": e.textures_released,
                    "width": e.size.width,
                    "height": e.size.height,
                }),
            ),
            RecordedEvent::TextureBound(e) => instant(
                "TextureBound",
                "Surface",
                TID_SURFACE,
                now_us,
                json!({
                    "buffer": format!("{:?}", e.buffer),
                    "texture": e.texture.0,
                    "created": e.created,
                }),
            ),
            RecordedEvent::Swap(e) => instant(
                "Swap",
                "Surface",
                TID_SURFACE,
                now_us,
                json!({
                    "frame_index": e.frame_index,
                    "buffer": e.buffer.map(|b| format!("{b:?}")),
                    "damage": format!("{:?}", e.damage),
                }),
            ),
            RecordedEvent::PageFlip(e) => instant(
                "PageFlip",
                "Surface",
                TID_SURFACE,
                now_us,
                json!({
                    "displayed": e.displayed.map(|b| format!("{b:?}")),
                    "in_flight": e.in_flight,
                }),
            ),
            RecordedEvent::Resize(e) => instant(
                "Resize",
                "Host",
                TID_HOST,
                now_us,
                json!({
                    "action": format!("{:?}", e.action),
                    "width": e.size.width,
                    "height": e.size.height,
                }),
            ),
            RecordedEvent::Composite(e) => instant(
                "Composite",
                "Host",
                TID_HOST,
                now_us,
                json!({
                    "frame_index": e.frame_index,
                    "fast_path": e.fast_path,
                    "overlays": e.overlays,
                    "damage": format!("{:?}", e.damage),
                }),
            ),
            RecordedEvent::TextureDelivered(e) => instant(
                "TextureDelivered",
                "Delivery",
                TID_SURFACE,
                now_us,
                json!({
                    "buffer": format!("{:?}", e.buffer),
                    "content_rect": format!("{:?}", e.content_rect),
                    "is_popup": e.is_popup,
                }),
            ),
            RecordedEvent::TextureReleased(e) => instant(
                "TextureReleased",
                "Delivery",
                TID_SURFACE,
                now_us,
                json!({
                    "buffer": format!("{:?}", e.buffer),
                    "fenced": e.fenced,
                }),
            ),
            RecordedEvent::SurfaceId(e) => instant(
                "SurfaceId",
                "Host",
                TID_HOST,
                now_us,
                json!({
                    "parent_sequence": e.parent_sequence,
                    "child_sequence": e.child_sequence,
                    "valid": e.valid,
                }),
            ),
            RecordedEvent::BeginFrame(e) => {
                now_us = ticks_to_us(e.timestamp.ticks(), timebase);
                let mut event = instant(
                    "BeginFrame",
                    "Pacing",
                    TID_HOST,
                    now_us,
                    json!({
                        "frame_index": e.frame_index,
                        "interval_us": ticks_to_us(e.interval.ticks(), timebase),
                    }),
                );
                event["s"] = json!("g");
                event
            }
            RecordedEvent::PhaseBegin(e) => {
                now_us = ticks_to_us(e.timestamp.ticks(), timebase);
                json!({
                    "ph": "B",
                    "name": format!("{:?}", e.phase),
                    "cat": "Frame",
                    "ts": now_us,
                    "pid": 0,
                    "tid": TID_SURFACE,
                    "args": {
                        "frame_index": e.frame_index,
                    }
                })
            }
            RecordedEvent::PhaseEnd(e) => {
                now_us = ticks_to_us(e.timestamp.ticks(), timebase);
                json!({
                    "ph": "E",
                    "name": format!("{:?}", e.phase),
                    "cat": "Frame",
                    "ts": now_us,
                    "pid": 0,
                    "tid": TID_SURFACE,
                    "args": {
                        "frame_index": e.frame_index,
                    }
                })
            }
            RecordedEvent::FrameSummary(s) => {
                now_us = now_us.max(ticks_to_us(s.begin.ticks(), timebase));
                instant(
                    "FrameSummary",
                    "Summary",
                    TID_SURFACE,
                    now_us,
                    json!({
                        "frame_index": s.frame_index,
                        "bind_us": ticks_to_us(s.bind_ticks, timebase),
                        "paint_us": ticks_to_us(s.paint_ticks, timebase),
                        "composite_us": ticks_to_us(s.composite_ticks, timebase),
                        "swap_us": ticks_to_us(s.swap_ticks, timebase),
                        "damage_area": s.damage_area,
                    }),
                )
            }
            RecordedEvent::DamageRectsCount { frame_index, count } => instant(
                "DamageRects",
                "Rich",
                TID_HOST,
                now_us,
                json!({
                    "frame_index": frame_index,
                    "count": count,
                }),
            ),
        };
        events.push(event);
    }

    serde_json::to_writer_pretty(writer, &events)?;
    Ok(())
}

fn instant(name: &str, cat: &str, tid: u32, ts: f64, args: Value) -> Value {
    json!({
        "ph": "i",
        "name": name,
        "cat": cat,
        "ts": ts,
        "pid": 0,
        "tid": tid,
        "s": "t",
        "args": args,
    })
}

fn ticks_to_us(ticks: u64, timebase: Timebase) -> f64 {
    timebase.ticks_to_nanos(ticks) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::RecorderSink;
    use lamina_core::buffer::BufferHandle;
    use lamina_core::geometry::PixelRect;
    use lamina_core::time::{Duration, HostTime};
    use lamina_core::trace::{
        BeginFrameEvent, PhaseBeginEvent, PhaseEndEvent, PhaseKind, SwapEvent, TraceSink,
    };

    #[test]
    fn export_produces_valid_json() {
        let mut rec = RecorderSink::new();
        rec.on_begin_frame(&BeginFrameEvent {
            frame_index: 0,
            timestamp: HostTime(1_000_000),
            interval: Duration(16_666_667),
        });
        rec.on_phase_begin(&PhaseBeginEvent {
            frame_index: 0,
            phase: PhaseKind::Paint,
            timestamp: HostTime(1_000_000),
        });
        rec.on_phase_end(&PhaseEndEvent {
            frame_index: 0,
            phase: PhaseKind::Paint,
            timestamp: HostTime(1_000_100),
        });
        rec.on_swap(&SwapEvent {
            frame_index: 0,
            buffer: Some(BufferHandle::from_u128(1)),
            damage: PixelRect::new(0, 0, 4, 4),
        });

        let mut out = Vec::new();
        export(rec.as_bytes(), Timebase::NANOS, &mut out).unwrap();
        let json_str = String::from_utf8(out).unwrap();

        let parsed: Vec<Value> = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.len(), 4, "one object per event");

        assert_eq!(parsed[0]["ph"], "i", "begin-frame is an instant");
        assert_eq!(parsed[0]["name"], "BeginFrame", "begin-frame name");
        assert_eq!(parsed[1]["ph"], "B", "phase begin");
        assert_eq!(parsed[1]["name"], "Paint", "phase name");
        assert_eq!(parsed[2]["ph"], "E", "phase end");

        // Untimed events inherit the latest timestamp.
        assert_eq!(parsed[3]["name"], "Swap", "swap name");
        assert_eq!(parsed[3]["ts"], 1000.1, "placed at the phase end");
    }

    #[test]
    fn export_empty_recording() {
        let mut out = Vec::new();
        export(&[], Timebase::NANOS, &mut out).unwrap();
        let json_str = String::from_utf8(out).unwrap();
        let parsed: Vec<Value> = serde_json::from_str(&json_str).unwrap();
        assert!(parsed.is_empty(), "no events");
    }
}
