// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Off-screen compositing surfaces and frame delivery.
//!
//! `lamina_core` renders a browser-like view tree without a window. Frames are
//! painted into a small rotation of shared GPU buffers and handed to an
//! embedder, either as software bitmaps or as shared textures the embedder
//! releases when it is done reading. The crate is `no_std` compatible (with
//! `alloc`); GPU work goes through the [`GpuContext`](gpu::GpuContext) and
//! [`SharedImageInterface`](buffer::SharedImageInterface) traits that a
//! backend implements.
//!
//! # Architecture
//!
//! ```text
//!   OffscreenHost ── views (root / popup / child)
//!       │  resize coalescing, surface identities, begin-frame pacing
//!       │
//!       ├─ software path: FrameCompositor ──► PaintSink::on_paint
//!       │                     ▲
//!       │           popup + ViewProxy overlays
//!       │
//!       └─ GPU path: OffscreenOutput
//!                        │
//!                        ▼
//!                   OverlaySurface ──► BufferQueue ──► SharedImageInterface
//!                        │
//!                        ▼
//!                   TextureSink::on_texture_paint ──► ReleaseCallback
//! ```
//!
//! **[`buffer_queue`]**: the rotation of shared buffers behind a surface:
//! at most one current, a FIFO of in-flight swaps, one displayed, and a
//! free list.
//!
//! **[`surface`]**: binds the current buffer as the render target, swaps
//! it out as an overlay, and tears everything down in a fixed order.
//!
//! **[`output`]**: drives a surface and delivers each presented buffer to a
//! [`TextureSink`](delivery::TextureSink), holding the buffer until the
//! embedder releases it.
//!
//! **[`host`]**: the view tree, popup and child lifecycles, input routing,
//! and software delivery.
//!
//! **[`compositor`]** and **[`proxy`]**: software composition of popups and
//! externally painted proxy views over a frame.
//!
//! **[`resize`]**, **[`identity`]**, **[`pacing`]**: resize throttling,
//! surface identity sequencing, and begin-frame signals.
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) trait and event types, with
//! the zero-overhead [`Tracer`](trace::Tracer) wrapper.
//!
//! # Crate features
//!
//! - `std` (disabled by default): Enables `std` support in dependencies.
//! - `trace` (disabled by default): Enables `Tracer` method bodies (one branch
//!   per call site).
//! - `trace-rich` (disabled by default, implies `trace`): Gates damage-rect
//!   events.

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod bitmap;
pub mod buffer;
pub mod buffer_queue;
pub mod compositor;
pub mod config;
pub mod delivery;
pub mod geometry;
pub mod gpu;
pub mod host;
pub mod identity;
pub mod output;
pub mod pacing;
pub mod proxy;
pub mod resize;
pub mod surface;
pub mod sync;
pub mod time;
pub mod trace;

#[cfg(test)]
mod testing;
