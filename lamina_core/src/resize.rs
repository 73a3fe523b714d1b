// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Resize coalescing.
//!
//! Only one resize may be outstanding on the display pipeline at a time. The
//! [`ResizeCoalescer`] holds further requests until a frame at the committed
//! size has been delivered, then re-issues only the latest of them.
//!
//! ```text
//!   Idle ──request(changed)──► Held ──request──► HeldPending
//!    ▲                          │ ▲                  │
//!    └──────complete────────────┘ └────complete──────┘
//!                                    (re-issue latest)
//! ```

use kurbo::Size;

use crate::geometry::PixelSize;

/// View size in DIPs plus the device scale factor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceGeometry {
    /// Size in device-independent pixels.
    pub size: Size,
    /// Device scale factor.
    pub scale: f64,
}

impl SurfaceGeometry {
    /// Creates a geometry.
    #[must_use]
    pub const fn new(size: Size, scale: f64) -> Self {
        Self { size, scale }
    }

    /// Backing size in physical pixels.
    #[must_use]
    pub fn pixel_size(&self) -> PixelSize {
        PixelSize::from_dip(self.size, self.scale)
    }
}

/// Where the coalescer is in its hold cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResizeState {
    /// No resize outstanding.
    Idle,
    /// A resize is outstanding.
    Held,
    /// A resize is outstanding and another arrived behind it.
    HeldPending,
}

/// Outcome of [`ResizeCoalescer::request`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ResizeDecision {
    /// Apply this geometry now. The coalescer is now held.
    Apply(SurfaceGeometry),
    /// Held; the request is remembered and re-issued later.
    Deferred,
    /// Nothing changed.
    Unchanged,
}

/// Outcome of [`ResizeCoalescer::complete`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ResizeRelease {
    /// No resize was outstanding.
    NotHeld,
    /// The delivered frame predates the outstanding resize; still held.
    Mismatch,
    /// The hold is released.
    Released,
    /// The hold moved on to a deferred request, which must be applied now.
    Reissue(SurfaceGeometry),
}

/// Serializes resize requests so that at most one is in flight.
#[derive(Clone, Copy, Debug)]
pub struct ResizeCoalescer {
    state: ResizeState,
    committed: Option<SurfaceGeometry>,
    latest: Option<SurfaceGeometry>,
}

impl Default for ResizeCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResizeCoalescer {
    /// An idle coalescer with nothing committed.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ResizeState::Idle,
            committed: None,
            latest: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ResizeState {
        self.state
    }

    /// `true` while a resize is outstanding.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.state != ResizeState::Idle
    }

    /// Geometry of the last applied resize.
    #[must_use]
    pub fn committed(&self) -> Option<SurfaceGeometry> {
        self.committed
    }

    /// Geometry of the most recent request, applied or not.
    #[must_use]
    pub fn latest(&self) -> Option<SurfaceGeometry> {
        self.latest
    }

    /// Requests a resize to `geometry`.
    ///
    /// While held every request is deferred, even one that matches the
    /// committed geometry; the latest request wins. When idle, an unchanged
    /// geometry is a no-op unless `force` is set.
    pub fn request(&mut self, geometry: SurfaceGeometry, force: bool) -> ResizeDecision {
        self.latest = Some(geometry);
        match self.state {
            ResizeState::Held | ResizeState::HeldPending => {
                self.state = ResizeState::HeldPending;
                ResizeDecision::Deferred
            }
            ResizeState::Idle => {
                if !force && self.committed == Some(geometry) {
                    return ResizeDecision::Unchanged;
                }
                self.committed = Some(geometry);
                self.state = ResizeState::Held;
                ResizeDecision::Apply(geometry)
            }
        }
    }

    /// Reports that a frame of `presented` pixels reached the consumer.
    ///
    /// The hold is released only by a frame at the committed pixel size. A
    /// deferred request that differs from the committed geometry is then
    /// committed in the same step and returned for the caller to apply.
    pub fn complete(&mut self, presented: PixelSize) -> ResizeRelease {
        let Some(committed) = self.committed else {
            return ResizeRelease::NotHeld;
        };
        match self.state {
            ResizeState::Idle => ResizeRelease::NotHeld,
            _ if committed.pixel_size() != presented => ResizeRelease::Mismatch,
            ResizeState::Held => {
                self.state = ResizeState::Idle;
                ResizeRelease::Released
            }
            ResizeState::HeldPending => match self.latest {
                Some(latest) if latest != committed => {
                    self.committed = Some(latest);
                    self.state = ResizeState::Held;
                    ResizeRelease::Reissue(latest)
                }
                _ => {
                    self.state = ResizeState::Idle;
                    ResizeRelease::Released
                }
            },
        }
    }

    /// Drops any hold without waiting for a frame.
    ///
    /// Used when the surface is torn down or hidden and no frame will come.
    pub fn reset(&mut self) {
        self.state = ResizeState::Idle;
    }
}
