// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frame pacing.
//!
//! An off-screen view has no display to pace it, so the host drives a
//! [`BeginFrameSource`] from its own ticks. A begin-frame is issued once per
//! interval, and not again until the previous one has been acknowledged.

use crate::time::{Duration, HostTime, Timebase};

/// A frame rate in Hz, clamped to `MIN..=MAX`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameRate(u32);

impl FrameRate {
    /// Slowest accepted rate.
    pub const MIN: Self = Self(1);
    /// Fastest accepted rate.
    pub const MAX: Self = Self(240);
    /// Rate new views start at.
    pub const DEFAULT: Self = Self(60);

    /// Clamps `hz` into the accepted range.
    #[must_use]
    pub const fn new(hz: u32) -> Self {
        if hz < Self::MIN.0 {
            Self::MIN
        } else if hz > Self::MAX.0 {
            Self::MAX
        } else {
            Self(hz)
        }
    }

    /// Rate in Hz.
    #[must_use]
    pub const fn hz(self) -> u32 {
        self.0
    }

    /// Length of one frame in `timebase` ticks.
    #[must_use]
    pub const fn interval(self, timebase: Timebase) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.0 as u64, timebase)
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// One begin-frame signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BeginFrameArgs {
    /// Monotonic frame counter.
    pub frame_index: u64,
    /// When the frame began.
    pub frame_time: HostTime,
    /// When the frame should be finished.
    pub deadline: HostTime,
    /// Nominal frame interval.
    pub interval: Duration,
}

/// Issues begin-frame signals at a fixed interval, one at a time.
#[derive(Clone, Copy, Debug)]
pub struct BeginFrameSource {
    interval: Duration,
    next: Option<HostTime>,
    awaiting_ack: bool,
    paused: bool,
    frame_index: u64,
}

impl BeginFrameSource {
    /// A source ticking at `rate`.
    #[must_use]
    pub fn new(rate: FrameRate, timebase: Timebase) -> Self {
        Self {
            interval: rate.interval(timebase),
            next: None,
            awaiting_ack: false,
            paused: false,
            frame_index: 0,
        }
    }

    /// Changes the rate. Takes effect from the next signal.
    pub fn set_rate(&mut self, rate: FrameRate, timebase: Timebase) {
        self.interval = rate.interval(timebase);
    }

    /// Current interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stops or resumes issuing signals.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        if !paused {
            self.next = None;
        }
    }

    /// Returns `true` while a signal is waiting for its acknowledgment.
    #[must_use]
    pub fn is_awaiting_ack(&self) -> bool {
        self.awaiting_ack
    }

    /// Earliest time the next signal may be issued.
    #[must_use]
    pub fn next_frame_time(&self) -> Option<HostTime> {
        self.next
    }

    /// Issues a signal if one is due at `now`.
    pub fn on_tick(&mut self, now: HostTime) -> Option<BeginFrameArgs> {
        if self.paused || self.awaiting_ack {
            return None;
        }
        if self.next.is_some_and(|next| now < next) {
            return None;
        }
        let args = BeginFrameArgs {
            frame_index: self.frame_index,
            frame_time: now,
            deadline: now + self.interval,
            interval: self.interval,
        };
        self.frame_index += 1;
        self.next = Some(args.deadline);
        self.awaiting_ack = true;
        Some(args)
    }

    /// Acknowledges the outstanding signal.
    pub fn on_frame_ack(&mut self) {
        self.awaiting_ack = false;
    }
}
