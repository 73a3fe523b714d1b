// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Monotonic timestamps for frame pacing and tracing.
//!
//! The embedder samples its platform clock and hands the raw tick count to
//! the core as a [`HostTime`]. A [`Timebase`] converts ticks to nanoseconds
//! (`nanos = ticks * numer / denom`), and [`Duration`] measures spans in the
//! same tick units. Conversions go through `u128` so large tick counts never
//! overflow.
//!
//! Components that timestamp their own work (frame phases) read a [`Clock`]
//! installed by the embedder. Any `Fn() -> HostTime` is a clock.

use core::fmt;
use core::ops::Add;

/// A point in time as monotonic platform ticks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HostTime(pub u64);

impl HostTime {
    /// Raw tick value.
    #[inline]
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// This time in nanoseconds under `timebase`.
    #[inline]
    #[must_use]
    pub const fn to_nanos(self, timebase: Timebase) -> u64 {
        timebase.ticks_to_nanos(self.0)
    }

    /// Span from `earlier` to `self`, or zero if `earlier` is later.
    #[inline]
    #[must_use]
    pub const fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }

    /// Adds `duration`, returning `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, duration: Duration) -> Option<Self> {
        match self.0.checked_add(duration.0) {
            Some(t) => Some(Self(t)),
            None => None,
        }
    }
}

impl Add<Duration> for HostTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Duration) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl fmt::Debug for HostTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostTime({})", self.0)
    }
}

/// A source of monotonic [`HostTime`].
pub trait Clock {
    /// The current time.
    fn now(&self) -> HostTime;
}

impl<F: Fn() -> HostTime> Clock for F {
    fn now(&self) -> HostTime {
        self()
    }
}

/// Rational ticks-to-nanoseconds conversion factor.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timebase {
    /// Numerator of the ratio.
    pub numer: u32,
    /// Denominator of the ratio.
    pub denom: u32,
}

impl Timebase {
    /// Ticks are nanoseconds.
    pub const NANOS: Self = Self { numer: 1, denom: 1 };

    /// Creates a timebase.
    ///
    /// # Panics
    ///
    /// Panics if either term is zero.
    #[inline]
    #[must_use]
    pub const fn new(numer: u32, denom: u32) -> Self {
        assert!(numer != 0 && denom != 0, "timebase terms must be non-zero");
        Self { numer, denom }
    }

    /// Converts ticks to nanoseconds.
    #[inline]
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "u128 intermediate avoids overflow; narrowing is intentional"
    )]
    pub const fn ticks_to_nanos(self, ticks: u64) -> u64 {
        (ticks as u128 * self.numer as u128 / self.denom as u128) as u64
    }

    /// Converts nanoseconds to ticks.
    #[inline]
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "u128 intermediate avoids overflow; narrowing is intentional"
    )]
    pub const fn nanos_to_ticks(self, nanos: u64) -> u64 {
        (nanos as u128 * self.denom as u128 / self.numer as u128) as u64
    }
}

impl fmt::Debug for Timebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timebase({}/{})", self.numer, self.denom)
    }
}

/// A span of time in platform ticks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(pub u64);

impl Duration {
    /// Zero ticks.
    pub const ZERO: Self = Self(0);

    /// Raw tick value.
    #[inline]
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Builds a duration from nanoseconds under `timebase`.
    #[inline]
    #[must_use]
    pub const fn from_nanos(nanos: u64, timebase: Timebase) -> Self {
        Self(timebase.nanos_to_ticks(nanos))
    }

    /// This duration in nanoseconds under `timebase`.
    #[inline]
    #[must_use]
    pub const fn to_nanos(self, timebase: Timebase) -> u64 {
        timebase.ticks_to_nanos(self.0)
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Duration({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mach_style_timebase_converts_both_ways() {
        // 24 MHz tick source.
        let tb = Timebase::new(125, 3);
        assert_eq!(HostTime(24_000_000).to_nanos(tb), 1_000_000_000, "one second");
        assert_eq!(tb.nanos_to_ticks(1_000_000_000), 24_000_000, "inverse");
    }

    #[test]
    fn large_tick_counts_do_not_overflow() {
        let tb = Timebase::new(125, 3);
        let _ = HostTime(u64::MAX / 2).to_nanos(tb);
    }

    #[test]
    fn span_saturates_backwards() {
        let t = HostTime(1_000);
        assert_eq!(t.saturating_duration_since(HostTime(1_500)), Duration::ZERO, "clamped");
        assert_eq!(t.saturating_duration_since(HostTime(400)), Duration(600), "forward");
        assert_eq!(HostTime(u64::MAX).checked_add(Duration(1)), None, "overflow");
    }
}
