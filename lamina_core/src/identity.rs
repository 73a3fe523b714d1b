// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Surface identities.
//!
//! A [`LocalSurfaceId`] names one geometry generation of a view's output. The
//! parent sequence advances whenever the host commits new geometry; the child
//! sequence advances when the embedded producer renegotiates on its own. The
//! embed token ties both sides to one allocator. Frames are only submitted
//! under a valid identity.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Random 128-bit token shared by every identity of one allocation lineage.
///
/// The zero token is reserved for "none".
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EmbedToken(pub u128);

impl EmbedToken {
    /// The empty token.
    pub const EMPTY: Self = Self(0);

    /// Returns `true` for [`EMPTY`](Self::EMPTY).
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for EmbedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EmbedToken({:032x})", self.0)
    }
}

/// One geometry generation of a surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LocalSurfaceId {
    /// Advanced by the host on every geometry commit.
    pub parent_sequence: u32,
    /// Advanced by the embedded producer.
    pub child_sequence: u32,
    /// Lineage token.
    pub embed_token: EmbedToken,
}

impl LocalSurfaceId {
    /// The default, invalid identity.
    pub const INVALID: Self = Self {
        parent_sequence: 0,
        child_sequence: 0,
        embed_token: EmbedToken::EMPTY,
    };

    /// Valid when both sequences are non-zero and the token is set.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.parent_sequence != 0 && self.child_sequence != 0 && !self.embed_token.is_empty()
    }

    /// Returns `true` if `self` is a later generation of `other`'s lineage.
    #[must_use]
    pub fn is_newer_than(&self, other: &Self) -> bool {
        self.embed_token == other.embed_token
            && (self.parent_sequence, self.child_sequence)
                > (other.parent_sequence, other.child_sequence)
    }
}

/// Identifies a frame producer: one per host view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FrameSinkId {
    /// Owning client.
    pub client_id: u32,
    /// Sink within the client.
    pub sink_id: u32,
}

impl FrameSinkId {
    /// Creates an id.
    #[must_use]
    pub const fn new(client_id: u32, sink_id: u32) -> Self {
        Self { client_id, sink_id }
    }

    /// Valid when the client is non-zero.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.client_id != 0
    }
}

/// Hands out [`FrameSinkId`]s for one client.
#[derive(Clone, Copy, Debug)]
pub struct FrameSinkIdAllocator {
    client_id: u32,
    next_sink_id: u32,
}

impl FrameSinkIdAllocator {
    /// Creates an allocator for `client_id`.
    ///
    /// # Panics
    ///
    /// Panics if `client_id` is zero.
    #[must_use]
    pub fn new(client_id: u32) -> Self {
        assert!(client_id != 0, "client id 0 is reserved");
        Self {
            client_id,
            next_sink_id: 1,
        }
    }

    /// Returns the next unused id.
    pub fn next_frame_sink_id(&mut self) -> FrameSinkId {
        let id = FrameSinkId::new(self.client_id, self.next_sink_id);
        self.next_sink_id = self.next_sink_id.wrapping_add(1).max(1);
        id
    }
}

/// A producer plus one of its surface generations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SurfaceId {
    /// Producer.
    pub frame_sink_id: FrameSinkId,
    /// Generation.
    pub local_surface_id: LocalSurfaceId,
}

impl SurfaceId {
    /// Valid when both halves are valid.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.frame_sink_id.is_valid() && self.local_surface_id.is_valid()
    }
}

// https://en.wikipedia.org/wiki/Splitmix64
#[derive(Clone, Copy, Debug)]
struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn next_u64(&mut self) -> u64 {
        let mut z = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        self.state = z;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn next_token(&mut self) -> EmbedToken {
        loop {
            let token = (u128::from(self.next_u64()) << 64) | u128::from(self.next_u64());
            if token != 0 {
                return EmbedToken(token);
            }
        }
    }
}

static NEXT_SEED: AtomicU64 = AtomicU64::new(0x5EED_1A31_4A00_0001);

/// Allocates and tracks the [`LocalSurfaceId`] of one surface.
#[derive(Clone, Copy, Debug)]
pub struct SurfaceIdentitySequencer {
    last: LocalSurfaceId,
    valid: bool,
    rng: SplitMix64,
}

impl Default for SurfaceIdentitySequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceIdentitySequencer {
    /// A sequencer with a process-unique seed.
    #[must_use]
    pub fn new() -> Self {
        let seed = NEXT_SEED.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed);
        Self::with_seed(seed)
    }

    /// A sequencer with a fixed seed, for reproducible tokens.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            last: LocalSurfaceId::INVALID,
            valid: false,
            rng: SplitMix64 { state: seed },
        }
    }

    /// Commits a new generation: parent sequence plus one, child sequence
    /// reset to one, and a fresh embed token.
    pub fn allocate_new(&mut self) -> LocalSurfaceId {
        self.last = LocalSurfaceId {
            parent_sequence: self.last.parent_sequence.wrapping_add(1).max(1),
            child_sequence: 1,
            embed_token: self.rng.next_token(),
        };
        self.valid = true;
        self.last
    }

    /// Adopts the child sequence of `child`, keeping the parent sequence.
    ///
    /// Ignored (returns `false`) while invalidated, or when `child` belongs to
    /// another lineage or parent generation. The child sequence never moves
    /// backwards.
    pub fn update_from_child(&mut self, child: &LocalSurfaceId) -> bool {
        if !self.valid
            || child.embed_token != self.last.embed_token
            || child.parent_sequence != self.last.parent_sequence
        {
            return false;
        }
        if child.child_sequence <= self.last.child_sequence {
            return false;
        }
        self.last.child_sequence = child.child_sequence;
        true
    }

    /// Marks the current identity unusable until the next
    /// [`allocate_new`](Self::allocate_new).
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// The current identity, or [`LocalSurfaceId::INVALID`] after
    /// [`invalidate`](Self::invalidate).
    #[must_use]
    pub fn current(&self) -> LocalSurfaceId {
        if self.valid {
            self.last
        } else {
            LocalSurfaceId::INVALID
        }
    }

    /// Returns `true` if [`current`](Self::current) is valid.
    #[must_use]
    pub fn has_valid(&self) -> bool {
        self.valid
    }
}
