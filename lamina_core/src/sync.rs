// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! GPU fence tokens.
//!
//! A [`SyncToken`] names a position in a producer's command stream. Whoever
//! reads a shared buffer first enqueues a wait on every token its producer
//! handed out; the wait is a GPU-side instruction, so the host thread never
//! blocks. Tokens travel alongside buffer handles through the whole pipeline:
//! buffer creation, texture delivery, and the embedder's release callback.

use core::fmt;

/// Which command-stream family a [`SyncToken`] was generated in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CommandBufferNamespace {
    /// No namespace; the token carries no fence.
    #[default]
    Invalid,
    /// A command buffer in the GPU process proper.
    GpuIo,
    /// A command buffer running in the embedding process.
    InProcess,
    /// The compositor's own output command stream.
    Compositor,
}

/// A fence marking a producer-side position in a GPU command stream.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SyncToken {
    /// Command-stream family.
    pub namespace: CommandBufferNamespace,
    /// Identifies the command stream within its namespace.
    pub command_buffer_id: u64,
    /// Release counter reached at the fence.
    pub release_count: u64,
    /// Whether the producer has flushed far enough that another context may
    /// safely wait on this token.
    pub verified_flush: bool,
}

impl SyncToken {
    /// A token that carries no fence.
    pub const EMPTY: Self = Self {
        namespace: CommandBufferNamespace::Invalid,
        command_buffer_id: 0,
        release_count: 0,
        verified_flush: false,
    };

    /// Creates an unverified token.
    #[inline]
    #[must_use]
    pub const fn new(
        namespace: CommandBufferNamespace,
        command_buffer_id: u64,
        release_count: u64,
    ) -> Self {
        Self {
            namespace,
            command_buffer_id,
            release_count,
            verified_flush: false,
        }
    }

    /// Returns `true` if the token names a real fence.
    #[inline]
    #[must_use]
    pub const fn has_data(&self) -> bool {
        !matches!(self.namespace, CommandBufferNamespace::Invalid)
    }

    /// Returns this token marked as verified.
    #[inline]
    #[must_use]
    pub const fn verified(mut self) -> Self {
        self.verified_flush = true;
        self
    }
}

impl fmt::Debug for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.has_data() {
            return f.write_str("SyncToken(empty)");
        }
        write!(
            f,
            "SyncToken({:?}:{}:{}{})",
            self.namespace,
            self.command_buffer_id,
            self.release_count,
            if self.verified_flush { ", verified" } else { "" }
        )
    }
}

/// Source of fresh fence tokens.
///
/// [`BufferQueue`](crate::buffer_queue::BufferQueue) asks for a token every
/// time it destroys a buffer, so the destruction is ordered after all work
/// the surface has issued against it. The queue never owns its provider; it
/// is passed in for each call that may free buffers.
pub trait SyncTokenProvider {
    /// Generates an unverified token at the current command-stream position.
    fn gen_sync_token(&self) -> SyncToken;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_has_no_data() {
        assert!(!SyncToken::EMPTY.has_data(), "invalid namespace");
        assert_eq!(SyncToken::default(), SyncToken::EMPTY, "default is empty");
    }

    #[test]
    fn verified_keeps_position() {
        let t = SyncToken::new(CommandBufferNamespace::GpuIo, 7, 42);
        let v = t.verified();
        assert!(v.verified_flush && !t.verified_flush, "copy is marked");
        assert_eq!(v.release_count, 42, "position unchanged");
    }
}
