// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience helpers for talking to the remote tier.
//!
//! The cache degrades rather than fails when the remote tier misbehaves,
//! so the only machinery needed here is bounded retry with backoff for the
//! few operations worth repeating (connection attachment, namespace
//! clears). Per-request operations are never retried; they time out and
//! fall back to the local tier instead.

pub mod retry;

pub use retry::{retry, RetryConfig};
