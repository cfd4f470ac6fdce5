// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Realm import building blocks: rendering, revisions, ownership, jobs and rollout.

pub mod artifact;
pub mod job;
pub mod ownership;
pub mod revision;
pub mod rollout;
pub mod template;
pub mod watch;

pub use rollout::{decide, Decision};
pub use watch::JobCompletionTracker;
