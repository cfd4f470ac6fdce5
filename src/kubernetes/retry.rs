// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Re-fetch and retry for optimistic-concurrency writes

use crate::constants::MAX_CONFLICT_RETRIES;
use crate::error::Result;
use std::future::Future;
use tracing::debug;

/// Run `attempt` until it succeeds, fails with something other than a 409, or
/// runs out of retries. Each attempt must read the object afresh so the write
/// carries the latest resource version.
pub async fn retry_on_conflict<T, F, Fut>(what: &str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut conflicts = 0;

    loop {
        match attempt().await {
            Err(e) if e.is_conflict() && conflicts < MAX_CONFLICT_RETRIES => {
                conflicts += 1;
                debug!(
                    "Conflict while updating {} (attempt {}), re-reading and retrying",
                    what, conflicts
                );
            }
            result => return result,
        }
    }
}
