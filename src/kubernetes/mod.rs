// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for CRD discovery, conflict retries and error backoff.

pub mod backoff;
pub mod crd;
pub mod objects;
pub mod retry;

pub use backoff::ErrorBackoff;
pub use crd::wait_for_crds;
pub use objects::{conditional_merge, delete_ignore_not_found, patch_conditional};
pub use retry::retry_on_conflict;
