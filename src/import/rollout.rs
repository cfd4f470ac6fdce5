// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Decides what the next step of a realm import is, given what is on the cluster.
//!
//! `decide` does no I/O. The reconciler gathers the owned jobs and the rollout
//! marker, asks for a decision, and applies it.

use crate::constants::annotations;
use crate::import::job::{is_complete, is_deleting, is_failed, job_revision};
use crate::import::revision::fingerprint;
use crate::types::KeycloakImport;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;

/// Longest name part allowed in an annotation key
const MAX_KEY_NAME_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Remove a job built for an older revision
    DeleteStaleJob(String),
    /// No job exists for the revision yet
    CreateJob(String),
    /// The job for the current revision has not completed
    AwaitJob { job: String, failed: bool },
    /// The job completed; stamp the revision on the workload pod template
    TriggerRollout(String),
    /// Already imported and rolled out
    NoAction,
}

/// Decide the next steps for `revision`. Stale job deletions always come first,
/// followed by exactly one of the other decisions.
pub fn decide(revision: &str, jobs: &[Job], marker: Option<&str>) -> Vec<Decision> {
    let live: Vec<&Job> = jobs.iter().filter(|j| !is_deleting(j)).collect();

    let mut decisions: Vec<Decision> = live
        .iter()
        .filter(|j| job_revision(j) != Some(revision))
        .map(|j| Decision::DeleteStaleJob(j.name_any()))
        .collect();

    let current: Vec<&Job> = live
        .iter()
        .copied()
        .filter(|j| job_revision(j) == Some(revision))
        .collect();

    let next = if current.is_empty() {
        Decision::CreateJob(revision.to_string())
    } else if current.iter().any(|j| is_complete(j)) {
        if marker == Some(revision) {
            Decision::NoAction
        } else {
            Decision::TriggerRollout(revision.to_string())
        }
    } else {
        let job = current[0];
        Decision::AwaitJob {
            job: job.name_any(),
            failed: is_failed(job),
        }
    };

    decisions.push(next);
    decisions
}

/// Pod template annotation key holding the last rolled out revision of `import`.
/// Each import gets its own key so imports sharing an instance leave each other alone.
pub fn rollout_marker_key(import: &KeycloakImport) -> String {
    let name = format!(
        "{}.{}",
        import.namespace().unwrap_or_default(),
        import.name_any()
    );

    if name.len() <= MAX_KEY_NAME_LEN {
        format!("{}/{}", annotations::ROLLOUT_PREFIX, name)
    } else {
        let hashed = fingerprint(&name).unwrap_or_else(|_| name.chars().take(MAX_KEY_NAME_LEN).collect());
        format!("{}/{}", annotations::ROLLOUT_PREFIX, hashed)
    }
}

/// Current marker value on the StatefulSet pod template
pub fn rollout_marker<'a>(statefulset: &'a StatefulSet, key: &str) -> Option<&'a str> {
    statefulset
        .spec
        .as_ref()
        .and_then(|s| s.template.metadata.as_ref())
        .and_then(|m| m.annotations.as_ref())
        .and_then(|a| a.get(key))
        .map(String::as_str)
}
