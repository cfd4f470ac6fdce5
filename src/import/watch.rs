// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Maps changes on secrets, instances and jobs back to the imports that depend on them.

use crate::import::job::{is_complete, is_deleting};
use crate::import::ownership::is_owned_by;
use crate::types::{Keycloak, KeycloakImport};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::reflector::ObjectRef;
use kube::{Resource, ResourceExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

fn refs<'a>(imports: impl Iterator<Item = &'a Arc<KeycloakImport>>) -> Vec<ObjectRef<KeycloakImport>> {
    imports.map(|i| ObjectRef::from_obj(i.as_ref())).collect()
}

fn owned_by_any<'a, K: Resource>(
    obj: &'a K,
    imports: &'a [Arc<KeycloakImport>],
) -> impl Iterator<Item = &'a Arc<KeycloakImport>> {
    imports
        .iter()
        .filter(move |i| is_owned_by(obj, &i.name_any(), &i.namespace().unwrap_or_default()))
}

/// Imports that read a substitution from `secret`, or own it as their realm secret
pub fn imports_for_secret(secret: &Secret, imports: &[Arc<KeycloakImport>]) -> Vec<ObjectRef<KeycloakImport>> {
    let namespace = secret.namespace().unwrap_or_default();
    let name = secret.name_any();

    refs(imports.iter().filter(|i| {
        i.has_secret_reference(&namespace, &name)
            || is_owned_by(secret, &i.name_any(), &i.namespace().unwrap_or_default())
    }))
}

/// Imports targeting `instance`
pub fn imports_for_instance(instance: &Keycloak, imports: &[Arc<KeycloakImport>]) -> Vec<ObjectRef<KeycloakImport>> {
    let namespace = instance.namespace().unwrap_or_default();
    let name = instance.name_any();

    refs(imports.iter().filter(|i| i.targets(&namespace, &name)))
}

/// Imports owning `job`
pub fn imports_for_job(job: &Job, imports: &[Arc<KeycloakImport>]) -> Vec<ObjectRef<KeycloakImport>> {
    refs(owned_by_any(job, imports))
}

/// Jobs not seen for this long are dropped from the tracker. A watch relist does
/// not report objects deleted in the meantime, so their entries would linger.
const TRACKER_TTL: Duration = Duration::from_secs(3600);

/// Remembers whether each job was complete when last seen, so only the
/// incomplete to complete transition wakes the owning import.
#[derive(Debug)]
pub struct JobCompletionTracker {
    ttl: Duration,
    seen: Mutex<HashMap<String, (bool, Instant)>>,
}

impl Default for JobCompletionTracker {
    fn default() -> Self {
        Self::with_ttl(TRACKER_TTL)
    }
}

impl JobCompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    fn key(job: &Job) -> String {
        job.uid().unwrap_or_else(|| {
            format!("{}/{}", job.namespace().unwrap_or_default(), job.name_any())
        })
    }

    /// Record the state of `job`; true when it has just completed
    pub fn observe(&self, job: &Job) -> bool {
        let key = Self::key(job);
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        seen.retain(|k, (_, at)| *k == key || now.duration_since(*at) < self.ttl);

        if is_deleting(job) {
            seen.remove(&key);
            return false;
        }

        let complete = is_complete(job);
        let previous = seen.insert(key.clone(), (complete, now)).map(|(c, _)| c);

        if complete {
            // Completed jobs never go back; no need to keep tracking them
            seen.remove(&key);
        }

        let transitioned = previous == Some(false) && complete;
        if transitioned {
            debug!("Job {} completed", job.name_any());
        }
        transitioned
    }

    pub fn tracked(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
