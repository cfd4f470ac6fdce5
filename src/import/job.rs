// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! One-shot realm import jobs derived from the instance's pod template.

use crate::constants::{import_job, keycloak, labels};
use crate::error::{OperatorError, Result};
use crate::import::ownership::managed_labels;
use crate::types::KeycloakImport;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{EnvVar, SecretVolumeSource, Volume, VolumeMount};
use kube::{api::ObjectMeta, ResourceExt};
use std::collections::BTreeMap;

/// Env vars forced to a job-friendly value; `None` removes the variable
const ENV_OVERRIDES: [(&str, Option<&str>); 3] = [
    ("KC_CACHE", Some("local")),
    ("KC_HEALTH_ENABLED", Some("false")),
    ("KC_CACHE_STACK", None),
];

/// Room left for the import part of a job name; job names end up in a pod label,
/// which is capped at 63 characters
const MAX_JOB_BASE_LEN: usize = 63 - "-import-".len() - 8;

/// Job name for a revision. The revision suffix keeps a new job from colliding
/// with a stale one that is still being deleted.
pub fn job_name(import: &KeycloakImport, revision: &str) -> String {
    let short = revision.get(..8).unwrap_or(revision);
    format!("{}-import-{}", import.scoped_name(MAX_JOB_BASE_LEN), short)
}

/// Labels carried by the job and its pods
pub fn job_labels(import: &KeycloakImport, revision: &str) -> BTreeMap<String, String> {
    let mut labels = managed_labels(&import.name_any(), &import.namespace().unwrap_or_default());
    labels.insert(labels::IMPORT_REVISION.to_string(), revision.to_string());
    labels
}

/// Revision a job was built for
pub fn job_revision(job: &Job) -> Option<&str> {
    job.labels().get(labels::IMPORT_REVISION).map(String::as_str)
}

fn has_condition(job: &Job, condition_type: &str) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == condition_type && c.status == "True")
        })
}

pub fn is_complete(job: &Job) -> bool {
    has_condition(job, "Complete")
}

pub fn is_failed(job: &Job) -> bool {
    has_condition(job, "Failed")
}

pub fn is_deleting(job: &Job) -> bool {
    job.metadata.deletion_timestamp.is_some()
}

/// Build the import job for `revision` from the instance's StatefulSet
pub fn build_import_job(
    import: &KeycloakImport,
    statefulset: &StatefulSet,
    revision: &str,
    backoff_limit: i32,
) -> Result<Job> {
    let labels = job_labels(import, revision);

    let mut template = statefulset
        .spec
        .as_ref()
        .map(|s| s.template.clone())
        .ok_or_else(|| OperatorError::InvalidWorkloadTemplate("StatefulSet has no spec".to_string()))?;

    template
        .metadata
        .get_or_insert_with(Default::default)
        .labels = Some(labels.clone());

    let pod = template
        .spec
        .as_mut()
        .ok_or_else(|| OperatorError::InvalidWorkloadTemplate("pod template has no spec".to_string()))?;

    let index = pod
        .containers
        .iter()
        .position(|c| c.name == keycloak::CONTAINER_NAME)
        .or(if pod.containers.is_empty() { None } else { Some(0) })
        .ok_or_else(|| OperatorError::InvalidWorkloadTemplate("pod template has no containers".to_string()))?;

    pod.volumes.get_or_insert_with(Vec::new).push(Volume {
        name: import_job::VOLUME_NAME.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(import.artifact_name()),
            ..Default::default()
        }),
        ..Default::default()
    });
    pod.restart_policy = Some("Never".to_string());

    let container = &mut pod.containers[index];
    container.env = Some(job_env(container.env.take().unwrap_or_default()));
    container.liveness_probe = None;
    container.readiness_probe = None;
    container.startup_probe = None;
    container.volume_mounts.get_or_insert_with(Vec::new).push(VolumeMount {
        name: import_job::VOLUME_NAME.to_string(),
        mount_path: import_job::MOUNT_DIR.to_string(),
        read_only: Some(true),
        ..Default::default()
    });
    container.command = Some(vec![import_job::SHELL.to_string()]);
    container.args = Some(vec!["-c".to_string(), import_command(import)]);

    Ok(Job {
        metadata: ObjectMeta {
            name: Some(job_name(import, revision)),
            namespace: Some(import.target_namespace()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(JobSpec {
            template,
            backoff_limit: Some(backoff_limit),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Rebuild the server, then import the mounted realm file
fn import_command(import: &KeycloakImport) -> String {
    format!(
        "{kc} --verbose build && {kc} --verbose import --optimized --file='{dir}/{file}' --override={override_existing}",
        kc = import_job::KC_SCRIPT,
        dir = import_job::MOUNT_DIR,
        file = import.realm_file_name(),
        override_existing = import.spec.override_if_exists,
    )
}

fn job_env(current: Vec<EnvVar>) -> Vec<EnvVar> {
    let mut env: Vec<EnvVar> = current
        .into_iter()
        .filter_map(|var| match ENV_OVERRIDES.iter().find(|(name, _)| *name == var.name) {
            Some((_, Some(value))) => Some(EnvVar {
                name: var.name,
                value: Some(value.to_string()),
                value_from: None,
            }),
            Some((_, None)) => None,
            None => Some(var),
        })
        .collect();

    for (name, value) in ENV_OVERRIDES {
        if let Some(value) = value {
            if !env.iter().any(|v| v.name == name) {
                env.push(EnvVar {
                    name: name.to_string(),
                    value: Some(value.to_string()),
                    value_from: None,
                });
            }
        }
    }

    env
}
