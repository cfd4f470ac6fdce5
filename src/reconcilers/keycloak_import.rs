// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! KeycloakImport reconciler - renders the realm, runs the import job and rolls the
//! instance once per realm revision.
//!
//! Every cycle walks the same gates in order: instance present, instance ready,
//! workload present, substitutions resolvable, realm secret written, job done,
//! rollout stamped. The first gate that is not met decides the status condition.
//! Jobs are never waited on inline; their completion wakes the import through the
//! job watch.

use crate::config::Config;
use crate::constants::{labels, IMPORT_FINALIZER, OPERATOR_NAME};
use crate::error::{OperatorError, Result};
use crate::import::artifact::{ensure_artifact, render_realm, resolve_substitutions};
use crate::import::job::build_import_job;
use crate::import::ownership::find_owned;
use crate::import::rollout::{rollout_marker, rollout_marker_key};
use crate::import::watch::{imports_for_instance, imports_for_job, imports_for_secret};
use crate::import::{decide, Decision, JobCompletionTracker};
use crate::kubernetes::{delete_ignore_not_found, patch_conditional, retry_on_conflict, ErrorBackoff};
use crate::reconcilers::patch_condition;
use crate::types::{Condition, Keycloak, KeycloakImport};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{DeleteParams, PostParams},
    runtime::{controller::Action, Controller},
    Api, Client, ResourceExt,
};
use kube_runtime::watcher::Config as WatcherConfig;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Where an import currently stands. Each variant maps to one status condition.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportState {
    DependencyMissing(String),
    DependencyNotReady,
    WorkloadMissing,
    SecretUnresolved(String),
    ArtifactPending(String),
    JobPending,
    JobFailed(String),
    RolloutPending,
    InvalidTemplate(String),
    Ready,
}

impl ImportState {
    pub fn reason(&self) -> &'static str {
        match self {
            ImportState::DependencyMissing(_) => "DependencyMissing",
            ImportState::DependencyNotReady => "DependencyNotReady",
            ImportState::WorkloadMissing => "WorkloadMissing",
            ImportState::SecretUnresolved(_) => "SecretUnresolved",
            ImportState::ArtifactPending(_) => "ArtifactPending",
            ImportState::JobPending => "JobPending",
            ImportState::JobFailed(_) => "JobFailed",
            ImportState::RolloutPending => "RolloutPending",
            ImportState::InvalidTemplate(_) => "InvalidTemplate",
            ImportState::Ready => "Ready",
        }
    }

    pub fn message(&self) -> String {
        let (phrase, detail) = match self {
            ImportState::DependencyMissing(e) => ("Failed to fetch RHBK instance", Some(e)),
            ImportState::DependencyNotReady => ("RHBK instance not ready", None),
            ImportState::WorkloadMissing => ("RHBK deployment not ready", None),
            ImportState::SecretUnresolved(e) | ImportState::ArtifactPending(e) => {
                ("Realm secret not ready", Some(e))
            }
            ImportState::JobPending => ("Wait for new import job to be ready", None),
            ImportState::JobFailed(e) => ("Import job failed", Some(e)),
            ImportState::RolloutPending => ("Rolling out imported realm", None),
            ImportState::InvalidTemplate(e) => ("Realm import template invalid", Some(e)),
            ImportState::Ready => ("Realm imported", None),
        };

        match detail {
            Some(detail) => format!("{}. {}", phrase, detail),
            None => phrase.to_string(),
        }
    }

    pub fn condition(&self) -> Condition {
        Condition::ready(*self == ImportState::Ready, self.reason(), self.message())
    }

    /// Steady and permanently failed states wait for a change; everything else is re-checked
    pub fn action(&self, config: &Config) -> Action {
        match self {
            ImportState::Ready | ImportState::InvalidTemplate(_) => Action::await_change(),
            _ => Action::requeue(config.requeue_interval),
        }
    }
}

pub struct Context {
    pub client: Client,
    pub config: Config,
    pub backoff: ErrorBackoff,
}

impl Context {
    pub fn new(client: Client, config: Config) -> Self {
        let backoff = ErrorBackoff::new(config.error_backoff_base, config.error_backoff_max);
        Self {
            client,
            config,
            backoff,
        }
    }
}

pub struct KeycloakImportReconciler {
    context: Arc<Context>,
}

impl KeycloakImportReconciler {
    pub fn new(client: Client, config: Config) -> Self {
        Self {
            context: Arc::new(Context::new(client, config)),
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let client = self.context.client.clone();
        let imports: Api<KeycloakImport> = Api::all(client.clone());
        let controller = Controller::new(imports, WatcherConfig::default());

        let store = controller.store();
        let secret_store = store.clone();
        let keycloak_store = store.clone();
        let job_store = store;
        let tracker = Arc::new(JobCompletionTracker::new());
        let managed = WatcherConfig::default().labels(&format!("{}={}", labels::MANAGED_BY, OPERATOR_NAME));

        controller
            .watches(
                Api::<Secret>::all(client.clone()),
                WatcherConfig::default(),
                move |secret| imports_for_secret(&secret, &secret_store.state()),
            )
            .watches(
                Api::<Keycloak>::all(client.clone()),
                WatcherConfig::default(),
                move |keycloak| imports_for_instance(&keycloak, &keycloak_store.state()),
            )
            .watches(Api::<Job>::all(client), managed, move |job| {
                if tracker.observe(&job) {
                    imports_for_job(&job, &job_store.state())
                } else {
                    Vec::new()
                }
            })
            .shutdown_on_signal()
            .run(reconcile, error_policy, self.context)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled import: {:?}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        Ok(())
    }
}

fn object_key(import: &KeycloakImport) -> String {
    format!("{}/{}", import.namespace().unwrap_or_default(), import.name_any())
}

fn has_finalizer(import: &KeycloakImport) -> bool {
    import.finalizers().iter().any(|f| f == IMPORT_FINALIZER)
}

#[instrument(skip(import, ctx), fields(import = %object_key(&import)))]
pub async fn reconcile(import: Arc<KeycloakImport>, ctx: Arc<Context>) -> Result<Action> {
    let key = object_key(&import);

    let result = match tokio::time::timeout(ctx.config.api_timeout, reconcile_import(&import, &ctx)).await {
        Ok(result) => result,
        Err(_) => Err(OperatorError::Timeout(format!(
            "reconciling {} took longer than {:?}",
            key, ctx.config.api_timeout
        ))),
    };

    if result.is_ok() {
        ctx.backoff.reset(&key);
    }
    result
}

async fn reconcile_import(import: &KeycloakImport, ctx: &Context) -> Result<Action> {
    let namespace = import
        .namespace()
        .ok_or_else(|| OperatorError::MissingObjectKey("metadata.namespace".to_string()))?;
    let api: Api<KeycloakImport> = Api::namespaced(ctx.client.clone(), &namespace);

    if import.metadata.deletion_timestamp.is_some() {
        if has_finalizer(import) {
            cleanup(&ctx.client, import).await?;
            remove_finalizer(&api, &import.name_any()).await?;
        }
        return Ok(Action::await_change());
    }

    if !has_finalizer(import) {
        add_finalizer(&api, &import.name_any()).await?;
    }

    let state = match evaluate(&api, import, ctx).await {
        Ok(state) => state,
        Err(e) if e.is_permanent() => ImportState::InvalidTemplate(e.to_string()),
        Err(e) => return Err(e),
    };

    record(&api, import, &state).await?;

    Ok(state.action(&ctx.config))
}

async fn record(api: &Api<KeycloakImport>, import: &KeycloakImport, state: &ImportState) -> Result<()> {
    if patch_condition(api, import, import.conditions(), state.condition()).await? {
        info!("Import {} is now {}: {}", object_key(import), state.reason(), state.message());
    }
    Ok(())
}

/// Walk the gates and apply the rollout decision
async fn evaluate(api: &Api<KeycloakImport>, import: &KeycloakImport, ctx: &Context) -> Result<ImportState> {
    let client = &ctx.client;
    let target_namespace = import.target_namespace();
    let owner_namespace = import.namespace().unwrap_or_default();

    let keycloaks: Api<Keycloak> = Api::namespaced(client.clone(), &target_namespace);
    let Some(keycloak) = keycloaks.get_opt(import.target_name()).await? else {
        info!("Keycloak {}/{} not found", target_namespace, import.target_name());
        return Ok(ImportState::DependencyMissing(format!(
            "Keycloak {}/{} not found",
            target_namespace,
            import.target_name()
        )));
    };

    if !keycloak.is_ready() {
        info!("Keycloak {}/{} is not ready", target_namespace, keycloak.name_any());
        return Ok(ImportState::DependencyNotReady);
    }

    let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), &target_namespace);
    let Some(statefulset) = statefulsets.get_opt(&keycloak.statefulset_name()).await? else {
        info!("StatefulSet {}/{} not found", target_namespace, keycloak.statefulset_name());
        return Ok(ImportState::WorkloadMissing);
    };

    let substitutions = match resolve_substitutions(client, import).await {
        Ok(subs) => subs,
        Err(OperatorError::SecretUnresolved(msg)) => {
            info!("Substitution secret unresolved: {}", msg);
            return Ok(ImportState::SecretUnresolved(msg));
        }
        Err(e) => return Err(e),
    };

    let realm = render_realm(import, &substitutions)?;
    if let Err(e) = ensure_artifact(client, import, &realm).await {
        warn!("Failed to write realm secret: {}", e);
        record(api, import, &ImportState::ArtifactPending(e.to_string())).await?;
        return Err(e);
    }

    let jobs: Api<Job> = Api::namespaced(client.clone(), &target_namespace);
    let owned = find_owned(&jobs, &import.name_any(), &owner_namespace).await?;
    let marker_key = rollout_marker_key(import);
    let decisions = decide(&realm.revision, &owned, rollout_marker(&statefulset, &marker_key));

    let mut state = ImportState::Ready;
    for decision in decisions {
        debug!("Decision: {:?}", decision);
        state = match decision {
            Decision::DeleteStaleJob(name) => {
                info!("Deleting stale import job {}/{}", target_namespace, name);
                delete_ignore_not_found(&jobs, &name, &DeleteParams::foreground()).await?;
                continue;
            }
            Decision::CreateJob(revision) => {
                let job = build_import_job(import, &statefulset, &revision, ctx.config.import_job_backoff_limit)?;
                create_job(&jobs, &job).await?;
                ImportState::JobPending
            }
            Decision::AwaitJob { job, failed: false } => {
                debug!("Waiting for import job {}", job);
                ImportState::JobPending
            }
            Decision::AwaitJob { job, failed: true } => {
                warn!("Import job {}/{} failed", target_namespace, job);
                ImportState::JobFailed(format!("Job {}/{} failed", target_namespace, job))
            }
            Decision::TriggerRollout(revision) => {
                trigger_rollout(&statefulsets, &statefulset.name_any(), &marker_key, &revision).await?;
                ImportState::RolloutPending
            }
            Decision::NoAction => ImportState::Ready,
        };
    }

    Ok(state)
}

async fn create_job(jobs: &Api<Job>, job: &Job) -> Result<()> {
    match jobs.create(&PostParams::default(), job).await {
        Ok(created) => {
            info!("Created import job {}", created.name_any());
            Ok(())
        }
        Err(kube::Error::Api(err)) if err.code == 409 => {
            debug!("Import job {} already exists", job.name_any());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Stamp `revision` on the pod template. The write is conditional on the version
/// just read, and skipped if someone else already stamped the same revision.
async fn trigger_rollout(statefulsets: &Api<StatefulSet>, name: &str, key: &str, revision: &str) -> Result<()> {
    retry_on_conflict("rollout marker", || {
        let api = statefulsets.clone();
        let name = name.to_string();
        let key = key.to_string();
        let revision = revision.to_string();
        async move {
            let current = api.get(&name).await?;
            if rollout_marker(&current, &key) == Some(revision.as_str()) {
                debug!("Rollout marker of {} already at {}", name, revision);
                return Ok(());
            }

            let patch = json!({
                "spec": { "template": { "metadata": { "annotations": { key: revision } } } }
            });
            patch_conditional(&api, &current, patch).await?;
            info!("Rolling out {} for realm revision {}", name, revision);
            Ok(())
        }
    })
    .await
}

async fn add_finalizer(api: &Api<KeycloakImport>, name: &str) -> Result<()> {
    retry_on_conflict("finalizer", || {
        let api = api.clone();
        let name = name.to_string();
        async move {
            let current = api.get(&name).await?;
            if has_finalizer(&current) {
                return Ok(());
            }

            let mut finalizers = current.finalizers().to_vec();
            finalizers.push(IMPORT_FINALIZER.to_string());
            patch_conditional(&api, &current, json!({ "metadata": { "finalizers": finalizers } })).await?;
            debug!("Added finalizer to {}", name);
            Ok(())
        }
    })
    .await
}

async fn remove_finalizer(api: &Api<KeycloakImport>, name: &str) -> Result<()> {
    retry_on_conflict("finalizer", || {
        let api = api.clone();
        let name = name.to_string();
        async move {
            let Some(current) = api.get_opt(&name).await? else {
                return Ok(());
            };
            if !has_finalizer(&current) {
                return Ok(());
            }

            let finalizers: Vec<String> = current
                .finalizers()
                .iter()
                .filter(|f| *f != IMPORT_FINALIZER)
                .cloned()
                .collect();
            patch_conditional(&api, &current, json!({ "metadata": { "finalizers": finalizers } })).await?;
            info!("Removed finalizer from {}", name);
            Ok(())
        }
    })
    .await
}

/// Delete every job and secret carrying the import's ownership labels, in any namespace
#[instrument(skip(client, import), fields(import = %object_key(import)))]
async fn cleanup(client: &Client, import: &KeycloakImport) -> Result<()> {
    let name = import.name_any();
    let namespace = import.namespace().unwrap_or_default();

    for job in find_owned(&Api::<Job>::all(client.clone()), &name, &namespace).await? {
        let api: Api<Job> = Api::namespaced(client.clone(), &job.namespace().unwrap_or_default());
        delete_ignore_not_found(&api, &job.name_any(), &DeleteParams::foreground()).await?;
    }

    for secret in find_owned(&Api::<Secret>::all(client.clone()), &name, &namespace).await? {
        let api: Api<Secret> = Api::namespaced(client.clone(), &secret.namespace().unwrap_or_default());
        delete_ignore_not_found(&api, &secret.name_any(), &DeleteParams::default()).await?;
    }

    info!("Cleaned up resources of {}", object_key(import));
    Ok(())
}

fn error_policy(import: Arc<KeycloakImport>, error: &OperatorError, ctx: Arc<Context>) -> Action {
    let key = object_key(&import);
    let delay = ctx.backoff.next_delay(&key);
    error!("Reconciliation error for import {}: {}, retrying in {:?}", key, error, delay);
    Action::requeue(delay)
}
