// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Keycloak reconciler - keeps the instance's Services and StatefulSet applied
//! and reports readiness once all replicas are up.

use crate::config::Config;
use crate::constants::{labels, OPERATOR_NAME};
use crate::error::{OperatorError, Result};
use crate::kubernetes::ErrorBackoff;
use crate::reconcilers::patch_condition;
use crate::resources::statefulset::is_statefulset_ready;
use crate::resources::{build_discovery_service, build_service, build_statefulset};
use crate::types::{Condition, Keycloak};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::{
    api::{Patch, PatchParams},
    runtime::{controller::Action, Controller},
    Api, Client, Resource, ResourceExt,
};
use kube_runtime::watcher::Config as WatcherConfig;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

const WAITING_MESSAGE: &str = "Waiting for resources to be ready";

pub struct KeycloakReconciler {
    client: Client,
    config: Config,
    backoff: ErrorBackoff,
}

impl KeycloakReconciler {
    pub fn new(client: Client, config: Config) -> Self {
        let backoff = ErrorBackoff::new(config.error_backoff_base, config.error_backoff_max);
        Self { client, config, backoff }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let keycloaks: Api<Keycloak> = Api::all(self.client.clone());
        let managed = WatcherConfig::default().labels(&format!("{}={}", labels::MANAGED_BY, OPERATOR_NAME));
        let statefulsets: Api<StatefulSet> = Api::all(self.client.clone());
        let services: Api<Service> = Api::all(self.client.clone());
        let context = Arc::new(self);

        Controller::new(keycloaks, WatcherConfig::default())
            .owns(statefulsets, managed.clone())
            .owns(services, managed)
            .shutdown_on_signal()
            .run(reconcile, error_policy, context)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled keycloak: {:?}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        Ok(())
    }
}

/// Server-side apply `obj` under the operator's field manager
async fn apply<K>(client: &Client, namespace: &str, obj: &K) -> Result<K>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug,
{
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    let params = PatchParams::apply(OPERATOR_NAME).force();
    Ok(api.patch(&obj.name_any(), &params, &Patch::Apply(obj)).await?)
}

fn instance_key(keycloak: &Keycloak) -> String {
    format!("{}/{}", keycloak.namespace().unwrap_or_default(), keycloak.name_any())
}

pub async fn reconcile(keycloak: Arc<Keycloak>, ctx: Arc<KeycloakReconciler>) -> Result<Action> {
    let result = reconcile_instance(&keycloak, &ctx).await;
    if result.is_ok() {
        ctx.backoff.reset(&instance_key(&keycloak));
    }
    result
}

#[instrument(skip(keycloak, ctx), fields(keycloak = %keycloak.name_any()))]
async fn reconcile_instance(keycloak: &Arc<Keycloak>, ctx: &KeycloakReconciler) -> Result<Action> {
    let namespace = keycloak
        .namespace()
        .ok_or_else(|| OperatorError::MissingObjectKey("metadata.namespace".to_string()))?;
    let api: Api<Keycloak> = Api::namespaced(ctx.client.clone(), &namespace);
    let conditions = keycloak
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();

    if let Err(e) = apply(&ctx.client, &namespace, &build_service(&keycloak)).await {
        return fail(&api, &keycloak, &conditions, "Service setup not ready", e).await;
    }

    let statefulset = match apply(
        &ctx.client,
        &namespace,
        &build_statefulset(&keycloak, &ctx.config.keycloak_image),
    )
    .await
    {
        Ok(sts) => sts,
        Err(e) => return fail(&api, &keycloak, &conditions, "Deployment setup not ready", e).await,
    };

    if let Err(e) = apply(&ctx.client, &namespace, &build_discovery_service(&keycloak)).await {
        return fail(&api, &keycloak, &conditions, "Discovery service setup not ready", e).await;
    }

    if is_statefulset_ready(&statefulset) {
        if patch_condition(&api, keycloak.as_ref(), &conditions, Condition::ready(true, "Ready", "")).await? {
            info!("Keycloak {}/{} is ready", namespace, keycloak.name_any());
        }
        Ok(Action::await_change())
    } else {
        debug!("StatefulSet {} not ready yet", statefulset.name_any());
        patch_condition(
            &api,
            keycloak.as_ref(),
            &conditions,
            Condition::ready(false, "Waiting", WAITING_MESSAGE),
        )
        .await?;
        Ok(Action::requeue(ctx.config.requeue_interval))
    }
}

/// Record a failed step in the status and hand the error to the error policy
async fn fail(
    api: &Api<Keycloak>,
    keycloak: &Keycloak,
    conditions: &[Condition],
    phrase: &str,
    error: OperatorError,
) -> Result<Action> {
    let condition = Condition::ready(false, "ReconcileError", format!("{}. {}", phrase, error));
    if let Err(e) = patch_condition(api, keycloak, conditions, condition).await {
        warn!("Failed to record status for {}: {}", keycloak.name_any(), e);
    }
    Err(error)
}

fn error_policy(keycloak: Arc<Keycloak>, error: &OperatorError, ctx: Arc<KeycloakReconciler>) -> Action {
    let key = instance_key(&keycloak);
    let delay = ctx.backoff.next_delay(&key);
    error!("Reconciliation error for keycloak {}: {}, retrying in {:?}", key, error, delay);
    Action::requeue(delay)
}
