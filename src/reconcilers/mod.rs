// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes reconcilers that react to watch events.

pub mod keycloak;
pub mod keycloak_import;

pub use keycloak::KeycloakReconciler;
pub use keycloak_import::KeycloakImportReconciler;

use crate::error::Result;
use crate::types::condition::{upsert_condition, Condition};
use kube::{
    api::{Patch, PatchParams},
    Api, Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::fmt::Debug;
use tracing::debug;

/// Write `condition` into the status of `obj` unless it already says the same.
/// Returns whether a write happened.
pub(crate) async fn patch_condition<K>(
    api: &Api<K>,
    obj: &K,
    current: &[Condition],
    condition: Condition,
) -> Result<bool>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    let mut conditions = current.to_vec();
    if !upsert_condition(&mut conditions, condition) {
        debug!("Status of {} unchanged", obj.name_any());
        return Ok(false);
    }

    let patch = json!({ "status": { "conditions": conditions } });
    api.patch_status(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;

    Ok(true)
}
