// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Small wrappers around `Api` calls shared by both controllers

use crate::error::Result;
use kube::{
    api::{DeleteParams, Patch, PatchParams},
    Api, Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;
use tracing::{debug, info, instrument};

/// Delete an object, treating "already gone" as success
#[instrument(skip(api, params), fields(kind = %K::kind(&())))]
pub async fn delete_ignore_not_found<K>(api: &Api<K>, name: &str, params: &DeleteParams) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, params).await {
        Ok(_) => {
            info!("Deleted {}", name);
            Ok(())
        }
        Err(kube::Error::Api(err)) if err.code == 404 => {
            debug!("{} already gone", name);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// JSON merge patch that only applies if the object is still at the version we read.
/// The API server answers 409 when `metadata.resourceVersion` has moved on.
pub fn conditional_merge<K: Resource>(current: &K, mut patch: Value) -> Patch<Value> {
    if let Some(rv) = current.resource_version() {
        if let Some(obj) = patch.as_object_mut() {
            let metadata = obj
                .entry("metadata")
                .or_insert_with(|| Value::Object(Default::default()));
            if let Some(metadata) = metadata.as_object_mut() {
                metadata.insert("resourceVersion".to_string(), Value::String(rv));
            }
        }
    }
    Patch::Merge(patch)
}

/// Apply a conditional merge patch built by [`conditional_merge`]
pub async fn patch_conditional<K>(api: &Api<K>, current: &K, patch: Value) -> Result<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    let name = current.name_any();
    Ok(api
        .patch(&name, &PatchParams::default(), &conditional_merge(current, patch))
        .await?)
}
