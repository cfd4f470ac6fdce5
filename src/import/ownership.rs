// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Label based ownership for objects living outside the owner's namespace.
//!
//! Owner references only work inside one namespace, while an import's secret and
//! job are created next to the Keycloak instance. Ownership is therefore recorded
//! as a pair of labels and every cleanup is driven by a label selector lookup.

use crate::constants::{labels, OPERATOR_NAME};
use crate::error::Result;
use kube::{api::ListParams, Api, Resource};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::{debug, instrument};

/// The synthetic ownership label pair of an import
pub fn owner_labels(name: &str, namespace: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::IMPORT_OWNER.to_string(), name.to_string()),
        (labels::IMPORT_NAMESPACE.to_string(), namespace.to_string()),
    ])
}

/// Owner labels plus the labels every generated object carries
pub fn managed_labels(name: &str, namespace: &str) -> BTreeMap<String, String> {
    let mut labels = owner_labels(name, namespace);
    labels.insert(labels::MANAGED_BY.to_string(), OPERATOR_NAME.to_string());
    labels
}

/// Equality based selector string for `want`
pub fn label_selector(want: &BTreeMap<String, String>) -> String {
    want.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// True when every label in `want` is present in `have` with the same value
pub fn match_labels(have: Option<&BTreeMap<String, String>>, want: &BTreeMap<String, String>) -> bool {
    want.iter().all(|(k, v)| have.and_then(|h| h.get(k)) == Some(v))
}

/// Whether the object carries the ownership labels of the given import
pub fn is_owned_by<K: Resource>(obj: &K, owner_name: &str, owner_namespace: &str) -> bool {
    match_labels(
        obj.meta().labels.as_ref(),
        &owner_labels(owner_name, owner_namespace),
    )
}

/// List every object reachable through `api` that belongs to the given import.
/// The scope (one namespace or the whole cluster) is whatever `api` was built for.
#[instrument(skip(api), fields(kind = %K::kind(&())))]
pub async fn find_owned<K>(api: &Api<K>, owner_name: &str, owner_namespace: &str) -> Result<Vec<K>>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    let selector = label_selector(&owner_labels(owner_name, owner_namespace));
    let list = api.list(&ListParams::default().labels(&selector)).await?;

    debug!("Found {} owned objects", list.items.len());

    Ok(list.items)
}
