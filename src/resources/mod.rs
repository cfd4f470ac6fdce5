// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Objects making up a Keycloak instance: the StatefulSet and its Services.

pub mod service;
pub mod statefulset;

use crate::constants::{keycloak, labels, OPERATOR_NAME};
use crate::types::Keycloak;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

pub use service::{build_discovery_service, build_service};
pub use statefulset::build_statefulset;

/// Selector labels shared by the pods and both services
pub fn selector_labels(instance: &Keycloak) -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::APP.to_string(), keycloak::APP_LABEL_VALUE.to_string()),
        (labels::INSTANCE.to_string(), instance.name_any()),
    ])
}

/// Selector labels plus the managed-by marker
pub fn instance_labels(instance: &Keycloak) -> BTreeMap<String, String> {
    let mut labels = selector_labels(instance);
    labels.insert(labels::MANAGED_BY.to_string(), OPERATOR_NAME.to_string());
    labels
}

/// Controller owner reference pointing at the instance; empty if it has no uid yet
pub fn owner_references(instance: &Keycloak) -> Option<Vec<OwnerReference>> {
    instance.controller_owner_ref(&()).map(|r| vec![r])
}
