// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resources served by the operator.

pub mod condition;
pub mod keycloak;
pub mod keycloak_import;

pub use condition::Condition;
pub use keycloak::{Keycloak, KeycloakSpec, KeycloakStatus};
pub use keycloak_import::{KeycloakImport, KeycloakImportSpec, KeycloakImportStatus};

use serde::{Deserialize, Serialize};

/// Reference to a key inside a Secret
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

/// A value given either literally or through a Secret key
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
pub struct SecretOption {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretKeyRef>,
}

impl From<&SecretKeyRef> for k8s_openapi::api::core::v1::SecretKeySelector {
    fn from(r: &SecretKeyRef) -> Self {
        k8s_openapi::api::core::v1::SecretKeySelector {
            name: r.name.clone(),
            key: r.key.clone(),
            optional: None,
        }
    }
}
