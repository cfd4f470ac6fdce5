// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::types::condition::{self, Condition};
use crate::types::SecretOption;
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

/// A Keycloak (RHBK) installation backed by a StatefulSet
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
#[kube(group = "sso.stakater.com", version = "v1alpha1", kind = "Keycloak")]
#[kube(namespaced)]
#[kube(status = "KeycloakStatus")]
#[serde(rename_all = "camelCase")]
pub struct KeycloakSpec {
    pub database: PostgresDatabase,
    /// Extra environment variables; entries override the generated ones by name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_options: Vec<SecretOptionVar>,
    pub instances: i32,
    /// ConfigMap holding extra CA certificates to trust
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trusted_ca_bundles: Option<String>,
    #[serde(default)]
    pub admin: AdminUser,
    #[serde(rename = "networkOptions", skip_serializing_if = "Option::is_none")]
    pub network_config: Option<NetworkConfig>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
pub struct PostgresDatabase {
    pub host: SecretOption,
    pub port: SecretOption,
    pub user: SecretOption,
    pub password: SecretOption,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
pub struct AdminUser {
    #[serde(default)]
    pub username: SecretOption,
    #[serde(default)]
    pub password: SecretOption,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
pub struct NetworkConfig {
    /// Run behind a proxy that forwards X-Forwarded-* headers
    #[serde(default)]
    pub proxy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
pub struct SecretOptionVar {
    pub name: String,
    #[serde(flatten)]
    pub option: SecretOption,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Keycloak {
    /// Check if this instance is ready based on its status conditions
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| condition::is_ready(&s.conditions))
    }

    /// The backing StatefulSet shares the instance name
    pub fn statefulset_name(&self) -> String {
        self.name_any()
    }

    pub fn discovery_service_name(&self) -> String {
        format!("{}-discovery", self.name_any())
    }
}
