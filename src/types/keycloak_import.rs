// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::import::revision::name_hash;
use crate::types::condition::{self, Condition};
use crate::types::SecretKeyRef;
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

/// Realm configuration to import into a running Keycloak instance
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
#[kube(group = "sso.stakater.com", version = "v1alpha1", kind = "KeycloakImport")]
#[kube(namespaced)]
#[kube(status = "KeycloakImportStatus")]
#[serde(rename_all = "camelCase")]
pub struct KeycloakImportSpec {
    pub keycloak_instance: InstanceRef,
    /// Realm JSON, may contain %NAME% placeholders
    pub json: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub substitutions: Vec<Substitution>,
    #[serde(default)]
    pub override_if_exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sizing: Option<RealmSizing>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
pub struct InstanceRef {
    pub name: String,
    /// Defaults to the namespace of the import
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// A named placeholder value, literal or read from a Secret in the import's namespace
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
pub struct Substitution {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretKeyRef>,
}

/// Expected load of the imported realm, used by instance sizing
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RealmSizing {
    #[serde(default)]
    pub logins_per_second: i32,
    #[serde(default)]
    pub client_credentials_grants_per_second: i32,
    #[serde(default)]
    pub refresh_token_grants_per_second: i32,
    #[serde(default)]
    pub cached_sessions: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakImportStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Longest object name the API server accepts
const MAX_OBJECT_NAME_LEN: usize = 253;

impl KeycloakImport {
    /// Namespace of the targeted Keycloak instance; also where the job and secret live
    pub fn target_namespace(&self) -> String {
        self.spec
            .keycloak_instance
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| self.namespace().unwrap_or_default())
    }

    pub fn target_name(&self) -> &str {
        &self.spec.keycloak_instance.name
    }

    /// `<namespace>-<name>`, cut down to `max` characters with a hash suffix when it
    /// does not fit. Objects named this way in a shared namespace never collide
    /// between imports of the same name.
    pub fn scoped_name(&self, max: usize) -> String {
        let full = format!("{}-{}", self.namespace().unwrap_or_default(), self.name_any());
        if full.len() <= max {
            return full;
        }

        let hash = name_hash(&full);
        let keep = max.saturating_sub(hash.len() + 1);
        let prefix = full.get(..keep).unwrap_or(&full).trim_end_matches(['-', '.']);
        format!("{}-{}", prefix, hash)
    }

    /// Name of the rendered realm secret
    pub fn artifact_name(&self) -> String {
        self.scoped_name(MAX_OBJECT_NAME_LEN)
    }

    /// File name of the realm inside the rendered secret and the job mount
    pub fn realm_file_name(&self) -> String {
        format!("{}-realm.json", self.name_any())
    }

    /// Whether any substitution reads from the given secret
    pub fn has_secret_reference(&self, namespace: &str, name: &str) -> bool {
        self.namespace().as_deref() == Some(namespace)
            && self
                .spec
                .substitutions
                .iter()
                .filter_map(|s| s.secret.as_ref())
                .any(|s| s.name == name)
    }

    pub fn targets(&self, namespace: &str, name: &str) -> bool {
        self.target_name() == name && self.target_namespace() == namespace
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    pub fn is_ready(&self) -> bool {
        condition::is_ready(self.conditions())
    }
}
