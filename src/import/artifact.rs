// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The rendered realm secret mounted into import jobs.

use crate::constants::{annotations, labels};
use crate::error::{OperatorError, Result};
use crate::import::ownership::{is_owned_by, managed_labels, match_labels};
use crate::import::revision::payload_revision;
use crate::import::template::{escape_value, render};
use crate::kubernetes::retry_on_conflict;
use crate::types::{KeycloakImport, SecretKeyRef};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::{
    api::{ObjectMeta, PostParams},
    Api, Client, ResourceExt,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, instrument};

/// A realm payload with every placeholder filled in
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedRealm {
    pub payload: Vec<u8>,
    pub revision: String,
}

/// Read every substitution of `import` into an escaped value map.
/// Secret references win over literal values and are read from the import's own namespace.
#[instrument(skip(client, import), fields(import = %import.name_any()))]
pub async fn resolve_substitutions(client: &Client, import: &KeycloakImport) -> Result<BTreeMap<String, String>> {
    let namespace = import.namespace().unwrap_or_default();
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);
    let mut fetched: HashMap<String, Secret> = HashMap::new();
    let mut resolved = BTreeMap::new();

    for sub in &import.spec.substitutions {
        let raw = match &sub.secret {
            Some(secret_ref) => {
                if !fetched.contains_key(&secret_ref.name) {
                    let secret = secrets.get_opt(&secret_ref.name).await?.ok_or_else(|| {
                        OperatorError::SecretUnresolved(format!(
                            "secret {}/{} not found",
                            namespace, secret_ref.name
                        ))
                    })?;
                    fetched.insert(secret_ref.name.clone(), secret);
                }
                secret_value(&fetched[&secret_ref.name], secret_ref, &namespace)?
            }
            None => sub.value.clone().unwrap_or_default(),
        };

        resolved.insert(sub.name.clone(), escape_value(&raw)?);
    }

    debug!("Resolved {} substitutions", resolved.len());

    Ok(resolved)
}

fn secret_value(secret: &Secret, secret_ref: &SecretKeyRef, namespace: &str) -> Result<String> {
    let missing = || {
        OperatorError::SecretUnresolved(format!(
            "key {} not found in secret {}/{}",
            secret_ref.key, namespace, secret_ref.name
        ))
    };

    if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(&secret_ref.key)) {
        return String::from_utf8(bytes.0.clone()).map_err(|_| {
            OperatorError::SecretUnresolved(format!(
                "key {} in secret {}/{} is not valid UTF-8",
                secret_ref.key, namespace, secret_ref.name
            ))
        });
    }

    secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(&secret_ref.key))
        .cloned()
        .ok_or_else(missing)
}

/// Render the realm template of `import` and compute its revision
pub fn render_realm(import: &KeycloakImport, substitutions: &BTreeMap<String, String>) -> Result<RenderedRealm> {
    let payload = render(&import.spec.json, substitutions)?;
    let revision = payload_revision(&payload)?;

    Ok(RenderedRealm { payload, revision })
}

/// The desired realm secret for `import` in the target instance's namespace
pub fn build_artifact(import: &KeycloakImport, realm: &RenderedRealm) -> Secret {
    let mut labels = managed_labels(&import.name_any(), &import.namespace().unwrap_or_default());
    labels.insert(labels::WATCHED.to_string(), "true".to_string());

    Secret {
        metadata: ObjectMeta {
            name: Some(import.artifact_name()),
            namespace: Some(import.target_namespace()),
            labels: Some(labels),
            annotations: Some(BTreeMap::from([(
                annotations::REVISION.to_string(),
                realm.revision.clone(),
            )])),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            import.realm_file_name(),
            ByteString(realm.payload.clone()),
        )])),
        ..Default::default()
    }
}

/// Revision recorded on an existing realm secret
pub fn artifact_revision(secret: &Secret) -> Option<&str> {
    secret.annotations().get(annotations::REVISION).map(String::as_str)
}

/// Whether `existing` already holds what `desired` describes. The stored bytes
/// are compared, so a hand-edited payload is rewritten even when its revision
/// annotation was left alone.
fn is_current(existing: &Secret, desired: &Secret) -> bool {
    artifact_revision(desired).is_some()
        && artifact_revision(existing) == artifact_revision(desired)
        && existing.data == desired.data
        && match_labels(existing.metadata.labels.as_ref(), desired.labels())
}

/// A secret labelled for a different import is never taken over
fn check_owner(existing: &Secret, import: &KeycloakImport) -> Result<()> {
    let owner = existing.labels().get(labels::IMPORT_OWNER);
    let owner_namespace = existing.labels().get(labels::IMPORT_NAMESPACE);
    if owner.is_none() || is_owned_by(existing, &import.name_any(), &import.namespace().unwrap_or_default()) {
        return Ok(());
    }

    Err(OperatorError::ArtifactConflict(format!(
        "secret {}/{} belongs to {}/{}",
        existing.namespace().unwrap_or_default(),
        existing.name_any(),
        owner_namespace.map(String::as_str).unwrap_or_default(),
        owner.map(String::as_str).unwrap_or_default(),
    )))
}

/// Create or update the realm secret. Nothing is written when the stored secret
/// already matches. Updates are conditional on the resource version that was read.
#[instrument(skip(client, import, realm), fields(import = %import.name_any(), revision = %realm.revision))]
pub async fn ensure_artifact(client: &Client, import: &KeycloakImport, realm: &RenderedRealm) -> Result<Secret> {
    let desired = build_artifact(import, realm);
    let name = import.artifact_name();
    let api: Api<Secret> = Api::namespaced(client.clone(), &import.target_namespace());

    retry_on_conflict("realm secret", || {
        let api = api.clone();
        let desired = desired.clone();
        let name = name.clone();
        async move {
            let existing = api.get_opt(&name).await?;
            if let Some(existing) = &existing {
                check_owner(existing, import)?;
            }

            match existing {
                Some(existing) if is_current(&existing, &desired) => {
                    debug!("Realm secret {} is up to date", name);
                    Ok(existing)
                }
                Some(existing) => {
                    info!("Updating realm secret {}", name);
                    let mut next = desired;
                    next.metadata.resource_version = existing.metadata.resource_version.clone();
                    Ok(api.replace(&name, &PostParams::default(), &next).await?)
                }
                None => {
                    info!("Creating realm secret {}", name);
                    Ok(api.create(&PostParams::default(), &desired).await?)
                }
            }
        }
    })
    .await
}
