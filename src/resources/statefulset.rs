// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The StatefulSet running the Keycloak server pods.

use crate::constants::keycloak;
use crate::resources::{instance_labels, owner_references, selector_labels};
use crate::types::keycloak::SecretOptionVar;
use crate::types::{Keycloak, SecretOption};
use k8s_openapi::api::apps::v1::{
    RollingUpdateStatefulSetStrategy, StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction,
    PodSpec, PodTemplateSpec, Probe, ResourceRequirements, SecretVolumeSource, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{api::ObjectMeta, ResourceExt};
use std::collections::BTreeMap;

const SERVICE_ACCOUNT_CAS: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt,/var/run/secrets/kubernetes.io/serviceaccount/service-ca.crt";
const DB_POOL_SIZE: &str = "30";

fn literal(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        value_from: None,
    }
}

/// Env var from a literal or a secret key. Secret references win.
fn from_option(name: &str, option: &SecretOption) -> EnvVar {
    match &option.secret {
        Some(secret) => EnvVar {
            name: name.to_string(),
            value: None,
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(secret.into()),
                ..Default::default()
            }),
        },
        None => literal(name, option.value.clone().unwrap_or_default()),
    }
}

fn https_probe(path: &str) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(keycloak::HTTPS_PORT),
            scheme: Some("HTTPS".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Server environment. Additional options replace generated entries with the
/// same name, anything else is appended.
pub fn server_env(instance: &Keycloak) -> Vec<EnvVar> {
    let spec = &instance.spec;
    let mut truststore = SERVICE_ACCOUNT_CAS.to_string();
    if spec.trusted_ca_bundles.is_some() {
        truststore.push(',');
        truststore.push_str(keycloak::TRUSTED_CA_MOUNT_DIR);
    }

    let mut env = vec![
        literal("KC_HTTP_ENABLED", "true"),
        literal("KC_HTTP_PORT", keycloak::HTTP_PORT.to_string()),
        literal("KC_HTTPS_PORT", keycloak::HTTPS_PORT.to_string()),
        literal("KC_HTTPS_CERTIFICATE_FILE", format!("{}/tls.crt", keycloak::TLS_MOUNT_DIR)),
        literal("KC_HTTPS_CERTIFICATE_KEY_FILE", format!("{}/tls.key", keycloak::TLS_MOUNT_DIR)),
        literal("KC_DB", "postgres"),
        from_option("KC_DB_USERNAME", &spec.database.user),
        from_option("KC_DB_PASSWORD", &spec.database.password),
        from_option("KC_DB_URL_HOST", &spec.database.host),
        from_option("KC_DB_URL_PORT", &spec.database.port),
        literal("KC_DB_POOL_INITIAL_SIZE", DB_POOL_SIZE),
        literal("KC_DB_POOL_MIN_SIZE", DB_POOL_SIZE),
        literal("KC_DB_POOL_MAX_SIZE", DB_POOL_SIZE),
        literal("KC_HEALTH_ENABLED", "true"),
        literal("KC_CACHE", "ispn"),
        literal("KC_CACHE_STACK", "kubernetes"),
        from_option("KEYCLOAK_ADMIN", &spec.admin.username),
        from_option("KEYCLOAK_ADMIN_PASSWORD", &spec.admin.password),
        literal("KC_TRUSTSTORE_PATHS", truststore),
    ];

    match &spec.network_config {
        Some(network) if network.proxy => {
            env.push(literal("KC_PROXY_HEADERS", "xforwarded"));
            env.push(literal("KC_HOSTNAME_STRICT", "false"));
        }
        Some(network) => {
            if let Some(hostname) = &network.hostname {
                env.push(literal("KC_HOSTNAME", hostname.clone()));
            }
            env.push(literal("KC_PROXY", "passthrough"));
        }
        None => env.push(literal("KC_PROXY", "passthrough")),
    }

    merge_additional(env, &spec.additional_options)
}

fn merge_additional(mut env: Vec<EnvVar>, additional: &[SecretOptionVar]) -> Vec<EnvVar> {
    for extra in additional {
        let var = from_option(&extra.name, &extra.option);
        match env.iter_mut().find(|e| e.name == extra.name) {
            Some(existing) => *existing = var,
            None => env.push(var),
        }
    }
    env
}

fn volumes(instance: &Keycloak) -> (Vec<Volume>, Vec<VolumeMount>) {
    let mut volumes = vec![Volume {
        name: keycloak::TLS_VOLUME_NAME.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(keycloak::TLS_SECRET_NAME.to_string()),
            default_mode: Some(0o644),
            optional: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    }];
    let mut mounts = vec![VolumeMount {
        name: keycloak::TLS_VOLUME_NAME.to_string(),
        mount_path: keycloak::TLS_MOUNT_DIR.to_string(),
        ..Default::default()
    }];

    if let Some(config_map) = &instance.spec.trusted_ca_bundles {
        volumes.push(Volume {
            name: keycloak::TRUSTED_CA_VOLUME_NAME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: config_map.clone(),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: keycloak::TRUSTED_CA_VOLUME_NAME.to_string(),
            mount_path: keycloak::TRUSTED_CA_MOUNT_DIR.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    (volumes, mounts)
}

/// Desired StatefulSet for `instance`, applied with server-side apply
pub fn build_statefulset(instance: &Keycloak, image: &str) -> StatefulSet {
    let (volumes, volume_mounts) = volumes(instance);
    let namespace = instance.namespace().unwrap_or_default();

    let container = Container {
        name: keycloak::CONTAINER_NAME.to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("Always".to_string()),
        args: Some(vec![
            format!(
                "-Djgroups.dns.query={}.{}",
                instance.discovery_service_name(),
                namespace
            ),
            "--verbose".to_string(),
            "start".to_string(),
        ]),
        ports: Some(vec![
            ContainerPort {
                name: Some("https".to_string()),
                container_port: keycloak::HTTPS_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                name: Some("http".to_string()),
                container_port: keycloak::HTTP_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                name: Some("discovery".to_string()),
                container_port: keycloak::DISCOVERY_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        env: Some(server_env(instance)),
        resources: Some(ResourceRequirements {
            requests: Some(BTreeMap::from([(
                "memory".to_string(),
                Quantity("1700Mi".to_string()),
            )])),
            limits: Some(BTreeMap::from([(
                "memory".to_string(),
                Quantity("2Gi".to_string()),
            )])),
            ..Default::default()
        }),
        liveness_probe: Some(https_probe("/health/live")),
        readiness_probe: Some(https_probe("/health/ready")),
        startup_probe: Some(https_probe("/health/started")),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    };

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(instance.statefulset_name()),
            namespace: Some(namespace),
            labels: Some(instance_labels(instance)),
            owner_references: owner_references(instance),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(instance.spec.instances),
            selector: LabelSelector {
                match_labels: Some(selector_labels(instance)),
                ..Default::default()
            },
            service_name: instance.discovery_service_name(),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateStatefulSetStrategy {
                    partition: Some(0),
                    ..Default::default()
                }),
            }),
            revision_history_limit: Some(10),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(instance_labels(instance)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// All desired replicas are ready
pub fn is_statefulset_ready(statefulset: &StatefulSet) -> bool {
    let desired = statefulset.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let Some(status) = statefulset.status.as_ref() else {
        return false;
    };

    status.ready_replicas.unwrap_or(0) == desired && status.replicas == desired
}
