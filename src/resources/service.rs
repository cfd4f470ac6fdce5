// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::{annotations, keycloak};
use crate::resources::{instance_labels, owner_references, selector_labels};
use crate::types::Keycloak;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{api::ObjectMeta, ResourceExt};
use std::collections::BTreeMap;

fn port(name: &str, number: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        protocol: Some("TCP".to_string()),
        port: number,
        target_port: Some(IntOrString::Int(number)),
        ..Default::default()
    }
}

/// HTTP/HTTPS service in front of the instance. The serving-cert annotation makes
/// OpenShift issue the TLS secret the pods mount.
pub fn build_service(instance: &Keycloak) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(instance.name_any()),
            namespace: instance.namespace(),
            labels: Some(instance_labels(instance)),
            annotations: Some(BTreeMap::from([(
                annotations::SERVING_CERT_SECRET.to_string(),
                keycloak::TLS_SECRET_NAME.to_string(),
            )])),
            owner_references: owner_references(instance),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![
                port("http", keycloak::HTTP_PORT),
                port("https", keycloak::HTTPS_PORT),
            ]),
            selector: Some(selector_labels(instance)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Headless service used by the cache cluster for DNS based member discovery
pub fn build_discovery_service(instance: &Keycloak) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(instance.discovery_service_name()),
            namespace: instance.namespace(),
            labels: Some(instance_labels(instance)),
            owner_references: owner_references(instance),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            ports: Some(vec![port("discovery", keycloak::DISCOVERY_PORT)]),
            selector: Some(selector_labels(instance)),
            ..Default::default()
        }),
        ..Default::default()
    }
}
