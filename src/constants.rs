// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// API group of the operator's custom resources
pub const API_GROUP: &str = "sso.stakater.com";

/// The operator name used for server-side apply and the managed-by label
pub const OPERATOR_NAME: &str = "rhbk-operator";

/// Label keys used for synthetic (cross-namespace) ownership
pub mod labels {
    /// Name of the KeycloakImport owning the object
    pub const IMPORT_OWNER: &str = "sso.stakater.com/import-owner";
    /// Namespace of the KeycloakImport owning the object
    pub const IMPORT_NAMESPACE: &str = "sso.stakater.com/import-namespace";
    /// Marks secrets the import controller keeps an eye on
    pub const WATCHED: &str = "sso.stakater.com/watched";
    /// Revision a realm import job was built for
    pub const IMPORT_REVISION: &str = "sso.stakater.com/import-revision";
    pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
    /// Instance name on the workload and its services
    pub const INSTANCE: &str = "app.kubernetes.io/instance";
    pub const APP: &str = "app";
}

pub mod annotations {
    /// Revision of the rendered realm stored in the config artifact
    pub const REVISION: &str = "sso.stakater.com/revision";
    /// Prefix of the per-import rollout marker on the workload pod template
    pub const ROLLOUT_PREFIX: &str = "rollout.sso.stakater.com";
    pub const SERVING_CERT_SECRET: &str = "service.beta.openshift.io/serving-cert-secret-name";
}

pub const IMPORT_FINALIZER: &str = "sso.stakater.com/realm-import-cleanup";

pub mod conditions {
    /// Condition type that carries readiness for both resource kinds
    pub const READY: &str = "ReconcileSuccess";
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
}

/// Fixed locations and values inside the realm import job
pub mod import_job {
    pub const MOUNT_DIR: &str = "/mnt/realm-import";
    pub const VOLUME_NAME: &str = "realm-import";
    pub const KC_SCRIPT: &str = "/opt/keycloak/bin/kc.sh";
    pub const SHELL: &str = "/bin/bash";
}

/// Keycloak server wiring shared by the workload and the import job
pub mod keycloak {
    pub const CONTAINER_NAME: &str = "rhbk";
    pub const APP_LABEL_VALUE: &str = "rhbk";
    pub const HTTP_PORT: i32 = 8080;
    pub const HTTPS_PORT: i32 = 8443;
    pub const DISCOVERY_PORT: i32 = 7800;
    pub const TLS_SECRET_NAME: &str = "rhbk-tls";
    pub const TLS_VOLUME_NAME: &str = "keycloak-tls-certificates";
    pub const TLS_MOUNT_DIR: &str = "/mnt/certificates";
    pub const TRUSTED_CA_VOLUME_NAME: &str = "trusted-ca-bundles";
    pub const TRUSTED_CA_MOUNT_DIR: &str = "/mnt/trusted-ca";
}

/// CRD polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}

/// How many times a conditional write is re-fetched and retried after a conflict
pub const MAX_CONFLICT_RETRIES: u32 = 5;
