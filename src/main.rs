// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::Client;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rhbk_operator::config::Config;
use rhbk_operator::kubernetes::wait_for_crds;
use rhbk_operator::reconcilers::{KeycloakImportReconciler, KeycloakReconciler};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting RHBK operator");

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: requeue_interval={:?}, api_timeout={:?}, image={}",
        config.requeue_interval, config.api_timeout, config.keycloak_image
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Both controllers watch custom resources, so the CRDs have to be served first
    info!("Waiting for Keycloak CRDs to become available...");
    wait_for_crds(&client).await?;

    let keycloak_reconciler = KeycloakReconciler::new(client.clone(), config.clone());
    let import_reconciler = KeycloakImportReconciler::new(client, config);

    info!("Starting reconcilers...");

    tokio::try_join!(keycloak_reconciler.run(), import_reconciler.run())?;

    warn!("All reconcilers stopped");
    Ok(())
}
