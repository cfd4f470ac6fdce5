// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OperatorError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("unresolved placeholder(s): {0}")]
    UnresolvedPlaceholder(String),

    #[error("Invalid workload template: {0}")]
    InvalidWorkloadTemplate(String),

    #[error("Substitution secret unresolved: {0}")]
    SecretUnresolved(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Realm secret owned by another import: {0}")]
    ArtifactConflict(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Object is missing {0}")]
    MissingObjectKey(String),

    #[error("Finalizer error: {0}")]
    Finalizer(String),
}

impl OperatorError {
    /// The API server answered 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, OperatorError::KubeError(kube::Error::Api(err)) if err.code == 404)
    }

    /// The API server rejected a write because the resource version moved
    pub fn is_conflict(&self) -> bool {
        matches!(self, OperatorError::KubeError(kube::Error::Api(err)) if err.code == 409)
    }

    /// Errors that will not go away until the import spec itself changes
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            OperatorError::UnresolvedPlaceholder(_) | OperatorError::InvalidWorkloadTemplate(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, OperatorError>;
