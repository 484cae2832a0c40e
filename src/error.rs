// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InjectorError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Request timed out after {timeout:?}: {operation}")]
    Timeout { operation: String, timeout: Duration },

    #[error("Conflicting write on {0}")]
    Conflict(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid selector: {0}")]
    SelectorError(String),

    #[error("Deployment {deployment} is already owned by policy {owner}")]
    OwnershipConflict { deployment: String, owner: String },

    #[error("Failed to encode injection data: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Missing object metadata: {0}")]
    MissingMetadata(String),
}

impl InjectorError {
    /// Optimistic-concurrency conflicts are resolved by a fresh reconciliation
    pub fn is_conflict(&self) -> bool {
        matches!(self, InjectorError::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, InjectorError>;
