// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Resolvability check of a policy's configuration source.

use crate::error::{InjectorError, Result};
use crate::kubernetes::ClusterStore;
use crate::types::{EffectiveSource, InjectionPolicy};
use kube::ResourceExt;
use tracing::{debug, instrument};

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidation {
    /// The source can be mounted. `config_version` is the resourceVersion of
    /// the referenced ConfigMap when one was read.
    Valid { config_version: Option<String> },
    Invalid { reason: String },
}

impl ConfigValidation {
    fn invalid(reason: impl Into<String>) -> Self {
        ConfigValidation::Invalid {
            reason: reason.into(),
        }
    }
}

/// Check that the configuration source of `policy` is usable. Missing objects
/// and keys are an `Invalid` outcome; only store failures are errors. Inline
/// payloads are not inspected.
#[instrument(skip(store, policy), fields(policy = %policy.name_any()))]
pub async fn validate_config<S: ClusterStore>(store: &S, policy: &InjectionPolicy) -> Result<ConfigValidation> {
    let reference = match policy.spec.sidecar.config.effective() {
        None => {
            return Ok(ConfigValidation::invalid(
                "either configMapRef or inline configuration must be specified",
            ))
        }
        Some(EffectiveSource::Inline(_)) => {
            debug!("Inline configuration, nothing to resolve");
            return Ok(ConfigValidation::Valid {
                config_version: None,
            });
        }
        Some(EffectiveSource::ConfigMap(reference)) => reference,
    };

    let namespace = policy.namespace().ok_or_else(|| {
        InjectorError::MissingMetadata(format!("policy {} has no namespace", policy.name_any()))
    })?;

    let Some(config_map) = store.get_config_map(&namespace, &reference.name).await? else {
        return Ok(ConfigValidation::invalid(format!(
            "configMap {} not found",
            reference.name
        )));
    };

    let key = reference.key();
    if !config_map.data.as_ref().is_some_and(|d| d.contains_key(key)) {
        return Ok(ConfigValidation::invalid(format!(
            "configMap {} does not contain key {}",
            reference.name, key
        )));
    }

    Ok(ConfigValidation::Valid {
        config_version: config_map.metadata.resource_version.clone(),
    })
}
