// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Construction of the sidecar container, its configuration volume and the
//! extra pod template entries declared by a policy.

use crate::constants::{sidecar, OPERATOR_NAME};
use crate::error::{InjectorError, Result};
use crate::types::{EffectiveSource, InjectionPolicy};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, KeyToPath, Volume, VolumeMount,
};
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

/// Everything spliced into a pod template for one policy.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedSidecar {
    pub container: Container,
    pub config_volume: Volume,
    pub extra_volumes: Vec<Volume>,
    pub init_containers: Vec<Container>,
}

impl MaterializedSidecar {
    pub fn from_policy(policy: &InjectionPolicy) -> Result<Self> {
        Ok(MaterializedSidecar {
            container: build_container(policy),
            config_volume: build_config_volume(policy)?,
            extra_volumes: policy.spec.volumes.clone(),
            init_containers: policy.spec.init_containers.clone(),
        })
    }
}

/// Build the sidecar container. User args come first, followed by the
/// configuration file flag.
pub fn build_container(policy: &InjectionPolicy) -> Container {
    let spec = &policy.spec.sidecar;

    let mut args = spec.args.clone();
    args.push(sidecar::CONFIG_FLAG.to_string());
    args.push(format!("{}/{}", sidecar::CONFIG_MOUNT_PATH, sidecar::CONFIG_FILE));

    let mut volume_mounts = vec![VolumeMount {
        name: sidecar::CONFIG_VOLUME.to_string(),
        mount_path: sidecar::CONFIG_MOUNT_PATH.to_string(),
        read_only: Some(true),
        ..Default::default()
    }];
    volume_mounts.extend(spec.volume_mounts.iter().cloned());

    Container {
        name: spec.container_name().to_string(),
        image: Some(spec.image.clone()),
        image_pull_policy: Some(spec.pull_policy().to_string()),
        args: Some(args),
        env: (!spec.env.is_empty()).then(|| spec.env.clone()),
        resources: spec.resources.clone(),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    }
}

/// Build the configuration volume, projecting the configured key (or the
/// generated inline ConfigMap) onto the fixed configuration file name.
pub fn build_config_volume(policy: &InjectionPolicy) -> Result<Volume> {
    let (config_map_name, key) = match policy.spec.sidecar.config.effective() {
        Some(EffectiveSource::ConfigMap(r)) => (r.name.clone(), r.key().to_string()),
        Some(EffectiveSource::Inline(_)) => (
            policy.inline_config_map_name(),
            sidecar::CONFIG_FILE.to_string(),
        ),
        None => {
            return Err(InjectorError::InvalidConfiguration(
                "either configMapRef or inline configuration must be specified".to_string(),
            ))
        }
    };

    Ok(Volume {
        name: sidecar::CONFIG_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map_name,
            items: Some(vec![KeyToPath {
                key,
                path: sidecar::CONFIG_FILE.to_string(),
                mode: None,
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// The ConfigMap wrapping an inline payload, owned by the policy so it is
/// garbage collected together with it. `None` when the policy uses a
/// ConfigMap reference.
pub fn build_inline_config_map(policy: &InjectionPolicy) -> Option<ConfigMap> {
    let EffectiveSource::Inline(payload) = policy.spec.sidecar.config.effective()? else {
        return None;
    };

    Some(ConfigMap {
        metadata: ObjectMeta {
            name: Some(policy.inline_config_map_name()),
            namespace: policy.namespace(),
            labels: Some(BTreeMap::from([(
                "app.kubernetes.io/managed-by".to_string(),
                OPERATOR_NAME.to_string(),
            )])),
            owner_references: policy.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            sidecar::CONFIG_FILE.to_string(),
            payload.to_string(),
        )])),
        ..Default::default()
    })
}
