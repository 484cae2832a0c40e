// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Configuration fingerprint of the materialized sidecar.

use crate::constants::FINGERPRINT_BYTES;
use crate::error::Result;
use crate::types::{ConfigSource, InjectionPolicySpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, ResourceRequirements, Volume, VolumeMount};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Every field that changes the sidecar once spliced into a pod template.
/// Field order is part of the fingerprint.
#[derive(Serialize)]
struct FingerprintInput<'a> {
    name: &'a str,
    image: &'a str,
    pull_policy: &'a str,
    config: &'a ConfigSource,
    volume_mounts: &'a [VolumeMount],
    resources: Option<&'a ResourceRequirements>,
    env: &'a [EnvVar],
    args: &'a [String],
    volumes: &'a [Volume],
    init_containers: &'a [Container],
}

/// Compute the fingerprint of a policy: the first `FINGERPRINT_BYTES` bytes of a
/// SHA-256 over the JSON encoding of the inputs, hex encoded.
pub fn fingerprint(spec: &InjectionPolicySpec) -> Result<String> {
    let sidecar = &spec.sidecar;
    let input = FingerprintInput {
        name: sidecar.container_name(),
        image: &sidecar.image,
        pull_policy: sidecar.pull_policy(),
        config: &sidecar.config,
        volume_mounts: &sidecar.volume_mounts,
        resources: sidecar.resources.as_ref(),
        env: &sidecar.env,
        args: &sidecar.args,
        volumes: &spec.volumes,
        init_containers: &spec.init_containers,
    };

    let encoded = serde_json::to_vec(&input)?;
    let digest = Sha256::digest(&encoded);
    Ok(hex::encode(&digest[..FINGERPRINT_BYTES]))
}
