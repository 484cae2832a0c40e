// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Splicing the materialized sidecar into a Deployment and reverting it.
//!
//! Both directions work on a copy of the workload: the caller decides whether
//! the returned object is written back.

use crate::constants::{annotations, sidecar};
use crate::error::Result;
use crate::injection::materialize::MaterializedSidecar;
use crate::types::InjectionPolicySpec;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, PodSpec, Volume};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// List entries identified by name inside a pod spec.
pub trait Named {
    fn name(&self) -> &str;
}

impl Named for Container {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for Volume {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Drop every entry named `name`, then append `replacement` if given.
pub fn replace_by_name<T: Named>(items: &mut Vec<T>, name: &str, replacement: Option<T>) {
    items.retain(|item| item.name() != name);
    items.extend(replacement);
}

/// Append entries whose name is not present yet; existing entries win.
pub fn merge_missing<T: Named + Clone>(items: &mut Vec<T>, additions: &[T]) {
    for addition in additions {
        if !items.iter().any(|item| item.name() == addition.name()) {
            items.push(addition.clone());
        }
    }
}

/// Where a workload stands relative to one policy.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkloadState {
    /// No injection record
    Untouched,
    /// Injected by this policy with the current fingerprint
    Injected,
    /// Injected by this policy with an outdated fingerprint
    Stale,
    /// Injected by another policy
    OwnedByOther(String),
}

/// Names of the pod template entries a policy spliced in. Recorded on the
/// workload at injection so a revert removes what was actually injected, even
/// after the policy spec has moved on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Footprint {
    pub container: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<String>,
}

impl Footprint {
    /// Footprint the policy spec would inject right now
    pub fn of(spec: &InjectionPolicySpec) -> Self {
        Footprint {
            container: spec.sidecar.container_name().to_string(),
            volumes: spec.volumes.iter().map(|v| v.name.clone()).collect(),
            init_containers: spec.init_containers.iter().map(|c| c.name.clone()).collect(),
        }
    }

    /// Footprint recorded on the workload by the last injection. An unreadable
    /// record counts as absent.
    pub fn recorded(deployment: &Deployment) -> Option<Self> {
        annotation(deployment, annotations::FOOTPRINT).and_then(|raw| serde_json::from_str(raw).ok())
    }

    /// The recorded footprint, falling back to the one derived from `spec` for
    /// workloads injected before footprints were recorded.
    pub fn recorded_or(deployment: &Deployment, spec: &InjectionPolicySpec) -> Self {
        Self::recorded(deployment).unwrap_or_else(|| Self::of(spec))
    }
}

impl MaterializedSidecar {
    pub fn footprint(&self) -> Footprint {
        Footprint {
            container: self.container.name.clone(),
            volumes: self.extra_volumes.iter().map(|v| v.name.clone()).collect(),
            init_containers: self.init_containers.iter().map(|c| c.name.clone()).collect(),
        }
    }
}

/// The injection record persisted on the workload.
#[derive(Debug, Clone, PartialEq)]
pub struct InjectionRecord {
    pub fingerprint: String,
    pub policy: String,
    pub config_version: Option<String>,
}

fn annotation<'a>(deployment: &'a Deployment, key: &str) -> Option<&'a str> {
    deployment
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

/// Name of the policy recorded as owner of the injected sidecar
pub fn owning_policy(deployment: &Deployment) -> Option<&str> {
    annotation(deployment, annotations::POLICY)
}

pub fn is_owned_by(deployment: &Deployment, policy: &str) -> bool {
    owning_policy(deployment) == Some(policy)
}

pub fn workload_state(deployment: &Deployment, policy: &str, fingerprint: &str) -> WorkloadState {
    let injected = annotation(deployment, annotations::INJECTED) == Some("true");
    match owning_policy(deployment) {
        Some(owner) if owner != policy && injected => WorkloadState::OwnedByOther(owner.to_string()),
        Some(owner) if owner == policy => {
            if injected && annotation(deployment, annotations::FINGERPRINT) == Some(fingerprint) {
                WorkloadState::Injected
            } else {
                WorkloadState::Stale
            }
        }
        _ => WorkloadState::Untouched,
    }
}

fn pod_spec_mut(deployment: &mut Deployment) -> &mut PodSpec {
    deployment
        .spec
        .get_or_insert_with(Default::default)
        .template
        .spec
        .get_or_insert_with(Default::default)
}

fn template_annotations_mut(deployment: &mut Deployment) -> &mut BTreeMap<String, String> {
    deployment
        .spec
        .get_or_insert_with(Default::default)
        .template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations
        .get_or_insert_with(Default::default)
}

/// Return a copy of `deployment` carrying the sidecar and the injection record.
/// A previous injection by the same policy is reverted first, using its
/// recorded footprint. The sidecar container, the configuration volume and
/// declared init containers replace entries of the same name; extra volumes
/// only fill names that are still free.
pub fn inject(
    deployment: &Deployment,
    materialized: &MaterializedSidecar,
    record: &InjectionRecord,
) -> Result<Deployment> {
    let footprint = serde_json::to_string(&materialized.footprint())?;

    let mut updated = match Footprint::recorded(deployment) {
        Some(previous) if is_owned_by(deployment, &record.policy) => remove(deployment, &previous),
        _ => deployment.clone(),
    };

    let pod_spec = pod_spec_mut(&mut updated);
    replace_by_name(
        &mut pod_spec.containers,
        &materialized.container.name,
        Some(materialized.container.clone()),
    );

    let volumes = pod_spec.volumes.get_or_insert_with(Vec::new);
    replace_by_name(
        volumes,
        sidecar::CONFIG_VOLUME,
        Some(materialized.config_volume.clone()),
    );
    merge_missing(volumes, &materialized.extra_volumes);

    if !materialized.init_containers.is_empty() {
        let init_containers = pod_spec.init_containers.get_or_insert_with(Vec::new);
        for init in &materialized.init_containers {
            replace_by_name(init_containers, &init.name, Some(init.clone()));
        }
    }

    template_annotations_mut(&mut updated)
        .insert(annotations::FINGERPRINT.to_string(), record.fingerprint.clone());

    let meta_annotations = updated.metadata.annotations.get_or_insert_with(Default::default);
    meta_annotations.insert(annotations::INJECTED.to_string(), "true".to_string());
    meta_annotations.insert(annotations::FINGERPRINT.to_string(), record.fingerprint.clone());
    meta_annotations.insert(annotations::POLICY.to_string(), record.policy.clone());
    meta_annotations.insert(annotations::FOOTPRINT.to_string(), footprint);
    match &record.config_version {
        Some(version) => {
            meta_annotations.insert(annotations::CONFIG_VERSION.to_string(), version.clone());
        }
        None => {
            meta_annotations.remove(annotations::CONFIG_VERSION);
        }
    }

    Ok(updated)
}

/// Return a copy of `deployment` with the sidecar and the injection record
/// removed. Extra volumes are dropped only when nothing left in the pod still
/// mounts them.
pub fn remove(deployment: &Deployment, footprint: &Footprint) -> Deployment {
    let mut updated = deployment.clone();

    let pod_spec = pod_spec_mut(&mut updated);
    replace_by_name(&mut pod_spec.containers, &footprint.container, None);

    if let Some(init_containers) = pod_spec.init_containers.as_mut() {
        for init in &footprint.init_containers {
            replace_by_name(init_containers, init, None);
        }
        if init_containers.is_empty() {
            pod_spec.init_containers = None;
        }
    }

    let mounted: HashSet<String> = pod_spec
        .containers
        .iter()
        .chain(pod_spec.init_containers.iter().flatten())
        .flat_map(|c| c.volume_mounts.iter().flatten())
        .map(|m| m.name.clone())
        .collect();

    if let Some(volumes) = pod_spec.volumes.as_mut() {
        replace_by_name(volumes, sidecar::CONFIG_VOLUME, None);
        for extra in &footprint.volumes {
            if !mounted.contains(extra) {
                replace_by_name(volumes, extra, None);
            }
        }
        if volumes.is_empty() {
            pod_spec.volumes = None;
        }
    }

    if let Some(template_annotations) = updated
        .spec
        .as_mut()
        .and_then(|s| s.template.metadata.as_mut())
        .and_then(|m| m.annotations.as_mut())
    {
        template_annotations.remove(annotations::FINGERPRINT);
    }

    if let Some(meta_annotations) = updated.metadata.annotations.as_mut() {
        for key in annotations::RECORD {
            meta_annotations.remove(key);
        }
    }

    updated
}
