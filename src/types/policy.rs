// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::{conditions, sidecar, FINALIZER};
use k8s_openapi::api::core::v1::{Container, EnvVar, ResourceRequirements, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, LabelSelector, Time};
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[kube(
    group = "injector.sidecar.dev",
    version = "v1alpha1",
    kind = "InjectionPolicy",
    shortname = "ipol"
)]
#[kube(namespaced)]
#[kube(status = "InjectionPolicyStatus")]
#[kube(printcolumn = r#"{"name":"Enabled","type":"boolean","jsonPath":".spec.enabled"}"#)]
#[kube(printcolumn = r#"{"name":"Matched","type":"integer","jsonPath":".status.matchedCount"}"#)]
#[kube(printcolumn = r#"{"name":"Injected","type":"integer","jsonPath":".status.injectedCount"}"#)]
#[kube(
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#
)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct InjectionPolicySpec {
    /// Master switch; a disabled policy reverts every workload it owns
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub selector: LabelSelector,
    pub sidecar: SidecarSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SidecarSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    pub config: ConfigSource,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl SidecarSpec {
    pub fn container_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(sidecar::DEFAULT_NAME)
    }

    pub fn pull_policy(&self) -> &str {
        self.image_pull_policy
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(sidecar::DEFAULT_PULL_POLICY)
    }
}

/// Where the sidecar configuration comes from. When both are set the
/// ConfigMap reference takes precedence.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<ConfigMapRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline: Option<String>,
}

impl ConfigSource {
    /// The source actually used, external reference first
    pub fn effective(&self) -> Option<EffectiveSource<'_>> {
        if let Some(r) = &self.config_map_ref {
            return Some(EffectiveSource::ConfigMap(r));
        }
        self.inline
            .as_deref()
            .filter(|payload| !payload.is_empty())
            .map(EffectiveSource::Inline)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EffectiveSource<'a> {
    ConfigMap(&'a ConfigMapRef),
    Inline(&'a str),
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapRef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl ConfigMapRef {
    pub fn key(&self) -> &str {
        self.key
            .as_deref()
            .filter(|k| !k.is_empty())
            .unwrap_or(sidecar::DEFAULT_CONFIG_KEY)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InjectionPolicyStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub injected_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<Time>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl InjectionPolicyStatus {
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == condition_type)
    }
}

impl InjectionPolicy {
    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == FINALIZER)
    }

    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Name of the ConfigMap generated for an inline payload
    pub fn inline_config_map_name(&self) -> String {
        format!("{}{}", self.name_any(), sidecar::INLINE_CONFIG_SUFFIX)
    }

    /// Check if the policy reports Ready=True
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.condition(conditions::READY))
            .is_some_and(|c| c.status == conditions::TRUE)
    }
}
