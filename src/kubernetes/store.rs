// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Access to policies, workloads, configuration and events in the cluster.

use crate::constants::OPERATOR_NAME;
use crate::error::{InjectorError, Result};
use crate::types::InjectionPolicy;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    api::{ListParams, Patch, PatchParams, PostParams},
    runtime::events::{Event, EventType, Recorder, Reporter},
    Api, Client, Resource, ResourceExt,
};
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// A notification about a policy, published fire-and-forget.
#[derive(Debug, Clone)]
pub struct PolicyEvent {
    pub type_: EventType,
    pub reason: String,
    pub action: String,
    pub note: String,
}

impl PolicyEvent {
    pub fn normal(reason: &str, action: &str, note: impl Into<String>) -> Self {
        Self {
            type_: EventType::Normal,
            reason: reason.to_string(),
            action: action.to_string(),
            note: note.into(),
        }
    }

    pub fn warning(reason: &str, action: &str, note: impl Into<String>) -> Self {
        Self {
            type_: EventType::Warning,
            reason: reason.to_string(),
            action: action.to_string(),
            note: note.into(),
        }
    }
}

/// The external declarative-state store the reconciler works against.
///
/// Not-found reads resolve to `None`; optimistic-concurrency failures on
/// writes surface as [`InjectorError::Conflict`].
pub trait ClusterStore: Send + Sync {
    fn get_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<InjectionPolicy>>> + Send;

    /// Replace the policy object; used for finalizer changes only.
    fn replace_policy(
        &self,
        policy: &InjectionPolicy,
    ) -> impl Future<Output = Result<InjectionPolicy>> + Send;

    fn patch_policy_status(&self, policy: &InjectionPolicy) -> impl Future<Output = Result<()>> + Send;

    fn list_deployments(&self, namespace: &str) -> impl Future<Output = Result<Vec<Deployment>>> + Send;

    fn replace_deployment(
        &self,
        deployment: &Deployment,
    ) -> impl Future<Output = Result<Deployment>> + Send;

    fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<ConfigMap>>> + Send;

    /// Create or update a ConfigMap owned by the operator.
    fn apply_config_map(&self, config_map: &ConfigMap) -> impl Future<Output = Result<ConfigMap>> + Send;

    /// Failures are logged, never returned.
    fn publish_event(&self, policy: &InjectionPolicy, event: PolicyEvent) -> impl Future<Output = ()> + Send;
}

/// [`ClusterStore`] backed by the Kubernetes API. Every call is bounded by
/// `timeout`.
pub struct KubeStore {
    client: Client,
    recorder: Recorder,
    timeout: Duration,
}

impl KubeStore {
    pub fn new(client: Client, timeout: Duration) -> Self {
        let reporter = Reporter {
            controller: OPERATOR_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        let recorder = Recorder::new(client.clone(), reporter);
        Self {
            client,
            recorder,
            timeout,
        }
    }

    async fn call<T, F>(&self, operation: String, request: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(kube::Error::Api(err))) if err.code == 409 => {
                debug!("Conflict on {}: {}", operation, err.message);
                Err(InjectorError::Conflict(operation))
            }
            Ok(Err(e)) => Err(InjectorError::KubeError(e)),
            Err(_) => Err(InjectorError::Timeout {
                operation,
                timeout: self.timeout,
            }),
        }
    }
}

fn namespace_of<K: Resource>(obj: &K) -> Result<String> {
    obj.meta().namespace.clone().ok_or_else(|| {
        InjectorError::MissingMetadata(format!(
            "{} has no namespace",
            obj.meta().name.as_deref().unwrap_or_default()
        ))
    })
}

impl ClusterStore for KubeStore {
    #[instrument(skip(self))]
    async fn get_policy(&self, namespace: &str, name: &str) -> Result<Option<InjectionPolicy>> {
        let api: Api<InjectionPolicy> = Api::namespaced(self.client.clone(), namespace);
        self.call(format!("get policy {}/{}", namespace, name), api.get_opt(name))
            .await
    }

    #[instrument(skip(self, policy), fields(policy = %policy.name_any()))]
    async fn replace_policy(&self, policy: &InjectionPolicy) -> Result<InjectionPolicy> {
        let namespace = namespace_of(policy)?;
        let name = policy.name_any();
        let api: Api<InjectionPolicy> = Api::namespaced(self.client.clone(), &namespace);
        self.call(
            format!("replace policy {}/{}", namespace, name),
            api.replace(&name, &PostParams::default(), policy),
        )
        .await
    }

    #[instrument(skip(self, policy), fields(policy = %policy.name_any()))]
    async fn patch_policy_status(&self, policy: &InjectionPolicy) -> Result<()> {
        let namespace = namespace_of(policy)?;
        let name = policy.name_any();
        let api: Api<InjectionPolicy> = Api::namespaced(self.client.clone(), &namespace);
        let patch = json!({ "status": policy.status });
        self.call(
            format!("patch status of policy {}/{}", namespace, name),
            api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch)),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let list = self
            .call(
                format!("list deployments in {}", namespace),
                api.list(&ListParams::default()),
            )
            .await?;
        Ok(list.items)
    }

    #[instrument(skip(self, deployment), fields(deployment = %deployment.name_any()))]
    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let namespace = namespace_of(deployment)?;
        let name = deployment.name_any();
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
        self.call(
            format!("replace deployment {}/{}", namespace, name),
            api.replace(&name, &PostParams::default(), deployment),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        self.call(format!("get configmap {}/{}", namespace, name), api.get_opt(name))
            .await
    }

    #[instrument(skip(self, config_map), fields(config_map = %config_map.name_any()))]
    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        let namespace = namespace_of(config_map)?;
        let name = config_map.name_any();
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &namespace);
        let pp = PatchParams::apply(OPERATOR_NAME).force();
        self.call(
            format!("apply configmap {}/{}", namespace, name),
            api.patch(&name, &pp, &Patch::Apply(config_map)),
        )
        .await
    }

    async fn publish_event(&self, policy: &InjectionPolicy, event: PolicyEvent) {
        let reference = policy.object_ref(&());
        let event = Event {
            type_: event.type_,
            reason: event.reason,
            note: Some(event.note),
            action: event.action,
            secondary: None,
        };
        match tokio::time::timeout(self.timeout, self.recorder.publish(&event, &reference)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to publish event {}: {}", event.reason, e),
            Err(_) => warn!("Timed out publishing event {}", event.reason),
        }
    }
}
