// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities for mocking Kubernetes API responses.

use crate::error::{InjectorError, Result};
use crate::kubernetes::{ClusterStore, PolicyEvent};
use crate::types::InjectionPolicy;
use http::{Request, Response};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::chrono::Utc;
use kube::client::Body;
use kube::error::ErrorResponse;
use kube::{Client, ResourceExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

/// A mock HTTP service that returns predefined responses based on request paths.
#[derive(Clone)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<(String, String), (u16, String)>>>,
    requests: Arc<Mutex<Vec<(String, String)>>>,
    stalled: Arc<Mutex<Vec<String>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            stalled: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert((method.to_string(), path.to_string()), (status, body.to_string()));
        self
    }

    /// Add a response for GET requests matching the exact path
    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    /// Add a response for PUT requests matching the exact path
    pub fn on_put(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PUT", path, status, body)
    }

    /// Add a response for PATCH requests matching the exact path
    pub fn on_patch(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PATCH", path, status, body)
    }

    /// Never answer requests matching the exact path
    pub fn stall(self, path: &str) -> Self {
        self.stalled.lock().unwrap().push(path.to_string());
        self
    }

    /// Method and path of every request received so far
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "default")
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        let responses = self.responses.lock().unwrap();

        // Try exact match first
        if let Some(resp) = responses.get(&(method.to_string(), path.to_string())) {
            return Some(resp.clone());
        }

        // Try prefix match for paths like /api/v1/namespaces/foo
        for ((m, p), resp) in responses.iter() {
            if m == method && path.starts_with(p) {
                return Some(resp.clone());
            }
        }

        None
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        self.requests
            .lock()
            .unwrap()
            .push((method.clone(), path.clone()));
        let response = self.find_response(&method, &path);
        let stalled = self.stalled.lock().unwrap().contains(&path);

        Box::pin(async move {
            if stalled {
                std::future::pending::<()>().await;
            }
            let (status, body) = response.unwrap_or_else(|| {
                // Default 404 for unmatched requests
                (404, not_found_json("object", &path))
            });
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.into_bytes()))
                .unwrap())
        })
    }
}

/// Create a 404 not found response
pub fn not_found_json(resource: &str, name: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": format!("{} \"{}\" not found", resource, name),
        "reason": "NotFound",
        "code": 404
    })
    .to_string()
}

#[derive(Default)]
struct FakeState {
    policies: BTreeMap<(String, String), InjectionPolicy>,
    deployments: BTreeMap<(String, String), Deployment>,
    config_maps: BTreeMap<(String, String), ConfigMap>,
    deployment_writes: Vec<String>,
    status_writes: usize,
    events: Vec<PolicyEvent>,
    /// Deployment names whose next write is rejected with a conflict
    conflicting: Vec<String>,
    /// Deployment names whose writes always fail
    failing: Vec<String>,
    next_version: u64,
}

impl FakeState {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

fn key<K: ResourceExt>(obj: &K) -> (String, String) {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

/// In-memory [`ClusterStore`] mimicking the API server's optimistic
/// concurrency and finalizer semantics.
#[derive(Clone, Default)]
pub struct FakeStore {
    state: Arc<Mutex<FakeState>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(self, mut policy: InjectionPolicy) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            policy.metadata.resource_version = Some(state.bump());
            state.policies.insert(key(&policy), policy);
        }
        self
    }

    pub fn with_deployment(self, mut deployment: Deployment) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            deployment.metadata.resource_version = Some(state.bump());
            state.deployments.insert(key(&deployment), deployment);
        }
        self
    }

    pub fn with_config_map(self, mut config_map: ConfigMap) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            config_map.metadata.resource_version = Some(state.bump());
            state.config_maps.insert(key(&config_map), config_map);
        }
        self
    }

    /// Reject the next write of the named deployment with a conflict
    pub fn conflict_once(&self, name: &str) {
        self.state.lock().unwrap().conflicting.push(name.to_string());
    }

    /// Reject every write of the named deployment
    pub fn fail_writes(&self, name: &str) {
        self.state.lock().unwrap().failing.push(name.to_string());
    }

    pub fn mark_deleted(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(policy) = state
            .policies
            .get_mut(&(namespace.to_string(), name.to_string()))
        {
            policy.metadata.deletion_timestamp = Some(Time(Utc::now()));
        }
    }

    pub fn remove_config_map(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .config_maps
            .remove(&(namespace.to_string(), name.to_string()));
    }

    pub fn policy(&self, namespace: &str, name: &str) -> Option<InjectionPolicy> {
        self.state
            .lock()
            .unwrap()
            .policies
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn update_policy(&self, namespace: &str, name: &str, update: impl FnOnce(&mut InjectionPolicy)) {
        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        if let Some(policy) = state
            .policies
            .get_mut(&(namespace.to_string(), name.to_string()))
        {
            update(policy);
            policy.metadata.resource_version = Some(version);
            policy.metadata.generation = Some(policy.metadata.generation.unwrap_or(1) + 1);
        }
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.state
            .lock()
            .unwrap()
            .deployments
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.state
            .lock()
            .unwrap()
            .config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Names of deployments written so far, in order
    pub fn deployment_writes(&self) -> Vec<String> {
        self.state.lock().unwrap().deployment_writes.clone()
    }

    pub fn status_writes(&self) -> usize {
        self.state.lock().unwrap().status_writes
    }

    pub fn event_reasons(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .events
            .iter()
            .map(|e| e.reason.clone())
            .collect()
    }
}

impl ClusterStore for FakeStore {
    async fn get_policy(&self, namespace: &str, name: &str) -> Result<Option<InjectionPolicy>> {
        Ok(self.policy(namespace, name))
    }

    async fn replace_policy(&self, policy: &InjectionPolicy) -> Result<InjectionPolicy> {
        let mut state = self.state.lock().unwrap();
        let k = key(policy);
        let current = state
            .policies
            .get(&k)
            .ok_or_else(|| InjectorError::MissingMetadata(format!("policy {} not found", k.1)))?;
        if current.metadata.resource_version != policy.metadata.resource_version {
            return Err(InjectorError::Conflict(format!("replace policy {}", k.1)));
        }
        // The status subresource is not written through the main resource
        let status = current.status.clone();

        if policy.is_being_deleted() && policy.finalizers().is_empty() {
            state.policies.remove(&k);
            return Ok(policy.clone());
        }

        let mut stored = policy.clone();
        stored.metadata.resource_version = Some(state.bump());
        stored.status = status;
        state.policies.insert(k, stored.clone());
        Ok(stored)
    }

    async fn patch_policy_status(&self, policy: &InjectionPolicy) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.status_writes += 1;
        let version = state.bump();
        if let Some(stored) = state.policies.get_mut(&key(policy)) {
            stored.status = policy.status.clone();
            stored.metadata.resource_version = Some(version);
        }
        Ok(())
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .deployments
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let mut state = self.state.lock().unwrap();
        let k = key(deployment);

        if state.failing.contains(&k.1) {
            return Err(InjectorError::KubeError(kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: format!("deployments \"{}\" is forbidden", k.1),
                reason: "Forbidden".to_string(),
                code: 403,
            })));
        }
        if let Some(pos) = state.conflicting.iter().position(|n| n == &k.1) {
            state.conflicting.remove(pos);
            return Err(InjectorError::Conflict(format!("replace deployment {}", k.1)));
        }

        let current = state
            .deployments
            .get(&k)
            .ok_or_else(|| InjectorError::MissingMetadata(format!("deployment {} not found", k.1)))?;
        if current.metadata.resource_version != deployment.metadata.resource_version {
            return Err(InjectorError::Conflict(format!("replace deployment {}", k.1)));
        }

        let mut stored = deployment.clone();
        stored.metadata.resource_version = Some(state.bump());
        state.deployment_writes.push(k.1.clone());
        state.deployments.insert(k, stored.clone());
        Ok(stored)
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        Ok(self.config_map(namespace, name))
    }

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        let mut state = self.state.lock().unwrap();
        let k = key(config_map);
        if let Some(current) = state.config_maps.get(&k) {
            if current.data == config_map.data {
                return Ok(current.clone());
            }
        }
        let mut stored = config_map.clone();
        stored.metadata.resource_version = Some(state.bump());
        state.config_maps.insert(k, stored.clone());
        Ok(stored)
    }

    async fn publish_event(&self, _policy: &InjectionPolicy, event: PolicyEvent) {
        self.state.lock().unwrap().events.push(event);
    }
}
