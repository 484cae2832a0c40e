// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! InjectionPolicy reconciler - converges matching Deployments to the
//! sidecar described by each policy and reports the outcome in its status.

use crate::conditions::{build_condition, set_condition};
use crate::config::Config;
use crate::constants::{conditions, FINALIZER};
use crate::error::{InjectorError, Result};
use crate::injection::{
    build_inline_config_map, fingerprint, inject, is_owned_by, owning_policy, remove,
    select_deployments, validate_config, workload_state, ConfigValidation, Footprint,
    InjectionRecord, MaterializedSidecar, WorkloadState,
};
use crate::kubernetes::{ClusterStore, KubeStore, PolicyEvent};
use crate::types::{InjectionPolicy, InjectionPolicyStatus};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::chrono::Utc;
use kube::{
    runtime::{controller::Action, reflector::ObjectRef, Controller},
    Api, Client, ResourceExt,
};
use kube_runtime::watcher::Config as WatcherConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Shared state handed to every reconciliation.
pub struct Context<S> {
    pub store: S,
    pub config: Config,
}

pub struct PolicyReconciler {
    client: Client,
    config: Config,
}

impl PolicyReconciler {
    pub fn new(client: Client, config: Config) -> Self {
        Self { client, config }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let (policies, deployments): (Api<InjectionPolicy>, Api<Deployment>) =
            match &self.config.watch_namespace {
                Some(ns) => (
                    Api::namespaced(self.client.clone(), ns),
                    Api::namespaced(self.client.clone(), ns),
                ),
                None => (Api::all(self.client.clone()), Api::all(self.client.clone())),
            };

        let context = Arc::new(Context {
            store: KubeStore::new(self.client, self.config.request_timeout),
            config: self.config,
        });

        Controller::new(policies, WatcherConfig::default())
            .watches(deployments, WatcherConfig::default(), |deployment| {
                let namespace = deployment.namespace()?;
                owning_policy(&deployment)
                    .map(|policy| ObjectRef::<InjectionPolicy>::new(policy).within(&namespace))
            })
            .shutdown_on_signal()
            .run(reconcile, error_policy, context)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled policy: {:?}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        Ok(())
    }
}

async fn reconcile(policy: Arc<InjectionPolicy>, ctx: Arc<Context<KubeStore>>) -> Result<Action> {
    let namespace = policy.namespace().unwrap_or_default();
    reconcile_policy(&ctx, &namespace, &policy.name_any()).await
}

fn error_policy(
    _policy: Arc<InjectionPolicy>,
    error: &InjectorError,
    _ctx: Arc<Context<KubeStore>>,
) -> Action {
    error!("Reconciliation error: {}", error);
    Action::requeue(Duration::from_secs(60))
}

/// Run one reconciliation of the named policy against the latest stored state.
///
/// Optimistic-concurrency conflicts are not failures: the policy is requeued
/// after the conflict backoff and the next pass starts from fresh state.
#[instrument(skip(ctx))]
pub async fn reconcile_policy<S: ClusterStore>(
    ctx: &Context<S>,
    namespace: &str,
    name: &str,
) -> Result<Action> {
    match reconcile_inner(ctx, namespace, name).await {
        Err(e) if e.is_conflict() => {
            info!("{}, retrying", e);
            Ok(Action::requeue(ctx.config.conflict_backoff))
        }
        other => other,
    }
}

async fn reconcile_inner<S: ClusterStore>(
    ctx: &Context<S>,
    namespace: &str,
    name: &str,
) -> Result<Action> {
    let Some(mut policy) = ctx.store.get_policy(namespace, name).await? else {
        debug!("Policy {}/{} no longer exists", namespace, name);
        return Ok(Action::await_change());
    };

    if policy.is_being_deleted() {
        return finalize(ctx, policy).await;
    }

    if !policy.has_finalizer() {
        policy
            .metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(FINALIZER.to_string());
        ctx.store.replace_policy(&policy).await?;
        debug!("Added finalizer to policy {}/{}", namespace, name);
        return Ok(Action::requeue(Duration::ZERO));
    }

    let generation = policy.metadata.generation;
    let mut status = policy.status.clone().unwrap_or_default();

    let config_version = match validate_config(&ctx.store, &policy).await? {
        ConfigValidation::Invalid { reason } => {
            warn!("Policy {}/{} has an invalid configuration: {}", namespace, name, reason);
            set_condition(
                &mut status.conditions,
                build_condition(
                    conditions::CONFIG_VALID,
                    conditions::FALSE,
                    "ValidationFailed",
                    reason.clone(),
                    generation,
                ),
            );
            ctx.store
                .publish_event(&policy, PolicyEvent::warning("ValidationFailed", "Validate", reason))
                .await;
            persist_status(ctx, &policy, status).await?;
            return Ok(Action::requeue(ctx.config.validation_backoff));
        }
        ConfigValidation::Valid { config_version } => config_version,
    };
    set_condition(
        &mut status.conditions,
        build_condition(
            conditions::CONFIG_VALID,
            conditions::TRUE,
            "ValidationSucceeded",
            "Configuration is valid",
            generation,
        ),
    );

    let deployments = ctx.store.list_deployments(namespace).await?;

    if policy.spec.enabled {
        converge(ctx, &policy, status, &deployments, config_version).await
    } else {
        disable(ctx, &policy, status, &deployments).await
    }
}

/// Tally of a batch of per-workload operations.
#[derive(Debug, Default)]
struct Batch {
    unchanged: usize,
    written: usize,
    conflicts: usize,
    failures: Vec<String>,
}

impl Batch {
    fn record(&mut self, deployment: &Deployment, outcome: Result<Outcome>) {
        match outcome {
            Ok(Outcome::Unchanged) => self.unchanged += 1,
            Ok(Outcome::Written) => self.written += 1,
            Ok(Outcome::Conflict) => self.conflicts += 1,
            Err(e) => self.failures.push(format!("{}: {}", deployment.name_any(), e)),
        }
    }

    fn requeue(&self, config: &Config) -> Action {
        if self.conflicts > 0 {
            Action::requeue(config.conflict_backoff)
        } else {
            Action::requeue(config.resync_interval)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Outcome {
    Unchanged,
    Written,
    Conflict,
}

async fn write_deployment<S: ClusterStore>(ctx: &Context<S>, deployment: &Deployment) -> Result<Outcome> {
    match ctx.store.replace_deployment(deployment).await {
        Ok(_) => Ok(Outcome::Written),
        Err(e) if e.is_conflict() => {
            debug!("{}, will retry", e);
            Ok(Outcome::Conflict)
        }
        Err(e) => Err(e),
    }
}

#[instrument(skip_all, fields(deployment = %deployment.name_any()))]
async fn inject_into<S: ClusterStore>(
    ctx: &Context<S>,
    deployment: &Deployment,
    materialized: &MaterializedSidecar,
    record: &InjectionRecord,
) -> Result<Outcome> {
    match workload_state(deployment, &record.policy, &record.fingerprint) {
        WorkloadState::Injected => return Ok(Outcome::Unchanged),
        WorkloadState::OwnedByOther(owner) => {
            return Err(InjectorError::OwnershipConflict {
                deployment: deployment.name_any(),
                owner,
            })
        }
        WorkloadState::Untouched | WorkloadState::Stale => {}
    }
    write_deployment(ctx, &inject(deployment, materialized, record)?).await
}

fn count(n: usize) -> Option<i32> {
    Some(i32::try_from(n).unwrap_or(i32::MAX))
}

async fn converge<S: ClusterStore>(
    ctx: &Context<S>,
    policy: &InjectionPolicy,
    mut status: InjectionPolicyStatus,
    deployments: &[Deployment],
    config_version: Option<String>,
) -> Result<Action> {
    let name = policy.name_any();
    let generation = policy.metadata.generation;

    let matched = match select_deployments(&policy.spec.selector, deployments) {
        Ok(matched) => matched,
        Err(e) => {
            warn!("Policy {} has an invalid selector: {}", name, e);
            let message = e.to_string();
            set_condition(
                &mut status.conditions,
                build_condition(conditions::READY, conditions::FALSE, "InvalidSelector", &message, generation),
            );
            set_condition(
                &mut status.conditions,
                build_condition(conditions::ERROR, conditions::TRUE, "InvalidSelector", &message, generation),
            );
            ctx.store
                .publish_event(policy, PolicyEvent::warning("InvalidSelector", "Select", message))
                .await;
            persist_status(ctx, policy, status).await?;
            return Ok(Action::requeue(ctx.config.validation_backoff));
        }
    };

    // The generated ConfigMap's version doubles as the config version of the record
    let config_version = match build_inline_config_map(policy) {
        Some(config_map) => ctx.store.apply_config_map(&config_map).await?.resource_version(),
        None => config_version,
    };

    let materialized = MaterializedSidecar::from_policy(policy)?;
    let record = InjectionRecord {
        fingerprint: fingerprint(&policy.spec)?,
        policy: name.clone(),
        config_version,
    };

    let mut batch = Batch::default();
    for deployment in &matched {
        let outcome = inject_into(ctx, deployment, &materialized, &record).await;
        match &outcome {
            Ok(Outcome::Written) => {
                info!("Injected sidecar into deployment {}", deployment.name_any());
                ctx.store
                    .publish_event(
                        policy,
                        PolicyEvent::normal(
                            "InjectionSucceeded",
                            "Inject",
                            format!("Injected sidecar into deployment {}", deployment.name_any()),
                        ),
                    )
                    .await;
            }
            Err(e) => {
                warn!("Failed to inject deployment {}: {}", deployment.name_any(), e);
                ctx.store
                    .publish_event(policy, PolicyEvent::warning("InjectionFailed", "Inject", e.to_string()))
                    .await;
            }
            _ => {}
        }
        batch.record(deployment, outcome);
    }
    let injected = batch.unchanged + batch.written;

    // Workloads this policy injected earlier but no longer selects
    let mut cleanup = Batch::default();
    let orphans = deployments.iter().filter(|d| {
        is_owned_by(d, &name) && !matched.iter().any(|m| m.name_any() == d.name_any())
    });
    for deployment in orphans {
        info!("Deployment {} no longer matches, removing sidecar", deployment.name_any());
        let footprint = Footprint::recorded_or(deployment, &policy.spec);
        let outcome = write_deployment(ctx, &remove(deployment, &footprint)).await;
        cleanup.record(deployment, outcome);
    }
    batch.conflicts += cleanup.conflicts;

    let (ready, reason, message) = if !batch.failures.is_empty() {
        (
            conditions::FALSE,
            "InjectionPartiallyFailed",
            format!(
                "Injected {}/{} deployments. Errors: {}",
                injected,
                matched.len(),
                batch.failures.join("; ")
            ),
        )
    } else if batch.conflicts > 0 {
        (
            conditions::UNKNOWN,
            "InjectionPending",
            format!("Retrying {} deployments after conflicting writes", batch.conflicts),
        )
    } else if matched.is_empty() {
        (
            conditions::TRUE,
            "NoMatchingDeployments",
            "No deployments match the selector".to_string(),
        )
    } else {
        (
            conditions::TRUE,
            "InjectionSucceeded",
            format!("Sidecar injected into {} deployments", injected),
        )
    };
    set_condition(
        &mut status.conditions,
        build_condition(conditions::READY, ready, reason, &message, generation),
    );

    let errors: Vec<String> = batch.failures.iter().chain(&cleanup.failures).cloned().collect();
    let error_condition = if errors.is_empty() {
        build_condition(conditions::ERROR, conditions::FALSE, "NoErrors", "No errors", generation)
    } else {
        build_condition(
            conditions::ERROR,
            conditions::TRUE,
            "ReconcileFailed",
            errors.join("; "),
            generation,
        )
    };
    set_condition(&mut status.conditions, error_condition);

    status.matched_count = count(matched.len());
    status.injected_count = count(injected);
    persist_status(ctx, policy, status).await?;

    Ok(batch.requeue(&ctx.config))
}

async fn disable<S: ClusterStore>(
    ctx: &Context<S>,
    policy: &InjectionPolicy,
    mut status: InjectionPolicyStatus,
    deployments: &[Deployment],
) -> Result<Action> {
    let name = policy.name_any();
    let generation = policy.metadata.generation;
    let owned: Vec<&Deployment> = deployments.iter().filter(|d| is_owned_by(d, &name)).collect();
    let mut batch = Batch::default();
    for deployment in &owned {
        let footprint = Footprint::recorded_or(deployment, &policy.spec);
        let outcome = write_deployment(ctx, &remove(deployment, &footprint)).await;
        if outcome.as_ref().is_ok_and(|o| *o == Outcome::Written) {
            info!("Removed sidecar from deployment {}", deployment.name_any());
            ctx.store
                .publish_event(
                    policy,
                    PolicyEvent::normal(
                        "SidecarRemoved",
                        "Remove",
                        format!("Removed sidecar from deployment {}", deployment.name_any()),
                    ),
                )
                .await;
        }
        batch.record(deployment, outcome);
    }

    set_condition(
        &mut status.conditions,
        build_condition(
            conditions::READY,
            conditions::TRUE,
            "SidecarDisabled",
            format!("Sidecar disabled, removed from {} deployments", batch.written),
            generation,
        ),
    );
    let error_condition = if batch.failures.is_empty() {
        build_condition(conditions::ERROR, conditions::FALSE, "NoErrors", "No errors", generation)
    } else {
        warn!("Failed to remove sidecar from {} deployments", batch.failures.len());
        build_condition(
            conditions::ERROR,
            conditions::TRUE,
            "RemovalFailed",
            batch.failures.join("; "),
            generation,
        )
    };
    set_condition(&mut status.conditions, error_condition);

    status.matched_count = Some(0);
    status.injected_count = count(owned.len() - batch.written);
    persist_status(ctx, policy, status).await?;

    Ok(batch.requeue(&ctx.config))
}

/// Revert every workload owned by a policy being deleted, then release the
/// finalizer. Any failure leaves the finalizer in place for the next attempt.
async fn finalize<S: ClusterStore>(ctx: &Context<S>, mut policy: InjectionPolicy) -> Result<Action> {
    if !policy.has_finalizer() {
        return Ok(Action::await_change());
    }

    let name = policy.name_any();
    let namespace = policy.namespace().unwrap_or_default();
    info!("Cleaning up deployments of deleted policy {}/{}", namespace, name);

    for deployment in ctx.store.list_deployments(&namespace).await? {
        if is_owned_by(&deployment, &name) {
            let footprint = Footprint::recorded_or(&deployment, &policy.spec);
            ctx.store
                .replace_deployment(&remove(&deployment, &footprint))
                .await?;
            debug!("Removed sidecar from deployment {}", deployment.name_any());
        }
    }

    policy.metadata.finalizers = Some(
        policy
            .finalizers()
            .iter()
            .filter(|f| *f != FINALIZER)
            .cloned()
            .collect(),
    );
    ctx.store.replace_policy(&policy).await?;
    info!("Released policy {}/{}", namespace, name);

    Ok(Action::await_change())
}

/// Write `status` unless it only differs from the stored one by its timestamp.
async fn persist_status<S: ClusterStore>(
    ctx: &Context<S>,
    policy: &InjectionPolicy,
    mut status: InjectionPolicyStatus,
) -> Result<()> {
    status.observed_generation = policy.metadata.generation;

    let unstamped = |s: &InjectionPolicyStatus| InjectionPolicyStatus {
        last_update_time: None,
        ..s.clone()
    };
    if policy.status.as_ref().map(unstamped) == Some(unstamped(&status)) {
        debug!("Status of policy {} is up to date", policy.name_any());
        return Ok(());
    }

    status.last_update_time = Some(Time(Utc::now()));
    let mut updated = policy.clone();
    updated.status = Some(status);
    ctx.store.patch_policy_status(&updated).await
}
