// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::{Client, CustomResourceExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sidecar_injector::config::Config;
use sidecar_injector::health::{self, Readiness};
use sidecar_injector::kubernetes::wait_for_policy_crd;
use sidecar_injector::reconcilers::PolicyReconciler;
use sidecar_injector::types::InjectionPolicy;

#[tokio::main]
async fn main() -> Result<()> {
    // `sidecar-injector crd` prints the CustomResourceDefinition for installation
    if std::env::args().nth(1).as_deref() == Some("crd") {
        print!("{}", serde_yaml::to_string(&InjectionPolicy::crd())?);
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting sidecar injector");

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: watch_namespace={}, resync_interval={:?}",
        config.watch_namespace.as_deref().unwrap_or("<all>"),
        config.resync_interval
    );

    let readiness = Readiness::default();
    let probes = {
        let readiness = readiness.clone();
        let addr = config.health_probe_addr;
        async move {
            match addr {
                Some(addr) => health::serve(addr, readiness).await,
                None => std::future::pending().await,
            }
        }
    };

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let reconciler = PolicyReconciler::new(client.clone(), config);
    let controller = async move {
        info!("Waiting for InjectionPolicy CRD to become available...");
        wait_for_policy_crd(&client).await?;
        readiness.mark_ready();
        info!("Starting policy reconciler...");
        reconciler.run().await
    };

    tokio::select! {
        res = controller => res?,
        res = probes => res?,
    }

    warn!("Policy reconciler stopped");
    Ok(())
}
