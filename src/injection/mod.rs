// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Sidecar injection: fingerprinting, selection, validation, materialization
//! and the inject/remove engine.

pub mod engine;
pub mod fingerprint;
pub mod materialize;
pub mod selector;
pub mod validate;

pub use engine::{
    inject, is_owned_by, owning_policy, remove, workload_state, Footprint, InjectionRecord,
    WorkloadState,
};
pub use fingerprint::fingerprint;
pub use materialize::{build_inline_config_map, MaterializedSidecar};
pub use selector::{select_deployments, LabelMatcher};
pub use validate::{validate_config, ConfigValidation};
