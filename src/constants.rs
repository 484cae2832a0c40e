// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Annotation keys forming the injection record on a workload
pub mod annotations {
    /// Set to "true" once the sidecar has been injected
    pub const INJECTED: &str = "injector.sidecar.dev/injected";
    /// Fingerprint of the policy that produced the injected sidecar
    pub const FINGERPRINT: &str = "injector.sidecar.dev/injected-fingerprint";
    /// Name of the InjectionPolicy owning the injected sidecar
    pub const POLICY: &str = "injector.sidecar.dev/policy";
    /// resourceVersion of the ConfigMap backing the sidecar configuration
    pub const CONFIG_VERSION: &str = "injector.sidecar.dev/config-version";
    /// Names of the container, extra volumes and init containers actually injected
    pub const FOOTPRINT: &str = "injector.sidecar.dev/injected-footprint";

    /// All record keys, removed together when a sidecar is reverted
    pub const RECORD: [&str; 5] = [INJECTED, FINGERPRINT, POLICY, CONFIG_VERSION, FOOTPRINT];
}

/// Finalizer guarding InjectionPolicy deletion until workloads are reverted
pub const FINALIZER: &str = "injector.sidecar.dev/finalizer";

/// The operator name used for server-side apply and event reporting
pub const OPERATOR_NAME: &str = "sidecar-injector";

/// Sidecar materialization defaults
pub mod sidecar {
    pub const DEFAULT_NAME: &str = "vector";
    pub const DEFAULT_PULL_POLICY: &str = "IfNotPresent";
    pub const DEFAULT_CONFIG_KEY: &str = "vector.yaml";

    /// Volume holding the sidecar configuration file
    pub const CONFIG_VOLUME: &str = "sidecar-config";
    pub const CONFIG_MOUNT_PATH: &str = "/etc/vector";
    pub const CONFIG_FILE: &str = "vector.yaml";
    pub const CONFIG_FLAG: &str = "--config";

    /// Suffix of the ConfigMap generated from an inline payload
    pub const INLINE_CONFIG_SUFFIX: &str = "-inline-config";
}

/// Status condition types and reasons
pub mod conditions {
    pub const READY: &str = "Ready";
    pub const CONFIG_VALID: &str = "ConfigValid";
    pub const ERROR: &str = "Error";

    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const UNKNOWN: &str = "Unknown";
}

/// Number of SHA-256 bytes kept in a fingerprint (hex encoded to twice as many chars)
pub const FINGERPRINT_BYTES: usize = 8;

/// CRD polling configuration
pub mod crd {
    pub const GROUP: &str = "injector.sidecar.dev";
    pub const VERSION: &str = "v1alpha1";
    pub const KIND: &str = "InjectionPolicy";
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}
