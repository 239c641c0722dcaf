//! # Errors
//!
//! Error taxonomy for the provisioning pipeline.
//!
//! Configuration and upstream-state errors are fatal and never retried.
//! Wait timeouts come from bounded polling against the cluster and are kept
//! distinct from "not found" so an operator can tell a slow operator apart
//! from a missing one. Patch errors from the proxy reload path do not roll
//! back an already-applied deployment unit.

use thiserror::Error;

/// Errors surfaced by the provisioning pipeline.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Malformed or inconsistent descriptor input. Fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Required data missing from a parent stack's exported outputs.
    /// The deployment cannot proceed without its dependency.
    #[error("upstream state error: {0}")]
    UpstreamState(String),

    /// Bounded polling for a cluster-side effect exceeded its budget.
    #[error("timed out after {waited_secs}s waiting for {what}")]
    WaitTimeout {
        /// Human-readable description of what was being awaited.
        what: String,
        /// Total seconds waited before giving up.
        waited_secs: u64,
    },

    /// The awaited object does not exist at all (distinct from a timeout
    /// while an operator creates it).
    #[error("{what} not found")]
    NotFound {
        /// Human-readable description of the missing object.
        what: String,
    },

    /// A proxy reload patch failed. The consumer deployment stays applied;
    /// the proxy keeps serving its previous routing table.
    #[error("proxy patch failed: {0}")]
    Patch(String),

    /// Kubernetes API error outside the categories above.
    #[error(transparent)]
    Kube(#[from] kube::Error),

    /// Serialization of a generated manifest failed.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl ProvisionError {
    /// Build a configuration error from anything displayable.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Configuration(msg.to_string())
    }

    /// Build an upstream-state error from anything displayable.
    pub fn upstream(msg: impl std::fmt::Display) -> Self {
        Self::UpstreamState(msg.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;
