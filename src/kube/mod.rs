//! # Kubernetes Access
//!
//! Thin layer over the kube client: server-side apply with one field
//! manager, and bounded polling for cluster-side effects.

pub mod apply;
pub mod wait;

pub use apply::{Applier, FIELD_MANAGER};
pub use wait::wait_for_secret;
