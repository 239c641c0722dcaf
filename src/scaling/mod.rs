//! # Autoscaling
//!
//! Scaling-policy validation and HPA/VPA resource construction.
//!
//! HPA and VPA may coexist; when they do, the operator-recommended VPA
//! `updateMode` is `Off` so the VPA only emits recommendations. That
//! guidance is documented, not enforced.

pub mod hpa;
pub mod vpa;

pub use hpa::{build_hpa, validate_scaling_policy};
pub use vpa::build_vpa;
