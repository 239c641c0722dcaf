//! # Stack Deployer
//!
//! Provisions containerized application stacks onto Kubernetes from a
//! declarative stack descriptor, composing together:
//!
//! 1. **Workload provisioning** - namespace, volumes, secrets, Deployment,
//!    Service, Ingress, PodDisruptionBudget for one deployment unit
//! 2. **Shared-resource binding** - per-consumer credentials and env
//!    injection for Postgres/Redis/MongoDB/RabbitMQ instances operated in
//!    a parent environment
//! 3. **Reverse-proxy routing** - a Caddy proxy whose configuration is
//!    aggregated from Service annotations across the cluster
//! 4. **Autoscaling** - validated HPA policies and VPA attachment
//!
//! Environment variants are first-class: custom stacks (PR previews,
//! hotfix environments) branch off a parent environment and coexist with
//! it without any resource-name collision.
//!
//! ## Usage
//!
//! ```bash
//! # Provision a stack into the staging environment
//! stack-deployer provision --file stack.yaml --env staging
//!
//! # PR preview branched off staging
//! stack-deployer provision --file stack.yaml --env staging-pr-123 \
//!     --parent-env staging --parent-outputs staging-outputs.json
//!
//! # Validate a descriptor without touching a cluster
//! stack-deployer validate --file stack.yaml
//!
//! # Deploy / reload the shared reverse proxy
//! stack-deployer proxy deploy --namespace caddy-system
//! stack-deployer proxy reload --namespace caddy-system
//! ```

pub mod caddy;
pub mod cli;
pub mod compute;
pub mod config;
pub mod container;
pub mod context;
pub mod descriptor;
pub mod errors;
pub mod kube;
pub mod labels;
pub mod naming;
pub mod provision;
pub mod scaling;

pub use config::{ParentStackRef, ProvisionParams, StackOutputs};
pub use context::ComputeContext;
pub use descriptor::StackDescriptor;
pub use errors::ProvisionError;
pub use provision::Orchestrator;
