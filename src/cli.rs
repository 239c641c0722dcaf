//! # CLI
//!
//! Command-line interface for provisioning stacks and operating the
//! shared reverse proxy.
//!
//! ```bash
//! stack-deployer provision --file stack.yaml --env staging
//! stack-deployer validate --file stack.yaml
//! stack-deployer proxy deploy --namespace caddy-system
//! stack-deployer proxy reload --namespace caddy-system
//! ```

use crate::caddy::{self, patch::patch_deployment, routing_state_hash, ProxyOptions};
use crate::compute::ProcessorRegistry;
use crate::config::{ParentStackRef, ProvisionParams, StackOutputs};
use crate::descriptor::StackDescriptor;
use crate::kube::Applier;
use crate::provision::{Orchestrator, ProxyTarget};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kube::Client;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Stack Deployer CLI
#[derive(Parser)]
#[command(name = "stack-deployer")]
#[command(
    about = "Provision containerized application stacks onto Kubernetes",
    long_about = None,
    after_help = "\
Examples:
  stack-deployer provision --file stack.yaml --env staging
  stack-deployer provision --file stack.yaml --env staging-pr-123 --parent-env staging \\
      --parent-outputs staging-outputs.json --parent-name infra-staging
  stack-deployer validate --file stack.yaml
  stack-deployer proxy deploy --namespace caddy-system
"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a stack from a descriptor
    Provision {
        /// Path to the stack descriptor YAML
        #[arg(short, long)]
        file: PathBuf,

        /// Target environment (becomes the Kubernetes namespace)
        #[arg(short, long)]
        env: String,

        /// Parent environment for custom stacks (PR previews, hotfixes)
        #[arg(long)]
        parent_env: Option<String>,

        /// Parent stack name, required when reading parent outputs
        #[arg(long)]
        parent_name: Option<String>,

        /// Path to the parent stack's exported outputs (JSON or YAML)
        #[arg(long)]
        parent_outputs: Option<PathBuf>,

        /// Where to write this stack's exported outputs
        #[arg(long)]
        export: Option<PathBuf>,

        /// Declared resources to skip binding (repeatable)
        #[arg(long = "skip-resource")]
        skip_resources: Vec<String>,

        /// Namespace of the proxy Deployment to reload after provisioning
        #[arg(long, default_value = "caddy-system")]
        proxy_namespace: String,

        /// Name of the proxy Deployment to reload
        #[arg(long, default_value = "caddy-proxy")]
        proxy_name: String,

        /// Skip the proxy reload even when routing changed
        #[arg(long)]
        no_proxy_reload: bool,
    },

    /// Validate a descriptor without touching a cluster
    Validate {
        /// Path to the stack descriptor YAML
        #[arg(short, long)]
        file: PathBuf,

        /// Environment to validate naming against
        #[arg(short, long, default_value = "staging")]
        env: String,

        /// Parent environment for custom stacks
        #[arg(long)]
        parent_env: Option<String>,
    },

    /// Operate the shared reverse proxy
    Proxy {
        #[command(subcommand)]
        command: ProxyCommands,
    },
}

#[derive(Subcommand)]
enum ProxyCommands {
    /// Deploy the Caddy proxy bundle (RBAC, scan script, Deployment, Service)
    Deploy {
        /// Proxy namespace
        #[arg(short, long, default_value = "caddy-system")]
        namespace: String,

        /// Proxy name
        #[arg(long, default_value = "caddy-proxy")]
        name: String,

        /// Service type for the proxy entry point
        #[arg(long, default_value = "LoadBalancer")]
        service_type: String,

        /// Skip the catch-all site (static files, gzip, HSTS)
        #[arg(long)]
        no_default_site: bool,
    },

    /// Force a proxy reload by rolling its pods with a fresh config hash
    Reload {
        /// Proxy namespace
        #[arg(short, long, default_value = "caddy-system")]
        namespace: String,

        /// Proxy name
        #[arg(long, default_value = "caddy-proxy")]
        name: String,
    },
}

/// Parse arguments and run the selected command.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Provision {
            file,
            env,
            parent_env,
            parent_name,
            parent_outputs,
            export,
            skip_resources,
            proxy_namespace,
            proxy_name,
            no_proxy_reload,
        } => {
            let descriptor = load_descriptor(&file)?;
            let parent_stack = match parent_outputs {
                Some(path) => {
                    let outputs = StackOutputs::from_file(&path)
                        .with_context(|| format!("reading parent outputs from {}", path.display()))?;
                    Some(ParentStackRef {
                        name: parent_name.unwrap_or_else(|| {
                            parent_env.clone().unwrap_or_else(|| env.clone())
                        }),
                        outputs,
                    })
                }
                None => None,
            };

            let mut use_resources = BTreeMap::new();
            for skipped in skip_resources {
                use_resources.insert(skipped, false);
            }

            let params = ProvisionParams {
                stack_name: descriptor.service.clone(),
                environment: env,
                parent_environment: parent_env,
                parent_stack,
                use_resources,
            };

            let proxy = (!no_proxy_reload).then(|| ProxyTarget {
                namespace: proxy_namespace,
                name: proxy_name,
            });

            let client = Client::try_default().await?;
            let orchestrator = Orchestrator::new(ProcessorRegistry::with_builtin());
            let result = orchestrator
                .kube_run(client, &descriptor, &params, proxy.as_ref())
                .await?;

            if let Some(path) = export {
                result
                    .outputs
                    .to_file(&path)
                    .with_context(|| format!("writing outputs to {}", path.display()))?;
                info!(path = %path.display(), "exported stack outputs");
            }
            Ok(())
        }

        Commands::Validate {
            file,
            env,
            parent_env,
        } => {
            let descriptor = load_descriptor(&file)?;
            let params = ProvisionParams {
                stack_name: descriptor.service.clone(),
                environment: env,
                parent_environment: parent_env,
                parent_stack: None,
                use_resources: BTreeMap::new(),
            };
            let mut ctx = crate::context::ComputeContext::new();
            let spec =
                crate::container::spec::resolve_unit_spec(&descriptor, &params, &mut ctx).await?;
            let unit = crate::container::compose(&spec)?;
            println!(
                "descriptor ok: deployment {} in namespace {} ({} containers{}{}{})",
                spec.deployment_name,
                spec.namespace,
                spec.containers.len(),
                if unit.service.is_some() { ", service" } else { "" },
                if unit.ingress.is_some() { ", ingress" } else { "" },
                if unit.hpa.is_some() { ", hpa" } else { "" },
            );
            Ok(())
        }

        Commands::Proxy { command } => match command {
            ProxyCommands::Deploy {
                namespace,
                name,
                service_type,
                no_default_site,
            } => {
                let client = Client::try_default().await?;
                let opts = ProxyOptions {
                    namespace,
                    name,
                    service_type,
                    default_site: !no_default_site,
                };
                caddy::deploy_proxy(&Applier::new(client), &opts).await?;
                info!(proxy = %opts.name, namespace = %opts.namespace, "proxy deployed");
                Ok(())
            }
            ProxyCommands::Reload { namespace, name } => {
                let client = Client::try_default().await?;
                // No aggregated state at hand: salt the hash so the
                // annotation always changes and the pods always roll.
                let salt = uuid::Uuid::new_v4().to_string();
                let hash = routing_state_hash(&[salt.as_str()]);
                patch_deployment(client, &namespace, &name, &hash).await?;
                Ok(())
            }
        },
    }
}

fn load_descriptor(path: &Path) -> Result<StackDescriptor> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading descriptor {}", path.display()))?;
    StackDescriptor::from_yaml(&raw)
        .with_context(|| format!("parsing descriptor {}", path.display()))
}
