//! # DNS Registration
//!
//! Interface to the external registrar layer. The orchestrator creates one
//! A record per provisioned domain; everything else about DNS is outside
//! this tool.

use async_trait::async_trait;
use tracing::info;

/// A DNS record to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    /// Record name, e.g. `api.example.com`.
    pub name: String,
    /// Record type; the orchestrator only emits `A`.
    pub record_type: String,
    /// Record value, the cluster ingress IP.
    pub value: String,
    /// Route through the registrar's proxy layer when it has one.
    pub proxied: bool,
}

/// External registrar boundary.
#[async_trait]
pub trait DnsRegistrar: Send + Sync {
    /// Create or update a record.
    async fn new_record(&self, record: &DnsRecord) -> anyhow::Result<()>;
}

/// Registrar that only logs. Used when no registrar is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingRegistrar;

#[async_trait]
impl DnsRegistrar for LoggingRegistrar {
    async fn new_record(&self, record: &DnsRecord) -> anyhow::Result<()> {
        info!(
            name = %record.name,
            value = %record.value,
            record_type = %record.record_type,
            "no registrar configured, skipping DNS record"
        );
        Ok(())
    }
}
