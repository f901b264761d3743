use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::calendar::BookingPolicy;
use crate::clock::Clock;
use crate::config::Config;
use crate::engine::Engine;
use crate::limits::*;
use crate::model::Ms;
use crate::reaper;

/// Manages per-laundry engines. Each laundry gets its own Engine, WAL,
/// compactor and retention reaper. Laundry = database name from the
/// pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    retention_days: u32,
    policy: BookingPolicy,
    clock: Arc<dyn Clock>,
}

impl TenantManager {
    pub fn new(config: &Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir: config.data_dir.clone(),
            compact_threshold: config.compact_threshold,
            retention_days: config.retention_days,
            policy: BookingPolicy::new(config.calendar),
            clock,
        }
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Get or lazily create the engine for the given laundry. Names that
    /// sanitize to the same file share one engine.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "tenant name too long"));
        }
        let safe_name = sanitize(tenant);
        if safe_name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty tenant name"));
        }
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        let vacant = match self.engines.entry(safe_name.clone()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(vacant) => vacant,
        };

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let engine = Arc::new(Engine::new(wal_path, self.policy)?);

        tokio::spawn(reaper::run_reaper(
            engine.clone(),
            self.clock.clone(),
            self.retention_days,
        ));
        tokio::spawn(reaper::run_compactor(engine.clone(), self.compact_threshold));

        vacant.insert(engine.clone());
        tracing::info!("opened laundry {tenant:?}");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

/// Only these characters reach the filesystem.
fn sanitize(tenant: &str) -> String {
    tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}
