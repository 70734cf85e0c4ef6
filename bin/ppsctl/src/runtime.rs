//! ---
//! pps_section: "05-admin-tooling"
//! pps_subsection: "binary"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Admin CLI for entitlement repair and lifecycle operations."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use pps_common::config::{AppConfig, StoreBackend};
use pps_common::init_tracing;
use pps_entitlements::{EntitlementService, EntitlementStore, MemoryStore, ReconcileMetrics};
use pps_store::{FileStore, StoreMetrics};
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::info;

const DEFAULT_CANDIDATES: [&str; 2] = ["pps.toml", "configs/pps.toml"];

/// Configuration, store, and service shared by every subcommand.
pub struct Runtime {
    pub config: AppConfig,
    pub store: Arc<dyn EntitlementStore>,
    pub service: EntitlementService,
    registry: Arc<Registry>,
}

impl Runtime {
    pub fn bootstrap(config_path: Option<&Path>, data_dir: Option<&Path>) -> Result<Self> {
        let candidates: Vec<PathBuf> = match config_path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("config file {} does not exist", path.display());
                }
                vec![path.to_path_buf()]
            }
            None => DEFAULT_CANDIDATES.iter().map(PathBuf::from).collect(),
        };
        let loaded = AppConfig::load_with_source(&candidates)?;
        let mut config = loaded.config;
        if let Some(dir) = data_dir {
            config.store.data_dir = dir.to_path_buf();
        }
        config.validate()?;

        init_tracing("ppsctl", &config.logging)?;
        info!(
            config = %loaded
                .source
                .as_ref()
                .map_or_else(|| "defaults".to_owned(), |path| path.display().to_string()),
            backend = ?config.store.backend,
            "ppsctl starting"
        );

        let registry = Arc::new(Registry::new());
        let store: Arc<dyn EntitlementStore> = match config.store.backend {
            StoreBackend::Memory if config.store.enforce_active_uniqueness => {
                Arc::new(MemoryStore::new())
            }
            StoreBackend::Memory => Arc::new(MemoryStore::without_uniqueness()),
            StoreBackend::File => {
                let metrics = if config.metrics.enabled {
                    Some(StoreMetrics::new(registry.clone())?)
                } else {
                    None
                };
                Arc::new(
                    FileStore::open_with_metrics(
                        &config.store.data_dir,
                        config.store.enforce_active_uniqueness,
                        metrics,
                    )
                    .with_context(|| {
                        format!("unable to open store in {}", config.store.data_dir.display())
                    })?,
                )
            }
        };

        let mut service = EntitlementService::new(Arc::clone(&store));
        if config.metrics.enabled {
            service = service.with_metrics(ReconcileMetrics::new(registry.clone())?);
        }

        Ok(Self {
            config,
            store,
            service,
            registry,
        })
    }

    /// Write the Prometheus text exposition when a dump path is configured.
    pub fn dump_metrics(&self) -> Result<()> {
        let Some(path) = &self.config.metrics.dump_path else {
            return Ok(());
        };
        if !self.config.metrics.enabled {
            return Ok(());
        }
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, buffer)
            .with_context(|| format!("unable to write metrics to {}", path.display()))?;
        Ok(())
    }
}
