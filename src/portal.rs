//! Process wiring: store, engine, background compaction and metrics from one
//! [`Config`].

use std::io;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::calendar::CalendarProjection;
use crate::clock::{Clock, SystemClock};
use crate::compactor;
use crate::config::Config;
use crate::engine::{Engine, EngineError};
use crate::model::{ChangeEvent, ReservationFilter};
use crate::notify::NotifyHub;
use crate::observability;
use crate::repository::{Identity, ReservationRepository};
use crate::store::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    #[error("journal: {0}")]
    Journal(#[from] io::Error),
    #[error("log filter: {0}")]
    LogFilter(#[from] tracing_subscriber::filter::ParseError),
    #[error("metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

pub struct Portal {
    store: Arc<MemoryStore>,
    engine: Arc<Engine>,
    compactor: Option<JoinHandle<()>>,
}

impl Portal {
    /// Must be called inside a tokio runtime when a journal is configured.
    pub fn open(config: &Config, identity: Arc<dyn Identity>) -> Result<Self, PortalError> {
        Self::open_with_clock(config, identity, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        config: &Config,
        identity: Arc<dyn Identity>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PortalError> {
        if !observability::init_tracing(&config.log_filter)? {
            tracing::debug!("tracing subscriber already installed");
        }
        observability::init(config.metrics_port)?;

        let notify = Arc::new(NotifyHub::new());
        let store = Arc::new(match &config.journal_path {
            Some(path) => MemoryStore::open(path.clone(), notify)?,
            None => MemoryStore::in_memory(notify),
        });

        let compactor = store.is_durable().then(|| {
            let store = store.clone();
            let threshold = config.compact_threshold;
            tokio::spawn(async move {
                compactor::run_compactor(store, threshold).await;
            })
        });

        let engine = Engine::new(store.clone(), identity)
            .with_clock(clock)
            .with_settings(config.engine_settings());

        tracing::info!(
            journal = config.journal_path.as_ref().map_or("memory".to_string(), |p| p.display().to_string()),
            timeout_ms = config.repo_timeout.as_millis() as u64,
            utc_offset_minutes = config.utc_offset_minutes,
            "portal ready"
        );

        Ok(Self {
            store,
            engine: Arc::new(engine),
            compactor,
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// A calendar loaded from `filter` plus the receiver that keeps it current.
    /// The subscription is taken before the catalog snapshot and the listing
    /// so no change falls between them.
    pub async fn calendar(
        &self,
        filter: &ReservationFilter,
    ) -> Result<(CalendarProjection, broadcast::Receiver<ChangeEvent>), EngineError> {
        let rx = self.store.subscribe();
        let catalog = self.store.catalog();
        let views = self.engine.list(filter).await?;
        Ok((CalendarProjection::from_views(views).with_catalog(catalog), rx))
    }
}

impl Drop for Portal {
    fn drop(&mut self) {
        if let Some(handle) = self.compactor.take() {
            handle.abort();
        }
    }
}
