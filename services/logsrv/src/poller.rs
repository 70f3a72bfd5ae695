//! Fixed-cadence poll loop.
//!
//! Each tick reads every configured register in configuration order through
//! the shared [`McClient`], decodes the words into the canonical string form
//! and routes the value into the store and the register's logger. A failed
//! read flags the register's quality and moves on, so no single register
//! can stall the loop.
//!
//! The poller also owns configuration reloads: a validated snapshot arriving
//! on the reload channel makes it stop every live logger, rebuild its
//! register set (with a fresh value store, so removed registers vanish from
//! sibling snapshots) and initialize the replacement loggers.

use std::sync::Arc;
use std::time::Duration;

use mcproto::{DeviceAddress, McClient};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::{Config, RegisterMapping};
use crate::decode::decode_value;
use crate::error::Result;
use crate::logger::RegisterLogger;
use crate::sink::SinkRegistry;
use crate::store::ValueStore;

/// One polled register with its pre-resolved address and optional logger.
struct Entry {
    mapping: RegisterMapping,
    address: DeviceAddress,
    words: u16,
    logger: Option<Arc<RegisterLogger>>,
}

/// The poll-loop driver.
pub struct Poller {
    client: Arc<McClient>,
    sinks: Arc<SinkRegistry>,
    store: Arc<ValueStore>,
    entries: Vec<Entry>,
    poll_interval: Duration,
    reload_rx: Option<mpsc::Receiver<Config>>,
}

impl Poller {
    /// Builds the poller from a validated configuration.
    pub async fn new(
        config: &Config,
        client: Arc<McClient>,
        sinks: Arc<SinkRegistry>,
    ) -> Result<Self> {
        let (entries, store) = build_entries(config, &sinks).await?;
        Ok(Self {
            client,
            sinks,
            store,
            entries,
            poll_interval: config.service.poll_interval,
            reload_rx: None,
        })
    }

    /// Attaches the channel on which validated configuration snapshots
    /// arrive.
    pub fn with_reload_channel(mut self, rx: mpsc::Receiver<Config>) -> Self {
        self.reload_rx = Some(rx);
        self
    }

    /// The live value store backing displays and sibling snapshots.
    pub fn store(&self) -> Arc<ValueStore> {
        self.store.clone()
    }

    /// Runs the poll loop until the task is aborted.
    pub async fn run(mut self) -> Result<()> {
        self.initialize_loggers().await;
        info!(
            registers = self.entries.len(),
            interval = ?self.poll_interval,
            "Starting poll loop"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.apply_pending_reload().await {
                ticker = tokio::time::interval(self.poll_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            }
            self.poll_once().await;
        }
    }

    async fn initialize_loggers(&self) {
        for entry in &self.entries {
            if let Some(logger) = &entry.logger {
                if let Err(e) = logger.initialize().await {
                    error!(register = %entry.mapping.field_name, "Logger initialization failed: {e}");
                }
            }
        }
    }

    /// One pass over every register, in configuration order.
    async fn poll_once(&self) {
        for entry in &self.entries {
            let value = match self.client.read_words(entry.address.word, entry.words).await {
                Ok(words) => decode_value(
                    entry.mapping.data_type,
                    entry.address.bit,
                    entry.mapping.length,
                    &words,
                ),
                Err(e) => {
                    warn!(register = %entry.mapping.field_name, "Poll read failed: {e}");
                    self.store.mark_error(&entry.mapping.field_name);
                    continue;
                },
            };

            match value {
                Ok(value) => {
                    self.store.update(&entry.mapping.field_name, value.clone());
                    if let Some(logger) = &entry.logger {
                        logger.update_latest(&value);
                        logger.process(&value).await;
                    }
                },
                Err(e) => {
                    warn!(register = %entry.mapping.field_name, "Value decoding failed: {e}");
                    self.store.mark_error(&entry.mapping.field_name);
                },
            }
        }
    }

    /// Swaps in the newest pending configuration snapshot, if any.
    /// Returns true when the register set was replaced.
    async fn apply_pending_reload(&mut self) -> bool {
        let Some(rx) = &mut self.reload_rx else {
            return false;
        };

        // Drain the channel; only the latest snapshot matters.
        let mut pending = None;
        while let Ok(config) = rx.try_recv() {
            pending = Some(config);
        }
        let Some(config) = pending else {
            return false;
        };

        info!("Applying configuration snapshot");
        match build_entries(&config, &self.sinks).await {
            Ok((entries, store)) => {
                for entry in &self.entries {
                    if let Some(logger) = &entry.logger {
                        logger.stop();
                    }
                }
                self.entries = entries;
                self.store = store;
                self.poll_interval = config.service.poll_interval;
                self.initialize_loggers().await;
                info!(registers = self.entries.len(), "Configuration reload complete");
                true
            },
            Err(e) => {
                error!("Reload failed, keeping previous register set: {e}");
                false
            },
        }
    }
}

/// Resolves addresses, connects sinks and constructs loggers for every
/// register of a configuration. Built against a fresh value store so a
/// reload never leaks removed registers into sibling snapshots.
async fn build_entries(
    config: &Config,
    sinks: &SinkRegistry,
) -> Result<(Vec<Entry>, Arc<ValueStore>)> {
    let store = Arc::new(ValueStore::new());
    let mut entries = Vec::with_capacity(config.registers.len());

    for mapping in &config.registers {
        let address = DeviceAddress::parse(&mapping.address)?;

        let mut logger = None;
        if let Some(sql) = &mapping.sql {
            if !sql.log_mode.is_disabled() {
                let sink = sinks.get_or_connect(&sql.connection_string).await?;
                logger = Some(Arc::new(RegisterLogger::new(
                    mapping.clone(),
                    sink,
                    store.clone(),
                )?));
            }
        }

        entries.push(Entry {
            words: mapping.word_count(),
            address,
            mapping: mapping.clone(),
            logger,
        });
    }

    Ok((entries, store))
}
