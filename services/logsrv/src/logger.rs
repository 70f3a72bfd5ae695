//! Per-register logging state machine.
//!
//! One [`RegisterLogger`] exists for every register whose log mode is not
//! disabled. It decides, independently per poll tick, whether the freshly
//! read value warrants a persistence write:
//!
//! - change-driven modes compare against the last *logged* value inside
//!   [`RegisterLogger::process`];
//! - interval-driven modes run their own timer task that logs the latest
//!   *observed* value, published tick-by-tick through a watch channel so the
//!   timer never reads a torn value.
//!
//! The lifecycle is strictly `Uninitialized → Initialized → Stopped`;
//! a stopped logger stays stopped and a fresh instance replaces it after a
//! configuration reload. Write failures are absorbed and logged; a broken
//! persistence target must never stall the poll loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::condition;
use crate::config::{RegisterMapping, SqlConfig};
use crate::error::{LogSrvError, Result};
use crate::query;
use crate::sink::PersistenceSink;
use crate::store::ValueStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Initialized,
    Stopped,
}

struct LoggerState {
    phase: Phase,
    last_logged_value: Option<String>,
    last_logged_at: Option<DateTime<Utc>>,
}

struct Inner {
    mapping: RegisterMapping,
    sql: SqlConfig,
    sink: Arc<dyn PersistenceSink>,
    store: Arc<ValueStore>,
    state: Mutex<LoggerState>,
    latest: watch::Sender<Option<String>>,
}

/// Logging state machine for one register.
pub struct RegisterLogger {
    inner: Arc<Inner>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl RegisterLogger {
    /// Builds a logger for a mapping that carries a persistence policy.
    pub fn new(
        mapping: RegisterMapping,
        sink: Arc<dyn PersistenceSink>,
        store: Arc<ValueStore>,
    ) -> Result<Self> {
        let sql = mapping.sql.clone().ok_or_else(|| {
            LogSrvError::Config(format!(
                "register '{}' has no persistence configuration",
                mapping.field_name
            ))
        })?;
        let (latest, _) = watch::channel(None);

        Ok(Self {
            inner: Arc::new(Inner {
                mapping,
                sql,
                sink,
                store,
                state: Mutex::new(LoggerState {
                    phase: Phase::Uninitialized,
                    last_logged_value: None,
                    last_logged_at: None,
                }),
                latest,
            }),
            timer: Mutex::new(None),
        })
    }

    pub fn field_name(&self) -> &str {
        &self.inner.mapping.field_name
    }

    /// Brings the logger into service: verifies the target table (failure is
    /// logged, not fatal) and arms the interval timer for interval-driven
    /// modes. A no-op when already initialized, stopped, or disabled.
    pub async fn initialize(&self) -> Result<()> {
        if self.inner.state.lock().phase != Phase::Uninitialized {
            return Ok(());
        }
        if self.inner.sql.log_mode.is_disabled() {
            return Ok(());
        }

        match self.inner.sink.table_exists(&self.inner.sql.table).await {
            Ok(true) => {},
            Ok(false) => warn!(
                register = %self.inner.mapping.field_name,
                table = %self.inner.sql.table,
                "Target table does not exist; writes will fail until it is created"
            ),
            Err(e) => warn!(
                register = %self.inner.mapping.field_name,
                "Could not verify target table: {e}"
            ),
        }

        if self.inner.sql.log_mode.interval_driven() {
            // Validation already refuses this; the guard stays because a
            // zero period would arm a busy timer.
            if self.inner.sql.interval_seconds == 0 {
                return Err(LogSrvError::Config(format!(
                    "register '{}' uses interval logging with a zero period",
                    self.inner.mapping.field_name
                )));
            }
            let handle = tokio::spawn(interval_task(
                self.inner.clone(),
                self.inner.latest.subscribe(),
            ));
            *self.timer.lock() = Some(handle);
        }

        self.inner.state.lock().phase = Phase::Initialized;
        info!(
            register = %self.inner.mapping.field_name,
            mode = ?self.inner.sql.log_mode,
            "Register logger initialized"
        );
        Ok(())
    }

    /// Publishes the latest observed value for the interval timer. Called
    /// every poll tick regardless of log mode.
    pub fn update_latest(&self, value: &str) {
        self.inner.latest.send_replace(Some(value.to_string()));
    }

    /// Feeds one freshly read value through change detection. Interval
    /// writes are never triggered from here.
    pub async fn process(&self, value: &str) {
        let changed = {
            let state = self.inner.state.lock();
            state.phase == Phase::Initialized
                && self.inner.sql.log_mode.change_driven()
                && state.last_logged_value.as_deref() != Some(value)
        };
        if changed {
            self.inner.write(value, "changed").await;
        }
    }

    /// Cancels the interval timer and retires the logger. Idempotent; a
    /// write already in flight is not interrupted.
    pub fn stop(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
        let mut state = self.inner.state.lock();
        if state.phase != Phase::Stopped {
            state.phase = Phase::Stopped;
            info!(register = %self.inner.mapping.field_name, "Register logger stopped");
        }
    }

    #[cfg(test)]
    fn last_logged_value(&self) -> Option<String> {
        self.inner.state.lock().last_logged_value.clone()
    }
}

impl Drop for RegisterLogger {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }
}

/// Interval timer: fires at the configured cadence, logging the latest
/// observed value. Skips with a warning until a first value arrives.
async fn interval_task(inner: Arc<Inner>, rx: watch::Receiver<Option<String>>) {
    let period = Duration::from_secs(inner.sql.interval_seconds);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let latest = rx.borrow().clone();
        match latest {
            Some(value) => inner.write(&value, "interval").await,
            None => warn!(
                register = %inner.mapping.field_name,
                "Interval elapsed before any value was observed, skipping"
            ),
        }
    }
}

impl Inner {
    /// One persistence attempt: snapshot siblings, consult the gate, select
    /// the query, execute. Only a successful write advances the
    /// change-detection state; every failure is absorbed here.
    async fn write(&self, value: &str, reason: &str) {
        let siblings = self.store.snapshot();

        if !condition::evaluate(&self.sql.log_condition, value, &siblings) {
            debug!(
                register = %self.mapping.field_name,
                reason,
                "Gate condition not met, skipping write"
            );
            return;
        }

        let sql_text = query::select_query(&self.sql);
        let params = query::build_params(&self.mapping, value, &query::timestamp_now(), &siblings);

        match self.sink.execute(&sql_text, &params).await {
            Ok(()) => {
                let mut state = self.state.lock();
                state.last_logged_value = Some(value.to_string());
                state.last_logged_at = Some(Utc::now());
                debug!(
                    register = %self.mapping.field_name,
                    reason,
                    value,
                    "Value persisted"
                );
            },
            Err(e) => warn!(
                register = %self.mapping.field_name,
                reason,
                "Persistence write failed: {e}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataType, LogMode};
    use crate::query::QueryIntent;
    use crate::sink::mock::MockSink;

    fn mapping(mode: LogMode, interval: u64) -> RegisterMapping {
        RegisterMapping {
            field_name: "Temp".to_string(),
            address: "D3115".to_string(),
            description: "Furnace temperature".to_string(),
            data_type: DataType::Float,
            length: 1,
            unit: "degC".to_string(),
            sql: Some(SqlConfig {
                connection_string: "sqlite::memory:".to_string(),
                table: "plc_log".to_string(),
                log_mode: mode,
                interval_seconds: interval,
                query: QueryIntent::Insert,
                use_custom_query: false,
                custom_query: String::new(),
                log_condition: String::new(),
            }),
        }
    }

    fn logger_with(
        mapping: RegisterMapping,
    ) -> (RegisterLogger, Arc<MockSink>, Arc<ValueStore>) {
        let sink = MockSink::new();
        let store = Arc::new(ValueStore::new());
        let logger = RegisterLogger::new(mapping, sink.clone(), store.clone()).unwrap();
        (logger, sink, store)
    }

    #[tokio::test]
    async fn on_change_triggers_once_per_change() {
        let (logger, sink, _) = logger_with(mapping(LogMode::OnChange, 0));
        logger.initialize().await.unwrap();

        logger.process("5").await;
        logger.process("5").await;
        assert_eq!(sink.call_count(), 1, "same value must not re-trigger");

        logger.process("6").await;
        assert_eq!(sink.call_count(), 2);
        assert_eq!(logger.last_logged_value().as_deref(), Some("6"));
    }

    #[tokio::test]
    async fn on_change_does_not_normalize_numeric_strings() {
        let (logger, sink, _) = logger_with(mapping(LogMode::OnChange, 0));
        logger.initialize().await.unwrap();

        logger.process("1").await;
        logger.process("1.0").await;
        // Plain string inequality: numerically equal renderings still differ.
        assert_eq!(sink.call_count(), 2);
    }

    #[tokio::test]
    async fn process_before_initialize_is_inert() {
        let (logger, sink, _) = logger_with(mapping(LogMode::OnChange, 0));
        logger.process("5").await;
        assert_eq!(sink.call_count(), 0);
    }

    #[tokio::test]
    async fn disabled_mode_never_writes() {
        let (logger, sink, _) = logger_with(mapping(LogMode::Disabled, 0));
        logger.initialize().await.unwrap();
        logger.process("5").await;
        assert_eq!(sink.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_mode_logs_latest_value_on_timer_only() {
        let (logger, sink, _) = logger_with(mapping(LogMode::Interval, 60));
        logger.initialize().await.unwrap();

        // Interval mode ignores Process entirely.
        logger.process("5").await;
        assert_eq!(sink.call_count(), 0);

        // The timer picks up the latest observed value, even though change
        // detection never saw it.
        logger.update_latest("7");
        tokio::time::sleep(Duration::from_secs(61)).await;
        let calls = sink.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1["Value"], "7");

        logger.update_latest("8");
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(sink.call_count(), 2);
        assert_eq!(sink.calls()[1].1["Value"], "8");
    }

    #[tokio::test(start_paused = true)]
    async fn interval_without_observation_skips() {
        let (logger, sink, _) = logger_with(mapping(LogMode::Interval, 30));
        logger.initialize().await.unwrap();

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(sink.call_count(), 0, "no value observed, nothing to log");
    }

    #[tokio::test(start_paused = true)]
    async fn both_mode_combines_change_and_timer() {
        let (logger, sink, _) = logger_with(mapping(LogMode::Both, 60));
        logger.initialize().await.unwrap();

        logger.update_latest("5");
        logger.process("5").await; // change-triggered
        assert_eq!(sink.call_count(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await; // timer-triggered
        assert_eq!(sink.call_count(), 2);
    }

    #[tokio::test]
    async fn zero_interval_refused_at_initialize() {
        let (logger, _, _) = logger_with(mapping(LogMode::Interval, 0));
        assert!(matches!(
            logger.initialize().await,
            Err(LogSrvError::Config(_))
        ));
    }

    #[tokio::test]
    async fn failing_condition_skips_write_silently() {
        let mut mapping = mapping(LogMode::OnChange, 0);
        mapping.sql.as_mut().unwrap().log_condition = "Value > 10".to_string();
        let (logger, sink, _) = logger_with(mapping);
        logger.initialize().await.unwrap();

        logger.process("5").await;
        assert_eq!(sink.call_count(), 0);

        logger.process("20").await;
        assert_eq!(sink.call_count(), 1);
    }

    #[tokio::test]
    async fn condition_can_reference_siblings() {
        let mut mapping = mapping(LogMode::OnChange, 0);
        mapping.sql.as_mut().unwrap().log_condition = "Reg_Door == '1'".to_string();
        let (logger, sink, store) = logger_with(mapping);
        logger.initialize().await.unwrap();

        store.update("Door", "0".to_string());
        logger.process("5").await;
        assert_eq!(sink.call_count(), 0);

        store.update("Door", "1".to_string());
        logger.process("6").await;
        assert_eq!(sink.call_count(), 1);
    }

    #[tokio::test]
    async fn params_carry_siblings_but_not_self() {
        let (logger, sink, store) = logger_with(mapping(LogMode::OnChange, 0));
        logger.initialize().await.unwrap();

        store.update("Temp", "24.0".to_string());
        store.update("Door", "1".to_string());
        logger.process("25.5").await;

        let calls = sink.calls();
        let params = &calls[0].1;
        assert_eq!(params["FieldName"], "Temp");
        assert_eq!(params["Value"], "25.5");
        assert_eq!(params["Unit"], "degC");
        assert_eq!(params["Reg_Door"], "1");
        assert!(!params.contains_key("Reg_Temp"));
    }

    #[tokio::test]
    async fn custom_query_used_verbatim() {
        let mut mapping = mapping(LogMode::OnChange, 0);
        {
            let sql = mapping.sql.as_mut().unwrap();
            sql.use_custom_query = true;
            sql.custom_query =
                "INSERT INTO audit (f, v) VALUES (@FieldName, @Value)".to_string();
        }
        let (logger, sink, _) = logger_with(mapping);
        logger.initialize().await.unwrap();

        logger.process("5").await;
        assert_eq!(
            sink.calls()[0].0,
            "INSERT INTO audit (f, v) VALUES (@FieldName, @Value)"
        );
    }

    #[tokio::test]
    async fn failed_write_is_absorbed_and_not_recorded() {
        let (logger, sink, _) = logger_with(mapping(LogMode::OnChange, 0));
        logger.initialize().await.unwrap();
        sink.set_failing(true);

        logger.process("5").await;
        assert_eq!(logger.last_logged_value(), None);

        // The failure left change detection untouched, so the same value
        // triggers another attempt once the sink recovers.
        sink.set_failing(false);
        logger.process("5").await;
        assert_eq!(sink.call_count(), 2);
        assert_eq!(logger.last_logged_value().as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn missing_table_is_nonfatal_at_initialize() {
        let (logger, sink, _) = logger_with(mapping(LogMode::OnChange, 0));
        sink.set_table_missing(true);
        logger.initialize().await.unwrap();

        logger.process("5").await;
        assert_eq!(sink.call_count(), 1, "writes still attempted");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_timer_and_is_idempotent() {
        let (logger, sink, _) = logger_with(mapping(LogMode::Interval, 30));
        logger.initialize().await.unwrap();
        logger.update_latest("7");

        logger.stop();
        logger.stop();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(sink.call_count(), 0);

        // Stopped is terminal: re-initialization is a no-op and change
        // processing stays inert.
        logger.initialize().await.unwrap();
        logger.process("9").await;
        assert_eq!(sink.call_count(), 0);
    }

    #[tokio::test]
    async fn initialize_twice_is_a_noop() {
        let (logger, sink, _) = logger_with(mapping(LogMode::OnChange, 0));
        logger.initialize().await.unwrap();
        logger.initialize().await.unwrap();

        logger.process("5").await;
        assert_eq!(sink.call_count(), 1);
    }
}
