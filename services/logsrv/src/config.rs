//! Service configuration.
//!
//! Configuration is loaded from a YAML file merged with `LOGSRV_`-prefixed
//! environment overrides, deserialized into strongly-typed structures and
//! validated up front: unknown log modes and data types are rejected by serde,
//! everything else by [`Config::validate`]. A register set that passes
//! validation needs no further guarding at runtime.

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use mcproto::{DeviceAddress, McClientConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IO_TIMEOUT};
use serde::{Deserialize, Serialize};

use crate::error::{LogSrvError, Result};
use crate::query::{is_safe_identifier, QueryIntent};

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    /// Cadence of the poll loop reading every configured register
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

/// PLC endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlcConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_io_timeout")]
    pub io_timeout: Duration,
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_io_timeout() -> Duration {
    DEFAULT_IO_TIMEOUT
}

impl PlcConfig {
    /// Builds the protocol client configuration for this endpoint.
    pub fn client_config(&self) -> McClientConfig {
        McClientConfig {
            host: self.host.clone(),
            port: self.port,
            connect_timeout: self.connect_timeout,
            io_timeout: self.io_timeout,
        }
    }
}

/// Register value interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int,
    Uint,
    Float,
    Bool,
    String,
}

impl DataType {
    /// Number of device words one value of this type occupies.
    pub fn word_count(&self, length: u16) -> u16 {
        match self {
            DataType::Int | DataType::Uint | DataType::Bool => 1,
            DataType::Float => 2,
            DataType::String => length.max(1),
        }
    }
}

/// When a register's value is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogMode {
    #[default]
    Disabled,
    Interval,
    OnChange,
    Both,
}

impl LogMode {
    pub fn is_disabled(&self) -> bool {
        matches!(self, LogMode::Disabled)
    }

    /// True if this mode arms the recurring interval timer.
    pub fn interval_driven(&self) -> bool {
        matches!(self, LogMode::Interval | LogMode::Both)
    }

    /// True if this mode reacts to value changes on poll ticks.
    pub fn change_driven(&self) -> bool {
        matches!(self, LogMode::OnChange | LogMode::Both)
    }
}

/// Persistence policy of one register
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlConfig {
    /// Passed through to the persistence engine unmodified
    pub connection_string: String,
    /// Target table; also keys the generated query templates
    pub table: String,
    #[serde(default)]
    pub log_mode: LogMode,
    /// Interval timer period; must be positive for interval-driven modes
    #[serde(default)]
    pub interval_seconds: u64,
    /// Which generated query shape to use when no custom query is given
    #[serde(default)]
    pub query: QueryIntent,
    #[serde(default)]
    pub use_custom_query: bool,
    /// Operator-supplied SQL, used verbatim with the same parameter map
    #[serde(default)]
    pub custom_query: String,
    /// Gate expression; empty means "always log"
    #[serde(default)]
    pub log_condition: String,
}

/// One polled register
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMapping {
    /// Identity of this register; conditions reference it as `Reg_<field_name>`
    pub field_name: String,
    /// Device address string, e.g. `D100` or `D3115.1`
    pub address: String,
    #[serde(default)]
    pub description: String,
    pub data_type: DataType,
    /// Word length; only meaningful for string registers
    #[serde(default = "default_length")]
    pub length: u16,
    #[serde(default)]
    pub unit: String,
    pub sql: Option<SqlConfig>,
}

fn default_length() -> u16 {
    1
}

impl RegisterMapping {
    /// Device words to read for one value of this register.
    pub fn word_count(&self) -> u16 {
        self.data_type.word_count(self.length)
    }

    /// True if this mapping participates in persistence at all.
    pub fn logging_enabled(&self) -> bool {
        self.sql.as_ref().is_some_and(|sql| !sql.log_mode.is_disabled())
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub plc: PlcConfig,
    pub registers: Vec<RegisterMapping>,
}

impl Config {
    /// Loads and validates configuration from a YAML file plus
    /// `LOGSRV_`-prefixed environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("LOGSRV_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validates structural integrity beyond what serde enforces.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(LogSrvError::Config(msg));

        if self.service.name.is_empty() {
            return fail("service name cannot be empty".into());
        }
        if self.service.poll_interval.is_zero() {
            return fail("poll interval must be greater than zero".into());
        }
        self.plc
            .client_config()
            .validate()
            .map_err(|e| LogSrvError::Config(format!("plc endpoint: {e}")))?;

        if self.registers.is_empty() {
            return fail("at least one register must be configured".into());
        }

        let mut seen = std::collections::HashSet::new();
        for reg in &self.registers {
            if reg.field_name.is_empty() {
                return fail(format!("register '{}' has an empty field name", reg.address));
            }
            if !seen.insert(reg.field_name.as_str()) {
                return fail(format!("duplicate field name '{}'", reg.field_name));
            }
            DeviceAddress::parse(&reg.address).map_err(|e| {
                LogSrvError::Config(format!("register '{}': {e}", reg.field_name))
            })?;
            if reg.data_type == DataType::String && reg.length == 0 {
                return fail(format!(
                    "string register '{}' needs a positive word length",
                    reg.field_name
                ));
            }

            let Some(sql) = &reg.sql else { continue };
            if sql.log_mode.is_disabled() {
                continue;
            }
            if sql.connection_string.is_empty() {
                return fail(format!(
                    "register '{}' has an empty connection string",
                    reg.field_name
                ));
            }
            if !is_safe_identifier(&sql.table) {
                return fail(format!(
                    "register '{}' has an unusable table name '{}'",
                    reg.field_name, sql.table
                ));
            }
            // A zero period would arm a busy timer; reject it here rather
            // than letting the logger discover it at runtime.
            if sql.log_mode.interval_driven() && sql.interval_seconds == 0 {
                return fail(format!(
                    "register '{}' uses {:?} logging with interval_seconds 0",
                    reg.field_name, sql.log_mode
                ));
            }
            if sql.use_custom_query && sql.custom_query.trim().is_empty() {
                return fail(format!(
                    "register '{}' enables a custom query but provides none",
                    reg.field_name
                ));
            }
        }

        Ok(())
    }
}
