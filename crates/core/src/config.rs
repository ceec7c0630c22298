use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::setting::Setting;

/// Full application configuration, one strategy run per file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub strategy: StrategyConfig,
    pub schedule: ScheduleConfig,
    pub market: MarketHoursConfig,
    pub orders: OrderConfig,
    pub api: ApiConfig,
    pub feed: FeedConfig,
    pub monitor: MonitorConfig,
    pub journal: JournalConfig,
    pub legs: Vec<LegConfig>,
}

// =============================================================================
// Strategy
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Used as the order tag prefix and in journal records.
    pub name: String,
    pub underlying: String,
    pub underlying_exchange: String,
    pub option_exchange: String,
    pub instrument_type: String,
    pub strike_diff: Decimal,
    pub lot_size: u32,
    pub lot_multiplier: u32,
    pub candle_interval: String,
    pub lookback_candles: usize,
    /// How many calendar days to walk back looking for the previous session.
    pub history_lookback_days: u32,
    pub timezone: Tz,

    // Strategy-level defaults that legs may inherit.
    pub initial_sl_pct: Setting<Decimal>,
    pub sl_trail_trigger_pct: Setting<Decimal>,
    pub sl_trail_move_pct: Setting<Decimal>,
    pub wait_trade_threshold_pct: Setting<Decimal>,
    pub wait_trade_timeout_seconds: Setting<u64>,
    pub breakout_diff_threshold: Setting<Decimal>,
    pub breakout_diff_delay_seconds: Setting<u64>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            name: "nifty_breakout".to_string(),
            underlying: "NIFTY".to_string(),
            underlying_exchange: "NSE_INDEX".to_string(),
            option_exchange: "NFO".to_string(),
            instrument_type: "options".to_string(),
            strike_diff: Decimal::from(50),
            lot_size: 75,
            lot_multiplier: 1,
            candle_interval: "3m".to_string(),
            lookback_candles: 3,
            history_lookback_days: 10,
            timezone: chrono_tz::Asia::Kolkata,
            initial_sl_pct: Setting::Value(Decimal::from(7)),
            sl_trail_trigger_pct: Setting::Unset,
            sl_trail_move_pct: Setting::Unset,
            wait_trade_threshold_pct: Setting::Value(Decimal::from(3)),
            wait_trade_timeout_seconds: Setting::Value(300),
            breakout_diff_threshold: Setting::Unset,
            breakout_diff_delay_seconds: Setting::Value(60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Exit-by time for legs that do not configure their own.
    pub end_time: NaiveTime,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            end_time: hms(15, 0, 0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketHoursConfig {
    pub open: NaiveTime,
    pub close: NaiveTime,
    /// Refuse to start a session outside trading hours.
    pub enforce_hours: bool,
}

impl Default for MarketHoursConfig {
    fn default() -> Self {
        Self {
            open: hms(9, 15, 0),
            close: hms(15, 30, 0),
            enforce_hours: true,
        }
    }
}

// =============================================================================
// Broker-facing sections
// =============================================================================

/// Whether orders reach the exchange or are simulated locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Live,
    #[default]
    Paper,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Paper => write!(f, "paper"),
        }
    }
}

/// Broker price type codes accepted for `orders.price_type`.
pub const ORDER_PRICE_TYPES: [&str; 4] = ["MARKET", "LIMIT", "SL", "SL-M"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderConfig {
    pub mode: ExecutionMode,
    pub product: String,
    pub price_type: String,
    pub place_stop_orders: bool,
    pub tick_size: Decimal,
    /// Distance between stop trigger and stop limit, as a percent of the trigger.
    pub sl_limit_buffer_pct: Decimal,
    pub fill_timeout_seconds: u64,
    pub fill_poll_interval_ms: u64,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Paper,
            product: "NRML".to_string(),
            price_type: "MARKET".to_string(),
            place_stop_orders: true,
            tick_size: Decimal::new(5, 2),
            sl_limit_buffer_pct: Decimal::new(15, 1),
            fill_timeout_seconds: 5,
            fill_poll_interval_ms: 500,
        }
    }
}

impl OrderConfig {
    #[must_use]
    pub const fn fill_timeout(&self) -> Duration {
        Duration::from_secs(self.fill_timeout_seconds)
    }

    #[must_use]
    pub const fn fill_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fill_poll_interval_ms)
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub key: String,
    pub requests_per_minute: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "http://127.0.0.1:5000".to_string(),
            key: String::new(),
            requests_per_minute: 600,
        }
    }
}

// Keep the key out of logs.
impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("host", &self.host)
            .field("key", &if self.key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("requests_per_minute", &self.requests_per_minute)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub enabled: bool,
    pub url: String,
    pub reconnect_interval_seconds: u64,
    pub stale_warn_seconds: u64,
    pub stale_fallback_seconds: u64,
    pub quote_attempts: u32,
    pub quote_backoff_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "ws://127.0.0.1:8765".to_string(),
            reconnect_interval_seconds: 5,
            stale_warn_seconds: 10,
            stale_fallback_seconds: 30,
            quote_attempts: 3,
            quote_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_ms: u64,
    pub interval_no_stream_ms: u64,
    pub error_retry_ms: u64,
    pub confirm_interval_ms: u64,
    pub heartbeat_seconds: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            interval_no_stream_ms: 1000,
            error_retry_ms: 1000,
            confirm_interval_ms: 500,
            heartbeat_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// JSON-lines event journal. No journal is written when absent.
    pub path: Option<String>,
}

// =============================================================================
// Legs
// =============================================================================

/// Strike selection relative to the at-the-money strike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StrikeSelection {
    #[default]
    Atm,
    /// In the money by n strike steps.
    Itm(u32),
    /// Out of the money by n strike steps.
    Otm(u32),
}

impl FromStr for StrikeSelection {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let invalid = || ConfigError::InvalidStrike(s.to_string());

        if upper == "ATM" {
            return Ok(Self::Atm);
        }
        let (steps, build): (&str, fn(u32) -> Self) = if let Some(rest) = upper.strip_prefix("ITM") {
            (rest, Self::Itm)
        } else if let Some(rest) = upper.strip_prefix("OTM") {
            (rest, Self::Otm)
        } else {
            return Err(invalid());
        };
        match steps.parse::<u32>() {
            Ok(n) if n > 0 => Ok(build(n)),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for StrikeSelection {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StrikeSelection> for String {
    fn from(value: StrikeSelection) -> Self {
        value.to_string()
    }
}

impl fmt::Display for StrikeSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atm => write!(f, "ATM"),
            Self::Itm(n) => write!(f, "ITM{n}"),
            Self::Otm(n) => write!(f, "OTM{n}"),
        }
    }
}

/// One configured leg. Risk parameters are three-valued, see [`Setting`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LegConfig {
    pub name: String,
    pub enabled: bool,
    pub entry_time: NaiveTime,
    pub exit_time: Option<NaiveTime>,
    #[serde(alias = "strike")]
    pub strike_type: StrikeSelection,
    pub lot: u32,

    pub initial_sl_pct: Setting<Decimal>,
    pub sl_trail_trigger_pct: Setting<Decimal>,
    pub sl_trail_move_pct: Setting<Decimal>,

    pub lock_trigger_pct: Setting<Decimal>,
    pub first_lock_pct: Setting<Decimal>,
    pub trail_trigger_pct: Setting<Decimal>,
    pub trail_move_pct: Setting<Decimal>,
    pub lock_profit_pct: Setting<Decimal>,
    pub profit_lock_step: Setting<Decimal>,
    pub profit_step_threshold: Setting<Decimal>,
    pub auto_close_profit_pct: Setting<Decimal>,

    pub wait_trade_threshold_pct: Setting<Decimal>,
    pub wait_trade_timeout_seconds: Setting<u64>,
    pub wait_trade_reset_enabled: bool,
    pub wait_trade_reset_drop_pct: Setting<Decimal>,
    pub wait_trade_max_resets: Setting<u32>,

    pub breakout_diff_threshold: Setting<Decimal>,
    pub breakout_diff_delay_seconds: Setting<u64>,
}

impl Default for LegConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            entry_time: hms(9, 15, 10),
            exit_time: None,
            strike_type: StrikeSelection::Atm,
            lot: 1,
            initial_sl_pct: Setting::Unset,
            sl_trail_trigger_pct: Setting::Unset,
            sl_trail_move_pct: Setting::Unset,
            lock_trigger_pct: Setting::Unset,
            first_lock_pct: Setting::Unset,
            trail_trigger_pct: Setting::Unset,
            trail_move_pct: Setting::Unset,
            lock_profit_pct: Setting::Unset,
            profit_lock_step: Setting::Unset,
            profit_step_threshold: Setting::Unset,
            auto_close_profit_pct: Setting::Unset,
            wait_trade_threshold_pct: Setting::Unset,
            wait_trade_timeout_seconds: Setting::Unset,
            wait_trade_reset_enabled: false,
            wait_trade_reset_drop_pct: Setting::Unset,
            wait_trade_max_resets: Setting::Unset,
            breakout_diff_threshold: Setting::Unset,
            breakout_diff_delay_seconds: Setting::Unset,
        }
    }
}

impl LegConfig {
    fn percentages(&self) -> [(&'static str, &Setting<Decimal>); 14] {
        [
            ("initial_sl_pct", &self.initial_sl_pct),
            ("sl_trail_trigger_pct", &self.sl_trail_trigger_pct),
            ("sl_trail_move_pct", &self.sl_trail_move_pct),
            ("lock_trigger_pct", &self.lock_trigger_pct),
            ("first_lock_pct", &self.first_lock_pct),
            ("trail_trigger_pct", &self.trail_trigger_pct),
            ("trail_move_pct", &self.trail_move_pct),
            ("lock_profit_pct", &self.lock_profit_pct),
            ("profit_lock_step", &self.profit_lock_step),
            ("profit_step_threshold", &self.profit_step_threshold),
            ("auto_close_profit_pct", &self.auto_close_profit_pct),
            ("wait_trade_threshold_pct", &self.wait_trade_threshold_pct),
            ("wait_trade_reset_drop_pct", &self.wait_trade_reset_drop_pct),
            ("breakout_diff_threshold", &self.breakout_diff_threshold),
        ]
    }
}

// =============================================================================
// Validation
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid strike selection {0:?}: expected ATM, ITM<n> or OTM<n>")]
    InvalidStrike(String),

    #[error("strategy.{field} must be greater than zero")]
    NonPositive { field: &'static str },

    #[error("leg {leg:?}: {field} must be greater than zero, got {value}")]
    NonPositiveLegValue {
        leg: String,
        field: &'static str,
        value: Decimal,
    },

    #[error("leg {leg:?}: exit_time {exit} is not after entry_time {entry}")]
    ExitBeforeEntry {
        leg: String,
        entry: NaiveTime,
        exit: NaiveTime,
    },

    #[error("leg names must be unique, {0:?} appears more than once")]
    DuplicateLeg(String),

    #[error("a leg is missing its name")]
    UnnamedLeg,

    #[error("no enabled legs configured")]
    NoLegs,

    #[error("orders.price_type {0:?} is not one of MARKET, LIMIT, SL, SL-M")]
    UnknownPriceType(String),
}

impl AppConfig {
    /// Legs that will be scheduled, in configuration order.
    pub fn enabled_legs(&self) -> impl Iterator<Item = &LegConfig> {
        self.legs.iter().filter(|leg| leg.enabled)
    }

    /// Checks cross-field constraints figment cannot express.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.strategy;
        if s.strike_diff <= Decimal::ZERO {
            return Err(ConfigError::NonPositive { field: "strike_diff" });
        }
        if s.lot_size == 0 {
            return Err(ConfigError::NonPositive { field: "lot_size" });
        }
        if s.lot_multiplier == 0 {
            return Err(ConfigError::NonPositive {
                field: "lot_multiplier",
            });
        }
        if s.lookback_candles == 0 {
            return Err(ConfigError::NonPositive {
                field: "lookback_candles",
            });
        }
        if self.orders.tick_size <= Decimal::ZERO {
            return Err(ConfigError::NonPositive { field: "tick_size" });
        }
        let price_type = self.orders.price_type.trim().to_ascii_uppercase();
        if !ORDER_PRICE_TYPES.contains(&price_type.as_str()) {
            return Err(ConfigError::UnknownPriceType(self.orders.price_type.clone()));
        }

        let mut seen = HashSet::new();
        for leg in self.enabled_legs() {
            if leg.name.trim().is_empty() {
                return Err(ConfigError::UnnamedLeg);
            }
            if !seen.insert(leg.name.as_str()) {
                return Err(ConfigError::DuplicateLeg(leg.name.clone()));
            }
            if leg.lot == 0 {
                return Err(ConfigError::NonPositiveLegValue {
                    leg: leg.name.clone(),
                    field: "lot",
                    value: Decimal::ZERO,
                });
            }
            if let Some(exit) = leg.exit_time {
                if exit <= leg.entry_time {
                    return Err(ConfigError::ExitBeforeEntry {
                        leg: leg.name.clone(),
                        entry: leg.entry_time,
                        exit,
                    });
                }
            }
            for (field, setting) in leg.percentages() {
                if let Some(value) = setting.value() {
                    if *value <= Decimal::ZERO {
                        return Err(ConfigError::NonPositiveLegValue {
                            leg: leg.name.clone(),
                            field,
                            value: *value,
                        });
                    }
                }
            }
        }

        if seen.is_empty() {
            return Err(ConfigError::NoLegs);
        }
        Ok(())
    }
}

fn hms(h: u32, m: u32, s: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, s).unwrap_or(NaiveTime::MIN)
}
