//! Shared types for the multi-leg options breakout engine: configuration,
//! the trading clock, the session event model and its sinks.

pub mod clock;
pub mod config;
pub mod config_loader;
pub mod events;
pub mod setting;
pub mod sink;
pub mod summary;
pub mod summary_formatter;
pub mod traits;

pub use clock::MarketClock;
pub use config::{
    ApiConfig, AppConfig, ConfigError, ExecutionMode, FeedConfig, JournalConfig, LegConfig,
    MarketHoursConfig, MonitorConfig, OrderConfig, ScheduleConfig, StrategyConfig,
    StrikeSelection,
};
pub use config_loader::ConfigLoader;
pub use events::{
    Direction, EventRecord, ExitReason, LegId, LegPhaseKind, SessionEvent, SessionStatus,
    StopAdjustment,
};
pub use setting::Setting;
pub use sink::{FanoutSink, JournalReader, JournalSink, MemorySink, TracingSink};
pub use summary::{LegReport, LegResult, SessionSummary};
pub use summary_formatter::SummaryFormatter;
pub use traits::{EventSink, OpenPosition, RecoveryQuery, SessionRecord};
