//! Multi-leg options breakout engine.
//!
//! One [`SessionCoordinator`] per trading day fetches the reference range and
//! contract expiry, then runs a [`LegEngine`] per configured leg. Each leg
//! waits for its entry time, checks for a breakout, confirms momentum on the
//! option itself, enters, and manages the position until it exits.
//!
//! Risk decisions ([`risk::evaluate`]) are pure; all broker I/O goes through
//! the [`PriceSource`] and [`OrderGateway`].

pub mod breakout;
pub mod confirm;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod leg;
pub mod plan;
pub mod price;
pub mod risk;
pub mod session;
pub mod signal;
pub mod stops;
pub mod strike;
pub mod targets;
pub mod types;

pub use breakout::{check_breakout, Breakout, ReferenceRange};
pub use confirm::{ConfirmationOutcome, ConfirmationTracker};
pub use error::SessionError;
pub use gateway::{GatewaySettings, OrderGateway};
pub use ledger::ExitLedger;
pub use leg::{LegEngine, SessionContext};
pub use plan::{ConfirmParams, DistanceDelay, LegPlan, ProfitMode, RiskParams, TrailingStop};
pub use price::{FeedStatus, PriceSettings, PriceSource};
pub use session::SessionCoordinator;
pub use signal::{stop_channel, StopHandle, StopSignal};
pub use types::{LockState, Position, RiskAction, RiskState};
