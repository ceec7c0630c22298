//! `breakout plan`: show what each leg will actually run with.
//!
//! Leg values inherit from the strategy section unless set or explicitly
//! disabled on the leg, which makes the effective parameters hard to read off
//! the TOML. This prints them after resolution without touching the broker.

use std::fmt::Write as _;

use anyhow::Result;
use breakout_core::AppConfig;
use breakout_options_manager::{ConfirmParams, LegPlan};
use clap::Args;

use super::load_config;

/// Arguments for the plan command.
#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    pub config: String,

    /// Profile merged over the base file
    #[arg(short, long, env = "BREAKOUT_PROFILE")]
    pub profile: Option<String>,

    /// Print the resolved legs as JSON
    #[arg(long)]
    pub json: bool,
}

/// Runs the plan command.
///
/// # Errors
/// Returns an error if the configuration cannot be loaded or serialized.
pub fn run_plan(args: &PlanArgs) -> Result<()> {
    let config = load_config(&args.config, args.profile.as_deref())?;
    let plans = LegPlan::all(&config);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plans)?);
    } else {
        print!("{}", render_plan(&config, &plans));
    }
    Ok(())
}

fn render_plan(config: &AppConfig, plans: &[LegPlan]) -> String {
    let strategy = &config.strategy;
    let mut out = String::new();

    let _ = writeln!(out, "Strategy  {}", strategy.name);
    let _ = writeln!(
        out,
        "Underlying  {} ({}), options on {}",
        strategy.underlying, strategy.underlying_exchange, strategy.option_exchange
    );
    let _ = writeln!(
        out,
        "Strikes every {}, lot size {} x{}",
        strategy.strike_diff, strategy.lot_size, strategy.lot_multiplier
    );
    let _ = writeln!(
        out,
        "Range  last {} x {} candles of the previous session",
        strategy.lookback_candles, strategy.candle_interval
    );
    let _ = writeln!(
        out,
        "Orders  {} {} {}, broker stops {}",
        config.orders.mode,
        config.orders.product,
        config.orders.price_type,
        on_off(config.orders.place_stop_orders)
    );

    let disabled = config.legs.len() - plans.len();
    let _ = writeln!(
        out,
        "\n{} leg(s) enabled, {} disabled",
        plans.len(),
        disabled
    );

    for plan in plans {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "[{}] {}  {} -> {}  {}  qty {}",
            plan.id, plan.name, plan.entry_time, plan.exit_time, plan.strike, plan.quantity
        );

        let trailing = plan.risk.trailing_stop.map_or_else(
            || "no trailing".to_string(),
            |t| format!("trail {}% per {}%", t.move_pct, t.trigger_pct),
        );
        let _ = writeln!(
            out,
            "    stop      {}% below entry, {}",
            plan.risk.initial_sl_pct, trailing
        );
        let _ = writeln!(out, "    profit    {}", plan.risk.profit);
        let _ = writeln!(
            out,
            "    close at  {}",
            plan.risk
                .auto_close_pct
                .map_or_else(|| "off".to_string(), |p| format!("+{p}%"))
        );
        let _ = writeln!(out, "    confirm   {}", describe_confirm(plan.confirm.as_ref()));
        let _ = writeln!(
            out,
            "    delay     {}",
            plan.distance_delay.map_or_else(
                || "off".to_string(),
                |d| format!("{}s when beyond range by more than {}", d.delay.as_secs(), d.threshold),
            )
        );
    }
    out
}

fn describe_confirm(confirm: Option<&ConfirmParams>) -> String {
    let Some(confirm) = confirm else {
        return "off, enters on breakout".to_string();
    };

    let mut text = format!("+{}%", confirm.threshold_pct);
    match confirm.timeout {
        Some(timeout) => {
            let _ = write!(text, " within {}s", timeout.as_secs());
        }
        None => text.push_str(" until exit time"),
    }
    if let Some(drop) = confirm.reset_drop_pct {
        let _ = write!(text, ", re-arm on {drop}% retrace");
        match confirm.max_resets {
            Some(max) => {
                let _ = write!(text, " (max {max})");
            }
            None => text.push_str(" (unlimited)"),
        }
    }
    text
}

const fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}
