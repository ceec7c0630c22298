#![allow(clippy::format_push_string)]

use rust_decimal::Decimal;

use crate::summary::{LegReport, LegResult, SessionSummary};

const RULE: &str = "═══════════════════════════════════════════════════════════════\n";
const THIN: &str = "───────────────────────────────────────────────────────────────\n";

pub struct SummaryFormatter;

impl SummaryFormatter {
    #[must_use]
    pub fn format(summary: &SessionSummary) -> String {
        let mut output = String::new();

        output.push('\n');
        output.push_str(RULE);
        output.push_str("                      SESSION SUMMARY                          \n");
        output.push_str(RULE);
        output.push('\n');

        output.push_str("Session\n");
        output.push_str(THIN);
        output.push_str(&format!("Id:                    {}\n", summary.session_id));
        output.push_str(&format!(
            "Strategy:              {} ({})\n",
            summary.strategy, summary.underlying
        ));
        output.push_str(&format!("Expiry:                {}\n", summary.expiry));
        output.push_str(&format!(
            "Reference range:       {:.2} - {:.2}\n",
            summary.reference_low, summary.reference_high
        ));
        let minutes = (summary.finished_at - summary.started_at).num_minutes();
        output.push_str(&format!(
            "Duration:              {} hours {} minutes\n",
            minutes / 60,
            minutes % 60
        ));
        output.push_str(&format!("Status:                {:?}\n", summary.status));
        output.push('\n');

        output.push_str("Legs\n");
        output.push_str(THIN);
        for leg in &summary.legs {
            output.push_str(&Self::leg_line(leg));
        }
        output.push('\n');

        output.push_str("Totals\n");
        output.push_str(THIN);
        output.push_str(&format!(
            "Legs traded:           {} of {}\n",
            summary.traded(),
            summary.legs.len()
        ));
        output.push_str(&format!("Winning legs:          {}\n", summary.winners()));
        output.push_str(&format!("Total P&L:             ₹{:.2}\n", summary.total_pnl()));
        output.push('\n');
        output.push_str(RULE);

        output
    }

    fn leg_line(leg: &LegReport) -> String {
        match &leg.result {
            LegResult::Traded => format!(
                "#{:<2} {:<14} {:<24} {} -> {}  P&L ₹{:.2} ({}%)  {}\n",
                leg.leg_id,
                leg.name,
                leg.symbol.as_deref().unwrap_or("-"),
                price(leg.entry_price),
                price(leg.exit_price),
                leg.pnl,
                leg.pnl_pct.unwrap_or_default().round_dp(2),
                leg.exit_reason
                    .as_ref()
                    .map_or_else(String::new, ToString::to_string),
            ),
            LegResult::Skipped { reason }
            | LegResult::EntryFailed { reason }
            | LegResult::Failed { error: reason } => format!(
                "#{:<2} {:<14} {}: {}\n",
                leg.leg_id,
                leg.name,
                leg.result.label(),
                reason
            ),
            other => format!("#{:<2} {:<14} {}\n", leg.leg_id, leg.name, other.label()),
        }
    }
}

fn price(p: Option<Decimal>) -> String {
    p.map_or_else(|| "-".to_string(), |p| format!("{p:.2}"))
}
