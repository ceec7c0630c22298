//! `breakout recover`: find sessions a crash left behind.
//!
//! Replays the event journal and lists sessions with no close record along
//! with the positions they entered but never exited. Those positions may still
//! be open at the broker and need manual attention.

use std::fmt::Write as _;

use anyhow::Result;
use breakout_core::{JournalReader, RecoveryQuery};
use clap::Args;
use tracing::info;

/// Arguments for the recover command.
#[derive(Args, Debug, Clone)]
pub struct RecoverArgs {
    /// Event journal written by `breakout run`
    #[arg(long)]
    pub journal: String,

    /// Record the listed sessions as crashed
    #[arg(long)]
    pub mark_crashed: bool,
}

/// Runs the recover command.
///
/// # Errors
/// Returns an error if the journal cannot be read or appended to.
pub fn run_recover(args: &RecoverArgs) -> Result<()> {
    let reader = JournalReader::new(&args.journal);
    print!("{}", render_recovery(&reader)?);

    if args.mark_crashed {
        let marked = reader.mark_crashed("left running, marked by recover")?;
        info!(count = marked.len(), journal = %args.journal, "Marked sessions as crashed");
        for session_id in marked {
            println!("marked crashed: {session_id}");
        }
    }
    Ok(())
}

fn render_recovery(query: &impl RecoveryQuery) -> Result<String> {
    let sessions = query.sessions_still_running()?;
    let mut out = String::new();

    if sessions.is_empty() {
        out.push_str("No unfinished sessions.\n");
        return Ok(out);
    }

    for session in sessions {
        let _ = writeln!(
            out,
            "{}  {} {}  started {}",
            session.session_id,
            session.strategy,
            session.underlying,
            session.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        let positions = query.active_positions_for(&session.session_id)?;
        if positions.is_empty() {
            out.push_str("    no open positions\n");
        }
        for position in positions {
            let _ = writeln!(
                out,
                "    leg {} {}: {} x{} entry {} stop {}",
                position.leg_id,
                position.leg_name,
                position.symbol,
                position.quantity,
                position.entry_price,
                position.stop_price
            );
        }
    }
    Ok(out)
}
