//! Prometheus exposition-format rendering.

use std::io::Write;

use crate::poller::{PollerStats, Snapshot};
use crate::registers::RegisterTable;

/// Render a snapshot and poller statistics as exposition text.
///
/// One gauge line per register present in the snapshot, in table order.
/// Registers absent from a degraded snapshot are omitted entirely; scrapers
/// treat metric absence as "unknown".
pub fn render(
    snapshot: &Snapshot,
    stale: bool,
    stats: &PollerStats,
    table: &RegisterTable,
) -> String {
    let mut output = Vec::with_capacity(table.len() * 64);

    for spec in table.all() {
        if let Some(value) = snapshot.values.get(&spec.name) {
            let name = spec.metric_name();
            writeln!(output, "# TYPE {} gauge", name).ok();
            writeln!(output, "{} {}", name, format_value(*value)).ok();
        }
    }

    writeln!(output, "# TYPE heliotherm_snapshot_stale gauge").ok();
    writeln!(output, "heliotherm_snapshot_stale {}", u8::from(stale)).ok();

    writeln!(output, "# TYPE heliotherm_snapshot_timestamp_seconds gauge").ok();
    writeln!(
        output,
        "heliotherm_snapshot_timestamp_seconds {}",
        snapshot.timestamp.timestamp()
    )
    .ok();

    render_stats(&mut output, stats);

    String::from_utf8(output).unwrap_or_default()
}

fn render_stats(output: &mut Vec<u8>, stats: &PollerStats) {
    writeln!(output, "# TYPE heliotherm_gathering_errors_total counter").ok();
    writeln!(
        output,
        "heliotherm_gathering_errors_total {}",
        stats.gathering_errors
    )
    .ok();

    writeln!(
        output,
        "# TYPE heliotherm_communication_errors_total counter"
    )
    .ok();
    writeln!(
        output,
        "heliotherm_communication_errors_total {}",
        stats.communication_errors
    )
    .ok();

    writeln!(output, "# TYPE heliotherm_polls_total counter").ok();
    writeln!(output, "heliotherm_polls_total {}", stats.polls_attempted).ok();

    writeln!(output, "# TYPE heliotherm_polls_succeeded_total counter").ok();
    writeln!(
        output,
        "heliotherm_polls_succeeded_total {}",
        stats.polls_succeeded
    )
    .ok();
}

/// Format a value for the exposition format (integers without decimals).
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}
