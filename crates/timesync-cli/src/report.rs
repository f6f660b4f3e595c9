//! Command output rendering.

use serde::Serialize;
use std::fmt::Write as _;
use timesync_core::{SyncAttemptResult, TimeInfo};

/// Outcome of the `sync` command.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// What the sync call did.
    #[serde(flatten)]
    pub result: SyncAttemptResult,
    /// Device and host time read after the sync.
    pub time: TimeInfo,
}

/// Render time info as aligned `label value` lines.
pub fn format_time_info(info: &TimeInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<12} {}", "epoch", info.epoch);
    let _ = writeln!(
        out,
        "{:<12} {}",
        "device time",
        info.current_time.format("%Y-%m-%d %H:%M:%S%.3f")
    );
    let _ = writeln!(out, "{:<12} {:.3}", "timestamp", info.current_timestamp);
    let _ = writeln!(out, "{:<12} {:.3}", "host time", info.host_time);
    let _ = writeln!(out, "{:<12} {:+.3} s", "offset", info.offset);
    out
}

/// Render a sync report as a summary line followed by the time info.
pub fn format_sync_report(report: &SyncReport) -> String {
    let result = &report.result;
    let mut out = String::new();

    if result.skipped() {
        out.push_str("Device did not request a time sync\n");
    } else {
        let plural = if result.attempts == 1 { "" } else { "s" };
        let _ = write!(out, "Synchronized in {} attempt{plural}", result.attempts);
        match (result.final_offset, result.converged) {
            (Some(offset), true) => {
                let _ = write!(out, ", converged at {offset:+.3} s");
            }
            (Some(offset), false) => {
                let _ = write!(out, ", did not converge ({offset:+.3} s)");
            }
            (None, _) => {}
        }
        out.push('\n');
    }

    out.push_str(&format_time_info(&report.time));
    out
}

/// Serialize any report as pretty JSON.
///
/// # Errors
///
/// Propagates serializer failures.
pub fn to_json<T: Serialize>(value: &T) -> serde_json::Result<String> {
    serde_json::to_string_pretty(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use timesync_core::Epoch;

    fn sample_info() -> TimeInfo {
        let epoch = Epoch::unix();
        TimeInfo {
            epoch,
            current_time: epoch.at(10.5).unwrap(),
            current_timestamp: 10.5,
            host_time: 12.0,
            offset: -1.5,
        }
    }

    #[test]
    fn test_format_time_info() {
        let text = format_time_info(&sample_info());
        assert!(text.contains("epoch        1970-01-01 00:00:00.000000"));
        assert!(text.contains("device time  1970-01-01 00:00:10.500"));
        assert!(text.contains("offset       -1.500 s"));
    }

    #[test]
    fn test_format_skipped_sync() {
        let report = SyncReport {
            result: SyncAttemptResult::default(),
            time: sample_info(),
        };
        let text = format_sync_report(&report);
        assert!(text.starts_with("Device did not request a time sync\n"));
    }

    #[test]
    fn test_format_unconverged_sync() {
        let report = SyncReport {
            result: SyncAttemptResult {
                attempts: 3,
                final_offset: Some(0.25),
                converged: false,
            },
            time: sample_info(),
        };
        let text = format_sync_report(&report);
        assert!(text.starts_with("Synchronized in 3 attempts, did not converge (+0.250 s)\n"));
    }

    #[test]
    fn test_sync_report_json_is_flat() {
        let report = SyncReport {
            result: SyncAttemptResult {
                attempts: 1,
                final_offset: None,
                converged: false,
            },
            time: sample_info(),
        };
        let value: serde_json::Value = serde_json::from_str(&to_json(&report).unwrap()).unwrap();
        assert_eq!(value["attempts"], 1);
        assert!(value["final_offset"].is_null());
        assert_eq!(value["time"]["current_timestamp"], 10.5);
        assert_eq!(value["time"]["current_time"], "1970-01-01T00:00:10.500");
    }
}
