//! Command execution.

use crate::Commands;
use colored::Colorize;
use rebuf_wal::segment::staging_path;
use rebuf_wal::{replay_dir, verify_log, Rebuf, RebufConfig, RebufError, SegmentScanner};
use std::fmt::Write;
use std::io::BufRead;

/// Returned from the replay callback to stop early.
#[derive(Debug, thiserror::Error)]
#[error("replay limit reached")]
struct LimitReached;

/// Executes a command and returns the formatted output.
pub fn execute(config: RebufConfig, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Append { payloads, stdin } => {
            let log = Rebuf::open(config)?;
            let mut out = String::new();

            let mut append = |payload: &[u8]| -> Result<(), RebufError> {
                let offset = log.append(payload)?;
                let _ = writeln!(out, "{} offset {}", "Appended".green(), offset);
                Ok(())
            };
            for payload in &payloads {
                append(payload.as_bytes())?;
            }
            if stdin {
                for line in std::io::stdin().lock().lines() {
                    append(line?.as_bytes())?;
                }
            }

            log.close()?;
            Ok(out.trim_end().to_string())
        }

        Commands::Replay { hex, limit } => {
            let limit = limit.unwrap_or(usize::MAX);
            let mut out = String::new();
            let mut count = 0usize;

            let result = replay_dir(&config.log_dir, |record| {
                if count == limit {
                    return Err(LimitReached);
                }
                let payload = if hex {
                    hex::encode(&record.payload)
                } else {
                    String::from_utf8_lossy(&record.payload).into_owned()
                };
                let _ = writeln!(out, "{} {}", record.offset.to_string().cyan(), payload);
                count += 1;
                Ok(())
            });

            match result {
                Ok(_) => {}
                Err(RebufError::Callback(e)) if e.is::<LimitReached>() => {}
                Err(e) => return Err(e.into()),
            }
            Ok(out.trim_end().to_string())
        }

        Commands::Offsets => {
            let config = config.with_sync_interval(std::time::Duration::ZERO);
            let log = Rebuf::open(config)?;
            let output = match (log.oldest_offset(), log.latest_offset()) {
                (Ok(oldest), Ok(latest)) => format!(
                    "oldest: {}\nlatest: {}",
                    oldest.to_string().cyan(),
                    latest.to_string().cyan()
                ),
                (Err(RebufError::NotFound), _) | (_, Err(RebufError::NotFound)) => {
                    "log is empty".yellow().to_string()
                }
                (Err(e), _) | (_, Err(e)) => return Err(e.into()),
            };
            log.close()?;
            Ok(output)
        }

        Commands::Segments => {
            let mut out = String::new();
            for name in SegmentScanner::segment_files(&config.log_dir)? {
                let size = std::fs::metadata(config.log_dir.join(&name))?.len();
                let _ = writeln!(out, "{:<24} {:>12} bytes", name, size);
            }
            let staging = staging_path(&config.log_dir);
            if staging.exists() {
                let size = std::fs::metadata(&staging)?.len();
                let _ = writeln!(
                    out,
                    "{:<24} {:>12} bytes {}",
                    "rebuf.tmp",
                    size,
                    "(staging)".dimmed()
                );
            }
            Ok(out.trim_end().to_string())
        }

        Commands::Verify { json } => {
            let report = verify_log(&config.log_dir)?;
            if json {
                return Ok(serde_json::to_string_pretty(&report)?);
            }

            let mut out = String::new();
            for segment in &report.segments {
                let range = match (segment.first_offset, segment.last_offset) {
                    (Some(first), Some(last)) => format!("{}..={}", first, last),
                    _ => "-".to_string(),
                };
                let _ = write!(
                    out,
                    "{:<24} {:>8} records  offsets {}",
                    segment.name, segment.records, range
                );
                if segment.trailing_bytes > 0 {
                    let _ = write!(
                        out,
                        "  {}",
                        format!("{} torn bytes", segment.trailing_bytes).red()
                    );
                }
                out.push('\n');
            }
            for (expected, found) in &report.offset_gaps {
                let _ = writeln!(
                    out,
                    "{} expected offset {}, found {}",
                    "Gap".yellow(),
                    expected,
                    found
                );
            }
            let status = if report.is_clean() {
                "OK".green()
            } else {
                "DAMAGED".red()
            };
            let _ = write!(out, "{} {} records", status, report.records);
            Ok(out)
        }
    }
}
