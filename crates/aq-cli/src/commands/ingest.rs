//! Ingest command: replays newline-delimited wire messages.
//!
//! Each line is one message envelope, exactly as a producer tab would send
//! it (`{"type": "page_view", "tab_id": 3, "payload": {...}}`). Lines are
//! handled in order; blank lines are skipped.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use aq_agent::Background;
use aq_core::Inbound;

use super::util;
use crate::Config;

/// Outcome counts for one ingest run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub handled: usize,
    /// Unknown message types.
    pub ignored: usize,
    /// Lines that did not parse or failed payload validation.
    pub malformed: usize,
    /// Messages the aggregator could not apply.
    pub failed: usize,
}

impl IngestSummary {
    pub const fn total(&self) -> usize {
        self.handled + self.ignored + self.malformed + self.failed
    }
}

pub fn run<W: Write>(writer: &mut W, config: &Config, file: Option<&Path>) -> Result<()> {
    let lines = match file {
        Some(path) => {
            let file =
                File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
            read_lines(BufReader::new(file))?
        }
        None => read_lines(io::stdin().lock())?,
    };

    let summary =
        util::with_background(config, |background| async move { Ok(ingest(&background, &lines).await) })?;

    writeln!(
        writer,
        "Processed {} messages: {} handled, {} ignored, {} malformed, {} failed",
        summary.total(),
        summary.handled,
        summary.ignored,
        summary.malformed,
        summary.failed
    )?;
    Ok(())
}

fn read_lines<R: BufRead>(reader: R) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line.context("failed to read input")?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}

/// Feeds each line to `background`, in order.
pub async fn ingest(background: &Background, lines: &[String]) -> IngestSummary {
    let mut summary = IngestSummary::default();
    for (index, line) in lines.iter().enumerate() {
        let line_number = index + 1;
        match Inbound::from_json(line) {
            Ok(Some(inbound)) => {
                let reply = background.handle(inbound).await;
                if reply.success {
                    summary.handled += 1;
                } else {
                    tracing::warn!(line = line_number, error = ?reply.error, "message failed");
                    summary.failed += 1;
                }
            }
            Ok(None) => summary.ignored += 1,
            Err(err) => {
                tracing::warn!(line = line_number, error = %err, "skipping malformed message");
                summary.malformed += 1;
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    use aq_core::CourseId;
    use aq_db::{Database, SnapshotStore};
    use insta::assert_snapshot;

    fn test_config(temp: &tempfile::TempDir) -> Config {
        Config {
            database_path: temp.path().join("academiq.db"),
            utc_offset_minutes: Some(0),
            ..Config::default()
        }
    }

    #[test]
    fn ingest_file_reports_summary_and_persists() {
        let temp = tempfile::tempdir().unwrap();
        let config = test_config(&temp);
        let input = temp.path().join("messages.ndjson");
        std::fs::write(
            &input,
            concat!(
                r#"{"type":"page_view","tab_id":1,"payload":{"course_id":"101","course_name":"Intro","page_type":"course","url":"https://lms/course/view.php?id=101","timestamp":1736931600000}}"#,
                "\n",
                "\n",
                r#"{"type":"interaction","tab_id":1,"payload":{"course_id":"101","page_type":"course","action_type":"click","timestamp":1736931605000}}"#,
                "\n",
                r#"{"type":"ping"}"#,
                "\n",
                "not json\n",
                r#"{"type":"tab_removed","tab_id":1}"#,
                "\n",
            ),
        )
        .unwrap();

        let mut output = Vec::new();
        run(&mut output, &config, Some(input.as_path())).unwrap();
        assert_snapshot!(
            String::from_utf8(output).unwrap(),
            @"Processed 5 messages: 3 handled, 1 ignored, 1 malformed, 0 failed"
        );

        let mut db = Database::open(&config.database_path).unwrap();
        let snapshot = db.load().unwrap();
        let metrics = &snapshot.metrics_by_course[&CourseId::new("101").unwrap()];
        assert_eq!(metrics.total_visits, 1);
        assert_eq!(metrics.click_count, 1);
        assert_eq!(metrics.course_name, "Intro");
    }

    #[test]
    fn ingest_missing_file_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let config = test_config(&temp);
        let mut output = Vec::new();
        let err = run(&mut output, &config, Some(temp.path().join("absent.ndjson").as_path())).unwrap_err();
        assert!(err.to_string().contains("failed to open"));
    }
}
