//! Export command: prints the sanitized payload for the prediction backend.

use std::io::Write;

use anyhow::{Context, Result};

use super::util;
use crate::Config;

pub fn run<W: Write>(writer: &mut W, config: &Config, pretty: bool) -> Result<()> {
    let export = util::with_background(config, |background| async move {
        Ok(background.export().await?)
    })?;
    let json = if pretty {
        serde_json::to_string_pretty(&export)
    } else {
        serde_json::to_string(&export)
    }
    .context("failed to serialize export")?;
    writeln!(writer, "{json}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::commands::ingest;

    #[test]
    fn export_strips_internal_bookkeeping() {
        let temp = tempfile::tempdir().unwrap();
        let config = Config {
            database_path: temp.path().join("academiq.db"),
            utc_offset_minutes: Some(0),
            ..Config::default()
        };
        let input = temp.path().join("messages.ndjson");
        std::fs::write(
            &input,
            r#"{"type":"grades","payload":[{"course_id":"101","item_name":"Essay","item_type":"Assignment","submission_status":"Submitted","grade":"7","max_grade":"10"}]}"#,
        )
        .unwrap();
        ingest::run(&mut Vec::new(), &config, Some(input.as_path())).unwrap();

        let mut output = Vec::new();
        run(&mut output, &config, false).unwrap();
        let output = String::from_utf8(output).unwrap();
        assert_eq!(output.lines().count(), 1);
        assert!(!output.contains("_meta"));
        assert!(!output.contains("\"_id\""));
        assert!(!output.contains("_submission_counted"));

        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["grades"][0]["item_name"], "Essay");
        assert_eq!(value["courses"][0]["assignment_submissions"], 1);
    }
}
