//! Show command: prints the full snapshot as consumers see it.

use std::io::Write;

use anyhow::{Context, Result};

use super::util;
use crate::Config;

pub fn run<W: Write>(writer: &mut W, config: &Config) -> Result<()> {
    let snapshot = util::with_background(config, |background| async move {
        Ok(background.snapshot().await?)
    })?;
    let json = serde_json::to_string_pretty(&snapshot).context("failed to serialize snapshot")?;
    writeln!(writer, "{json}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_prints_consumer_field_names() {
        let temp = tempfile::tempdir().unwrap();
        let config = Config {
            database_path: temp.path().join("academiq.db"),
            utc_offset_minutes: Some(0),
            ..Config::default()
        };

        let mut output = Vec::new();
        run(&mut output, &config).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert!(value["metricsByCourse"].as_object().unwrap().is_empty());
        assert!(value["courses"].as_array().unwrap().is_empty());
        assert_eq!(value["behavior"]["session_count"], 0);
    }
}
