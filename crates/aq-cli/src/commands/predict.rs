//! Predict command: sends the sanitized export to the backend for a risk
//! assessment.

use std::io::Write;

use anyhow::{Context, Result};
use aq_predict::{Client, Prediction};

use super::util;
use crate::Config;

pub fn run<W: Write>(writer: &mut W, config: &Config, json: bool) -> Result<()> {
    let client = Client::new(&config.backend_url).context("failed to create backend client")?;
    let prediction = util::with_background(config, |background| async move {
        let export = background.export().await?;
        tracing::debug!(
            courses = export.courses.len(),
            events = export.events.len(),
            "requesting prediction"
        );
        client
            .assess(&export)
            .await
            .context("failed to get prediction")
    })?;
    render(writer, &prediction, json)
}

fn render<W: Write>(writer: &mut W, prediction: &Prediction, json: bool) -> Result<()> {
    if json {
        writeln!(writer, "{}", serde_json::to_string(prediction)?)?;
    } else {
        writeln!(
            writer,
            "Risk level: {} (cluster {})",
            prediction.risk_level, prediction.risk_cluster
        )?;
        if !prediction.recommendation.is_empty() {
            writeln!(writer, "Recommendation: {}", prediction.recommendation)?;
        }
    }
    Ok(())
}
