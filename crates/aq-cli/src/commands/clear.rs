//! Clear commands: erase everything, or one course.

use std::io::Write;

use anyhow::{Context, Result, bail};
use aq_core::{CourseId, Inbound, Message};

use super::util;
use crate::Config;

/// Erases the whole snapshot.
pub fn run<W: Write>(writer: &mut W, config: &Config) -> Result<()> {
    send(config, Message::ClearData)?;
    writeln!(writer, "Cleared all data.")?;
    Ok(())
}

/// Removes one course's metrics, keeping logs and the behavior aggregate.
pub fn run_course<W: Write>(writer: &mut W, config: &Config, course_id: &str) -> Result<()> {
    let course_id = CourseId::new(course_id).context("invalid course ID")?;
    send(
        config,
        Message::ClearCourse {
            course_id: course_id.clone(),
        },
    )?;
    writeln!(writer, "Cleared course {course_id}.")?;
    Ok(())
}

fn send(config: &Config, message: Message) -> Result<()> {
    util::with_background(config, |background| async move {
        let reply = background
            .handle(Inbound::Message {
                tab_id: None,
                message,
            })
            .await;
        if !reply.success {
            bail!(
                "aggregator rejected the request: {}",
                reply.error.unwrap_or_default()
            );
        }
        Ok(())
    })
}
