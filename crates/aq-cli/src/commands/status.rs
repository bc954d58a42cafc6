//! Status command for summarizing the aggregated snapshot.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use aq_core::Snapshot;

use super::util::{self, format_seconds};
use crate::Config;

pub fn run<W: Write>(writer: &mut W, config: &Config) -> Result<()> {
    let snapshot = util::with_background(config, |background| async move {
        Ok(background.snapshot().await?)
    })?;
    render(writer, &config.database_path, &snapshot)
}

/// Writes a human-readable summary of `snapshot`.
pub fn render<W: Write>(writer: &mut W, database_path: &Path, snapshot: &Snapshot) -> Result<()> {
    writeln!(writer, "academIQ status")?;
    writeln!(writer, "Database: {}", database_path.display())?;

    if snapshot.is_empty() {
        writeln!(writer, "No data available.")?;
        return Ok(());
    }

    let student = &snapshot.student;
    if let Some(student_id) = &student.student_id {
        let details: Vec<&str> = [student.program.as_deref(), student.enrollment_year.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if details.is_empty() {
            writeln!(writer, "Student: {student_id}")?;
        } else {
            writeln!(writer, "Student: {student_id} ({})", details.join(", "))?;
        }
    }

    if !snapshot.courses.is_empty() {
        writeln!(writer, "Courses:")?;
        for course in &snapshot.courses {
            let name = if course.course_name.is_empty() {
                String::new()
            } else {
                format!(" {}", course.course_name)
            };
            writeln!(
                writer,
                "- {}{name}: {} visits, {} clicks, {} on page, {} active days",
                course.course_id,
                course.total_visits,
                course.click_count,
                format_seconds(course.total_time_spent_seconds),
                course.active_days_count,
            )?;
        }
    }

    let behavior = &snapshot.behavior;
    writeln!(
        writer,
        "Sessions: {} (avg {}, {:.1} clicks each)",
        behavior.session_count,
        format_seconds(behavior.average_session_duration.max(0.0).round() as u64),
        behavior.clicks_per_session,
    )?;
    writeln!(
        writer,
        "Active days: {}, time on LMS: {}",
        behavior.active_days_count,
        format_seconds(behavior.total_time_spent_on_moodle),
    )?;
    if !behavior.peak_activity_hours.is_empty() {
        let hours: Vec<String> = behavior
            .peak_activity_hours
            .iter()
            .map(|hour| format!("{hour:02}:00"))
            .collect();
        writeln!(writer, "Peak hours: {}", hours.join(", "))?;
    }
    writeln!(
        writer,
        "Records: {} events, {} grades, {} materials",
        snapshot.events.len(),
        snapshot.grades.len(),
        snapshot.learning_materials.len(),
    )?;

    Ok(())
}
