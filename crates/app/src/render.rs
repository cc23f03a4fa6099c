//! Plain-text rendering of labs for the terminal.

use std::fmt::Write as _;

use lab_core::LabSession;
use lab_core::model::{
    CompletionReport, InfoBlock, LabStatus, LabSummary, MAX_ATTEMPTS, StudentDashboard, Task,
    TaskKind,
};

#[must_use]
pub fn html_to_text(input: &str) -> String {
    let markdown = html2md::parse_html(input);
    normalize_text(&markdown)
}

/// Tidy converted markdown for the terminal: drop bold markers, trim line
/// ends and keep at most one blank line between paragraphs.
#[must_use]
pub fn normalize_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut gap = false;
    for line in input.lines() {
        let line = line.trim_end().replace("**", "");
        if line.is_empty() {
            gap = !out.is_empty();
            continue;
        }
        if gap {
            out.push('\n');
            gap = false;
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}

#[must_use]
pub fn format_elapsed(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}

fn status_label(status: LabStatus) -> &'static str {
    match status {
        LabStatus::NotStarted => "not started",
        LabStatus::InProgress => "in progress",
        LabStatus::Completed => "completed",
    }
}

#[must_use]
pub fn lab_list(labs: &[LabSummary]) -> String {
    let mut out = String::new();
    for lab in labs {
        let _ = write!(
            out,
            "{:>3}  {}  [{}]",
            lab.id.value(),
            lab.title,
            lab.difficulty
        );
        if lab.max_score > 0 {
            let _ = write!(out, "  max {} pts", lab.max_score);
        }
        out.push('\n');
    }
    out
}

#[must_use]
pub fn dashboard(dashboard: &StudentDashboard) -> String {
    let stats = &dashboard.stats;
    let mut out = format!(
        "Completed {}/{} labs, success rate {:.1}%, average score {:.1}\n\n",
        stats.completed_labs, stats.total_labs, stats.success_rate, stats.average_score
    );
    let mut labs: Vec<_> = dashboard.labs.iter().collect();
    labs.sort_by_key(|lab| lab.summary.order);
    for lab in labs {
        let marker = if lab.can_start { ' ' } else { '#' };
        let _ = writeln!(
            out,
            "{marker} {:>3}  {:<40} {:<12} {:>3} pts",
            lab.summary.id.value(),
            lab.summary.title,
            status_label(lab.status),
            lab.score
        );
    }
    if let Some(next) = dashboard.next_open_lab() {
        let _ = writeln!(out, "\nNext: labdesk open {}", next.summary.id.value());
    }
    out
}

fn info_block(block: &InfoBlock) -> String {
    format!("== {} ==\n{}", block.title, html_to_text(&block.body))
}

#[must_use]
pub fn task(task: &Task) -> String {
    let mut out = format!(
        "Task {} [{}] {}\n",
        task.number(),
        task.state(),
        task.question()
    );
    if let TaskKind::Choice { options } = task.kind() {
        for (index, option) in options.iter().enumerate() {
            let selected = task.pending_answer() == Some(option.as_str());
            let mark = if selected { '*' } else { ' ' };
            let _ = writeln!(out, "  {mark}{}) {option}", index + 1);
        }
    } else if let Some(text) = task.pending_answer() {
        let _ = writeln!(out, "  > {text}");
    }
    if task.attempts() > 0 {
        let _ = writeln!(
            out,
            "  attempts {}/{MAX_ATTEMPTS}, score {}",
            task.attempts(),
            task.score()
        );
    }
    out
}

#[must_use]
pub fn session(session: &LabSession) -> String {
    let summary = session.summary();
    let mut out = format!(
        "{} ({}, {})\n",
        summary.title,
        status_label(session.status()),
        format_elapsed(session.elapsed_seconds())
    );
    if let Some(description) = &summary.description {
        let _ = writeln!(out, "{description}");
    }
    out.push('\n');
    for block in session.info_blocks() {
        out.push_str(&info_block(block));
        out.push('\n');
    }
    for item in session.tasks() {
        out.push_str(&task(item));
    }
    let progress = session.progress();
    if progress.total > 0 {
        let _ = writeln!(
            out,
            "\n{} of {} tasks correct, {} pts",
            progress.correct, progress.total, progress.score
        );
    }
    out
}

#[must_use]
pub fn report(report: &CompletionReport) -> String {
    let mut out = format!(
        "Lab completed: {}/{} pts in {}\n",
        report.score,
        report.max_score,
        format_elapsed(report.total_time_seconds)
    );
    if let (Some(start), Some(end)) = (report.started_at, report.ended_at) {
        let _ = writeln!(
            out,
            "Started {}, finished {}",
            start.format("%Y-%m-%d %H:%M"),
            end.format("%Y-%m-%d %H:%M")
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_is_flattened_to_text() {
        let text = html_to_text("<p>Hello</p>\r\n<p>World</p>");
        assert_eq!(text, "Hello\n\nWorld\n");
    }

    #[test]
    fn blank_runs_collapse() {
        assert_eq!(normalize_text("\n\na  \n\n\n\nb\t\n\n"), "a\n\nb\n");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn bold_markers_are_dropped() {
        assert_eq!(
            normalize_text("Log in as **kali**\r\n"),
            "Log in as kali\n"
        );
    }

    #[test]
    fn elapsed_is_clock_formatted() {
        assert_eq!(format_elapsed(0), "00:00");
        assert_eq!(format_elapsed(75), "01:15");
        assert_eq!(format_elapsed(3_725), "1:02:05");
    }
}
