use std::fmt::Write as _;
use std::io::Write as _;

use arena_client::{
    ExperimentOption, ModelAssignment, ModelSlot, SessionSnapshot, SlotProgress,
};
use tokio::sync::watch;

fn progress_label(progress: SlotProgress) -> &'static str {
    match progress {
        SlotProgress::Pending => "waiting",
        SlotProgress::Streaming => "streaming",
        SlotProgress::Done => "done",
    }
}

/// One-line live status for both slots.
pub fn progress_line(snapshot: &SessionSnapshot) -> String {
    [ModelSlot::A, ModelSlot::B]
        .iter()
        .map(|&slot| {
            format!(
                "model {slot}: {} ({} chars)",
                progress_label(snapshot.progress.get(slot)),
                snapshot.text(slot).char_count()
            )
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Rewrites the status line on stderr until the controller goes away.
pub async fn watch_progress(mut updates: watch::Receiver<SessionSnapshot>) {
    let mut last = String::new();
    while updates.changed().await.is_ok() {
        let line = progress_line(&updates.borrow_and_update());
        if line != last {
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "\r{line}");
            let _ = stderr.flush();
            last = line;
        }
    }
}

/// Both completions under their anonymous labels.
pub fn format_round(snapshot: &SessionSnapshot) -> String {
    let mut out = String::new();
    for slot in [ModelSlot::A, ModelSlot::B] {
        let _ = writeln!(out, "----- model {slot} -----");
        let text = snapshot.text(slot);
        if text.is_empty() {
            out.push_str("(no output)\n");
        } else {
            let _ = write!(out, "{text}");
            if !text.ends_with('\n') {
                out.push('\n');
            }
        }
    }
    out
}

/// Which slot held which model, shown only after the choice is recorded.
pub fn format_reveal(assignment: ModelAssignment) -> String {
    format!(
        "model A was {}, model B was {}",
        assignment.identity_of(ModelSlot::A),
        assignment.identity_of(ModelSlot::B)
    )
}

pub fn format_experiments(options: &[ExperimentOption]) -> String {
    if options.is_empty() {
        return "no experiments configured\n".to_string();
    }
    let width = options.iter().map(|o| o.value.len()).max().unwrap_or(0);
    let mut out = String::new();
    for option in options {
        let _ = writeln!(
            out,
            "{:<width$}  {:<4}  {}",
            option.value,
            option.mode.as_str(),
            option.label
        );
    }
    out
}
