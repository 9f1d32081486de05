//! Synthetic execution plans.
//!
//! The backend does not report plans, so the executor synthesizes one for
//! prompts that look like multi-step work and advances it as tool calls
//! complete. Plans are advisory to the host.

use crate::protocol::{PlanEntry, PlanEntryPriority, PlanEntryStatus};

/// Action verbs that signal implementation work.
const ACTION_WORDS: &[&str] = &[
    "implement",
    "create",
    "build",
    "refactor",
    "restructure",
    "migrate",
    "optimize",
];

/// Sequencing words that signal ordered steps.
const STEP_WORDS: &[&str] = &[
    "first", "then", "next", "after", "finally", "step", "phase",
];

/// Prompt length past which a prompt counts as complex on its own.
const COMPLEX_LENGTH: usize = 200;

/// Maximum characters of prompt kept in a single-entry plan summary.
const SUMMARY_CHARS: usize = 72;

/// Whether the prompt warrants a synthesized plan.
#[must_use]
pub fn is_complex(prompt: &str) -> bool {
    if prompt.len() > COMPLEX_LENGTH {
        return true;
    }
    let words = word_set(prompt);
    ACTION_WORDS.iter().any(|w| words.contains(*w)) || STEP_WORDS.iter().any(|w| words.contains(*w))
}

/// Rough step-count estimate from sequencing and action vocabulary.
#[must_use]
pub fn estimate_steps(prompt: &str) -> usize {
    let lower = prompt.to_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    let step_hits = tokens.iter().filter(|t| STEP_WORDS.contains(t)).count();
    let action_hits = tokens.iter().filter(|t| ACTION_WORDS.contains(t)).count();

    (step_hits + action_hits).max(1)
}

/// Synthesize the initial plan for a prompt, or `None` when it is simple.
///
/// Three canonical entries for work that looks like three or more steps,
/// otherwise a single in-progress entry summarizing the request.
#[must_use]
pub fn synthesize(prompt: &str) -> Option<Vec<PlanEntry>> {
    if !is_complex(prompt) {
        return None;
    }

    if estimate_steps(prompt) >= 3 {
        Some(vec![
            PlanEntry {
                content: "Analyze requirements".into(),
                priority: PlanEntryPriority::High,
                status: PlanEntryStatus::InProgress,
            },
            PlanEntry {
                content: "Execute main implementation".into(),
                priority: PlanEntryPriority::High,
                status: PlanEntryStatus::Pending,
            },
            PlanEntry {
                content: "Validate and finalize changes".into(),
                priority: PlanEntryPriority::Medium,
                status: PlanEntryStatus::Pending,
            },
        ])
    } else {
        Some(vec![PlanEntry {
            content: summarize(prompt),
            priority: PlanEntryPriority::High,
            status: PlanEntryStatus::InProgress,
        }])
    }
}

/// Advance the plan after a completed tool call.
///
/// Marks the first in-progress entry completed and promotes the next
/// pending entry. Returns whether anything changed, so the caller knows to
/// schedule a (debounced) plan update. The completed prefix only grows and
/// at most one entry is in progress at any time.
pub fn advance(entries: &mut [PlanEntry]) -> bool {
    let Some(current) = entries
        .iter()
        .position(|e| e.status == PlanEntryStatus::InProgress)
    else {
        return false;
    };

    entries[current].status = PlanEntryStatus::Completed;
    if let Some(next) = entries
        .iter()
        .position(|e| e.status == PlanEntryStatus::Pending)
    {
        entries[next].status = PlanEntryStatus::InProgress;
    }
    true
}

/// One-line summary of a prompt for a single-entry plan.
#[must_use]
pub fn summarize(prompt: &str) -> String {
    let collapsed: String = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SUMMARY_CHARS {
        collapsed
    } else {
        let prefix: String = collapsed.chars().take(SUMMARY_CHARS).collect();
        format!("{prefix}\u{2026}")
    }
}

fn word_set(prompt: &str) -> std::collections::HashSet<String> {
    prompt
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}
