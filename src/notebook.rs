use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::grading::ProblemStatus;
use crate::problems::Problem;

/// A detached copy of a problem the student got wrong.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MistakeEntry {
    #[serde(flatten)]
    pub problem: Problem,
    pub subject: String,
    #[serde(default)]
    pub added_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Added,
    AlreadyPresent,
    Removed,
    Unchanged,
}

impl SyncOutcome {
    pub fn changed(self) -> bool {
        matches!(self, SyncOutcome::Added | SyncOutcome::Removed)
    }
}

/// Keeps the notebook consistent with one problem's status. Entries are keyed
/// by question text; the first snapshot of a question wins.
pub fn sync(
    mistakes: &mut Vec<MistakeEntry>,
    problem: &Problem,
    subject: &str,
    max_entries: Option<usize>,
    now: &str,
) -> SyncOutcome {
    match problem.status {
        ProblemStatus::Incorrect => {
            if mistakes.iter().any(|m| m.problem.question == problem.question) {
                return SyncOutcome::AlreadyPresent;
            }
            mistakes.push(MistakeEntry {
                problem: problem.clone(),
                subject: subject.to_string(),
                added_at: now.to_string(),
            });
            if let Some(max) = max_entries {
                evict_oldest(mistakes, max.max(1));
            }
            SyncOutcome::Added
        }
        ProblemStatus::Correct => {
            let before = mistakes.len();
            mistakes.retain(|m| m.problem.question != problem.question);
            if mistakes.len() != before {
                SyncOutcome::Removed
            } else {
                SyncOutcome::Unchanged
            }
        }
        ProblemStatus::Unanswered => SyncOutcome::Unchanged,
    }
}

// Oldest `added_at` goes first; ties go in insertion order.
fn evict_oldest(mistakes: &mut Vec<MistakeEntry>, max: usize) {
    while mistakes.len() > max {
        let oldest = mistakes
            .iter()
            .enumerate()
            .min_by(|(ia, a), (ib, b)| a.added_at.cmp(&b.added_at).then(ia.cmp(ib)))
            .map(|(i, _)| i)
            .unwrap_or(0);
        mistakes.remove(oldest);
    }
}

/// The notebook, verbatim, as the problems for a review batch.
pub fn load_for_review(mistakes: &[MistakeEntry]) -> Result<Vec<Problem>, AppError> {
    if mistakes.is_empty() {
        return Err(AppError::NothingToReview);
    }
    Ok(mistakes.iter().map(|m| m.problem.clone()).collect())
}
