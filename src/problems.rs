use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::grading::{Grader, ProblemStatus};

pub const HINT_STEPS: usize = 3;

pub const FALLBACK_HINTS: [&str; HINT_STEPS] = [
    "問題文をもう一度ゆっくり読んでみよう。",
    "わかっていることと、聞かれていることを分けて考えてみよう。",
    "式を立てて、ひとつずつ計算してみよう。",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Explain,
    Grade,
    Review,
}

impl Mode {
    pub fn parse(s: &str) -> Option<Mode> {
        match s.trim() {
            "explain" => Some(Mode::Explain),
            "grade" => Some(Mode::Grade),
            "review" => Some(Mode::Review),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Explain => "explain",
            Mode::Grade => "grade",
            Mode::Review => "review",
        }
    }
}

/// One record as returned by the analysis service. Nothing here is trusted:
/// `id` is ignored and `hints` may be any JSON value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProblem {
    #[serde(default)]
    #[allow(dead_code)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub question: String,
    #[serde(default, alias = "correctAnswer")]
    pub correct_answer: String,
    #[serde(default, alias = "studentAnswer")]
    pub student_answer: Option<String>,
    #[serde(default)]
    pub hints: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub question: String,
    pub correct_answer: String,
    #[serde(default)]
    pub student_answer: String,
    pub status: ProblemStatus,
    pub hints: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub correct: usize,
    pub incorrect: usize,
    pub unanswered: usize,
    pub all_solved: bool,
}

/// The problems transcribed from one upload (or re-served from the notebook).
#[derive(Debug, Clone)]
pub struct Batch {
    mode: Mode,
    problems: Vec<Problem>,
    rewarded: bool,
}

impl Batch {
    /// Builds a batch from service records. Ids are the 1-based position in
    /// `records`; in grade mode the AI-read answers are graded right away.
    pub fn from_raw(records: Vec<RawProblem>, mode: Mode, grader: &Grader) -> Result<Self, AppError> {
        if records.is_empty() {
            return Err(AppError::AnalysisFailed(crate::analysis::AnalysisError::Empty));
        }
        let problems = records
            .into_iter()
            .enumerate()
            .map(|(i, raw)| {
                let hints = sanitize_hints(&raw.hints, &raw.correct_answer, grader);
                let student_answer = match mode {
                    Mode::Grade => raw.student_answer.unwrap_or_default().trim().to_string(),
                    Mode::Explain | Mode::Review => String::new(),
                };
                let status = match mode {
                    Mode::Grade => grader.grade(&student_answer, &raw.correct_answer),
                    Mode::Explain | Mode::Review => ProblemStatus::Unanswered,
                };
                Problem {
                    id: (i + 1) as u32,
                    label: raw.label.filter(|l| !l.trim().is_empty()),
                    question: raw.question,
                    correct_answer: raw.correct_answer,
                    student_answer,
                    status,
                    hints,
                }
            })
            .collect();
        Ok(Self {
            mode,
            problems,
            rewarded: false,
        })
    }

    /// Review batches re-serve notebook snapshots as fresh, unanswered problems.
    pub fn for_review(snapshots: Vec<Problem>) -> Result<Self, AppError> {
        if snapshots.is_empty() {
            return Err(AppError::NothingToReview);
        }
        let problems = snapshots
            .into_iter()
            .enumerate()
            .map(|(i, p)| Problem {
                id: (i + 1) as u32,
                student_answer: String::new(),
                status: ProblemStatus::Unanswered,
                ..p
            })
            .collect();
        Ok(Self {
            mode: Mode::Review,
            problems,
            rewarded: false,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn find_by_id(&self, id: u32) -> Result<&Problem, AppError> {
        self.problems
            .iter()
            .find(|p| p.id == id)
            .ok_or(AppError::ProblemNotFound(id))
    }

    /// Re-grades a single problem with the new answer and returns the updated copy.
    pub fn update_answer(&mut self, id: u32, answer: &str, grader: &Grader) -> Result<&Problem, AppError> {
        let problem = self
            .problems
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(AppError::ProblemNotFound(id))?;
        problem.student_answer = answer.trim().to_string();
        problem.status = grader.grade(&problem.student_answer, &problem.correct_answer);
        Ok(&*problem)
    }

    pub fn mistakes(&self) -> impl Iterator<Item = &Problem> {
        self.problems
            .iter()
            .filter(|p| p.status == ProblemStatus::Incorrect)
    }

    pub fn all_solved(&self) -> bool {
        self.problems
            .iter()
            .all(|p| p.status == ProblemStatus::Correct)
    }

    pub fn summary(&self) -> BatchSummary {
        let mut s = BatchSummary {
            total: self.problems.len(),
            ..BatchSummary::default()
        };
        for p in &self.problems {
            match p.status {
                ProblemStatus::Correct => s.correct += 1,
                ProblemStatus::Incorrect => s.incorrect += 1,
                ProblemStatus::Unanswered => s.unanswered += 1,
            }
        }
        s.all_solved = s.total > 0 && s.correct == s.total;
        s
    }

    pub fn rewarded(&self) -> bool {
        self.rewarded
    }

    pub fn mark_rewarded(&mut self) {
        self.rewarded = true;
    }
}

/// Exactly three non-empty strings, or the generic sequence. The two vague
/// entries must not give the answer away; an offending entry is swapped for
/// the generic hint at the same step.
fn sanitize_hints(raw: &serde_json::Value, correct_answer: &str, grader: &Grader) -> Vec<String> {
    let parsed: Option<Vec<String>> = raw.as_array().and_then(|arr| {
        arr.iter()
            .map(|v| v.as_str().map(|s| s.trim().to_string()))
            .collect::<Option<Vec<_>>>()
    });
    let mut hints = match parsed {
        Some(h) if h.len() == HINT_STEPS && h.iter().all(|s| !s.is_empty()) => h,
        _ => return FALLBACK_HINTS.iter().map(|s| s.to_string()).collect(),
    };

    let answer = grader.normalize(correct_answer);
    if answer.is_empty() {
        return hints;
    }
    for (i, hint) in hints.iter_mut().enumerate().take(HINT_STEPS - 1) {
        if reveals_answer(&grader.normalize(hint), &answer) {
            *hint = FALLBACK_HINTS[i].to_string();
        }
    }
    hints
}

// Short answers ("3") appear in ordinary hint text, so only an exact match
// counts for them.
fn reveals_answer(hint: &str, answer: &str) -> bool {
    if answer.chars().count() < 2 {
        hint == answer
    } else {
        hint.contains(answer)
    }
}
