//! The screen state machine for the single active session.
//!
//! `Session` owns everything the old UI kept in globals: the active
//! student, the current batch, the hint walkthrough position and the
//! analysis lock. Every mutating action validates the current screen first,
//! mutates in memory, then writes the whole profile back through the
//! repository. A failed save never rolls back the in-memory state; the
//! snapshot reports `unsaved` until a later save succeeds.

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::analysis::{prepare_image, AnalysisError, AnalysisRequest};
use crate::config::Config;
use crate::error::AppError;
use crate::grading::{Grader, ProblemStatus};
use crate::ledger;
use crate::notebook::{self, SyncOutcome};
use crate::problems::{Batch, BatchSummary, Mode, Problem, RawProblem, HINT_STEPS};
use crate::profile::{now_timestamp, today, ProfileRepository, ProfileSummary, StudentProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Screen {
    Gate,
    Lobby,
    SubjectSelect,
    Upload,
    Analyzing,
    ProblemSelect,
    GradingSheet,
    HintWalkthrough,
}

impl Screen {
    pub fn as_str(self) -> &'static str {
        match self {
            Screen::Gate => "gate",
            Screen::Lobby => "lobby",
            Screen::SubjectSelect => "subjectSelect",
            Screen::Upload => "upload",
            Screen::Analyzing => "analyzing",
            Screen::ProblemSelect => "problemSelect",
            Screen::GradingSheet => "gradingSheet",
            Screen::HintWalkthrough => "hintWalkthrough",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Rules {
    pub hint_cost: u32,
    pub completion_reward: u32,
    pub max_mistakes: Option<usize>,
    pub max_image_bytes: usize,
}

impl Rules {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            hint_cost: cfg.hint_cost,
            completion_reward: cfg.completion_reward,
            max_mistakes: cfg.notebook.max_entries,
            max_image_bytes: cfg.max_image_bytes,
        }
    }
}

#[derive(Debug, Clone)]
struct HintState {
    problem_id: u32,
    index: usize,
    revealed: bool,
    return_to: Screen,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HintView {
    pub problem_id: u32,
    pub index: usize,
    pub steps: usize,
    pub hint: String,
    pub can_advance: bool,
    pub can_reveal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub credit_balance: u32,
}

/// A problem as the front-end sees it. The expected answer stays hidden
/// until the problem is solved or the answer was revealed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemView<'a> {
    pub id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<&'a str>,
    pub question: &'a str,
    pub student_answer: &'a str,
    pub status: ProblemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetView<'a> {
    pub mode: Mode,
    pub problems: Vec<ProblemView<'a>>,
    pub summary: BatchSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot<'a> {
    pub screen: Screen,
    pub mode: Option<Mode>,
    pub subject: Option<&'a str>,
    pub profile: Option<ProfileSummary>,
    pub hint_cost: u32,
    pub analyzing: bool,
    pub sheet: Option<SheetView<'a>>,
    pub hint: Option<HintView>,
    pub unsaved: bool,
}

/// Handed out by `begin_analysis`; the lock is held until the matching
/// `finish_analysis`.
#[derive(Debug, Clone)]
pub struct AnalysisTicket {
    pub seq: u64,
    pub request: AnalysisRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reward {
    pub credited: u32,
    pub credit_balance: u32,
}

pub struct Session {
    rules: Rules,
    grader: Grader,
    screen: Screen,
    profile: Option<StudentProfile>,
    mode: Option<Mode>,
    subject: Option<String>,
    batch: Option<Batch>,
    // Review batches mix subjects; indexed by problem id - 1.
    review_subjects: Vec<String>,
    revealed: BTreeSet<u32>,
    hint: Option<HintState>,
    analysis_seq: u64,
    in_flight: Option<u64>,
    unsaved: bool,
}

impl Session {
    pub fn new(cfg: &Config) -> Self {
        Self {
            rules: Rules::from_config(cfg),
            grader: Grader::with_units(&cfg.units),
            screen: Screen::Gate,
            profile: None,
            mode: None,
            subject: None,
            batch: None,
            review_subjects: Vec::new(),
            revealed: BTreeSet::new(),
            hint: None,
            analysis_seq: 0,
            in_flight: None,
            unsaved: false,
        }
    }

    /// Config changes (new workspace) apply to the next actions; the
    /// current screen is left alone.
    pub fn reconfigure(&mut self, cfg: &Config) {
        self.rules = Rules::from_config(cfg);
        self.grader = Grader::with_units(&cfg.units);
        debug!(units = ?self.grader.units(), hint_cost = self.rules.hint_cost, "session reconfigured");
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn profile(&self) -> Option<&StudentProfile> {
        self.profile.as_ref()
    }

    pub fn active_profile_id(&self) -> Option<&str> {
        self.profile.as_ref().map(|p| p.id.as_str())
    }

    #[cfg(test)]
    pub fn batch(&self) -> Option<&Batch> {
        self.batch.as_ref()
    }

    pub fn is_analyzing(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn unsaved(&self) -> bool {
        self.unsaved
    }

    pub fn snapshot(&self) -> SessionSnapshot<'_> {
        SessionSnapshot {
            screen: self.screen,
            mode: self.mode,
            subject: self.subject.as_deref(),
            profile: self.profile.as_ref().map(|p| p.summary()),
            hint_cost: self.rules.hint_cost,
            analyzing: self.is_analyzing(),
            sheet: self.sheet().ok(),
            hint: self.hint_view().ok(),
            unsaved: self.unsaved,
        }
    }

    pub fn sheet(&self) -> Result<SheetView<'_>, AppError> {
        let batch = self.batch.as_ref().ok_or(AppError::InvalidTransition {
            from: self.screen,
            action: "show problems",
        })?;
        Ok(SheetView {
            mode: batch.mode(),
            problems: batch.problems().iter().map(|p| self.problem_view(p)).collect(),
            summary: batch.summary(),
        })
    }

    pub fn problem(&self, id: u32) -> Result<ProblemView<'_>, AppError> {
        let batch = self.batch.as_ref().ok_or(AppError::ProblemNotFound(id))?;
        Ok(self.problem_view(batch.find_by_id(id)?))
    }

    fn problem_view<'a>(&self, p: &'a Problem) -> ProblemView<'a> {
        let visible = p.status == ProblemStatus::Correct || self.revealed.contains(&p.id);
        ProblemView {
            id: p.id,
            label: p.label.as_deref(),
            question: &p.question,
            student_answer: &p.student_answer,
            status: p.status,
            correct_answer: visible.then_some(p.correct_answer.as_str()),
        }
    }

    fn go(&mut self, to: Screen) {
        if self.screen != to {
            info!(from = self.screen.as_str(), to = to.as_str(), "screen transition");
        }
        self.screen = to;
    }

    fn expect_screen(&self, allowed: &[Screen], action: &'static str) -> Result<(), AppError> {
        if allowed.contains(&self.screen) {
            Ok(())
        } else {
            Err(AppError::InvalidTransition {
                from: self.screen,
                action,
            })
        }
    }

    fn profile_mut(&mut self) -> Result<&mut StudentProfile, AppError> {
        self.profile.as_mut().ok_or(AppError::NoActiveStudent)
    }

    fn clear_batch(&mut self) {
        self.batch = None;
        self.hint = None;
        self.review_subjects.clear();
        self.revealed.clear();
    }

    /// Whole-record save. Failure is logged and remembered, never propagated:
    /// the session keeps working from memory.
    fn persist(&mut self, repo: &dyn ProfileRepository) {
        let Some(profile) = self.profile.as_mut() else {
            return;
        };
        profile.updated_at = now_timestamp();
        match repo.save(profile) {
            Ok(()) => self.unsaved = false,
            Err(e) => {
                warn!(profile_id = %profile.id, error = %e, "profile save failed; keeping in-memory state");
                self.unsaved = true;
            }
        }
    }

    // Gate -> Lobby

    pub fn login(&mut self, repo: &dyn ProfileRepository, profile_id: &str) -> Result<&StudentProfile, AppError> {
        self.expect_screen(&[Screen::Gate], "log in")?;
        let mut profile = repo.load(profile_id)?;
        profile.mark_attended(&today());
        self.profile = Some(profile);
        self.mode = None;
        self.subject = None;
        self.clear_batch();
        self.unsaved = false;
        self.persist(repo);
        self.go(Screen::Lobby);
        self.profile.as_ref().ok_or(AppError::NoActiveStudent)
    }

    pub fn logout(&mut self) -> Result<(), AppError> {
        if self.screen == Screen::Analyzing {
            return Err(AppError::Busy);
        }
        self.profile = None;
        self.mode = None;
        self.subject = None;
        self.clear_batch();
        self.unsaved = false;
        self.go(Screen::Gate);
        Ok(())
    }

    pub fn set_photo(&mut self, repo: &dyn ProfileRepository, photo: Option<String>) -> Result<(), AppError> {
        self.profile_mut()?.photo = photo;
        self.persist(repo);
        Ok(())
    }

    // Lobby -> SubjectSelect | ProblemSelect (review)

    pub fn choose_mode(&mut self, mode: Mode) -> Result<Screen, AppError> {
        self.expect_screen(&[Screen::Lobby], "choose a mode")?;
        let profile = self.profile.as_ref().ok_or(AppError::NoActiveStudent)?;
        match mode {
            Mode::Explain | Mode::Grade => {
                self.mode = Some(mode);
                self.subject = None;
                self.go(Screen::SubjectSelect);
            }
            Mode::Review => {
                // An empty notebook keeps the student in the lobby.
                let problems = notebook::load_for_review(&profile.mistakes)?;
                let subjects = profile.mistakes.iter().map(|m| m.subject.clone()).collect();
                self.clear_batch();
                self.batch = Some(Batch::for_review(problems)?);
                self.review_subjects = subjects;
                self.mode = Some(Mode::Review);
                self.subject = None;
                self.go(Screen::ProblemSelect);
            }
        }
        Ok(self.screen)
    }

    // SubjectSelect -> Upload

    pub fn select_subject(&mut self, repo: &dyn ProfileRepository, subject: &str) -> Result<u32, AppError> {
        self.expect_screen(&[Screen::SubjectSelect], "select a subject")?;
        let subject = subject.trim();
        if subject.is_empty() {
            return Err(AppError::BadParams("subject must not be empty".to_string()));
        }
        let count = self.profile_mut()?.record_subject(subject);
        self.subject = Some(subject.to_string());
        self.persist(repo);
        self.go(Screen::Upload);
        Ok(count)
    }

    // Upload -> Analyzing

    /// Takes the single-flight lock. While it is held every further upload is
    /// rejected with `Busy` and changes nothing.
    pub fn begin_analysis(&mut self, image: &str) -> Result<AnalysisTicket, AppError> {
        if self.in_flight.is_some() {
            debug!("upload ignored: analysis already in flight");
            return Err(AppError::Busy);
        }
        self.expect_screen(&[Screen::Upload], "upload")?;
        let profile = self.profile.as_ref().ok_or(AppError::NoActiveStudent)?;
        let mode = self.mode.ok_or(AppError::InvalidTransition {
            from: self.screen,
            action: "upload",
        })?;
        let image = prepare_image(image, self.rules.max_image_bytes)?;
        let request = AnalysisRequest {
            image,
            mode,
            grade: profile.grade.clone(),
            subject: self.subject.clone().unwrap_or_default(),
        };
        self.analysis_seq += 1;
        self.in_flight = Some(self.analysis_seq);
        self.go(Screen::Analyzing);
        Ok(AnalysisTicket {
            seq: self.analysis_seq,
            request,
        })
    }

    // Analyzing -> ProblemSelect | GradingSheet | Upload

    /// Always releases the lock. Failures and empty results return to Upload
    /// without keeping any part of the batch.
    pub fn finish_analysis(
        &mut self,
        repo: &dyn ProfileRepository,
        seq: u64,
        result: Result<Vec<RawProblem>, AnalysisError>,
    ) -> Result<SheetView<'_>, AppError> {
        if self.in_flight != Some(seq) {
            return Err(AppError::InvalidTransition {
                from: self.screen,
                action: "finish analysis",
            });
        }
        self.in_flight = None;

        let mode = self.mode.unwrap_or(Mode::Explain);
        let built = result
            .map_err(AppError::from)
            .and_then(|records| Batch::from_raw(records, mode, &self.grader));
        let batch = match built {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "analysis failed; back to upload");
                self.clear_batch();
                self.go(Screen::Upload);
                return Err(e);
            }
        };
        info!(
            problems = batch.len(),
            mistakes = batch.mistakes().count(),
            mode = mode.as_str(),
            "batch ready"
        );

        self.clear_batch();
        let subject = self.subject.clone().unwrap_or_default();
        let max = self.rules.max_mistakes;
        let now = now_timestamp();
        let mut changed = false;
        if let Some(profile) = self.profile.as_mut() {
            for p in batch.problems() {
                changed |= notebook::sync(&mut profile.mistakes, p, &subject, max, &now).changed();
            }
        }
        self.batch = Some(batch);
        if changed {
            self.persist(repo);
        }
        self.go(match mode {
            Mode::Grade => Screen::GradingSheet,
            Mode::Explain | Mode::Review => Screen::ProblemSelect,
        });
        self.sheet()
    }

    /// Re-grades one answer, syncs the notebook, saves, and returns the
    /// whole sheet so aggregate completion stays consistent.
    pub fn answer(
        &mut self,
        repo: &dyn ProfileRepository,
        problem_id: u32,
        answer: &str,
    ) -> Result<SheetView<'_>, AppError> {
        self.expect_screen(&[Screen::GradingSheet, Screen::ProblemSelect], "answer")?;
        let subject = self.subject_for(problem_id);
        let max = self.rules.max_mistakes;
        let batch = self.batch.as_mut().ok_or(AppError::ProblemNotFound(problem_id))?;
        let problem = batch.update_answer(problem_id, answer, &self.grader)?.clone();
        debug!(problem_id, status = problem.status.as_str(), "answer graded");

        let profile = self.profile.as_mut().ok_or(AppError::NoActiveStudent)?;
        let outcome = notebook::sync(&mut profile.mistakes, &problem, &subject, max, &now_timestamp());
        if outcome != SyncOutcome::Unchanged {
            debug!(?outcome, problem_id, "notebook synced");
        }
        self.persist(repo);
        self.sheet()
    }

    fn subject_for(&self, problem_id: u32) -> String {
        if self.mode == Some(Mode::Review) {
            if let Some(s) = self.review_subjects.get(problem_id.saturating_sub(1) as usize) {
                return s.clone();
            }
        }
        self.subject.clone().unwrap_or_default()
    }

    // ProblemSelect | GradingSheet -> HintWalkthrough

    pub fn open_hint(&mut self, repo: &dyn ProfileRepository, problem_id: u32) -> Result<HintView, AppError> {
        self.expect_screen(&[Screen::ProblemSelect, Screen::GradingSheet], "open hints")?;
        let batch = self.batch.as_ref().ok_or(AppError::ProblemNotFound(problem_id))?;
        batch.find_by_id(problem_id)?;
        let cost = self.rules.hint_cost;
        ledger::debit(&mut self.profile_mut()?.credit_balance, cost)?;
        self.persist(repo);
        self.hint = Some(HintState {
            problem_id,
            index: 0,
            revealed: false,
            return_to: self.screen,
        });
        self.go(Screen::HintWalkthrough);
        self.hint_view()
    }

    pub fn next_hint(&mut self, repo: &dyn ProfileRepository) -> Result<HintView, AppError> {
        self.expect_screen(&[Screen::HintWalkthrough], "advance the hint")?;
        let index = self.hint.as_ref().map(|h| h.index).unwrap_or(0);
        if index + 1 >= HINT_STEPS {
            return Err(AppError::HintsExhausted);
        }
        let cost = self.rules.hint_cost;
        ledger::debit(&mut self.profile_mut()?.credit_balance, cost)?;
        self.persist(repo);
        if let Some(h) = self.hint.as_mut() {
            h.index += 1;
        }
        self.hint_view()
    }

    /// Free, and only after the last hint.
    pub fn reveal_answer(&mut self) -> Result<HintView, AppError> {
        self.expect_screen(&[Screen::HintWalkthrough], "reveal the answer")?;
        let hint = self.hint.as_mut().ok_or(AppError::InvalidTransition {
            from: Screen::HintWalkthrough,
            action: "reveal the answer",
        })?;
        if hint.index + 1 < HINT_STEPS {
            return Err(AppError::InvalidTransition {
                from: Screen::HintWalkthrough,
                action: "reveal the answer",
            });
        }
        hint.revealed = true;
        let id = hint.problem_id;
        self.revealed.insert(id);
        self.hint_view()
    }

    pub fn hint_done(&mut self) -> Result<Screen, AppError> {
        self.expect_screen(&[Screen::HintWalkthrough], "close hints")?;
        let back = self
            .hint
            .take()
            .map(|h| h.return_to)
            .unwrap_or(Screen::ProblemSelect);
        self.go(back);
        Ok(back)
    }

    pub fn hint_view(&self) -> Result<HintView, AppError> {
        let h = self.hint.as_ref().ok_or(AppError::InvalidTransition {
            from: self.screen,
            action: "show hints",
        })?;
        let batch = self.batch.as_ref().ok_or(AppError::ProblemNotFound(h.problem_id))?;
        let problem = batch.find_by_id(h.problem_id)?;
        let hint = problem
            .hints
            .get(h.index)
            .cloned()
            .ok_or(AppError::ProblemNotFound(h.problem_id))?;
        Ok(HintView {
            problem_id: h.problem_id,
            index: h.index,
            steps: HINT_STEPS,
            hint,
            can_advance: h.index + 1 < HINT_STEPS,
            can_reveal: h.index + 1 == HINT_STEPS && !h.revealed,
            answer: h.revealed.then(|| problem.correct_answer.clone()),
            credit_balance: self.profile.as_ref().map(|p| p.credit_balance).unwrap_or(0),
        })
    }

    // ProblemSelect | GradingSheet -> Lobby

    /// Credits the completion reward once per batch, and only after every
    /// problem in it is correct, whichever mode produced the batch.
    pub fn complete(&mut self, repo: &dyn ProfileRepository) -> Result<Reward, AppError> {
        self.expect_screen(&[Screen::GradingSheet, Screen::ProblemSelect], "complete")?;
        let batch = self.batch.as_ref().ok_or(AppError::NotComplete)?;
        if batch.rewarded() || !batch.all_solved() {
            return Err(AppError::NotComplete);
        }
        if let Some(b) = self.batch.as_mut() {
            b.mark_rewarded();
        }
        let reward = self.rules.completion_reward;
        let balance = ledger::credit(&mut self.profile_mut()?.credit_balance, reward);
        self.persist(repo);
        info!(reward, balance, "completion reward credited");
        self.clear_batch();
        self.mode = None;
        self.subject = None;
        self.go(Screen::Lobby);
        Ok(Reward {
            credited: reward,
            credit_balance: balance,
        })
    }

    pub fn back_to_lobby(&mut self) -> Result<(), AppError> {
        self.expect_screen(
            &[
                Screen::Lobby,
                Screen::SubjectSelect,
                Screen::Upload,
                Screen::ProblemSelect,
                Screen::GradingSheet,
            ],
            "go back",
        )?;
        self.clear_batch();
        self.mode = None;
        self.subject = None;
        self.go(Screen::Lobby);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisClient, FakeAnalysisClient};
    use crate::profile::{self, MemoryProfileStore};
    use serde_json::json;

    const IMAGE: &str = "aGVsbG8=";

    fn setup(balance: u32) -> (Session, MemoryProfileStore, String) {
        let repo = MemoryProfileStore::default();
        let p = profile::create(&repo, "はなこ", "2", None, balance).expect("create");
        let mut s = Session::new(&Config::default());
        s.login(&repo, &p.id).expect("login");
        (s, repo, p.id)
    }

    fn records(body: serde_json::Value) -> Result<Vec<RawProblem>, AnalysisError> {
        crate::analysis::parse_problems(body)
    }

    fn to_sheet(s: &mut Session, repo: &MemoryProfileStore, mode: Mode, body: serde_json::Value) {
        s.choose_mode(mode).expect("mode");
        s.select_subject(repo, "さんすう").expect("subject");
        let t = s.begin_analysis(IMAGE).expect("begin");
        s.finish_analysis(repo, t.seq, records(body)).expect("finish");
    }

    fn worksheet() -> serde_json::Value {
        json!([
            { "id": 1, "question": "5+5", "correct_answer": "10", "student_answer": "１０cm",
              "hints": ["h1", "h2", "h3"] },
            { "id": 1, "question": "2+2", "correct_answer": "4", "student_answer": "5",
              "hints": ["g1", "g2", "g3"] }
        ])
    }

    fn assert_notebook_consistent(s: &Session) {
        let profile = s.profile().expect("profile");
        for p in s.batch().expect("batch").problems() {
            let n = profile.mistakes.iter().filter(|m| m.problem.question == p.question).count();
            match p.status {
                ProblemStatus::Correct => assert_eq!(n, 0, "{} should not be in notebook", p.question),
                ProblemStatus::Incorrect => assert_eq!(n, 1, "{} should be in notebook once", p.question),
                ProblemStatus::Unanswered => {}
            }
        }
    }

    #[test]
    fn login_records_attendance_and_enters_lobby() {
        let (s, repo, id) = setup(50);
        assert_eq!(s.screen(), Screen::Lobby);
        let stored = repo.stored(&id).expect("stored");
        assert_eq!(stored.attendance.get(&today()), Some(&true));
    }

    #[test]
    fn login_with_unknown_profile_stays_at_gate() {
        let repo = MemoryProfileStore::default();
        let mut s = Session::new(&Config::default());
        assert!(matches!(s.login(&repo, "nope"), Err(AppError::ProfileNotFound(_))));
        assert_eq!(s.screen(), Screen::Gate);
    }

    #[test]
    fn actions_need_the_right_screen() {
        let (mut s, repo, _) = setup(50);
        assert!(matches!(
            s.select_subject(&repo, "さんすう"),
            Err(AppError::InvalidTransition { from: Screen::Lobby, .. })
        ));
        assert!(matches!(s.begin_analysis(IMAGE), Err(AppError::InvalidTransition { .. })));
        assert!(matches!(s.next_hint(&repo), Err(AppError::InvalidTransition { .. })));
    }

    #[test]
    fn subject_selection_counts_history() {
        let (mut s, repo, id) = setup(50);
        s.choose_mode(Mode::Explain).expect("mode");
        assert_eq!(s.select_subject(&repo, "さんすう").expect("subject"), 1);
        assert_eq!(s.screen(), Screen::Upload);
        s.back_to_lobby().expect("back");
        s.choose_mode(Mode::Grade).expect("mode");
        assert_eq!(s.select_subject(&repo, "さんすう").expect("subject"), 2);
        assert_eq!(repo.stored(&id).expect("stored").history.get("さんすう"), Some(&2));
    }

    #[test]
    fn single_flight_lock_rejects_second_upload() {
        let (mut s, repo, _) = setup(50);
        s.choose_mode(Mode::Explain).expect("mode");
        s.select_subject(&repo, "さんすう").expect("subject");
        let t = s.begin_analysis(IMAGE).expect("begin");
        assert_eq!(s.screen(), Screen::Analyzing);
        assert!(matches!(s.begin_analysis(IMAGE), Err(AppError::Busy)));
        assert!(matches!(s.logout(), Err(AppError::Busy)));
        assert_eq!(s.screen(), Screen::Analyzing);
        s.finish_analysis(&repo, t.seq, records(worksheet())).expect("finish");
        assert!(!s.is_analyzing());
        assert_eq!(s.screen(), Screen::ProblemSelect);
    }

    #[test]
    fn empty_result_returns_to_upload_and_releases_lock() {
        let (mut s, repo, _) = setup(50);
        s.choose_mode(Mode::Grade).expect("mode");
        s.select_subject(&repo, "さんすう").expect("subject");
        let client = FakeAnalysisClient::always(json!([]));
        let t = s.begin_analysis(IMAGE).expect("begin");
        let err = s.finish_analysis(&repo, t.seq, client.analyze(&t.request)).unwrap_err();
        assert_eq!(err.code(), "analysis_failed");
        assert_eq!(s.screen(), Screen::Upload);
        assert!(!s.is_analyzing());
        assert!(s.batch().is_none());
        // Retry is possible right away.
        assert!(s.begin_analysis(IMAGE).is_ok());
    }

    #[test]
    fn transport_failure_returns_to_upload() {
        let (mut s, repo, _) = setup(50);
        s.choose_mode(Mode::Explain).expect("mode");
        s.select_subject(&repo, "こくご").expect("subject");
        let t = s.begin_analysis(IMAGE).expect("begin");
        let res = s.finish_analysis(&repo, t.seq, Err(AnalysisError::Status(502)));
        assert!(matches!(res, Err(AppError::AnalysisFailed(AnalysisError::Status(502)))));
        assert_eq!(s.screen(), Screen::Upload);
        assert!(!s.is_analyzing());
    }

    #[test]
    fn invalid_image_keeps_upload_screen_unlocked() {
        let (mut s, repo, _) = setup(50);
        s.choose_mode(Mode::Explain).expect("mode");
        s.select_subject(&repo, "こくご").expect("subject");
        assert!(matches!(
            s.begin_analysis("not base64!"),
            Err(AppError::AnalysisFailed(AnalysisError::InvalidImage(_)))
        ));
        assert_eq!(s.screen(), Screen::Upload);
        assert!(!s.is_analyzing());
    }

    #[test]
    fn grade_mode_routes_to_sheet_and_fills_notebook() {
        let (mut s, repo, id) = setup(50);
        to_sheet(&mut s, &repo, Mode::Grade, worksheet());
        assert_eq!(s.screen(), Screen::GradingSheet);
        let ids: Vec<u32> = s.batch().expect("batch").problems().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(s.batch().expect("batch").problems()[0].status, ProblemStatus::Correct);
        assert_notebook_consistent(&s);
        assert_eq!(repo.stored(&id).expect("stored").mistakes.len(), 1);
    }

    #[test]
    fn correcting_an_answer_clears_the_notebook_entry() {
        let (mut s, repo, id) = setup(50);
        to_sheet(&mut s, &repo, Mode::Grade, worksheet());
        let sheet = s.answer(&repo, 2, "４").expect("answer");
        assert!(sheet.summary.all_solved);
        assert_eq!(sheet.problems.len(), 2);
        assert_notebook_consistent(&s);
        assert!(repo.stored(&id).expect("stored").mistakes.is_empty());

        s.answer(&repo, 2, "3").expect("answer");
        assert_notebook_consistent(&s);
        assert_eq!(repo.stored(&id).expect("stored").mistakes.len(), 1);
    }

    #[test]
    fn answer_for_unknown_problem_is_not_found() {
        let (mut s, repo, _) = setup(50);
        to_sheet(&mut s, &repo, Mode::Grade, worksheet());
        let err = s.answer(&repo, 99, "1").unwrap_err();
        assert_eq!(err.code(), "not_found");
        assert_eq!(err.user_message(), "data not found");
    }

    #[test]
    fn hint_rejected_when_balance_below_cost() {
        let (mut s, repo, id) = setup(3);
        to_sheet(&mut s, &repo, Mode::Explain, worksheet());
        let saves = repo.save_count.get();
        let err = s.open_hint(&repo, 1).unwrap_err();
        assert!(matches!(err, AppError::InsufficientCredit { balance: 3, cost: 5 }));
        assert_eq!(s.screen(), Screen::ProblemSelect);
        assert_eq!(s.profile().expect("profile").credit_balance, 3);
        assert_eq!(repo.stored(&id).expect("stored").credit_balance, 3);
        assert_eq!(repo.save_count.get(), saves);
    }

    #[test]
    fn hint_walkthrough_debits_each_step_and_reveal_is_free() {
        let (mut s, repo, id) = setup(50);
        to_sheet(&mut s, &repo, Mode::Explain, worksheet());

        let v = s.open_hint(&repo, 2).expect("open");
        assert_eq!((v.index, v.hint.as_str(), v.credit_balance), (0, "g1", 45));
        assert!(v.can_advance && !v.can_reveal);
        assert!(matches!(s.reveal_answer(), Err(AppError::InvalidTransition { .. })));

        let v = s.next_hint(&repo).expect("next");
        assert_eq!((v.index, v.credit_balance), (1, 40));
        let v = s.next_hint(&repo).expect("next");
        assert_eq!((v.index, v.hint.as_str(), v.credit_balance), (2, "g3", 35));
        assert!(!v.can_advance && v.can_reveal);
        assert!(matches!(s.next_hint(&repo), Err(AppError::HintsExhausted)));

        let v = s.reveal_answer().expect("reveal");
        assert_eq!(v.answer.as_deref(), Some("4"));
        assert_eq!(v.credit_balance, 35);
        assert_eq!(repo.stored(&id).expect("stored").credit_balance, 35);
        assert_eq!(s.problem(2).expect("problem").correct_answer, Some("4"));

        assert_eq!(s.hint_done().expect("done"), Screen::ProblemSelect);
        assert!(s.snapshot().hint.is_none());
    }

    #[test]
    fn failed_advance_keeps_hint_index() {
        let (mut s, repo, _) = setup(7);
        to_sheet(&mut s, &repo, Mode::Explain, worksheet());
        s.open_hint(&repo, 1).expect("open");
        assert!(matches!(s.next_hint(&repo), Err(AppError::InsufficientCredit { .. })));
        let v = s.hint_view().expect("view");
        assert_eq!((v.index, v.credit_balance), (0, 2));
    }

    #[test]
    fn hint_returns_to_grading_sheet() {
        let (mut s, repo, _) = setup(50);
        to_sheet(&mut s, &repo, Mode::Grade, worksheet());
        s.open_hint(&repo, 2).expect("open");
        assert_eq!(s.hint_done().expect("done"), Screen::GradingSheet);
    }

    #[test]
    fn answers_stay_hidden_until_solved() {
        let (mut s, repo, _) = setup(50);
        to_sheet(&mut s, &repo, Mode::Grade, worksheet());
        assert_eq!(s.problem(1).expect("p1").correct_answer, Some("10"));
        assert_eq!(s.problem(2).expect("p2").correct_answer, None);
    }

    #[test]
    fn all_solved_credits_reward_once_and_returns_to_lobby() {
        let (mut s, repo, id) = setup(50);
        to_sheet(&mut s, &repo, Mode::Grade, worksheet());
        assert!(matches!(s.complete(&repo), Err(AppError::NotComplete)));
        s.answer(&repo, 2, "4").expect("answer");
        let r = s.complete(&repo).expect("complete");
        assert_eq!(r, Reward { credited: 100, credit_balance: 150 });
        assert_eq!(s.screen(), Screen::Lobby);
        assert!(s.batch().is_none());
        assert!(matches!(s.complete(&repo), Err(AppError::InvalidTransition { .. })));
        assert_eq!(repo.stored(&id).expect("stored").credit_balance, 150);
    }

    #[test]
    fn review_with_empty_notebook_stays_in_lobby() {
        let (mut s, _repo, _) = setup(50);
        assert!(matches!(s.choose_mode(Mode::Review), Err(AppError::NothingToReview)));
        assert_eq!(s.screen(), Screen::Lobby);
        assert!(s.batch().is_none());
    }

    #[test]
    fn review_reserves_mistakes_and_clears_them_when_fixed() {
        let (mut s, repo, id) = setup(50);
        to_sheet(&mut s, &repo, Mode::Grade, worksheet());
        s.back_to_lobby().expect("back");

        assert_eq!(s.choose_mode(Mode::Review).expect("review"), Screen::ProblemSelect);
        let batch = s.batch().expect("batch");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.problems()[0].id, 1);
        assert_eq!(batch.problems()[0].question, "2+2");

        s.answer(&repo, 1, "4").expect("answer");
        assert!(repo.stored(&id).expect("stored").mistakes.is_empty());
        let r = s.complete(&repo).expect("complete");
        assert_eq!(r.credited, 100);
    }

    #[test]
    fn complete_outside_the_sheet_needs_every_problem_solved() {
        let (mut s, repo, id) = setup(50);
        to_sheet(&mut s, &repo, Mode::Grade, worksheet());
        s.back_to_lobby().expect("back");

        s.choose_mode(Mode::Review).expect("review");
        assert!(matches!(s.complete(&repo), Err(AppError::NotComplete)));
        assert_eq!(s.screen(), Screen::ProblemSelect);
        assert_eq!(s.profile().expect("profile").credit_balance, 50);
        assert_eq!(repo.stored(&id).expect("stored").credit_balance, 50);
        s.back_to_lobby().expect("back");

        to_sheet(&mut s, &repo, Mode::Explain, worksheet());
        assert_eq!(s.screen(), Screen::ProblemSelect);
        assert!(matches!(s.complete(&repo), Err(AppError::NotComplete)));
        s.answer(&repo, 1, "10").expect("answer");
        s.answer(&repo, 2, "4").expect("answer");
        assert_eq!(s.complete(&repo).expect("complete").credit_balance, 150);
    }

    #[test]
    fn save_failure_is_reported_but_state_continues() {
        let (mut s, repo, id) = setup(50);
        to_sheet(&mut s, &repo, Mode::Explain, worksheet());
        repo.fail_saves.set(true);
        let v = s.open_hint(&repo, 1).expect("open");
        assert_eq!(v.credit_balance, 45);
        assert!(s.unsaved());
        assert!(s.snapshot().unsaved);
        assert_eq!(repo.stored(&id).expect("stored").credit_balance, 50);

        repo.fail_saves.set(false);
        s.next_hint(&repo).expect("next");
        assert!(!s.unsaved());
        assert_eq!(repo.stored(&id).expect("stored").credit_balance, 40);
    }

    #[test]
    fn stale_ticket_is_rejected() {
        let (mut s, repo, _) = setup(50);
        s.choose_mode(Mode::Explain).expect("mode");
        s.select_subject(&repo, "さんすう").expect("subject");
        let t = s.begin_analysis(IMAGE).expect("begin");
        assert!(s.finish_analysis(&repo, t.seq + 1, records(worksheet())).is_err());
        assert!(s.is_analyzing());
        assert!(s.finish_analysis(&repo, t.seq, records(worksheet())).is_ok());
    }

    #[test]
    fn logout_returns_to_gate() {
        let (mut s, repo, _) = setup(50);
        to_sheet(&mut s, &repo, Mode::Explain, worksheet());
        s.logout().expect("logout");
        assert_eq!(s.screen(), Screen::Gate);
        assert!(s.profile().is_none());
        assert!(s.batch().is_none());
    }
}
