use thiserror::Error;

use crate::analysis::AnalysisError;
use crate::session::Screen;

/// Everything a session action can fail with. Each variant maps to a stable
/// IPC error code; the front-end picks the mascot line from the code.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("not enough karikari: balance {balance}, need {cost}")]
    InsufficientCredit { balance: u32, cost: u32 },

    #[error("analysis failed: {0}")]
    AnalysisFailed(#[from] AnalysisError),

    #[error("data not found (profile {0})")]
    ProfileNotFound(String),

    #[error("data not found (problem {0})")]
    ProblemNotFound(u32),

    #[error("storage unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("an analysis is already in progress")]
    Busy,

    #[error("cannot {action} from {from:?}")]
    InvalidTransition { from: Screen, action: &'static str },

    #[error("the mistake notebook is empty")]
    NothingToReview,

    #[error("no active student")]
    NoActiveStudent,

    #[error("no more hints for this problem")]
    HintsExhausted,

    #[error("the batch is not finished yet")]
    NotComplete,

    #[error("{0}")]
    BadParams(String),

    #[error("select a workspace first")]
    NoWorkspace,
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InsufficientCredit { .. } => "insufficient_credit",
            AppError::AnalysisFailed(_) => "analysis_failed",
            AppError::ProfileNotFound(_) | AppError::ProblemNotFound(_) => "not_found",
            AppError::PersistenceUnavailable(_) => "persistence_unavailable",
            AppError::Busy => "busy",
            AppError::InvalidTransition { .. } => "invalid_state",
            AppError::NothingToReview => "notebook_empty",
            AppError::NoActiveStudent => "no_student",
            AppError::HintsExhausted => "hints_exhausted",
            AppError::NotComplete => "not_complete",
            AppError::BadParams(_) => "bad_params",
            AppError::NoWorkspace => "no_workspace",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::InsufficientCredit { balance, cost } => {
                Some(serde_json::json!({ "balance": balance, "cost": cost }))
            }
            AppError::AnalysisFailed(e) => Some(serde_json::json!({ "reason": e.reason() })),
            AppError::InvalidTransition { from, action } => {
                Some(serde_json::json!({ "screen": from.as_str(), "action": action }))
            }
            _ => None,
        }
    }

    /// Not-found errors carry internal ids; the user only ever sees the generic line.
    pub fn user_message(&self) -> String {
        match self {
            AppError::ProfileNotFound(_) | AppError::ProblemNotFound(_) => {
                "data not found".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn response(&self, id: &str) -> serde_json::Value {
        crate::ipc::err(id, self.code(), self.user_message(), self.details())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::PersistenceUnavailable(e.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::PersistenceUnavailable(format!("{e:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_hides_internal_ids() {
        let e = AppError::ProblemNotFound(42);
        assert_eq!(e.code(), "not_found");
        assert_eq!(e.user_message(), "data not found");
        let resp = e.response("7");
        assert_eq!(resp["ok"], false);
        assert_eq!(resp["error"]["message"], "data not found");
    }

    #[test]
    fn insufficient_credit_reports_balance_and_cost() {
        let e = AppError::InsufficientCredit { balance: 3, cost: 5 };
        let resp = e.response("1");
        assert_eq!(resp["error"]["code"], "insufficient_credit");
        assert_eq!(resp["error"]["details"]["balance"], 3);
        assert_eq!(resp["error"]["details"]["cost"], 5);
    }
}
