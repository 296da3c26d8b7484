//! Student profiles and the repository they are saved through.
//!
//! A profile is always read and written whole. The session calls `save`
//! after every mutation; there are no partial updates.

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::notebook::MistakeEntry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub id: String,
    pub name: String,
    pub grade: String,
    #[serde(default)]
    pub photo: Option<String>,
    pub credit_balance: u32,
    #[serde(default)]
    pub history: BTreeMap<String, u32>,
    #[serde(default)]
    pub mistakes: Vec<MistakeEntry>,
    #[serde(default)]
    pub attendance: BTreeMap<String, bool>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    pub id: String,
    pub name: String,
    pub grade: String,
    pub photo: Option<String>,
    pub credit_balance: u32,
    pub mistake_count: usize,
}

impl StudentProfile {
    pub fn new(name: &str, grade: &str, photo: Option<String>, starting_bonus: u32) -> Self {
        let now = now_timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            grade: grade.trim().to_string(),
            photo,
            credit_balance: starting_bonus,
            history: BTreeMap::new(),
            mistakes: Vec::new(),
            attendance: BTreeMap::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            grade: self.grade.clone(),
            photo: self.photo.clone(),
            credit_balance: self.credit_balance,
            mistake_count: self.mistakes.len(),
        }
    }

    pub fn record_subject(&mut self, subject: &str) -> u32 {
        let count = self.history.entry(subject.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn mark_attended(&mut self, day: &str) {
        self.attendance.insert(day.to_string(), true);
    }
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// Whole-record storage for profiles.
pub trait ProfileRepository {
    fn list(&self) -> Result<Vec<ProfileSummary>, AppError>;
    fn load(&self, id: &str) -> Result<StudentProfile, AppError>;
    /// Inserts or replaces the full record.
    fn save(&self, profile: &StudentProfile) -> Result<(), AppError>;
    fn delete(&self, id: &str) -> Result<(), AppError>;
}

pub fn create(
    repo: &dyn ProfileRepository,
    name: &str,
    grade: &str,
    photo: Option<String>,
    starting_bonus: u32,
) -> Result<StudentProfile, AppError> {
    if name.trim().is_empty() {
        return Err(AppError::BadParams("name must not be empty".to_string()));
    }
    if grade.trim().is_empty() {
        return Err(AppError::BadParams("grade must not be empty".to_string()));
    }
    let profile = StudentProfile::new(name, grade, photo, starting_bonus);
    repo.save(&profile)?;
    tracing::info!(profile_id = %profile.id, grade = %profile.grade, "profile created");
    Ok(profile)
}

pub struct SqliteProfileStore {
    conn: Connection,
}

impl SqliteProfileStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

impl ProfileRepository for SqliteProfileStore {
    fn list(&self) -> Result<Vec<ProfileSummary>, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT
               p.id,
               p.name,
               p.grade,
               p.photo,
               p.credit_balance,
               (SELECT COUNT(*) FROM profile_mistakes m WHERE m.profile_id = p.id) AS mistake_count
             FROM profiles p
             ORDER BY p.created_at, p.name",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(ProfileSummary {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    grade: r.get(2)?,
                    photo: r.get(3)?,
                    credit_balance: r.get::<_, i64>(4)?.max(0) as u32,
                    mistake_count: r.get::<_, i64>(5)?.max(0) as usize,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn load(&self, id: &str) -> Result<StudentProfile, AppError> {
        let head = self
            .conn
            .query_row(
                "SELECT id, name, grade, photo, credit_balance, created_at, updated_at
                 FROM profiles WHERE id = ?",
                [id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, Option<String>>(3)?,
                        r.get::<_, i64>(4)?,
                        r.get::<_, String>(5)?,
                        r.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;
        let Some((pid, name, grade, photo, balance, created_at, updated_at)) = head else {
            return Err(AppError::ProfileNotFound(id.to_string()));
        };

        let mut history = BTreeMap::new();
        let mut stmt = self
            .conn
            .prepare("SELECT subject, count FROM profile_history WHERE profile_id = ?")?;
        for row in stmt.query_map([id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))? {
            let (subject, count) = row?;
            history.insert(subject, count.max(0) as u32);
        }

        let mut mistakes = Vec::new();
        let mut stmt = self.conn.prepare(
            "SELECT snapshot FROM profile_mistakes WHERE profile_id = ? ORDER BY position",
        )?;
        for row in stmt.query_map([id], |r| r.get::<_, String>(0))? {
            let snapshot = row?;
            // Dropping the row here would erase it on the next save.
            let entry = serde_json::from_str::<MistakeEntry>(&snapshot).map_err(|e| {
                tracing::error!(profile_id = %id, error = %e, "unreadable mistake snapshot");
                AppError::PersistenceUnavailable(format!("unreadable mistake snapshot: {e}"))
            })?;
            mistakes.push(entry);
        }

        let mut attendance = BTreeMap::new();
        let mut stmt = self
            .conn
            .prepare("SELECT day, attended FROM profile_attendance WHERE profile_id = ?")?;
        for row in stmt.query_map([id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))? {
            let (day, attended) = row?;
            attendance.insert(day, attended != 0);
        }

        Ok(StudentProfile {
            id: pid,
            name,
            grade,
            photo,
            credit_balance: balance.max(0) as u32,
            history,
            mistakes,
            attendance,
            updated_at,
            created_at,
        })
    }

    fn save(&self, profile: &StudentProfile) -> Result<(), AppError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO profiles(id, name, grade, photo, credit_balance, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               grade = excluded.grade,
               photo = excluded.photo,
               credit_balance = excluded.credit_balance,
               updated_at = excluded.updated_at",
            (
                &profile.id,
                &profile.name,
                &profile.grade,
                &profile.photo,
                profile.credit_balance as i64,
                &profile.created_at,
                now_timestamp(),
            ),
        )?;

        tx.execute("DELETE FROM profile_history WHERE profile_id = ?", [&profile.id])?;
        for (subject, count) in &profile.history {
            tx.execute(
                "INSERT INTO profile_history(profile_id, subject, count) VALUES(?, ?, ?)",
                (&profile.id, subject, *count as i64),
            )?;
        }

        tx.execute("DELETE FROM profile_mistakes WHERE profile_id = ?", [&profile.id])?;
        for (i, entry) in profile.mistakes.iter().enumerate() {
            let snapshot = serde_json::to_string(entry)
                .map_err(|e| AppError::PersistenceUnavailable(e.to_string()))?;
            tx.execute(
                "INSERT INTO profile_mistakes(profile_id, position, question, subject, added_at, snapshot)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (
                    &profile.id,
                    i as i64,
                    &entry.problem.question,
                    &entry.subject,
                    &entry.added_at,
                    snapshot,
                ),
            )?;
        }

        tx.execute("DELETE FROM profile_attendance WHERE profile_id = ?", [&profile.id])?;
        for (day, attended) in &profile.attendance {
            tx.execute(
                "INSERT INTO profile_attendance(profile_id, day, attended) VALUES(?, ?, ?)",
                (&profile.id, day, *attended as i64),
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), AppError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM profile_history WHERE profile_id = ?", [id])?;
        tx.execute("DELETE FROM profile_mistakes WHERE profile_id = ?", [id])?;
        tx.execute("DELETE FROM profile_attendance WHERE profile_id = ?", [id])?;
        let removed = tx.execute("DELETE FROM profiles WHERE id = ?", [id])?;
        if removed == 0 {
            return Err(AppError::ProfileNotFound(id.to_string()));
        }
        tx.commit()?;
        Ok(())
    }
}

/// Keeps records in memory; `fail_saves` simulates an unavailable disk.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryProfileStore {
    records: std::cell::RefCell<BTreeMap<String, StudentProfile>>,
    pub fail_saves: std::cell::Cell<bool>,
    pub save_count: std::cell::Cell<usize>,
}

#[cfg(test)]
impl MemoryProfileStore {
    pub fn stored(&self, id: &str) -> Option<StudentProfile> {
        self.records.borrow().get(id).cloned()
    }
}

#[cfg(test)]
impl ProfileRepository for MemoryProfileStore {
    fn list(&self) -> Result<Vec<ProfileSummary>, AppError> {
        Ok(self.records.borrow().values().map(|p| p.summary()).collect())
    }

    fn load(&self, id: &str) -> Result<StudentProfile, AppError> {
        self.stored(id)
            .ok_or_else(|| AppError::ProfileNotFound(id.to_string()))
    }

    fn save(&self, profile: &StudentProfile) -> Result<(), AppError> {
        if self.fail_saves.get() {
            return Err(AppError::PersistenceUnavailable("disk full".to_string()));
        }
        self.save_count.set(self.save_count.get() + 1);
        self.records
            .borrow_mut()
            .insert(profile.id.clone(), profile.clone());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), AppError> {
        self.records
            .borrow_mut()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| AppError::ProfileNotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::grading::ProblemStatus;
    use crate::problems::Problem;

    fn store() -> SqliteProfileStore {
        SqliteProfileStore::new(db::open_in_memory().expect("db"))
    }

    #[test]
    fn create_seeds_starting_bonus_and_empty_collections() {
        let s = store();
        let p = create(&s, " はなこ ", "3", None, 50).expect("create");
        assert_eq!(p.name, "はなこ");
        assert_eq!(p.credit_balance, 50);
        assert!(p.history.is_empty() && p.mistakes.is_empty() && p.attendance.is_empty());
        let loaded = s.load(&p.id).expect("load");
        assert_eq!(loaded.id, p.id);
        assert_eq!(loaded.credit_balance, 50);
        assert_eq!(loaded.created_at, p.created_at);
    }

    #[test]
    fn create_rejects_blank_names() {
        let s = store();
        assert!(matches!(
            create(&s, "  ", "3", None, 50),
            Err(AppError::BadParams(_))
        ));
        assert!(s.list().expect("list").is_empty());
    }

    #[test]
    fn save_round_trips_the_whole_record() {
        let s = store();
        let mut p = create(&s, "たろう", "2", Some("data:image/png;base64,AA==".into()), 10).expect("create");
        p.credit_balance = 42;
        p.record_subject("さんすう");
        p.record_subject("さんすう");
        p.record_subject("こくご");
        p.mark_attended("2026-10-16");
        p.mistakes.push(MistakeEntry {
            problem: Problem {
                id: 2,
                label: Some("(2)".into()),
                question: "7+8".into(),
                correct_answer: "15".into(),
                student_answer: "14".into(),
                status: ProblemStatus::Incorrect,
                hints: vec!["a".into(), "b".into(), "c".into()],
            },
            subject: "さんすう".into(),
            added_at: now_timestamp(),
        });
        s.save(&p).expect("save");

        let loaded = s.load(&p.id).expect("load");
        assert_eq!(loaded.credit_balance, 42);
        assert_eq!(loaded.history.get("さんすう"), Some(&2));
        assert_eq!(loaded.history.get("こくご"), Some(&1));
        assert_eq!(loaded.attendance.get("2026-10-16"), Some(&true));
        assert_eq!(loaded.mistakes, p.mistakes);
        assert_eq!(loaded.photo, p.photo);

        // A later save with fewer mistakes replaces, not merges.
        let mut trimmed = loaded.clone();
        trimmed.mistakes.clear();
        s.save(&trimmed).expect("save");
        assert!(s.load(&p.id).expect("load").mistakes.is_empty());
        assert_eq!(s.list().expect("list")[0].mistake_count, 0);
    }

    #[test]
    fn delete_removes_profile_and_children() {
        let s = store();
        let mut p = create(&s, "じろう", "1", None, 0).expect("create");
        p.record_subject("せいかつ");
        s.save(&p).expect("save");
        s.delete(&p.id).expect("delete");
        assert!(matches!(s.load(&p.id), Err(AppError::ProfileNotFound(_))));
        assert!(matches!(s.delete(&p.id), Err(AppError::ProfileNotFound(_))));
        let orphans: i64 = s
            .conn
            .query_row("SELECT COUNT(*) FROM profile_history", [], |r| r.get(0))
            .expect("count");
        assert_eq!(orphans, 0);
    }

    #[test]
    fn unreadable_mistake_snapshot_fails_the_load_and_is_kept() {
        let s = store();
        let p = create(&s, "さくら", "2", None, 0).expect("create");
        s.conn
            .execute(
                "INSERT INTO profile_mistakes(profile_id, position, question, subject, added_at, snapshot)
                 VALUES(?, 0, '3+4', 'さんすう', '2026-01-01T00:00:00.000Z', '{not json')",
                [&p.id],
            )
            .expect("corrupt row");

        let err = s.load(&p.id).unwrap_err();
        assert_eq!(err.code(), "persistence_unavailable");
        let kept: i64 = s
            .conn
            .query_row("SELECT COUNT(*) FROM profile_mistakes WHERE profile_id = ?", [&p.id], |r| r.get(0))
            .expect("count");
        assert_eq!(kept, 1);
    }

    #[test]
    fn persisted_shape_uses_camel_case_keys() {
        let p = StudentProfile::new("a", "1", None, 5);
        let v = serde_json::to_value(&p).expect("json");
        for key in ["id", "name", "grade", "photo", "creditBalance", "history", "mistakes", "attendance"] {
            assert!(v.get(key).is_some(), "missing {key}");
        }
    }
}
