//! rollcall-store — SQLite persistence for the attendance system.
//!
//! Owns the canonical embedding data, the attendance ledger, and the
//! outbound-notification log. All access goes through one serialized
//! connection ([`tokio_rusqlite`]), and the ledger's de-duplication is
//! enforced by a unique index rather than in-memory state, so "already
//! marked today" survives a restart.

use chrono::{Datelike, NaiveDate, NaiveTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_rusqlite::Connection;

use rollcall_core::{Embedding, GalleryEntry};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Persistence layer unreachable or rejected the operation. Callers
    /// must surface this and retry; an attendance event is never
    /// silently dropped.
    #[error("attendance store unavailable: {0}")]
    Unavailable(#[from] tokio_rusqlite::Error),
    #[error("stored embedding is corrupt: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("unknown student: {0}")]
    UnknownStudent(String),
    #[error("cannot create database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Attendance status for one student on one date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Present,
    Absent,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Present => "present",
            Status::Absent => "absent",
        }
    }
}

/// How a ledger row came to exist. `Face` and `Reconcile` are
/// automatic; `Manual` marks a human correction, which nothing
/// automatic may touch afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    Face,
    Reconcile,
    Manual,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Face => "face",
            Source::Reconcile => "reconcile",
            Source::Manual => "manual",
        }
    }
}

/// An enrolled student. The roll number is immutable once assigned;
/// contact and display fields may change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub full_name: String,
    pub class_name: String,
    pub guardian_email: Option<String>,
    pub enrolled_at: String,
}

/// One ledger row. At most one exists per (student, context, date).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub student_id: String,
    pub context: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: Status,
    pub source: Source,
}

/// Result of the idempotent presence write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// A presence row was written (fresh, or flipped from an explicit
    /// absent row). This is the transition that triggers notification.
    Created,
    /// The student was already present for this context and date; the
    /// original timestamp is retained.
    AlreadyPresent,
}

/// Result of a manual status correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideOutcome {
    Applied,
    /// The row was already corrected manually once; further overrides
    /// are rejected.
    AlreadyCorrected,
}

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS students (
  id             TEXT PRIMARY KEY,
  full_name      TEXT NOT NULL,
  class_name     TEXT NOT NULL,
  guardian_email TEXT,
  enrolled_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS embeddings (
  id         TEXT PRIMARY KEY,
  student_id TEXT NOT NULL REFERENCES students(id),
  vector     BLOB NOT NULL,
  created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_embeddings_student ON embeddings(student_id);

CREATE TABLE IF NOT EXISTS attendance (
  id         INTEGER PRIMARY KEY,
  student_id TEXT NOT NULL REFERENCES students(id),
  context    TEXT NOT NULL,
  date       TEXT NOT NULL,
  time       TEXT NOT NULL,
  status     TEXT NOT NULL CHECK (status IN ('present', 'absent')),
  source     TEXT NOT NULL CHECK (source IN ('face', 'reconcile', 'manual')),
  UNIQUE (student_id, context, date)
);
CREATE INDEX IF NOT EXISTS idx_attendance_context_date ON attendance(context, date);

CREATE TABLE IF NOT EXISTS notification_log (
  id         INTEGER PRIMARY KEY,
  recipient  TEXT NOT NULL,
  subject    TEXT NOT NULL,
  body       TEXT NOT NULL,
  status     TEXT NOT NULL CHECK (status IN ('sent', 'failed')),
  error      TEXT,
  created_at TEXT NOT NULL
);
"#;

/// Clone-safe handle to the store. All operations are serialized
/// through one background SQLite connection, which together with the
/// unique ledger index makes the check-then-write of
/// [`mark_present`](Store::mark_present) atomic.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at `path` and ensure the schema.
    pub async fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).await?;
        Self::init(conn).await
    }

    /// In-memory store, used by tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Register a student, generating a roll number of the form
    /// `<year><seq:04>` (first come, first served within the join year).
    pub async fn register_student(
        &self,
        full_name: &str,
        class_name: &str,
        guardian_email: Option<&str>,
    ) -> Result<Student, StoreError> {
        let full_name = full_name.to_owned();
        let class_name = class_name.to_owned();
        let guardian_email = guardian_email.map(str::to_owned);
        let year = Utc::now().year();
        let enrolled_at = Utc::now().to_rfc3339();

        let student = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existing: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM students WHERE id LIKE ?1",
                    [format!("{year}%")],
                    |row| row.get(0),
                )?;
                let id = format!("{year}{:04}", existing + 1);
                tx.execute(
                    "INSERT INTO students (id, full_name, class_name, guardian_email, enrolled_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id, full_name, class_name, guardian_email, enrolled_at],
                )?;
                tx.commit()?;
                Ok(Student {
                    id,
                    full_name,
                    class_name,
                    guardian_email,
                    enrolled_at,
                })
            })
            .await?;
        tracing::info!(student_id = %student.id, class = %student.class_name, "student registered");
        Ok(student)
    }

    pub async fn student(&self, id: &str) -> Result<Student, StoreError> {
        let wanted = id.to_owned();
        let id = id.to_owned();
        let found = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, full_name, class_name, guardian_email, enrolled_at
                     FROM students WHERE id = ?1",
                )?;
                let mut rows = stmt.query([&id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_student(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        found.ok_or(StoreError::UnknownStudent(wanted))
    }

    pub async fn students_in_class(&self, class_name: &str) -> Result<Vec<Student>, StoreError> {
        let class_name = class_name.to_owned();
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, full_name, class_name, guardian_email, enrolled_at
                     FROM students WHERE class_name = ?1 ORDER BY id",
                )?;
                let rows = stmt
                    .query_map([&class_name], |row| row_to_student(row))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?)
    }

    pub async fn all_students(&self) -> Result<Vec<Student>, StoreError> {
        Ok(self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, full_name, class_name, guardian_email, enrolled_at
                     FROM students ORDER BY id",
                )?;
                let rows = stmt
                    .query_map([], |row| row_to_student(row))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?)
    }

    /// Store one embedding for `student_id`. Returns the embedding id.
    pub async fn add_embedding(
        &self,
        student_id: &str,
        embedding: &Embedding,
    ) -> Result<String, StoreError> {
        // The foreign key would also reject an unknown student, but
        // resolving first gives a typed error.
        self.student(student_id).await?;

        let id = uuid::Uuid::new_v4().to_string();
        let vector = serde_json::to_vec(&embedding.values)?;
        let student_id = student_id.to_owned();
        let created_at = Utc::now().to_rfc3339();
        let stored_id = id.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO embeddings (id, student_id, vector, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![stored_id, student_id, vector, created_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(id)
    }

    pub async fn remove_embedding(&self, embedding_id: &str) -> Result<bool, StoreError> {
        let embedding_id = embedding_id.to_owned();
        Ok(self
            .conn
            .call(move |conn| {
                let changed =
                    conn.execute("DELETE FROM embeddings WHERE id = ?1", [&embedding_id])?;
                Ok(changed == 1)
            })
            .await?)
    }

    /// Load the full gallery in enrollment order. The returned vector is
    /// a disposable snapshot; concurrent enrollment only affects which
    /// snapshot later loads observe.
    pub async fn load_gallery(&self) -> Result<Vec<GalleryEntry>, StoreError> {
        let raw: Vec<(String, String, Vec<u8>)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, student_id, vector FROM embeddings ORDER BY rowid",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut gallery = Vec::with_capacity(raw.len());
        for (embedding_id, student_id, blob) in raw {
            let values: Vec<f32> = serde_json::from_slice(&blob)?;
            gallery.push(GalleryEntry {
                embedding_id,
                student_id,
                embedding: Embedding::new(values),
            });
        }
        Ok(gallery)
    }

    /// Idempotent presence write. The unique `(student, context, date)`
    /// index plus the serialized connection make this a single atomic
    /// check-then-write: concurrent marks for the same key yield exactly
    /// one row, and the first caller's time is retained.
    ///
    /// A reconcile-written `absent` row is flipped to `present` and
    /// reported as `Created`, since that is the absent-to-present
    /// transition that should notify. A manually corrected row is never
    /// touched: the camera must not undo a human decision.
    pub async fn mark_present(
        &self,
        student_id: &str,
        context: &str,
        date: NaiveDate,
        time: NaiveTime,
        source: Source,
    ) -> Result<MarkOutcome, StoreError> {
        let wanted = student_id.to_owned();
        let student_id = student_id.to_owned();
        let context = context.to_owned();
        let outcome = self
            .conn
            .call(move |conn| {
                let known: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM students WHERE id = ?1",
                    [&student_id],
                    |row| row.get(0),
                )?;
                if known == 0 {
                    return Ok(None);
                }
                let changed = conn.execute(
                    "INSERT INTO attendance (student_id, context, date, time, status, source)
                     VALUES (?1, ?2, ?3, ?4, 'present', ?5)
                     ON CONFLICT (student_id, context, date) DO UPDATE SET
                       status = 'present',
                       time = excluded.time,
                       source = excluded.source
                     WHERE attendance.status = 'absent'
                       AND attendance.source = 'reconcile'",
                    params![
                        student_id,
                        context,
                        date.to_string(),
                        time.format("%H:%M:%S").to_string(),
                        source.as_str()
                    ],
                )?;
                Ok(Some(if changed == 1 {
                    MarkOutcome::Created
                } else {
                    MarkOutcome::AlreadyPresent
                }))
            })
            .await?;
        outcome.ok_or(StoreError::UnknownStudent(wanted))
    }

    /// Manual correction path. Applies over a nonexistent or
    /// automatic (`face`/`reconcile`) row; a row already corrected
    /// manually stays put.
    pub async fn override_status(
        &self,
        student_id: &str,
        context: &str,
        date: NaiveDate,
        status: Status,
        time: NaiveTime,
    ) -> Result<OverrideOutcome, StoreError> {
        let student_id = student_id.to_owned();
        let context = context.to_owned();
        Ok(self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "INSERT INTO attendance (student_id, context, date, time, status, source)
                     VALUES (?1, ?2, ?3, ?4, ?5, 'manual')
                     ON CONFLICT (student_id, context, date) DO UPDATE SET
                       status = excluded.status,
                       time = excluded.time,
                       source = 'manual'
                     WHERE attendance.source != 'manual'",
                    params![
                        student_id,
                        context,
                        date.to_string(),
                        time.format("%H:%M:%S").to_string(),
                        status.as_str()
                    ],
                )?;
                Ok(if changed == 1 {
                    OverrideOutcome::Applied
                } else {
                    OverrideOutcome::AlreadyCorrected
                })
            })
            .await?)
    }

    /// End-of-session sweep: write an explicit `absent` row for every
    /// enrolled student in `context` with no record that day. Returns
    /// the newly-absent students. Never overwrites presence.
    pub async fn reconcile(
        &self,
        context: &str,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Vec<Student>, StoreError> {
        let context = context.to_owned();
        Ok(self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let absentees = {
                    let mut stmt = tx.prepare(
                        "SELECT s.id, s.full_name, s.class_name, s.guardian_email, s.enrolled_at
                         FROM students s
                         WHERE s.class_name = ?1
                           AND NOT EXISTS (
                             SELECT 1 FROM attendance a
                             WHERE a.student_id = s.id AND a.context = ?1 AND a.date = ?2
                           )
                         ORDER BY s.id",
                    )?;
                    let rows = stmt
                        .query_map(params![context, date.to_string()], |row| {
                            row_to_student(row)
                        })?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                };
                for student in &absentees {
                    tx.execute(
                        "INSERT INTO attendance (student_id, context, date, time, status, source)
                         VALUES (?1, ?2, ?3, ?4, 'absent', 'reconcile')
                         ON CONFLICT (student_id, context, date) DO NOTHING",
                        params![
                            student.id,
                            context,
                            date.to_string(),
                            time.format("%H:%M:%S").to_string()
                        ],
                    )?;
                }
                tx.commit()?;
                Ok(absentees)
            })
            .await?)
    }

    pub async fn attendance_for(
        &self,
        context: &str,
        date: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let context = context.to_owned();
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT student_id, context, date, time, status, source
                     FROM attendance WHERE context = ?1 AND date = ?2
                     ORDER BY time, student_id",
                )?;
                let rows = stmt
                    .query_map(params![context, date.to_string()], |row| {
                        row_to_record(row)
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?)
    }

    /// Percentage of held sessions (since `since`, inclusive) on which
    /// the student was present. A date counts as a held session only if
    /// the context has at least one record on it; returns `None` when
    /// no session was held at all.
    pub async fn percent_present(
        &self,
        student_id: &str,
        context: &str,
        since: NaiveDate,
    ) -> Result<Option<f32>, StoreError> {
        let student_id = student_id.to_owned();
        let context = context.to_owned();
        Ok(self
            .conn
            .call(move |conn| {
                let sessions: i64 = conn.query_row(
                    "SELECT COUNT(DISTINCT date) FROM attendance
                     WHERE context = ?1 AND date >= ?2",
                    params![context, since.to_string()],
                    |row| row.get(0),
                )?;
                if sessions == 0 {
                    return Ok(None);
                }
                let present: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM attendance
                     WHERE student_id = ?1 AND context = ?2 AND date >= ?3
                       AND status = 'present'",
                    params![student_id, context, since.to_string()],
                    |row| row.get(0),
                )?;
                Ok(Some(present as f32 * 100.0 / sessions as f32))
            })
            .await?)
    }

    /// Append one outbound-mail attempt to the notification log.
    pub async fn log_notification(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
        sent: bool,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let recipient = recipient.to_owned();
        let subject = subject.to_owned();
        let body = body.to_owned();
        let error = error.map(str::to_owned);
        let created_at = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO notification_log (recipient, subject, body, status, error, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        recipient,
                        subject,
                        body,
                        if sent { "sent" } else { "failed" },
                        error,
                        created_at
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Count of logged notification attempts, optionally by status.
    pub async fn notification_count(&self, sent: Option<bool>) -> Result<i64, StoreError> {
        Ok(self
            .conn
            .call(move |conn| {
                let count: i64 = match sent {
                    Some(flag) => conn.query_row(
                        "SELECT COUNT(*) FROM notification_log WHERE status = ?1",
                        [if flag { "sent" } else { "failed" }],
                        |row| row.get(0),
                    )?,
                    None => conn.query_row(
                        "SELECT COUNT(*) FROM notification_log",
                        [],
                        |row| row.get(0),
                    )?,
                };
                Ok(count)
            })
            .await?)
    }
}

fn row_to_student(row: &rusqlite::Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        full_name: row.get(1)?,
        class_name: row.get(2)?,
        guardian_email: row.get(3)?,
        enrolled_at: row.get(4)?,
    })
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let date_text: String = row.get(2)?;
    let time_text: String = row.get(3)?;
    let status_text: String = row.get(4)?;
    let source_text: String = row.get(5)?;
    Ok(AttendanceRecord {
        student_id: row.get(0)?,
        context: row.get(1)?,
        date: parse_column(&date_text, |s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))?,
        time: parse_column(&time_text, |s| NaiveTime::parse_from_str(s, "%H:%M:%S"))?,
        status: match status_text.as_str() {
            "present" => Status::Present,
            _ => Status::Absent,
        },
        source: match source_text.as_str() {
            "face" => Source::Face,
            "reconcile" => Source::Reconcile,
            _ => Source::Manual,
        },
    })
}

fn parse_column<T>(
    text: &str,
    parse: impl Fn(&str) -> Result<T, chrono::ParseError>,
) -> rusqlite::Result<T> {
    parse(text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn time(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M:%S").unwrap()
    }

    async fn store_with_student(name: &str, class: &str) -> (Store, Student) {
        let store = Store::open_in_memory().await.unwrap();
        let student = store
            .register_student(name, class, Some("guardian@example.com"))
            .await
            .unwrap();
        (store, student)
    }

    #[tokio::test]
    async fn roll_numbers_are_sequential_within_year() {
        let store = Store::open_in_memory().await.unwrap();
        let a = store.register_student("Alice", "5", None).await.unwrap();
        let b = store.register_student("Bob", "5", None).await.unwrap();
        let year = Utc::now().year().to_string();
        assert!(a.id.starts_with(&year));
        assert!(b.id.ends_with("0002"));
    }

    #[tokio::test]
    async fn mark_present_is_idempotent_and_keeps_first_time() {
        let (store, student) = store_with_student("Alice", "5").await;
        let d = date("2025-01-15");

        let first = store
            .mark_present(&student.id, "5", d, time("08:30:00"), Source::Face)
            .await
            .unwrap();
        assert_eq!(first, MarkOutcome::Created);

        let second = store
            .mark_present(&student.id, "5", d, time("09:45:00"), Source::Face)
            .await
            .unwrap();
        assert_eq!(second, MarkOutcome::AlreadyPresent);

        let records = store.attendance_for("5", d).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].time, time("08:30:00"));
        assert_eq!(records[0].status, Status::Present);
    }

    #[tokio::test]
    async fn concurrent_marks_produce_one_row() {
        let (store, student) = store_with_student("Alice", "5").await;
        let d = date("2025-01-15");

        let mut handles = Vec::new();
        for i in 0..16u32 {
            let store = store.clone();
            let id = student.id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .mark_present(
                        &id,
                        "5",
                        d,
                        NaiveTime::from_hms_opt(8, 0, i).unwrap(),
                        Source::Face,
                    )
                    .await
                    .unwrap()
            }));
        }
        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap() == MarkOutcome::Created {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.attendance_for("5", d).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn marking_unknown_student_is_a_typed_error() {
        let store = Store::open_in_memory().await.unwrap();
        let result = store
            .mark_present("nobody", "5", date("2025-01-15"), time("08:00:00"), Source::Face)
            .await;
        assert!(matches!(result, Err(StoreError::UnknownStudent(_))));
    }

    #[tokio::test]
    async fn mark_after_reconcile_flips_absent_to_present() {
        let (store, student) = store_with_student("Alice", "5").await;
        let d = date("2025-01-15");

        let absentees = store.reconcile("5", d, time("16:00:00")).await.unwrap();
        assert_eq!(absentees.len(), 1);

        // Late arrival: the absent row becomes present and counts as a
        // fresh mark (it should notify).
        let outcome = store
            .mark_present(&student.id, "5", d, time("16:30:00"), Source::Face)
            .await
            .unwrap();
        assert_eq!(outcome, MarkOutcome::Created);

        let records = store.attendance_for("5", d).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, Status::Present);
        assert_eq!(records[0].time, time("16:30:00"));
    }

    #[tokio::test]
    async fn reconcile_skips_present_students_and_is_repeatable() {
        let store = Store::open_in_memory().await.unwrap();
        let alice = store.register_student("Alice", "5", None).await.unwrap();
        let _bob = store.register_student("Bob", "5", None).await.unwrap();
        let _other = store.register_student("Carol", "6", None).await.unwrap();
        let d = date("2025-01-15");

        store
            .mark_present(&alice.id, "5", d, time("08:30:00"), Source::Face)
            .await
            .unwrap();

        let absentees = store.reconcile("5", d, time("16:00:00")).await.unwrap();
        assert_eq!(absentees.len(), 1);
        assert_eq!(absentees[0].full_name, "Bob");

        // Second sweep finds nothing new.
        let again = store.reconcile("5", d, time("16:05:00")).await.unwrap();
        assert!(again.is_empty());

        let records = store.attendance_for("5", d).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn override_applies_once() {
        let (store, student) = store_with_student("Alice", "5").await;
        let d = date("2025-01-15");
        store
            .mark_present(&student.id, "5", d, time("08:30:00"), Source::Face)
            .await
            .unwrap();

        let first = store
            .override_status(&student.id, "5", d, Status::Absent, time("10:00:00"))
            .await
            .unwrap();
        assert_eq!(first, OverrideOutcome::Applied);

        let second = store
            .override_status(&student.id, "5", d, Status::Present, time("10:05:00"))
            .await
            .unwrap();
        assert_eq!(second, OverrideOutcome::AlreadyCorrected);

        let records = store.attendance_for("5", d).await.unwrap();
        assert_eq!(records[0].status, Status::Absent);
        assert_eq!(records[0].source, Source::Manual);
    }

    #[tokio::test]
    async fn face_mark_never_undoes_a_manual_correction() {
        let (store, student) = store_with_student("Alice", "5").await;
        let d = date("2025-01-15");
        store
            .mark_present(&student.id, "5", d, time("08:30:00"), Source::Face)
            .await
            .unwrap();
        store
            .override_status(&student.id, "5", d, Status::Absent, time("10:00:00"))
            .await
            .unwrap();

        // The camera sees the student again; the human decision stands.
        let outcome = store
            .mark_present(&student.id, "5", d, time("11:00:00"), Source::Face)
            .await
            .unwrap();
        assert_eq!(outcome, MarkOutcome::AlreadyPresent);

        let records = store.attendance_for("5", d).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, Status::Absent);
        assert_eq!(records[0].source, Source::Manual);

        // And the once-only correction guard is still armed.
        let again = store
            .override_status(&student.id, "5", d, Status::Present, time("11:05:00"))
            .await
            .unwrap();
        assert_eq!(again, OverrideOutcome::AlreadyCorrected);
    }

    #[tokio::test]
    async fn override_supersedes_a_reconcile_written_absence() {
        let (store, student) = store_with_student("Alice", "5").await;
        let d = date("2025-01-15");
        store.reconcile("5", d, time("16:00:00")).await.unwrap();

        let outcome = store
            .override_status(&student.id, "5", d, Status::Present, time("16:30:00"))
            .await
            .unwrap();
        assert_eq!(outcome, OverrideOutcome::Applied);

        let records = store.attendance_for("5", d).await.unwrap();
        assert_eq!(records[0].status, Status::Present);
        assert_eq!(records[0].source, Source::Manual);
    }

    #[tokio::test]
    async fn percent_present_counts_only_held_sessions() {
        let store = Store::open_in_memory().await.unwrap();
        let alice = store.register_student("Alice", "5", None).await.unwrap();
        let bob = store.register_student("Bob", "5", None).await.unwrap();
        let since = date("2025-01-01");

        // Two held sessions; a week of no-session days in between must
        // not dilute the denominator.
        store
            .mark_present(&alice.id, "5", date("2025-01-06"), time("08:30:00"), Source::Face)
            .await
            .unwrap();
        store.reconcile("5", date("2025-01-06"), time("16:00:00")).await.unwrap();
        store
            .mark_present(&alice.id, "5", date("2025-01-13"), time("08:30:00"), Source::Face)
            .await
            .unwrap();
        store
            .mark_present(&bob.id, "5", date("2025-01-13"), time("08:31:00"), Source::Face)
            .await
            .unwrap();

        let alice_pct = store.percent_present(&alice.id, "5", since).await.unwrap();
        assert_eq!(alice_pct, Some(100.0));
        let bob_pct = store.percent_present(&bob.id, "5", since).await.unwrap();
        assert_eq!(bob_pct, Some(50.0));
    }

    #[tokio::test]
    async fn percent_present_is_none_without_sessions() {
        let (store, student) = store_with_student("Alice", "5").await;
        let pct = store
            .percent_present(&student.id, "5", date("2025-01-01"))
            .await
            .unwrap();
        assert_eq!(pct, None);
    }

    #[tokio::test]
    async fn gallery_round_trips_in_enrollment_order() {
        let (store, student) = store_with_student("Alice", "5").await;
        let bob = store.register_student("Bob", "5", None).await.unwrap();

        store
            .add_embedding(&student.id, &Embedding::new(vec![0.0, 0.0]))
            .await
            .unwrap();
        let bob_embedding = store
            .add_embedding(&bob.id, &Embedding::new(vec![1.0, 1.0]))
            .await
            .unwrap();

        let gallery = store.load_gallery().await.unwrap();
        assert_eq!(gallery.len(), 2);
        assert_eq!(gallery[0].student_id, student.id);
        assert_eq!(gallery[1].embedding_id, bob_embedding);
        assert_eq!(gallery[1].embedding.values, vec![1.0, 1.0]);

        assert!(store.remove_embedding(&bob_embedding).await.unwrap());
        assert_eq!(store.load_gallery().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn embedding_for_unknown_student_is_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        let result = store
            .add_embedding("nobody", &Embedding::new(vec![0.0]))
            .await;
        assert!(matches!(result, Err(StoreError::UnknownStudent(_))));
    }

    #[tokio::test]
    async fn notification_log_counts_by_status() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .log_notification("a@example.com", "s", "b", true, None)
            .await
            .unwrap();
        store
            .log_notification("b@example.com", "s", "b", false, Some("relay refused"))
            .await
            .unwrap();
        assert_eq!(store.notification_count(None).await.unwrap(), 2);
        assert_eq!(store.notification_count(Some(true)).await.unwrap(), 1);
        assert_eq!(store.notification_count(Some(false)).await.unwrap(), 1);
    }
}
