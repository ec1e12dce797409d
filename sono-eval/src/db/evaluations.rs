//! Aggregation Engine
//!
//! Bridges the per-clip attempt ledger to the study-level evaluation forms
//! read by reporting. The latest form of a study (by `submitted_at`, id as
//! tie-break) is the authoritative one.
//!
//! Study score for a (study, teacher) pair: for every clip of the study, the
//! total of that teacher's most recent attempt on the clip, summed.

use serde::Serialize;
use sono_common::db::SQL_NOW;
use sono_common::models::{EvaluationForm, EvaluationStatus, StudyEvaluation};
use sono_common::{Error, Result};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

const FORM_COLUMNS: &str = "id, study_id, teacher_id, score, feedback_summary, submitted_at";

/// Teacher worklist split by evaluation state
#[derive(Debug, Clone, Serialize)]
pub struct Worklist {
    pub teacher_id: i64,
    pub pending: Vec<EvaluationForm>,
    pub completed: Vec<EvaluationForm>,
}

#[derive(Clone)]
pub struct AggregationEngine {
    pool: SqlitePool,
}

impl AggregationEngine {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a new evaluation round: a form with no score yet (pending)
    pub async fn open_evaluation(&self, study_id: i64, teacher_id: i64) -> Result<EvaluationForm> {
        ensure_study_exists(&self.pool, study_id).await?;

        let form = sqlx::query_as::<_, EvaluationForm>(&format!(
            "INSERT INTO evaluation_forms (study_id, teacher_id) VALUES (?, ?) RETURNING {FORM_COLUMNS}"
        ))
        .bind(study_id)
        .bind(teacher_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::from(e)
                .on_foreign_key_violation(|| Error::NotFound(format!("teacher {}", teacher_id)))
        })?;

        info!(form_id = form.id, study_id, teacher_id, "Evaluation round opened");
        Ok(form)
    }

    /// Most recently submitted form of a study, if any
    pub async fn latest_form(&self, study_id: i64) -> Result<Option<EvaluationForm>> {
        let form = sqlx::query_as::<_, EvaluationForm>(&format!(
            r#"
            SELECT {FORM_COLUMNS}
            FROM evaluation_forms
            WHERE study_id = ?
            ORDER BY submitted_at DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(study_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(form)
    }

    /// Canonical evaluation summary of a study
    ///
    /// A study without forms is reported with `has_evaluation = false` and
    /// no score; only an unknown study is an error.
    pub async fn study_evaluation(&self, study_id: i64) -> Result<StudyEvaluation> {
        ensure_study_exists(&self.pool, study_id).await?;

        let latest = self.latest_form(study_id).await?;
        let summary = StudyEvaluation::from_latest(study_id, latest);

        debug!(study_id, status = ?summary.status, "Study evaluation read");
        Ok(summary)
    }

    /// Studies this teacher has a form for, split pending/completed
    ///
    /// Classification uses the latest form per study for this teacher.
    pub async fn teacher_worklist(&self, teacher_id: i64) -> Result<Worklist> {
        let forms = sqlx::query_as::<_, EvaluationForm>(&format!(
            r#"
            SELECT {FORM_COLUMNS}
            FROM evaluation_forms f
            WHERE f.teacher_id = ?
              AND f.id = (
                  SELECT f2.id FROM evaluation_forms f2
                  WHERE f2.study_id = f.study_id AND f2.teacher_id = f.teacher_id
                  ORDER BY f2.submitted_at DESC, f2.id DESC
                  LIMIT 1
              )
            ORDER BY f.submitted_at DESC, f.id DESC
            "#
        ))
        .bind(teacher_id)
        .fetch_all(&self.pool)
        .await?;

        let (pending, completed): (Vec<_>, Vec<_>) = forms
            .into_iter()
            .partition(|form| EvaluationStatus::classify(Some(form)) == EvaluationStatus::Pending);

        Ok(Worklist {
            teacher_id,
            pending,
            completed,
        })
    }
}

async fn ensure_study_exists(pool: &SqlitePool, study_id: i64) -> Result<()> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM studies WHERE id = ?")
        .bind(study_id)
        .fetch_optional(pool)
        .await?;

    exists
        .map(|_| ())
        .ok_or_else(|| Error::NotFound(format!("study {}", study_id)))
}

/// Recompute the study form affected by a change to `attempt_id`
///
/// Runs on the caller's connection so it joins the caller's transaction.
pub(crate) async fn recompute_for_attempt(
    conn: &mut SqliteConnection,
    attempt_id: i64,
) -> Result<EvaluationForm> {
    let (study_id, teacher_id) = sqlx::query_as::<_, (i64, i64)>(
        r#"
        SELECT c.study_id, a.teacher_id
        FROM evaluation_attempts a
        JOIN clips c ON c.id = a.clip_id
        WHERE a.id = ?
        "#,
    )
    .bind(attempt_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| Error::NotFound(format!("attempt {}", attempt_id)))?;

    recompute_study_form(conn, study_id, teacher_id).await
}

/// Write the current rollup into the latest (study, teacher) form
///
/// Updates the latest form in place (completing it if it was pending) or
/// inserts one when the pair has no form yet. Earlier scores survive only in
/// forms of explicitly opened rounds; rescoring within a round overwrites it.
pub(crate) async fn recompute_study_form(
    conn: &mut SqliteConnection,
    study_id: i64,
    teacher_id: i64,
) -> Result<EvaluationForm> {
    let score: f64 = sqlx::query_scalar(
        r#"
        SELECT CAST(COALESCE(SUM(
            (SELECT COALESCE(SUM(r.score), 0) FROM evaluation_responses r WHERE r.attempt_id = a.id)
        ), 0) AS REAL)
        FROM evaluation_attempts a
        JOIN clips c ON c.id = a.clip_id
        WHERE c.study_id = ?
          AND a.teacher_id = ?
          AND a.id = (
              SELECT a2.id FROM evaluation_attempts a2
              WHERE a2.clip_id = a.clip_id AND a2.teacher_id = a.teacher_id
              ORDER BY a2.submitted_at DESC, a2.id DESC
              LIMIT 1
          )
        "#,
    )
    .bind(study_id)
    .bind(teacher_id)
    .fetch_one(&mut *conn)
    .await?;

    let feedback: Option<String> = sqlx::query_scalar(
        r#"
        SELECT a.comment
        FROM evaluation_attempts a
        JOIN clips c ON c.id = a.clip_id
        WHERE c.study_id = ? AND a.teacher_id = ?
          AND a.comment IS NOT NULL AND TRIM(a.comment) <> ''
        ORDER BY a.submitted_at DESC, a.id DESC
        LIMIT 1
        "#,
    )
    .bind(study_id)
    .bind(teacher_id)
    .fetch_optional(&mut *conn)
    .await?;

    let latest_id: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT id FROM evaluation_forms
        WHERE study_id = ? AND teacher_id = ?
        ORDER BY submitted_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(study_id)
    .bind(teacher_id)
    .fetch_optional(&mut *conn)
    .await?;

    let form = match latest_id {
        Some(form_id) => {
            sqlx::query_as::<_, EvaluationForm>(&format!(
                r#"
                UPDATE evaluation_forms
                SET score = ?,
                    feedback_summary = COALESCE(?, feedback_summary),
                    submitted_at = {SQL_NOW}
                WHERE id = ?
                RETURNING {FORM_COLUMNS}
                "#
            ))
            .bind(score)
            .bind(&feedback)
            .bind(form_id)
            .fetch_one(&mut *conn)
            .await?
        }
        None => {
            sqlx::query_as::<_, EvaluationForm>(&format!(
                r#"
                INSERT INTO evaluation_forms (study_id, teacher_id, score, feedback_summary)
                VALUES (?, ?, ?, ?)
                RETURNING {FORM_COLUMNS}
                "#
            ))
            .bind(study_id)
            .bind(teacher_id)
            .bind(score)
            .bind(&feedback)
            .fetch_one(&mut *conn)
            .await?
        }
    };

    debug!(form_id = form.id, study_id, teacher_id, score, "Study form recomputed");
    Ok(form)
}
