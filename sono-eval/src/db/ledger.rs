//! Attempt/Response Ledger
//!
//! Every submission by a teacher against a clip is an immutable attempt
//! header plus one response row per scored protocol item. Totals are never
//! stored; they are summed from the responses on read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sono_common::db::SQL_NOW;
use sono_common::models::{AttemptSummary, EvaluationResponse};
use sono_common::{clamp_score, scoring, Error, Result};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use super::begin_write;
use super::evaluations::recompute_for_attempt;
use super::taxonomy::resolve_item;

/// One scored item as submitted, keyed by protocol item key
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseInput {
    #[serde(alias = "itemKey")]
    pub item_key: String,
    pub score: f64,
}

/// A response that matched an item of the protocol
#[derive(Debug, Clone, Serialize)]
pub struct AcceptedResponse {
    pub item_key: String,
    pub protocol_item_id: i64,
    /// Stored score, after clamping to `[0, max_score]`
    pub score: f64,
}

/// Outcome of [`AttemptLedger::create_attempt`]
#[derive(Debug, Clone, Serialize)]
pub struct AttemptReceipt {
    pub attempt_id: i64,
    pub submitted_at: DateTime<Utc>,
    pub total_score: f64,
    pub accepted: Vec<AcceptedResponse>,
    /// Item keys that did not resolve against the protocol
    pub skipped: Vec<String>,
}

#[derive(Clone)]
pub struct AttemptLedger {
    pool: SqlitePool,
}

impl AttemptLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a new attempt for `clip_id` scored against `protocol_key`
    ///
    /// Scores are clamped into `[0, max_score]` of their item. Unknown item
    /// keys are skipped and reported rather than failing the request. A
    /// repeated item key within one submission keeps the last score. The
    /// header, responses and study rollup commit together.
    pub async fn create_attempt(
        &self,
        clip_id: i64,
        teacher_id: i64,
        protocol_key: &str,
        comment: Option<&str>,
        responses: &[ResponseInput],
    ) -> Result<AttemptReceipt> {
        if let Some(bad) = responses.iter().find(|r| !r.score.is_finite()) {
            return Err(Error::InvalidInput(format!(
                "score for item '{}' is not a number",
                bad.item_key
            )));
        }

        let comment = comment.map(str::trim).filter(|c| !c.is_empty());

        let mut tx = begin_write(&self.pool).await?;

        let protocol_id: i64 = sqlx::query_scalar("SELECT id FROM protocols WHERE key = ?")
            .bind(protocol_key)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound(format!("protocol '{}'", protocol_key)))?;

        let clip: Option<i64> = sqlx::query_scalar("SELECT id FROM clips WHERE id = ?")
            .bind(clip_id)
            .fetch_optional(&mut *tx)
            .await?;
        if clip.is_none() {
            return Err(Error::NotFound(format!("clip {}", clip_id)));
        }

        let (attempt_id, submitted_at) = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
            r#"
            INSERT INTO evaluation_attempts (clip_id, teacher_id, comment)
            VALUES (?, ?, ?)
            RETURNING id, submitted_at
            "#,
        )
        .bind(clip_id)
        .bind(teacher_id)
        .bind(comment)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            Error::from(e)
                .on_foreign_key_violation(|| Error::NotFound(format!("teacher {}", teacher_id)))
        })?;

        let mut accepted: Vec<AcceptedResponse> = Vec::with_capacity(responses.len());
        let mut skipped = Vec::new();

        for response in responses {
            let Some((item_id, max_score)) =
                resolve_item(&mut *tx, protocol_id, &response.item_key).await?
            else {
                warn!(
                    attempt_id,
                    protocol = protocol_key,
                    item_key = %response.item_key,
                    "Skipping response for unknown item"
                );
                skipped.push(response.item_key.clone());
                continue;
            };

            let score = clamp_score(response.score, max_score);
            upsert_response_in(&mut *tx, attempt_id, item_id, score).await?;

            accepted.retain(|a| a.protocol_item_id != item_id);
            accepted.push(AcceptedResponse {
                item_key: response.item_key.clone(),
                protocol_item_id: item_id,
                score,
            });
        }

        recompute_for_attempt(&mut *tx, attempt_id).await?;
        tx.commit().await?;

        let total_score = scoring::total_score(accepted.iter().map(|a| a.score));

        info!(
            attempt_id,
            clip_id,
            teacher_id,
            accepted = accepted.len(),
            skipped = skipped.len(),
            total_score,
            "Attempt recorded"
        );

        Ok(AttemptReceipt {
            attempt_id,
            submitted_at,
            total_score,
            accepted,
            skipped,
        })
    }

    /// Insert or correct one response of an existing attempt
    ///
    /// The score is stored as given; clamping only happens on attempt
    /// creation.
    pub async fn upsert_response(
        &self,
        attempt_id: i64,
        protocol_item_id: i64,
        score: f64,
    ) -> Result<EvaluationResponse> {
        if !score.is_finite() {
            return Err(Error::InvalidInput("score is not a number".to_string()));
        }

        let mut tx = begin_write(&self.pool).await?;

        let attempt: Option<i64> = sqlx::query_scalar("SELECT id FROM evaluation_attempts WHERE id = ?")
            .bind(attempt_id)
            .fetch_optional(&mut *tx)
            .await?;
        if attempt.is_none() {
            return Err(Error::NotFound(format!("attempt {}", attempt_id)));
        }

        let item: Option<i64> = sqlx::query_scalar("SELECT id FROM scoring_items WHERE id = ?")
            .bind(protocol_item_id)
            .fetch_optional(&mut *tx)
            .await?;
        if item.is_none() {
            return Err(Error::NotFound(format!("protocol item {}", protocol_item_id)));
        }

        let response = upsert_response_in(&mut *tx, attempt_id, protocol_item_id, score).await?;
        recompute_for_attempt(&mut *tx, attempt_id).await?;
        tx.commit().await?;

        info!(attempt_id, protocol_item_id, score, "Response upserted");
        Ok(response)
    }

    /// Attempts on a clip, newest first, each with its derived total
    pub async fn list_attempts(&self, clip_id: i64) -> Result<Vec<AttemptSummary>> {
        let attempts = sqlx::query_as::<_, AttemptSummary>(
            r#"
            SELECT
                a.id,
                a.submitted_at,
                CAST(COALESCE(
                    (SELECT SUM(r.score) FROM evaluation_responses r WHERE r.attempt_id = a.id),
                    0
                ) AS REAL) AS total_score,
                u.display_name AS teacher_name,
                a.comment
            FROM evaluation_attempts a
            JOIN users u ON u.id = a.teacher_id
            WHERE a.clip_id = ?
            ORDER BY a.submitted_at DESC, a.id DESC
            "#,
        )
        .bind(clip_id)
        .fetch_all(&self.pool)
        .await?;

        debug!(clip_id, count = attempts.len(), "Listed attempts");
        Ok(attempts)
    }

    /// Responses of one attempt, ordered by item id
    pub async fn list_responses(&self, attempt_id: i64) -> Result<Vec<EvaluationResponse>> {
        let responses = sqlx::query_as::<_, EvaluationResponse>(
            r#"
            SELECT protocol_item_id, score
            FROM evaluation_responses
            WHERE attempt_id = ?
            ORDER BY protocol_item_id
            "#,
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(responses)
    }
}

/// Upsert on (attempt_id, protocol_item_id) using the caller's connection
pub(crate) async fn upsert_response_in(
    conn: &mut SqliteConnection,
    attempt_id: i64,
    protocol_item_id: i64,
    score: f64,
) -> Result<EvaluationResponse> {
    let response = sqlx::query_as::<_, EvaluationResponse>(&format!(
        r#"
        INSERT INTO evaluation_responses (attempt_id, protocol_item_id, score)
        VALUES (?, ?, ?)
        ON CONFLICT(attempt_id, protocol_item_id) DO UPDATE SET
            score = excluded.score,
            updated_at = {SQL_NOW}
        RETURNING protocol_item_id, score
        "#
    ))
    .bind(attempt_id)
    .bind(protocol_item_id)
    .bind(score)
    .fetch_one(&mut *conn)
    .await?;

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{memory_pool, seed_clip, seed_study, seed_user};
    use crate::db::{AggregationEngine, TaxonomyStore};

    struct Fixture {
        pool: SqlitePool,
        teacher: i64,
        study: i64,
        clip: i64,
        /// depth (max 5), gain (max 10), b_lines (max 10)
        items: [i64; 3],
    }

    async fn fixture() -> Fixture {
        let pool = memory_pool().await;
        let student = seed_user(&pool, "Student", "student").await;
        let teacher = seed_user(&pool, "Dr. Grey", "teacher").await;
        let study = seed_study(&pool, student).await;
        let clip = seed_clip(&pool, study).await;

        let store = TaxonomyStore::new(pool.clone());
        store.create_protocol("Lung US").await.unwrap();
        let quality = store
            .create_section("lung_us", None, "Image quality", None)
            .await
            .unwrap();
        let reading = store
            .create_section("lung_us", None, "Interpretation", None)
            .await
            .unwrap();
        let depth = store.create_item(quality.id, None, "Depth", 5.0, None).await.unwrap();
        let gain = store.create_item(quality.id, None, "Gain", 10.0, None).await.unwrap();
        let b_lines = store
            .create_item(reading.id, None, "B lines", 10.0, Some("0-10"))
            .await
            .unwrap();

        Fixture {
            pool,
            teacher,
            study,
            clip,
            items: [depth.id, gain.id, b_lines.id],
        }
    }

    fn input(key: &str, score: f64) -> ResponseInput {
        ResponseInput {
            item_key: key.to_string(),
            score,
        }
    }

    async fn count(pool: &SqlitePool, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_scores_clamped_to_item_range() {
        let f = fixture().await;
        let ledger = AttemptLedger::new(f.pool.clone());

        let receipt = ledger
            .create_attempt(f.clip, f.teacher, "lung_us", None, &[input("depth", 8.0), input("gain", -3.0)])
            .await
            .unwrap();

        let responses = ledger.list_responses(receipt.attempt_id).await.unwrap();
        assert_eq!(
            responses,
            vec![
                EvaluationResponse { protocol_item_id: f.items[0], score: 5.0 },
                EvaluationResponse { protocol_item_id: f.items[1], score: 0.0 },
            ]
        );
        assert_eq!(receipt.total_score, 5.0);
    }

    #[tokio::test]
    async fn test_correction_changes_total_and_rollup() {
        let f = fixture().await;
        let ledger = AttemptLedger::new(f.pool.clone());

        let receipt = ledger
            .create_attempt(
                f.clip,
                f.teacher,
                "lung_us",
                Some("Good depth"),
                &[input("depth", 5.0), input("gain", 2.0), input("b_lines", 10.0)],
            )
            .await
            .unwrap();
        assert_eq!(receipt.total_score, 17.0);

        let attempts = ledger.list_attempts(f.clip).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].total_score, 17.0);
        assert_eq!(attempts[0].teacher_name, "Dr. Grey");
        assert_eq!(attempts[0].comment.as_deref(), Some("Good depth"));

        ledger
            .upsert_response(receipt.attempt_id, f.items[1], 6.0)
            .await
            .unwrap();

        assert_eq!(count(&f.pool, "evaluation_responses").await, 3);
        let attempts = ledger.list_attempts(f.clip).await.unwrap();
        assert_eq!(attempts[0].total_score, 21.0);

        let summary = AggregationEngine::new(f.pool.clone())
            .study_evaluation(f.study)
            .await
            .unwrap();
        assert_eq!(summary.score, Some(21.0));
        assert_eq!(summary.feedback_summary.as_deref(), Some("Good depth"));
    }

    #[tokio::test]
    async fn test_unknown_item_keys_are_skipped() {
        let f = fixture().await;
        let ledger = AttemptLedger::new(f.pool.clone());

        let receipt = ledger
            .create_attempt(f.clip, f.teacher, "lung_us", None, &[input("depth", 4.0), input("ghost", 3.0)])
            .await
            .unwrap();

        assert_eq!(receipt.skipped, vec!["ghost".to_string()]);
        assert_eq!(receipt.accepted.len(), 1);
        assert_eq!(count(&f.pool, "evaluation_responses").await, 1);
    }

    #[tokio::test]
    async fn test_repeated_key_keeps_last_score() {
        let f = fixture().await;
        let ledger = AttemptLedger::new(f.pool.clone());

        let receipt = ledger
            .create_attempt(f.clip, f.teacher, "lung_us", None, &[input("gain", 3.0), input("gain", 7.0)])
            .await
            .unwrap();

        assert_eq!(receipt.accepted.len(), 1);
        assert_eq!(receipt.total_score, 7.0);
        let responses = ledger.list_responses(receipt.attempt_id).await.unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].score, 7.0);
    }

    #[tokio::test]
    async fn test_invalid_score_writes_nothing() {
        let f = fixture().await;
        let ledger = AttemptLedger::new(f.pool.clone());

        let err = ledger
            .create_attempt(f.clip, f.teacher, "lung_us", None, &[input("depth", 1.0), input("gain", f64::NAN)])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidInput(_)), "got {err:?}");
        assert_eq!(count(&f.pool, "evaluation_attempts").await, 0);
        assert_eq!(count(&f.pool, "evaluation_forms").await, 0);
    }

    async fn ledger_counts(pool: &SqlitePool) -> [i64; 3] {
        [
            count(pool, "evaluation_attempts").await,
            count(pool, "evaluation_responses").await,
            count(pool, "evaluation_forms").await,
        ]
    }

    #[tokio::test]
    async fn test_failure_after_header_rolls_back_attempt() {
        let f = fixture().await;
        let ledger = AttemptLedger::new(f.pool.clone());
        ledger
            .create_attempt(f.clip, f.teacher, "lung_us", Some("first"), &[input("depth", 2.0)])
            .await
            .unwrap();
        let before = ledger_counts(&f.pool).await;

        sqlx::query(&format!(
            "CREATE TRIGGER reject_gain BEFORE INSERT ON evaluation_responses \
             WHEN NEW.protocol_item_id = {} BEGIN SELECT RAISE(ABORT, 'gain rejected'); END",
            f.items[1]
        ))
        .execute(&f.pool)
        .await
        .unwrap();

        let err = ledger
            .create_attempt(
                f.clip,
                f.teacher,
                "lung_us",
                Some("second"),
                &[input("depth", 4.0), input("gain", 3.0)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Database(_)), "got {err:?}");

        assert_eq!(ledger_counts(&f.pool).await, before);
        let summary = AggregationEngine::new(f.pool.clone())
            .study_evaluation(f.study)
            .await
            .unwrap();
        assert_eq!(summary.score, Some(2.0));
        assert_eq!(summary.feedback_summary.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_failed_rollup_rolls_back_response_correction() {
        let f = fixture().await;
        let ledger = AttemptLedger::new(f.pool.clone());
        let receipt = ledger
            .create_attempt(f.clip, f.teacher, "lung_us", None, &[input("depth", 2.0)])
            .await
            .unwrap();

        sqlx::query(
            "CREATE TRIGGER freeze_forms BEFORE UPDATE ON evaluation_forms \
             BEGIN SELECT RAISE(ABORT, 'forms frozen'); END",
        )
        .execute(&f.pool)
        .await
        .unwrap();

        let err = ledger
            .upsert_response(receipt.attempt_id, f.items[0], 4.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Database(_)), "got {err:?}");

        let responses = ledger.list_responses(receipt.attempt_id).await.unwrap();
        assert_eq!(
            responses,
            vec![EvaluationResponse { protocol_item_id: f.items[0], score: 2.0 }]
        );
    }

    #[tokio::test]
    async fn test_unknown_clip_or_protocol_is_not_found() {
        let f = fixture().await;
        let ledger = AttemptLedger::new(f.pool.clone());

        let err = ledger
            .create_attempt(999, f.teacher, "lung_us", None, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let err = ledger
            .create_attempt(f.clip, f.teacher, "cardiac", None, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(count(&f.pool, "evaluation_attempts").await, 0);
    }

    #[tokio::test]
    async fn test_upsert_response_requires_existing_rows() {
        let f = fixture().await;
        let ledger = AttemptLedger::new(f.pool.clone());
        let receipt = ledger
            .create_attempt(f.clip, f.teacher, "lung_us", None, &[])
            .await
            .unwrap();

        assert!(matches!(
            ledger.upsert_response(4242, f.items[0], 1.0).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            ledger.upsert_response(receipt.attempt_id, 4242, 1.0).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            ledger.upsert_response(receipt.attempt_id, f.items[0], f64::INFINITY).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_repeat_attempts_are_appended() {
        let f = fixture().await;
        let ledger = AttemptLedger::new(f.pool.clone());

        ledger
            .create_attempt(f.clip, f.teacher, "lung_us", None, &[input("depth", 2.0)])
            .await
            .unwrap();
        let second = ledger
            .create_attempt(f.clip, f.teacher, "lung_us", None, &[input("depth", 4.0)])
            .await
            .unwrap();

        let attempts = ledger.list_attempts(f.clip).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].id, second.attempt_id);

        // rollup follows the newest attempt on the clip; one form per teacher
        let summary = AggregationEngine::new(f.pool.clone())
            .study_evaluation(f.study)
            .await
            .unwrap();
        assert_eq!(summary.score, Some(4.0));
        assert_eq!(count(&f.pool, "evaluation_forms").await, 1);
    }
}
