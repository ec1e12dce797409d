//! Selection Recorder
//!
//! One current taxonomy path per (clip, user). Repeat submissions replace the
//! stored path in place; the (clip_id, user_id) unique constraint settles
//! concurrent writers (last writer wins).

use sono_common::db::SQL_NOW;
use sono_common::models::{Selection, SelectionPath};
use sono_common::{Error, Result};
use sqlx::SqlitePool;
use tracing::{debug, info};

#[derive(Clone)]
pub struct SelectionRecorder {
    pool: SqlitePool,
}

impl SelectionRecorder {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert the selection for (clip, user)
    ///
    /// Every column is overwritten, so optional segments omitted now are
    /// cleared even if an earlier submission set them. The path is not
    /// checked for internal consistency here; ids that don't exist are
    /// rejected by foreign keys and reported as [`Error::InvalidPath`].
    pub async fn save_selection(
        &self,
        clip_id: i64,
        user_id: i64,
        path: &SelectionPath,
    ) -> Result<Selection> {
        let sql = format!(
            r#"
            INSERT INTO selections (
                clip_id, user_id,
                protocol_id, window_id, finding_id, possible_diagnosis_id,
                subdiagnosis_id, sub_subdiagnosis_id, third_order_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(clip_id, user_id) DO UPDATE SET
                protocol_id = excluded.protocol_id,
                window_id = excluded.window_id,
                finding_id = excluded.finding_id,
                possible_diagnosis_id = excluded.possible_diagnosis_id,
                subdiagnosis_id = excluded.subdiagnosis_id,
                sub_subdiagnosis_id = excluded.sub_subdiagnosis_id,
                third_order_id = excluded.third_order_id,
                updated_at = {SQL_NOW}
            RETURNING
                id, clip_id, user_id,
                protocol_id, window_id, finding_id, possible_diagnosis_id,
                subdiagnosis_id, sub_subdiagnosis_id, third_order_id,
                created_at, updated_at
            "#
        );

        let selection = sqlx::query_as::<_, Selection>(&sql)
            .bind(clip_id)
            .bind(user_id)
            .bind(path.protocol_id)
            .bind(path.window_id)
            .bind(path.finding_id)
            .bind(path.possible_diagnosis_id)
            .bind(path.subdiagnosis_id)
            .bind(path.sub_subdiagnosis_id)
            .bind(path.third_order_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::from(e).on_foreign_key_violation(|| {
                    Error::InvalidPath(format!(
                        "selection for clip {} references an unknown clip, user or taxonomy node",
                        clip_id
                    ))
                })
            })?;

        info!(
            selection_id = selection.id,
            clip_id,
            user_id,
            "Selection saved"
        );

        Ok(selection)
    }

    pub async fn get_selection(&self, clip_id: i64, user_id: i64) -> Result<Selection> {
        let selection = sqlx::query_as::<_, Selection>(
            r#"
            SELECT
                id, clip_id, user_id,
                protocol_id, window_id, finding_id, possible_diagnosis_id,
                subdiagnosis_id, sub_subdiagnosis_id, third_order_id,
                created_at, updated_at
            FROM selections
            WHERE clip_id = ? AND user_id = ?
            "#,
        )
        .bind(clip_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        debug!(clip_id, user_id, found = selection.is_some(), "Selection lookup");

        selection.ok_or_else(|| {
            Error::NotFound(format!("selection for clip {} and user {}", clip_id, user_id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{memory_pool, seed_clip, seed_full_path, seed_study, seed_user};

    async fn count_rows(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM selections")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_repeat_save_leaves_one_row() {
        let pool = memory_pool().await;
        sqlx::query("INSERT INTO users (id, display_name) VALUES (9, 'Student Nine')")
            .execute(&pool)
            .await
            .unwrap();
        let study = seed_study(&pool, 9).await;
        sqlx::query("INSERT INTO clips (id, study_id) VALUES (5, ?)")
            .bind(study)
            .execute(&pool)
            .await
            .unwrap();

        let full = seed_full_path(&pool).await;
        let shallow = SelectionPath {
            subdiagnosis_id: None,
            sub_subdiagnosis_id: None,
            third_order_id: None,
            ..full.clone()
        };

        let recorder = SelectionRecorder::new(pool.clone());
        let first = recorder.save_selection(5, 9, &full).await.unwrap();
        let second = recorder.save_selection(5, 9, &shallow).await.unwrap();

        assert_eq!(count_rows(&pool).await, 1);
        assert_eq!(first.id, second.id);
        assert_eq!(second.path, shallow);
        assert!(second.updated_at >= first.updated_at);

        let stored = recorder.get_selection(5, 9).await.unwrap();
        assert_eq!(stored.path, shallow);
        assert_eq!(stored.path.subdiagnosis_id, None);
    }

    #[tokio::test]
    async fn test_selections_are_per_user() {
        let pool = memory_pool().await;
        let alice = seed_user(&pool, "Alice", "student").await;
        let bob = seed_user(&pool, "Bob", "student").await;
        let study = seed_study(&pool, alice).await;
        let clip = seed_clip(&pool, study).await;
        let path = seed_full_path(&pool).await;

        let recorder = SelectionRecorder::new(pool.clone());
        recorder.save_selection(clip, alice, &path).await.unwrap();
        recorder.save_selection(clip, bob, &path).await.unwrap();

        assert_eq!(count_rows(&pool).await, 2);
    }

    #[tokio::test]
    async fn test_get_missing_selection_is_not_found() {
        let recorder = SelectionRecorder::new(memory_pool().await);
        assert!(matches!(
            recorder.get_selection(1, 1).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_node_is_invalid_path() {
        let pool = memory_pool().await;
        let user = seed_user(&pool, "Alice", "student").await;
        let study = seed_study(&pool, user).await;
        let clip = seed_clip(&pool, study).await;
        let mut path = seed_full_path(&pool).await;
        path.finding_id = 9999;

        let recorder = SelectionRecorder::new(pool.clone());
        let err = recorder.save_selection(clip, user, &path).await.unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)), "got {err:?}");
        assert_eq!(count_rows(&pool).await, 0);
    }
}
