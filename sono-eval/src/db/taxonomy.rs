//! Taxonomy Store
//!
//! Protocols, the six taxonomy levels beneath them, and each protocol's
//! scoring template (sections → items).

use sono_common::models::{
    Protocol, ProtocolDetail, ScoringItem, ScoringSection, TaxonomyLevel, TaxonomyNode,
};
use sono_common::slug::{derive_key, is_valid_key};
use sono_common::{Error, Result};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::begin_write;

/// Read-mostly access to the clinical decision tree and scoring template
#[derive(Clone)]
pub struct TaxonomyStore {
    pool: SqlitePool,
}

impl TaxonomyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// All protocols, ordered by display name
    pub async fn list_protocols(&self) -> Result<Vec<Protocol>> {
        let protocols = sqlx::query_as::<_, Protocol>(
            "SELECT id, key, name, created_at FROM protocols ORDER BY name, id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(protocols)
    }

    /// Create a protocol, deriving its key from `name`
    ///
    /// Empty names (or names with no usable characters) are a validation
    /// error; a key collision is a conflict.
    pub async fn create_protocol(&self, name: &str) -> Result<Protocol> {
        let name = validated_name(name, "protocol name")?;
        let key = resolve_key(None, &name)?;

        let protocol = sqlx::query_as::<_, Protocol>(
            r#"
            INSERT INTO protocols (key, name)
            VALUES (?, ?)
            RETURNING id, key, name, created_at
            "#,
        )
        .bind(&key)
        .bind(&name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::from(e)
                .on_unique_violation(|| format!("protocol key '{}' already exists", key))
        })?;

        info!(protocol_id = protocol.id, key = %protocol.key, "Protocol created");
        Ok(protocol)
    }

    pub async fn find_protocol(&self, key: &str) -> Result<Option<Protocol>> {
        let protocol = sqlx::query_as::<_, Protocol>(
            "SELECT id, key, name, created_at FROM protocols WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(protocol)
    }

    /// Protocol by key, [`Error::NotFound`] if it doesn't resolve
    pub async fn protocol_by_key(&self, key: &str) -> Result<Protocol> {
        self.find_protocol(key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("protocol '{}'", key)))
    }

    /// Protocol metadata plus the materialized section → item tree
    ///
    /// Sections come back by `sort_order`, items by insertion id. A protocol
    /// without sections, or a section without items, yields empty arrays.
    pub async fn get_protocol(&self, key: &str) -> Result<ProtocolDetail> {
        let protocol = self.protocol_by_key(key).await?;

        let section_rows = sqlx::query_as::<_, (i64, i64, String, String, i64)>(
            r#"
            SELECT id, protocol_id, key, name, sort_order
            FROM scoring_sections
            WHERE protocol_id = ?
            ORDER BY sort_order, id
            "#,
        )
        .bind(protocol.id)
        .fetch_all(&self.pool)
        .await?;

        let mut sections = Vec::with_capacity(section_rows.len());
        for (id, protocol_id, key, name, sort_order) in section_rows {
            let items = self.list_items(id).await?;
            sections.push(ScoringSection {
                id,
                protocol_id,
                key,
                name,
                sort_order,
                items,
            });
        }

        debug!(key = %protocol.key, sections = sections.len(), "Loaded protocol template");

        Ok(ProtocolDetail {
            id: protocol.id,
            key: protocol.key,
            name: protocol.name,
            created_at: protocol.created_at,
            sections,
        })
    }

    async fn list_items(&self, section_id: i64) -> Result<Vec<ScoringItem>> {
        let items = sqlx::query_as::<_, ScoringItem>(
            r#"
            SELECT id, section_id, key, label, max_score, score_scale
            FROM scoring_items
            WHERE section_id = ?
            ORDER BY id
            "#,
        )
        .bind(section_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    /// Windows of a protocol; the protocol key itself must resolve
    pub async fn list_windows(&self, protocol_key: &str) -> Result<Vec<TaxonomyNode>> {
        let protocol = self.protocol_by_key(protocol_key).await?;
        self.list_children(TaxonomyLevel::Window, protocol.id).await
    }

    /// Nodes of `level` whose parent is `parent_id`, ordered by key
    ///
    /// An unknown parent is not an error: it simply has no children.
    pub async fn list_children(
        &self,
        level: TaxonomyLevel,
        parent_id: i64,
    ) -> Result<Vec<TaxonomyNode>> {
        let parent_column = level.parent_column().ok_or_else(|| {
            Error::Internal(format!("{} has no parent level", level.label()))
        })?;

        let sql = format!(
            "SELECT id, {parent_column}, key, name FROM {} WHERE {parent_column} = ? ORDER BY key",
            level.table()
        );

        let rows = sqlx::query_as::<_, (i64, i64, String, String)>(&sql)
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(id, parent_id, key, name)| TaxonomyNode {
                id,
                level,
                parent_id,
                key,
                name,
            })
            .collect())
    }

    /// Create a window under the protocol identified by `protocol_key`
    pub async fn create_window(
        &self,
        protocol_key: &str,
        key: Option<&str>,
        name: &str,
    ) -> Result<TaxonomyNode> {
        let protocol = self.protocol_by_key(protocol_key).await?;
        self.create_node(TaxonomyLevel::Window, protocol.id, key, name)
            .await
    }

    /// Create a node of `level` under `parent_id`
    ///
    /// `key` defaults to the key derived from `name`. Unknown parent →
    /// [`Error::NotFound`]; key already used under the same parent →
    /// [`Error::Conflict`].
    pub async fn create_node(
        &self,
        level: TaxonomyLevel,
        parent_id: i64,
        key: Option<&str>,
        name: &str,
    ) -> Result<TaxonomyNode> {
        let (Some(parent), Some(parent_column)) = (level.parent(), level.parent_column()) else {
            return Err(Error::Validation(
                "protocols are created from a name only".to_string(),
            ));
        };

        let name = validated_name(name, &format!("{} name", level.label()))?;
        let key = resolve_key(key, &name)?;

        let sql = format!(
            "INSERT INTO {} ({parent_column}, key, name) VALUES (?, ?, ?) RETURNING id",
            level.table()
        );

        let id: i64 = sqlx::query_scalar(&sql)
            .bind(parent_id)
            .bind(&key)
            .bind(&name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::from(e)
                    .on_unique_violation(|| {
                        format!(
                            "{} key '{}' already exists under {} {}",
                            level.label(),
                            key,
                            parent.label(),
                            parent_id
                        )
                    })
                    .on_foreign_key_violation(|| {
                        Error::NotFound(format!("{} {}", parent.label(), parent_id))
                    })
            })?;

        info!(level = level.label(), id, parent_id, key = %key, "Taxonomy node created");

        Ok(TaxonomyNode {
            id,
            level,
            parent_id,
            key,
            name,
        })
    }

    /// Append a scoring section to a protocol's template
    ///
    /// Without an explicit `sort_order` the section goes after the last one.
    pub async fn create_section(
        &self,
        protocol_key: &str,
        key: Option<&str>,
        name: &str,
        sort_order: Option<i64>,
    ) -> Result<ScoringSection> {
        let protocol = self.protocol_by_key(protocol_key).await?;
        let name = validated_name(name, "section name")?;
        let key = resolve_key(key, &name)?;

        let mut tx = begin_write(&self.pool).await?;

        let sort_order = match sort_order {
            Some(order) => order,
            None => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COALESCE(MAX(sort_order), 0) + 1 FROM scoring_sections WHERE protocol_id = ?",
                )
                .bind(protocol.id)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO scoring_sections (protocol_id, key, name, sort_order)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(protocol.id)
        .bind(&key)
        .bind(&name)
        .bind(sort_order)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            Error::from(e).on_unique_violation(|| {
                format!("section key '{}' already exists in protocol '{}'", key, protocol.key)
            })
        })?;

        tx.commit().await?;

        info!(section_id = id, protocol = %protocol.key, key = %key, "Scoring section created");

        Ok(ScoringSection {
            id,
            protocol_id: protocol.id,
            key,
            name,
            sort_order,
            items: Vec::new(),
        })
    }

    /// Add an item to a scoring section
    ///
    /// Item keys are unique across the whole protocol, since attempts
    /// reference items by key within a protocol.
    pub async fn create_item(
        &self,
        section_id: i64,
        key: Option<&str>,
        label: &str,
        max_score: f64,
        score_scale: Option<&str>,
    ) -> Result<ScoringItem> {
        let label = validated_name(label, "item label")?;
        let key = resolve_key(key, &label)?;
        if !max_score.is_finite() || max_score <= 0.0 {
            return Err(Error::Validation(format!(
                "max_score must be a positive number, got {}",
                max_score
            )));
        }

        let mut tx = begin_write(&self.pool).await?;

        let protocol_id: i64 =
            sqlx::query_scalar("SELECT protocol_id FROM scoring_sections WHERE id = ?")
                .bind(section_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| Error::NotFound(format!("section {}", section_id)))?;

        let taken: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM scoring_items i
            JOIN scoring_sections s ON s.id = i.section_id
            WHERE s.protocol_id = ? AND i.key = ?
            "#,
        )
        .bind(protocol_id)
        .bind(&key)
        .fetch_one(&mut *tx)
        .await?;

        if taken > 0 {
            return Err(Error::Conflict(format!(
                "item key '{}' already exists in this protocol",
                key
            )));
        }

        let item = sqlx::query_as::<_, ScoringItem>(
            r#"
            INSERT INTO scoring_items (section_id, key, label, max_score, score_scale)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, section_id, key, label, max_score, score_scale
            "#,
        )
        .bind(section_id)
        .bind(&key)
        .bind(&label)
        .bind(max_score)
        .bind(score_scale)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(item_id = item.id, section_id, key = %item.key, max_score, "Scoring item created");
        Ok(item)
    }
}

/// Resolve an item key within a protocol's template to `(item_id, max_score)`
pub(crate) async fn resolve_item(
    conn: &mut SqliteConnection,
    protocol_id: i64,
    item_key: &str,
) -> Result<Option<(i64, f64)>> {
    let item = sqlx::query_as::<_, (i64, f64)>(
        r#"
        SELECT i.id, i.max_score
        FROM scoring_items i
        JOIN scoring_sections s ON s.id = i.section_id
        WHERE s.protocol_id = ? AND i.key = ?
        ORDER BY i.id
        LIMIT 1
        "#,
    )
    .bind(protocol_id)
    .bind(item_key)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(item)
}

fn validated_name(name: &str, what: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", what)));
    }
    Ok(trimmed.to_string())
}

/// Explicit key if given (must already be in derived form), else derived from `name`
fn resolve_key(explicit: Option<&str>, name: &str) -> Result<String> {
    match explicit.map(str::trim).filter(|k| !k.is_empty()) {
        Some(key) if is_valid_key(key) => Ok(key.to_string()),
        Some(key) => Err(Error::Validation(format!(
            "key '{}' may only contain a-z, 0-9 and '_'",
            key
        ))),
        None => {
            let key = derive_key(name);
            if key.is_empty() {
                Err(Error::Validation(format!(
                    "'{}' does not produce a usable key",
                    name
                )))
            } else {
                Ok(key)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool;

    #[tokio::test]
    async fn test_create_protocol_derives_key() {
        let store = TaxonomyStore::new(memory_pool().await);

        let protocol = store.create_protocol("  Lung US ").await.unwrap();
        assert_eq!(protocol.key, "lung_us");
        assert_eq!(protocol.name, "Lung US");

        let listed = store.list_protocols().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "lung_us");
    }

    #[tokio::test]
    async fn test_create_protocol_rejects_blank_names() {
        let store = TaxonomyStore::new(memory_pool().await);

        assert!(matches!(store.create_protocol("").await, Err(Error::Validation(_))));
        assert!(matches!(store.create_protocol("   \t").await, Err(Error::Validation(_))));
        assert!(matches!(store.create_protocol("!!!").await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_duplicate_key_is_conflict() {
        let store = TaxonomyStore::new(memory_pool().await);

        store.create_protocol("Lung US").await.unwrap();
        let err = store.create_protocol("lung   us").await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_get_protocol_unknown_is_not_found() {
        let store = TaxonomyStore::new(memory_pool().await);
        assert!(matches!(store.get_protocol("nope").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_get_protocol_tolerates_empty_template() {
        let store = TaxonomyStore::new(memory_pool().await);
        store.create_protocol("FAST").await.unwrap();
        store.create_section("fast", None, "Views", None).await.unwrap();

        let detail = store.get_protocol("fast").await.unwrap();
        assert_eq!(detail.sections.len(), 1);
        assert!(detail.sections[0].items.is_empty());

        store.create_protocol("Empty").await.unwrap();
        let detail = store.get_protocol("empty").await.unwrap();
        assert!(detail.sections.is_empty());
    }

    #[tokio::test]
    async fn test_sections_ordered_by_sort_order_items_by_id() {
        let store = TaxonomyStore::new(memory_pool().await);
        store.create_protocol("Cardiac").await.unwrap();

        let late = store.create_section("cardiac", None, "Late", Some(10)).await.unwrap();
        let early = store.create_section("cardiac", None, "Early", Some(1)).await.unwrap();
        let appended = store.create_section("cardiac", None, "Appended", None).await.unwrap();
        assert_eq!(appended.sort_order, 11);

        store.create_item(early.id, None, "Zeta", 5.0, None).await.unwrap();
        store.create_item(early.id, None, "Alpha", 3.0, Some("0-3")).await.unwrap();

        let detail = store.get_protocol("cardiac").await.unwrap();
        let keys: Vec<&str> = detail.sections.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["early", "late", "appended"]);
        assert_eq!(detail.sections[1].id, late.id);

        let items: Vec<&str> = detail.sections[0].items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(items, vec!["zeta", "alpha"]);
        assert_eq!(detail.sections[0].items[1].score_scale.as_deref(), Some("0-3"));
    }

    #[tokio::test]
    async fn test_item_validation_and_conflicts() {
        let store = TaxonomyStore::new(memory_pool().await);
        store.create_protocol("Lung US").await.unwrap();
        let a = store.create_section("lung_us", None, "A", None).await.unwrap();
        let b = store.create_section("lung_us", None, "B", None).await.unwrap();

        assert!(matches!(
            store.create_item(a.id, None, "Pleura", 0.0, None).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            store.create_item(a.id, None, "Pleura", f64::NAN, None).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            store.create_item(999, None, "Pleura", 5.0, None).await,
            Err(Error::NotFound(_))
        ));

        store.create_item(a.id, None, "Pleura", 5.0, None).await.unwrap();
        assert!(matches!(
            store.create_item(b.id, Some("pleura"), "Pleura again", 5.0, None).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_windows_lookup_requires_protocol() {
        let store = TaxonomyStore::new(memory_pool().await);
        assert!(matches!(store.list_windows("ghost").await, Err(Error::NotFound(_))));

        store.create_protocol("Lung US").await.unwrap();
        assert!(store.list_windows("lung_us").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_children_ordered_by_key_and_empty_for_unknown_parent() {
        let store = TaxonomyStore::new(memory_pool().await);
        store.create_protocol("Lung US").await.unwrap();

        let right = store.create_window("lung_us", None, "Right Anterior").await.unwrap();
        store.create_window("lung_us", None, "Left Anterior").await.unwrap();

        let windows = store.list_windows("lung_us").await.unwrap();
        let keys: Vec<&str> = windows.iter().map(|w| w.key.as_str()).collect();
        assert_eq!(keys, vec!["left_anterior", "right_anterior"]);

        store
            .create_node(TaxonomyLevel::Finding, right.id, Some("b_lines"), "B-lines")
            .await
            .unwrap();
        store
            .create_node(TaxonomyLevel::Finding, right.id, None, "A-lines")
            .await
            .unwrap();

        let findings = store.list_children(TaxonomyLevel::Finding, right.id).await.unwrap();
        let keys: Vec<&str> = findings.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["alines", "b_lines"]);
        assert!(findings.iter().all(|f| f.level == TaxonomyLevel::Finding));

        let none = store
            .list_children(TaxonomyLevel::PossibleDiagnosis, 4242)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_create_node_errors() {
        let store = TaxonomyStore::new(memory_pool().await);
        store.create_protocol("Lung US").await.unwrap();
        let window = store.create_window("lung_us", None, "Apex").await.unwrap();

        assert!(matches!(
            store.create_node(TaxonomyLevel::Finding, 777, None, "Orphan").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store.create_node(TaxonomyLevel::Protocol, 1, None, "Nested").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            store.create_node(TaxonomyLevel::Finding, window.id, Some("Bad Key"), "x").await,
            Err(Error::Validation(_))
        ));

        store.create_node(TaxonomyLevel::Finding, window.id, None, "Sliding").await.unwrap();
        assert!(matches!(
            store.create_node(TaxonomyLevel::Finding, window.id, None, "sliding").await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_item() {
        let pool = memory_pool().await;
        let store = TaxonomyStore::new(pool.clone());
        let protocol = store.create_protocol("Lung US").await.unwrap();
        let section = store.create_section("lung_us", None, "Technique", None).await.unwrap();
        let item = store
            .create_item(section.id, Some("depth"), "Depth", 5.0, None)
            .await
            .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let resolved = resolve_item(&mut conn, protocol.id, "depth").await.unwrap();
        assert_eq!(resolved, Some((item.id, 5.0)));
        assert_eq!(resolve_item(&mut conn, protocol.id, "ghost").await.unwrap(), None);
    }
}
