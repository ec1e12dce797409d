//! Domain models for the protocol taxonomy and the evaluation ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One level of the fixed-depth clinical decision tree
///
/// Every level except [`TaxonomyLevel::Protocol`] has exactly one parent
/// level. Each level is stored in its own table with a parent-id column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxonomyLevel {
    Protocol,
    Window,
    Finding,
    PossibleDiagnosis,
    Subdiagnosis,
    SubSubdiagnosis,
    ThirdOrderDiagnosis,
}

impl TaxonomyLevel {
    /// All levels, root first
    pub const ALL: [TaxonomyLevel; 7] = [
        TaxonomyLevel::Protocol,
        TaxonomyLevel::Window,
        TaxonomyLevel::Finding,
        TaxonomyLevel::PossibleDiagnosis,
        TaxonomyLevel::Subdiagnosis,
        TaxonomyLevel::SubSubdiagnosis,
        TaxonomyLevel::ThirdOrderDiagnosis,
    ];

    /// Backing table name
    pub fn table(self) -> &'static str {
        match self {
            TaxonomyLevel::Protocol => "protocols",
            TaxonomyLevel::Window => "windows",
            TaxonomyLevel::Finding => "findings",
            TaxonomyLevel::PossibleDiagnosis => "possible_diagnoses",
            TaxonomyLevel::Subdiagnosis => "subdiagnoses",
            TaxonomyLevel::SubSubdiagnosis => "sub_subdiagnoses",
            TaxonomyLevel::ThirdOrderDiagnosis => "third_order_diagnoses",
        }
    }

    /// Column holding the parent id, `None` for the root
    pub fn parent_column(self) -> Option<&'static str> {
        match self {
            TaxonomyLevel::Protocol => None,
            TaxonomyLevel::Window => Some("protocol_id"),
            TaxonomyLevel::Finding => Some("window_id"),
            TaxonomyLevel::PossibleDiagnosis => Some("finding_id"),
            TaxonomyLevel::Subdiagnosis => Some("possible_diagnosis_id"),
            TaxonomyLevel::SubSubdiagnosis => Some("subdiagnosis_id"),
            TaxonomyLevel::ThirdOrderDiagnosis => Some("sub_subdiagnosis_id"),
        }
    }

    pub fn parent(self) -> Option<TaxonomyLevel> {
        let depth = self.depth();
        depth.checked_sub(1).map(|d| Self::ALL[d])
    }

    pub fn child(self) -> Option<TaxonomyLevel> {
        Self::ALL.get(self.depth() + 1).copied()
    }

    /// Distance from the root (protocol = 0)
    pub fn depth(self) -> usize {
        match self {
            TaxonomyLevel::Protocol => 0,
            TaxonomyLevel::Window => 1,
            TaxonomyLevel::Finding => 2,
            TaxonomyLevel::PossibleDiagnosis => 3,
            TaxonomyLevel::Subdiagnosis => 4,
            TaxonomyLevel::SubSubdiagnosis => 5,
            TaxonomyLevel::ThirdOrderDiagnosis => 6,
        }
    }

    /// Human-readable name used in error messages
    pub fn label(self) -> &'static str {
        match self {
            TaxonomyLevel::Protocol => "protocol",
            TaxonomyLevel::Window => "window",
            TaxonomyLevel::Finding => "finding",
            TaxonomyLevel::PossibleDiagnosis => "possible diagnosis",
            TaxonomyLevel::Subdiagnosis => "subdiagnosis",
            TaxonomyLevel::SubSubdiagnosis => "sub-subdiagnosis",
            TaxonomyLevel::ThirdOrderDiagnosis => "third-order diagnosis",
        }
    }
}

/// Clinical examination scheme at the root of a taxonomy
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Protocol {
    pub id: i64,
    pub key: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Any non-root node of the taxonomy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyNode {
    pub id: i64,
    pub level: TaxonomyLevel,
    pub parent_id: i64,
    pub key: String,
    pub name: String,
}

/// Protocol with its fully materialized scoring template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolDetail {
    pub id: i64,
    pub key: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub sections: Vec<ScoringSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringSection {
    pub id: i64,
    pub protocol_id: i64,
    pub key: String,
    pub name: String,
    pub sort_order: i64,
    pub items: Vec<ScoringItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScoringItem {
    pub id: i64,
    pub section_id: i64,
    pub key: String,
    pub label: String,
    pub max_score: f64,
    /// Display-only descriptor, e.g. "0-5 Likert"
    pub score_scale: Option<String>,
}

/// Path a user asserts through the taxonomy for one clip
///
/// The first four segments are required; the deeper ones stay `None` when a
/// selection terminates early.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SelectionPath {
    #[serde(alias = "protocolId")]
    pub protocol_id: i64,
    #[serde(alias = "windowId")]
    pub window_id: i64,
    #[serde(alias = "findingId")]
    pub finding_id: i64,
    #[serde(alias = "possibleDiagnosisId")]
    pub possible_diagnosis_id: i64,
    #[serde(default, alias = "subdiagnosisId")]
    pub subdiagnosis_id: Option<i64>,
    #[serde(default, alias = "subSubdiagnosisId")]
    pub sub_subdiagnosis_id: Option<i64>,
    #[serde(default, alias = "thirdOrderId")]
    pub third_order_id: Option<i64>,
}

/// Stored selection for a (clip, user) pair
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Selection {
    pub id: i64,
    pub clip_id: i64,
    pub user_id: i64,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub path: SelectionPath,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Attempt header as returned by `list_attempts`, with its derived total
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AttemptSummary {
    pub id: i64,
    pub submitted_at: DateTime<Utc>,
    pub total_score: f64,
    pub teacher_name: String,
    pub comment: Option<String>,
}

/// One scored item within an attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct EvaluationResponse {
    pub protocol_item_id: i64,
    pub score: f64,
}

/// Study-level evaluation record read by reporting
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EvaluationForm {
    pub id: i64,
    pub study_id: i64,
    pub teacher_id: i64,
    pub score: Option<f64>,
    pub feedback_summary: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// Lifecycle of a study's evaluation: absent → pending → completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    /// No evaluation form exists
    Absent,
    /// Form exists but no score is attached yet
    Pending,
    /// Form exists with a score
    Completed,
}

impl EvaluationStatus {
    pub fn classify(form: Option<&EvaluationForm>) -> Self {
        match form {
            None => EvaluationStatus::Absent,
            Some(form) if form.score.is_none() => EvaluationStatus::Pending,
            Some(_) => EvaluationStatus::Completed,
        }
    }
}

/// Canonical evaluation summary for one study
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyEvaluation {
    pub study_id: i64,
    pub has_evaluation: bool,
    pub status: EvaluationStatus,
    pub score: Option<f64>,
    pub feedback_summary: Option<String>,
    pub teacher_id: Option<i64>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl StudyEvaluation {
    /// Build the summary from the study's most recent form, if any
    pub fn from_latest(study_id: i64, latest: Option<EvaluationForm>) -> Self {
        let status = EvaluationStatus::classify(latest.as_ref());
        match latest {
            Some(form) => Self {
                study_id,
                has_evaluation: true,
                status,
                score: form.score,
                feedback_summary: form.feedback_summary,
                teacher_id: Some(form.teacher_id),
                submitted_at: Some(form.submitted_at),
            },
            None => Self {
                study_id,
                has_evaluation: false,
                status,
                score: None,
                feedback_summary: None,
                teacher_id: None,
                submitted_at: None,
            },
        }
    }
}
