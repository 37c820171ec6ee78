//! Row models shared across the URA services

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentiment classification of one review by one method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "positive" => Some(Sentiment::Positive),
            "negative" => Some(Sentiment::Negative),
            "neutral" => Some(Sentiment::Neutral),
            _ => None,
        }
    }
}

/// Classification of what kind of message a review is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewType {
    Gratitude,
    Complaint,
    Suggestion,
    Informational,
}

impl ReviewType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewType::Gratitude => "gratitude",
            ReviewType::Complaint => "complaint",
            ReviewType::Suggestion => "suggestion",
            ReviewType::Informational => "informational",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gratitude" => Some(ReviewType::Gratitude),
            "complaint" => Some(ReviewType::Complaint),
            "suggestion" => Some(ReviewType::Suggestion),
            "informational" => Some(ReviewType::Informational),
            _ => None,
        }
    }
}

/// Terminal state of one (review, method) analysis
///
/// Pending/Running exist only in memory; only terminal states are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(AnalysisStatus::Completed),
            "failed" => Some(AnalysisStatus::Failed),
            _ => None,
        }
    }
}

/// A registered sentiment-analysis method
///
/// `trust_rank` orders methods for ensemble tie-breaking (1 = most trusted).
/// `is_active` controls whether the orchestrator schedules the method for
/// new and changed reviews.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodRow {
    pub guid: Uuid,
    pub name: String,
    pub description: String,
    pub trust_rank: i64,
    pub is_active: bool,
}

/// The stored output of one method on one review
///
/// Unique per (review_id, method_id); re-analysis overwrites. Failed rows
/// carry the error text and a NULL sentiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResultRow {
    pub guid: Uuid,
    pub review_id: Uuid,
    pub method_id: Uuid,
    pub status: AnalysisStatus,
    pub sentiment: Option<Sentiment>,
    pub confidence: Option<f64>,
    pub review_type: Option<ReviewType>,
    pub keywords: Vec<String>,
    pub topics: Vec<String>,
    pub error: Option<String>,
    pub processed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentiment_string_round_trip() {
        for s in [Sentiment::Positive, Sentiment::Negative, Sentiment::Neutral] {
            assert_eq!(Sentiment::parse(s.as_str()), Some(s));
        }
        assert_eq!(Sentiment::parse("unknown"), None);
    }

    #[test]
    fn review_type_string_round_trip() {
        for t in [
            ReviewType::Gratitude,
            ReviewType::Complaint,
            ReviewType::Suggestion,
            ReviewType::Informational,
        ] {
            assert_eq!(ReviewType::parse(t.as_str()), Some(t));
        }
    }

    #[test]
    fn analysis_status_string_round_trip() {
        assert_eq!(
            AnalysisStatus::parse("completed"),
            Some(AnalysisStatus::Completed)
        );
        assert_eq!(AnalysisStatus::parse("failed"), Some(AnalysisStatus::Failed));
        assert_eq!(AnalysisStatus::parse("running"), None);
    }

    #[test]
    fn enums_serialize_lowercase() {
        // The JSON wire format must match the TEXT column vocabulary
        assert_eq!(
            serde_json::to_string(&Sentiment::Positive).unwrap(),
            "\"positive\""
        );
        assert_eq!(
            serde_json::to_string(&ReviewType::Complaint).unwrap(),
            "\"complaint\""
        );
    }
}
