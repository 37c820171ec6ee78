//! Rating-derived sentiment method
//!
//! Maps the star rating supplied with the review directly to a sentiment.
//! The most trusted method in the default registry: when a citizen leaves
//! one star, no text model gets to argue.

use super::{Analysis, ReviewInput, SentimentMethod};
use async_trait::async_trait;
use ura_common::db::models::{ReviewType, Sentiment};
use ura_common::{Error, Result};

/// Sentiment from the review's star rating
pub struct UserRatingMethod;

#[async_trait]
impl SentimentMethod for UserRatingMethod {
    fn name(&self) -> &'static str {
        "user_rating"
    }

    async fn analyze(&self, input: &ReviewInput) -> Result<Analysis> {
        let rating = input
            .rating
            .ok_or_else(|| Error::MethodFailure("review has no rating".to_string()))?;

        let (sentiment, confidence) = match rating {
            5 => (Sentiment::Positive, 1.0),
            4 => (Sentiment::Positive, 0.8),
            3 => (Sentiment::Neutral, 0.6),
            2 => (Sentiment::Negative, 0.8),
            1 => (Sentiment::Negative, 1.0),
            other => {
                // The ledger nulls out-of-range ratings before analysis;
                // reaching this means the invariant was violated upstream
                return Err(Error::MethodFailure(format!(
                    "rating {} outside [1,5]",
                    other
                )));
            }
        };

        let review_type = match sentiment {
            Sentiment::Positive => ReviewType::Gratitude,
            Sentiment::Negative => ReviewType::Complaint,
            Sentiment::Neutral => ReviewType::Informational,
        };

        Ok(Analysis {
            sentiment,
            confidence,
            review_type,
            keywords: vec![],
            topics: vec![],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn input(rating: Option<i64>) -> ReviewInput {
        ReviewInput {
            review_id: Uuid::new_v4(),
            text: "Отлично".to_string(),
            rating,
        }
    }

    #[tokio::test]
    async fn five_stars_is_fully_confident_positive() {
        let analysis = UserRatingMethod.analyze(&input(Some(5))).await.unwrap();
        assert_eq!(analysis.sentiment, Sentiment::Positive);
        assert!((analysis.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(analysis.review_type, ReviewType::Gratitude);
    }

    #[tokio::test]
    async fn midpoint_is_neutral() {
        let analysis = UserRatingMethod.analyze(&input(Some(3))).await.unwrap();
        assert_eq!(analysis.sentiment, Sentiment::Neutral);
        assert!((analysis.confidence - 0.6).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn one_star_is_fully_confident_negative() {
        let analysis = UserRatingMethod.analyze(&input(Some(1))).await.unwrap();
        assert_eq!(analysis.sentiment, Sentiment::Negative);
        assert!((analysis.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(analysis.review_type, ReviewType::Complaint);
    }

    #[tokio::test]
    async fn missing_rating_is_a_method_failure() {
        let err = UserRatingMethod.analyze(&input(None)).await.unwrap_err();
        assert!(matches!(err, Error::MethodFailure(_)));
    }
}
