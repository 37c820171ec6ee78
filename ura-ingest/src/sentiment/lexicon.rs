//! Keyword-dictionary sentiment method
//!
//! Rule-based classification over Russian review text: sentiment and
//! review-type from keyword dictionaries, keywords by word frequency with
//! a stop-word list, topics from the group-vocabulary keyword map.

use super::{Analysis, ReviewInput, SentimentMethod};
use async_trait::async_trait;
use std::collections::HashMap;
use ura_common::db::models::{ReviewType, Sentiment};
use ura_common::{Error, Result};

const POSITIVE_WORDS: &[&str] = &[
    "хорошо", "отлично", "отличный", "супер", "нравится", "доволен", "спасибо",
    "благодарю", "благодарность", "прекрасно", "замечательно", "восхитительно",
];

const NEGATIVE_WORDS: &[&str] = &[
    "плохо", "ужасно", "ужас", "кошмар", "недоволен", "жалоба", "проблема",
    "грязно", "хамство", "очередь", "очереди",
];

const GRATITUDE_WORDS: &[&str] = &["спасибо", "благодарю", "благодарность", "признателен"];

const SUGGESTION_WORDS: &[&str] = &["предлагаю", "можно", "нужно", "следует", "рекомендую", "стоит"];

const COMPLAINT_WORDS: &[&str] = &["жалоба", "недоволен", "плохо", "ужасно", "кошмар", "проблема"];

const STOP_WORDS: &[&str] = &[
    "и", "в", "на", "не", "что", "это", "как", "но", "за", "по", "из", "у",
    "же", "от", "для", "так", "был", "была", "было", "были", "есть", "очень",
    "там", "здесь", "мне", "нас", "вас", "они", "она", "оно",
];

/// Topic tags keyed by the group vocabulary's characteristic words
const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    ("schools", &["школа", "учитель", "ученик", "класс", "урок"]),
    ("hospitals", &["больница", "врач", "пациент", "лечение", "медицинский"]),
    ("pharmacies", &["аптека", "лекарство", "препарат", "фармацевт"]),
    ("kindergartens", &["детский", "сад", "воспитатель", "группа"]),
    ("polyclinics", &["поликлиника", "прием", "регистратура"]),
    ("shopping_malls", &["магазин", "торговый", "центр", "покупка"]),
    ("universities", &["университет", "студент", "лекция", "преподаватель"]),
];

/// How many frequency-ranked keywords to keep
const KEYWORD_LIMIT: usize = 3;

/// Rule-based sentiment, review-type, keyword, and topic extraction
pub struct LexiconRuleMethod;

impl LexiconRuleMethod {
    pub fn new() -> Self {
        Self
    }

    /// Lowercase, strip punctuation to spaces, collapse whitespace
    fn preprocess(text: &str) -> Vec<String> {
        text.to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect::<String>()
            .split_whitespace()
            .map(|s| s.to_string())
            .collect()
    }

    fn count_hits(tokens: &[String], dictionary: &[&str]) -> usize {
        tokens.iter().filter(|t| dictionary.contains(&t.as_str())).count()
    }

    fn classify_sentiment(tokens: &[String]) -> (Sentiment, f64) {
        let positive = Self::count_hits(tokens, POSITIVE_WORDS);
        let negative = Self::count_hits(tokens, NEGATIVE_WORDS);

        if positive == 0 && negative == 0 {
            return (Sentiment::Neutral, 0.5);
        }

        let total = (positive + negative) as f64;
        if positive > negative {
            (Sentiment::Positive, (positive as f64 / total).min(0.95))
        } else if negative > positive {
            (Sentiment::Negative, (negative as f64 / total).min(0.95))
        } else {
            (Sentiment::Neutral, 0.5)
        }
    }

    fn classify_review_type(tokens: &[String]) -> ReviewType {
        let gratitude = Self::count_hits(tokens, GRATITUDE_WORDS);
        let suggestion = Self::count_hits(tokens, SUGGESTION_WORDS);
        let complaint = Self::count_hits(tokens, COMPLAINT_WORDS);

        let best = gratitude.max(suggestion).max(complaint);
        if best == 0 {
            ReviewType::Informational
        } else if best == gratitude {
            ReviewType::Gratitude
        } else if best == complaint {
            ReviewType::Complaint
        } else {
            ReviewType::Suggestion
        }
    }

    /// Top tokens by frequency, stop words and short tokens removed
    fn extract_keywords(tokens: &[String]) -> Vec<String> {
        let mut freq: HashMap<&str, usize> = HashMap::new();
        for token in tokens {
            if token.chars().count() <= 2 || STOP_WORDS.contains(&token.as_str()) {
                continue;
            }
            *freq.entry(token.as_str()).or_insert(0) += 1;
        }

        let mut ranked: Vec<(&str, usize)> = freq.into_iter().collect();
        // Sort by frequency, alphabetical for a stable order within a rank
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        ranked
            .into_iter()
            .take(KEYWORD_LIMIT)
            .map(|(word, _)| word.to_string())
            .collect()
    }

    fn extract_topics(tokens: &[String]) -> Vec<String> {
        TOPIC_KEYWORDS
            .iter()
            .filter(|(_, words)| Self::count_hits(tokens, words) > 0)
            .map(|(topic, _)| topic.to_string())
            .collect()
    }
}

impl Default for LexiconRuleMethod {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SentimentMethod for LexiconRuleMethod {
    fn name(&self) -> &'static str {
        "lexicon_rule"
    }

    async fn analyze(&self, input: &ReviewInput) -> Result<Analysis> {
        let tokens = Self::preprocess(&input.text);
        if tokens.is_empty() {
            return Err(Error::MethodFailure("empty text after preprocessing".to_string()));
        }

        let (sentiment, confidence) = Self::classify_sentiment(&tokens);
        Ok(Analysis {
            sentiment,
            confidence,
            review_type: Self::classify_review_type(&tokens),
            keywords: Self::extract_keywords(&tokens),
            topics: Self::extract_topics(&tokens),
        })
    }
}
