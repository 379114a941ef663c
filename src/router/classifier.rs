//! Keyword-weighted query classification.
//!
//! Each category carries a fixed trigger list. A trigger contained in the
//! lower-cased query adds `len / 10` to its category's score, or 1.5 times
//! that when the query starts with it. The highest score wins.

use serde::Serialize;
use std::fmt;

use crate::provider::ProviderId;

/// Coarse intent of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryCategory {
    Faq,
    Technical,
    Creative,
    Analysis,
    Debug,
    General,
}

impl QueryCategory {
    pub const ALL: [QueryCategory; 6] = [
        QueryCategory::Faq,
        QueryCategory::Technical,
        QueryCategory::Creative,
        QueryCategory::Analysis,
        QueryCategory::Debug,
        QueryCategory::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryCategory::Faq => "faq",
            QueryCategory::Technical => "technical",
            QueryCategory::Creative => "creative",
            QueryCategory::Analysis => "analysis",
            QueryCategory::Debug => "debug",
            QueryCategory::General => "general",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            QueryCategory::Faq => "FAQ",
            QueryCategory::Technical => "Technical",
            QueryCategory::Creative => "Creative",
            QueryCategory::Analysis => "Analysis",
            QueryCategory::Debug => "Debug",
            QueryCategory::General => "General",
        }
    }

    /// Static optimization profile for this category.
    pub fn profile(&self) -> OptimizationProfile {
        match self {
            QueryCategory::Faq => OptimizationProfile {
                cache_priority: CachePriority::High,
                preferred: Preference::Only(ProviderId::Gemini),
                parallel_allowed: false,
                synthesis_enabled: true,
                timeout_multiplier: 0.6,
            },
            QueryCategory::Technical => OptimizationProfile {
                cache_priority: CachePriority::Medium,
                preferred: Preference::Auto,
                parallel_allowed: true,
                synthesis_enabled: true,
                timeout_multiplier: 1.2,
            },
            QueryCategory::Creative => OptimizationProfile {
                cache_priority: CachePriority::Low,
                preferred: Preference::Only(ProviderId::Llama),
                parallel_allowed: false,
                synthesis_enabled: false,
                timeout_multiplier: 1.5,
            },
            QueryCategory::Debug => OptimizationProfile {
                cache_priority: CachePriority::Medium,
                preferred: Preference::Only(ProviderId::Gemini),
                parallel_allowed: true,
                synthesis_enabled: true,
                timeout_multiplier: 1.0,
            },
            QueryCategory::Analysis => OptimizationProfile {
                cache_priority: CachePriority::High,
                preferred: Preference::All,
                parallel_allowed: true,
                synthesis_enabled: true,
                timeout_multiplier: 1.3,
            },
            QueryCategory::General => OptimizationProfile {
                cache_priority: CachePriority::Medium,
                preferred: Preference::Auto,
                parallel_allowed: false,
                synthesis_enabled: true,
                timeout_multiplier: 1.0,
            },
        }
    }

    /// Provider whose answers historically suit this category, if any.
    pub fn favored_provider(&self) -> Option<ProviderId> {
        match self {
            QueryCategory::Faq | QueryCategory::Debug => Some(ProviderId::Gemini),
            QueryCategory::Creative => Some(ProviderId::Llama),
            _ => None,
        }
    }

    fn triggers(&self) -> &'static [&'static str] {
        match self {
            QueryCategory::Faq => &[
                "what is",
                "how to",
                "why does",
                "can you explain",
                "what are",
                "how do i",
                "tell me about",
                "what's the difference",
                "compare",
            ],
            QueryCategory::Technical => &[
                "implement",
                "code",
                "function",
                "class",
                "algorithm",
                "debug",
                "error",
                "exception",
                "api",
                "database",
                "performance",
            ],
            QueryCategory::Creative => &[
                "create",
                "generate",
                "design",
                "write",
                "compose",
                "brainstorm",
                "imagine",
                "story",
                "poem",
                "creative",
            ],
            QueryCategory::Analysis => &[
                "analyze",
                "evaluate",
                "assess",
                "review",
                "examine",
                "study",
                "investigate",
                "research",
                "compare",
                "contrast",
            ],
            QueryCategory::Debug => &[
                "fix",
                "debug",
                "error",
                "bug",
                "issue",
                "problem",
                "broken",
                "not working",
                "fails",
                "exception",
                "traceback",
            ],
            QueryCategory::General => &[],
        }
    }
}

impl fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How valuable caching is for a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePriority {
    High,
    Medium,
    Low,
}

/// Which providers a category prefers before adaptive scoring kicks in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preference {
    /// No preference; fall through to adaptive scoring.
    Auto,
    /// A single provider, when available.
    Only(ProviderId),
    /// Every available provider.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizationProfile {
    pub cache_priority: CachePriority,
    pub preferred: Preference,
    pub parallel_allowed: bool,
    pub synthesis_enabled: bool,
    pub timeout_multiplier: f64,
}

/// Category plus how strongly the query matched it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    pub category: QueryCategory,
    pub confidence: f64,
}

/// Categories that are scored, in tie-break order.
const SCORED: [QueryCategory; 5] = [
    QueryCategory::Faq,
    QueryCategory::Technical,
    QueryCategory::Creative,
    QueryCategory::Analysis,
    QueryCategory::Debug,
];

const PREFIX_BONUS: f64 = 1.5;
const FALLBACK_CONFIDENCE: f64 = 0.5;

/// Pure classifier over the fixed trigger tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryClassifier;

impl QueryClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Score of one category against an already lower-cased query.
    fn score(category: QueryCategory, query_lower: &str) -> f64 {
        category
            .triggers()
            .iter()
            .filter(|kw| query_lower.contains(**kw))
            .map(|kw| {
                let weight = kw.len() as f64 / 10.0;
                if query_lower.starts_with(kw) {
                    weight * PREFIX_BONUS
                } else {
                    weight
                }
            })
            .sum()
    }

    pub fn classify(&self, query: &str) -> Classification {
        let query_lower = query.trim().to_lowercase();

        let mut best: Option<(QueryCategory, f64)> = None;
        for category in SCORED {
            let score = Self::score(category, &query_lower);
            if score > best.map_or(0.0, |(_, s)| s) {
                best = Some((category, score));
            }
        }

        match best {
            Some((category, score)) => {
                let words = query_lower.split_whitespace().count().max(1) as f64;
                Classification {
                    category,
                    confidence: (score / words).clamp(0.0, 1.0),
                }
            }
            None => Classification {
                category: QueryCategory::General,
                confidence: FALLBACK_CONFIDENCE,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(q: &str) -> Classification {
        QueryClassifier::new().classify(q)
    }

    #[test]
    fn test_faq_question() {
        let c = classify("What is dependency injection?");
        assert_eq!(c.category, QueryCategory::Faq);
        // "what is": 0.7 * 1.5 over 4 words
        assert!((c.confidence - 1.05 / 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_each_category_recognized() {
        assert_eq!(
            classify("Implement a database connection pool class").category,
            QueryCategory::Technical
        );
        assert_eq!(
            classify("Write a poem about the ocean").category,
            QueryCategory::Creative
        );
        assert_eq!(
            classify("Evaluate and assess microservices vs monoliths").category,
            QueryCategory::Analysis
        );
        assert_eq!(
            classify("My build is broken and the fix is not working").category,
            QueryCategory::Debug
        );
    }

    #[test]
    fn test_no_trigger_is_general() {
        let c = classify("Hello there");
        assert_eq!(c.category, QueryCategory::General);
        assert_eq!(c.confidence, 0.5);

        let c = classify("");
        assert_eq!(c.category, QueryCategory::General);
    }

    #[test]
    fn test_tie_goes_to_earlier_category() {
        // "compare" is both an FAQ and an ANALYSIS trigger.
        assert_eq!(classify("compare").category, QueryCategory::Faq);
    }

    #[test]
    fn test_confidence_is_clamped() {
        // "debug" leads (0.75) and contains "bug" (0.3); Technical only has 0.75.
        let c = classify("debug");
        assert_eq!(c.category, QueryCategory::Debug);
        assert_eq!(c.confidence, 1.0);
    }

    #[test]
    fn test_equal_scores_keep_technical_over_debug() {
        // Both categories list "exception", so both score 1.35.
        let c = classify("exception");
        assert_eq!(c.category, QueryCategory::Technical);
        assert_eq!(c.confidence, 1.0);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(classify("WHAT IS RUST"), classify("what is rust"));
    }

    #[test]
    fn test_profiles() {
        let faq = QueryCategory::Faq.profile();
        assert_eq!(faq.preferred, Preference::Only(ProviderId::Gemini));
        assert!(!faq.parallel_allowed);
        assert_eq!(faq.timeout_multiplier, 0.6);

        assert_eq!(QueryCategory::Analysis.profile().preferred, Preference::All);
        assert!(!QueryCategory::Creative.profile().synthesis_enabled);
        assert_eq!(QueryCategory::General.profile().preferred, Preference::Auto);
    }

    #[test]
    fn test_category_serializes_lowercase() {
        let json = serde_json::to_value(QueryCategory::Debug).unwrap();
        assert_eq!(json, "debug");
    }
}
