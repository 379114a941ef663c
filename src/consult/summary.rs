//! Human-readable rendering of consultation outcomes.

use super::types::ProviderOutcome;
use crate::cache::CacheEntry;
use crate::router::QueryCategory;

const SECTION_RULE: &str = "==================================================";
const RESPONSE_RULE: &str = "------------------------------";

/// Summary for a consultation with at least one success.
///
/// With synthesis disabled the first successful answer is returned as is.
pub fn summarize(outcomes: &[ProviderOutcome], category: QueryCategory, synthesis: bool) -> String {
    let successes: Vec<&ProviderOutcome> = outcomes.iter().filter(|o| o.success).collect();
    let Some(first) = successes.first() else {
        return String::new();
    };

    if !synthesis {
        return first.response.clone().unwrap_or_default();
    }

    if successes.len() == 1 {
        return format!(
            "**AI Consultation Summary**\n\n\
             **Provider:** {} ({})\n\
             **Response Time:** {:.2}s\n\
             **Pattern:** {}\n\n\
             {}",
            first.provider.display_name(),
            first.model_id.as_deref().unwrap_or("unknown"),
            first.latency_secs(),
            category.title(),
            first.response.as_deref().unwrap_or_default(),
        );
    }

    let avg = outcomes.iter().map(|o| o.latency_secs()).sum::<f64>() / outcomes.len() as f64;

    let mut out = String::from("**Multi-AI Consultation Summary**\n\n");
    out.push_str(&format!("**Average Response Time:** {:.2}s\n", avg));
    out.push_str(&format!("**Pattern Detected:** {}\n\n", category.title()));

    for (i, o) in outcomes.iter().enumerate() {
        out.push_str(&format!(
            "**{}. {}** {} {:.2}s\n",
            i + 1,
            o.provider.display_name(),
            if o.success { "ok" } else { "failed" },
            o.latency_secs(),
        ));
    }
    out.push_str(&format!("\n{}\n", SECTION_RULE));

    for o in &successes {
        out.push_str(&format!(
            "\n**{} Response:**\n{}\n\n{}\n",
            o.provider.display_name(),
            o.response.as_deref().unwrap_or_default(),
            RESPONSE_RULE,
        ));
    }

    out.trim_end().to_string()
}

/// Side-by-side latency and length figures, when two or more succeeded.
pub fn compare(outcomes: &[ProviderOutcome]) -> Option<String> {
    let successes: Vec<&ProviderOutcome> = outcomes.iter().filter(|o| o.success).collect();
    if successes.len() < 2 {
        return None;
    }

    let mut out = String::from("**AI Provider Comparison**\n\n**Performance Metrics:**\n");
    for o in &successes {
        out.push_str(&format!("- {}: {:.2}s\n", o.provider.display_name(), o.latency_secs()));
    }
    out.push_str("\n**Response Characteristics:**\n");
    for o in &successes {
        let chars = o.response.as_deref().map_or(0, |r| r.chars().count());
        out.push_str(&format!("- {}: {} characters\n", o.provider.display_name(), chars));
    }
    Some(out.trim_end().to_string())
}

pub fn cached(entry: &CacheEntry) -> String {
    format!("**Cached Response** (Hit #{})\n\n{}", entry.hit_count, entry.response)
}

pub fn failure(message: &str) -> String {
    format!("**Consultation Failed**\n\n{}", message)
}
