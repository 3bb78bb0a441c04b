// src/pipeline/critical.rs
// Keyword fast-path for critical market events
//
// A match bypasses LLM scoring entirely: the article is routed straight to
// full analysis with the maximum score.

/// Keywords that mark an article as a critical event. Matching is
/// case-insensitive substring search over title + text.
const CRITICAL_KEYWORDS: &[&str] = &[
    // War / geopolitics
    "declares war",
    "declaration of war",
    "military strike",
    "missile strike",
    "invasion of",
    "宣战",
    "军事打击",
    "开战",
    // Central bank emergency action
    "emergency rate cut",
    "emergency rate hike",
    "emergency meeting of the fed",
    "emergency liquidity",
    "紧急降息",
    "紧急加息",
    "央行紧急",
    // Default / bankruptcy
    "files for bankruptcy",
    "chapter 11",
    "sovereign default",
    "debt default",
    "申请破产",
    "债务违约",
    "主权违约",
    // Fraud / investigation
    "accounting fraud",
    "securities fraud",
    "criminal investigation",
    "财务造假",
    "证券欺诈",
    "刑事调查",
    // Major regulatory action
    "trading halted",
    "trading suspension",
    "delisting notice",
    "antitrust breakup",
    "停牌",
    "强制退市",
    "反垄断拆分",
    // Macro shock
    "circuit breaker",
    "market crash",
    "flash crash",
    "bank run",
    "熔断",
    "股灾",
    "挤兑",
];

/// Scan title + text for critical-event keywords.
///
/// Returns the first matched keyword, or None when the article should go
/// through normal LLM scoring.
pub fn detect_critical_event(title: &str, text: &str) -> Option<&'static str> {
    let haystack = format!("{} {}", title, text).to_lowercase();
    CRITICAL_KEYWORDS
        .iter()
        .find(|kw| haystack.contains(&kw.to_lowercase()))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emergency_rate_cut_is_critical() {
        let matched = detect_critical_event(
            "Federal Reserve announces emergency rate cut",
            "The Fed cut rates by 50bp outside the scheduled meeting.",
        );
        assert_eq!(matched, Some("emergency rate cut"));
    }

    #[test]
    fn test_match_is_case_insensitive() {
        assert!(detect_critical_event("ACME FILES FOR BANKRUPTCY", "").is_some());
    }

    #[test]
    fn test_keyword_in_body_counts() {
        assert!(detect_critical_event("Market update", "熔断机制今日触发").is_some());
    }

    #[test]
    fn test_ordinary_news_is_not_critical() {
        assert!(detect_critical_event(
            "Apple reports quarterly earnings",
            "Revenue grew 5% year over year."
        )
        .is_none());
        assert!(detect_critical_event("", "").is_none());
    }
}
