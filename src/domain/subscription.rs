/// Delivery mode for one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Realtime,
    Digest,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::Realtime => "realtime",
            DeliveryMode::Digest => "digest",
        }
    }

    /// Stored mode strings; anything unrecognized falls back to realtime.
    pub fn parse(s: &str) -> DeliveryMode {
        match s {
            "digest" => DeliveryMode::Digest,
            _ => DeliveryMode::Realtime,
        }
    }
}

/// One user's relationship to one source channel.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub user_id: i64,
    pub username: String,
    pub paused: bool,
    pub mode: DeliveryMode,
    pub include_keywords: Vec<String>,
    pub exclude_keywords: Vec<String>,
    pub backfill_n: i64,
    pub label: Option<String>,
}

/// Parse a stored JSON keyword list, tolerating malformed rows.
pub fn parse_keywords(raw: &str) -> Vec<String> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return Vec::new();
    };
    let Some(arr) = value.as_array() else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn keywords_json(keywords: &[String]) -> String {
    serde_json::to_string(keywords).unwrap_or_else(|_| "[]".into())
}

/// Substring keyword filtering, case-insensitive.
///
/// Any exclude hit rejects the text, even if an include keyword also matches.
/// A non-empty include list requires at least one hit.
pub fn text_passes_filters(text: &str, include: &[String], exclude: &[String]) -> bool {
    let hay = text.to_lowercase();

    for kw in exclude {
        let k = kw.to_lowercase();
        if !k.is_empty() && hay.contains(&k) {
            return false;
        }
    }
    if include.is_empty() {
        return true;
    }
    include.iter().any(|kw| {
        let k = kw.to_lowercase();
        !k.is_empty() && hay.contains(&k)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kws(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_mode_parse_fallback() {
        assert_eq!(DeliveryMode::parse("digest"), DeliveryMode::Digest);
        assert_eq!(DeliveryMode::parse("realtime"), DeliveryMode::Realtime);
        assert_eq!(DeliveryMode::parse("garbage"), DeliveryMode::Realtime);
    }

    #[test]
    fn test_no_filters_passes() {
        assert!(text_passes_filters("anything", &[], &[]));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let include = kws(&["rust"]);
        let exclude = kws(&["crypto"]);
        assert!(!text_passes_filters("rust and crypto news", &include, &exclude));
    }

    #[test]
    fn test_include_requires_match() {
        let include = kws(&["rust"]);
        assert!(text_passes_filters("Rust 1.80 released", &include, &[]));
        assert!(!text_passes_filters("python release", &include, &[]));
    }

    #[test]
    fn test_case_insensitive() {
        let exclude = kws(&["SPAM"]);
        assert!(!text_passes_filters("this is spam content", &[], &exclude));
    }

    #[test]
    fn test_parse_keywords_lenient() {
        assert_eq!(parse_keywords(r#"["a"," b ",""]"#), kws(&["a", "b"]));
        assert!(parse_keywords("not json").is_empty());
        assert!(parse_keywords("{}").is_empty());
        assert!(parse_keywords("[1,2]").is_empty());
    }
}
