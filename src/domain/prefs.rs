#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostStyle {
    Compact,
    Rich,
}

impl PostStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStyle::Compact => "compact",
            PostStyle::Rich => "rich",
        }
    }

    pub fn parse(s: &str) -> PostStyle {
        match s {
            "compact" => PostStyle::Compact,
            _ => PostStyle::Rich,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullTextStyle {
    Quote,
    Plain,
}

impl FullTextStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            FullTextStyle::Quote => "quote",
            FullTextStyle::Plain => "plain",
        }
    }

    pub fn parse(s: &str) -> FullTextStyle {
        match s {
            "plain" => FullTextStyle::Plain,
            _ => FullTextStyle::Quote,
        }
    }
}

/// A user's delivery target chat.
///
/// Deliveries only flow to verified destinations; verification flips off
/// again when the bot loses access to the chat.
#[derive(Debug, Clone)]
pub struct Destination {
    pub user_id: i64,
    pub chat_id: i64,
    pub verified: bool,
}

/// Per-user delivery preferences.
///
/// `quiet_start`/`quiet_end` are UTC hours; -1 disables quiet hours.
#[derive(Debug, Clone)]
pub struct UserPrefs {
    pub user_id: i64,
    pub realtime_enabled: bool,
    pub digest_hours: i64,
    pub last_digest_at: i64,
    pub default_backfill_n: i64,
    pub quiet_start: i64,
    pub quiet_end: i64,
    pub post_style: PostStyle,
    pub full_text_style: FullTextStyle,
    pub global_include_keywords: Vec<String>,
    pub global_exclude_keywords: Vec<String>,
}

impl UserPrefs {
    pub fn defaults(user_id: i64) -> Self {
        Self {
            user_id,
            realtime_enabled: true,
            digest_hours: 6,
            last_digest_at: 0,
            default_backfill_n: 3,
            quiet_start: -1,
            quiet_end: -1,
            post_style: PostStyle::Rich,
            full_text_style: FullTextStyle::Quote,
            global_include_keywords: Vec::new(),
            global_exclude_keywords: Vec::new(),
        }
    }

    /// Whether `utc_hour` falls inside the user's quiet window.
    ///
    /// The window is half-open `[start, end)` and wraps midnight;
    /// `start == end` means always quiet.
    pub fn is_quiet_at(&self, utc_hour: u32) -> bool {
        let (qs, qe) = (self.quiet_start, self.quiet_end);
        if qs < 0 || qe < 0 {
            return false;
        }
        let h = utc_hour as i64;
        if qs == qe {
            return true;
        }
        if qs < qe {
            h >= qs && h < qe
        } else {
            h >= qs || h < qe
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefs(qs: i64, qe: i64) -> UserPrefs {
        let mut p = UserPrefs::defaults(1);
        p.quiet_start = qs;
        p.quiet_end = qe;
        p
    }

    #[test]
    fn test_quiet_disabled() {
        let p = prefs(-1, -1);
        for h in 0..24 {
            assert!(!p.is_quiet_at(h));
        }
    }

    #[test]
    fn test_quiet_simple_window() {
        let p = prefs(1, 8);
        assert!(!p.is_quiet_at(0));
        assert!(p.is_quiet_at(1));
        assert!(p.is_quiet_at(7));
        assert!(!p.is_quiet_at(8));
    }

    #[test]
    fn test_quiet_wraps_midnight() {
        let p = prefs(22, 6);
        assert!(p.is_quiet_at(23));
        assert!(p.is_quiet_at(0));
        assert!(p.is_quiet_at(5));
        assert!(!p.is_quiet_at(6));
        assert!(!p.is_quiet_at(7));
        assert!(!p.is_quiet_at(21));
    }

    #[test]
    fn test_quiet_equal_means_always() {
        let p = prefs(3, 3);
        for h in 0..24 {
            assert!(p.is_quiet_at(h));
        }
    }

    #[test]
    fn test_style_parse_fallbacks() {
        assert_eq!(PostStyle::parse("compact"), PostStyle::Compact);
        assert_eq!(PostStyle::parse("weird"), PostStyle::Rich);
        assert_eq!(FullTextStyle::parse("plain"), FullTextStyle::Plain);
        assert_eq!(FullTextStyle::parse("weird"), FullTextStyle::Quote);
    }
}
