/// A followed public channel with its shared polling schedule.
///
/// Timestamps are unix seconds. Schedule fields are mutated only by the
/// scheduler (through its state cache); everything else reads them.
#[derive(Debug, Clone)]
pub struct Source {
    pub username: String,
    pub last_post_id: i64,
    pub check_every_sec: i64,
    pub next_check_at: i64,
    pub fail_count: i64,
    pub last_error: Option<String>,
    pub last_error_at: i64,
    pub last_success_at: i64,
    pub updated_at: i64,
}

impl Source {
    pub fn new(username: &str, check_every_sec: i64, now: i64) -> Self {
        Self {
            username: username.to_string(),
            last_post_id: 0,
            check_every_sec,
            // next_check_at=0 makes a fresh source due immediately.
            next_check_at: 0,
            fail_count: 0,
            last_error: None,
            last_error_at: 0,
            last_success_at: 0,
            updated_at: now,
        }
    }
}

/// Normalize user input into a bare channel username.
///
/// Accepts `@name`, `t.me/name`, `t.me/s/name` and full https URLs.
/// Returns `None` when the result is not a valid public username.
pub fn normalize_username(input: &str) -> Option<String> {
    let mut s = input.trim();
    if s.is_empty() {
        return None;
    }

    for prefix in [
        "https://t.me/s/",
        "https://t.me/",
        "http://t.me/s/",
        "http://t.me/",
        "t.me/s/",
        "t.me/",
    ] {
        if let Some(rest) = strip_prefix_ci(s, prefix) {
            s = rest;
            break;
        }
    }
    s = s.strip_prefix('@').unwrap_or(s);

    let valid_len = (5..=32).contains(&s.len());
    let valid_chars = s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid_len && valid_chars {
        Some(s.to_string())
    } else {
        None
    }
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}
