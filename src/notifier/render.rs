//! Message rendering: post cards, digests, and length-limited splitting.
//!
//! Everything here is pure string work so it stays trivially testable.

use crate::domain::{FullTextStyle, MediaKind, Post, PostStyle, UserPrefs};

/// Soft per-message limit; leaves headroom under the 4096 hard cap for
/// part suffixes and entity expansion.
pub const SOFT_SPLIT_LIMIT: usize = 3800;

/// Paragraphs longer than this get hard-sliced.
pub const HARD_SPLIT_LIMIT: usize = 3900;

/// Short bodies read fine inline; longer ones collapse into an
/// expandable quote so the card stays scannable.
const QUOTE_THRESHOLD: usize = 900;

const BODY_LIMIT: usize = 2400;

const SNIPPET_LIMIT: usize = 180;

pub fn escape_html(s: &str) -> String {
    html_escape::encode_text(s).into_owned()
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{}…", cut.trim_end())
}

fn snippet(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&flat, SNIPPET_LIMIT)
}

fn media_tags(post: &Post) -> Option<String> {
    let mut kinds: Vec<&'static str> = Vec::new();
    for m in &post.media {
        // The sentinel is routing metadata, not something to advertise.
        if m.kind == MediaKind::SourceCopy {
            continue;
        }
        if !kinds.contains(&m.kind.as_str()) {
            kinds.push(m.kind.as_str());
        }
    }
    if kinds.is_empty() {
        return None;
    }
    Some(
        kinds
            .iter()
            .map(|k| format!("#{}", k))
            .collect::<Vec<_>>()
            .join(" "),
    )
}

/// Render one post as a delivery card.
///
/// The post link rides along as an anchor so the destination chat gets a
/// native link preview of the original message.
pub fn render_post(username: &str, post: &Post, prefs: &UserPrefs) -> String {
    let header = format!(
        "<b>@{}</b> <a href=\"{}\">#{}</a>",
        escape_html(username),
        post.link,
        post.post_id
    );

    match prefs.post_style {
        PostStyle::Compact => {
            let mut out = header;
            if !post.text.is_empty() {
                out.push('\n');
                out.push_str(&escape_html(&snippet(&post.text)));
            }
            out
        }
        PostStyle::Rich => {
            let mut out = header;
            if let Some(tags) = media_tags(post) {
                out.push('\n');
                out.push_str(&tags);
            }
            if !post.text.is_empty() {
                let body = truncate_chars(&post.text, BODY_LIMIT);
                let escaped = escape_html(&body);
                out.push('\n');
                if prefs.full_text_style == FullTextStyle::Quote
                    && body.chars().count() > QUOTE_THRESHOLD
                {
                    out.push_str(&format!("<blockquote expandable>{}</blockquote>", escaped));
                } else {
                    out.push_str(&escaped);
                }
            }
            out
        }
    }
}

/// Render a digest of posts grouped under one title.
///
/// `items` pairs each post with its channel username.
pub fn render_digest(items: &[(String, Post)]) -> String {
    let mut out = format!(
        "<b>📬 Digest</b> — {} post{}",
        items.len(),
        if items.len() == 1 { "" } else { "s" }
    );
    for (username, post) in items {
        out.push_str("\n\n");
        out.push_str(&format!(
            "<b>@{}</b> <a href=\"{}\">#{}</a>",
            escape_html(username),
            post.link,
            post.post_id
        ));
        if !post.text.is_empty() {
            out.push('\n');
            out.push_str(&escape_html(&snippet(&post.text)));
        }
    }
    out
}

/// Split a rendered message into sendable parts.
///
/// Prefers paragraph boundaries; a single oversized paragraph is
/// hard-sliced. Multi-part output gets `(i/n)` suffixes.
pub fn split_message(text: &str) -> Vec<String> {
    if text.chars().count() <= SOFT_SPLIT_LIMIT {
        return vec![text.to_string()];
    }

    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    for para in text.split("\n\n") {
        let mut pieces: Vec<String> = Vec::new();
        if para.chars().count() > HARD_SPLIT_LIMIT {
            let chars: Vec<char> = para.chars().collect();
            for chunk in chars.chunks(HARD_SPLIT_LIMIT) {
                pieces.push(chunk.iter().collect());
            }
        } else {
            pieces.push(para.to_string());
        }

        for piece in pieces {
            let extra = if current.is_empty() { 0 } else { 2 };
            if !current.is_empty()
                && current.chars().count() + extra + piece.chars().count() > SOFT_SPLIT_LIMIT
            {
                parts.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&piece);
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }

    let total = parts.len();
    if total > 1 {
        for (i, part) in parts.iter_mut().enumerate() {
            part.push_str(&format!(" ({}/{})", i + 1, total));
        }
    }
    parts
}
