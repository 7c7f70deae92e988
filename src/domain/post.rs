use serde::{Deserialize, Serialize};

/// Maximum media items kept per post.
pub const MAX_MEDIA_PER_POST: usize = 10;

/// Kind of a media attachment found in a scraped post.
///
/// `SourceCopy` is a sentinel: the post visibly carries a native widget
/// (sticker, poll, voice note, ...) but no direct URL could be extracted,
/// so the original message has to be re-fetched instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Audio,
    Voice,
    Animation,
    Sticker,
    Document,
    Location,
    SourceCopy,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Voice => "voice",
            MediaKind::Animation => "animation",
            MediaKind::Sticker => "sticker",
            MediaKind::Document => "document",
            MediaKind::Location => "location",
            MediaKind::SourceCopy => "source_copy",
        }
    }

    /// Parse a stored kind string. Unknown kinds map to `None` so stale
    /// archive rows degrade to "no media" instead of failing the read.
    pub fn parse(s: &str) -> Option<MediaKind> {
        match s {
            "photo" => Some(MediaKind::Photo),
            "video" => Some(MediaKind::Video),
            "audio" => Some(MediaKind::Audio),
            "voice" => Some(MediaKind::Voice),
            "animation" => Some(MediaKind::Animation),
            "sticker" => Some(MediaKind::Sticker),
            "document" => Some(MediaKind::Document),
            "location" => Some(MediaKind::Location),
            "source_copy" => Some(MediaKind::SourceCopy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub kind: MediaKind,
    pub url: String,
}

/// One post extracted from a channel preview page. Immutable once extracted.
///
/// `post_id` is channel-local; (username, post_id) is the global key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub post_id: i64,
    pub text: String,
    pub link: String,
    pub media: Vec<MediaItem>,
}

impl Post {
    pub fn link_for(username: &str, post_id: i64) -> String {
        format!("https://t.me/{}/{}", username, post_id)
    }

    /// Serialize the media list for the archive column.
    pub fn media_json(&self) -> String {
        serde_json::to_string(&self.media).unwrap_or_else(|_| "[]".into())
    }

    /// Parse a stored media list, dropping malformed or unknown entries.
    pub fn parse_media_json(raw: &str) -> Vec<MediaItem> {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
            return Vec::new();
        };
        let Some(arr) = value.as_array() else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for it in arr {
            let kind = it.get("kind").and_then(|v| v.as_str()).and_then(MediaKind::parse);
            let url = it.get("url").and_then(|v| v.as_str()).unwrap_or_default();
            if let Some(kind) = kind {
                if !url.is_empty() {
                    out.push(MediaItem {
                        kind,
                        url: url.to_string(),
                    });
                }
            }
        }
        out.truncate(MAX_MEDIA_PER_POST);
        out
    }
}

/// A delivery deferred past a user's quiet hours, waiting to be flushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPost {
    pub user_id: i64,
    pub username: String,
    pub post_id: i64,
    pub queued_at: i64,
}
