//! HTML-to-post extraction for channel preview pages.
//!
//! The input format is an unversioned page template, so everything here is
//! best-effort pattern matching behind one stable entrypoint:
//! [`extract`]`(username, html) -> Vec<Post>`. Markup drift degrades the
//! media list or text, never the scheduler or delivery engine.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::domain::post::MAX_MEDIA_PER_POST;
use crate::domain::{MediaItem, MediaKind, Post};

static RE_POST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data-post="([^"/]+)/(\d+)""#).expect("valid regex"));

static RE_MESSAGE_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<div class="tgme_widget_message_text[^"]*"[^>]*>(.*?)</div>"#)
        .expect("valid regex")
});

static RE_BR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid regex"));

static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

static RE_MANY_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

// Photo backgrounds only inside message media wrappers, never avatars.
static RE_PHOTO_WRAP_BG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)<[^>]*class="[^"]*tgme_widget_message_(?:photo_wrap|video_thumb|grouped)[^"]*"[^>]*style="[^"]*background-image\s*:\s*url\(['"]([^'"]+)['"]\)"#,
    )
    .expect("valid regex")
});

static RE_MESSAGE_IMG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img[^>]+class="[^"]*tgme_widget_message_[^"]*"[^>]+src="([^"]+)""#)
        .expect("valid regex")
});

static RE_DATA_VIDEO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)data-video="([^"]+)""#).expect("valid regex"));

static RE_VIDEO_SRC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<(?:video|source)[^>]+src="([^"]+)""#).expect("valid regex"));

static RE_DATA_AUDIO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)data-audio="([^"]+)""#).expect("valid regex"));

static RE_AUDIO_SRC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<audio[^>]+src="([^"]+)""#).expect("valid regex"));

static RE_DATA_VOICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)data-voice="([^"]+)""#).expect("valid regex"));

static RE_DATA_ANIMATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)data-animation="([^"]+)""#).expect("valid regex"));

static RE_DATA_STICKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)data-sticker="([^"]+)""#).expect("valid regex"));

static RE_STICKER_BG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)<[^>]*class="[^"]*tgme_widget_message_sticker[^"]*"[^>]*background-image\s*:\s*url\(['"]([^'"]+)['"]\)"#,
    )
    .expect("valid regex")
});

static RE_DATA_DOCUMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)data-document="([^"]+)""#).expect("valid regex"));

static RE_FILE_CDN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)href="(https?://cdn\d+\.telesco\.pe/file/[^"]+)""#).expect("valid regex")
});

static RE_GEO_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"geo:-?\d+(?:\.\d+)?,-?\d+(?:\.\d+)?"#).expect("valid regex"));

static RE_MAP_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)href="(https?://[^"]*(?:maps\.google\.[^"/]+/[^"]*|google\.[^"/]+/maps[^"]*|openstreetmap\.org/[^"]*))""#,
    )
    .expect("valid regex")
});

static RE_DATA_LAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)data-lat="(-?\d+(?:\.\d+)?)""#).expect("valid regex"));

static RE_DATA_LON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)data-lon="(-?\d+(?:\.\d+)?)""#).expect("valid regex"));

// Native-widget wrappers the preview template renders without a direct URL.
static RE_NATIVE_WIDGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"tgme_widget_message_(sticker|voice|audio|location|poll|contact|game|invoice|document)"#,
    )
    .expect("valid regex")
});

static RE_IMAGE_EXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(jpg|jpeg|png|webp|gif)(\?|$)").expect("valid regex"));

static RE_MP4_EXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.mp4(\?|$)").expect("valid regex"));

/// Extract ordered, deduplicated posts from a channel preview page.
///
/// Only markers belonging to `username` (case-insensitive) are kept, which
/// drops forwarded-from previews of other channels. Output is ascending by
/// post id with duplicate ids resolved by richness score.
pub fn extract(username: &str, html: &str) -> Vec<Post> {
    let wanted = username.to_lowercase();

    let markers: Vec<(usize, String, i64)> = RE_POST_MARKER
        .captures_iter(html)
        .filter_map(|c| {
            let m = c.get(0)?;
            let chan = c.get(1)?.as_str().to_lowercase();
            let post_id: i64 = c.get(2)?.as_str().parse().ok()?;
            Some((m.start(), chan, post_id))
        })
        .collect();

    let mut posts: Vec<Post> = Vec::new();
    for (i, (start, chan, post_id)) in markers.iter().enumerate() {
        if *chan != wanted {
            continue;
        }

        let end = markers.get(i + 1).map(|m| m.0).unwrap_or(html.len());
        let slice = &html[*start..end];
        let link = Post::link_for(username, *post_id);

        let text = RE_MESSAGE_TEXT
            .captures(slice)
            .and_then(|c| c.get(1))
            .map(|m| clean_text(m.as_str()))
            .unwrap_or_default();

        let media = extract_media(slice, &link);

        posts.push(Post {
            post_id: *post_id,
            text,
            link,
            media,
        });
    }

    dedupe_by_score(posts)
}

/// `<br>` to newline, strip tags, decode entities, collapse runs of blank lines.
fn clean_text(raw: &str) -> String {
    let with_newlines = RE_BR.replace_all(raw, "\n");
    let no_tags = RE_TAG.replace_all(&with_newlines, "");
    let decoded = html_escape::decode_html_entities(no_tags.as_ref());
    RE_MANY_NEWLINES
        .replace_all(decoded.as_ref(), "\n\n")
        .trim()
        .to_string()
}

fn normalize_url(u: &str) -> String {
    if let Some(rest) = u.strip_prefix("//") {
        format!("https://{}", rest)
    } else {
        u.to_string()
    }
}

/// Emoji sprites live on the same CDNs as photos; never deliver them as media.
fn is_emoji_asset_url(u: &str) -> bool {
    let x = u.to_lowercase();
    x.contains("/emoji/")
        || x.contains("telegram.org/img/emoji")
        || x.contains("twemoji")
        || x.contains("emoji.png")
        || x.contains("emoji.webp")
        || x.contains("emoji.svg")
}

fn extract_media(slice: &str, post_link: &str) -> Vec<MediaItem> {
    let mut out: Vec<MediaItem> = Vec::new();
    let mut seen: HashSet<(MediaKind, String)> = HashSet::new();

    let mut push = |kind: MediaKind, url: String, out: &mut Vec<MediaItem>| {
        if url.is_empty() {
            return;
        }
        if seen.insert((kind, url.clone())) {
            out.push(MediaItem { kind, url });
        }
    };

    for c in RE_PHOTO_WRAP_BG.captures_iter(slice) {
        let u = normalize_url(&c[1]);
        if !is_emoji_asset_url(&u) {
            push(MediaKind::Photo, u, &mut out);
        }
    }
    for c in RE_MESSAGE_IMG.captures_iter(slice) {
        let u = normalize_url(&c[1]);
        if !is_emoji_asset_url(&u) {
            push(MediaKind::Photo, u, &mut out);
        }
    }

    for c in RE_DATA_VIDEO.captures_iter(slice) {
        push(MediaKind::Video, normalize_url(&c[1]), &mut out);
    }
    for c in RE_VIDEO_SRC.captures_iter(slice) {
        let u = normalize_url(&c[1]);
        if RE_MP4_EXT.is_match(&u) || u.to_lowercase().contains("video") {
            push(MediaKind::Video, u, &mut out);
        }
    }

    for c in RE_DATA_AUDIO.captures_iter(slice) {
        push(MediaKind::Audio, normalize_url(&c[1]), &mut out);
    }
    for c in RE_AUDIO_SRC.captures_iter(slice) {
        push(MediaKind::Audio, normalize_url(&c[1]), &mut out);
    }

    for c in RE_DATA_VOICE.captures_iter(slice) {
        push(MediaKind::Voice, normalize_url(&c[1]), &mut out);
    }

    for c in RE_DATA_ANIMATION.captures_iter(slice) {
        push(MediaKind::Animation, normalize_url(&c[1]), &mut out);
    }

    for c in RE_DATA_STICKER.captures_iter(slice) {
        push(MediaKind::Sticker, normalize_url(&c[1]), &mut out);
    }
    for c in RE_STICKER_BG.captures_iter(slice) {
        let u = normalize_url(&c[1]);
        if !is_emoji_asset_url(&u) {
            push(MediaKind::Sticker, u, &mut out);
        }
    }

    for c in RE_DATA_DOCUMENT.captures_iter(slice) {
        push(MediaKind::Document, normalize_url(&c[1]), &mut out);
    }
    for c in RE_FILE_CDN.captures_iter(slice) {
        let u = normalize_url(&c[1]);
        // File CDN links to photos/videos already surface through their own rules.
        if RE_IMAGE_EXT.is_match(&u) || RE_MP4_EXT.is_match(&u) {
            continue;
        }
        push(MediaKind::Document, u, &mut out);
    }

    if let Some(m) = RE_GEO_URI.find(slice) {
        push(MediaKind::Location, m.as_str().to_string(), &mut out);
    }
    for c in RE_MAP_HREF.captures_iter(slice) {
        push(MediaKind::Location, normalize_url(&c[1]), &mut out);
    }
    if let (Some(lat), Some(lon)) = (
        RE_DATA_LAT.captures(slice).map(|c| c[1].to_string()),
        RE_DATA_LON.captures(slice).map(|c| c[1].to_string()),
    ) {
        push(MediaKind::Location, format!("geo:{},{}", lat, lon), &mut out);
    }

    // Native widgets without a usable URL: leave one sentinel so the
    // delivery side knows to point at the original message.
    let mut needs_copy = false;
    for c in RE_NATIVE_WIDGET.captures_iter(slice) {
        let covered = match &c[1] {
            "sticker" => out.iter().any(|m| m.kind == MediaKind::Sticker),
            "voice" => out.iter().any(|m| m.kind == MediaKind::Voice),
            "audio" => out.iter().any(|m| m.kind == MediaKind::Audio),
            "location" => out.iter().any(|m| m.kind == MediaKind::Location),
            "document" => out.iter().any(|m| m.kind == MediaKind::Document),
            // poll/contact/game/invoice never have a direct URL
            _ => false,
        };
        if !covered {
            needs_copy = true;
        }
    }
    if needs_copy {
        push(MediaKind::SourceCopy, post_link.to_string(), &mut out);
    }

    out.truncate(MAX_MEDIA_PER_POST);
    out
}

/// Richness score used to pick between duplicate renderings of one post id.
fn score(p: &Post) -> usize {
    p.media.len() * 1000 + p.text.trim().len()
}

fn dedupe_by_score(posts: Vec<Post>) -> Vec<Post> {
    let mut best: Vec<Post> = Vec::new();
    for p in posts {
        match best.iter_mut().find(|b| b.post_id == p.post_id) {
            Some(existing) => {
                if score(&p) > score(existing) {
                    *existing = p;
                }
            }
            None => best.push(p),
        }
    }
    best.sort_by_key(|p| p.post_id);
    best
}
