//! Channel page parsing with layered selector strategies.
//!
//! The target site's markup drifts over time, so every field is extracted
//! by walking an ordered list of CSS selector strategies and taking the
//! first hit. Parsing never fails outright: a message without a usable id
//! is dropped, any other miss defaults the field and appends a
//! "field: reason" entry to the record's `extraction_errors`.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rook_core::record::{ChannelBio, MessageRecord};
use rook_core::traits::PageParser;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;

const MESSAGE_WRAP: &str = ".etme_widget_message_wrap.js-widget_message_wrap";

const MESSAGE_WRAP_FALLBACKS: &[&str] = &[
    ".etme_widget_message",
    ".js-widget_message_wrap",
    ".message-container",
    r#"[class*="message"][class*="wrap"]"#,
];

const TEXT_SELECTORS: &[&str] = &[
    ".etme_widget_message_text.js-message_text",
    ".etme_widget_message_text",
    ".js-message_text",
    r#"[class*="message"][class*="text"]"#,
    "div.text",
];

const VIEW_SELECTORS: &[&str] = &[
    ".etme_widget_message_views",
    ".message_views",
    r#"[class*="view"][class*="count"]"#,
];

const TIME_STRATEGIES: &[(&str, &str)] = &[
    (".etme_widget_message_date time", "datetime"),
    (".message_date time", "datetime"),
    ("time", "datetime"),
    ("[datetime]", "datetime"),
    (".etme_widget_message_date", "data-time"),
    ("[data-time]", "data-time"),
];

const TITLE_SELECTORS: &[&str] = &[
    ".etme_channel_info_header_title > span",
    ".channel_info_title",
    ".channel_title",
    "h1.title",
    r#"[class*="channel"][class*="title"]"#,
];

const USERNAME_SELECTORS: &[&str] = &[
    ".etme_channel_info_header_username > a",
    ".channel_username",
    ".username",
    r#"[class*="channel"][class*="username"]"#,
];

const DESCRIPTION_SELECTORS: &[&str] = &[
    ".etme_channel_info_description",
    ".channel_description",
    ".description",
    r#"[class*="channel"][class*="description"]"#,
];

const COUNTER_GROUP_SELECTORS: &[&str] = &[
    ".etme_channel_info_counters .etme_channel_info_counter",
    ".channel_counters .counter",
    ".counters .counter",
];

const ID_ATTRIBUTES: &[&str] = &["id", "data-id", "data-message-id", "data-msg-id"];

/// Parser for the platform's public channel pages.
#[derive(Debug, Clone, Default)]
pub struct ChannelParser;

impl ChannelParser {
    pub fn new() -> Self {
        Self
    }
}

impl PageParser for ChannelParser {
    fn parse_channel_page(
        &self,
        html: &str,
        channel_id: &str,
    ) -> (ChannelBio, Vec<MessageRecord>) {
        let doc = Html::parse_document(html);
        let root = doc.root_element();

        let bio = extract_bio(root, channel_id);

        let mut messages = Vec::new();
        let mut seen = HashSet::new();
        for wrap in message_elements(root) {
            match extract_message(wrap, channel_id) {
                Some(message) if seen.insert(message.id) => messages.push(message),
                Some(message) => {
                    tracing::debug!(channel = %channel_id, id = message.id, "Duplicate message id on page");
                }
                None => {
                    tracing::debug!(channel = %channel_id, "Dropped message without usable id");
                }
            }
        }

        tracing::debug!(
            channel = %channel_id,
            messages = messages.len(),
            "Parsed channel page"
        );
        (bio, messages)
    }
}

/// Parse a selector, treating an invalid pattern as "no match" rather
/// than a hard error.
fn sel(pattern: &str) -> Option<Selector> {
    match Selector::parse(pattern) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::debug!(%pattern, error = %e, "Invalid selector");
            None
        }
    }
}

fn first_match<'a>(root: ElementRef<'a>, selectors: &[&str]) -> Option<ElementRef<'a>> {
    selectors
        .iter()
        .filter_map(|s| sel(s))
        .find_map(|s| root.select(&s).next())
}

/// First selector strategy that yields an element with non-empty text.
fn first_text(root: ElementRef<'_>, selectors: &[&str]) -> Option<String> {
    selectors
        .iter()
        .filter_map(|s| sel(s))
        .filter_map(|s| root.select(&s).next())
        .map(|el| collapsed_text(el))
        .find(|t| !t.is_empty())
}

fn collapsed_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn message_elements(root: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    if let Some(s) = sel(MESSAGE_WRAP) {
        let wraps: Vec<_> = root.select(&s).collect();
        if !wraps.is_empty() {
            return wraps;
        }
    }
    for fallback in MESSAGE_WRAP_FALLBACKS {
        if let Some(s) = sel(fallback) {
            let wraps: Vec<_> = root.select(&s).collect();
            if !wraps.is_empty() {
                tracing::debug!(selector = %fallback, found = wraps.len(), "Messages via fallback selector");
                return wraps;
            }
        }
    }
    Vec::new()
}

// --- messages ---

fn extract_message(wrap: ElementRef<'_>, channel_id: &str) -> Option<MessageRecord> {
    let id = message_id(wrap, channel_id)?;
    let crawled_at = Utc::now();
    let mut errors = Vec::new();

    let context = sel(".etme_widget_message")
        .and_then(|s| wrap.select(&s).next())
        .unwrap_or(wrap);

    let text = match first_text(context, TEXT_SELECTORS) {
        Some(t) => t,
        None => {
            let whole = collapsed_text(context);
            if whole.is_empty() {
                errors.push("text: no strategy matched".to_string());
                "No text".to_string()
            } else {
                whole
            }
        }
    };

    let view_count = match view_count(context) {
        Some(v) => v,
        None => {
            errors.push("view_count: no strategy matched".to_string());
            "0".to_string()
        }
    };

    let posted_time = match posted_time(context) {
        Some(t) => t,
        None => {
            errors.push("posted_time: no parseable timestamp, using crawl time".to_string());
            crawled_at
        }
    };

    Some(MessageRecord {
        id,
        channel_id: channel_id.to_string(),
        url: format!("https://eitaa.com/{channel_id}/{id}"),
        text,
        view_count,
        posted_time,
        crawled_at,
        extraction_errors: errors,
    })
}

fn message_id(wrap: ElementRef<'_>, channel_id: &str) -> Option<u64> {
    // 1. numeric id attribute on the wrapper itself
    if let Some(id) = wrap.value().id().and_then(|v| v.trim().parse().ok()) {
        return Some(id);
    }

    // 2. id attribute of the inner message element
    let inner = sel(".etme_widget_message").and_then(|s| wrap.select(&s).next());
    if let Some(id) = inner
        .and_then(|el| el.value().id())
        .and_then(|v| v.trim().parse().ok())
    {
        return Some(id);
    }

    // 3. data-post="channel/id"
    if let Some(id) = inner
        .and_then(|el| el.value().attr("data-post"))
        .and_then(|v| v.rsplit('/').next())
        .and_then(|v| v.parse().ok())
    {
        return Some(id);
    }

    // 4. message permalinks: .../channel/id
    if let Some(links) = sel("a[href]") {
        for link in wrap.select(&links) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let parts: Vec<&str> = href.split('/').collect();
            if parts.len() >= 2
                && parts[parts.len() - 2] == channel_id
                && let Ok(id) = parts[parts.len() - 1].parse()
            {
                return Some(id);
            }
        }
    }

    // 5. any id-bearing attribute, first digit run wins
    for attr in ID_ATTRIBUTES {
        if let Some(id) = wrap.value().attr(attr).and_then(first_number) {
            return Some(id);
        }
        if let Some(s) = sel(&format!("[{attr}]")) {
            for el in wrap.select(&s) {
                if let Some(id) = el.value().attr(attr).and_then(first_number) {
                    return Some(id);
                }
            }
        }
    }

    None
}

/// First contiguous run of ASCII digits in the string.
fn first_number(s: &str) -> Option<u64> {
    let digits: String = s
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

fn view_count(context: ElementRef<'_>) -> Option<String> {
    for selector in VIEW_SELECTORS {
        let Some(el) = sel(selector).and_then(|s| context.select(&s).next()) else {
            continue;
        };
        for attr in ["data-count", "content", "value"] {
            if let Some(v) = el.value().attr(attr) {
                let v = v.trim();
                if !v.is_empty() {
                    return Some(v.to_string());
                }
            }
        }
        let text = collapsed_text(el);
        if !text.is_empty() {
            return Some(text);
        }
    }
    None
}

fn posted_time(context: ElementRef<'_>) -> Option<DateTime<Utc>> {
    for (selector, attr) in TIME_STRATEGIES {
        if let Some(parsed) = sel(selector)
            .and_then(|s| context.select(&s).next())
            .and_then(|el| el.value().attr(attr))
            .and_then(parse_timestamp)
        {
            return Some(parsed);
        }
    }
    None
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

// --- channel bio ---

fn extract_bio(root: ElementRef<'_>, channel_id: &str) -> ChannelBio {
    let mut errors = Vec::new();

    let title = first_text(root, TITLE_SELECTORS).unwrap_or_else(|| {
        errors.push("title: no strategy matched".to_string());
        String::new()
    });

    // The slug is always known, so a missing username element is not a miss.
    let username =
        first_text(root, USERNAME_SELECTORS).unwrap_or_else(|| format!("@{channel_id}"));

    let description = first_text(root, DESCRIPTION_SELECTORS).unwrap_or_else(|| {
        errors.push("description: no strategy matched".to_string());
        String::new()
    });

    let counters = extract_counters(root).unwrap_or_else(|| {
        errors.push("counters: no strategy matched".to_string());
        Counters::default()
    });

    ChannelBio {
        channel_id: channel_id.to_string(),
        title,
        username,
        follower_count: counters.followers,
        image_count: counters.images,
        video_count: counters.videos,
        file_count: counters.files,
        description,
        crawled_at: Utc::now(),
        extraction_errors: errors,
    }
}

struct Counters {
    followers: String,
    images: String,
    videos: String,
    files: String,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            followers: "0".to_string(),
            images: "0".to_string(),
            videos: "0".to_string(),
            files: "0".to_string(),
        }
    }
}

/// The counter block pairs a value with a localized label. Values keep
/// the page's abbreviated form, with the Persian thousands word folded
/// to "k".
fn extract_counters(root: ElementRef<'_>) -> Option<Counters> {
    let mut counters = Counters::default();
    let mut any = false;

    for group in COUNTER_GROUP_SELECTORS {
        let Some(s) = sel(group) else { continue };
        for counter in root.select(&s) {
            let Some(value) = first_text(counter, &[".counter_value", ".value"]) else {
                continue;
            };
            let Some(label) = first_text(counter, &[".counter_type", ".type"]) else {
                continue;
            };
            let value = value.replace("هزار", "k");
            let label_lower = label.to_lowercase();

            if label == "دنبال‌کننده" || label_lower.contains("follower") {
                counters.followers = value;
                any = true;
            } else if label == "عکس"
                || label_lower.contains("image")
                || label_lower.contains("photo")
            {
                counters.images = value;
                any = true;
            } else if label == "ویدیو" || label_lower.contains("video") {
                counters.videos = value;
                any = true;
            } else if label == "فایل" || label_lower.contains("file") {
                counters.files = value;
                any = true;
            }
        }
        if any {
            return Some(counters);
        }
    }

    // Direct per-field selectors as a second pass.
    let direct: [(&mut String, &[&str]); 4] = [
        (
            &mut counters.followers,
            &[".follower-count", ".subscribers", "[data-followers]"],
        ),
        (
            &mut counters.images,
            &[".image-count", ".photos-count", "[data-photos]"],
        ),
        (
            &mut counters.videos,
            &[".video-count", ".videos-count", "[data-videos]"],
        ),
        (
            &mut counters.files,
            &[".file-count", ".files-count", "[data-files]"],
        ),
    ];
    for (slot, selectors) in direct {
        let Some(el) = first_match(root, selectors) else {
            continue;
        };
        if let Some(count) = el.value().attr("data-count") {
            *slot = count.trim().to_string();
            any = true;
        } else {
            let text = collapsed_text(el);
            if !text.is_empty() {
                *slot = text.replace("هزار", "k");
                any = true;
            }
        }
    }

    any.then_some(counters)
}
