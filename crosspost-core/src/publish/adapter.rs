use super::content::{AdaptedContent, ContentPayload, MediaPayload};
use super::error::{PublishError, PublishResult};
use super::profile::{FieldConstraint, PlatformProfile};

const ELLIPSIS: &str = "...";
const SHORT_TITLE_PAD: &str = "分享";
const SENTENCE_TERMINATORS: [char; 6] = ['。', '.', '!', '?', '！', '？'];

/// Reshape a payload to a platform's constraints. Never mutates the input
/// and never fails; constraint violations that survive adaptation are
/// reported by [`validate_content`].
pub fn adapt_content(profile: &PlatformProfile, content: &ContentPayload) -> AdaptedContent {
    let title = if profile.capabilities.suppresses_title {
        None
    } else if profile.capabilities.derives_short_title {
        derive_short_title(
            content.title.as_deref().or(content.description.as_deref()),
            &profile.fields.title,
        )
    } else {
        content
            .title
            .as_deref()
            .map(|title| clamp_with_ellipsis(title, profile.fields.title.max_length))
    };

    let mut description = content
        .description
        .as_deref()
        .map(|text| truncate_description(text, profile.fields.description.max_length));
    if profile.capabilities.supports_hashtags {
        if let Some(text) = description.take() {
            description = Some(append_hashtags(
                text,
                &content.tags,
                profile.fields.description.max_length,
            ));
        }
    }

    let location = if profile.capabilities.supports_location {
        content.location.clone()
    } else {
        None
    };

    AdaptedContent {
        title,
        description,
        location,
    }
}

/// Check an adapted payload against the profile's field and media
/// constraints. Returns human-readable findings; empty means publishable.
pub fn validate_content(
    profile: &PlatformProfile,
    content: &ContentPayload,
    adapted: &AdaptedContent,
) -> Vec<String> {
    let mut errors = Vec::new();
    let name = &profile.display_name;

    if profile.fields.title.required && is_blank(&adapted.title) {
        errors.push(format!("{name} requires a title"));
    }
    if let (Some(min), Some(title)) = (profile.fields.title.min_length, adapted.title.as_deref()) {
        if char_len(title) < min {
            errors.push(format!("{name} title needs at least {min} characters"));
        }
    }
    if profile.fields.description.required && is_blank(&adapted.description) {
        errors.push(format!("{name} requires a description"));
    }
    if profile.fields.location.required && is_blank(&adapted.location) {
        errors.push(format!("{name} requires a location"));
    }

    if !profile.media.formats.is_empty() {
        match content.media.extension() {
            Some(ext) if profile.media.formats.iter().any(|format| format == &ext) => {}
            Some(ext) => errors.push(format!(
                "{name} does not accept .{ext} media (allowed: {})",
                profile.media.formats.join(", ")
            )),
            None => errors.push(format!("{name} media file has no extension")),
        }
    }

    errors
}

/// Size check against the loaded payload, applied per platform before any
/// engine phase starts.
pub fn validate_media_size(profile: &PlatformProfile, payload: &MediaPayload) -> Option<String> {
    let max_mb = profile.media.max_size_mb?;
    if payload.size_bytes > max_mb * 1024 * 1024 {
        Some(format!(
            "{} media exceeds the {} MB limit",
            profile.display_name, max_mb
        ))
    } else {
        None
    }
}

/// Adapt then validate; a non-empty finding list aborts the platform's
/// attempt before any browser interaction.
pub fn prepare_content(
    profile: &PlatformProfile,
    content: &ContentPayload,
) -> PublishResult<AdaptedContent> {
    let adapted = adapt_content(profile, content);
    let errors = validate_content(profile, content, &adapted);
    if errors.is_empty() {
        Ok(adapted)
    } else {
        Err(PublishError::Validation(errors))
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value
        .as_deref()
        .map(|text| text.trim().is_empty())
        .unwrap_or(true)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn take_chars(text: &str, count: usize) -> String {
    text.chars().take(count).collect()
}

fn clamp_with_ellipsis(text: &str, max_length: Option<usize>) -> String {
    match max_length {
        Some(max) if char_len(text) > max => {
            let keep = max.saturating_sub(ELLIPSIS.len());
            format!("{}{ELLIPSIS}", take_chars(text, keep))
        }
        _ => text.to_string(),
    }
}

/// Truncate an over-long description, preferring to end on a complete
/// sentence when the last terminator sits at >= 70% of the limit.
fn truncate_description(text: &str, max_length: Option<usize>) -> String {
    let max = match max_length {
        Some(max) if char_len(text) > max => max,
        _ => return text.to_string(),
    };
    let keep = max.saturating_sub(ELLIPSIS.len());
    let truncated = take_chars(text, keep);
    let terminator = truncated
        .chars()
        .enumerate()
        .filter(|(_, ch)| SENTENCE_TERMINATORS.contains(ch))
        .map(|(index, _)| index)
        .last();
    match terminator {
        Some(index) if index >= (max * 7) / 10 => take_chars(&truncated, index + 1),
        _ => format!("{truncated}{ELLIPSIS}"),
    }
}

/// Synthesize a short title from the richest available text: strip symbols,
/// collapse whitespace, clamp to the field bounds.
fn derive_short_title(source: Option<&str>, constraint: &FieldConstraint) -> Option<String> {
    let source = source?;
    let min = constraint.min_length.unwrap_or(6);
    let max = constraint.max_length.unwrap_or(16);
    let mut cleaned = String::with_capacity(source.len());
    let mut last_was_space = true;
    for ch in source.chars() {
        if ch.is_alphanumeric() {
            cleaned.push(ch);
            last_was_space = false;
        } else if ch.is_whitespace() && !last_was_space {
            cleaned.push(' ');
            last_was_space = true;
        }
    }
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        return None;
    }
    let length = char_len(&cleaned);
    let derived = if length > max {
        take_chars(&cleaned, max)
    } else if length < min {
        format!("{cleaned}{SHORT_TITLE_PAD}")
    } else {
        cleaned
    };
    Some(derived)
}

/// Append `#tag` tokens while the description stays within its limit; tags
/// that do not fit are dropped, never truncated mid-token.
fn append_hashtags(description: String, tags: &[String], max_length: Option<usize>) -> String {
    let mut result = description;
    for tag in tags {
        let tag = tag.trim().trim_start_matches('#');
        if tag.is_empty() {
            continue;
        }
        let candidate = format!("{result} #{tag}");
        match max_length {
            Some(max) if char_len(&candidate) > max => continue,
            _ => result = candidate,
        }
    }
    result
}
