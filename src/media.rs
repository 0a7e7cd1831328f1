//! HTTP content negotiation
//!
//! Parsers for the `Accept` and `Content-Type` header grammars, producing
//! [`MediaDescriptor`] values that conformance checks can compare without
//! string matching on raw header text.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::vocab::AS2_CONTEXT;

/// Media type grammar error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MediaTypeError {
    #[error("media range '{0}' is missing a '/'")]
    MissingSlash(String),

    #[error("media type is empty")]
    Empty,

    #[error("invalid quality value '{0}'")]
    InvalidQuality(String),
}

/// A media type parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Numeric parameter (only `q` is parsed this way)
    Number(f64),
    /// `key=value`, quotes removed
    Text(String),
    /// Parameter given without `=`
    Flag,
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Parsed media type: `type/tree.subtype+suffix; params`
#[derive(Debug, Clone, PartialEq)]
pub struct MediaDescriptor {
    pub mime_type: String,
    pub mime_subtype: String,
    pub suffix: Option<String>,
    pub tree: Option<String>,
    pub params: BTreeMap<String, ParamValue>,
}

impl MediaDescriptor {
    /// Quality value, `1.0` when absent
    pub fn quality(&self) -> f64 {
        match self.params.get("q") {
            Some(ParamValue::Number(q)) => *q,
            _ => 1.0,
        }
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// `type/subtype` including tree and suffix, without parameters
    pub fn essence(&self) -> String {
        let mut essence = format!("{}/", self.mime_type);
        if let Some(tree) = &self.tree {
            essence.push_str(tree);
            essence.push('.');
        }
        essence.push_str(&self.mime_subtype);
        if let Some(suffix) = &self.suffix {
            essence.push('+');
            essence.push_str(suffix);
        }
        essence
    }

    /// Whether this Accept range covers `content`, honouring `*` wildcards.
    ///
    /// Parameters other than `q` must appear with equal values on `content`.
    pub fn accepts(&self, content: &MediaDescriptor) -> bool {
        if self.quality() <= 0.0 {
            return false;
        }
        if self.mime_type != "*" && self.mime_type != content.mime_type {
            return false;
        }
        if self.mime_subtype != "*" {
            let range_essence = self.essence();
            let content_essence = content.essence();
            if range_essence != content_essence {
                return false;
            }
        }
        self.params
            .iter()
            .filter(|(name, _)| name.as_str() != "q")
            .all(|(name, value)| content.params.get(name) == Some(value))
    }
}

impl fmt::Display for MediaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.essence())?;
        for (name, value) in &self.params {
            match value {
                ParamValue::Number(n) => write!(f, "; {}={}", name, n)?,
                ParamValue::Text(text) => write!(f, "; {}=\"{}\"", name, text)?,
                ParamValue::Flag => write!(f, "; {}", name)?,
            }
        }
        Ok(())
    }
}

/// Ordering applied to parsed Accept entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcceptOrdering {
    /// Quality descending; equal qualities keep header order
    #[default]
    Quality,
    /// Quality descending, then subtype descending.
    ///
    /// Matches the ordering older conformance reports were produced with.
    SubtypeTieBreak,
}

/// Parse an `Accept` header, most preferred entry first
pub fn parse_accept_header(value: &str) -> Result<Vec<MediaDescriptor>, MediaTypeError> {
    parse_accept_header_with(value, AcceptOrdering::default())
}

/// Parse an `Accept` header with an explicit ordering policy
pub fn parse_accept_header_with(
    value: &str,
    ordering: AcceptOrdering,
) -> Result<Vec<MediaDescriptor>, MediaTypeError> {
    let mut accepted = Vec::new();

    for entry in split_unquoted(value, ',') {
        if entry.is_empty() {
            continue;
        }

        let mut fields = split_unquoted(entry, ';').into_iter();
        let media_range = fields.next().unwrap_or_default();

        let mut params = BTreeMap::new();
        for field in fields.filter(|f| !f.is_empty()) {
            match field.split_once('=') {
                Some((key, raw)) => {
                    let key = key.trim().to_ascii_lowercase();
                    let raw = raw.trim();
                    let value = if key == "q" {
                        ParamValue::Number(parse_quality(raw)?)
                    } else {
                        ParamValue::Text(unquote(raw))
                    };
                    params.insert(key, value);
                }
                None => {
                    params.insert(field.to_ascii_lowercase(), ParamValue::Flag);
                }
            }
        }
        params
            .entry("q".to_string())
            .or_insert(ParamValue::Number(1.0));

        let (mime_type, mime_subtype) = media_range
            .split_once('/')
            .ok_or_else(|| MediaTypeError::MissingSlash(media_range.to_string()))?;

        accepted.push(MediaDescriptor {
            mime_type: mime_type.trim().to_ascii_lowercase(),
            mime_subtype: mime_subtype.trim().to_ascii_lowercase(),
            suffix: None,
            tree: None,
            params,
        });
    }

    let by_quality =
        |a: &MediaDescriptor, b: &MediaDescriptor| b.quality().partial_cmp(&a.quality());

    // Vec::sort_by is stable, so ties keep their header order.
    match ordering {
        AcceptOrdering::Quality => {
            accepted.sort_by(|a, b| by_quality(a, b).unwrap_or(Ordering::Equal));
        }
        AcceptOrdering::SubtypeTieBreak => {
            accepted.sort_by(|a, b| {
                by_quality(a, b)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| b.mime_subtype.cmp(&a.mime_subtype))
            });
        }
    }

    Ok(accepted)
}

/// Parse a `Content-Type` header value
///
/// # Format
/// ```text
/// type/[tree.]subtype[+suffix][; name=value]*
/// ```
pub fn parse_content_type(value: &str) -> Result<MediaDescriptor, MediaTypeError> {
    let mut fields = split_unquoted(value, ';').into_iter();
    let media_type = fields.next().unwrap_or_default();
    if media_type.is_empty() {
        return Err(MediaTypeError::Empty);
    }

    let (mime_type, rest) = media_type
        .split_once('/')
        .ok_or_else(|| MediaTypeError::MissingSlash(media_type.to_string()))?;
    let rest = rest.trim().to_ascii_lowercase();

    let (tree, subtype_info) = match rest.rsplit_once('.') {
        Some((tree, subtype_info)) => (Some(tree.to_string()), subtype_info.to_string()),
        None => (None, rest),
    };

    let (mime_subtype, suffix) = match subtype_info.split_once('+') {
        Some((subtype, suffix)) => (subtype.trim().to_string(), Some(suffix.trim().to_string())),
        None => (subtype_info, None),
    };

    let params = fields
        .filter(|f| !f.is_empty())
        .map(|field| match field.split_once('=') {
            Some((key, raw)) => (
                key.trim().to_ascii_lowercase(),
                ParamValue::Text(unquote(raw.trim())),
            ),
            None => (field.to_ascii_lowercase(), ParamValue::Flag),
        })
        .collect();

    Ok(MediaDescriptor {
        mime_type: mime_type.trim().to_ascii_lowercase(),
        mime_subtype,
        suffix,
        tree,
        params,
    })
}

/// `application/activity+json` or `application/ld+json` with the
/// ActivityStreams profile
pub fn is_activitypub_media_type(media: &MediaDescriptor) -> bool {
    if media.mime_type != "application" || media.tree.is_some() {
        return false;
    }
    match (media.mime_subtype.as_str(), media.suffix.as_deref()) {
        ("activity", Some("json")) => true,
        ("ld", Some("json")) => media
            .param("profile")
            .and_then(ParamValue::as_str)
            .is_some_and(|profile| profile.split_whitespace().any(|p| p == AS2_CONTEXT)),
        _ => false,
    }
}

/// Like [`is_activitypub_media_type`] but also allows a bare
/// `application/ld+json`, which several server frameworks emit.
pub fn is_accepted_media_type(media: &MediaDescriptor) -> bool {
    is_activitypub_media_type(media)
        || (media.mime_type == "application"
            && media.mime_subtype == "ld"
            && media.suffix.as_deref() == Some("json")
            && media.tree.is_none())
}

fn parse_quality(raw: &str) -> Result<f64, MediaTypeError> {
    let q: f64 = raw
        .parse()
        .map_err(|_| MediaTypeError::InvalidQuality(raw.to_string()))?;
    if !(0.0..=1.0).contains(&q) {
        return Err(MediaTypeError::InvalidQuality(raw.to_string()));
    }
    Ok(q)
}

/// Split on `sep` outside double-quoted strings, trimming each piece.
pub(crate) fn split_unquoted(value: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (idx, ch) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                parts.push(value[start..idx].trim());
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(value[start..].trim());
    parts
}

/// Remove surrounding double quotes and backslash escapes.
pub(crate) fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        return value.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_accept(
        accepted: &[MediaDescriptor],
        i: usize,
        mime_type: &str,
        mime_subtype: &str,
        q: f64,
        extra: &[(&str, &str)],
    ) {
        let entry = &accepted[i];
        assert_eq!(entry.mime_type, mime_type, "type of entry {i}");
        assert_eq!(entry.mime_subtype, mime_subtype, "subtype of entry {i}");
        assert_eq!(entry.quality(), q, "q of entry {i}");
        for (key, value) in extra {
            assert_eq!(entry.param(key).and_then(ParamValue::as_str), Some(*value));
        }
        assert_eq!(entry.params.len(), extra.len() + 1);
    }

    #[test]
    fn accept_header_prefers_higher_quality() {
        let accepted = parse_accept_header("audio/*;q=0.2, audio/basic").unwrap();
        assert_eq!(accepted.len(), 2);
        assert_accept(&accepted, 0, "audio", "basic", 1.0, &[]);
        assert_accept(&accepted, 1, "audio", "*", 0.2, &[]);
    }

    #[test]
    fn accept_header_keeps_header_order_for_equal_quality() {
        let accepted =
            parse_accept_header("text/plain; q=0.5, text/html, text/x-dvi; q=0.8, text/x-c")
                .unwrap();
        assert_eq!(accepted.len(), 4);
        assert_accept(&accepted, 0, "text", "html", 1.0, &[]);
        assert_accept(&accepted, 1, "text", "x-c", 1.0, &[]);
        assert_accept(&accepted, 2, "text", "x-dvi", 0.8, &[]);
        assert_accept(&accepted, 3, "text", "plain", 0.5, &[]);
    }

    #[test]
    fn accept_header_subtype_tie_break_orders_subtypes_descending() {
        let accepted = parse_accept_header_with(
            "text/plain; q=0.5, text/html, text/x-dvi; q=0.8, text/x-c",
            AcceptOrdering::SubtypeTieBreak,
        )
        .unwrap();
        assert_accept(&accepted, 0, "text", "x-c", 1.0, &[]);
        assert_accept(&accepted, 1, "text", "html", 1.0, &[]);
        assert_accept(&accepted, 2, "text", "x-dvi", 0.8, &[]);
        assert_accept(&accepted, 3, "text", "plain", 0.5, &[]);
    }

    #[test]
    fn accept_header_with_extension_parameters() {
        let accepted = parse_accept_header(
            "text/*;q=0.3, text/html;q=0.7, text/html;level=1, text/html;level=2;q=0.4, */*;q=0.5",
        )
        .unwrap();
        assert_eq!(accepted.len(), 5);
        assert_accept(&accepted, 0, "text", "html", 1.0, &[("level", "1")]);
        assert_accept(&accepted, 1, "text", "html", 0.7, &[]);
        assert_accept(&accepted, 2, "*", "*", 0.5, &[]);
        assert_accept(&accepted, 3, "text", "html", 0.4, &[("level", "2")]);
        assert_accept(&accepted, 4, "text", "*", 0.3, &[]);
    }

    #[test]
    fn accept_header_bare_parameter_is_a_flag() {
        let accepted = parse_accept_header("application/json;charset").unwrap();
        assert_eq!(accepted[0].param("charset"), Some(&ParamValue::Flag));
    }

    #[test]
    fn accept_header_rejects_bad_quality() {
        assert_eq!(
            parse_accept_header("text/html;q=high"),
            Err(MediaTypeError::InvalidQuality("high".to_string()))
        );
        assert!(parse_accept_header("text/html;q=1.5").is_err());
    }

    #[test]
    fn accept_header_rejects_range_without_slash() {
        assert!(matches!(
            parse_accept_header("html"),
            Err(MediaTypeError::MissingSlash(_))
        ));
    }

    #[test]
    fn accept_header_quoted_comma_is_not_a_separator() {
        let accepted = parse_accept_header(
            "application/ld+json; profile=\"https://a.example,https://b.example\", text/html;q=0.1",
        )
        .unwrap();
        assert_eq!(accepted.len(), 2);
        assert_eq!(
            accepted[0].param("profile").and_then(ParamValue::as_str),
            Some("https://a.example,https://b.example")
        );
    }

    #[test]
    fn content_type_with_suffix_and_profile() {
        let content_type =
            parse_content_type("application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"")
                .unwrap();
        assert_eq!(content_type.mime_type, "application");
        assert_eq!(content_type.mime_subtype, "ld");
        assert_eq!(content_type.suffix.as_deref(), Some("json"));
        assert_eq!(content_type.tree, None);
        assert_eq!(content_type.params.len(), 1);
        assert_eq!(
            content_type.param("profile").and_then(ParamValue::as_str),
            Some("https://www.w3.org/ns/activitystreams")
        );
        assert!(is_activitypub_media_type(&content_type));
    }

    #[test]
    fn content_type_with_tree() {
        let content_type = parse_content_type("application/vnd.api+json").unwrap();
        assert_eq!(content_type.tree.as_deref(), Some("vnd"));
        assert_eq!(content_type.mime_subtype, "api");
        assert_eq!(content_type.suffix.as_deref(), Some("json"));
        assert_eq!(content_type.essence(), "application/vnd.api+json");
        assert!(content_type.params.is_empty());
    }

    #[test]
    fn content_type_requires_slash() {
        assert!(matches!(
            parse_content_type("json; charset=utf-8"),
            Err(MediaTypeError::MissingSlash(_))
        ));
        assert_eq!(parse_content_type("  "), Err(MediaTypeError::Empty));
    }

    #[test]
    fn activitypub_media_type_detection() {
        let activity = parse_content_type("application/activity+json").unwrap();
        let bare_ld = parse_content_type("application/ld+json").unwrap();
        let json = parse_content_type("application/json").unwrap();

        assert!(is_activitypub_media_type(&activity));
        assert!(!is_activitypub_media_type(&bare_ld));
        assert!(is_accepted_media_type(&bare_ld));
        assert!(!is_accepted_media_type(&json));
    }

    #[test]
    fn accept_range_matches_content_with_wildcards() {
        let content = parse_content_type("application/activity+json").unwrap();
        let ranges = parse_accept_header("application/*;q=0.5, */*;q=0, text/html").unwrap();

        assert!(!ranges[0].accepts(&content), "text/html must not match");
        assert!(ranges[1].accepts(&content), "application/* must match");
        assert!(!ranges[2].accepts(&content), "q=0 means not acceptable");
    }
}
