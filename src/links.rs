//! Chat reference canonicalization and classification.
//!
//! Every reference the engine touches, whether typed by the operator or
//! pulled out of a message, is reduced to one canonical deep-link form
//! (`https://t.me/<path>`). That form is the identity used for
//! deduplication, cache keys and equality.
//!
//! | Input | Canonical | Class |
//! |-------|-----------|-------|
//! | `@durov` / `durov` | `https://t.me/durov` | [`Classification::PublicUsername`] |
//! | `t.me/durov/42` | `https://t.me/durov/42` | [`Classification::PublicPost`] |
//! | `t.me/+AbC_d` | `https://t.me/+AbC_d` | [`Classification::InviteLink`] |
//! | `joinchat/AbC` | `https://t.me/joinchat/AbC` | [`Classification::InviteLink`] |
//! | `https://@durov` | `https://t.me/durov` | [`Classification::PublicUsername`] |

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Host every platform deep link lives under.
pub const PLATFORM_HOST: &str = "t.me";

/// Prefix of every synthesized canonical link.
pub const BASE_URL: &str = "https://t.me/";

/// Characters stripped from the end of a raw reference. Copy/paste often
/// drags sentence punctuation and closing brackets along with a link.
const TRAILING_JUNK: &[char] = &[
    '.', ',', ';', ':', ')', ']', '}', '»', '"', '\'', '/', '>',
];

/// Characters stripped from the start of a raw reference.
const LEADING_JUNK: &[char] = &['"', '\'', '<', '«', '(', '['];

static PLATFORM_ANY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:https?://)?t\.me/.+").expect("valid regex"));
static INVITE_PLUS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:https?://)?t\.me/\+([A-Za-z0-9_-]+)$").expect("valid regex")
});
static INVITE_JOINCHAT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:https?://)?t\.me/joinchat/([A-Za-z0-9_-]+)$").expect("valid regex")
});
static PUBLIC_USER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:https?://)?t\.me/([A-Za-z0-9_]{3,})$").expect("valid regex")
});
static PUBLIC_POST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:https?://)?t\.me/([A-Za-z0-9_]{3,})/\d+$").expect("valid regex")
});
static BARE_HANDLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@?([A-Za-z0-9_]{3,})$").expect("valid regex"));
static DOUBLED_SLASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)t\.me//+").expect("valid regex"));

/// URL-shaped platform links inside free text.
pub(crate) static TEXT_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:https?://)?t\.me/[^\s\)\]\}\,]+").expect("valid regex")
});
/// `@handle` mentions inside free text. Word-boundary checks happen in
/// [`mentions`] since the regex engine has no lookaround.
static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([A-Za-z0-9_]{3,})").expect("valid regex"));

/// Path segments that are routes on the platform host, never handles.
const RESERVED_SEGMENTS: &[&str] = &["joinchat", "addstickers", "share", "proxy", "socks"];

/// What kind of chat a canonical reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Private invitation (`+token` or legacy `joinchat/token`).
    InviteLink,
    /// A bare public handle.
    PublicUsername,
    /// A post inside a public chat (`handle/123`).
    PublicPost,
    /// On the platform host but none of the shapes above.
    Unclassified,
    /// Not a platform link at all. Callers reject these.
    NotPlatform,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Classification::InviteLink => "invite",
            Classification::PublicUsername => "public",
            Classification::PublicPost => "post",
            Classification::Unclassified => "unclassified",
            Classification::NotPlatform => "not-platform",
        };
        f.write_str(s)
    }
}

/// Reduce a raw, user- or message-supplied string to its canonical form.
///
/// Idempotent: `canonicalize(&canonicalize(x)) == canonicalize(x)`.
/// Empty or whitespace-only input yields an empty string.
pub fn canonicalize(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_start_matches(LEADING_JUNK)
        .trim_end_matches(TRAILING_JUNK)
        .trim();
    let mut s: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    s = s.trim_end_matches(TRAILING_JUNK).to_string();
    if s.is_empty() {
        return s;
    }

    let lower = s.to_ascii_lowercase();
    if lower.starts_with("https://@") || lower.starts_with("http://@") {
        if let Some(at) = s.find('@') {
            s = s[at..].to_string();
        }
    }

    if let Some(caps) = BARE_HANDLE_RE.captures(&s) {
        if s.starts_with('@') || !s.to_ascii_lowercase().starts_with("http") {
            return format!("{}{}", BASE_URL, &caps[1]);
        }
    }

    let lower = s.to_ascii_lowercase();
    if !has_scheme(&lower) {
        if lower.starts_with("t.me/") || lower == PLATFORM_HOST {
            s = format!("https://{}", s);
        } else if looks_like_bare_path(&s) {
            s = format!("{}{}", BASE_URL, s);
        } else {
            s = format!("https://{}", s);
        }
    }

    let collapsed = DOUBLED_SLASH_RE.replace_all(&s, "t.me/").into_owned();
    let lower = collapsed.to_ascii_lowercase();
    let normalized = if lower.starts_with("http://t.me/") {
        format!("{}{}", BASE_URL, &collapsed["http://t.me/".len()..])
    } else if lower.starts_with(BASE_URL) {
        format!("{}{}", BASE_URL, &collapsed[BASE_URL.len()..])
    } else {
        collapsed
    };
    normalized.trim_end_matches('/').to_string()
}

fn has_scheme(lower: &str) -> bool {
    lower.starts_with("https://") || lower.starts_with("http://")
}

/// A host-less path such as `+token`, `joinchat/token` or `handle/12`.
/// Strings starting with `@` never qualify, so short mentions like `@ab`
/// cannot become platform links.
fn looks_like_bare_path(s: &str) -> bool {
    if s.starts_with('@') {
        return false;
    }
    if s.starts_with('+') {
        return true;
    }
    match s.split_once('/') {
        Some((first, _)) => !first.is_empty() && !first.contains('.') && !first.contains(':'),
        None => false,
    }
}

/// Whether a string references the platform host at all.
pub fn is_platform_link(s: &str) -> bool {
    PLATFORM_ANY_RE.is_match(s)
}

/// Classify a canonical reference.
pub fn classify(canonical: &str) -> Classification {
    if INVITE_PLUS_RE.is_match(canonical) || INVITE_JOINCHAT_RE.is_match(canonical) {
        return Classification::InviteLink;
    }
    if let Some(caps) = PUBLIC_USER_RE.captures(canonical) {
        if !is_reserved(&caps[1]) {
            return Classification::PublicUsername;
        }
    }
    if let Some(caps) = PUBLIC_POST_RE.captures(canonical) {
        if !is_reserved(&caps[1]) {
            return Classification::PublicPost;
        }
    }
    if is_platform_link(canonical) {
        Classification::Unclassified
    } else {
        Classification::NotPlatform
    }
}

fn is_reserved(segment: &str) -> bool {
    RESERVED_SEGMENTS
        .iter()
        .any(|r| r.eq_ignore_ascii_case(segment))
}

/// The public handle carried by a public-user or public-post reference.
pub fn public_handle(canonical: &str) -> Option<&str> {
    let caps = PUBLIC_USER_RE
        .captures(canonical)
        .or_else(|| PUBLIC_POST_RE.captures(canonical))?;
    let handle = caps.get(1)?;
    if is_reserved(handle.as_str()) {
        return None;
    }
    Some(&canonical[handle.range()])
}

/// `@handle` mentions in free text that are not glued to surrounding word
/// characters.
pub(crate) fn mentions(text: &str) -> impl Iterator<Item = &str> {
    MENTION_RE.captures_iter(text).filter_map(move |caps| {
        let whole = caps.get(0)?;
        let before = text[..whole.start()].chars().next_back();
        let after = text[whole.end()..].chars().next();
        let is_word = |c: char| c.is_alphanumeric() || c == '_';
        if before.is_some_and(is_word) || after.is_some_and(is_word) {
            return None;
        }
        caps.get(1).map(|m| m.as_str())
    })
}

/// A chat reference: the raw input, its canonical form and classification,
/// all computed once. Equality, ordering and hashing use the canonical form
/// only.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRef {
    raw: String,
    canonical: String,
    class: Classification,
}

impl ChatRef {
    /// Canonicalize `raw`. Returns `None` for input that canonicalizes to
    /// nothing.
    pub fn parse(raw: &str) -> Option<Self> {
        let canonical = canonicalize(raw);
        if canonical.is_empty() {
            return None;
        }
        let class = classify(&canonical);
        Some(Self {
            raw: raw.to_string(),
            canonical,
            class,
        })
    }

    /// Canonical reference for a public handle (without `@`).
    pub fn from_handle(handle: &str) -> Option<Self> {
        Self::parse(&format!("@{}", handle.trim_start_matches('@')))
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn classification(&self) -> Classification {
        self.class
    }

    pub fn is_platform(&self) -> bool {
        self.class != Classification::NotPlatform
    }

    pub fn is_invite(&self) -> bool {
        self.class == Classification::InviteLink
    }

    /// Public handle usable as a direct lookup target.
    pub fn handle(&self) -> Option<&str> {
        match self.class {
            Classification::PublicUsername | Classification::PublicPost => {
                public_handle(&self.canonical)
            }
            _ => None,
        }
    }
}

impl PartialEq for ChatRef {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for ChatRef {}

impl std::hash::Hash for ChatRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl PartialOrd for ChatRef {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChatRef {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl std::fmt::Display for ChatRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// Parse every non-empty line of a multi-line paste.
pub fn parse_lines(raw: &str) -> Vec<ChatRef> {
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(ChatRef::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "@abcxy",
        "abcxy",
        "t.me/abcxy/",
        "https://t.me/abcxy",
        "http://t.me/abcxy",
        "  <https://t.me/abcxy>.  ",
        "https://@abcxy",
        "t.me/+AbCd_-9",
        "https://t.me/joinchat/AbCdEf",
        "joinchat/AbCdEf",
        "+AbCdEf",
        "t.me//abcxy",
        "t.me///abcxy/15",
        "https://t.me/s/abcxy",
        "t.me/abc\nxy",
        "example.com/page",
        "@ab",
        "ab",
        "t.me/abc./",
        "\"https://t.me/abcxy\"),",
    ];

    #[test]
    fn canonicalize_is_idempotent() {
        for s in SAMPLES {
            let once = canonicalize(s);
            assert_eq!(canonicalize(&once), once, "not idempotent for {:?}", s);
        }
    }

    #[test]
    fn handle_forms_agree() {
        let expected = "https://t.me/abcxy";
        assert_eq!(canonicalize("@abcxy"), expected);
        assert_eq!(canonicalize("abcxy"), expected);
        assert_eq!(canonicalize("t.me/abcxy/"), expected);
        assert_eq!(canonicalize("https://@abcxy"), expected);
        assert_eq!(canonicalize("http://t.me/abcxy"), expected);
        assert_eq!(canonicalize(" <https://t.me/abcxy>. "), expected);
        assert_eq!(canonicalize("t.me/abc\nxy"), expected);
    }

    #[test]
    fn empty_input_is_empty() {
        assert_eq!(canonicalize(""), "");
        assert_eq!(canonicalize("  \n\t "), "");
        assert!(ChatRef::parse("   ").is_none());
    }

    #[test]
    fn invite_forms() {
        assert_eq!(canonicalize("t.me/+AbCd_-9"), "https://t.me/+AbCd_-9");
        assert_eq!(canonicalize("+AbCdEf"), "https://t.me/+AbCdEf");
        assert_eq!(
            canonicalize("joinchat/AbCdEf"),
            "https://t.me/joinchat/AbCdEf"
        );
        assert_eq!(
            classify(&canonicalize("t.me/+AbCd_-9")),
            Classification::InviteLink
        );
        assert_eq!(
            classify(&canonicalize("https://t.me/joinchat/AbCdEf")),
            Classification::InviteLink
        );
    }

    #[test]
    fn public_forms() {
        assert_eq!(
            classify(&canonicalize("@abcxy")),
            Classification::PublicUsername
        );
        let post = canonicalize("t.me///abcxy/15");
        assert_eq!(post, "https://t.me/abcxy/15");
        assert_eq!(classify(&post), Classification::PublicPost);
        assert_eq!(public_handle(&post), Some("abcxy"));
    }

    #[test]
    fn short_handles_are_never_handles() {
        let c = canonicalize("@ab");
        assert_eq!(classify(&c), Classification::NotPlatform);
        assert_eq!(classify(&canonicalize("ab")), Classification::NotPlatform);
        assert_eq!(
            classify("https://t.me/ab"),
            Classification::Unclassified
        );
        assert!(public_handle("https://t.me/ab").is_none());
    }

    #[test]
    fn other_platform_paths_are_unclassified() {
        assert_eq!(
            classify(&canonicalize("https://t.me/s/abcxy")),
            Classification::Unclassified
        );
        assert_eq!(
            classify("https://t.me/joinchat"),
            Classification::Unclassified
        );
    }

    #[test]
    fn foreign_links_are_not_platform() {
        let c = canonicalize("example.com/page");
        assert_eq!(c, "https://example.com/page");
        assert!(!is_platform_link(&c));
        assert_eq!(classify(&c), Classification::NotPlatform);
    }

    #[test]
    fn chat_ref_identity_is_canonical() {
        let a = ChatRef::parse("@abcxy").unwrap();
        let b = ChatRef::parse("t.me/abcxy/").unwrap();
        assert_eq!(a, b);
        assert_ne!(a.raw(), b.raw());
        assert_eq!(a.handle(), Some("abcxy"));
        assert_eq!(ChatRef::from_handle("abcxy").unwrap(), a);
    }

    #[test]
    fn mentions_respect_word_boundaries() {
        let found: Vec<_> = mentions("hi @alpha, mail x@beta.com and @ab or @gamma_1").collect();
        assert_eq!(found, vec!["alpha", "gamma_1"]);
    }

    #[test]
    fn parse_lines_skips_blanks() {
        let refs = parse_lines("@alpha\n\n  \nt.me/+Tok\n");
        assert_eq!(refs.len(), 2);
        assert!(refs[1].is_invite());
    }
}
