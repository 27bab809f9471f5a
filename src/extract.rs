//! Chat reference extraction from history messages.
//!
//! This is the single place that decides whether a message references a
//! chat. It scans four sources and funnels every candidate through
//! [`canonicalize`](crate::links::canonicalize):
//!
//! 1. the body (message text or media caption) via the link pattern,
//! 2. `@handle` mentions in the same body,
//! 3. rich-text entities: a text-link contributes its explicit target, a URL
//!    entity contributes the exact substring it spans,
//! 4. inline keyboard buttons with a platform URL.
//!
//! Results are deduplicated by canonical form, first-seen order preserved.
//! Only platform references survive.

use std::collections::HashSet;

use crate::links::{self, ChatRef, BASE_URL, TEXT_LINK_RE};
use crate::models::{EntityKind, Message};

/// Every distinct platform reference in `message`, in first-seen order.
pub fn extract_all(message: &Message) -> Vec<ChatRef> {
    let mut candidates: Vec<String> = Vec::new();

    if let Some(body) = message.body() {
        candidates.extend(links_from_text(body));
        candidates.extend(links_from_entities(message, body));
    }
    candidates.extend(
        message
            .button_urls()
            .filter(|url| links::is_platform_link(url))
            .map(str::to_string),
    );

    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter_map(|c| ChatRef::parse(c))
        .filter(|r| r.is_platform())
        .filter(|r| seen.insert(r.canonical().to_string()))
        .collect()
}

fn links_from_text(text: &str) -> Vec<String> {
    let mut out: Vec<String> = TEXT_LINK_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect();
    out.extend(links::mentions(text).map(|h| format!("{}{}", BASE_URL, h)));
    out
}

fn links_from_entities(message: &Message, body: &str) -> Vec<String> {
    let mut out = Vec::new();
    for entity in message.entities() {
        match &entity.kind {
            EntityKind::TextLink { url } => {
                if links::is_platform_link(url) {
                    out.push(url.clone());
                }
            }
            EntityKind::Url => {
                if let Some(span) = entity.span(body) {
                    if links::is_platform_link(&span) || span.starts_with('@') {
                        out.push(span);
                    }
                }
            }
            EntityKind::Other => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Button, Entity};

    fn canon(refs: &[ChatRef]) -> Vec<&str> {
        refs.iter().map(|r| r.canonical()).collect()
    }

    #[test]
    fn text_links_and_mentions() {
        let m = Message::text(1, "join t.me/+TOKEN123 or ping @somechan, also https://t.me/other_chan/55.");
        let refs = extract_all(&m);
        assert_eq!(
            canon(&refs),
            vec![
                "https://t.me/+TOKEN123",
                "https://t.me/other_chan/55",
                "https://t.me/somechan",
            ]
        );
    }

    #[test]
    fn one_reference_per_source_with_cross_source_dedup() {
        let m = Message::captioned(2, "credits to @alpha_chan")
            .with_button_row(vec![
                Button::link("Open", "https://t.me/beta_chan"),
                Button::link("Site", "https://example.com"),
            ])
            .with_button_row(vec![Button::link("Again", "t.me/alpha_chan/")]);
        let text = Message::text(3, "raw t.me/+TOKEN here");

        let caption_refs = extract_all(&m);
        assert_eq!(
            canon(&caption_refs),
            vec!["https://t.me/alpha_chan", "https://t.me/beta_chan"]
        );
        assert_eq!(canon(&extract_all(&text)), vec!["https://t.me/+TOKEN"]);
    }

    #[test]
    fn entities_contribute_targets() {
        let body = "click here or visit t.me/gamma_x";
        let m = Message::text(4, body).with_entities(vec![
            Entity::text_link(0, 10, "https://t.me/+HiddenTok"),
            Entity::text_link(0, 10, "https://example.org/x"),
            Entity::url(20, 12),
        ]);
        let refs = extract_all(&m);
        assert_eq!(
            canon(&refs),
            vec!["https://t.me/gamma_x", "https://t.me/+HiddenTok"]
        );
    }

    #[test]
    fn url_entity_mention_is_canonicalized() {
        let body = "@delta_chan";
        let m = Message::text(5, body).with_entities(vec![Entity::url(0, 11)]);
        assert_eq!(canon(&extract_all(&m)), vec!["https://t.me/delta_chan"]);
    }

    #[test]
    fn empty_message_has_no_refs() {
        assert!(extract_all(&Message::default()).is_empty());
        assert!(extract_all(&Message::text(6, "nothing to see, @ab")).is_empty());
    }
}
