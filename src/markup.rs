//! Anchors embedded in markup prose.
//!
//! Prose fields use markdown with two kinds of machine-readable anchors:
//! insert anchors (`{{ insert: param, ac-1_prm_1 }}`) and fragment links
//! (`[AC-2](#ac-2)`). The scanner reports both; the rewriter swaps their
//! targets while leaving the surrounding text intact.

use regex::{Captures, Regex};
use std::borrow::Cow;
use std::sync::OnceLock;

/// A machine-readable anchor found in prose.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Anchor<'a> {
    Insert { kind: &'a str, id: &'a str },
    Link { href: &'a str },
}

fn insert_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*insert:\s*([A-Za-z][\w-]*)\s*,\s*([^\s,}]+)\s*\}\}")
            .expect("insert anchor pattern compiles")
    })
}

fn link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"\[([^\]]*)\]\(([^)\s]+)(\s+"[^"]*")?\)"#).expect("link pattern compiles")
    })
}

/// Every anchor in document order.
pub fn anchors(text: &str) -> Vec<Anchor<'_>> {
    let mut found: Vec<(usize, Anchor<'_>)> = Vec::new();
    for caps in insert_pattern().captures_iter(text) {
        if let (Some(whole), Some(kind), Some(id)) = (caps.get(0), caps.get(1), caps.get(2)) {
            found.push((
                whole.start(),
                Anchor::Insert {
                    kind: kind.as_str(),
                    id: id.as_str(),
                },
            ));
        }
    }
    for caps in link_pattern().captures_iter(text) {
        if let (Some(whole), Some(href)) = (caps.get(0), caps.get(2)) {
            found.push((whole.start(), Anchor::Link { href: href.as_str() }));
        }
    }
    found.sort_by_key(|(offset, _)| *offset);
    found.into_iter().map(|(_, anchor)| anchor).collect()
}

/// Rewrite anchor targets.
///
/// `replace` receives each anchor and returns the new target (parameter id for
/// inserts, href for links), or `None` to leave the anchor unchanged.
pub fn rewrite<F>(text: &str, mut replace: F) -> Cow<'_, str>
where
    F: FnMut(&Anchor<'_>) -> Option<String>,
{
    let inserted = insert_pattern().replace_all(text, |caps: &Captures<'_>| {
        let anchor = Anchor::Insert {
            kind: &caps[1],
            id: &caps[2],
        };
        match replace(&anchor) {
            Some(id) => format!("{{{{ insert: {}, {id} }}}}", &caps[1]),
            None => caps[0].to_string(),
        }
    });
    let linked = link_pattern().replace_all(&inserted, |caps: &Captures<'_>| {
        let anchor = Anchor::Link { href: &caps[2] };
        match replace(&anchor) {
            Some(href) => {
                let title = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
                format!("[{}]({href}{title})", &caps[1])
            }
            None => caps[0].to_string(),
        }
    });
    let unchanged = matches!(inserted, Cow::Borrowed(_)) && matches!(linked, Cow::Borrowed(_));
    if unchanged {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(linked.into_owned())
    }
}

/// Rewrite an optional prose field in place.
pub fn rewrite_in_place<F>(field: &mut Option<String>, replace: F)
where
    F: FnMut(&Anchor<'_>) -> Option<String>,
{
    if let Some(text) = field.as_mut() {
        rewrite_string(text, replace);
    }
}

/// Rewrite a prose string in place.
pub fn rewrite_string<F>(text: &mut String, replace: F)
where
    F: FnMut(&Anchor<'_>) -> Option<String>,
{
    if let Cow::Owned(updated) = rewrite(text, replace) {
        *text = updated;
    }
}

/// Identifier named by a fragment reference (`#id`).
pub fn parse_fragment(href: &str) -> Option<&str> {
    href.strip_prefix('#').filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchors_are_reported_in_document_order() {
        let text = "See [AC-2](#ac-2) and set {{ insert: param, ac-1_prm_1 }} per [guide](https://example.com).";
        let found = anchors(text);
        assert_eq!(
            found,
            vec![
                Anchor::Link { href: "#ac-2" },
                Anchor::Insert {
                    kind: "param",
                    id: "ac-1_prm_1"
                },
                Anchor::Link {
                    href: "https://example.com"
                },
            ]
        );
    }

    #[test]
    fn rewrite_swaps_targets_and_keeps_text() {
        let text = "Use {{insert: param, p1}} with [AC-2](#ac-2 \"title\").";
        let rewritten = rewrite(text, |anchor| match anchor {
            Anchor::Insert { id, .. } => Some(format!("x-{id}")),
            Anchor::Link { href } => parse_fragment(href).map(|id| format!("#x-{id}")),
        });
        assert_eq!(
            rewritten,
            "Use {{ insert: param, x-p1 }} with [AC-2](#x-ac-2 \"title\")."
        );
    }

    #[test]
    fn untouched_text_is_borrowed() {
        let text = "Plain text with [link](#a).";
        assert!(matches!(rewrite(text, |_| None), Cow::Borrowed(_)));
    }

    #[test]
    fn fragments_require_an_identifier() {
        assert_eq!(parse_fragment("#ac-1"), Some("ac-1"));
        assert_eq!(parse_fragment("#"), None);
        assert_eq!(parse_fragment("ac-1"), None);
    }
}
