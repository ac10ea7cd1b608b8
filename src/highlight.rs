//! Glossary term highlighting over rendered report HTML.
//!
//! Terms are wrapped longest first so that a longer term (`영업이익률`) claims
//! its text before a shorter one it contains (`영업이익`). Only text between
//! tags is searched, and text that already sits inside a highlight marker is
//! never wrapped again.

use serde::{Deserialize, Serialize};

pub const MARKER_CLASS: &str = "highlighted-term";

const MARKER_OPEN: &str = "<span class=\"highlighted-term\"";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GlossaryEntry {
    pub term: String,
    #[serde(default)]
    pub explanation: String,
}

impl GlossaryEntry {
    pub fn new(term: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            explanation: explanation.into(),
        }
    }
}

/// Wraps every free-standing occurrence of each glossary term in a
/// `<span class="highlighted-term" data-term="...">` marker.
///
/// An occurrence is free-standing when the character before it is neither
/// `<` nor alphanumeric and the character after it is neither `>` nor
/// alphanumeric.
pub fn highlight_terms(html: &str, glossary: &[GlossaryEntry]) -> String {
    if html.is_empty() || glossary.is_empty() {
        return html.to_string();
    }

    let mut terms: Vec<&str> = glossary
        .iter()
        .map(|entry| entry.term.as_str())
        .filter(|term| !term.trim().is_empty())
        .collect();
    // Stable, so equal lengths keep glossary order.
    terms.sort_by_key(|term| std::cmp::Reverse(term.chars().count()));

    let mut current = html.to_string();
    for term in terms {
        current = wrap_term(&current, term);
    }
    current
}

/// Number of highlight markers in `html`.
pub fn marker_count(html: &str) -> usize {
    html.matches(MARKER_OPEN).count()
}

fn marker(term: &str) -> String {
    format!(
        "{MARKER_OPEN} data-term=\"{}\">{}</span>",
        escape_attr(term),
        escape_html(term)
    )
}

fn wrap_term(html: &str, term: &str) -> String {
    let needle = escape_html(term);
    let replacement = marker(term);
    let mut out = String::with_capacity(html.len());
    let mut in_marker = false;

    for segment in Segments::new(html) {
        match segment {
            Segment::Tag(tag) => {
                if tag.starts_with(MARKER_OPEN) {
                    in_marker = true;
                } else if in_marker && tag.starts_with("</span") {
                    in_marker = false;
                }
                out.push_str(tag);
            }
            Segment::Text { text, before, after } => {
                if in_marker {
                    out.push_str(text);
                } else {
                    replace_in_text(text, before, after, &needle, &replacement, &mut out);
                }
            }
        }
    }

    out
}

fn replace_in_text(
    text: &str,
    before: Option<char>,
    after: Option<char>,
    needle: &str,
    replacement: &str,
    out: &mut String,
) {
    let mut cursor = 0;
    let mut search_from = 0;

    while let Some(found) = text[search_from..].find(needle) {
        let start = search_from + found;
        let end = start + needle.len();

        let prev = text[..start].chars().next_back().or(before);
        let next = text[end..].chars().next().or(after);

        if is_free_standing(prev, next) && !inside_char_ref(&text[..start]) {
            out.push_str(&text[cursor..start]);
            out.push_str(replacement);
            cursor = end;
            search_from = end;
        } else {
            search_from = start + text[start..].chars().next().map_or(1, char::len_utf8);
        }
    }

    out.push_str(&text[cursor..]);
}

fn is_free_standing(prev: Option<char>, next: Option<char>) -> bool {
    let prev_ok = prev.map_or(true, |c| c != '<' && !c.is_alphanumeric());
    let next_ok = next.map_or(true, |c| c != '>' && !c.is_alphanumeric());
    prev_ok && next_ok
}

/// True when `prefix` ends inside an unterminated `&name` or `&#123` reference.
fn inside_char_ref(prefix: &str) -> bool {
    let Some(amp) = prefix.rfind('&') else {
        return false;
    };
    prefix[amp + 1..]
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '#')
}

enum Segment<'a> {
    Tag(&'a str),
    Text {
        text: &'a str,
        before: Option<char>,
        after: Option<char>,
    },
}

/// Splits HTML into tags and the text runs between them.
struct Segments<'a> {
    html: &'a str,
    pos: usize,
}

impl<'a> Segments<'a> {
    fn new(html: &'a str) -> Self {
        Self { html, pos: 0 }
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.html[self.pos..];
        if rest.is_empty() {
            return None;
        }

        let start = self.pos;
        if rest.starts_with('<') {
            if let Some(len) = tag_len(rest) {
                self.pos += len;
                return Some(Segment::Tag(&rest[..len]));
            }
        }

        // A `<` that opens no tag stays part of the text run.
        let skip = usize::from(rest.starts_with('<'));
        let len = rest[skip..].find('<').map_or(rest.len(), |idx| idx + skip);
        self.pos += len;
        Some(Segment::Text {
            text: &rest[..len],
            before: self.html[..start].chars().next_back(),
            after: self.html[self.pos..].chars().next(),
        })
    }
}

/// Length of the markup construct at the start of `rest`, or `None` when the
/// `<` does not open one.
///
/// Comments run to `-->`. Inside an element's start tag a quote opens only
/// as an attribute value (right after `=`), so a `>` inside
/// `title="a > b"` does not end the tag.
fn tag_len(rest: &str) -> Option<usize> {
    if let Some(body) = rest.strip_prefix("<!--") {
        return Some(body.find("-->").map_or(rest.len(), |end| 4 + end + 3));
    }

    match rest[1..].chars().next() {
        Some(c) if c.is_ascii_alphabetic() => Some(start_tag_len(rest)),
        Some('/' | '!' | '?') => Some(rest.find('>').map_or(rest.len(), |end| end + 1)),
        _ => None,
    }
}

fn start_tag_len(rest: &str) -> usize {
    let mut quote: Option<char> = None;
    let mut prev = '<';
    for (idx, c) in rest.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') if prev == '=' => quote = Some(c),
            (None, '>') => return idx + 1,
            (None, _) => {}
        }
        if quote.is_none() && !c.is_whitespace() {
            prev = c;
        }
    }
    rest.len()
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glossary(terms: &[&str]) -> Vec<GlossaryEntry> {
        terms.iter().map(|t| GlossaryEntry::new(*t, "")).collect()
    }

    #[test]
    fn longer_term_wins_over_contained_term() {
        let out = highlight_terms("<p>영업이익률 발표</p>", &glossary(&["영업이익", "영업이익률"]));
        assert_eq!(
            out,
            "<p><span class=\"highlighted-term\" data-term=\"영업이익률\">영업이익률</span> 발표</p>"
        );
        assert_eq!(marker_count(&out), 1);
    }

    #[test]
    fn wraps_every_free_standing_occurrence() {
        let out = highlight_terms("<p>PER and PER, (PER)</p>", &glossary(&["PER"]));
        assert_eq!(marker_count(&out), 3);
    }

    #[test]
    fn skips_occurrences_inside_words() {
        let out = highlight_terms("<p>EPS EPSILON 2EPS 영업이익은</p>", &glossary(&["EPS", "영업이익"]));
        assert_eq!(marker_count(&out), 1);
        assert!(out.contains("EPSILON 2EPS 영업이익은"));
    }

    #[test]
    fn never_touches_tag_attributes() {
        let html = "<p><a href=\"/PER\" title=\"PER ratio\">see</a> PER ratio</p>";
        let out = highlight_terms(html, &glossary(&["PER ratio", "PER", "ratio"]));
        assert!(out.starts_with("<p><a href=\"/PER\" title=\"PER ratio\">see</a> "));
        assert_eq!(marker_count(&out), 1);
        assert!(out.contains("data-term=\"PER ratio\">PER ratio</span>"));
    }

    #[test]
    fn does_not_rewrap_marker_contents() {
        let once = highlight_terms("<p>순이익 증가</p>", &glossary(&["순이익"]));
        let twice = highlight_terms(&once, &glossary(&["순이익"]));
        assert_eq!(once, twice);
    }

    #[test]
    fn matches_escaped_terms_and_skips_entities() {
        let out = highlight_terms("<p>R&amp;D spend &amp; amp</p>", &glossary(&["R&D", "amp"]));
        assert!(out.contains("data-term=\"R&amp;D\">R&amp;D</span>"));
        assert_eq!(marker_count(&out), 2);
        assert!(out.contains("&amp; <span"));
    }

    #[test]
    fn matches_next_to_punctuation_and_tags() {
        let out = highlight_terms("<li>PBR</li><li>\"PBR\"</li><b>PBR</b>.", &glossary(&["PBR"]));
        assert_eq!(marker_count(&out), 3);
    }

    #[test]
    fn comments_and_stray_brackets_do_not_hide_text() {
        let out = highlight_terms(
            "<!-- don't edit --><p>PER</p><!-- a > b --><p>x <3 it's PER</p>",
            &glossary(&["PER"]),
        );
        assert_eq!(marker_count(&out), 2);
        assert!(out.starts_with("<!-- don't edit --><p><span"));
        assert!(out.contains("<!-- a > b -->"));
    }

    #[test]
    fn apostrophe_in_unquoted_attribute_does_not_swallow_the_document() {
        let out = highlight_terms(
            "<p class=it's title = 'a > b'>PER</p><p>PER</p>",
            &glossary(&["PER"]),
        );
        assert_eq!(marker_count(&out), 2);
        assert!(out.starts_with("<p class=it's title = 'a > b'><span"));
    }

    #[test]
    fn empty_inputs_pass_through() {
        assert_eq!(highlight_terms("", &glossary(&["a"])), "");
        assert_eq!(highlight_terms("<p>x</p>", &[]), "<p>x</p>");
        assert_eq!(highlight_terms("<p>x</p>", &glossary(&["  "])), "<p>x</p>");
    }

    #[test]
    fn equal_length_terms_keep_glossary_order() {
        let out = highlight_terms("<p>ab-cd</p>", &glossary(&["ab", "cd"]));
        assert_eq!(marker_count(&out), 2);
        assert!(out.find("data-term=\"ab\"") < out.find("data-term=\"cd\""));
    }
}
