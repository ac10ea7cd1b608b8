use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::outline::section_id;

const ANCHOR_MARKER: &str = "<span id=\"section";

lazy_static! {
    static ref EXISTING_ANCHOR_RE: Regex =
        Regex::new(r#"<span id="(section[0-9]+(?:-[0-9]+)?)""#).unwrap();
    static ref HASHED_TOP_RE: Regex =
        Regex::new(r"^(#{1,3})\s+([0-9]+)\.\s+(.+)$").unwrap();
    static ref HASHED_SUB_RE: Regex =
        Regex::new(r"^(#{1,3})\s+([0-9]+)\.([0-9]+)\s+(.+)$").unwrap();
    static ref BARE_TOP_RE: Regex = Regex::new(r"^([0-9]+)\.\s+(.+)$").unwrap();
    static ref BARE_SUB_RE: Regex = Regex::new(r"^([0-9]+)\.([0-9]+)\s+(.+)$").unwrap();
}

/// Rewrites numbered heading lines into markdown headings that carry an
/// anchor span, e.g. `1.1 실적` becomes
/// `#### <span id="section1-1">1.1 실적</span>`.
///
/// Each id is handed out at most once per document: a heading number that
/// shows up again later is left as it is. Lines that already carry an anchor
/// are passed through, so running this over its own output changes nothing.
pub fn annotate_sections(markdown: &str) -> String {
    let mut assigned: HashSet<String> = HashSet::new();

    markdown
        .split('\n')
        .map(|line| {
            let (body, line_end) = match line.strip_suffix('\r') {
                Some(body) => (body, "\r"),
                None => (line, ""),
            };
            match annotate_line(body, &mut assigned) {
                Some(rewritten) => format!("{rewritten}{line_end}"),
                None => line.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn annotate_line(line: &str, assigned: &mut HashSet<String>) -> Option<String> {
    if line.contains(ANCHOR_MARKER) {
        for caps in EXISTING_ANCHOR_RE.captures_iter(line) {
            assigned.insert(caps[1].to_string());
        }
        return None;
    }

    if let Some(caps) = HASHED_TOP_RE.captures(line) {
        let id = section_id(&caps[2], None);
        let label = format!("{}. {}", &caps[2], &caps[3]);
        return claim(assigned, id, &caps[1], &label);
    }

    if let Some(caps) = HASHED_SUB_RE.captures(line) {
        let id = section_id(&caps[2], Some(&caps[3]));
        let label = sub_label(&caps, 2);
        return claim(assigned, id, &caps[1], &label);
    }

    if let Some(caps) = BARE_TOP_RE.captures(line) {
        let id = section_id(&caps[1], None);
        let label = format!("{}. {}", &caps[1], &caps[2]);
        return claim(assigned, id, "###", &label);
    }

    if let Some(caps) = BARE_SUB_RE.captures(line) {
        let id = section_id(&caps[1], Some(&caps[2]));
        let label = sub_label(&caps, 1);
        return claim(assigned, id, "####", &label);
    }

    None
}

fn sub_label(caps: &Captures<'_>, first: usize) -> String {
    format!(
        "{}.{} {}",
        &caps[first],
        &caps[first + 1],
        &caps[first + 2]
    )
}

fn claim(assigned: &mut HashSet<String>, id: String, hashes: &str, label: &str) -> Option<String> {
    if assigned.contains(&id) {
        return None;
    }
    let line = format!("{hashes} <span id=\"{id}\">{label}</span>");
    assigned.insert(id);
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_existing_hash_count() {
        let out = annotate_sections("## 1. 보고서 요약\n# 2.3 실적 요인 분석");
        assert_eq!(
            out,
            "## <span id=\"section1\">1. 보고서 요약</span>\n# <span id=\"section2-3\">2.3 실적 요인 분석</span>"
        );
    }

    #[test]
    fn promotes_bare_numbered_lines() {
        let out = annotate_sections("1. Summary\n1.1 Highlights\nplain text");
        assert_eq!(
            out,
            "### <span id=\"section1\">1. Summary</span>\n#### <span id=\"section1-1\">1.1 Highlights</span>\nplain text"
        );
    }

    #[test]
    fn is_idempotent() {
        let source = "### 1. A\nbody\n1.1 B\n\n1. A\n2. C\n#### 9. too deep";
        let once = annotate_sections(source);
        let twice = annotate_sections(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn only_first_duplicate_gets_anchor() {
        let out = annotate_sections("### 1. A\ntext\n1. A");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "### <span id=\"section1\">1. A</span>");
        assert_eq!(lines[2], "1. A");
        assert_eq!(out.matches("id=\"section1\"").count(), 1);
    }

    #[test]
    fn leaves_non_heading_lines_alone() {
        let source = "#### 1. four hashes\n1.a not a number\n1.\n12.5% growth\n- 1. listed";
        assert_eq!(annotate_sections(source), source);
    }

    #[test]
    fn preserves_crlf_line_endings() {
        let out = annotate_sections("1. A\r\nbody\r\n");
        assert_eq!(out, "### <span id=\"section1\">1. A</span>\r\nbody\r\n");
    }

    #[test]
    fn respects_anchors_from_a_previous_pass() {
        let out = annotate_sections("## <span id=\"section2\">2. B</span>\n2. B");
        assert!(out.ends_with("\n2. B"));
    }
}
