use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

/// One entry of the report's table of contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeadingNode {
    pub id: String,
    pub text: String,
    pub level: u8,
    pub children: Vec<HeadingNode>,
}

impl HeadingNode {
    fn top(number: &str, text: &str) -> Self {
        Self {
            id: section_id(number, None),
            text: text.to_string(),
            level: 1,
            children: Vec::new(),
        }
    }

    fn sub(main: &str, sub: &str, text: String) -> Self {
        Self {
            id: section_id(main, Some(sub)),
            text,
            level: 2,
            children: Vec::new(),
        }
    }
}

/// Anchor id for a section number: `section3` or `section2-1`.
pub fn section_id(main: &str, sub: Option<&str>) -> String {
    match sub {
        Some(sub) => format!("section{main}-{sub}"),
        None => format!("section{main}"),
    }
}

/// Builds the heading tree from flat outline text such as
/// `1. 보고서 요약\n 1.1 실적 주요 특징`.
///
/// Lines that are neither `N.` nor `N.M` headings are skipped. An `N.M` line
/// always lands under the top-level node numbered `N`; it is dropped when no
/// such node exists yet. When a number repeats the first occurrence keeps
/// the id.
pub fn parse_outline(text: &str) -> Vec<HeadingNode> {
    lazy_static! {
        static ref TOP_RE: Regex = Regex::new(r"^([0-9]+)\.(?:[^0-9]|$)").unwrap();
        static ref SUB_RE: Regex = Regex::new(r"^([0-9]+)\.([0-9]+)").unwrap();
        static ref SUB_TITLE_RE: Regex = Regex::new(r"^([0-9]+\.[0-9]+)\s+(.*)").unwrap();
    }

    let mut headings: Vec<HeadingNode> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if let Some(caps) = TOP_RE.captures(line) {
            let node = HeadingNode::top(&caps[1], line);
            if seen.insert(node.id.clone()) {
                headings.push(node);
            }
            continue;
        }

        let Some(caps) = SUB_RE.captures(line) else {
            continue;
        };
        let parent_id = section_id(&caps[1], None);
        let Some(parent) = headings.iter().position(|h| h.id == parent_id) else {
            continue;
        };

        let label = match SUB_TITLE_RE.captures(line) {
            Some(titled) => format!("{} {}", &titled[1], &titled[2]),
            None => line.to_string(),
        };
        let node = HeadingNode::sub(&caps[1], &caps[2], label);
        if seen.insert(node.id.clone()) {
            headings[parent].children.push(node);
        }
    }

    headings
}
