use chrono::NaiveDate;
use log::debug;
use pulldown_cmark::{html as md_html, Options as MdOptions, Parser};

use crate::backend::ReportDetail;
use crate::highlight::{highlight_terms, marker_count, GlossaryEntry};
use crate::outline::{parse_outline, HeadingNode};
use crate::sections::annotate_sections;

/// A report ready to be placed into a page.
#[derive(Debug, Clone)]
pub struct ReportPage {
    pub id: i64,
    pub title: String,
    pub company: Option<String>,
    pub date: String,
    pub headings: Vec<HeadingNode>,
    pub html: String,
    pub highlighted: usize,
}

impl ReportPage {
    /// Runs the viewer pipeline: outline and section anchors first, then
    /// markdown rendering, then glossary highlighting on the rendered HTML.
    pub fn build(id: i64, detail: ReportDetail, glossary: &[GlossaryEntry], today: NaiveDate) -> Self {
        let headings = parse_outline(&detail.chapter);
        let annotated = annotate_sections(&detail.content);
        let rendered = render_markdown(&annotated);
        let html = highlight_terms(&rendered, glossary);
        let highlighted = marker_count(&html);
        debug!(
            "report {id}: {} top-level headings, {highlighted} highlighted terms",
            headings.len()
        );

        let date = detail
            .date
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| korean_date(today));
        let company = detail.company.filter(|c| !c.trim().is_empty());

        Self {
            id,
            title: detail.title,
            company,
            date,
            headings,
            html,
            highlighted,
        }
    }
}

pub fn render_markdown(source: &str) -> String {
    if source.is_empty() {
        return String::new();
    }
    let mut options = MdOptions::empty();
    options.insert(MdOptions::ENABLE_TABLES);
    options.insert(MdOptions::ENABLE_FOOTNOTES);
    options.insert(MdOptions::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(source, options);
    let mut html = String::new();
    md_html::push_html(&mut html, parser);
    html
}

/// `2025년 03월 07일`
pub fn korean_date(date: NaiveDate) -> String {
    date.format("%Y년 %m월 %d일").to_string()
}
