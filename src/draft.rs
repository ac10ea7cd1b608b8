//! State behind the "new report" form.
//!
//! The outline text, title and summary sent to the backend are all computed
//! from [`ReportDraft`]; nothing is read back from rendered markup.

use crate::backend::NewReport;

const EVALUATION_RUBRIC: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/evaluation.txt"));

pub const DEFAULT_QUARTER: &str = "2024년 4분기";

pub const QUARTERS: [&str; 6] = [
    "2024년 1분기",
    "2024년 2분기",
    "2024년 3분기",
    "2024년 4분기",
    "2025년 1분기",
    "2025년 2분기",
];

pub const COMMON_INDICATORS: [&str; 15] = [
    "PER", "PBR", "EPS", "BPS", "ROE", "ROA", "EBITDA", "EV/EBITDA", "매출액성장률",
    "영업이익률", "순이익률", "부채비율", "배당수익률", "FCF", "베타",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleOption {
    DateCompany,
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftSubsection {
    pub key: String,
    pub number: String,
    pub title: String,
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftSection {
    pub key: String,
    pub number: u8,
    pub title: String,
    pub checked: bool,
    pub subsections: Vec<DraftSubsection>,
}

impl DraftSection {
    fn new(number: u8, title: String, subsections: &[&str]) -> Self {
        Self {
            key: format!("section{number}"),
            number,
            title,
            checked: true,
            subsections: subsections
                .iter()
                .enumerate()
                .map(|(idx, title)| DraftSubsection {
                    key: format!("section{number}_{}", idx + 1),
                    number: format!("{number}.{}", idx + 1),
                    title: (*title).to_string(),
                    checked: true,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftSummary {
    pub company: String,
    pub quarter: String,
    pub title: String,
    pub sections: usize,
    pub indicators: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportDraft {
    pub company: String,
    pub quarter: String,
    pub title_option: TitleOption,
    pub indicators: Vec<String>,
    pub sections: Vec<DraftSection>,
}

impl Default for ReportDraft {
    fn default() -> Self {
        Self::new(DEFAULT_QUARTER)
    }
}

impl ReportDraft {
    pub fn new(quarter: &str) -> Self {
        Self {
            company: String::new(),
            quarter: quarter.to_string(),
            title_option: TitleOption::DateCompany,
            indicators: Vec::new(),
            sections: default_sections(quarter),
        }
    }

    /// Rebuilds a draft from submitted form fields. Checkboxes only appear
    /// in a submission when checked.
    pub fn from_form(fields: &[(String, String)]) -> Self {
        let value = |name: &str| {
            fields
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.trim().to_string())
        };
        let present = |name: &str| fields.iter().any(|(key, _)| key == name);

        let quarter = value("quarter")
            .filter(|q| !q.is_empty())
            .unwrap_or_else(|| DEFAULT_QUARTER.to_string());
        let mut draft = ReportDraft::new(&quarter);
        draft.company = value("company").unwrap_or_default();
        draft.title_option = match value("title_option").as_deref() {
            Some("custom") => TitleOption::Custom(value("title").unwrap_or_default()),
            _ => TitleOption::DateCompany,
        };

        for (key, indicator) in fields {
            if key == "indicator" {
                draft.toggle_indicator(indicator.trim());
            }
        }

        for section in &mut draft.sections {
            section.checked = present(&section.key);
            for sub in &mut section.subsections {
                sub.checked = section.checked && present(&sub.key);
            }
        }
        draft
    }

    /// Checks or clears a whole section together with its subsections.
    pub fn set_section(&mut self, key: &str, checked: bool) {
        if let Some(section) = self.sections.iter_mut().find(|s| s.key == key) {
            section.checked = checked;
            for sub in &mut section.subsections {
                sub.checked = checked;
            }
        }
    }

    pub fn select_all(&mut self, checked: bool) {
        let keys: Vec<String> = self.sections.iter().map(|s| s.key.clone()).collect();
        for key in keys {
            self.set_section(&key, checked);
        }
    }

    pub fn toggle_indicator(&mut self, indicator: &str) {
        if indicator.is_empty() {
            return;
        }
        if let Some(pos) = self.indicators.iter().position(|i| i == indicator) {
            self.indicators.remove(pos);
        } else {
            self.indicators.push(indicator.to_string());
        }
    }

    /// Outline text in the shape the report generator expects:
    /// `1. 보고서 요약\n 1.1 실적 주요 특징\n\n2. ...`.
    pub fn chapter_text(&self) -> String {
        let mut text = String::new();
        for section in self.sections.iter().filter(|s| s.checked) {
            text.push_str(&format!("{}. {}\n", section.number, section.title));
            for sub in section.subsections.iter().filter(|s| s.checked) {
                text.push_str(&format!(" {} {}\n", sub.number, sub.title));
            }
            text.push('\n');
        }
        text.trim().to_string()
    }

    pub fn title(&self) -> String {
        match &self.title_option {
            TitleOption::Custom(title) if !title.is_empty() => title.clone(),
            _ => format!("{} {} 실적 분석 보고서", self.company, self.quarter),
        }
    }

    pub fn title_preview(&self) -> String {
        match &self.title_option {
            TitleOption::DateCompany => {
                let company = if self.company.is_empty() {
                    "기업명"
                } else {
                    &self.company
                };
                format!("{} - {company}", self.quarter)
            }
            TitleOption::Custom(title) if title.is_empty() => "제목을 입력해주세요".to_string(),
            TitleOption::Custom(title) => title.clone(),
        }
    }

    pub fn summary(&self) -> DraftSummary {
        let company = if self.company.is_empty() {
            "설정되지 않음".to_string()
        } else {
            self.company.clone()
        };
        let title = match &self.title_option {
            TitleOption::DateCompany => "날짜-기업명 형식".to_string(),
            TitleOption::Custom(title) if title.is_empty() => "직접 입력 (내용 없음)".to_string(),
            TitleOption::Custom(title) => title.clone(),
        };
        let indicators = if self.indicators.is_empty() {
            "없음".to_string()
        } else {
            format!("{}개 선택됨", self.indicators.len())
        };

        DraftSummary {
            company,
            quarter: self.quarter.clone(),
            title,
            sections: self.sections.iter().filter(|s| s.checked).count(),
            indicators,
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.company.trim().is_empty() {
            return Err("기업명을 입력해주세요.");
        }
        if !self.sections.iter().any(|s| s.checked) {
            return Err("목차를 하나 이상 선택해주세요.");
        }
        Ok(())
    }

    pub fn into_request(self, user_id: &str) -> NewReport {
        let indicator = if self.indicators.is_empty() {
            "none".to_string()
        } else {
            self.indicators.join(",")
        };
        NewReport {
            userid: user_id.to_string(),
            title: self.title(),
            chapter: self.chapter_text(),
            content: "none".to_string(),
            indicator,
            evaluation: EVALUATION_RUBRIC.trim_end().to_string(),
            company: self.company,
            date: self.quarter,
        }
    }
}

fn default_sections(quarter: &str) -> Vec<DraftSection> {
    vec![
        DraftSection::new(
            1,
            "보고서 요약".into(),
            &["실적 주요 특징", "향후 전망 핵심"],
        ),
        DraftSection::new(
            2,
            format!("{quarter} 실적 분석"),
            &["주요 재무 결과", "실적 요인 분석"],
        ),
        DraftSection::new(
            3,
            "주요 사업 및 제품 동향".into(),
            &["제품 관련 소식", "R&D 및 파이프라인", "주요 사업", "기타 사업"],
        ),
        DraftSection::new(
            4,
            "시장 환경 및 전략 방향".into(),
            &["주요 시장 활동", "회사의 공식 전략"],
        ),
        DraftSection::new(
            5,
            "향후 전망 (공식 발표 기반)".into(),
            &["회사의 공식 입장/계획", "미래 성과 영향 요인"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outline::parse_outline;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn chapter_text_follows_checked_state() {
        let mut draft = ReportDraft::default();
        draft.set_section("section3", false);
        draft.sections[0].subsections[1].checked = false;
        let text = draft.chapter_text();
        assert!(text.starts_with("1. 보고서 요약\n 1.1 실적 주요 특징\n\n2. 2024년 4분기 실적 분석"));
        assert!(!text.contains("3. 주요 사업"));
        assert!(!text.contains("1.2"));
        assert!(text.ends_with(" 5.2 미래 성과 영향 요인"));
    }

    #[test]
    fn generated_outline_parses_into_unique_tree() {
        let draft = ReportDraft::default();
        let tree = parse_outline(&draft.chapter_text());
        assert_eq!(tree.len(), 5);
        assert_eq!(tree[1].children[1].id, "section2-2");
        assert_eq!(tree[2].children.len(), 4);
    }

    #[test]
    fn clearing_a_section_clears_its_subsections() {
        let mut draft = ReportDraft::default();
        draft.set_section("section2", false);
        assert!(draft.sections[1].subsections.iter().all(|s| !s.checked));
        draft.select_all(true);
        assert!(draft
            .sections
            .iter()
            .all(|s| s.checked && s.subsections.iter().all(|sub| sub.checked)));
        assert_eq!(draft.summary().sections, 5);
    }

    #[test]
    fn form_fields_rebuild_state() {
        let draft = ReportDraft::from_form(&fields(&[
            ("company", " 삼성전자 "),
            ("quarter", "2025년 1분기"),
            ("title_option", "custom"),
            ("title", "반도체 점검"),
            ("section1", "on"),
            ("section1_2", "on"),
            ("section2_1", "on"),
            ("indicator", "PER"),
            ("indicator", "ROE"),
        ]));

        assert_eq!(draft.company, "삼성전자");
        assert_eq!(draft.title(), "반도체 점검");
        assert_eq!(draft.chapter_text(), "1. 보고서 요약\n 1.2 향후 전망 핵심");
        assert_eq!(draft.indicators, vec!["PER", "ROE"]);
        assert_eq!(draft.summary().indicators, "2개 선택됨");
    }

    #[test]
    fn default_title_and_preview() {
        let mut draft = ReportDraft::default();
        assert_eq!(draft.title_preview(), "2024년 4분기 - 기업명");
        draft.company = "LG화학".into();
        assert_eq!(draft.title(), "LG화학 2024년 4분기 실적 분석 보고서");
        draft.title_option = TitleOption::Custom(String::new());
        assert_eq!(draft.title(), "LG화학 2024년 4분기 실적 분석 보고서");
        assert_eq!(draft.summary().title, "직접 입력 (내용 없음)");
    }

    #[test]
    fn validation_and_request_payload() {
        let mut draft = ReportDraft::default();
        assert!(draft.validate().is_err());
        draft.company = "NAVER".into();
        assert!(draft.validate().is_ok());

        let request = draft.into_request("alice");
        assert_eq!(request.userid, "alice");
        assert_eq!(request.indicator, "none");
        assert_eq!(request.content, "none");
        assert_eq!(request.date, DEFAULT_QUARTER);
        assert!(request.evaluation.starts_with("- 핵심 내용 반영도"));
    }

    #[test]
    fn toggling_indicator_twice_removes_it() {
        let mut draft = ReportDraft::default();
        draft.toggle_indicator("PBR");
        draft.toggle_indicator("PBR");
        assert!(draft.indicators.is_empty());
        assert_eq!(draft.summary().indicators, "없음");
    }
}
