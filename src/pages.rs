use std::collections::HashSet;

use maud::{html, Markup, PreEscaped};
use myanalyst::backend::{ChatEntry, NewsItem, ReportSummary, StockSnapshot};
use myanalyst::draft::{ReportDraft, TitleOption, COMMON_INDICATORS, QUARTERS};
use myanalyst::highlight::GlossaryEntry;
use myanalyst::outline::HeadingNode;
use myanalyst::report::ReportPage;
use myanalyst::session::Session;
use myanalyst::view::{ReportView, SidebarTab};

const STOCK_ROWS: [(&str, &str); 14] = [
    ("현재가", "current_price"),
    ("전일대비", "price_change"),
    ("등락률", "change_rate"),
    ("시가", "open_price"),
    ("고가", "high_price"),
    ("저가", "low_price"),
    ("거래량", "volume"),
    ("시가총액", "market_cap"),
    ("외국인 소진율", "foreign_ownership_ratio"),
    ("52주 최고", "fifty_two_week_high"),
    ("52주 최저", "fifty_two_week_low"),
    ("PER", "per_info"),
    ("PBR", "pbr_info"),
    ("배당수익률", "dividend_yield_info"),
];

pub struct LayoutAssets<'a> {
    pub css: &'a str,
    pub favicon_href: &'a str,
}

/// Sidebar data of one report. `None` marks a panel whose data could not be
/// loaded; the rest of the page still renders.
#[derive(Debug, Default)]
pub struct Sidebar {
    pub glossary: Option<Vec<GlossaryEntry>>,
    pub news: Option<Vec<NewsItem>>,
    pub stock: Option<StockSnapshot>,
    pub chart_url: Option<String>,
    pub chat: Option<Vec<ChatEntry>>,
}

pub struct ReportContext<'a> {
    pub page: &'a ReportPage,
    pub view: &'a ReportView,
    pub sidebar: &'a Sidebar,
    pub narrow_viewport: u32,
    pub glossary_js: &'a str,
    /// Static exports have no server behind them, so forms are left out.
    pub interactive: bool,
}

pub fn base_layout(
    site_name: &str,
    title: &str,
    session: &Session,
    assets: LayoutAssets,
    content: Markup,
) -> Markup {
    let LayoutAssets { css, favicon_href } = assets;
    html! {
        (PreEscaped("<!doctype html>"))
        html lang="ko" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                link rel="icon" type="image/svg+xml" href=(favicon_href);
                title { (title) }
                style { (PreEscaped(css)) }
            }
            body {
                header class="site-header" {
                    div class="container" {
                        a href="/" class="brand" {
                            img class="brand-mark" src=(favicon_href) alt="" role="presentation";
                            span class="brand-name" { (site_name) }
                        }
                        nav class="site-nav" {
                            @match session {
                                Session::User(user) => {
                                    a href="/reports/new" { "보고서 생성" }
                                    a href="/" { "내 보고서" }
                                    span { (user) }
                                    a href="/logout" { "로그아웃" }
                                }
                                Session::Anonymous => {
                                    a href="/login" { "로그인" }
                                    a href="/signup" { "회원가입" }
                                }
                            }
                        }
                    }
                }
                (content)
                footer class="site-footer" {
                    div class="container" { span { "Powered by " (site_name) } }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Login,
    Signup,
}

pub fn render_auth(mode: AuthMode, userid: &str, error: Option<&str>, notice: Option<&str>) -> Markup {
    let (heading, action, submit) = match mode {
        AuthMode::Login => ("로그인", "/login", "로그인"),
        AuthMode::Signup => ("회원가입", "/signup", "가입하기"),
    };
    html! {
        main class="container" {
            form class="card auth-form" method="post" action=(action) {
                h1 { (heading) }
                @if let Some(notice) = notice {
                    div class="alert alert-info" { (notice) }
                }
                @if let Some(error) = error {
                    div class="alert alert-danger" role="alert" { (error) }
                }
                label for="userid" { "아이디" }
                input id="userid" name="userid" type="text" value=(userid) required autocomplete="username";
                label for="password" { "비밀번호" }
                input id="password" name="password" type="password" required;
                p { button class="btn" type="submit" { (submit) } }
                @match mode {
                    AuthMode::Login => p { "계정이 없으신가요? " a href="/signup" { "회원가입" } },
                    AuthMode::Signup => p { "이미 계정이 있으신가요? " a href="/login" { "로그인" } },
                }
            }
        }
    }
}

pub fn render_report_list(reports: &[ReportSummary], error: Option<&str>) -> Markup {
    let newest = reports.iter().map(|r| r.reportid).max();
    html! {
        main class="container" {
            h1 { "내 보고서" }
            @if let Some(error) = error {
                div class="alert alert-danger" role="alert" { (error) }
            }
            @if reports.is_empty() && error.is_none() {
                p class="empty-state" {
                    "아직 생성된 보고서가 없습니다. "
                    a href="/reports/new" { "새 보고서 만들기" }
                }
            } @else {
                ul class="report-list" {
                    @for report in reports {
                        li class="card report-item" {
                            a href=(format!("/reports/{}", report.reportid)) {
                                div class="title" {
                                    (report.title)
                                    @if Some(report.reportid) == newest {
                                        span class="badge" { "최근" }
                                    }
                                }
                                @if let Some(date) = &report.date {
                                    div class="date" { (date) }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

pub fn render_report(ctx: &ReportContext) -> Markup {
    let page = ctx.page;
    let sidebar_class = if ctx.view.show_sidebar {
        "report-sidebar show"
    } else {
        "report-sidebar"
    };
    html! {
        main class="container report-container" data-report-root data-narrow-viewport=(ctx.narrow_viewport) {
            div class="main-content" {
                div class="report-tools" {
                    h1 class="report-title" {
                        span id="reportTitle" { (page.title) }
                        span class="report-date" { " - " (page.date) }
                    }
                    a class="btn btn-outline sidebar-toggle" href=(format!("?{}", toggled_sidebar(ctx.view))) { "사이드바" }
                }
                @if !page.headings.is_empty() {
                    (render_toc(&page.headings))
                }
                div id="markdownContent" class="markdown-content" { (PreEscaped(&page.html)) }
                @if ctx.interactive {
                    form method="post" action=(format!("/reports/{}/delete", page.id)) {
                        button class="btn btn-danger" type="submit" { "보고서 삭제" }
                    }
                }
            }
            aside id="reportSidebar" class=(sidebar_class) {
                (render_sidebar_nav(ctx.view))
                (panel(ctx.view, SidebarTab::Glossary, render_glossary(ctx)))
                (panel(ctx.view, SidebarTab::News, render_news(ctx.sidebar.news.as_deref())))
                (panel(ctx.view, SidebarTab::Stock, render_stock(ctx.sidebar)))
                (panel(ctx.view, SidebarTab::Chat, render_chat(ctx)))
            }
        }
        script { (PreEscaped(ctx.glossary_js)) }
    }
}

fn toggled_sidebar(view: &ReportView) -> String {
    let mut next = view.clone();
    next.show_sidebar = !next.show_sidebar;
    next.to_query()
}

fn render_toc(headings: &[HeadingNode]) -> Markup {
    html! {
        nav class="card report-toc" aria-label="목차" {
            ol {
                @for heading in headings {
                    li {
                        a href=(format!("#{}", heading.id)) { (heading.text) }
                        @if !heading.children.is_empty() {
                            ol {
                                @for child in &heading.children {
                                    li { a href=(format!("#{}", child.id)) { (child.text) } }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

fn render_sidebar_nav(view: &ReportView) -> Markup {
    html! {
        nav class="sidebar-nav" {
            @for tab in SidebarTab::ALL {
                @let class = if view.tab == tab { "active" } else { "" };
                a class=(class) data-tab=(tab.as_str()) href=(format!("?{}", view.query_for_tab(tab))) {
                    (tab.label())
                }
            }
        }
    }
}

fn panel(view: &ReportView, tab: SidebarTab, body: Markup) -> Markup {
    let class = if view.tab == tab {
        "sidebar-panel active"
    } else {
        "sidebar-panel"
    };
    html! {
        section class=(class) data-panel=(tab.as_str()) { (body) }
    }
}

fn glossary_anchor(term: &str) -> String {
    let slug: Vec<&str> = term.split_whitespace().collect();
    format!("dict-term-{}", slug.join("-"))
}

/// Entries paired with their element id; a term whose id is already taken
/// is shown once.
fn unique_entries(entries: &[GlossaryEntry]) -> Vec<(&GlossaryEntry, String)> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .filter_map(|entry| {
            let anchor = glossary_anchor(&entry.term);
            seen.insert(anchor.clone()).then_some((entry, anchor))
        })
        .collect()
}

fn render_glossary(ctx: &ReportContext) -> Markup {
    let entries = ctx.sidebar.glossary.as_deref().map(unique_entries);
    html! {
        h2 { "용어사전" }
        @match entries.as_deref() {
            None => p class="empty-state" { "용어 사전을 불러오지 못했습니다." },
            Some([]) => p class="empty-state" { "이 보고서에 등록된 용어가 없습니다." },
            Some(entries) => {
                @for (entry, anchor) in entries {
                    @let expanded = ctx.view.is_expanded(&entry.term);
                    div class=(if expanded { "dictionary-item expanded" } else { "dictionary-item" })
                        id=(anchor)
                        data-term=(entry.term)
                    {
                        a class="dictionary-term"
                            href=(format!("?{}#{}", ctx.view.query_with_toggled(&entry.term), anchor))
                        {
                            span class="term-text" data-term=(entry.term) { (entry.term) }
                            span class="term-icon" aria-hidden="true" {}
                        }
                        p class="term-explanation" { (entry.explanation) }
                    }
                }
            }
        }
    }
}

fn render_news(news: Option<&[NewsItem]>) -> Markup {
    html! {
        h2 { "관련 뉴스" }
        @match news {
            None => p class="empty-state" { "뉴스를 불러오지 못했습니다." },
            Some([]) => p class="empty-state" { "관련 뉴스가 없습니다." },
            Some(items) => {
                @for item in items {
                    div class="news-item" {
                        a href=(item.link) target="_blank" rel="noopener noreferrer" {
                            (item.title)
                        }
                        @if let Some(press) = &item.press {
                            span class="news-press" { " - " (press) }
                        }
                        p class="news-summary" { (item.summary) }
                    }
                }
            }
        }
    }
}

fn render_stock(sidebar: &Sidebar) -> Markup {
    html! {
        h2 { "주가 정보" }
        @match &sidebar.stock {
            None => p class="empty-state" { "주식 정보를 불러오지 못했습니다." },
            Some(stock) => {
                @if let Some(name) = stock.get("company_name") {
                    h3 {
                        (name)
                        @if let Some(code) = stock.get("stock_code") {
                            " (" (code) ")"
                        }
                    }
                }
                table class="stock-table" {
                    tbody {
                        @for (label, key) in STOCK_ROWS {
                            @if let Some(value) = stock.get(key) {
                                tr { th { (label) } td { (value) } }
                            }
                        }
                    }
                }
                @if let Some(url) = &sidebar.chart_url {
                    img class="stock-chart" src=(url) alt="주가 차트" loading="lazy";
                }
                @if let Some(info) = stock.get("data_timestamp_info") {
                    p class="empty-state" { (info) }
                }
            }
        }
    }
}

fn render_chat(ctx: &ReportContext) -> Markup {
    html! {
        h2 id="chat" { "AI 챗봇" }
        @match ctx.sidebar.chat.as_deref() {
            None => p class="empty-state" { "대화 기록을 불러오지 못했습니다." },
            Some([]) => p class="empty-state" { "보고서에 대해 궁금한 점을 물어보세요." },
            Some(entries) => {
                @for entry in entries {
                    div class="chat-message user" id=(format!("user-{}", entry.chatid)) { (entry.question) }
                    div class="chat-message bot" id=(format!("bot-{}", entry.chatid)) { (entry.answer) }
                }
            }
        }
        @if ctx.interactive {
            form class="chat-form" method="post" action=(format!("/reports/{}/chat", ctx.page.id)) {
                input name="question" type="text" placeholder="질문을 입력하세요" required;
                button class="btn" type="submit" { "전송" }
            }
            form class="chat-form" method="post" enctype="multipart/form-data"
                action=(format!("/reports/{}/chat/stt", ctx.page.id))
            {
                input name="audio_file" type="file" accept="audio/*" required;
                button class="btn btn-outline" type="submit" { "음성 질문" }
            }
        }
    }
}

pub fn render_new_report(draft: &ReportDraft, error: Option<&str>) -> Markup {
    let summary = draft.summary();
    let custom_title = match &draft.title_option {
        TitleOption::Custom(title) => Some(title.as_str()),
        TitleOption::DateCompany => None,
    };
    html! {
        main class="container" {
            h1 { "기업 분석 보고서 생성" }
            @if let Some(error) = error {
                div class="alert alert-danger" role="alert" { (error) }
            }
            form class="card draft-form" method="post" action="/reports/new" {
                fieldset {
                    legend { "1. 기업 정보" }
                    label for="company" { "기업명" }
                    input id="company" name="company" type="text" value=(draft.company);
                    label for="quarter" { "분기" }
                    select id="quarter" name="quarter" {
                        @for quarter in QUARTERS {
                            option value=(quarter) selected[quarter == draft.quarter] { (quarter) }
                        }
                    }
                }
                fieldset {
                    legend { "2. 보고서 제목" }
                    label {
                        input type="radio" name="title_option" value="date-company" checked[custom_title.is_none()];
                        " 날짜-기업명 형식"
                    }
                    label {
                        input type="radio" name="title_option" value="custom" checked[custom_title.is_some()];
                        " 직접 입력"
                    }
                    input name="title" type="text" value=(custom_title.unwrap_or_default()) placeholder="보고서 제목";
                    p class="empty-state" { "미리보기: " (draft.title_preview()) }
                }
                fieldset {
                    legend { "3. 목차 구성" }
                    p {
                        button class="btn btn-outline" type="submit" name="action" value="select_all" { "전체 선택" }
                        " "
                        button class="btn btn-outline" type="submit" name="action" value="clear_all" { "전체 해제" }
                    }
                    @for section in &draft.sections {
                        div {
                            label {
                                input type="checkbox" name=(section.key) checked[section.checked];
                                " " (section.number) ". " (section.title)
                            }
                            div class="subsections" {
                                @for sub in &section.subsections {
                                    label {
                                        input type="checkbox" name=(sub.key) checked[sub.checked];
                                        " " (sub.number) " " (sub.title)
                                    }
                                    br;
                                }
                            }
                        }
                    }
                }
                fieldset {
                    legend { "4. 경제 지표" }
                    @for indicator in COMMON_INDICATORS {
                        label {
                            input type="checkbox" name="indicator" value=(indicator)
                                checked[draft.indicators.iter().any(|i| i == indicator)];
                            " " (indicator)
                        }
                        " "
                    }
                }
                fieldset {
                    legend { "5. 요약" }
                    dl class="draft-summary" {
                        dt { "기업명" } dd { (summary.company) }
                        dt { "분기" } dd { (summary.quarter) }
                        dt { "제목" } dd { (summary.title) }
                        dt { "목차" } dd { (summary.sections) "개 섹션" }
                        dt { "지표" } dd { (summary.indicators) }
                    }
                    button class="btn btn-outline" type="submit" name="action" value="preview" { "요약 새로고침" }
                    " "
                    button class="btn" type="submit" name="action" value="create" { "보고서 생성" }
                }
            }
        }
    }
}

pub fn render_error(heading: &str, message: &str) -> Markup {
    html! {
        main class="container" {
            div class="alert alert-danger" role="alert" {
                h2 { (heading) }
                p { (message) }
                p { a class="btn btn-outline" href="/" { "보고서 목록으로 돌아가기" } }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use myanalyst::backend::ReportDetail;

    fn page() -> ReportPage {
        let detail = ReportDetail {
            title: "Demo".into(),
            content: "1. Summary\n\nPER is low.".into(),
            chapter: "1. Summary".into(),
            ..ReportDetail::default()
        };
        let glossary = vec![GlossaryEntry::new("PER", "price/earnings")];
        let today = NaiveDate::from_ymd_opt(2025, 1, 2).expect("valid date");
        ReportPage::build(3, detail, &glossary, today)
    }

    #[test]
    fn report_page_reflects_view_state() {
        let page = page();
        let mut view = ReportView::default();
        view.toggle_term("PER");
        let sidebar = Sidebar {
            glossary: Some(vec![GlossaryEntry::new("PER", "price/earnings")]),
            ..Sidebar::default()
        };
        let html = render_report(&ReportContext {
            page: &page,
            view: &view,
            sidebar: &sidebar,
            narrow_viewport: 992,
            glossary_js: "",
            interactive: true,
        })
        .into_string();

        assert!(html.contains("class=\"dictionary-item expanded\" id=\"dict-term-PER\""));
        assert!(html.contains("href=\"?tab=glossary#dict-term-PER\""));
        assert!(html.contains("data-term=\"PER\">PER</span>"));
        assert!(html.contains("href=\"#section1\""));
        assert!(html.contains("뉴스를 불러오지 못했습니다."));
        assert!(html.contains("action=\"/reports/3/chat\""));
        assert!(html.contains("action=\"/reports/3/chat/stt\""));
        assert!(html.contains("name=\"audio_file\""));
    }

    #[test]
    fn static_export_leaves_out_forms() {
        let page = page();
        let html = render_report(&ReportContext {
            page: &page,
            view: &ReportView::default(),
            sidebar: &Sidebar::default(),
            narrow_viewport: 992,
            glossary_js: "",
            interactive: false,
        })
        .into_string();
        assert!(!html.contains("<form"));
    }

    #[test]
    fn duplicate_glossary_terms_get_one_element() {
        let page = page();
        let sidebar = Sidebar {
            glossary: Some(vec![
                GlossaryEntry::new("PER", "first"),
                GlossaryEntry::new("PER", "second"),
                GlossaryEntry::new("영업 이익", "spaced"),
                GlossaryEntry::new("영업  이익", "double spaced"),
            ]),
            ..Sidebar::default()
        };
        let html = render_report(&ReportContext {
            page: &page,
            view: &ReportView::default(),
            sidebar: &sidebar,
            narrow_viewport: 992,
            glossary_js: "",
            interactive: false,
        })
        .into_string();

        assert_eq!(html.matches("id=\"dict-term-PER\"").count(), 1);
        assert_eq!(html.matches("id=\"dict-term-영업-이익\"").count(), 1);
        assert!(html.contains("first"));
        assert!(!html.contains("second"));
    }

    #[test]
    fn glossary_anchor_joins_words() {
        assert_eq!(glossary_anchor("EV / EBITDA  비율"), "dict-term-EV-/-EBITDA-비율");
    }

    #[test]
    fn report_list_marks_newest() {
        let reports = vec![
            ReportSummary {
                reportid: 4,
                title: "Old".into(),
                company: None,
                date: None,
            },
            ReportSummary {
                reportid: 9,
                title: "New".into(),
                company: None,
                date: Some("2025년 1분기".into()),
            },
        ];
        let html = render_report_list(&reports, None).into_string();
        assert_eq!(html.matches("최근").count(), 1);
        assert!(html.contains("New<span class=\"badge\">최근</span>"));
    }
}
