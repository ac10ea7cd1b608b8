use std::collections::hash_map::RandomState;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Sidebar panels of the report view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SidebarTab {
    #[default]
    Glossary,
    News,
    Stock,
    Chat,
}

impl SidebarTab {
    pub const ALL: [SidebarTab; 4] = [
        SidebarTab::Glossary,
        SidebarTab::News,
        SidebarTab::Stock,
        SidebarTab::Chat,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SidebarTab::Glossary => "glossary",
            SidebarTab::News => "news",
            SidebarTab::Stock => "stock",
            SidebarTab::Chat => "chat",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SidebarTab::Glossary => "용어사전",
            SidebarTab::News => "뉴스",
            SidebarTab::Stock => "주가",
            SidebarTab::Chat => "챗봇",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tab| tab.as_str() == raw)
    }
}

impl fmt::Display for SidebarTab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-term expanded flags of the glossary panel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpandedTerms {
    open: BTreeSet<String>,
}

impl ExpandedTerms {
    pub fn is_expanded(&self, term: &str) -> bool {
        self.open.contains(term)
    }

    /// Flips one term and returns its new state.
    pub fn toggle(&mut self, term: &str) -> bool {
        if self.open.remove(term) {
            false
        } else {
            self.open.insert(term.to_string());
            true
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.open.iter().map(String::as_str)
    }
}

/// Everything the report page renders from besides the report itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportView {
    pub tab: SidebarTab,
    pub show_sidebar: bool,
    pub expanded: ExpandedTerms,
    /// Token of the browser view the request came from; carried by every
    /// in-page link so loads from one tab are sequenced together.
    pub nav: Option<String>,
}

impl ReportView {
    /// Reads `tab`, `sidebar`, `open` (repeatable), `nav` and `focus` from a
    /// query string. `focus` applies the same transition as clicking a highlighted
    /// term.
    pub fn from_query(query: &str) -> Self {
        let mut view = ReportView::default();
        let mut focus = None;

        for (key, value) in parse_pairs(query) {
            match key.as_str() {
                "tab" => {
                    if let Some(tab) = SidebarTab::parse(&value) {
                        view.tab = tab;
                    }
                }
                "sidebar" => view.show_sidebar = value == "1",
                "open" if !value.is_empty() => {
                    if !view.expanded.is_expanded(&value) {
                        view.expanded.toggle(&value);
                    }
                }
                "focus" if !value.is_empty() => focus = Some(value),
                "nav" if is_view_token(&value) => view.nav = Some(value),
                _ => {}
            }
        }

        if let Some(term) = focus {
            view.focus_term(&term);
        }
        view
    }

    pub fn select_tab(&mut self, tab: SidebarTab) {
        self.tab = tab;
    }

    pub fn toggle_term(&mut self, term: &str) -> bool {
        self.expanded.toggle(term)
    }

    pub fn is_expanded(&self, term: &str) -> bool {
        self.expanded.is_expanded(term)
    }

    /// Click on a highlighted term: reveal the sidebar, switch to the
    /// glossary and flip that term once.
    pub fn focus_term(&mut self, term: &str) -> bool {
        self.show_sidebar = true;
        self.tab = SidebarTab::Glossary;
        self.toggle_term(term)
    }

    pub fn to_query(&self) -> String {
        let mut pairs = vec![format!("tab={}", self.tab)];
        if self.show_sidebar {
            pairs.push("sidebar=1".into());
        }
        pairs.extend(
            self.expanded
                .iter()
                .map(|term| format!("open={}", encode_query_value(term))),
        );
        if let Some(nav) = &self.nav {
            pairs.push(format!("nav={nav}"));
        }
        pairs.join("&")
    }

    /// Query for the same view with `term` flipped.
    pub fn query_with_toggled(&self, term: &str) -> String {
        let mut next = self.clone();
        next.toggle_term(term);
        next.to_query()
    }

    pub fn query_for_tab(&self, tab: SidebarTab) -> String {
        let mut next = self.clone();
        next.select_tab(tab);
        next.to_query()
    }
}

fn is_view_token(raw: &str) -> bool {
    !raw.is_empty() && raw.len() <= 40 && raw.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Decodes `application/x-www-form-urlencoded` pairs, keeping repeats.
pub fn parse_pairs(query: &str) -> Vec<(String, String)> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_query_value(key), decode_query_value(value))
        })
        .collect()
}

pub fn encode_query_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

pub fn decode_query_value(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        match bytes[idx] {
            b'+' => out.push(b' '),
            b'%' if idx + 2 < bytes.len() => {
                match (hex_value(bytes[idx + 1]), hex_value(bytes[idx + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        idx += 2;
                    }
                    _ => out.push(b'%'),
                }
            }
            other => out.push(other),
        }
        idx += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Ticket for one report load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    key: (String, String),
    seq: u64,
    pub report_id: i64,
}

/// Sequences report loads per (session, view token) so that a slow response
/// for a report the same view already navigated away from is dropped instead
/// of shown. Loads from different views never affect each other.
#[derive(Debug, Default)]
pub struct ReportSequencer {
    next: AtomicU64,
    seed: RandomState,
    latest: Mutex<HashMap<(String, String), u64>>,
}

impl ReportSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh token for a view that did not send one.
    pub fn mint_view_token(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        let mut hasher = self.seed.build_hasher();
        hasher.write_u64(n);
        format!("{:016x}{n:x}", hasher.finish())
    }

    pub fn begin(&self, session: &str, view: &str, report_id: i64) -> LoadTicket {
        let seq = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        let key = (session.to_string(), view.to_string());
        let mut latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        latest.insert(key.clone(), seq);
        LoadTicket {
            key,
            seq,
            report_id,
        }
    }

    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        let latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        latest.get(&ticket.key).copied() == Some(ticket.seq)
    }

    /// Completes a load. Returns whether it is still the newest one for its
    /// view; the newest load also releases the view's entry.
    pub fn finish(&self, ticket: &LoadTicket) -> bool {
        let mut latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        if latest.get(&ticket.key).copied() == Some(ticket.seq) {
            latest.remove(&ticket.key);
            true
        } else {
            false
        }
    }

    /// Number of views with a load in flight.
    pub fn pending(&self) -> usize {
        self.latest.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
