use std::collections::BTreeMap;
use std::path::Path;

use reqwest::blocking::{multipart, Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::highlight::GlossaryEntry;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid backend url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("backend answered {status} for {path}: {body}")]
    Status {
        path: String,
        status: StatusCode,
        body: String,
    },
    #[error("unexpected response body from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl BackendError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            BackendError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReportDetail {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub chapter: String,
    #[serde(default)]
    pub indicator: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportSummary {
    pub reportid: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewsItem {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub press: Option<String>,
    #[serde(default)]
    pub summary: String,
}

/// Stock figures are passed through as the backend formats them.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct StockSnapshot {
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl StockSnapshot {
    pub fn get(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) if s.trim().is_empty() => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatEntry {
    pub chatid: i64,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatAnswer {
    pub answer: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SttAnswer {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
}

pub const DEFAULT_AUDIO_NAME: &str = "voice_question.webm";

/// An uploaded audio question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl AudioClip {
    pub fn new(file_name: impl Into<String>, content_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type,
            bytes,
        }
    }

    fn into_part(self) -> BackendResult<multipart::Part> {
        let part = multipart::Part::bytes(self.bytes).file_name(self.file_name);
        match self.content_type {
            Some(mime) => part.mime_str(&mime).map_err(|source| BackendError::Transport {
                path: "chat/stt".into(),
                source,
            }),
            None => Ok(part),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub userid: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NewReport {
    pub userid: String,
    pub company: String,
    pub date: String,
    pub title: String,
    pub chapter: String,
    pub content: String,
    pub indicator: String,
    pub evaluation: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    reportid: i64,
    question: &'a str,
}

#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    base: Url,
}

impl BackendClient {
    pub fn new(base_url: &str) -> BackendResult<Self> {
        let invalid = |reason: String| BackendError::InvalidUrl {
            url: base_url.to_string(),
            reason,
        };

        let mut base = Url::parse(base_url).map_err(|err| invalid(err.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(invalid("not a base url".into()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("myanalyst-web"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|source| BackendError::Transport {
                path: base.path().to_string(),
                source,
            })?;

        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn report(&self, report_id: i64) -> BackendResult<ReportDetail> {
        let id = report_id.to_string();
        self.get_json(&["reports", &id])
    }

    pub fn reports_for_user(&self, user_id: &str) -> BackendResult<Vec<ReportSummary>> {
        self.get_json(&["reports", "user", user_id])
    }

    pub fn dictionary(&self, report_id: i64) -> BackendResult<Vec<GlossaryEntry>> {
        let id = report_id.to_string();
        self.get_json(&["reports", &id, "dictionary"])
    }

    pub fn chat_history(&self, report_id: i64) -> BackendResult<Vec<ChatEntry>> {
        let id = report_id.to_string();
        self.get_json(&["reports", &id, "chat"])
    }

    pub fn news(&self, company: &str) -> BackendResult<Vec<NewsItem>> {
        self.get_json(&["news", company])
    }

    pub fn stock(&self, company: &str) -> BackendResult<StockSnapshot> {
        self.get_json(&["stocks", company])
    }

    /// Chart image bytes together with the content type the backend sent.
    pub fn stock_chart(&self, company: &str) -> BackendResult<(Vec<u8>, String)> {
        let segments = ["stocks", company, "chart-image"];
        let (path, response) = self.send(&segments, |client, url| client.get(url))?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let bytes = response
            .bytes()
            .map_err(|source| BackendError::Decode { path, source })?;
        Ok((bytes.to_vec(), content_type))
    }

    pub fn chat(&self, report_id: i64, question: &str) -> BackendResult<ChatAnswer> {
        let body = ChatRequest {
            reportid: report_id,
            question,
        };
        let (path, response) = self.send(&["chat"], |client, url| client.post(url).json(&body))?;
        decode(path, response)
    }

    pub fn chat_with_audio(&self, report_id: i64, audio: &Path) -> BackendResult<SttAnswer> {
        let bytes = std::fs::read(audio).map_err(|source| BackendError::Io {
            path: audio.display().to_string(),
            source,
        })?;
        let file_name = audio
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_AUDIO_NAME.to_string());
        self.chat_with_audio_bytes(report_id, AudioClip::new(file_name, None, bytes))
    }

    /// Sends a recorded question to the speech-to-text chat endpoint.
    pub fn chat_with_audio_bytes(&self, report_id: i64, clip: AudioClip) -> BackendResult<SttAnswer> {
        let form = multipart::Form::new()
            .text("reportid", report_id.to_string())
            .part("audio_file", clip.into_part()?);
        let (path, response) =
            self.send(&["chat", "stt"], move |client, url| client.post(url).multipart(form))?;
        decode(path, response)
    }

    pub fn create_report(&self, report: &NewReport) -> BackendResult<()> {
        self.send(&["reports"], |client, url| client.post(url).json(report))
            .map(|_| ())
    }

    pub fn delete_report(&self, report_id: i64) -> BackendResult<()> {
        let id = report_id.to_string();
        self.send(&["reports", &id], |client, url| client.delete(url))
            .map(|_| ())
    }

    pub fn login(&self, credentials: &Credentials) -> BackendResult<()> {
        self.send(&["sessions"], |client, url| client.post(url).json(credentials))
            .map(|_| ())
    }

    pub fn register(&self, credentials: &Credentials) -> BackendResult<()> {
        self.send(&["users"], |client, url| client.post(url).json(credentials))
            .map(|_| ())
    }

    fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> BackendResult<T> {
        let (path, response) = self.send(segments, |client, url| client.get(url))?;
        decode(path, response)
    }

    fn send<F>(&self, segments: &[&str], build: F) -> BackendResult<(String, Response)>
    where
        F: FnOnce(&Client, Url) -> RequestBuilder,
    {
        let url = self.endpoint(segments);
        let path = url.path().to_string();
        let response = build(&self.client, url)
            .send()
            .map_err(|source| BackendError::Transport {
                path: path.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(BackendError::Status { path, status, body });
        }
        Ok((path, response))
    }

    /// Joins `segments` onto the base url, escaping each one.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

fn decode<T: DeserializeOwned>(path: String, response: Response) -> BackendResult<T> {
    response
        .json::<T>()
        .map_err(|source| BackendError::Decode { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_path_segments() {
        let client = BackendClient::new("http://localhost:8080").expect("valid url");
        let url = client.endpoint(&["news", "삼성 전자/우"]);
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/news/%EC%82%BC%EC%84%B1%20%EC%A0%84%EC%9E%90%2F%EC%9A%B0"
        );
    }

    #[test]
    fn keeps_base_path_prefix() {
        let client = BackendClient::new("https://api.example.com/v1").expect("valid url");
        let url = client.endpoint(&["reports", "7", "dictionary"]);
        assert_eq!(url.as_str(), "https://api.example.com/v1/reports/7/dictionary");
    }

    #[test]
    fn rejects_unusable_base_urls() {
        assert!(matches!(
            BackendClient::new("not a url"),
            Err(BackendError::InvalidUrl { .. })
        ));
        assert!(BackendClient::new("mailto:someone@example.com").is_err());
    }

    #[test]
    fn audio_upload_of_missing_file_is_an_io_error() {
        let client = BackendClient::new("http://127.0.0.1:9").expect("valid url");
        let missing = std::env::temp_dir().join("myanalyst-no-such-clip.webm");
        assert!(matches!(
            client.chat_with_audio(1, &missing),
            Err(BackendError::Io { .. })
        ));
    }

    #[test]
    fn decodes_report_detail_with_missing_fields() {
        let detail: ReportDetail =
            serde_json::from_str(r#"{"title":"T","content":"1. A","chapter":"1. A"}"#)
                .expect("detail parses");
        assert_eq!(detail.title, "T");
        assert!(detail.company.is_none());
        assert!(detail.date.is_none());
    }

    #[test]
    fn stock_snapshot_reads_string_and_numeric_fields() {
        let snapshot: StockSnapshot = serde_json::from_str(
            r#"{"current_price":"71,200","volume":12345,"per_info":"","market_cap":null}"#,
        )
        .expect("snapshot parses");
        assert_eq!(snapshot.get("current_price").as_deref(), Some("71,200"));
        assert_eq!(snapshot.get("volume").as_deref(), Some("12345"));
        assert_eq!(snapshot.get("per_info"), None);
        assert_eq!(snapshot.get("market_cap"), None);
        assert_eq!(snapshot.get("missing"), None);
    }
}
