use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, ScopedJoinHandle};

mod config;
mod pages;

use actix_files::Files;
use actix_multipart::{Multipart, MultipartError};
use actix_web::http::{header, StatusCode};
use actix_web::{rt::task, web, App, HttpRequest, HttpResponse, HttpServer};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, NaiveDate};
use config::{load_configuration, AppConfig};
use futures_util::TryStreamExt;
use log::{debug, error, info, warn, LevelFilter};
use maud::Markup;
use myanalyst::backend::{
    AudioClip, BackendClient, BackendError, BackendResult, Credentials, ReportDetail,
    DEFAULT_AUDIO_NAME,
};
use myanalyst::draft::ReportDraft;
use myanalyst::highlight::GlossaryEntry;
use myanalyst::report::ReportPage;
use myanalyst::session::{self, Session};
use myanalyst::view::{encode_query_value, parse_pairs, ReportSequencer, ReportView};
use pages::{
    base_layout, render_auth, render_error, render_new_report, render_report, render_report_list,
    AuthMode, LayoutAssets, ReportContext, Sidebar,
};
use serde::Deserialize;
use thiserror::Error;

const EMBEDDED_CSS: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/global.css"));
const EMBEDDED_FAVICON: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/favicon.svg"));
const GLOSSARY_SCRIPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/glossary-panel.js"
));

const MAX_AUDIO_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
enum AssetSource {
    Embedded(&'static str),
    File {
        path: PathBuf,
        fallback: &'static str,
    },
}

impl AssetSource {
    fn pick(dir: Option<&Path>, file_name: &str, embedded: &'static str) -> Self {
        match dir.map(|dir| dir.join(file_name)) {
            Some(path) if path.exists() => AssetSource::File {
                path,
                fallback: embedded,
            },
            _ => AssetSource::Embedded(embedded),
        }
    }

    fn read(&self, label: &str) -> String {
        match self {
            AssetSource::Embedded(contents) => contents.to_string(),
            AssetSource::File { path, fallback } => match fs::read_to_string(path) {
                Ok(contents) => contents,
                Err(err) => {
                    warn!(
                        "failed to read {label} at {}: {err}; falling back to the embedded copy",
                        path.display()
                    );
                    fallback.to_string()
                }
            },
        }
    }
}

/// Stylesheet, favicon and glossary script. Files in the configured assets
/// directory win over the copies compiled into the binary and are re-read on
/// every request.
#[derive(Clone)]
struct Assets {
    css: AssetSource,
    favicon: AssetSource,
    glossary_script: AssetSource,
}

impl Assets {
    fn new(dir: Option<&Path>) -> Self {
        Self {
            css: AssetSource::pick(dir, "global.css", EMBEDDED_CSS),
            favicon: AssetSource::pick(dir, "favicon.svg", EMBEDDED_FAVICON),
            glossary_script: AssetSource::pick(dir, "glossary-panel.js", GLOSSARY_SCRIPT),
        }
    }

    fn css(&self) -> String {
        self.css.read("stylesheet")
    }

    fn favicon(&self) -> String {
        self.favicon.read("favicon")
    }

    fn glossary_script(&self) -> String {
        self.glossary_script.read("glossary script")
    }
}

struct AppState {
    config: AppConfig,
    backend: BackendClient,
    assets: Assets,
    sequencer: ReportSequencer,
}

/// Report plus whatever sidebar data could be fetched alongside it.
struct LoadedReport {
    page: ReportPage,
    sidebar: Sidebar,
}

#[derive(Debug, Error)]
enum PageError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("background worker failed: {0}")]
    Blocking(#[from] actix_web::error::BlockingError),
    #[error("report {0} was superseded by a newer request")]
    Stale(i64),
    #[error(transparent)]
    Upload(#[from] UploadError),
}

#[derive(Debug, Error)]
enum UploadError {
    #[error("malformed upload: {0}")]
    Multipart(#[from] MultipartError),
    #[error("audio file exceeds {} bytes", MAX_AUDIO_BYTES)]
    TooLarge,
}

impl PageError {
    fn status(&self) -> StatusCode {
        match self {
            PageError::Backend(err) => match err.status() {
                Some(StatusCode::NOT_FOUND) => StatusCode::NOT_FOUND,
                _ => StatusCode::BAD_GATEWAY,
            },
            PageError::Blocking(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PageError::Stale(_) => StatusCode::CONFLICT,
            PageError::Upload(UploadError::TooLarge) => StatusCode::PAYLOAD_TOO_LARGE,
            PageError::Upload(UploadError::Multipart(_)) => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug)]
enum CliCommand {
    Serve,
    Render {
        report_id: i64,
        output: PathBuf,
    },
    Preview {
        input_path: PathBuf,
        output: PathBuf,
    },
    Ask {
        report_id: i64,
        question: Question,
    },
}

#[derive(Debug, PartialEq, Eq)]
enum Question {
    Text(String),
    Audio(PathBuf),
}

#[derive(Debug)]
struct CliOptions {
    config_path: Option<PathBuf>,
    verbose: bool,
}

/// Offline input for `preview`: a report as the backend returns it together
/// with its glossary.
#[derive(Debug, Deserialize)]
struct PreviewFile {
    report: ReportDetail,
    #[serde(default)]
    dictionary: Vec<GlossaryEntry>,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let raw_args: Vec<String> = env::args().skip(1).collect();

    let (options, command) = match parse_args(&raw_args) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("{err}");
            print_usage();
            std::process::exit(1);
        }
    };

    let level = if options.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.as_str()))
        .init();

    if let Err(err) = run_command(command, options.config_path).await {
        error!("{err:#}");
        std::process::exit(1);
    }

    Ok(())
}

async fn run_command(command: CliCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_configuration(config_path.as_deref());
    debug!("using backend at {}", config.backend_url);

    match command {
        CliCommand::Serve => run_server(config).await,
        CliCommand::Render { report_id, output } => {
            task::spawn_blocking(move || run_render(&config, report_id, &output))
                .await
                .map_err(|err| anyhow!("render task failed: {err}"))?
        }
        CliCommand::Preview { input_path, output } => run_preview(&config, &input_path, &output),
        CliCommand::Ask {
            report_id,
            question,
        } => task::spawn_blocking(move || run_ask(&config, report_id, question))
            .await
            .map_err(|err| anyhow!("ask task failed: {err}"))?,
    }
}

fn parse_args(args: &[String]) -> Result<(CliOptions, CliCommand)> {
    let mut iter = args.iter().peekable();
    let mut options = CliOptions {
        config_path: None,
        verbose: false,
    };

    while let Some(flag) = iter.peek() {
        match flag.as_str() {
            "-c" | "--config" => {
                iter.next();
                let Some(path) = iter.next() else {
                    bail!("Missing value for --config");
                };
                options.config_path = Some(PathBuf::from(path));
            }
            "-v" | "--verbose" => {
                iter.next();
                options.verbose = true;
            }
            _ => break,
        }
    }

    let remaining: Vec<String> = iter.cloned().collect();
    let command = parse_command(&remaining)?;
    Ok((options, command))
}

fn parse_command(args: &[String]) -> Result<CliCommand> {
    let mut args = args.iter().cloned();
    let Some(command) = args.next() else {
        bail!("Missing command");
    };

    match command.as_str() {
        "serve" => {
            if let Some(extra) = args.next() {
                bail!("Unexpected argument for serve: {extra}");
            }
            Ok(CliCommand::Serve)
        }
        "render" => {
            let (positional, output) = split_output_flag(args)?;
            let [id] = positional.as_slice() else {
                bail!("render expects exactly one report id");
            };
            let report_id = parse_report_id(id)?;
            let output = output.unwrap_or_else(|| PathBuf::from(format!("report-{report_id}.html")));
            Ok(CliCommand::Render { report_id, output })
        }
        "preview" => {
            let (positional, output) = split_output_flag(args)?;
            let [path] = positional.as_slice() else {
                bail!("preview expects exactly one report file");
            };
            let input_path = PathBuf::from(path);
            if !input_path.exists() {
                bail!("Report file not found: {}", input_path.display());
            }
            let output = output.unwrap_or_else(|| input_path.with_extension("html"));
            Ok(CliCommand::Preview { input_path, output })
        }
        "ask" => {
            let id = args
                .next()
                .ok_or_else(|| anyhow!("Missing report id for ask"))?;
            let report_id = parse_report_id(&id)?;
            let rest: Vec<String> = args.collect();
            let question = match rest.as_slice() {
                [flag, path] if flag == "--audio" => Question::Audio(PathBuf::from(path)),
                [flag, ..] if flag == "--audio" => bail!("--audio expects exactly one file"),
                [] => bail!("Missing question for ask"),
                words => Question::Text(words.join(" ")),
            };
            Ok(CliCommand::Ask {
                report_id,
                question,
            })
        }
        _ => bail!("Unknown command: {command}"),
    }
}

fn split_output_flag(
    mut args: impl Iterator<Item = String>,
) -> Result<(Vec<String>, Option<PathBuf>)> {
    let mut positional = Vec::new();
    let mut output = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-o" | "--output" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow!("Missing value for --output"))?;
                output = Some(PathBuf::from(path));
            }
            _ => positional.push(arg),
        }
    }
    Ok((positional, output))
}

fn parse_report_id(raw: &str) -> Result<i64> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| anyhow!("Invalid report id: {raw}"))
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  myanalyst [-c <config-file>] [-v] serve");
    eprintln!("  myanalyst [-c <config-file>] [-v] render <report-id> [-o <file.html>]");
    eprintln!("  myanalyst [-c <config-file>] [-v] preview <report.json> [-o <file.html>]");
    eprintln!("  myanalyst [-c <config-file>] [-v] ask <report-id> <question...>");
    eprintln!("  myanalyst [-c <config-file>] [-v] ask <report-id> --audio <file>");
}

async fn run_server(config: AppConfig) -> Result<()> {
    let backend_url = config.backend_url.clone();
    let backend = task::spawn_blocking(move || BackendClient::new(&backend_url))
        .await
        .map_err(|err| anyhow!("backend client setup failed: {err}"))??;

    let bind = (config.bind.clone(), config.port);
    let static_dir = config.assets_dir.clone().filter(|dir| dir.is_dir());
    let state = web::Data::new(AppState {
        assets: Assets::new(config.assets_dir.as_deref()),
        config,
        backend,
        sequencer: ReportSequencer::new(),
    });

    info!(
        "serving {} on http://{}:{} (backend {})",
        state.config.site_name,
        bind.0,
        bind.1,
        state.backend.base_url()
    );
    HttpServer::new(move || {
        let mut app = App::new()
            .app_data(state.clone())
            .route("/", web::get().to(index_page))
            .route("/favicon.svg", web::get().to(favicon))
            .route("/login", web::get().to(login_page))
            .route("/login", web::post().to(login_submit))
            .route("/signup", web::get().to(signup_page))
            .route("/signup", web::post().to(signup_submit))
            .route("/logout", web::get().to(logout))
            .route("/reports/new", web::get().to(new_report_page))
            .route("/reports/new", web::post().to(new_report_submit))
            .route("/reports/{id:\\d+}", web::get().to(report_page))
            .route("/reports/{id:\\d+}/chat", web::post().to(chat_submit))
            .route("/reports/{id:\\d+}/chat/stt", web::post().to(chat_audio_submit))
            .route("/reports/{id:\\d+}/delete", web::post().to(delete_report))
            .route("/stocks/{company}/chart-image", web::get().to(chart_image));

        if let Some(dir) = &static_dir {
            app = app.service(Files::new("/static", dir.clone()).prefer_utf8(true));
        }

        app
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}

fn run_render(config: &AppConfig, report_id: i64, output: &Path) -> Result<()> {
    let backend = BackendClient::new(&config.backend_url)?;
    let loaded = load_report(&backend, report_id, today())
        .with_context(|| format!("Loading report {report_id}"))?;
    let html = render_static(config, &loaded);
    write_html_file(output, html)?;
    info!(
        "report {report_id} written to {} ({} highlighted terms)",
        output.display(),
        loaded.page.highlighted
    );
    Ok(())
}

fn run_preview(config: &AppConfig, input_path: &Path, output: &Path) -> Result<()> {
    let raw = fs::read_to_string(input_path)
        .with_context(|| format!("Reading {}", input_path.display()))?;
    let preview: PreviewFile = serde_json::from_str(&raw)
        .with_context(|| format!("Parsing {}", input_path.display()))?;

    let page = ReportPage::build(0, preview.report, &preview.dictionary, today());
    let loaded = LoadedReport {
        page,
        sidebar: Sidebar {
            glossary: Some(preview.dictionary),
            ..Sidebar::default()
        },
    };
    write_html_file(output, render_static(config, &loaded))?;
    info!(
        "preview of {} written to {}",
        input_path.display(),
        output.display()
    );
    Ok(())
}

fn run_ask(config: &AppConfig, report_id: i64, question: Question) -> Result<()> {
    let backend = BackendClient::new(&config.backend_url)?;
    match question {
        Question::Text(text) => {
            let answer = backend
                .chat(report_id, &text)
                .with_context(|| format!("Asking about report {report_id}"))?;
            println!("{}", answer.answer);
        }
        Question::Audio(path) => {
            let answer = backend
                .chat_with_audio(report_id, &path)
                .with_context(|| format!("Sending {} for report {report_id}", path.display()))?;
            println!("Q: {}", answer.question);
            println!("A: {}", answer.answer);
        }
    }
    Ok(())
}

fn render_static(config: &AppConfig, loaded: &LoadedReport) -> String {
    let assets = Assets::new(config.assets_dir.as_deref());
    let css = assets.css();
    let script = assets.glossary_script();
    let view = ReportView::default();
    let content = render_report(&ReportContext {
        page: &loaded.page,
        view: &view,
        sidebar: &loaded.sidebar,
        narrow_viewport: config.narrow_viewport,
        glossary_js: &script,
        interactive: false,
    });
    let favicon = svg_data_uri(&assets.favicon());
    base_layout(
        &config.site_name,
        &loaded.page.title,
        &Session::Anonymous,
        LayoutAssets {
            css: &css,
            favicon_href: &favicon,
        },
        content,
    )
    .into_string()
}

fn svg_data_uri(svg: &str) -> String {
    format!("data:image/svg+xml,{}", encode_query_value(svg))
}

fn write_html_file(path: &Path, content: String) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Creating directory {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("Writing {}", path.display()))
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Fetches the report, then its sidebar panels in parallel. A failing panel
/// is logged and left empty; only a failing report fails the load.
fn load_report(
    backend: &BackendClient,
    report_id: i64,
    today: NaiveDate,
) -> BackendResult<LoadedReport> {
    let detail = backend.report(report_id)?;
    let company = detail
        .company
        .clone()
        .filter(|company| !company.trim().is_empty());

    let sidebar = thread::scope(|scope| {
        let glossary = scope.spawn(|| backend.dictionary(report_id));
        let chat = scope.spawn(|| backend.chat_history(report_id));
        let market = company.as_deref().map(|company| {
            (
                scope.spawn(move || backend.news(company)),
                scope.spawn(move || backend.stock(company)),
            )
        });

        let (news, stock) = match market {
            Some((news, stock)) => (
                join_panel(report_id, "news", news),
                join_panel(report_id, "stock", stock),
            ),
            None => (None, None),
        };
        let chart_url = company
            .as_deref()
            .filter(|_| stock.is_some())
            .map(|company| format!("/stocks/{}/chart-image", encode_query_value(company)));

        Sidebar {
            glossary: join_panel(report_id, "dictionary", glossary),
            news,
            stock,
            chart_url,
            chat: join_panel(report_id, "chat history", chat),
        }
    });

    let glossary = sidebar.glossary.as_deref().unwrap_or_default();
    let page = ReportPage::build(report_id, detail, glossary, today);
    Ok(LoadedReport { page, sidebar })
}

fn join_panel<T>(
    report_id: i64,
    panel: &str,
    handle: ScopedJoinHandle<'_, BackendResult<T>>,
) -> Option<T> {
    match handle.join() {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            warn!("report {report_id}: {panel} unavailable: {err}");
            None
        }
        Err(_) => {
            warn!("report {report_id}: {panel} loader panicked");
            None
        }
    }
}

fn session_of(req: &HttpRequest) -> Session {
    req.headers()
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .map(Session::from_cookie_header)
        .unwrap_or(Session::Anonymous)
}

fn render_page(state: &AppState, session: &Session, title: &str, content: Markup) -> String {
    let css = state.assets.css();
    base_layout(
        &state.config.site_name,
        title,
        session,
        LayoutAssets {
            css: &css,
            favicon_href: "/favicon.svg",
        },
        content,
    )
    .into_string()
}

fn html_response(status: StatusCode, body: String) -> HttpResponse {
    HttpResponse::build(status)
        .content_type("text/html; charset=utf-8")
        .body(body)
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::SeeOther()
        .append_header((header::LOCATION, location))
        .finish()
}

fn error_page(state: &AppState, session: &Session, err: &PageError) -> HttpResponse {
    let status = err.status();
    let (heading, message) = match status {
        StatusCode::NOT_FOUND => ("보고서를 찾을 수 없습니다", "요청하신 보고서가 존재하지 않습니다."),
        StatusCode::CONFLICT => (
            "요청이 취소되었습니다",
            "더 최근에 요청한 보고서가 표시됩니다.",
        ),
        StatusCode::PAYLOAD_TOO_LARGE => ("파일이 너무 큽니다", "10MB 이하의 음성 파일을 올려주세요."),
        StatusCode::BAD_REQUEST => ("잘못된 요청", "음성 파일을 읽을 수 없습니다."),
        _ => ("오류 발생", "서버와 통신하는 중 문제가 발생했습니다."),
    };
    html_response(
        status,
        render_page(state, session, heading, render_error(heading, message)),
    )
}

async fn favicon(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("image/svg+xml")
        .body(state.assets.favicon())
}

async fn index_page(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let session = session_of(&req);
    let Some(user) = session.user_id().map(str::to_string) else {
        return redirect("/login");
    };

    let backend = state.backend.clone();
    let result = web::block(move || backend.reports_for_user(&user))
        .await
        .map_err(PageError::from)
        .and_then(|loaded| loaded.map_err(PageError::from));

    let content = match result {
        Ok(reports) => render_report_list(&reports, None),
        Err(err) => {
            warn!("report list unavailable: {err}");
            render_report_list(&[], Some("보고서 목록을 불러오는 중 오류가 발생했습니다."))
        }
    };
    html_response(
        StatusCode::OK,
        render_page(&state, &session, "내 보고서", content),
    )
}

#[derive(Debug, Deserialize)]
struct AuthForm {
    userid: String,
    password: String,
}

impl AuthForm {
    fn credentials(&self) -> Credentials {
        Credentials {
            userid: self.userid.trim().to_string(),
            password: self.password.clone(),
        }
    }
}

fn auth_response(
    state: &AppState,
    mode: AuthMode,
    userid: &str,
    error: Option<&str>,
    notice: Option<&str>,
) -> HttpResponse {
    let title = match mode {
        AuthMode::Login => "로그인",
        AuthMode::Signup => "회원가입",
    };
    let status = if error.is_some() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::OK
    };
    html_response(
        status,
        render_page(
            state,
            &Session::Anonymous,
            title,
            render_auth(mode, userid, error, notice),
        ),
    )
}

async fn login_page(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let registered = parse_pairs(req.query_string())
        .iter()
        .any(|(key, value)| key == "registered" && value == "1");
    let notice = registered.then_some("회원가입이 완료되었습니다. 로그인해주세요.");
    auth_response(&state, AuthMode::Login, "", None, notice)
}

async fn login_submit(form: web::Form<AuthForm>, state: web::Data<AppState>) -> HttpResponse {
    let credentials = form.credentials();
    if !session::is_valid_user_id(&credentials.userid) || credentials.password.is_empty() {
        return auth_response(
            &state,
            AuthMode::Login,
            &credentials.userid,
            Some("아이디와 비밀번호를 확인해주세요."),
            None,
        );
    }

    let backend = state.backend.clone();
    let attempt = credentials.clone();
    let result = web::block(move || backend.login(&attempt))
        .await
        .map_err(PageError::from)
        .and_then(|res| res.map_err(PageError::from));

    match result {
        Ok(()) => {
            info!("user {} signed in", credentials.userid);
            HttpResponse::SeeOther()
                .append_header((header::LOCATION, "/"))
                .append_header((header::SET_COOKIE, session::login_cookie(&credentials.userid)))
                .finish()
        }
        Err(PageError::Backend(err)) if err.status() == Some(StatusCode::UNAUTHORIZED) => {
            auth_response(
                &state,
                AuthMode::Login,
                &credentials.userid,
                Some("아이디 또는 비밀번호가 올바르지 않습니다."),
                None,
            )
        }
        Err(err) => {
            warn!("login failed: {err}");
            auth_response(
                &state,
                AuthMode::Login,
                &credentials.userid,
                Some("로그인 중 오류가 발생했습니다."),
                None,
            )
        }
    }
}

async fn signup_page(state: web::Data<AppState>) -> HttpResponse {
    auth_response(&state, AuthMode::Signup, "", None, None)
}

async fn signup_submit(form: web::Form<AuthForm>, state: web::Data<AppState>) -> HttpResponse {
    let credentials = form.credentials();
    if !session::is_valid_user_id(&credentials.userid) {
        return auth_response(
            &state,
            AuthMode::Signup,
            &credentials.userid,
            Some("아이디는 20자 이하의 영문, 숫자와 - _ . @ 만 사용할 수 있습니다."),
            None,
        );
    }
    if credentials.password.is_empty() {
        return auth_response(
            &state,
            AuthMode::Signup,
            &credentials.userid,
            Some("비밀번호를 입력해주세요."),
            None,
        );
    }

    let backend = state.backend.clone();
    let attempt = credentials.clone();
    let result = web::block(move || backend.register(&attempt))
        .await
        .map_err(PageError::from)
        .and_then(|res| res.map_err(PageError::from));

    match result {
        Ok(()) => {
            info!("user {} registered", credentials.userid);
            redirect("/login?registered=1")
        }
        Err(PageError::Backend(err)) if err.status() == Some(StatusCode::CONFLICT) => {
            auth_response(
                &state,
                AuthMode::Signup,
                &credentials.userid,
                Some("이미 존재하는 아이디입니다."),
                None,
            )
        }
        Err(err) => {
            warn!("signup failed: {err}");
            auth_response(
                &state,
                AuthMode::Signup,
                &credentials.userid,
                Some("회원가입 중 오류가 발생했습니다."),
                None,
            )
        }
    }
}

async fn logout() -> HttpResponse {
    HttpResponse::SeeOther()
        .append_header((header::LOCATION, "/login"))
        .append_header((header::SET_COOKIE, session::logout_cookie()))
        .finish()
}

async fn new_report_page(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let session = session_of(&req);
    if !session.is_signed_in() {
        return redirect("/login");
    }
    html_response(
        StatusCode::OK,
        render_page(
            &state,
            &session,
            "보고서 생성",
            render_new_report(&ReportDraft::default(), None),
        ),
    )
}

async fn new_report_submit(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    let session = session_of(&req);
    let Some(user) = session.user_id().map(str::to_string) else {
        return redirect("/login");
    };

    let fields = parse_pairs(&String::from_utf8_lossy(&body));
    let action = fields
        .iter()
        .rev()
        .find(|(key, _)| key == "action")
        .map(|(_, value)| value.clone())
        .unwrap_or_default();
    let mut draft = ReportDraft::from_form(&fields);

    let form_page = |draft: &ReportDraft, status: StatusCode, error: Option<&str>| {
        html_response(
            status,
            render_page(
                &state,
                &session,
                "보고서 생성",
                render_new_report(draft, error),
            ),
        )
    };

    match action.as_str() {
        "select_all" => {
            draft.select_all(true);
            form_page(&draft, StatusCode::OK, None)
        }
        "clear_all" => {
            draft.select_all(false);
            form_page(&draft, StatusCode::OK, None)
        }
        "create" => {
            if let Err(message) = draft.validate() {
                return form_page(&draft, StatusCode::UNPROCESSABLE_ENTITY, Some(message));
            }
            let request = draft.clone().into_request(&user);
            let backend = state.backend.clone();
            let result = web::block(move || backend.create_report(&request))
                .await
                .map_err(PageError::from)
                .and_then(|res| res.map_err(PageError::from));
            match result {
                Ok(()) => {
                    info!("report for {} requested by {user}", draft.company);
                    redirect("/")
                }
                Err(err) => {
                    warn!("report creation failed: {err}");
                    form_page(
                        &draft,
                        StatusCode::BAD_GATEWAY,
                        Some("보고서 생성 중 오류가 발생했습니다."),
                    )
                }
            }
        }
        _ => form_page(&draft, StatusCode::OK, None),
    }
}

async fn report_page(
    req: HttpRequest,
    path: web::Path<i64>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let report_id = path.into_inner();
    let session = session_of(&req);
    let mut view = ReportView::from_query(req.query_string());
    let nav = view
        .nav
        .get_or_insert_with(|| state.sequencer.mint_view_token())
        .clone();
    let ticket = state.sequencer.begin(session.sequence_key(), &nav, report_id);

    let backend = state.backend.clone();
    let today = today();
    let result = web::block(move || load_report(&backend, report_id, today))
        .await
        .map_err(PageError::from)
        .and_then(|loaded| loaded.map_err(PageError::from));
    let current = state.sequencer.finish(&ticket);
    let result = result.and_then(|loaded| {
        if current {
            Ok(loaded)
        } else {
            Err(PageError::Stale(report_id))
        }
    });

    let loaded = match result {
        Ok(loaded) => loaded,
        Err(err) => {
            match &err {
                PageError::Stale(_) => info!("{err}"),
                _ => warn!("failed to load report {report_id}: {err}"),
            }
            return error_page(&state, &session, &err);
        }
    };

    let script = state.assets.glossary_script();
    let content = render_report(&ReportContext {
        page: &loaded.page,
        view: &view,
        sidebar: &loaded.sidebar,
        narrow_viewport: state.config.narrow_viewport,
        glossary_js: &script,
        interactive: true,
    });
    html_response(
        StatusCode::OK,
        render_page(&state, &session, &loaded.page.title, content),
    )
}

#[derive(Debug, Deserialize)]
struct ChatForm {
    question: String,
}

async fn chat_submit(
    req: HttpRequest,
    path: web::Path<i64>,
    form: web::Form<ChatForm>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let report_id = path.into_inner();
    let back = chat_return_url(report_id);
    let question = form.into_inner().question.trim().to_string();
    if question.is_empty() {
        return redirect(&back);
    }

    let backend = state.backend.clone();
    let result = web::block(move || backend.chat(report_id, &question))
        .await
        .map_err(PageError::from)
        .and_then(|res| res.map_err(PageError::from));

    match result {
        Ok(answer) => {
            debug!("report {report_id}: answer of {} bytes", answer.answer.len());
            redirect(&back)
        }
        Err(err) => {
            warn!("chat for report {report_id} failed: {err}");
            error_page(&state, &session_of(&req), &err)
        }
    }
}

fn chat_return_url(report_id: i64) -> String {
    format!("/reports/{report_id}?tab=chat&sidebar=1#chat")
}

/// Reads the `audio_file` field of a multipart form. Other fields are
/// drained and ignored; an empty file counts as no upload.
async fn read_audio_upload(payload: &mut Multipart) -> Result<Option<AudioClip>, UploadError> {
    while let Some(mut field) = payload.try_next().await? {
        let disposition = field.content_disposition();
        if disposition.get_name() != Some("audio_file") {
            while field.try_next().await?.is_some() {}
            continue;
        }

        let file_name = disposition
            .get_filename()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_AUDIO_NAME)
            .to_string();
        let content_type = field.content_type().map(|mime| mime.to_string());
        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            if bytes.len() + chunk.len() > MAX_AUDIO_BYTES {
                return Err(UploadError::TooLarge);
            }
            bytes.extend_from_slice(&chunk);
        }

        if bytes.is_empty() {
            return Ok(None);
        }
        return Ok(Some(AudioClip::new(file_name, content_type, bytes)));
    }
    Ok(None)
}

async fn chat_audio_submit(
    req: HttpRequest,
    path: web::Path<i64>,
    mut payload: Multipart,
    state: web::Data<AppState>,
) -> HttpResponse {
    let report_id = path.into_inner();
    let back = chat_return_url(report_id);
    let clip = match read_audio_upload(&mut payload).await {
        Ok(Some(clip)) => clip,
        Ok(None) => return redirect(&back),
        Err(err) => {
            warn!("audio upload for report {report_id} rejected: {err}");
            return error_page(&state, &session_of(&req), &PageError::from(err));
        }
    };

    let backend = state.backend.clone();
    let result = web::block(move || backend.chat_with_audio_bytes(report_id, clip))
        .await
        .map_err(PageError::from)
        .and_then(|res| res.map_err(PageError::from));

    match result {
        Ok(answer) => {
            debug!("report {report_id}: voice question {:?}", answer.question);
            redirect(&back)
        }
        Err(err) => {
            warn!("voice chat for report {report_id} failed: {err}");
            error_page(&state, &session_of(&req), &err)
        }
    }
}

async fn delete_report(
    req: HttpRequest,
    path: web::Path<i64>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let session = session_of(&req);
    if !session.is_signed_in() {
        return redirect("/login");
    }

    let report_id = path.into_inner();
    let backend = state.backend.clone();
    let result = web::block(move || backend.delete_report(report_id))
        .await
        .map_err(PageError::from)
        .and_then(|res| res.map_err(PageError::from));

    match result {
        Ok(()) => {
            info!("report {report_id} deleted");
            redirect("/")
        }
        Err(err) => {
            warn!("failed to delete report {report_id}: {err}");
            error_page(&state, &session, &err)
        }
    }
}

async fn chart_image(path: web::Path<String>, state: web::Data<AppState>) -> HttpResponse {
    let company = path.into_inner();
    let backend = state.backend.clone();
    let lookup = company.clone();
    let result = web::block(move || backend.stock_chart(&lookup))
        .await
        .map_err(PageError::from)
        .and_then(|res| res.map_err(PageError::from));

    match result {
        Ok((bytes, content_type)) => HttpResponse::Ok().content_type(content_type).body(bytes),
        Err(err) => {
            warn!("chart for {company} unavailable: {err}");
            HttpResponse::build(err.status()).finish()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_global_flags_before_command() {
        let (options, command) =
            parse_args(&args(&["-v", "-c", "conf.toml", "serve"])).expect("args parse");
        assert!(options.verbose);
        assert_eq!(options.config_path, Some(PathBuf::from("conf.toml")));
        assert!(matches!(command, CliCommand::Serve));
    }

    #[test]
    fn render_defaults_output_from_id() {
        let (_, command) = parse_args(&args(&["render", "42"])).expect("args parse");
        match command {
            CliCommand::Render { report_id, output } => {
                assert_eq!(report_id, 42);
                assert_eq!(output, PathBuf::from("report-42.html"));
            }
            other => panic!("unexpected command {other:?}"),
        }

        let (_, command) =
            parse_args(&args(&["render", "-o", "out/r.html", "7"])).expect("args parse");
        assert!(matches!(
            command,
            CliCommand::Render { report_id: 7, ref output } if output == Path::new("out/r.html")
        ));
    }

    #[test]
    fn ask_takes_text_or_audio() {
        let (_, command) =
            parse_args(&args(&["ask", "3", "what", "is", "PER?"])).expect("args parse");
        assert!(matches!(
            command,
            CliCommand::Ask { report_id: 3, question: Question::Text(ref q) } if q == "what is PER?"
        ));

        let (_, command) =
            parse_args(&args(&["ask", "3", "--audio", "q.webm"])).expect("args parse");
        assert!(matches!(
            command,
            CliCommand::Ask { question: Question::Audio(ref p), .. } if p == Path::new("q.webm")
        ));
    }

    #[test]
    fn rejects_bad_invocations() {
        assert!(parse_args(&[]).is_err());
        assert!(parse_args(&args(&["-c"])).is_err());
        assert!(parse_args(&args(&["render", "abc"])).is_err());
        assert!(parse_args(&args(&["render", "0"])).is_err());
        assert!(parse_args(&args(&["ask", "1"])).is_err());
        assert!(parse_args(&args(&["serve", "extra"])).is_err());
        assert!(parse_args(&args(&["publish"])).is_err());
    }

    #[test]
    fn page_errors_map_to_statuses() {
        assert_eq!(PageError::Stale(1).status(), StatusCode::CONFLICT);
        let missing = PageError::Backend(BackendError::Status {
            path: "/reports/9".into(),
            status: StatusCode::NOT_FOUND,
            body: String::new(),
        });
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let failing = PageError::Backend(BackendError::Status {
            path: "/reports/9".into(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: String::new(),
        });
        assert_eq!(failing.status(), StatusCode::BAD_GATEWAY);
    }

    fn multipart_payload(boundary: &'static str, body: String) -> Multipart {
        let mut headers = header::HeaderMap::new();
        let content_type = format!("multipart/form-data; boundary={boundary}");
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_str(&content_type).expect("valid header"),
        );
        let stream = futures_util::stream::iter(vec![Ok::<_, actix_web::error::PayloadError>(
            web::Bytes::from(body),
        )]);
        Multipart::new(&headers, stream)
    }

    #[actix_web::test]
    async fn reads_audio_field_and_skips_the_rest() {
        let body = "--XYZ\r\n\
             Content-Disposition: form-data; name=\"reportid\"\r\n\r\n\
             7\r\n\
             --XYZ\r\n\
             Content-Disposition: form-data; name=\"audio_file\"; filename=\"q.webm\"\r\n\
             Content-Type: audio/webm\r\n\r\n\
             RIFFdata\r\n\
             --XYZ--\r\n"
            .to_string();
        let mut payload = multipart_payload("XYZ", body);

        let clip = read_audio_upload(&mut payload)
            .await
            .expect("upload parses")
            .expect("clip present");
        assert_eq!(clip.file_name, "q.webm");
        assert_eq!(clip.content_type.as_deref(), Some("audio/webm"));
        assert_eq!(clip.bytes, b"RIFFdata".to_vec());
    }

    #[actix_web::test]
    async fn empty_audio_field_is_no_upload() {
        let body = "--XYZ\r\n\
             Content-Disposition: form-data; name=\"audio_file\"; filename=\"\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\
             \r\n\
             --XYZ--\r\n"
            .to_string();
        let mut payload = multipart_payload("XYZ", body);
        assert!(read_audio_upload(&mut payload)
            .await
            .expect("upload parses")
            .is_none());
    }

    #[actix_web::test]
    async fn oversized_audio_is_rejected() {
        let body = format!(
            "--XYZ\r\nContent-Disposition: form-data; name=\"audio_file\"; filename=\"big.webm\"\r\n\r\n{}\r\n--XYZ--\r\n",
            "a".repeat(MAX_AUDIO_BYTES + 1)
        );
        let mut payload = multipart_payload("XYZ", body);
        let err = read_audio_upload(&mut payload)
            .await
            .expect_err("upload is too large");
        assert_eq!(
            PageError::from(err).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn embedded_assets_are_used_without_a_directory() {
        let assets = Assets::new(None);
        assert!(assets.css().contains(".highlighted-term"));
        assert!(assets.glossary_script().contains("data-report-root"));
        assert!(assets.favicon().starts_with("<svg"));
    }

    #[test]
    fn preview_writes_static_page() {
        let dir = env::temp_dir().join(format!("myanalyst-preview-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("create temp dir");
        let input = dir.join("report.json");
        fs::write(
            &input,
            r#"{"report":{"title":"Demo","content":"1. 개요\n\nPER 설명","chapter":"1. 개요"},
                "dictionary":[{"term":"PER","explanation":"주가수익비율"}]}"#,
        )
        .expect("write input");
        let output = dir.join("out/report.html");

        run_preview(&AppConfig::default(), &input, &output).expect("preview succeeds");

        let html = fs::read_to_string(&output).expect("read output");
        assert!(html.contains("<span id=\"section1\">1. 개요</span>"));
        assert!(html.contains("class=\"highlighted-term\" data-term=\"PER\""));
        assert!(html.contains("data:image/svg+xml,"));
        assert!(!html.contains("<form"));
        let _ = fs::remove_dir_all(&dir);
    }
}
