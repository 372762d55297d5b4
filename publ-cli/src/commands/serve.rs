//! Web server: maps request paths onto category and entry views.

use super::site_now;
use crate::cache::load_and_scan;
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, FixedOffset, Utc};
use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use publ_core::config::{AuthConfig, PathRegex};
use publ_core::path_alias::get_redirect;
use publ_core::{
    Category, Config, ContentIndex, Entry, Indexer, PublishStatus, Redirect, Template,
    TemplateCache, User,
};
use publ_render::{render_category, render_entry, render_error, render_login, RenderError, SiteContext};
use regex::Regex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Last path component of an entry URL: `{id}` or `{id}-{slug}`
static ENTRY_COMPONENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)(?:-(.*))?$").unwrap());

pub struct AppState {
    config: Arc<Config>,
    indexer: Arc<Indexer>,
    templates: TemplateCache,
    pages: Mutex<LruCache<PageKey, Page>>,
    /// Index generation the caches were filled against
    generation: AtomicU64,
    rules: Vec<PathRegex>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PageKey {
    path: String,
    query: Option<String>,
    user: Option<User>,
    generation: u64,
}

/// A fully rendered response body
#[derive(Debug, Clone)]
struct Page {
    status: StatusCode,
    content_type: &'static str,
    body: String,
    /// HTTP date for the `Last-Modified` header
    last_modified: Option<String>,
}

impl IntoResponse for Page {
    fn into_response(self) -> Response {
        let mut response =
            (self.status, [(header::CONTENT_TYPE, self.content_type)], self.body).into_response();
        if let Some(value) = self.last_modified.and_then(|v| HeaderValue::from_str(&v).ok()) {
            response.headers_mut().insert(header::LAST_MODIFIED, value);
        }
        response
    }
}

/// What a request resolved to
enum Outcome {
    Page(Page),
    Redirect(Redirect),
    Error(StatusCode),
}

/// The path and query of the request being routed
struct RequestPath<'a> {
    path: &'a str,
    query: Option<&'a str>,
    params: &'a HashMap<String, String>,
}

impl AppState {
    pub fn new(config: Arc<Config>, indexer: Arc<Indexer>) -> Result<Arc<Self>> {
        let rules = config
            .compiled_path_regexes()
            .context("Invalid path regex in configuration")?;
        let capacity =
            NonZeroUsize::new(config.server.page_cache_size).unwrap_or(NonZeroUsize::MIN);

        Ok(Arc::new(Self {
            templates: TemplateCache::new(config.template_dir(), capacity.get()),
            pages: Mutex::new(LruCache::new(capacity)),
            generation: AtomicU64::new(indexer.index().generation()),
            config,
            indexer,
            rules,
        }))
    }

    fn index(&self) -> &ContentIndex {
        self.indexer.index()
    }

    /// Drop cached lookups and pages once the index has moved on
    fn refresh_caches(&self) -> u64 {
        let current = self.index().generation();
        let previous = self.generation.swap(current, Ordering::AcqRel);
        if previous != current {
            tracing::debug!("Index generation {} -> {}; clearing caches", previous, current);
            self.templates.clear();
            self.pages.lock().clear();
        }
        current
    }

    /// Modification time of the newest content file
    fn content_last_modified(&self) -> Option<String> {
        let latest = self.index().last_modified()?;
        DateTime::<Utc>::from_timestamp(latest.file_mtime, 0).map(http_date)
    }

    fn site<'a>(&'a self, user: Option<&'a User>, now: DateTime<FixedOffset>) -> SiteContext<'a> {
        SiteContext {
            config: &self.config,
            index: self.index(),
            user,
            now,
        }
    }

    fn route(
        &self,
        request: &RequestPath<'_>,
        user: Option<&User>,
        now: DateTime<FixedOffset>,
    ) -> Result<Outcome, RenderError> {
        let path = request.path.trim_start_matches('/');
        if path.is_empty() || path.ends_with('/') {
            return self.category_view(request, path.trim_end_matches('/'), "index", user, now);
        }

        let (category, last) = path.rsplit_once('/').unwrap_or(("", path));
        if let Some(captures) = ENTRY_COMPONENT.captures(last) {
            if let Ok(id) = captures[1].parse::<i64>() {
                let slug = captures.get(2).map(|m| m.as_str());
                return self.entry_view(request, category, id, slug, user, now);
            }
        }

        self.category_view(request, category, last, user, now)
    }

    fn category_view(
        &self,
        request: &RequestPath<'_>,
        category: &str,
        template_name: &str,
        user: Option<&User>,
        now: DateTime<FixedOffset>,
    ) -> Result<Outcome, RenderError> {
        if !self.index().category_exists(category) {
            return Ok(self.not_found(request));
        }

        let Some(template) = self.templates.get(category, &[template_name]) else {
            return Ok(self.not_found(request));
        };

        if !template.is_builtin() {
            return Ok(template_file(&template));
        }
        if template.name != "index" {
            return Ok(self.not_found(request));
        }

        let start = request.params.get("start").and_then(|s| s.parse::<i64>().ok());
        let body = render_category(
            &Category::new(category),
            &self.site(user, now),
            template_name,
            start,
        )?;
        Ok(Outcome::Page(html_page(StatusCode::OK, body)))
    }

    fn entry_view(
        &self,
        request: &RequestPath<'_>,
        category: &str,
        id: i64,
        slug: Option<&str>,
        user: Option<&User>,
        now: DateTime<FixedOffset>,
    ) -> Result<Outcome, RenderError> {
        let Some(record) = self.index().entry(id) else {
            tracing::debug!("No entry {}", id);
            return Ok(self.not_found(request));
        };

        match record.status {
            PublishStatus::Gone => return Ok(Outcome::Error(StatusCode::GONE)),
            PublishStatus::Draft => return Ok(Outcome::Error(StatusCode::FORBIDDEN)),
            _ => {}
        }
        if !record.is_reachable(now) {
            return Ok(Outcome::Error(StatusCode::NOT_FOUND));
        }

        if let Some(url) = &record.redirect_url {
            return Ok(Outcome::Redirect(Redirect {
                url: url.clone(),
                permanent: false,
            }));
        }

        if record.category != category || slug != Some(record.slug_text.as_str()) {
            let mut url = record.permalink();
            if let Some(query) = request.query {
                url = format!("{}?{}", url, query);
            }
            return Ok(Outcome::Redirect(Redirect {
                url,
                permanent: true,
            }));
        }

        let Some(template) = self.templates.get(&record.category, &["entry"]) else {
            return Ok(Outcome::Error(StatusCode::NOT_FOUND));
        };
        if !template.is_builtin() {
            return Ok(template_file(&template));
        }

        let entry = Entry::new(record);
        let status = if entry.is_unauthorized(user)? {
            StatusCode::FORBIDDEN
        } else {
            StatusCode::OK
        };
        let body = render_entry(&entry, &self.site(user, now), &template.name)?;
        Ok(Outcome::Page(html_page(status, body)))
    }

    /// Aliases and redirect rules, else a redirect to the category, else 404
    fn not_found(&self, request: &RequestPath<'_>) -> Outcome {
        let full = request.query.map(|q| format!("{}?{}", request.path, q));
        let candidates = full.iter().map(String::as_str).chain([request.path]);
        if let Some(redirect) = get_redirect(self.index(), &self.rules, candidates) {
            return Outcome::Redirect(redirect);
        }

        let path = request.path.trim_matches('/');
        if !path.is_empty() && !request.path.ends_with('/') && self.index().category_exists(path) {
            return Outcome::Redirect(Redirect {
                url: format!("/{}/", path),
                permanent: true,
            });
        }

        Outcome::Error(StatusCode::NOT_FOUND)
    }

    fn error_page(&self, status: StatusCode, now: DateTime<FixedOffset>) -> Response {
        let message = status.canonical_reason().unwrap_or("Error");
        let url_root = format!("{}/", self.config.site_root());
        match render_error(status.as_u16(), message, None, &url_root, now) {
            Ok(body) => html_page(status, body).into_response(),
            Err(err) => {
                tracing::error!("Failed to render error page: {}", err);
                (status, message.to_string()).into_response()
            }
        }
    }
}

fn html_page(status: StatusCode, body: String) -> Page {
    Page {
        status,
        content_type: "text/html; charset=utf-8",
        body,
        last_modified: None,
    }
}

fn http_date(when: DateTime<Utc>) -> String {
    when.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// User templates are served verbatim with the type implied by their extension
fn template_file(template: &Template) -> Outcome {
    let Some(file_path) = &template.file_path else {
        return Outcome::Error(StatusCode::NOT_FOUND);
    };
    match std::fs::read_to_string(file_path) {
        Ok(body) => Outcome::Page(Page {
            status: StatusCode::OK,
            content_type: template.content_type(),
            body,
            last_modified: template.last_modified.map(http_date),
        }),
        Err(err) => {
            tracing::error!("Failed to read template {:?}: {}", file_path, err);
            Outcome::Error(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn redirect_response(redirect: &Redirect) -> Response {
    let status = if redirect.permanent {
        StatusCode::MOVED_PERMANENTLY
    } else {
        StatusCode::FOUND
    };
    (status, [(header::LOCATION, redirect.url.clone())]).into_response()
}

/// The user reported by the fronting proxy, if any
fn current_user(auth: &AuthConfig, headers: &HeaderMap) -> Option<User> {
    let name = headers
        .get(auth.user_header.as_str())?
        .to_str()
        .ok()?
        .trim();
    if name.is_empty() {
        return None;
    }

    let groups = headers
        .get(auth.groups_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|g| !g.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Some(User::new(name, groups))
}

/// Start the server, indexing first and then watching for changes
pub async fn serve(config_path: &Path, port: Option<u16>) -> Result<()> {
    let loaded = tokio::task::spawn_blocking({
        let config_path = config_path.to_path_buf();
        move || load_and_scan(&config_path)
    })
    .await
    .context("Initial scan panicked")??;
    tracing::info!(
        "Indexed {} entries ({} files scanned)",
        loaded.index().entry_count(),
        loaded.scanned
    );

    let config = Arc::clone(&loaded.config);
    let indexer = Arc::clone(&loaded.indexer);

    let _watcher = indexer
        .background_scan()
        .context("Failed to initialize file watcher")?;
    let _rescan = config
        .index_rescan_interval
        .filter(|secs| *secs > 0)
        .map(|secs| indexer.periodic_rescan(Duration::from_secs(secs)));

    let port = port.unwrap_or(config.server.port);
    let app = router(AppState::new(config, indexer)?);

    tracing::info!("Serving at http://localhost:{}", port);
    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

pub fn router(state: Arc<AppState>) -> Router {
    let static_dir = state.config.static_dir();
    Router::new()
        .route("/_login", get(login))
        .route("/", get(serve_page))
        .route("/{*path}", get(serve_page))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let user = current_user(&state.config.auth, &headers);
    let now = match site_now(&state.config) {
        Ok(now) => now,
        Err(err) => {
            tracing::error!("{:#}", err);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let redir = params.get("redir").map(String::as_str).unwrap_or("/");
    match render_login(&state.site(user.as_ref(), now), redir) {
        Ok(body) => html_page(StatusCode::OK, body).into_response(),
        Err(err) => {
            tracing::error!("Failed to render login page: {}", err);
            state.error_page(StatusCode::INTERNAL_SERVER_ERROR, now)
        }
    }
}

async fn serve_page(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let now = match site_now(&state.config) {
        Ok(now) => now,
        Err(err) => {
            tracing::error!("{:#}", err);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let user = current_user(&state.config.auth, &headers);

    let key = PageKey {
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        user: user.clone(),
        generation: state.refresh_caches(),
    };
    if let Some(page) = state.pages.lock().get(&key).cloned() {
        tracing::debug!("Page cache hit for {}", key.path);
        return page.into_response();
    }

    let request = RequestPath {
        path: uri.path(),
        query: uri.query(),
        params: &params,
    };
    match state.route(&request, user.as_ref(), now) {
        Ok(Outcome::Page(mut page)) => {
            if page.last_modified.is_none() {
                page.last_modified = state.content_last_modified();
            }
            if page.status == StatusCode::OK {
                state.pages.lock().put(key, page.clone());
            }
            page.into_response()
        }
        Ok(Outcome::Redirect(redirect)) => redirect_response(&redirect),
        Ok(Outcome::Error(status)) => state.error_page(status, now),
        Err(err) => {
            tracing::error!("Error rendering {}: {}", uri.path(), err);
            state.error_page(StatusCode::INTERNAL_SERVER_ERROR, now)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use publ_core::config::PathRegexConfig;
    use std::fs;
    use tower::ServiceExt;

    struct TestSite {
        dir: tempfile::TempDir,
        app: Router,
    }

    fn site(files: &[(&str, &str)], configure: impl FnOnce(&mut Config)) -> TestSite {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::for_root("Test Site", dir.path());
        configure(&mut config);
        for (rel, text) in files {
            let path = config.content_dir().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, text).unwrap();
        }

        let indexer = Indexer::new(Arc::new(ContentIndex::new()), Arc::new(config.clone()));
        indexer.queue_changed();
        indexer.process_all();

        let state = AppState::new(Arc::new(config), indexer).unwrap();
        TestSite {
            dir,
            app: router(state),
        }
    }

    async fn get_page(app: &Router, uri: &str, headers: &[(&str, &str)]) -> (StatusCode, HeaderMap, String) {
        let mut request = Request::builder().uri(uri);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = app
            .clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn location(headers: &HeaderMap) -> &str {
        headers.get(header::LOCATION).unwrap().to_str().unwrap()
    }

    const FIRST: &str = "Title: First\nEntry-ID: 1\nDate: 2020-01-01\nPath-Alias: /old/first.php\n\nHello world\n";
    const SECOND: &str = "Title: Second\nEntry-ID: 2\nDate: 2020-02-01\n\nAnother one\n";

    #[tokio::test]
    async fn test_entry_and_canonical_redirects() {
        let s = site(&[("blog/first.md", FIRST), ("blog/second.md", SECOND)], |_| {});

        let (status, headers, body) = get_page(&s.app, "/blog/1-First", &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Hello world"));
        let last_modified = headers
            .get(header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(last_modified.ends_with(" GMT"), "{last_modified:?}");
        assert!(body.contains(r#"href="/blog/2-Second""#));

        for uri in ["/blog/1", "/1", "/1-First", "/other/1-Wrong"] {
            let (status, headers, _) = get_page(&s.app, uri, &[]).await;
            assert_eq!(status, StatusCode::MOVED_PERMANENTLY, "{}", uri);
            assert_eq!(location(&headers), "/blog/1-First");
        }
    }

    #[tokio::test]
    async fn test_entry_status_codes() {
        let s = site(
            &[
                ("draft.md", "Title: D\nEntry-ID: 10\nDate: 2020-01-01\nStatus: draft\n\nD\n"),
                ("gone.md", "Title: G\nEntry-ID: 11\nDate: 2020-01-01\nStatus: gone\n\nG\n"),
                ("later.md", "Title: L\nEntry-ID: 12\nDate: 2999-01-01\nStatus: scheduled\n\nL\n"),
                (
                    "moved.md",
                    "Title: M\nEntry-ID: 13\nDate: 2020-01-01\nRedirect-To: https://example.com/m\n\nM\n",
                ),
            ],
            |_| {},
        );

        assert_eq!(get_page(&s.app, "/10-D", &[]).await.0, StatusCode::FORBIDDEN);
        assert_eq!(get_page(&s.app, "/11-G", &[]).await.0, StatusCode::GONE);
        assert_eq!(get_page(&s.app, "/12-L", &[]).await.0, StatusCode::NOT_FOUND);

        let (status, headers, _) = get_page(&s.app, "/13-M", &[]).await;
        assert_eq!(status, StatusCode::FOUND);
        assert_eq!(location(&headers), "https://example.com/m");
    }

    #[tokio::test]
    async fn test_aliases_rules_and_not_found() {
        let s = site(&[("blog/first.md", FIRST)], |config| {
            config.path_regexes.push(PathRegexConfig {
                pattern: r"^archive/(\d+)\.html$".to_string(),
                target: r"/blog/\1".to_string(),
                permanent: false,
            });
        });

        let (status, headers, _) = get_page(&s.app, "/old/first.php", &[]).await;
        assert_eq!(status, StatusCode::MOVED_PERMANENTLY);
        assert_eq!(location(&headers), "/blog/1-First");

        let (status, headers, _) = get_page(&s.app, "/archive/1.html", &[]).await;
        assert_eq!(status, StatusCode::FOUND);
        assert_eq!(location(&headers), "/blog/1");

        let (status, _, body) = get_page(&s.app, "/nothing/here", &[]).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("<h1>Not Found</h1>"));

        assert_eq!(get_page(&s.app, "/blog/99-Missing", &[]).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_category_pages() {
        let s = site(&[("blog/first.md", FIRST), ("blog/second.md", SECOND)], |_| {});

        let (status, _, body) = get_page(&s.app, "/blog/", &[]).await;
        assert_eq!(status, StatusCode::OK);
        let second = body.find("/blog/2-Second").unwrap();
        let first = body.find("/blog/1-First").unwrap();
        assert!(second < first);

        let (status, _, body) = get_page(&s.app, "/blog/?start=1", &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body.contains("/blog/2-Second"));

        let (status, headers, _) = get_page(&s.app, "/blog", &[]).await;
        assert_eq!(status, StatusCode::MOVED_PERMANENTLY);
        assert_eq!(location(&headers), "/blog/");

        assert_eq!(get_page(&s.app, "/", &[]).await.0, StatusCode::OK);
        assert_eq!(get_page(&s.app, "/blog/feed", &[]).await.0, StatusCode::NOT_FOUND);
        assert_eq!(get_page(&s.app, "/blog/entry", &[]).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_user_templates_are_served_with_their_type() {
        let s = site(&[("blog/first.md", FIRST)], |_| {});
        // The template directory sits next to the content directory
        let templates = s.dir.path().join("templates/blog");
        fs::create_dir_all(&templates).unwrap();
        fs::write(templates.join("feed.xml"), "<feed/>").unwrap();

        let (status, headers, body) = get_page(&s.app, "/blog/feed", &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/xml");
        assert_eq!(body, "<feed/>");
    }

    #[tokio::test]
    async fn test_protected_entry_depends_on_user() {
        let s = site(
            &[("private.md", "Title: Private\nEntry-ID: 5\nDate: 2020-01-01\nAuth: @staff\n\nSecret stuff\n")],
            |_| {},
        );

        let (status, _, body) = get_page(&s.app, "/5-Private", &[]).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(!body.contains("Secret stuff"));
        assert!(body.contains("/_login?redir=/5-Private"));

        let staff = [("X-Remote-User", "sam"), ("X-Remote-Groups", "staff, admin")];
        let (status, _, body) = get_page(&s.app, "/5-Private", &staff).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Secret stuff"));

        // A cached page for one user is never served to another
        let (status, _, body) = get_page(&s.app, "/5-Private", &[]).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(!body.contains("Secret stuff"));
    }

    #[tokio::test]
    async fn test_login_page() {
        let s = site(&[], |_| {});
        let (status, _, body) = get_page(&s.app, "/_login?redir=/blog/", &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#"href="/blog/""#));
    }

    #[test]
    fn test_current_user_from_headers() {
        let auth = AuthConfig::default();
        let mut headers = HeaderMap::new();
        assert_eq!(current_user(&auth, &headers), None);

        headers.insert("x-remote-user", "alice".parse().unwrap());
        headers.insert("x-remote-groups", "a,b c".parse().unwrap());
        assert_eq!(
            current_user(&auth, &headers),
            Some(User::new("alice", vec!["a".into(), "b".into(), "c".into()]))
        );
    }
}
