//! Static asset serving with an SPA index fallback
//!
//! Any path that does not match a file under the asset root falls back to
//! the entry document with HTTP 200, so a client-side router owns
//! unmatched paths.

use crate::error::{json_error_response, GatewayErrorCode};
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper::{Method, Response, StatusCode};
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error};

/// The static SPA bundle and its entry document
pub struct StaticSite {
    root: PathBuf,
    index: String,
}

impl StaticSite {
    pub fn new(root: impl Into<PathBuf>, index: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            index: index.into(),
        }
    }

    /// Serve the file matching `raw_path`, or the entry document when
    /// nothing matches. Only GET and HEAD reach the filesystem.
    pub async fn serve(
        &self,
        method: &Method,
        raw_path: &str,
    ) -> Response<BoxBody<Bytes, hyper::Error>> {
        if method != Method::GET && method != Method::HEAD {
            return json_error_response(
                GatewayErrorCode::MethodNotAllowed,
                format!("{} is not supported for static assets", method),
            );
        }
        let head_only = method == Method::HEAD;

        if let Some(file) = self.resolve(raw_path) {
            if let Ok(contents) = tokio::fs::read(&file).await {
                debug!(path = %file.display(), bytes = contents.len(), "Serving static file");
                return file_response(&file, contents, head_only);
            }
        }

        self.fallback(head_only).await
    }

    /// Map a request path to a file inside the root, or None when the path
    /// is empty or tries to escape the root.
    fn resolve(&self, raw_path: &str) -> Option<PathBuf> {
        let decoded = urlencoding::decode(raw_path).ok()?;
        let relative = sanitize(&decoded)?;
        if relative.as_os_str().is_empty() {
            return None;
        }
        Some(self.root.join(relative))
    }

    /// Serve the entry document with 200. A missing index is a deployment
    /// problem, not a routing miss.
    async fn fallback(&self, head_only: bool) -> Response<BoxBody<Bytes, hyper::Error>> {
        let index_path = self.root.join(&self.index);
        match tokio::fs::read(&index_path).await {
            Ok(contents) => file_response(&index_path, contents, head_only),
            Err(e) => {
                error!(path = %index_path.display(), error = %e, "SPA index document unavailable");
                json_error_response(
                    GatewayErrorCode::IndexUnavailable,
                    "SPA index document unavailable",
                )
            }
        }
    }
}

/// Normalize a request path into a relative path that cannot leave the
/// asset root. Parent-directory components reject the whole path.
fn sanitize(path: &str) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(clean)
}

fn file_response(
    path: &Path,
    contents: Vec<u8>,
    head_only: bool,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, content_type(path))
        .header(hyper::header::CONTENT_LENGTH, contents.len());

    let body = if head_only {
        Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
    } else {
        Full::new(Bytes::from(contents))
            .map_err(|never| match never {})
            .boxed()
    };

    builder.body(body).expect("valid response builder")
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(OsStr::to_str) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") | Some("mjs") => "application/javascript",
        Some("json") | Some("map") => "application/json",
        Some("wasm") => "application/wasm",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_sanitize_plain_paths() {
        assert_eq!(sanitize("/app.js"), Some(PathBuf::from("app.js")));
        assert_eq!(
            sanitize("/assets/img/logo.png"),
            Some(PathBuf::from("assets/img/logo.png"))
        );
        assert_eq!(sanitize("/"), Some(PathBuf::new()));
        assert_eq!(sanitize("/./app.js"), Some(PathBuf::from("app.js")));
    }

    #[test]
    fn test_sanitize_rejects_traversal() {
        assert_eq!(sanitize("/../secret.txt"), None);
        assert_eq!(sanitize("/assets/../../secret.txt"), None);
        assert_eq!(sanitize(".."), None);
    }

    #[test]
    fn test_content_type() {
        assert_eq!(
            content_type(Path::new("index.html")),
            "text/html; charset=utf-8"
        );
        assert_eq!(content_type(Path::new("app.js")), "application/javascript");
        assert_eq!(content_type(Path::new("app_bg.wasm")), "application/wasm");
        assert_eq!(content_type(Path::new("style.css")), "text/css");
        assert_eq!(
            content_type(Path::new("unknown.bin")),
            "application/octet-stream"
        );
    }

    #[tokio::test]
    async fn test_serve_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.js"), b"console.log('hi');").unwrap();

        let site = StaticSite::new(dir.path(), "index.html");
        let response = site.serve(&Method::GET, "/app.js").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(hyper::header::CONTENT_TYPE).unwrap(),
            "application/javascript"
        );
    }

    #[tokio::test]
    async fn test_unmatched_path_falls_back_to_index() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), b"<html>app</html>").unwrap();

        let site = StaticSite::new(dir.path(), "index.html");

        for path in ["/", "/no/such/file", "/todos/42"] {
            let response = site.serve(&Method::GET, path).await;
            assert_eq!(response.status(), StatusCode::OK, "path {}", path);
            assert_eq!(
                response.headers().get(hyper::header::CONTENT_TYPE).unwrap(),
                "text/html; charset=utf-8"
            );
        }
    }

    #[tokio::test]
    async fn test_missing_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let site = StaticSite::new(dir.path(), "index.html");

        let response = site.serve(&Method::GET, "/anything").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_non_get_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), b"<html></html>").unwrap();

        let site = StaticSite::new(dir.path(), "index.html");
        let response = site.serve(&Method::POST, "/index.html").await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_head_omits_body_keeps_length() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), b"<html>app</html>").unwrap();

        let site = StaticSite::new(dir.path(), "index.html");
        let response = site.serve(&Method::HEAD, "/index.html").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(hyper::header::CONTENT_LENGTH)
                .unwrap(),
            "16"
        );
    }
}
