//! Static asset serving
//!
//! The fallback collaborator for requests no proxy rule matches: maps the
//! request path into a root directory and serves the file, or 404.

use std::path::{Component, Path, PathBuf};

use crate::config::StaticFilesConfig;
use crate::http::mime;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, Status};

/// Serves files from a configured root directory.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    index: String,
}

impl StaticFiles {
    pub fn new(cfg: &StaticFilesConfig) -> Self {
        Self {
            root: cfg.root.clone(),
            index: cfg.index.clone(),
        }
    }

    /// Handles a request that matched no proxy rule. Only GET and HEAD
    /// are served; other methods get 405.
    pub async fn serve(&self, request: &Request) -> Response {
        match request.method {
            Method::GET | Method::HEAD => {}
            _ => return Response::method_not_allowed(),
        }

        let Some(file_path) = self.resolve(&request.path) else {
            tracing::warn!(path = %request.path, "Rejected unsafe static path");
            return Response::not_found();
        };

        match tokio::fs::read(&file_path).await {
            Ok(contents) => {
                let content_type = mime::from_path(&file_path);
                tracing::debug!(
                    path = %request.path,
                    file = %file_path.display(),
                    bytes = contents.len(),
                    "Serving static file"
                );

                // Content-Length is computed from the full file before a
                // HEAD response drops the body, so HEAD advertises the
                // length the matching GET would return.
                let mut response = ResponseBuilder::new(Status::OK)
                    .header("Content-Type", content_type)
                    .body(contents)
                    .build();

                if request.method == Method::HEAD {
                    response.body.clear();
                }

                response
            }
            Err(e) => {
                tracing::debug!(
                    path = %request.path,
                    error = %e,
                    "Static file not found"
                );
                Response::not_found()
            }
        }
    }

    /// Maps a request path to a file under the root, or `None` when the
    /// path would escape it. `/` maps to the configured index file.
    fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let trimmed = request_path.trim_start_matches('/');
        let relative = if trimmed.is_empty() {
            self.index.as_str()
        } else {
            trimmed
        };

        // No parent-directory segments, no absolute components.
        let candidate = Path::new(relative);
        for component in candidate.components() {
            match component {
                Component::Normal(_) => {}
                _ => return None,
            }
        }

        Some(self.root.join(candidate))
    }
}
