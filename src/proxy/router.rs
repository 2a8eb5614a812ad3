//! Request dispatch: rules first, static files as the fallback.

use anyhow::Result;

use crate::config::Config;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::proxy::rules::RuleSet;
use crate::proxy::upstream::UpstreamClient;
use crate::static_files::StaticFiles;

/// Decides, per request, between forwarding to an upstream and serving a
/// static file. Holds only immutable state, so one instance is shared
/// across all connection tasks without locking.
pub struct ForwardingRouter {
    rules: RuleSet,
    upstream: UpstreamClient,
    static_files: StaticFiles,
}

impl ForwardingRouter {
    pub fn new(rules: RuleSet, upstream: UpstreamClient, static_files: StaticFiles) -> Self {
        Self {
            rules,
            upstream,
            static_files,
        }
    }

    /// Builds the router from validated configuration. Rule validation
    /// errors surface here, before the listener binds.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let rules = RuleSet::from_config(&cfg.proxy)?;
        tracing::info!(rules = rules.len(), "Proxy rule set loaded");

        let upstream = UpstreamClient::new(cfg.timeouts.connect(), cfg.timeouts.request());
        let static_files = StaticFiles::new(&cfg.static_files);

        Ok(Self::new(rules, upstream, static_files))
    }

    /// Handles one inbound request. A request matching no rule never
    /// reaches the network layer; it goes to the static file server.
    pub async fn handle(&self, request: &Request) -> Response {
        match self.rules.matched(&request.path) {
            Some(rule) => self.upstream.forward(rule, request).await,
            None => {
                tracing::debug!(path = %request.path, "No proxy rule matched, serving static");
                self.static_files.serve(request).await
            }
        }
    }
}
