//! Proxy rule set and request matching
//!
//! Rules are built once at startup from configuration and are immutable
//! afterwards. Matching is pure prefix comparison: rules are tried in
//! declaration order and the first match wins. Order is the only
//! disambiguator; there is no longest-prefix scoring.

use anyhow::{Context, Result, bail};
use url::Url;

use crate::config::RuleConfig;

/// How a rule decides whether it applies to a request path.
///
/// Both variants hold a normalized literal prefix (the recursive-wildcard
/// marker from the config pattern is stripped at construction). They differ
/// in how the outbound path is computed once matched:
///
/// - `GlobContext`: the original path is forwarded unchanged.
/// - `PathPrefixKey`: the matched prefix is replaced by the target's own
///   path suffix before forwarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    GlobContext(String),
    PathPrefixKey(String),
}

impl Matcher {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Matcher::GlobContext(prefix) | Matcher::PathPrefixKey(prefix) => {
                path.starts_with(prefix)
            }
        }
    }
}

/// A validated forwarding target: http/https base URL with a host.
///
/// Parsed once at configuration load; an unparseable target is a startup
/// error, never a runtime fault.
#[derive(Debug, Clone)]
pub struct Target {
    url: Url,
    host: String,
    port: u16,
}

impl Target {
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .with_context(|| format!("Invalid target URL: {raw}"))?;

        match url.scheme() {
            "http" | "https" => {}
            other => bail!("Target {raw} has unsupported scheme '{other}' (expected http or https)"),
        }

        let host = url
            .host_str()
            .with_context(|| format!("Target {raw} has no host"))?
            .to_string();

        let port = url.port().unwrap_or(match url.scheme() {
            "https" => 443,
            _ => 80,
        });

        Ok(Self { url, host, port })
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address for the outbound TCP connect, always `host:port`.
    pub fn connect_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Value for a rewritten `Host` header: the port is included only
    /// when it was explicit in the configured URL (i.e. non-default).
    pub fn host_header(&self) -> String {
        match self.url.port() {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// Path component of the configured base URL (`/` when absent).
    pub fn base_path(&self) -> &str {
        self.url.path()
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

/// One declarative forwarding rule: matcher, target, origin directive.
#[derive(Debug, Clone)]
pub struct ProxyRule {
    pub matcher: Matcher,
    pub target: Target,
    pub change_origin: bool,
}

impl ProxyRule {
    pub fn from_config(cfg: &RuleConfig) -> Result<Self> {
        let matcher = match (&cfg.context, &cfg.path) {
            (Some(_), Some(_)) => {
                bail!("Rule must set either 'context' or 'path', not both")
            }
            (None, None) => {
                bail!("Rule must set a 'context' or 'path' matcher")
            }
            (Some(context), None) => {
                Matcher::GlobContext(glob_context_prefix(context)?)
            }
            (None, Some(path)) => {
                Matcher::PathPrefixKey(prefix_key_literal(path)?)
            }
        };

        let target = Target::parse(&cfg.target)?;

        Ok(Self {
            matcher,
            target,
            change_origin: cfg.change_origin,
        })
    }

    /// Computes the path to request from the upstream for a matched
    /// inbound path. The query string is not part of this; it is relayed
    /// separately and unchanged.
    pub fn outbound_path(&self, path: &str) -> String {
        let rewritten = match &self.matcher {
            // Original path as-is, appended to the target's base path.
            Matcher::GlobContext(_) => {
                let base = self.target.base_path().trim_end_matches('/');
                format!("{base}{path}")
            }
            // Matched prefix replaced by the target's path suffix.
            Matcher::PathPrefixKey(prefix) => {
                let base = self.target.base_path().trim_end_matches('/');
                let remainder = &path[prefix.len()..];
                format!("{base}{remainder}")
            }
        };

        if rewritten.is_empty() {
            "/".to_string()
        } else {
            rewritten
        }
    }
}

/// Ordered, immutable collection of proxy rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<ProxyRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<ProxyRule>) -> Self {
        Self { rules }
    }

    /// Builds and validates the rule set from configuration. Any invalid
    /// rule aborts startup with the offending rule's position.
    pub fn from_config(configs: &[RuleConfig]) -> Result<Self> {
        let rules = configs
            .iter()
            .enumerate()
            .map(|(i, cfg)| {
                ProxyRule::from_config(cfg)
                    .with_context(|| format!("Invalid proxy rule #{}", i + 1))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules })
    }

    /// Returns the first rule whose matcher accepts `path`, in
    /// declaration order.
    pub fn matched(&self, path: &str) -> Option<&ProxyRule> {
        self.rules.iter().find(|rule| rule.matcher.matches(path))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Normalizes a glob-context pattern like `/Alchemy/IAlchemyApi/**` to its
/// literal prefix (`/Alchemy/IAlchemyApi/`).
fn glob_context_prefix(pattern: &str) -> Result<String> {
    require_absolute(pattern)?;
    Ok(pattern.trim_end_matches("**").to_string())
}

/// Normalizes a path-prefix key like `/IAlchemyApi/**` to the literal
/// prefix used for comparison and rewriting (`/IAlchemyApi`).
fn prefix_key_literal(pattern: &str) -> Result<String> {
    require_absolute(pattern)?;

    let literal = pattern
        .strip_suffix("/**")
        .or_else(|| pattern.strip_suffix("**"))
        .unwrap_or(pattern);

    if literal.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(literal.to_string())
    }
}

fn require_absolute(pattern: &str) -> Result<()> {
    if pattern.is_empty() {
        bail!("Matcher pattern is empty");
    }
    if !pattern.starts_with('/') {
        bail!("Matcher pattern '{pattern}' must start with '/'");
    }
    Ok(())
}
