//! Proxy rule matching and request forwarding
//!
//! This module implements the core proxy logic: the declarative rule set,
//! the upstream forwarding client, and the router tying them to the
//! static-file fallback.

pub mod router;
pub mod rules;
pub mod upstream;

pub use router::ForwardingRouter;
pub use rules::{Matcher, ProxyRule, RuleSet, Target};
pub use upstream::UpstreamClient;
