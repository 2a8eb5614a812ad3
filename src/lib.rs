//! devgate - Development HTTP gateway
//!
//! Serves a static asset tree and forwards rule-matched request paths
//! to an upstream backend.

pub mod config;
pub mod http;
pub mod proxy;
pub mod server;
pub mod static_files;
