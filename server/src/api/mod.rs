//! API layer: HTTP routes and the session gateway

pub mod http;
pub mod ws;
