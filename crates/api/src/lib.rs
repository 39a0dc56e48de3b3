//! HTTP API: the worker protocol, access control, and request/response mapping.

pub mod app;
pub mod context;
pub mod middleware;
