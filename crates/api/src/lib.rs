//! HTTP gateway: job submission, status/result protocol and the blob proxy.

pub mod app;
pub mod middleware;
