//! HTTP/1.0 forward-proxy plumbing around the shared response cache.

mod http;
mod server;

pub use http::{
    build_upstream_request, error_page, parse_request, parse_url, read_request_head, Request,
    Target,
};
pub use server::Proxy;
