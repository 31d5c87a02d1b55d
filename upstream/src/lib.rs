pub mod client;
pub mod proxy;
pub mod ssrf;

pub use client::{CallOptions, HttpClient, UpstreamRequest, UpstreamResponse};
pub use proxy::ProxyPool;
