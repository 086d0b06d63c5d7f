//! `deadline-http` is an outbound HTTP transport that layers three timeout
//! budgets over a pooled, keep-alive capable hyper client:
//!
//! - **connect**: how long dialing the target (or its proxy) may take,
//! - **response header**: how long to wait for the status line and headers,
//! - **request**: one deadline covering everything, response body included.
//!
//! A zero budget disables that guard. The request deadline is armed before the
//! request is sent and is disarmed exactly once: immediately when the round
//! trip fails, or when the caller closes (or drops) the [`ResponseBody`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use deadline_http::prelude::{Form, Transport, TransportConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(Transport::new(
//!         TransportConfig::standard().with_request_timeout(Duration::from_secs(30)),
//!     ));
//!
//!     let page = transport.get("https://api.example.com/v1/items").await?;
//!     println!("{} bytes", page.len());
//!
//!     let form = Form::new().append("name", "demo");
//!     transport.post("https://api.example.com/v1/items", &form).await?;
//!     Ok(())
//! }
//! ```
//!
//! Share one transport per backend; the connection pool is built lazily on
//! the first request and reused by every caller afterwards.

mod body;
mod config;
mod error;
mod metrics;
mod observe;
mod proxy;
mod request;
mod timer;
mod tls;
mod transport;
mod util;

pub use crate::body::{RequestBody, ResponseBody, empty_body, full_body};
pub use crate::config::{
    DEFAULT_MAX_IDLE_CONNS_PER_HOST, STANDARD_CONNECT_TIMEOUT, STANDARD_REQUEST_TIMEOUT,
    STANDARD_RESPONSE_HEADER_TIMEOUT, TransportConfig,
};
pub use crate::error::{Error, ErrorCode, TimeoutPhase, TransportErrorKind};
pub use crate::metrics::TransportMetricsSnapshot;
pub use crate::observe::TransportObserver;
pub use crate::proxy::ProxySelector;
pub use crate::request::{Form, header_map};
pub use crate::tls::{TlsConfig, TlsRootStore};
pub use crate::transport::Transport;

pub type Result<T> = std::result::Result<T, Error>;

/// Crate version, as published.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod prelude {
    pub use crate::{
        Error, ErrorCode, Form, ProxySelector, RequestBody, ResponseBody, Result, TimeoutPhase,
        TlsConfig, TlsRootStore, Transport, TransportConfig, TransportErrorKind,
        TransportMetricsSnapshot, TransportObserver, empty_body, full_body, header_map,
    };
}

#[cfg(test)]
mod tests;
