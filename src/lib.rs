//! tabrelay: request correlation and streaming execution for browser
//! native-messaging hosts.
//!
//! The crate pairs outbound requests to a browser extension with their
//! asynchronous responses, exposes the extension's tools (including
//! recorded flows) as a single catalog, and runs coding-agent CLIs whose
//! progress is streamed per request.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tabrelay::prelude::*;
//!
//! # async fn example() -> tabrelay::error::Result<()> {
//! let config = RelayConfig::load()?;
//! let broker = Arc::new(RequestCorrelationBroker::new());
//! let (_channel, _reader) = StreamChannel::stdio(broker.clone());
//!
//! let dispatcher = Arc::new(ToolDispatcher::with_default_catalog(broker, &config.timeouts));
//! let result = dispatcher
//!     .call_tool("get_windows_and_tabs", serde_json::json!({}))
//!     .await;
//! println!("{:?}", result.first_text());
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod broker;
pub mod channel;
pub mod config;
pub mod error;
pub mod prelude;
pub mod tools;
pub mod util;

#[cfg(feature = "mcp")]
pub mod mcp;
