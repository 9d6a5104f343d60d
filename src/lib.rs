//! authflow — OAuth authorization flows for client applications that need an
//! access token from a server, typically GitHub.com, without permanently
//! hosting a reachable web endpoint.
//!
//! Two interchangeable strategies are provided: the polling-based
//! [`device`] flow for CLIs and headless devices, and the [`webapp`] flow
//! for apps that can briefly host a loopback HTTP listener. The [`flow`]
//! module wires both behind a single configuration struct and can detect
//! which one the server supports.
//!
//! # Quick Start
//!
//! ```no_run
//! use authflow::flow::{Flow, Host};
//!
//! # async fn example() -> authflow::Result<()> {
//! let mut flow = Flow {
//!     host: Host::github("github.com"),
//!     client_id: "YOUR_CLIENT_ID".to_string(),
//!     scopes: vec!["repo".to_string(), "read:org".to_string()],
//!     callback_uri: "http://127.0.0.1/callback".to_string(),
//!     ..Flow::default()
//! };
//! let token = flow.detect_flow().await?;
//! println!("access token: {}", token.token);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod device;
pub mod error;
pub mod flow;
pub mod webapp;

pub use api::AccessToken;
pub use error::{FlowError, Result};
pub use flow::{Flow, Host};
