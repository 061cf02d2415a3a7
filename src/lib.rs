//! Rust client for the Tracim collaboration platform API.
//!
//! The crate is organized by concern:
//! - `credentials`: login identity.
//! - `session`: authenticated HTTP calls with transparent re-login on token
//!   expiry.
//! - `stream`: live message stream reader and typed event dispatch.

/// Login identity types.
pub mod credentials;
/// Authenticated session and request helpers.
pub mod session;
/// Live message stream reader, framers, and event dispatcher.
pub mod stream;

pub use credentials::{Credentials, Identifier};
pub use session::{ApiResponse, Session, SessionError, SessionOptions};
pub use stream::client::{StreamError, StreamOptions};
pub use stream::dispatcher::LiveEventListener;
pub use stream::proto::{LiveEvent, LiveMessage, RawFrame};
