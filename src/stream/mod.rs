//! Live message stream modules.
//!
//! - `client`: stream reader that opens the live message endpoint and turns
//!   response reads into frames.
//! - `framer`: pluggable segmentation of the byte stream into frames.
//! - `proto`: frame, control tag and live event types.
//! - `handlers`: handler registry keyed by control event and event type.
//! - `dispatcher`: dispatch loop invoking handlers in frame order.

/// Stream reader and stream errors.
pub mod client;
/// Event dispatcher and listening entry point.
pub mod dispatcher;
/// Frame segmentation strategies.
pub mod framer;
/// Handler registry.
pub mod handlers;
/// Stream frame and live event types.
pub mod proto;
