//! Live message stream reader.
//!
//! Opens `GET /users/{id}/live_messages` on an authenticated session and feeds
//! every read of the response body through a [`Framer`]. Frames go out over a
//! bounded channel, so a slow consumer stalls socket reads instead of growing
//! a buffer. Read failures end the reader; reconnecting is up to the caller.

use std::io;

use futures_util::TryStreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONNECTION};
use reqwest::Method;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::session::{summarize_error_body, Session, SessionError};
use crate::stream::framer::{Framer, FramerKind};
use crate::stream::proto::RawFrame;

const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamDefaults;

impl StreamDefaults {
    /// Frames in flight between reader and dispatcher.
    pub const FRAME_BUFFER: usize = 1;
}

#[derive(Clone, Debug)]
pub struct StreamOptions {
    /// Capacity of the frame channel. Values below 1 are raised to 1.
    pub frame_buffer: usize,
    pub framer: FramerKind,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            frame_buffer: StreamDefaults::FRAME_BUFFER,
            framer: FramerKind::default(),
        }
    }
}

/// Path of the live message endpoint for a user.
pub fn live_messages_endpoint(user_id: u64) -> String {
    format!("/users/{user_id}/live_messages")
}

/// Refreshes the session if needed and opens the live message stream.
pub async fn open_live_messages(
    session: &Session,
    user_id: u64,
) -> Result<reqwest::Response, StreamError> {
    session.ensure_fresh().await?;

    let response = session
        .generate_request(Method::GET, &live_messages_endpoint(user_id), None)
        .await
        .header(CACHE_CONTROL, "no-cache")
        .header(ACCEPT, EVENT_STREAM_CONTENT_TYPE)
        .header(CONNECTION, "keep-alive")
        .send()
        .await
        .map_err(SessionError::Transport)?;

    let status = response.status();
    if !status.is_success() {
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) => {
                debug!(
                    event = "live_messages_error_body_unreadable",
                    user_id,
                    status = %status,
                    error = %err
                );
                Default::default()
            }
        };
        return Err(SessionError::Request {
            status,
            body: summarize_error_body(&body),
        }
        .into());
    }

    info!(event = "live_messages_opened", user_id);
    Ok(response)
}

/// Reads the response body until it fails, ends, or `cancel` fires.
///
/// Returns `Ok(())` on cancellation or when the frame receiver is gone.
pub async fn run_reader(
    response: reqwest::Response,
    mut framer: Box<dyn Framer>,
    frames: mpsc::Sender<RawFrame>,
    cancel: CancellationToken,
) -> Result<(), StreamError> {
    let body = response.bytes_stream().map_err(io::Error::other);
    let mut reader = StreamReader::new(Box::pin(body));
    let mut buf = vec![0u8; framer.read_size().max(1)];

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = reader.read(&mut buf) => read.map_err(StreamError::Transport)?,
        };
        if read == 0 {
            return Err(StreamError::Closed);
        }

        for frame in framer.feed(&buf[..read]) {
            debug!(event = "frame_decoded", tag = %frame.event, bytes = frame.data.len());
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                sent = frames.send(frame) => {
                    if sent.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Background producer: opens the stream, runs the reader and reports the
/// terminating error, if any, on `errors`.
pub(crate) async fn live_messages_worker(
    session: Session,
    user_id: u64,
    framer: FramerKind,
    frames: mpsc::Sender<RawFrame>,
    errors: mpsc::Sender<StreamError>,
    cancel: CancellationToken,
) {
    let result = async {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            opened = open_live_messages(&session, user_id) => opened?,
        };
        run_reader(response, framer.build(), frames, cancel.clone()).await
    }
    .await;

    if let Err(err) = result {
        debug!(event = "live_messages_reader_stopped", user_id, error = %err);
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = errors.send(err) => {}
        }
    }
}

/// Errors produced while opening, reading or decoding the live stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Login, refresh or stream-open request failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("stream read failed: {0}")]
    Transport(#[source] io::Error),

    #[error("stream closed by server")]
    Closed,

    /// A `message` frame carried a payload that is not a live event.
    #[error("failed to decode live event: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("session has no user id; authenticate before listening")]
    MissingUserId,
}

impl StreamError {
    /// Whether the error ends the reader task.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Decode(_))
    }
}
