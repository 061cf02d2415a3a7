//! Event dispatcher for the live message stream.
//!
//! [`LiveEventListener`] spawns the stream reader as a background producer and
//! runs the dispatch loop on the calling task. Handlers run one at a time, in
//! frame order, on that task: a slow handler delays every later event and, once
//! the frame channel is full, the socket reads as well.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::session::Session;
use crate::stream::client::{live_messages_worker, StreamError, StreamOptions};
use crate::stream::handlers::{Handler, HandlerRegistry};
use crate::stream::proto::{ControlEvent, LiveEvent, LiveMessage, RawFrame};

/// Handler registry plus the dispatch loop over one live message stream.
///
/// Clones share the registry, so a clone captured by a handler can register
/// further handlers while the loop is running.
#[derive(Clone, Debug)]
pub struct LiveEventListener {
    session: Session,
    handlers: Arc<RwLock<HandlerRegistry>>,
    options: StreamOptions,
}

impl LiveEventListener {
    pub fn new(session: Session) -> Self {
        Self::with_options(session, StreamOptions::default())
    }

    pub fn with_options(session: Session, options: StreamOptions) -> Self {
        Self {
            session,
            handlers: Arc::new(RwLock::new(HandlerRegistry::new())),
            options,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Registers a handler by tag: `stream-open`, `message` and `error` are
    /// control events, any other tag names a live event type.
    ///
    /// Register before listening to avoid missing the `stream-open` frame.
    pub fn subscribe<F>(&self, tag: &str, handler: F)
    where
        F: Fn(&Session, &LiveMessage) + Send + Sync + 'static,
    {
        self.update_registry(|registry| registry.subscribe(tag, Arc::new(handler)));
    }

    pub fn on_control<F>(&self, control: ControlEvent, handler: F)
    where
        F: Fn(&Session, &LiveMessage) + Send + Sync + 'static,
    {
        self.update_registry(|registry| registry.set_control(control, Arc::new(handler)));
    }

    pub fn on_stream_open<F>(&self, handler: F)
    where
        F: Fn(&Session, &LiveMessage) + Send + Sync + 'static,
    {
        self.on_control(ControlEvent::StreamOpen, handler);
    }

    /// Called for every `message` frame whose payload parses.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&Session, &LiveMessage) + Send + Sync + 'static,
    {
        self.on_control(ControlEvent::Message, handler);
    }

    /// Called with the error text in [`LiveMessage::data`].
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&Session, &LiveMessage) + Send + Sync + 'static,
    {
        self.on_control(ControlEvent::Error, handler);
    }

    /// Called for `message` frames whose payload `event_type` matches.
    pub fn on_event_type<F>(&self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(&Session, &LiveMessage) + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        self.update_registry(|registry| registry.set_event_type(event_type, Arc::new(handler)));
    }

    /// Listens as the user the session is logged in as.
    pub async fn listen(&self, cancel: CancellationToken) -> Result<(), StreamError> {
        let user_id = self
            .session
            .user_id()
            .await
            .ok_or(StreamError::MissingUserId)?;
        self.listen_as(user_id, cancel).await
    }

    /// Streams live messages for `user_id` and dispatches them until `cancel`
    /// fires or the reader stops.
    ///
    /// Returns `Ok(())` when cancelled. When the reader stops, its error is
    /// first handed to the error handler and then returned.
    pub async fn listen_as(
        &self,
        user_id: u64,
        cancel: CancellationToken,
    ) -> Result<(), StreamError> {
        let (frame_tx, frame_rx) = mpsc::channel(self.options.frame_buffer.max(1));
        let (error_tx, error_rx) = mpsc::channel(1);
        let reader_cancel = cancel.child_token();

        let reader = tokio::spawn(live_messages_worker(
            self.session.clone(),
            user_id,
            self.options.framer.clone(),
            frame_tx,
            error_tx,
            reader_cancel.clone(),
        ));

        let outcome = self.run(frame_rx, error_rx, &cancel).await;
        reader_cancel.cancel();
        if let Err(err) = reader.await {
            debug!(event = "live_messages_reader_join_failed", error = %err);
        }
        outcome
    }

    /// Dispatch loop over already-decoded frames and reader errors.
    ///
    /// Ends with `Ok(())` on cancellation, otherwise once both channels are
    /// closed, returning the last reader error or [`StreamError::Closed`].
    pub async fn run(
        &self,
        mut frames: mpsc::Receiver<RawFrame>,
        mut errors: mpsc::Receiver<StreamError>,
        cancel: &CancellationToken,
    ) -> Result<(), StreamError> {
        let mut frames_open = true;
        let mut errors_open = true;
        let mut last_error = None;

        while frames_open || errors_open {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                frame = frames.recv(), if frames_open => match frame {
                    Some(frame) => self.dispatch_frame(frame),
                    None => frames_open = false,
                },
                error = errors.recv(), if errors_open => match error {
                    Some(error) => {
                        self.dispatch_error(&error);
                        last_error = Some(error);
                    }
                    None => errors_open = false,
                },
            }
        }

        Err(last_error.unwrap_or(StreamError::Closed))
    }

    /// Classifies one frame and invokes the matching handlers.
    pub fn dispatch_frame(&self, frame: RawFrame) {
        match ControlEvent::from_tag(&frame.event) {
            Some(ControlEvent::StreamOpen) => {
                if let Some(handler) = self.control_handler(ControlEvent::StreamOpen) {
                    handler(&self.session, &LiveMessage::from(frame));
                }
            }
            Some(ControlEvent::Message) => {
                let parsed = match LiveEvent::from_text(&frame.data) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        self.dispatch_error(&StreamError::Decode(err));
                        return;
                    }
                };
                let event_type = parsed.event_type.clone();
                let message = LiveMessage {
                    event: frame.event,
                    data: frame.data,
                    parsed: Some(parsed),
                };

                if let Some(handler) = self.control_handler(ControlEvent::Message) {
                    handler(&self.session, &message);
                }
                if let Some(handler) = self.event_type_handler(&event_type) {
                    handler(&self.session, &message);
                }
            }
            _ => debug!(event = "frame_ignored", tag = %frame.event),
        }
    }

    /// Hands an error to the error handler, or logs it when none is set.
    pub fn dispatch_error(&self, error: &StreamError) {
        match self.control_handler(ControlEvent::Error) {
            Some(handler) => handler(&self.session, &LiveMessage::error(error.to_string())),
            None => warn!(event = "unhandled_stream_error", error = %error),
        }
    }

    fn control_handler(&self, control: ControlEvent) -> Option<Handler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .control(control)
    }

    fn event_type_handler(&self, event_type: &str) -> Option<Handler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .event_type(event_type)
    }

    fn update_registry(&self, update: impl FnOnce(&mut HandlerRegistry)) {
        let mut registry = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        update(&mut registry);
    }
}
