use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::session::Session;
use crate::stream::proto::{ControlEvent, LiveMessage};

/// Callback invoked by the dispatcher.
pub type Handler = Arc<dyn Fn(&Session, &LiveMessage) + Send + Sync>;

/// Handlers for the three control events plus one handler per live event type.
///
/// Every key holds at most one handler; registering again replaces it.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    stream_open: Option<Handler>,
    message: Option<Handler>,
    error: Option<Handler>,
    event_types: HashMap<String, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_control(&mut self, control: ControlEvent, handler: Handler) {
        *self.control_slot(control) = Some(handler);
    }

    pub fn set_event_type(&mut self, event_type: impl Into<String>, handler: Handler) {
        self.event_types.insert(event_type.into(), handler);
    }

    /// Routes `stream-open`, `message` and `error` to their control slot and
    /// any other tag to the live event type map.
    pub fn subscribe(&mut self, tag: &str, handler: Handler) {
        match ControlEvent::from_tag(tag) {
            Some(control) => self.set_control(control, handler),
            None => self.set_event_type(tag, handler),
        }
    }

    pub fn control(&self, control: ControlEvent) -> Option<Handler> {
        match control {
            ControlEvent::StreamOpen => self.stream_open.clone(),
            ControlEvent::Message => self.message.clone(),
            ControlEvent::Error => self.error.clone(),
        }
    }

    pub fn event_type(&self, event_type: &str) -> Option<Handler> {
        self.event_types.get(event_type).cloned()
    }

    pub fn has_error_handler(&self) -> bool {
        self.error.is_some()
    }

    fn control_slot(&mut self, control: ControlEvent) -> &mut Option<Handler> {
        match control {
            ControlEvent::StreamOpen => &mut self.stream_open,
            ControlEvent::Message => &mut self.message,
            ControlEvent::Error => &mut self.error,
        }
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut event_types: Vec<&str> = self.event_types.keys().map(String::as_str).collect();
        event_types.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("stream_open", &self.stream_open.is_some())
            .field("message", &self.message.is_some())
            .field("error", &self.error.is_some())
            .field("event_types", &event_types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::{Handler, HandlerRegistry};
    use crate::session::Session;
    use crate::stream::proto::{ControlEvent, LiveMessage};

    fn counting_handler(counter: &Arc<AtomicUsize>, weight: usize) -> Handler {
        let counter = Arc::clone(counter);
        Arc::new(move |_: &Session, _: &LiveMessage| {
            counter.fetch_add(weight, Ordering::SeqCst);
        })
    }

    #[test]
    fn subscribe_routes_control_tags_to_slots() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();

        registry.subscribe("stream-open", counting_handler(&counter, 1));
        registry.subscribe("message", counting_handler(&counter, 1));
        registry.subscribe("error", counting_handler(&counter, 1));
        registry.subscribe("content.created.comment", counting_handler(&counter, 1));

        assert!(registry.control(ControlEvent::StreamOpen).is_some());
        assert!(registry.control(ControlEvent::Message).is_some());
        assert!(registry.has_error_handler());
        assert!(registry.event_type("content.created.comment").is_some());
        assert!(registry.event_type("message").is_none());
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry.set_event_type("x", counting_handler(&counter, 1));
        registry.set_event_type("x", counting_handler(&counter, 10));

        let session = Session::new("http://127.0.0.1:9").expect("build session");
        let handler = registry.event_type("x").expect("handler registered");
        handler(&session, &LiveMessage::error("unused".to_string()));

        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn debug_lists_registered_event_types() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry.set_event_type("b", counting_handler(&counter, 1));
        registry.set_event_type("a", counting_handler(&counter, 1));

        let rendered = format!("{registry:?}");
        assert!(rendered.contains(r#"event_types: ["a", "b"]"#));
    }
}
