//! Outbound pub/sub abstraction.
//!
//! The engine publishes every rendered template as a `(topic, body)`
//! pair. The transport lives in the daemon; losing a subscriber is never
//! a fatal condition, so the trait has no error channel.

pub trait Publisher {
    fn publish(&mut self, topic: &str, body: &str);
}

/// Publisher used when pub/sub is disabled.
#[derive(Debug, Default)]
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn publish(&mut self, _topic: &str, _body: &str) {}
}

/// Test publisher that records everything it is handed.
#[derive(Debug, Default)]
pub struct CollectingPublisher {
    pub messages: Vec<(String, String)>,
}

impl Publisher for CollectingPublisher {
    fn publish(&mut self, topic: &str, body: &str) {
        self.messages.push((topic.to_string(), body.to_string()));
    }
}
