use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tether::{Handler, HandlerError, Message};

/// Keeps every message it handles, and always succeeds.
#[derive(Clone, Default)]
pub struct Recorder {
    messages: Arc<Mutex<Vec<Message>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.messages.lock().len()
    }
}

#[async_trait]
impl Handler for Recorder {
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        self.messages.lock().push(message);

        Ok(())
    }
}
