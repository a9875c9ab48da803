use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ModelClient, ModelError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    Text(String),
    Fail(ModelError),
}

/// Mock client for tests and offline runs. Replies cycle in order.
#[derive(Debug)]
pub struct MockModelClient {
    replies: Vec<MockReply>,
    next: AtomicUsize,
    last_prompt: Mutex<Option<(String, String)>>,
}

impl MockModelClient {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies,
            next: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn always(reply: impl Into<String>) -> Self {
        Self::new(vec![MockReply::Text(reply.into())])
    }

    pub fn failing(error: ModelError) -> Self {
        Self::new(vec![MockReply::Fail(error)])
    }

    pub fn calls(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }

    /// `(system, user)` of the most recent call.
    pub fn last_prompt(&self) -> Option<(String, String)> {
        self.last_prompt.lock().clone()
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ModelError> {
        *self.last_prompt.lock() = Some((system.to_string(), user.to_string()));
        let idx = self.next.fetch_add(1, Ordering::SeqCst);
        if self.replies.is_empty() {
            return Ok(String::new());
        }
        match &self.replies[idx % self.replies.len()] {
            MockReply::Text(text) => Ok(text.clone()),
            MockReply::Fail(err) => Err(err.clone()),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_cycle_and_prompts_are_recorded() {
        let client = MockModelClient::new(vec![
            MockReply::Text("one".into()),
            MockReply::Fail(ModelError::Transport("down".into())),
        ]);
        assert_eq!(client.complete("sys", "first").await.unwrap(), "one");
        assert!(client.complete("sys", "second").await.is_err());
        assert_eq!(client.complete("sys", "third").await.unwrap(), "one");
        assert_eq!(client.calls(), 3);
        assert_eq!(
            client.last_prompt(),
            Some(("sys".to_string(), "third".to_string()))
        );
    }
}
