pub mod gmail;

use async_trait::async_trait;

use crate::error::EmailError;

/// One inbox message. Sender or body can be missing when the provider
/// payload is malformed; callers skip such messages.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: String,
    pub sender: Option<String>,
    pub body: Option<String>,
}

/// Mail provider collaborator: polling, inbox state changes and replies.
#[async_trait]
pub trait EmailGateway: Send + Sync {
    async fn poll_new_messages(&self) -> Result<Vec<InboundMessage>, EmailError>;
    async fn mark_read(&self, id: &str) -> Result<(), EmailError>;
    async fn trash(&self, id: &str) -> Result<(), EmailError>;
    async fn send_reply(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        in_reply_to: Option<&str>,
    ) -> Result<(), EmailError>;
}
