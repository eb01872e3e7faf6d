//! Messaging inbox: conversation list, the selected conversation's thread,
//! and outbound replies.

use crate::{
    backend::Backend,
    dto::inbox::NewMessage,
    error::AppResult,
    models::{ConversationSummary, Message, SenderType},
};

pub const UNKNOWN_CUSTOMER: &str = "Unknown";
pub const NO_SUBJECT: &str = "No subject";

impl ConversationSummary {
    pub fn display_name(&self) -> &str {
        self.customer_name.as_deref().unwrap_or(UNKNOWN_CUSTOMER)
    }

    pub fn display_subject(&self) -> &str {
        self.subject.as_deref().unwrap_or(NO_SUBJECT)
    }
}

/// Identifies one conversation selection; results only land for the newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectTicket {
    conversation_id: i64,
    seq: u64,
}

impl SelectTicket {
    pub fn conversation_id(&self) -> i64 {
        self.conversation_id
    }
}

#[derive(Debug, Default)]
pub struct InboxView {
    conversations: Vec<ConversationSummary>,
    selected: Option<i64>,
    messages: Vec<Message>,
    loading_conversations: bool,
    loading_messages: bool,
    draft: String,
    notice: Option<String>,
    select_seq: u64,
}

impl InboxView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    pub fn selected(&self) -> Option<&ConversationSummary> {
        let id = self.selected?;
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn selected_id(&self) -> Option<i64> {
        self.selected
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_loading_conversations(&self) -> bool {
        self.loading_conversations
    }

    pub fn is_loading_messages(&self) -> bool {
        self.loading_messages
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn dismiss_notice(&mut self) -> Option<String> {
        self.notice.take()
    }

    /// Newest message id; the thread is kept scrolled to it.
    pub fn scroll_anchor(&self) -> Option<i64> {
        self.messages.last().map(|m| m.id)
    }

    pub async fn load_conversations(&mut self, backend: &dyn Backend) {
        self.loading_conversations = true;
        match backend.list_conversations().await {
            Ok(conversations) => self.conversations = conversations,
            Err(err) => {
                tracing::warn!(error = %err, "failed to load conversations");
                self.conversations.clear();
                self.notice = Some(err.to_string());
            }
        }
        self.loading_conversations = false;
    }

    pub fn begin_select(&mut self, conversation_id: i64) -> SelectTicket {
        self.select_seq += 1;
        self.selected = Some(conversation_id);
        self.messages.clear();
        self.loading_messages = true;
        SelectTicket {
            conversation_id,
            seq: self.select_seq,
        }
    }

    /// Lands a message fetch. Returns `false` if the user has selected
    /// something else since `ticket` was issued.
    pub fn finish_select(&mut self, ticket: SelectTicket, messages: AppResult<Vec<Message>>) -> bool {
        if ticket.seq != self.select_seq {
            tracing::debug!(
                conversation_id = ticket.conversation_id,
                "dropping messages for superseded selection"
            );
            return false;
        }

        self.loading_messages = false;
        match messages {
            Ok(messages) => self.messages = messages,
            Err(err) => {
                tracing::warn!(error = %err, conversation_id = ticket.conversation_id, "failed to load messages");
                self.notice = Some(err.to_string());
            }
        }
        true
    }

    pub async fn select(&mut self, backend: &dyn Backend, conversation_id: i64) -> bool {
        let ticket = self.begin_select(conversation_id);
        let messages = backend.list_messages(conversation_id).await;
        self.finish_select(ticket, messages)
    }

    /// Sends the draft as an agent reply to the selected conversation.
    /// `Ok(None)` when there is nothing to send or nowhere to send it.
    pub async fn send(&mut self, backend: &dyn Backend) -> AppResult<Option<Message>> {
        let Some(conversation_id) = self.selected else {
            return Ok(None);
        };
        if self.draft.trim().is_empty() {
            return Ok(None);
        }

        let result = backend
            .insert_message(NewMessage {
                conversation_id,
                content: self.draft.clone(),
                sender_type: SenderType::Agent,
            })
            .await;

        match result {
            Ok(message) => {
                if self.selected == Some(message.conversation_id)
                    && !self.messages.iter().any(|m| m.id == message.id)
                {
                    self.messages.push(message.clone());
                }
                self.draft.clear();
                Ok(Some(message))
            }
            Err(err) => {
                tracing::warn!(error = %err, conversation_id, "failed to send message");
                self.notice = Some(err.to_string());
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(id: i64, conversation_id: i64) -> Message {
        Message {
            id,
            content: Some(format!("message {id}")),
            sender_type: SenderType::Customer,
            sent_at: Utc::now(),
            conversation_id,
        }
    }

    #[test]
    fn stale_selection_results_are_dropped() {
        let mut view = InboxView::new();
        let first = view.begin_select(1);
        let second = view.begin_select(2);

        assert!(view.finish_select(second, Ok(vec![message(20, 2)])));
        assert!(!view.finish_select(first, Ok(vec![message(10, 1)])));

        assert_eq!(view.selected_id(), Some(2));
        assert_eq!(view.messages().len(), 1);
        assert_eq!(view.messages()[0].id, 20);
        assert_eq!(view.scroll_anchor(), Some(20));
    }

    #[test]
    fn display_fallbacks() {
        let conversation = ConversationSummary {
            id: 1,
            subject: None,
            status: "open".into(),
            customer_id: 9,
            customer_name: None,
        };
        assert_eq!(conversation.display_name(), UNKNOWN_CUSTOMER);
        assert_eq!(conversation.display_subject(), NO_SUBJECT);
    }
}
