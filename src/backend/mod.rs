//! Client side of the managed backend: table reads, writes, keyed upserts
//! and realtime change subscriptions.

use async_trait::async_trait;

use crate::{
    dto::{
        customers::{CustomerDraft, CustomerUpsert},
        inbox::NewMessage,
        orders::OrderUpsert,
    },
    error::AppResult,
    models::{ConversationSummary, Customer, Marketplace, Message, Order},
};

pub mod client;
pub mod memory;
pub mod postgres;
pub mod realtime;

pub use client::BackendClient;
pub use memory::MemoryBackend;
pub use postgres::PgBackend;
pub use realtime::{ChangeEvent, EventFilter, EventType, Subscription, Table};

#[async_trait]
pub trait Backend: Send + Sync {
    /// All customers, newest `created_at` first.
    async fn list_customers(&self) -> AppResult<Vec<Customer>>;

    async fn list_marketplaces(&self) -> AppResult<Vec<Marketplace>>;

    async fn insert_customer(&self, draft: CustomerDraft) -> AppResult<Customer>;

    async fn update_customer(&self, id: i64, draft: CustomerDraft) -> AppResult<Customer>;

    async fn delete_customer(&self, id: i64) -> AppResult<()>;

    /// Insert-or-update keyed by `(marketplace_id, platform_customer_id)`.
    async fn upsert_customer(&self, customer: CustomerUpsert) -> AppResult<Customer>;

    /// Insert-or-update keyed by `platform_order_id`.
    async fn upsert_order(&self, order: OrderUpsert) -> AppResult<Order>;

    async fn list_orders(&self) -> AppResult<Vec<Order>>;

    /// Conversations with the owning customer's name embedded.
    async fn list_conversations(&self) -> AppResult<Vec<ConversationSummary>>;

    /// Messages of one conversation, oldest `sent_at` first.
    async fn list_messages(&self, conversation_id: i64) -> AppResult<Vec<Message>>;

    async fn insert_message(&self, message: NewMessage) -> AppResult<Message>;

    async fn subscribe(&self, table: Table, filter: EventFilter) -> AppResult<Subscription>;

    /// Whether the handle holds an open connection. Lazy handles report
    /// `false` until their first call.
    fn is_connected(&self) -> bool {
        true
    }
}
