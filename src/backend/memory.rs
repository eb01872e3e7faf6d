//! In-process backend with the same contract as the Postgres one.
//!
//! Used by tests and local runs. It enforces the same keys as the schema
//! (`(marketplace_id, platform_customer_id)`, `platform_order_id`), publishes
//! change events for every write, records each call, and can be told to fail
//! a given operation.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use super::{
    Backend,
    realtime::{ChangeEvent, EventFilter, SUBSCRIPTION_CAPACITY, Subscription, Table},
};
use crate::{
    dto::{
        customers::{CustomerDraft, CustomerUpsert},
        inbox::NewMessage,
        orders::OrderUpsert,
    },
    error::{AppError, AppResult},
    models::{ConversationSummary, Customer, Marketplace, Message, Order, SenderType},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListCustomers,
    ListMarketplaces,
    InsertCustomer,
    UpdateCustomer,
    DeleteCustomer,
    UpsertCustomer,
    UpsertOrder,
    ListOrders,
    ListConversations,
    ListMessages,
    InsertMessage,
    Subscribe,
}

#[derive(Debug)]
struct Fault {
    operation: Operation,
    remaining_ok: usize,
    message: String,
}

#[derive(Debug, Clone)]
struct ConversationRecord {
    id: i64,
    subject: Option<String>,
    status: String,
    customer_id: i64,
}

#[derive(Debug, Default)]
struct Tables {
    marketplaces: Vec<Marketplace>,
    customers: Vec<Customer>,
    conversations: Vec<ConversationRecord>,
    messages: Vec<Message>,
    orders: Vec<Order>,
    last_id: i64,
    faults: Vec<Fault>,
    calls: Vec<Operation>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    /// Records the call and trips any fault armed for it.
    fn begin(&mut self, operation: Operation) -> AppResult<()> {
        self.calls.push(operation);
        if let Some(fault) = self.faults.iter_mut().find(|f| f.operation == operation) {
            if fault.remaining_ok > 0 {
                fault.remaining_ok -= 1;
            } else {
                return Err(AppError::Backend(fault.message.clone()));
            }
        }
        Ok(())
    }

    fn require_marketplace(&self, id: i64) -> AppResult<()> {
        if self.marketplaces.iter().any(|m| m.id == id) {
            Ok(())
        } else {
            Err(AppError::Backend(format!(
                "insert or update on table \"customers\" violates foreign key constraint: marketplace {id} does not exist"
            )))
        }
    }

    fn require_unique_platform_id(
        &self,
        marketplace_id: i64,
        platform_customer_id: Option<&str>,
        except: Option<i64>,
    ) -> AppResult<()> {
        let Some(platform_customer_id) = platform_customer_id else {
            return Ok(());
        };
        let clash = self.customers.iter().any(|c| {
            Some(c.id) != except
                && c.marketplace_id == marketplace_id
                && c.platform_customer_id.as_deref() == Some(platform_customer_id)
        });
        if clash {
            return Err(AppError::Backend(
                "duplicate key value violates unique constraint \"customers_marketplace_platform_key\""
                    .into(),
            ));
        }
        Ok(())
    }
}

pub struct MemoryBackend {
    tables: Mutex<Tables>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(SUBSCRIPTION_CAPACITY);
        Self {
            tables: Mutex::new(Tables::default()),
            changes,
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish<T: Serialize>(
        &self,
        table: Table,
        old: Option<&T>,
        new: Option<&T>,
    ) -> AppResult<()> {
        let old = old.map(serde_json::to_value).transpose()?;
        let new = new.map(serde_json::to_value).transpose()?;
        let event = match (old, new) {
            (None, Some(new)) => ChangeEvent::insert(table, new),
            (Some(old), Some(new)) => ChangeEvent::update(table, old, new),
            (Some(old), None) => ChangeEvent::delete(table, old),
            (None, None) => return Ok(()),
        };
        // No receivers is not an error: nobody is watching.
        let _ = self.changes.send(event);
        Ok(())
    }

    /// Makes `operation` fail with `message` after `remaining_ok` more
    /// successful calls.
    pub fn inject_fault(&self, operation: Operation, remaining_ok: usize, message: impl Into<String>) {
        let mut tables = self.tables();
        tables.faults.retain(|f| f.operation != operation);
        tables.faults.push(Fault {
            operation,
            remaining_ok,
            message: message.into(),
        });
    }

    pub fn clear_faults(&self) {
        self.tables().faults.clear();
    }

    pub fn calls(&self) -> Vec<Operation> {
        self.tables().calls.clone()
    }

    pub fn call_count(&self, operation: Operation) -> usize {
        self.tables()
            .calls
            .iter()
            .filter(|op| **op == operation)
            .count()
    }

    pub fn add_marketplace(&self, name: &str) -> Marketplace {
        let mut tables = self.tables();
        let marketplace = Marketplace {
            id: tables.next_id(),
            name: name.to_string(),
        };
        tables.marketplaces.push(marketplace.clone());
        marketplace
    }

    /// Inserts a marketplace with a fixed id, as reference data is seeded.
    pub fn add_marketplace_with_id(&self, id: i64, name: &str) -> Marketplace {
        let mut tables = self.tables();
        tables.last_id = tables.last_id.max(id);
        let marketplace = Marketplace {
            id,
            name: name.to_string(),
        };
        tables.marketplaces.push(marketplace.clone());
        marketplace
    }

    pub fn add_conversation(
        &self,
        customer_id: i64,
        subject: Option<&str>,
        status: &str,
    ) -> ConversationSummary {
        let mut tables = self.tables();
        let record = ConversationRecord {
            id: tables.next_id(),
            subject: subject.map(str::to_string),
            status: status.to_string(),
            customer_id,
        };
        tables.conversations.push(record.clone());
        summarize(&tables, &record)
    }

    pub fn add_message(
        &self,
        conversation_id: i64,
        content: &str,
        sender_type: SenderType,
        sent_at: DateTime<Utc>,
    ) -> Message {
        let mut tables = self.tables();
        let message = Message {
            id: tables.next_id(),
            content: Some(content.to_string()),
            sender_type,
            sent_at,
            conversation_id,
        };
        tables.messages.push(message.clone());
        message
    }
}

fn summarize(tables: &Tables, record: &ConversationRecord) -> ConversationSummary {
    let customer_name = tables
        .customers
        .iter()
        .find(|c| c.id == record.customer_id)
        .map(|c| c.full_name.clone());
    ConversationSummary {
        id: record.id,
        subject: record.subject.clone(),
        status: record.status.clone(),
        customer_id: record.customer_id,
        customer_name,
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn list_customers(&self) -> AppResult<Vec<Customer>> {
        let mut tables = self.tables();
        tables.begin(Operation::ListCustomers)?;
        let mut customers = tables.customers.clone();
        customers.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(customers)
    }

    async fn list_marketplaces(&self) -> AppResult<Vec<Marketplace>> {
        let mut tables = self.tables();
        tables.begin(Operation::ListMarketplaces)?;
        Ok(tables.marketplaces.clone())
    }

    async fn insert_customer(&self, draft: CustomerDraft) -> AppResult<Customer> {
        let customer = {
            let mut tables = self.tables();
            tables.begin(Operation::InsertCustomer)?;
            tables.require_marketplace(draft.marketplace_id)?;
            tables.require_unique_platform_id(
                draft.marketplace_id,
                draft.platform_customer_id.as_deref(),
                None,
            )?;
            let customer = Customer {
                id: tables.next_id(),
                created_at: Utc::now(),
                full_name: draft.full_name,
                email: draft.email,
                phone: draft.phone,
                source: draft.source,
                marketplace_id: draft.marketplace_id,
                platform_customer_id: draft.platform_customer_id,
            };
            tables.customers.push(customer.clone());
            customer
        };
        self.publish(Table::Customers, None, Some(&customer))?;
        Ok(customer)
    }

    async fn update_customer(&self, id: i64, draft: CustomerDraft) -> AppResult<Customer> {
        let (old, new) = {
            let mut tables = self.tables();
            tables.begin(Operation::UpdateCustomer)?;
            tables.require_marketplace(draft.marketplace_id)?;
            let index = tables
                .customers
                .iter()
                .position(|c| c.id == id)
                .ok_or(AppError::NotFound)?;
            let platform_customer_id = draft
                .platform_customer_id
                .or_else(|| tables.customers[index].platform_customer_id.clone());
            tables.require_unique_platform_id(
                draft.marketplace_id,
                platform_customer_id.as_deref(),
                Some(id),
            )?;
            let old = tables.customers[index].clone();
            let new = Customer {
                full_name: draft.full_name,
                email: draft.email,
                phone: draft.phone,
                source: draft.source,
                marketplace_id: draft.marketplace_id,
                platform_customer_id,
                ..old.clone()
            };
            tables.customers[index] = new.clone();
            (old, new)
        };
        self.publish(Table::Customers, Some(&old), Some(&new))?;
        Ok(new)
    }

    async fn delete_customer(&self, id: i64) -> AppResult<()> {
        let removed = {
            let mut tables = self.tables();
            tables.begin(Operation::DeleteCustomer)?;
            let index = tables
                .customers
                .iter()
                .position(|c| c.id == id)
                .ok_or(AppError::NotFound)?;
            let removed = tables.customers.remove(index);
            let conversation_ids: Vec<i64> = tables
                .conversations
                .iter()
                .filter(|c| c.customer_id == id)
                .map(|c| c.id)
                .collect();
            tables.conversations.retain(|c| c.customer_id != id);
            tables
                .messages
                .retain(|m| !conversation_ids.contains(&m.conversation_id));
            tables.orders.retain(|o| o.customer_id != id);
            removed
        };
        self.publish(Table::Customers, Some(&removed), None)?;
        Ok(())
    }

    async fn upsert_customer(&self, upsert: CustomerUpsert) -> AppResult<Customer> {
        let (old, new) = {
            let mut tables = self.tables();
            tables.begin(Operation::UpsertCustomer)?;
            tables.require_marketplace(upsert.marketplace_id)?;
            let existing = tables.customers.iter().position(|c| {
                c.marketplace_id == upsert.marketplace_id
                    && c.platform_customer_id.as_deref() == Some(upsert.platform_customer_id.as_str())
            });
            match existing {
                Some(index) => {
                    let old = tables.customers[index].clone();
                    let new = Customer {
                        full_name: upsert.full_name,
                        email: upsert.email,
                        ..old.clone()
                    };
                    tables.customers[index] = new.clone();
                    (Some(old), new)
                }
                None => {
                    let new = Customer {
                        id: tables.next_id(),
                        created_at: Utc::now(),
                        full_name: upsert.full_name,
                        email: upsert.email,
                        phone: None,
                        source: None,
                        marketplace_id: upsert.marketplace_id,
                        platform_customer_id: Some(upsert.platform_customer_id),
                    };
                    tables.customers.push(new.clone());
                    (None, new)
                }
            }
        };
        self.publish(Table::Customers, old.as_ref(), Some(&new))?;
        Ok(new)
    }

    async fn upsert_order(&self, upsert: OrderUpsert) -> AppResult<Order> {
        let (old, new) = {
            let mut tables = self.tables();
            tables.begin(Operation::UpsertOrder)?;
            if !tables.customers.iter().any(|c| c.id == upsert.customer_id) {
                return Err(AppError::Backend(format!(
                    "insert or update on table \"orders\" violates foreign key constraint: customer {} does not exist",
                    upsert.customer_id
                )));
            }
            let existing = tables
                .orders
                .iter()
                .position(|o| o.platform_order_id == upsert.platform_order_id);
            match existing {
                Some(index) => {
                    let old = tables.orders[index].clone();
                    let new = Order {
                        id: old.id,
                        platform_order_id: upsert.platform_order_id,
                        customer_id: upsert.customer_id,
                        marketplace_id: upsert.marketplace_id,
                        status: upsert.status,
                        order_date: upsert.order_date,
                        order_details: upsert.order_details,
                    };
                    tables.orders[index] = new.clone();
                    (Some(old), new)
                }
                None => {
                    let new = Order {
                        id: tables.next_id(),
                        platform_order_id: upsert.platform_order_id,
                        customer_id: upsert.customer_id,
                        marketplace_id: upsert.marketplace_id,
                        status: upsert.status,
                        order_date: upsert.order_date,
                        order_details: upsert.order_details,
                    };
                    tables.orders.push(new.clone());
                    (None, new)
                }
            }
        };
        self.publish(Table::Orders, old.as_ref(), Some(&new))?;
        Ok(new)
    }

    async fn list_orders(&self) -> AppResult<Vec<Order>> {
        let mut tables = self.tables();
        tables.begin(Operation::ListOrders)?;
        let mut orders = tables.orders.clone();
        orders.sort_by(|a, b| b.order_date.cmp(&a.order_date));
        Ok(orders)
    }

    async fn list_conversations(&self) -> AppResult<Vec<ConversationSummary>> {
        let mut tables = self.tables();
        tables.begin(Operation::ListConversations)?;
        Ok(tables
            .conversations
            .iter()
            .map(|record| summarize(&tables, record))
            .collect())
    }

    async fn list_messages(&self, conversation_id: i64) -> AppResult<Vec<Message>> {
        let mut tables = self.tables();
        tables.begin(Operation::ListMessages)?;
        let mut messages: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then(a.id.cmp(&b.id)));
        Ok(messages)
    }

    async fn insert_message(&self, message: NewMessage) -> AppResult<Message> {
        let inserted = {
            let mut tables = self.tables();
            tables.begin(Operation::InsertMessage)?;
            if !tables
                .conversations
                .iter()
                .any(|c| c.id == message.conversation_id)
            {
                return Err(AppError::Backend(format!(
                    "insert or update on table \"messages\" violates foreign key constraint: conversation {} does not exist",
                    message.conversation_id
                )));
            }
            let inserted = Message {
                id: tables.next_id(),
                content: Some(message.content),
                sender_type: message.sender_type,
                sent_at: Utc::now(),
                conversation_id: message.conversation_id,
            };
            tables.messages.push(inserted.clone());
            inserted
        };
        self.publish(Table::Messages, None, Some(&inserted))?;
        Ok(inserted)
    }

    async fn subscribe(&self, table: Table, filter: EventFilter) -> AppResult<Subscription> {
        self.tables().begin(Operation::Subscribe)?;
        Ok(Subscription::new(table, filter, self.changes.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EventType;

    fn draft(marketplace_id: i64, platform_customer_id: Option<&str>) -> CustomerDraft {
        CustomerDraft {
            full_name: "Ayse Yilmaz".into(),
            email: "ayse@example.com".into(),
            phone: None,
            source: None,
            marketplace_id,
            platform_customer_id: platform_customer_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn rejects_duplicate_platform_customer_id() {
        let backend = MemoryBackend::new();
        let marketplace = backend.add_marketplace("Trendyol");

        backend
            .insert_customer(draft(marketplace.id, Some("manual-1")))
            .await
            .expect("first insert");
        let err = backend
            .insert_customer(draft(marketplace.id, Some("manual-1")))
            .await
            .expect_err("duplicate key");
        assert!(err.to_string().contains("duplicate key"));

        // unset platform ids never clash
        backend.insert_customer(draft(marketplace.id, None)).await.unwrap();
        backend.insert_customer(draft(marketplace.id, None)).await.unwrap();
    }

    #[tokio::test]
    async fn fault_trips_after_remaining_successes() {
        let backend = MemoryBackend::new();
        backend.inject_fault(Operation::ListMarketplaces, 1, "boom");

        assert!(backend.list_marketplaces().await.is_ok());
        let err = backend.list_marketplaces().await.expect_err("fault");
        assert_eq!(err.to_string(), "boom");
        assert_eq!(backend.call_count(Operation::ListMarketplaces), 2);

        backend.clear_faults();
        assert!(backend.list_marketplaces().await.is_ok());
    }

    #[tokio::test]
    async fn writes_publish_change_events() {
        let backend = MemoryBackend::new();
        let marketplace = backend.add_marketplace("Hepsiburada");
        let mut sub = backend
            .subscribe(Table::Customers, EventFilter::All)
            .await
            .unwrap();

        let customer = backend
            .insert_customer(draft(marketplace.id, None))
            .await
            .unwrap();
        backend.delete_customer(customer.id).await.unwrap();

        let inserted = sub.try_next().expect("insert event");
        assert_eq!(inserted.row_id(), Some(customer.id));
        let deleted = sub.try_next().expect("delete event");
        assert_eq!(deleted.event_type, EventType::Delete);
        assert_eq!(deleted.row_id(), Some(customer.id));
    }
}
