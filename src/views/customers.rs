//! Customer management screen: editable customer list bound to a form, kept
//! in step with the backend through the `customers` change feed.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::{
    backend::{
        Backend, ChangeEvent, EventFilter, EventType, Subscription, Table,
        realtime::SUBSCRIPTION_CAPACITY,
    },
    dto::customers::CustomerDraft,
    error::{AppError, AppResult},
    models::{Customer, Marketplace},
};

pub const UNKNOWN_MARKETPLACE: &str = "unknown";
pub const DELETE_PROMPT: &str = "Are you sure you want to delete this customer?";
pub const SELECT_MARKETPLACE: &str = "Please select a marketplace.";
pub const NAME_REQUIRED: &str = "Full name is required.";
pub const EMAIL_REQUIRED: &str = "Email is required.";

/// Events held back while a load is in flight; past this the snapshot is
/// considered stale instead.
const MAX_BUFFERED_CHANGES: usize = SUBSCRIPTION_CAPACITY;

static MANUAL_ID_SEQ: AtomicU64 = AtomicU64::new(0);

/// External id for a customer typed in by hand rather than synced from a
/// marketplace.
pub fn manual_platform_customer_id(now: DateTime<Utc>) -> String {
    let seq = MANUAL_ID_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("manual-{}-{}", now.timestamp_millis(), seq)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerForm {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub source: String,
    pub marketplace_id: Option<i64>,
}

/// One table row as displayed.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRow {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub marketplace: String,
    pub source: String,
}

/// Identifies one bulk load; only the newest ticket may land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket(u64);

#[derive(Debug, Default)]
pub struct CustomerView {
    customers: Vec<Customer>,
    marketplaces: Vec<Marketplace>,
    form: CustomerForm,
    editing_id: Option<i64>,
    loading: bool,
    notice: Option<String>,
    load_seq: u64,
    // change events that arrived while a bulk load was in flight
    buffered: Vec<ChangeEvent>,
    needs_reload: bool,
}

impl CustomerView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the change feed, then loads customers and marketplaces while
    /// applying any change that arrives in the meantime.
    pub async fn mount(backend: &dyn Backend) -> AppResult<(Self, Subscription)> {
        let mut view = Self::new();
        let mut subscription = backend
            .subscribe(Table::Customers, EventFilter::All)
            .await?;

        let ticket = view.begin_load();
        let fetch = async { tokio::join!(backend.list_customers(), backend.list_marketplaces()) };
        tokio::pin!(fetch);

        let (customers, marketplaces) = loop {
            tokio::select! {
                results = &mut fetch => break results,
                Some(event) = subscription.next() => view.apply_change(event),
            }
        };
        view.finish_load(ticket, customers, marketplaces);

        Ok((view, subscription))
    }

    pub fn customers(&self) -> &[Customer] {
        &self.customers
    }

    pub fn marketplaces(&self) -> &[Marketplace] {
        &self.marketplaces
    }

    pub fn form(&self) -> &CustomerForm {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut CustomerForm {
        &mut self.form
    }

    pub fn editing_id(&self) -> Option<i64> {
        self.editing_id
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Message the user has to acknowledge, if any.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn dismiss_notice(&mut self) -> Option<String> {
        self.notice.take()
    }

    /// Set when the local list may have missed a change (an oversized row
    /// event, or too many events during a load). Cleared by the next load.
    pub fn needs_reload(&self) -> bool {
        self.needs_reload
    }

    fn push_notice(&mut self, message: String) {
        self.notice = Some(match self.notice.take() {
            Some(existing) => format!("{existing}\n{message}"),
            None => message,
        });
    }

    pub async fn load(&mut self, backend: &dyn Backend) {
        let ticket = self.begin_load();
        let (customers, marketplaces) =
            tokio::join!(backend.list_customers(), backend.list_marketplaces());
        self.finish_load(ticket, customers, marketplaces);
    }

    /// Starts a bulk load, superseding any load still in flight. Events
    /// buffered for the superseded load are covered by the new snapshot.
    pub fn begin_load(&mut self) -> LoadTicket {
        self.load_seq += 1;
        self.loading = true;
        self.buffered.clear();
        LoadTicket(self.load_seq)
    }

    /// Lands a bulk load. Returns `false` when a newer load has started
    /// since `ticket` was issued; the results are then dropped.
    pub fn finish_load(
        &mut self,
        ticket: LoadTicket,
        customers: AppResult<Vec<Customer>>,
        marketplaces: AppResult<Vec<Marketplace>>,
    ) -> bool {
        if ticket.0 != self.load_seq {
            tracing::debug!(ticket = ticket.0, current = self.load_seq, "dropping stale customer load");
            return false;
        }

        match customers {
            Ok(customers) => {
                self.customers = customers;
                self.needs_reload = false;
            }
            Err(err) => self.push_notice(format!("Failed to load customers: {err}")),
        }
        match marketplaces {
            Ok(marketplaces) => self.marketplaces = marketplaces,
            Err(err) => self.push_notice(format!("Failed to load marketplaces: {err}")),
        }
        self.loading = false;

        for event in std::mem::take(&mut self.buffered) {
            self.apply_change(event);
        }
        true
    }

    /// Folds one realtime event into the local list.
    pub fn apply_change(&mut self, event: ChangeEvent) {
        if event.table != Table::Customers {
            return;
        }
        if self.loading {
            if self.buffered.len() < MAX_BUFFERED_CHANGES {
                self.buffered.push(event);
            } else {
                tracing::warn!("too many customer changes during load; marking list stale");
                self.needs_reload = true;
            }
            return;
        }

        match event.event_type {
            EventType::Insert | EventType::Update if event.truncated => {
                tracing::debug!(id = ?event.row_id(), "customer change without row image");
                self.needs_reload = true;
            }
            EventType::Insert | EventType::Update => {
                let customer = match event.decode::<Customer>().map(|e| e.new) {
                    Ok(Some(customer)) => customer,
                    Ok(None) => return,
                    Err(err) => {
                        tracing::warn!(error = %err, "ignoring undecodable customer change");
                        return;
                    }
                };
                if event.event_type == EventType::Insert {
                    self.upsert_local(customer);
                } else if let Some(slot) = self.customers.iter_mut().find(|c| c.id == customer.id) {
                    *slot = customer;
                }
            }
            EventType::Delete => {
                if let Some(id) = event.row_id() {
                    self.customers.retain(|c| c.id != id);
                }
            }
        }
    }

    /// Applies every event the subscription has already delivered.
    pub fn drain(&mut self, subscription: &mut Subscription) -> usize {
        let mut applied = 0;
        while let Some(event) = subscription.try_next() {
            self.apply_change(event);
            applied += 1;
        }
        applied
    }

    // Replaces the row with the same id, or puts a new row on top.
    fn upsert_local(&mut self, customer: Customer) {
        match self.customers.iter_mut().find(|c| c.id == customer.id) {
            Some(slot) => *slot = customer,
            None => self.customers.insert(0, customer),
        }
    }

    pub fn edit(&mut self, customer: &Customer) {
        self.form = CustomerForm {
            full_name: customer.full_name.clone(),
            email: customer.email.clone(),
            phone: customer.phone.clone().unwrap_or_default(),
            source: customer.source.clone().unwrap_or_default(),
            marketplace_id: Some(customer.marketplace_id),
        };
        self.editing_id = Some(customer.id);
    }

    pub fn reset_form(&mut self) {
        self.form = CustomerForm::default();
        self.editing_id = None;
    }

    /// Saves the form: update when editing, insert otherwise.
    pub async fn submit(&mut self, backend: &dyn Backend) -> AppResult<Customer> {
        let Some(marketplace_id) = self.form.marketplace_id else {
            let err = AppError::Validation(SELECT_MARKETPLACE.into());
            self.notice = Some(err.to_string());
            return Err(err);
        };

        let full_name = self.form.full_name.trim();
        let email = self.form.email.trim();
        let missing = if full_name.is_empty() {
            Some(NAME_REQUIRED)
        } else if email.is_empty() {
            Some(EMAIL_REQUIRED)
        } else {
            None
        };
        if let Some(message) = missing {
            let err = AppError::Validation(message.into());
            self.notice = Some(err.to_string());
            return Err(err);
        }

        let draft = CustomerDraft {
            full_name: full_name.to_string(),
            email: email.to_string(),
            phone: non_empty(&self.form.phone),
            source: non_empty(&self.form.source),
            marketplace_id,
            platform_customer_id: match self.editing_id {
                Some(_) => None,
                None => Some(manual_platform_customer_id(Utc::now())),
            },
        };

        let result = match self.editing_id {
            Some(id) => backend.update_customer(id, draft).await,
            None => backend.insert_customer(draft).await,
        };

        match result {
            Ok(customer) => {
                self.upsert_local(customer.clone());
                self.reset_form();
                Ok(customer)
            }
            Err(err) => {
                tracing::warn!(error = %err, editing_id = ?self.editing_id, "customer save failed");
                self.notice = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Deletes `id` after `confirm` approves. `Ok(false)` when declined.
    pub async fn delete(
        &mut self,
        backend: &dyn Backend,
        id: i64,
        confirm: impl FnOnce(&str) -> bool,
    ) -> AppResult<bool> {
        if !confirm(DELETE_PROMPT) {
            return Ok(false);
        }

        match backend.delete_customer(id).await {
            Ok(()) => {
                self.customers.retain(|c| c.id != id);
                Ok(true)
            }
            Err(err) => {
                tracing::warn!(error = %err, id, "customer delete failed");
                self.notice = Some(err.to_string());
                Err(err)
            }
        }
    }

    pub fn marketplace_name(&self, marketplace_id: i64) -> &str {
        self.marketplaces
            .iter()
            .find(|m| m.id == marketplace_id)
            .map(|m| m.name.as_str())
            .unwrap_or(UNKNOWN_MARKETPLACE)
    }

    pub fn rows(&self) -> Vec<CustomerRow> {
        self.customers
            .iter()
            .map(|c| CustomerRow {
                id: c.id,
                full_name: c.full_name.clone(),
                email: c.email.clone(),
                phone: c.phone.clone().unwrap_or_default(),
                marketplace: self.marketplace_name(c.marketplace_id).to_string(),
                source: c.source.clone().unwrap_or_default(),
            })
            .collect()
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn customer_json(id: i64, name: &str) -> serde_json::Value {
        json!({
            "id": id,
            "created_at": "2024-05-01T10:00:00+00:00",
            "full_name": name,
            "email": format!("{}@example.com", id),
            "phone": null,
            "source": null,
            "marketplace_id": 1,
            "platform_customer_id": null
        })
    }

    #[test]
    fn manual_ids_are_distinct_within_one_millisecond() {
        let now = Utc::now();
        let a = manual_platform_customer_id(now);
        let b = manual_platform_customer_id(now);
        assert!(a.starts_with("manual-"));
        assert_ne!(a, b);
    }

    #[test]
    fn insert_event_for_known_id_does_not_duplicate() {
        let mut view = CustomerView::new();
        view.apply_change(ChangeEvent::insert(Table::Customers, customer_json(1, "Ali")));
        view.apply_change(ChangeEvent::insert(Table::Customers, customer_json(1, "Ali V.")));
        assert_eq!(view.customers().len(), 1);
        assert_eq!(view.customers()[0].full_name, "Ali V.");
    }

    #[test]
    fn update_for_unknown_row_is_ignored() {
        let mut view = CustomerView::new();
        view.apply_change(ChangeEvent::update(
            Table::Customers,
            customer_json(5, "Old"),
            customer_json(5, "New"),
        ));
        assert!(view.customers().is_empty());
    }

    #[test]
    fn events_for_other_tables_are_ignored() {
        let mut view = CustomerView::new();
        view.apply_change(ChangeEvent::insert(Table::Orders, json!({ "id": 1 })));
        assert!(view.customers().is_empty());
    }

    #[test]
    fn oversized_row_event_marks_list_for_reload() {
        let mut view = CustomerView::new();
        let mut event = ChangeEvent::insert(Table::Customers, json!({ "id": 3 }));
        event.truncated = true;
        view.apply_change(event);
        assert!(view.customers().is_empty());
        assert!(view.needs_reload());

        let ticket = view.begin_load();
        view.finish_load(ticket, Ok(vec![]), Ok(vec![]));
        assert!(!view.needs_reload());
    }

    #[test]
    fn load_buffer_is_bounded() {
        let mut view = CustomerView::new();
        view.begin_load();
        for id in 0..(MAX_BUFFERED_CHANGES as i64 + 10) {
            view.apply_change(ChangeEvent::insert(Table::Customers, customer_json(id, "Ali")));
        }
        assert_eq!(view.buffered.len(), MAX_BUFFERED_CHANGES);
        assert!(view.needs_reload());
    }

    #[test]
    fn superseding_load_discards_earlier_buffer() {
        let mut view = CustomerView::new();
        view.begin_load();
        view.apply_change(ChangeEvent::insert(Table::Customers, customer_json(1, "Ali")));
        assert_eq!(view.buffered.len(), 1);

        let ticket = view.begin_load();
        assert!(view.buffered.is_empty());
        assert!(view.finish_load(ticket, Ok(vec![]), Ok(vec![])));
        assert!(view.customers().is_empty());
    }

    #[test]
    fn blank_optional_fields_are_not_sent() {
        assert_eq!(non_empty("   "), None);
        assert_eq!(non_empty(" 555 "), Some("555".to_string()));
    }
}
