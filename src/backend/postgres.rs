use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
    ActiveValue::NotSet,
    sea_query::OnConflict,
};
use sqlx::postgres::PgListener;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{OnceCell, broadcast},
    task::JoinHandle,
};

use super::{
    Backend,
    realtime::{CHANGE_CHANNEL, ChangeEvent, EventFilter, SUBSCRIPTION_CAPACITY, Subscription, Table},
};
use crate::{
    dto::{
        customers::{CustomerDraft, CustomerUpsert},
        inbox::NewMessage,
        orders::OrderUpsert,
    },
    entity::{
        conversations::{Entity as Conversations, Model as ConversationModel},
        customers::{
            ActiveModel as CustomerActive, Column as CustomerCol, Entity as Customers,
            Model as CustomerModel,
        },
        marketplaces::{Column as MarketplaceCol, Entity as Marketplaces},
        messages::{
            ActiveModel as MessageActive, Column as MessageCol, Entity as Messages,
            Model as MessageModel,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
    },
    error::{AppError, AppResult},
    models::{ConversationSummary, Customer, Marketplace, Message, Order, SenderType},
};

const LISTENER_RETRY: Duration = Duration::from_secs(1);

/// Backend implementation talking to PostgreSQL through SeaORM, with
/// realtime fed by `LISTEN crm_changes`.
///
/// Clones share the pool and a single listener connection, however many
/// subscriptions are open.
#[derive(Clone)]
pub struct PgBackend {
    orm: DatabaseConnection,
    feed: Arc<OnceCell<ChangeFeed>>,
}

struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
    listener: JoinHandle<()>,
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

impl PgBackend {
    pub fn new(orm: DatabaseConnection) -> Self {
        Self {
            orm,
            feed: Arc::new(OnceCell::new()),
        }
    }

    pub fn orm(&self) -> &DatabaseConnection {
        &self.orm
    }

    /// Starts `LISTEN` on first use.
    async fn change_feed(&self) -> AppResult<&ChangeFeed> {
        self.feed
            .get_or_try_init(|| async {
                let mut listener =
                    PgListener::connect_with(self.orm.get_postgres_connection_pool()).await?;
                listener.listen(CHANGE_CHANNEL).await?;

                let (tx, _) = broadcast::channel(SUBSCRIPTION_CAPACITY);
                let listener = tokio::spawn(forward_notifications(listener, tx.clone()));
                tracing::info!(channel = CHANGE_CHANNEL, "realtime change feed started");
                Ok::<_, AppError>(ChangeFeed { tx, listener })
            })
            .await
    }
}

async fn forward_notifications(mut listener: PgListener, tx: broadcast::Sender<ChangeEvent>) {
    loop {
        let notification = match listener.recv().await {
            Ok(n) => n,
            Err(err) => {
                // recv reconnects on the next call
                tracing::error!(error = %err, "realtime listener lost its connection");
                tokio::time::sleep(LISTENER_RETRY).await;
                continue;
            }
        };
        match ChangeEvent::from_payload(notification.payload()) {
            // no receivers is fine; subscriptions come and go
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(err) => {
                tracing::warn!(error = %err, "discarding malformed change notification");
            }
        }
    }
}

#[async_trait]
impl Backend for PgBackend {
    async fn list_customers(&self) -> AppResult<Vec<Customer>> {
        let customers = Customers::find()
            .order_by_desc(CustomerCol::CreatedAt)
            .order_by_desc(CustomerCol::Id)
            .all(&self.orm)
            .await?
            .into_iter()
            .map(customer_from_entity)
            .collect();
        Ok(customers)
    }

    async fn list_marketplaces(&self) -> AppResult<Vec<Marketplace>> {
        let rows: Vec<(i64, String)> = Marketplaces::find()
            .select_only()
            .column(MarketplaceCol::Id)
            .column(MarketplaceCol::Name)
            .order_by_asc(MarketplaceCol::Id)
            .into_tuple()
            .all(&self.orm)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name)| Marketplace { id, name })
            .collect())
    }

    async fn insert_customer(&self, draft: CustomerDraft) -> AppResult<Customer> {
        let active = CustomerActive {
            id: NotSet,
            created_at: NotSet,
            full_name: Set(draft.full_name),
            email: Set(draft.email),
            phone: Set(draft.phone),
            source: Set(draft.source),
            marketplace_id: Set(draft.marketplace_id),
            platform_customer_id: Set(draft.platform_customer_id),
        };
        let customer = active.insert(&self.orm).await?;
        Ok(customer_from_entity(customer))
    }

    async fn update_customer(&self, id: i64, draft: CustomerDraft) -> AppResult<Customer> {
        let existing = Customers::find_by_id(id).one(&self.orm).await?;
        let existing = match existing {
            Some(c) => c,
            None => return Err(AppError::NotFound),
        };

        let mut active: CustomerActive = existing.into();
        active.full_name = Set(draft.full_name);
        active.email = Set(draft.email);
        active.phone = Set(draft.phone);
        active.source = Set(draft.source);
        active.marketplace_id = Set(draft.marketplace_id);
        if let Some(platform_customer_id) = draft.platform_customer_id {
            active.platform_customer_id = Set(Some(platform_customer_id));
        }

        let customer = active.update(&self.orm).await?;
        Ok(customer_from_entity(customer))
    }

    async fn delete_customer(&self, id: i64) -> AppResult<()> {
        let result = Customers::delete_by_id(id).exec(&self.orm).await?;
        if result.rows_affected == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn upsert_customer(&self, customer: CustomerUpsert) -> AppResult<Customer> {
        let active = CustomerActive {
            id: NotSet,
            created_at: NotSet,
            full_name: Set(customer.full_name),
            email: Set(customer.email),
            phone: NotSet,
            source: NotSet,
            marketplace_id: Set(customer.marketplace_id),
            platform_customer_id: Set(Some(customer.platform_customer_id)),
        };
        let model = Customers::insert(active)
            .on_conflict(
                OnConflict::columns([CustomerCol::MarketplaceId, CustomerCol::PlatformCustomerId])
                    .update_columns([CustomerCol::FullName, CustomerCol::Email])
                    .to_owned(),
            )
            .exec_with_returning(&self.orm)
            .await?;
        Ok(customer_from_entity(model))
    }

    async fn upsert_order(&self, order: OrderUpsert) -> AppResult<Order> {
        let active = OrderActive {
            id: NotSet,
            platform_order_id: Set(order.platform_order_id),
            customer_id: Set(order.customer_id),
            marketplace_id: Set(order.marketplace_id),
            status: Set(order.status),
            order_date: Set(order.order_date.into()),
            order_details: Set(serde_json::to_value(&order.order_details)?),
        };
        let model = Orders::insert(active)
            .on_conflict(
                OnConflict::column(OrderCol::PlatformOrderId)
                    .update_columns([
                        OrderCol::CustomerId,
                        OrderCol::MarketplaceId,
                        OrderCol::Status,
                        OrderCol::OrderDate,
                        OrderCol::OrderDetails,
                    ])
                    .to_owned(),
            )
            .exec_with_returning(&self.orm)
            .await?;
        order_from_entity(model)
    }

    async fn list_orders(&self) -> AppResult<Vec<Order>> {
        Orders::find()
            .order_by_desc(OrderCol::OrderDate)
            .all(&self.orm)
            .await?
            .into_iter()
            .map(order_from_entity)
            .collect()
    }

    async fn list_conversations(&self) -> AppResult<Vec<ConversationSummary>> {
        let rows = Conversations::find()
            .find_also_related(Customers)
            .all(&self.orm)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(conversation, customer)| conversation_from_entity(conversation, customer))
            .collect())
    }

    async fn list_messages(&self, conversation_id: i64) -> AppResult<Vec<Message>> {
        Messages::find()
            .filter(MessageCol::ConversationId.eq(conversation_id))
            .order_by_asc(MessageCol::SentAt)
            .order_by_asc(MessageCol::Id)
            .all(&self.orm)
            .await?
            .into_iter()
            .map(message_from_entity)
            .collect()
    }

    async fn insert_message(&self, message: NewMessage) -> AppResult<Message> {
        let active = MessageActive {
            id: NotSet,
            content: Set(Some(message.content)),
            sender_type: Set(message.sender_type.as_str().to_string()),
            sent_at: NotSet,
            conversation_id: Set(message.conversation_id),
        };
        let model = active.insert(&self.orm).await?;
        message_from_entity(model)
    }

    async fn subscribe(&self, table: Table, filter: EventFilter) -> AppResult<Subscription> {
        let feed = self.change_feed().await?;
        tracing::debug!(table = table.as_str(), "realtime subscription opened");
        Ok(Subscription::new(table, filter, feed.tx.subscribe()))
    }
}

fn customer_from_entity(model: CustomerModel) -> Customer {
    Customer {
        id: model.id,
        created_at: model.created_at.with_timezone(&Utc),
        full_name: model.full_name,
        email: model.email,
        phone: model.phone,
        source: model.source,
        marketplace_id: model.marketplace_id,
        platform_customer_id: model.platform_customer_id,
    }
}

fn conversation_from_entity(
    model: ConversationModel,
    customer: Option<CustomerModel>,
) -> ConversationSummary {
    ConversationSummary {
        id: model.id,
        subject: model.subject,
        status: model.status,
        customer_id: model.customer_id,
        customer_name: customer.map(|c| c.full_name),
    }
}

fn message_from_entity(model: MessageModel) -> AppResult<Message> {
    let sender_type = SenderType::parse(&model.sender_type).ok_or_else(|| {
        AppError::Backend(format!("unknown sender_type {:?}", model.sender_type))
    })?;
    Ok(Message {
        id: model.id,
        content: model.content,
        sender_type,
        sent_at: model.sent_at.with_timezone(&Utc),
        conversation_id: model.conversation_id,
    })
}

fn order_from_entity(model: OrderModel) -> AppResult<Order> {
    Ok(Order {
        id: model.id,
        platform_order_id: model.platform_order_id,
        customer_id: model.customer_id,
        marketplace_id: model.marketplace_id,
        status: model.status,
        order_date: model.order_date.with_timezone(&Utc),
        order_details: serde_json::from_value(model.order_details)?,
    })
}
