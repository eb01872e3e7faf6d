use chrono::{Duration, Utc};
use marketplace_crm::{
    config::{AppConfig, CredentialTier},
    db::{create_orm_conn, run_migrations},
    entity::{
        conversations::ActiveModel as ConversationActive,
        messages::ActiveModel as MessageActive,
    },
    models::SenderType,
};
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DatabaseConnection, Set, Statement, Value,
    ActiveValue::NotSet,
};

// Marketplace ids are fixed: synced orders refer to them by id.
const MARKETPLACES: [(i64, &str); 3] = [(1, "Trendyol"), (2, "Hepsiburada"), (3, "Manual")];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = create_orm_conn(config.url_for(CredentialTier::Service)).await?;
    // Ensure migrations are applied.
    run_migrations(&orm).await?;

    seed_marketplaces(&orm).await?;
    let customer_id = ensure_customer(&orm, "seed-customer-1", "Ayse Demir", "ayse.demir@example.com").await?;
    let conversation_id = seed_conversation(&orm, customer_id).await?;

    println!("Seed completed. Customer ID: {customer_id}, Conversation ID: {conversation_id}");
    Ok(())
}

async fn seed_marketplaces(orm: &DatabaseConnection) -> anyhow::Result<()> {
    let backend = orm.get_database_backend();
    for (id, name) in MARKETPLACES {
        orm.execute(Statement::from_sql_and_values(
            backend,
            r#"
            INSERT INTO marketplaces (id, name)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
            "#,
            [Value::from(id), Value::from(name)],
        ))
        .await?;
    }
    // keep the identity sequence ahead of the fixed ids
    orm.execute(Statement::from_string(
        backend,
        "SELECT setval(pg_get_serial_sequence('marketplaces', 'id'), (SELECT MAX(id) FROM marketplaces))",
    ))
    .await?;
    Ok(())
}

async fn ensure_customer(
    orm: &DatabaseConnection,
    platform_customer_id: &str,
    full_name: &str,
    email: &str,
) -> anyhow::Result<i64> {
    let backend = orm.get_database_backend();
    let row = orm
        .query_one(Statement::from_sql_and_values(
            backend,
            r#"
            INSERT INTO customers (full_name, email, source, marketplace_id, platform_customer_id)
            VALUES ($1, $2, 'seed', 3, $3)
            ON CONFLICT (marketplace_id, platform_customer_id)
            DO UPDATE SET full_name = EXCLUDED.full_name, email = EXCLUDED.email
            RETURNING id
            "#,
            [Value::from(full_name), Value::from(email), Value::from(platform_customer_id)],
        ))
        .await?
        .ok_or_else(|| anyhow::anyhow!("customer upsert returned no row"))?;
    Ok(row.try_get::<i64>("", "id")?)
}

async fn seed_conversation(orm: &DatabaseConnection, customer_id: i64) -> anyhow::Result<i64> {
    let conversation = ConversationActive {
        id: NotSet,
        subject: Set(Some("Where is my order?".into())),
        status: Set("open".into()),
        customer_id: Set(customer_id),
    }
    .insert(orm)
    .await?;

    let now = Utc::now();
    let thread = [
        (SenderType::Customer, "Hello, my order has not arrived yet.", now - Duration::minutes(30)),
        (SenderType::Agent, "Sorry about that! Let me check the shipment.", now - Duration::minutes(20)),
        (SenderType::Customer, "Thank you.", now - Duration::minutes(10)),
    ];
    for (sender, content, sent_at) in thread {
        MessageActive {
            id: NotSet,
            content: Set(Some(content.into())),
            sender_type: Set(sender.as_str().to_string()),
            sent_at: Set(sent_at.into()),
            conversation_id: Set(conversation.id),
        }
        .insert(orm)
        .await?;
    }

    Ok(conversation.id)
}
