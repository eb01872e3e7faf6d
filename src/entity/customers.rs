use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "customers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub created_at: DateTimeWithTimeZone,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub source: Option<String>,
    pub marketplace_id: i64,
    pub platform_customer_id: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::marketplaces::Entity",
        from = "Column::MarketplaceId",
        to = "super::marketplaces::Column::Id"
    )]
    Marketplaces,
    #[sea_orm(has_many = "super::conversations::Entity")]
    Conversations,
    #[sea_orm(has_many = "super::orders::Entity")]
    Orders,
}

impl Related<super::marketplaces::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Marketplaces.def()
    }
}

impl Related<super::conversations::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Conversations.def()
    }
}

impl Related<super::orders::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
