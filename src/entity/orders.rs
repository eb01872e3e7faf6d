use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub platform_order_id: String,
    pub customer_id: i64,
    pub marketplace_id: i64,
    pub status: String,
    pub order_date: DateTimeWithTimeZone,
    pub order_details: Json,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::customers::Entity",
        from = "Column::CustomerId",
        to = "super::customers::Column::Id"
    )]
    Customers,
    #[sea_orm(
        belongs_to = "super::marketplaces::Entity",
        from = "Column::MarketplaceId",
        to = "super::marketplaces::Column::Id"
    )]
    Marketplaces,
}

impl Related<super::customers::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customers.def()
    }
}

impl Related<super::marketplaces::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Marketplaces.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
