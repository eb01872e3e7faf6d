use utoipa::{OpenApi, openapi::OpenApi as OpenApiSpec};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        customers::{CustomerDraft, CustomerUpsert},
        inbox::NewMessage,
        orders::OrderUpsert,
        sync::SyncResponse,
    },
    error::ErrorBody,
    models::{ConversationSummary, Customer, Marketplace, Message, Order, OrderDetails, ProductLine, SenderType},
    response::{ApiResponse, Meta},
    routes::{functions, health},
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        functions::sync_marketplace_data,
    ),
    components(
        schemas(
            Marketplace,
            Customer,
            ConversationSummary,
            Message,
            SenderType,
            Order,
            OrderDetails,
            ProductLine,
            CustomerDraft,
            CustomerUpsert,
            OrderUpsert,
            NewMessage,
            SyncResponse,
            ErrorBody,
            health::HealthData,
            health::BackendHealth,
            Meta,
            ApiResponse<health::HealthData>
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Functions", description = "Serverless function endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
