pub mod order_source;
pub mod sync_service;
