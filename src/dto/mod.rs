pub mod customers;
pub mod inbox;
pub mod orders;
pub mod sync;
