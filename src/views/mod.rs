pub mod customers;
pub mod inbox;

pub use customers::{CustomerForm, CustomerRow, CustomerView};
pub use inbox::InboxView;
