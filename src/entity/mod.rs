pub mod conversations;
pub mod customers;
pub mod marketplaces;
pub mod messages;
pub mod orders;

pub use conversations::Entity as Conversations;
pub use customers::Entity as Customers;
pub use marketplaces::Entity as Marketplaces;
pub use messages::Entity as Messages;
pub use orders::Entity as Orders;
