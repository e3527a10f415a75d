pub mod cart_items;
pub mod movies;
pub mod order_items;
pub mod orders;
pub mod payments;
pub mod users;

pub use cart_items::Entity as CartItems;
pub use movies::Entity as Movies;
pub use order_items::Entity as OrderItems;
pub use orders::Entity as Orders;
pub use payments::Entity as Payments;
pub use users::Entity as Users;
