pub mod address;
pub mod cart_item;
pub mod guest_user;
pub mod order;
pub mod order_item;
pub mod product_item;
pub mod status;
