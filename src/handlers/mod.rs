pub mod identity;
pub mod orders;
pub mod payments;
