pub mod assembler;
pub mod cart;
pub mod pricing;
pub mod reconciliation;
pub mod stock;
