pub mod catalog;
pub mod order_status;
pub mod orders;
pub mod payments;
