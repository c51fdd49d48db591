pub mod call;
pub mod identity;
pub mod signal;
