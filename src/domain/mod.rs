pub mod listing;
pub mod signature;
