pub mod api_key_man;
pub mod balance;
pub mod tick;
