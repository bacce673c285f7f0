pub mod auth;
pub mod models;
pub mod upbit_client;

pub use upbit_client::UpbitClient;
