pub mod account_repository;
pub mod candle_repository;
pub mod daily_candle_repository;
pub mod database;
pub mod job_repository;
pub mod order_repository;
pub mod prediction_repository;

pub use account_repository::SqliteAccountRepository;
pub use candle_repository::SqliteCandleRepository;
pub use daily_candle_repository::SqliteDailyCandleRepository;
pub use database::Database;
pub use job_repository::SqliteBacktestJobRepository;
pub use order_repository::SqliteTradeOrderRepository;
pub use prediction_repository::SqlitePredictionRepository;
