pub mod candle;
pub mod cusum;
pub mod errors;
pub mod fold;
pub mod indicators;
pub mod money;
pub mod prediction;
pub mod repositories;
pub mod sizing;
pub mod stats;
pub mod trade;
