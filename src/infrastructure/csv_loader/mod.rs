pub mod cusum_loader;
pub mod prediction_loader;

pub use cusum_loader::load_cusum_csv;
pub use prediction_loader::load_prediction_csv;
