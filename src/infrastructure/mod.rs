pub mod core;
pub mod csv_loader;
pub mod exchange;
pub mod observability;
pub mod persistence;
