pub mod anchored;
pub mod classifier;
pub mod interval_query;
pub mod models;
pub mod windowed;
