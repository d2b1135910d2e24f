pub mod analyzers;
pub mod clean;
pub mod config;
pub mod error;
pub mod load;
pub mod model;
pub mod output;
pub mod stats;
pub mod store;
