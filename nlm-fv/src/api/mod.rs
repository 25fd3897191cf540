//! HTTP API handlers for nlm-fv

pub mod batcher;
pub mod forms;
pub mod health;

pub use batcher::batcher_routes;
pub use forms::form_routes;
pub use health::health_routes;
