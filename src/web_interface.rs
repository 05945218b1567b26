//! HTTP surface: taker session API, violation ingress, supervisor monitoring API and the
//! embedded dashboard.

pub mod routes;
pub mod types;
pub mod web_server;

pub use types::ApiError;
pub use web_server::WebServer;
