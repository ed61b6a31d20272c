//! HTTP API consumed by chat bots and other clients.
pub mod routes;
pub mod types;
pub mod web_server;

pub use routes::ApiContext;
pub use web_server::WebServer;
