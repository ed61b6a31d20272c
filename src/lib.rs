pub mod configuration;
pub mod controller;
pub mod error_handling;
pub mod process_management;
pub mod session_management;
pub mod web_interface;

pub use session_management::SessionStatus;
