pub mod admission;
pub mod configuration;
pub mod controller;
pub mod credentials;
pub mod ephemeral;
pub mod error_handling;
pub mod rules;
pub mod session_management;
pub mod storage;
pub mod stream;
pub mod summary;
pub mod web_interface;

pub use configuration::Configuration;
pub use controller::Controller;
pub use session_management::SessionStatus;
