pub mod backends;
pub mod compare;
pub mod compose;
pub mod config;
pub mod docker;
pub mod engine;
pub mod error;
pub mod hash;
pub mod model;
pub mod mounts;
pub mod orchestrator;
pub mod plan;
pub mod preflight;
pub mod scanner;
pub mod services;
pub mod session;
pub mod settings;
pub mod transport;
pub mod util;

pub use error::ShiftError;
pub type Result<T> = std::result::Result<T, ShiftError>;
