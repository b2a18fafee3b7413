pub mod authz;
pub mod config;
pub mod directory;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod org;
pub mod reaper;
pub mod service;
pub mod wal;

pub use authz::AuthDecision;
pub use config::BookingPolicy;
pub use engine::{Engine, EngineError};
pub use service::BookingService;
