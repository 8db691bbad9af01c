//! Core of Baton: the event envelope model, the handoff packet model,
//! configuration, and the append-only [`storage::EventLedger`].

pub mod config;
pub mod error;
pub mod model;
pub mod redact;
pub mod storage;

pub use config::BatonConfig;
pub use error::CoreError;
pub use storage::EventLedger;
