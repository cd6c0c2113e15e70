//! Multi-source verification of regulatory impediments for companies identified by
//! their national tax id.

pub mod config;
pub mod error;
pub mod identifier;
pub mod monitoring;
pub mod telemetry;

pub use identifier::{InvalidIdentifier, TaxId};
