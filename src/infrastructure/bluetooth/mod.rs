//! Bluetooth session core.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       BleSession                         │
//! │   (facade - public API, event fan-out to observers)      │
//! └───────┬──────────────┬───────────────┬──────────────────┘
//!         │              │               │
//!         ▼              ▼               ▼
//! ┌─────────────┐ ┌──────────────┐ ┌─────────────┐
//! │   Scanner   │ │  Connection  │ │   Catalog   │
//! │             │ │  Lifecycle   │ │   Cache     │
//! │ - sessions  │ │ - connect    │ │ - services  │
//! │ - deadline  │ │ - cancel     │ │ - chars     │
//! │ - dedup     │ │ - disconnect │ │ - per epoch │
//! └──────┬──────┘ └──────┬───────┘ └──────┬──────┘
//!        └───────────────┼────────────────┘
//!                        ▼
//!              ┌───────────────────┐
//!              │  Device Registry  │
//!              │ discovered ⊻ conn │
//!              └───────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`scanner`] - time-bounded discovery sessions
//! - [`connection`] - per-device connection lifecycle state machine
//! - [`catalog`] - lazy memoized service/characteristic tree
//! - [`service`] - session facade

pub mod catalog;
pub mod connection;
pub mod scanner;
pub mod service;

// Re-export the facade for convenience
pub use service::{BleSession, SessionConfig};
