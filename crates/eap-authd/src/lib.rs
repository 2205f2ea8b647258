//! EAP Authenticator
//!
//! Server-side orchestration over [`eap_proto`]: JSON configuration and user
//! store, concurrent session tracking, and the Identity/method/decision flow.
//! The network transport (RADIUS encapsulation, 802.1X) is the embedding
//! application's concern; frames enter and leave as raw bytes.

pub mod authenticator;
pub mod config;

pub use authenticator::{AuthDecision, Authenticator};
pub use config::{Config, ConfigError, User};
