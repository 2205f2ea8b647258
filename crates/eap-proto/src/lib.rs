//! EAP Protocol Engine
//!
//! This crate implements the Extensible Authentication Protocol (RFC 3748)
//! server-side machinery: a generic exchange state machine, a pluggable
//! method interface with a runtime registry, and two representative methods:
//! EAP-MD5 (challenge-response, RFC 3748 Section 5.4) and EAP-FAST (tunneled
//! TLV protocol with compound-key binding and key export, RFC 4851).
//!
//! # Features
//!
//! - EAP packet encoding and decoding
//! - Seven-operation method contract with a `(vendor, type)` registry
//! - TLV attribute codec with mandatory-bit and duplicate enforcement
//! - T-PRF key derivation (master secret, MSK, EMSK, compound keys)
//! - Retransmission-safe exchange driving with identifier tracking
//!
//! # Example
//!
//! ```rust
//! use eap_proto::method::{MethodRegistry, SessionContext};
//! use eap_proto::methods::eap_md5;
//! use eap_proto::session::EapSession;
//!
//! // Registry is populated once at startup
//! let mut registry = MethodRegistry::new();
//! eap_md5::register(&mut registry).unwrap();
//!
//! // One session per peer exchange
//! let ctx = SessionContext {
//!     identity: Some("alice".to_string()),
//!     password: Some(b"password123".to_vec()),
//!     ..Default::default()
//! };
//! let mut session = EapSession::new(ctx);
//! session.begin(&registry, 0, 4).unwrap();
//!
//! let challenge = session.next_request().unwrap();
//! // ... send to peer, feed the response into session.receive(...)
//! ```

pub mod method;
pub mod methods;
pub mod packet;
pub mod session;
pub mod tlv;
pub mod tprf;

pub use method::{
    EapMethod, KeyMaterial, MethodConstructor, MethodDescriptor, MethodOutcome, MethodRegistry,
    SessionContext, VENDOR_IETF,
};
pub use packet::{EapCode, EapError, EapPacket, EapType};
pub use session::{EapSession, ExchangeEvent};
pub use tlv::{Tlv, TlvError, TlvResult, TlvSignal, TlvType};
