//! EAP method plugin interface
//!
//! Every authentication method (EAP-MD5, EAP-FAST, ...) implements the
//! [`EapMethod`] trait, and is instantiated through a constructor held in a
//! [`MethodRegistry`]. The registry is populated once at startup and shared
//! read-only between exchanges; registering after startup is a configuration
//! defect, not something the types try to make safe.

use std::collections::HashMap;
use std::fmt;

use crate::packet::{EapError, EapPacket};
use crate::tprf::{EMSK_LEN, MASTER_SECRET_LEN, MSK_LEN};

/// IETF vendor id (non-vendor-specific method types)
pub const VENDOR_IETF: u32 = 0;

/// Per-exchange data handed to a method by the exchange driver.
///
/// A method never reaches outside this context: the peer's identity and
/// credentials come from here, so independent exchanges share no mutable
/// state.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// Peer identity from the Identity exchange (if one happened)
    pub identity: Option<String>,
    /// Plaintext shared secret for the peer, if configured
    pub password: Option<Vec<u8>>,
    /// True if `password` holds a pre-hashed form rather than plaintext.
    /// Methods that need the plaintext must fail the exchange when set.
    pub password_is_hashed: bool,
    /// Tunnel provisioning key (PAC-Key) for tunneled methods, 32 bytes
    pub pac_key: Option<[u8; 32]>,
}

/// Outcome of a method's state machine.
///
/// Initial state is `Continue`; only `process` may move it to a terminal
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MethodOutcome {
    #[default]
    Continue,
    Success,
    Failure,
}

impl MethodOutcome {
    /// Check if this is a terminal state
    pub fn is_terminal(self) -> bool {
        self != MethodOutcome::Continue
    }
}

/// Secrets derived by a key-deriving method, handed outward on success.
///
/// All fields are opaque byte arrays with protocol-mandated lengths; a wrong
/// length is an implementation defect, which the array types rule out.
#[derive(Clone)]
pub struct KeyMaterial {
    /// TLS master secret (48 bytes)
    pub master_secret: [u8; MASTER_SECRET_LEN],
    /// Master Session Key (64 bytes)
    pub session_key: [u8; MSK_LEN],
    /// Extended Master Session Key (64 bytes)
    pub extended_session_key: [u8; EMSK_LEN],
}

/// Capability contract implemented by every EAP authentication method.
///
/// The exchange driver calls these in a fixed order per round:
/// `build_request` to emit the next request, then `check` on the peer's
/// response (structural validation only; `check` takes `&self`), then
/// `process` (semantic validation, the only place the outcome may move to
/// Success or Failure), then `is_done`/`is_success` to read the result.
pub trait EapMethod {
    /// Produce the next request carrying identifier `id`.
    ///
    /// Returns `None` and marks the method Failure on an unrecoverable
    /// condition (e.g. the entropy source is unavailable).
    fn build_request(&mut self, ctx: &SessionContext, id: u8) -> Option<EapPacket>;

    /// Structural validation of an incoming response.
    ///
    /// Returns `true` to signal "reject, retransmit the previous request",
    /// `false` to accept and proceed to `process`. Must not mutate state.
    fn check(&self, ctx: &SessionContext, resp: &EapPacket) -> bool;

    /// Semantic validation: credential verification, TLV interpretation.
    fn process(&mut self, ctx: &SessionContext, resp: &EapPacket);

    /// True once the method reached Success or Failure
    fn is_done(&self) -> bool;

    /// True iff the method reached Success
    fn is_success(&self) -> bool;

    /// Release all resources owned by the method state. Idempotent; safe to
    /// call at any point, including mid-exchange.
    fn reset(&mut self);

    /// Derived session keys, for methods that export any.
    ///
    /// Must return `None` until the method outcome is Success: absent, not
    /// zero-filled, so "not yet derived" can never be mistaken for key
    /// material.
    fn key_material(&self) -> Option<KeyMaterial> {
        None
    }
}

/// Constructor stored in the registry: allocates a method's private state.
///
/// Must not perform network I/O; fails only when the session context cannot
/// support the method at all (e.g. a tunneled method without a tunnel).
pub type MethodConstructor =
    Box<dyn Fn(&SessionContext) -> Result<Box<dyn EapMethod>, EapError> + Send + Sync>;

/// Identifies a method variant in the registry. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Vendor id ([`VENDOR_IETF`] for standard types)
    pub vendor_id: u32,
    /// Method type code
    pub method_type: u32,
    /// Human-readable method name
    pub display_name: String,
}

impl MethodDescriptor {
    pub fn new(vendor_id: u32, method_type: u32, display_name: &str) -> Self {
        MethodDescriptor {
            vendor_id,
            method_type,
            display_name: display_name.to_string(),
        }
    }

    /// Descriptor for a standard IETF method type
    pub fn ietf(method_type: u32, display_name: &str) -> Self {
        Self::new(VENDOR_IETF, method_type, display_name)
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (vendor {}, type {})",
            self.display_name, self.vendor_id, self.method_type
        )
    }
}

/// Maps `(vendor_id, method_type)` to a method constructor.
///
/// Populated at startup, then wrapped in an `Arc` and read by every
/// exchange. Lookups never lock because nothing mutates after startup.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<(u32, u32), (MethodDescriptor, MethodConstructor)>,
}

impl MethodRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        MethodRegistry {
            methods: HashMap::new(),
        }
    }

    /// Register a method constructor under its descriptor.
    ///
    /// Fails with [`EapError::AlreadyRegistered`] if a method with the same
    /// `(vendor_id, method_type)` is present; the existing registration is
    /// left untouched.
    pub fn register(
        &mut self,
        descriptor: MethodDescriptor,
        constructor: MethodConstructor,
    ) -> Result<(), EapError> {
        let key = (descriptor.vendor_id, descriptor.method_type);
        if self.methods.contains_key(&key) {
            return Err(EapError::AlreadyRegistered(key.0, key.1));
        }
        self.methods.insert(key, (descriptor, constructor));
        Ok(())
    }

    /// Look up a constructor by vendor id and method type
    pub fn lookup(&self, vendor_id: u32, method_type: u32) -> Option<&MethodConstructor> {
        self.methods
            .get(&(vendor_id, method_type))
            .map(|(_, ctor)| ctor)
    }

    /// Look up the descriptor registered for a method type
    pub fn descriptor(&self, vendor_id: u32, method_type: u32) -> Option<&MethodDescriptor> {
        self.methods
            .get(&(vendor_id, method_type))
            .map(|(desc, _)| desc)
    }

    /// Number of registered methods
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// True if no methods are registered
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Iterate over registered descriptors
    pub fn descriptors(&self) -> impl Iterator<Item = &MethodDescriptor> {
        self.methods.values().map(|(desc, _)| desc)
    }
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}
