//! TLV (Type-Length-Value) attribute codec for tunneled EAP methods
//!
//! Implements the RFC 4851 Section 4.2 attribute encoding used inside the
//! EAP-FAST tunnel.
//!
//! # TLV Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |M|          TLV Type           |            Length             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                              Value...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! - M = Mandatory bit (0x8000): if set, an attribute the receiver does not
//!   understand must fail the whole payload
//! - TLV Type = 15 bits
//! - Length = length of the Value field, big-endian, no padding

use thiserror::Error;
use tracing::debug;

/// TLV types used by the tunneled method (RFC 4851 Section 4.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TlvType {
    /// Result TLV (Type 3) - final authentication result
    Result = 3,
    /// NAK TLV (Type 4) - rejects an unsupported TLV
    Nak = 4,
    /// Error TLV (Type 5) - protocol error codes
    Error = 5,
    /// Vendor-Specific TLV (Type 7)
    VendorSpecific = 7,
    /// EAP-Payload TLV (Type 9) - encapsulates an inner EAP packet
    EapPayload = 9,
    /// Intermediate-Result TLV (Type 10) - per-inner-method result
    IntermediateResult = 10,
    /// PAC TLV (Type 11) - Protected Access Credential provisioning
    Pac = 11,
    /// Crypto-Binding TLV (Type 12) - compound-key binding record
    CryptoBinding = 12,
    /// Request-Action TLV (Type 19) - what the peer wants on failure
    RequestAction = 19,
}

impl TlvType {
    /// Convert from u16 (mandatory bit already stripped)
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            3 => Some(Self::Result),
            4 => Some(Self::Nak),
            5 => Some(Self::Error),
            7 => Some(Self::VendorSpecific),
            9 => Some(Self::EapPayload),
            10 => Some(Self::IntermediateResult),
            11 => Some(Self::Pac),
            12 => Some(Self::CryptoBinding),
            19 => Some(Self::RequestAction),
            _ => None,
        }
    }
}

/// Result / Intermediate-Result TLV status values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TlvResult {
    Success = 1,
    Failure = 2,
}

impl TlvResult {
    /// Convert from the wire value; `None` for an invalid bit pattern
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::Success),
            2 => Some(Self::Failure),
            _ => None,
        }
    }

    /// Decode a wire value, normalizing unrecognized codes to Failure.
    ///
    /// The anomaly is logged; it is not itself fatal to the payload.
    pub fn from_wire(value: u16) -> Self {
        Self::from_u16(value).unwrap_or_else(|| {
            tracing::warn!(value, "unknown result status code, treating as failure");
            Self::Failure
        })
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// A single attribute, owned form used for building outgoing payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    /// TLV type (15 bits, mandatory bit not included)
    pub tlv_type: u16,
    /// Mandatory flag (M bit)
    pub mandatory: bool,
    /// TLV value
    pub value: Vec<u8>,
}

impl Tlv {
    /// Mandatory flag mask (M bit)
    pub const MANDATORY_FLAG: u16 = 0x8000;

    /// Type mask (15 bits)
    pub const TYPE_MASK: u16 = 0x7FFF;

    /// Header size: 2-byte type + 2-byte length
    pub const HEADER_LEN: usize = 4;

    /// Create a new TLV of a known type
    pub fn new(tlv_type: TlvType, mandatory: bool, value: Vec<u8>) -> Self {
        Self {
            tlv_type: tlv_type as u16,
            mandatory,
            value,
        }
    }

    /// Create a TLV from a raw type code
    pub fn new_raw(tlv_type: u16, mandatory: bool, value: Vec<u8>) -> Self {
        Self {
            tlv_type: tlv_type & Self::TYPE_MASK,
            mandatory,
            value,
        }
    }

    /// Result TLV carrying a status value
    pub fn result(status: TlvResult) -> Self {
        Self::new(TlvType::Result, true, status.as_u16().to_be_bytes().to_vec())
    }

    /// Intermediate-Result TLV carrying a status value
    pub fn intermediate_result(status: TlvResult) -> Self {
        Self::new(
            TlvType::IntermediateResult,
            true,
            status.as_u16().to_be_bytes().to_vec(),
        )
    }

    /// Append the 4-byte header for `(type, len)` to `buf`
    pub fn put_header(buf: &mut Vec<u8>, tlv_type: u16, mandatory: bool, len: u16) {
        let mut type_field = tlv_type & Self::TYPE_MASK;
        if mandatory {
            type_field |= Self::MANDATORY_FLAG;
        }
        buf.extend_from_slice(&type_field.to_be_bytes());
        buf.extend_from_slice(&len.to_be_bytes());
    }

    /// Append this TLV to `buf`
    pub fn put(&self, buf: &mut Vec<u8>) {
        Self::put_header(buf, self.tlv_type, self.mandatory, self.value.len() as u16);
        buf.extend_from_slice(&self.value);
    }

    /// Encode this TLV to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::HEADER_LEN + self.value.len());
        self.put(&mut bytes);
        bytes
    }

    /// Encode a sequence of TLVs to a single payload
    pub fn encode_all(tlvs: &[Self]) -> Vec<u8> {
        let total = tlvs
            .iter()
            .map(|t| Self::HEADER_LEN + t.value.len())
            .sum();
        let mut bytes = Vec::with_capacity(total);
        for tlv in tlvs {
            tlv.put(&mut bytes);
        }
        bytes
    }

    /// Get the TLV type as enum (if known)
    pub fn get_type(&self) -> Option<TlvType> {
        TlvType::from_u16(self.tlv_type)
    }
}

/// Per-attribute verdict returned by a scan handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlvSignal {
    /// Attribute understood and recorded
    Accepted,
    /// Attribute type unknown to the handler; the scanner decides based on
    /// the mandatory bit
    UnknownIgnorable,
    /// Protocol violation (duplicate, undersized structural record); the
    /// scan stops immediately
    FatalMalformed,
}

/// TLV parsing errors. Any of these forces the enclosing payload's outcome
/// to Failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TlvError {
    #[error("Truncated TLV: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Unrecognized mandatory TLV type {0}")]
    UnknownMandatory(u16),

    #[error("Malformed TLV of type {0}")]
    Malformed(u16),
}

/// Scan a payload of concatenated TLVs, dispatching each to `handler`.
///
/// The handler receives the raw type with the mandatory bit stripped, the
/// mandatory flag, and the value slice (borrowed from `payload`; parse
/// results keep these borrows and therefore cannot outlive the decrypted
/// buffer).
///
/// Policy:
/// - Unknown type with the mandatory bit clear: skipped, scan continues.
/// - Unknown type with the mandatory bit set: fatal
///   ([`TlvError::UnknownMandatory`]).
/// - Handler returns [`TlvSignal::FatalMalformed`]: fatal, scan stops.
/// - Truncated header or value: fatal.
pub fn scan<'a, F>(payload: &'a [u8], mut handler: F) -> Result<(), TlvError>
where
    F: FnMut(u16, bool, &'a [u8]) -> TlvSignal,
{
    let mut offset = 0;

    while offset < payload.len() {
        let rest = &payload[offset..];
        if rest.len() < Tlv::HEADER_LEN {
            return Err(TlvError::Truncated {
                expected: Tlv::HEADER_LEN,
                actual: rest.len(),
            });
        }

        let type_field = u16::from_be_bytes([rest[0], rest[1]]);
        let mandatory = (type_field & Tlv::MANDATORY_FLAG) != 0;
        let tlv_type = type_field & Tlv::TYPE_MASK;
        let len = u16::from_be_bytes([rest[2], rest[3]]) as usize;

        if rest.len() < Tlv::HEADER_LEN + len {
            return Err(TlvError::Truncated {
                expected: Tlv::HEADER_LEN + len,
                actual: rest.len(),
            });
        }

        let value = &rest[Tlv::HEADER_LEN..Tlv::HEADER_LEN + len];

        match handler(tlv_type, mandatory, value) {
            TlvSignal::Accepted => {}
            TlvSignal::UnknownIgnorable => {
                if mandatory {
                    debug!(tlv_type, "unrecognized mandatory TLV, rejecting payload");
                    return Err(TlvError::UnknownMandatory(tlv_type));
                }
                debug!(tlv_type, len, "ignoring unknown optional TLV");
            }
            TlvSignal::FatalMalformed => {
                return Err(TlvError::Malformed(tlv_type));
            }
        }

        offset += Tlv::HEADER_LEN + len;
    }

    Ok(())
}
