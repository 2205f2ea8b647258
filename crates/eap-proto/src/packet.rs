//! EAP (Extensible Authentication Protocol) packet support
//!
//! This module implements the EAP packet structures defined in RFC 3748.
//!
//! # EAP Packet Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Code      |  Identifier   |            Length             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type      |  Type-Data ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use thiserror::Error;

/// EAP packet code (first byte of EAP packet)
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EapCode {
    /// Request packet (Code 1)
    Request = 1,
    /// Response packet (Code 2)
    Response = 2,
    /// Success packet (Code 3)
    Success = 3,
    /// Failure packet (Code 4)
    Failure = 4,
}

impl EapCode {
    /// Convert from u8 to EapCode
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(EapCode::Request),
            2 => Some(EapCode::Response),
            3 => Some(EapCode::Success),
            4 => Some(EapCode::Failure),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// EAP method types (RFC 3748 and IANA registry)
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EapType {
    /// Identity (Type 1) - RFC 3748
    Identity = 1,
    /// Notification (Type 2) - RFC 3748
    Notification = 2,
    /// Nak (Type 3) - RFC 3748
    /// Response only, sent in response to an unacceptable authentication type
    Nak = 3,
    /// MD5-Challenge (Type 4) - RFC 3748
    Md5Challenge = 4,
    /// EAP-FAST (Type 43) - RFC 4851
    Fast = 43,
}

impl EapType {
    /// Convert from u8 to EapType
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(EapType::Identity),
            2 => Some(EapType::Notification),
            3 => Some(EapType::Nak),
            4 => Some(EapType::Md5Challenge),
            43 => Some(EapType::Fast),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// EAP packet structure
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapPacket {
    /// EAP code (Request, Response, Success, Failure)
    pub code: EapCode,
    /// Identifier for matching requests and responses (0-255)
    pub identifier: u8,
    /// EAP type (only present for Request/Response)
    pub eap_type: Option<EapType>,
    /// Type-specific data
    pub data: Vec<u8>,
}

impl EapPacket {
    /// Create a new EAP packet
    pub fn new(code: EapCode, identifier: u8, eap_type: Option<EapType>, data: Vec<u8>) -> Self {
        EapPacket {
            code,
            identifier,
            eap_type,
            data,
        }
    }

    /// Create an EAP Identity Request
    pub fn identity_request(identifier: u8, message: &str) -> Self {
        EapPacket {
            code: EapCode::Request,
            identifier,
            eap_type: Some(EapType::Identity),
            data: message.as_bytes().to_vec(),
        }
    }

    /// Create an EAP Identity Response
    pub fn identity_response(identifier: u8, identity: &str) -> Self {
        EapPacket {
            code: EapCode::Response,
            identifier,
            eap_type: Some(EapType::Identity),
            data: identity.as_bytes().to_vec(),
        }
    }

    /// Create an EAP Success packet
    pub fn success(identifier: u8) -> Self {
        EapPacket {
            code: EapCode::Success,
            identifier,
            eap_type: None,
            data: Vec::new(),
        }
    }

    /// Create an EAP Failure packet
    pub fn failure(identifier: u8) -> Self {
        EapPacket {
            code: EapCode::Failure,
            identifier,
            eap_type: None,
            data: Vec::new(),
        }
    }

    /// Parse EAP packet from bytes
    ///
    /// # Packet Format
    /// - Code (1 byte)
    /// - Identifier (1 byte)
    /// - Length (2 bytes, network byte order)
    /// - Type (1 byte, only for Request/Response)
    /// - Type-Data (variable length)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EapError> {
        if bytes.len() < 4 {
            return Err(EapError::PacketTooShort {
                expected: 4,
                actual: bytes.len(),
            });
        }

        // Parse header
        let code = EapCode::from_u8(bytes[0]).ok_or(EapError::InvalidCode(bytes[0]))?;
        let identifier = bytes[1];
        let length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;

        // Validate length
        if length < 4 {
            return Err(EapError::InvalidLength(length));
        }
        if bytes.len() < length {
            return Err(EapError::PacketTooShort {
                expected: length,
                actual: bytes.len(),
            });
        }

        // Parse type and data based on code
        let (eap_type, data) = match code {
            EapCode::Request | EapCode::Response => {
                if length < 5 {
                    return Err(EapError::InvalidLength(length));
                }
                let eap_type = EapType::from_u8(bytes[4]);
                let data = bytes[5..length].to_vec();
                (eap_type, data)
            }
            EapCode::Success | EapCode::Failure => {
                // Success and Failure packets have no Type field
                (None, Vec::new())
            }
        };

        Ok(EapPacket {
            code,
            identifier,
            eap_type,
            data,
        })
    }

    /// Encode EAP packet to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.length());

        // Add code and identifier
        bytes.push(self.code.as_u8());
        bytes.push(self.identifier);

        // Add length (network byte order)
        bytes.extend_from_slice(&(self.length() as u16).to_be_bytes());

        // Add type and data for Request/Response
        if let Some(eap_type) = self.eap_type {
            bytes.push(eap_type.as_u8());
            bytes.extend_from_slice(&self.data);
        }

        bytes
    }

    /// Get the total length of the packet
    pub fn length(&self) -> usize {
        match self.code {
            EapCode::Request | EapCode::Response => 4 + 1 + self.data.len(),
            EapCode::Success | EapCode::Failure => 4,
        }
    }

    /// Validate that this packet is a Response of the expected method type
    /// and return its type-data.
    ///
    /// Used by methods to perform structural validation in `check` before
    /// touching any state.
    pub fn response_data(&self, expected: EapType) -> Option<&[u8]> {
        if self.code != EapCode::Response || self.eap_type != Some(expected) {
            return None;
        }
        Some(&self.data)
    }
}

/// EAP-related errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EapError {
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("Invalid EAP code: {0}")]
    InvalidCode(u8),

    #[error("Invalid packet length: {0}")]
    InvalidLength(usize),

    #[error("Unknown EAP type: {0}")]
    UnknownType(u8),

    #[error("Invalid state for operation")]
    InvalidState,

    #[error("Method ({0}, {1}) already registered")]
    AlreadyRegistered(u32, u32),

    #[error("No method registered for ({0}, {1})")]
    UnknownMethod(u32, u32),

    #[error("Tunnel operation failed: {0}")]
    TunnelError(String),

    #[error("Unsupported configuration: {0}")]
    Configuration(&'static str),
}
