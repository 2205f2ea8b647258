//! EAP-MD5 challenge-response method (RFC 3748 Section 5.4)
//!
//! The minimal method used to validate the plugin contract end-to-end: the
//! server draws a random challenge, the peer answers with
//! `MD5(identifier + secret + challenge)`. No tunnel, no key export.
//!
//! Security note: EAP-MD5 provides neither mutual authentication nor key
//! derivation and is not suitable for wireless deployments. It is included
//! for testing and legacy compatibility.

use rand::TryRngCore;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::method::{
    EapMethod, MethodDescriptor, MethodOutcome, MethodRegistry, SessionContext,
};
use crate::packet::{EapCode, EapError, EapPacket, EapType};

/// Challenge value size
pub const CHALLENGE_LEN: usize = 16;

/// Response digest size (MD5 output)
pub const RESPONSE_LEN: usize = 16;

/// Compute the expected EAP-MD5 response digest:
/// `MD5(identifier + secret + challenge)`
pub fn compute_response(identifier: u8, secret: &[u8], challenge: &[u8]) -> [u8; RESPONSE_LEN] {
    let mut data = Vec::with_capacity(1 + secret.len() + challenge.len());
    data.push(identifier);
    data.extend_from_slice(secret);
    data.extend_from_slice(challenge);

    md5::compute(&data).0
}

/// Build a peer-side EAP-MD5 Response packet: `[len=16][digest]`
pub fn response_packet(identifier: u8, digest: &[u8; RESPONSE_LEN]) -> EapPacket {
    let mut data = Vec::with_capacity(1 + RESPONSE_LEN);
    data.push(RESPONSE_LEN as u8);
    data.extend_from_slice(digest);

    EapPacket::new(
        EapCode::Response,
        identifier,
        Some(EapType::Md5Challenge),
        data,
    )
}

/// EAP-MD5 server-side method state
pub struct EapMd5 {
    challenge: [u8; CHALLENGE_LEN],
    state: MethodOutcome,
}

impl EapMd5 {
    pub fn new() -> Self {
        EapMd5 {
            challenge: [0u8; CHALLENGE_LEN],
            state: MethodOutcome::Continue,
        }
    }

    /// The challenge sent in the last request (test hook)
    #[cfg(test)]
    fn challenge(&self) -> &[u8; CHALLENGE_LEN] {
        &self.challenge
    }
}

impl Default for EapMd5 {
    fn default() -> Self {
        Self::new()
    }
}

impl EapMethod for EapMd5 {
    fn build_request(&mut self, _ctx: &SessionContext, id: u8) -> Option<EapPacket> {
        if rand::rngs::OsRng
            .try_fill_bytes(&mut self.challenge)
            .is_err()
        {
            warn!("EAP-MD5: failed to draw challenge from entropy source");
            self.state = MethodOutcome::Failure;
            return None;
        }

        let mut data = Vec::with_capacity(1 + CHALLENGE_LEN);
        data.push(CHALLENGE_LEN as u8);
        data.extend_from_slice(&self.challenge);

        self.state = MethodOutcome::Continue;

        Some(EapPacket::new(
            EapCode::Request,
            id,
            Some(EapType::Md5Challenge),
            data,
        ))
    }

    fn check(&self, _ctx: &SessionContext, resp: &EapPacket) -> bool {
        let Some(data) = resp.response_data(EapType::Md5Challenge) else {
            debug!("EAP-MD5: invalid frame");
            return true;
        };
        if data.is_empty() {
            debug!("EAP-MD5: empty response");
            return true;
        }
        if data[0] as usize != RESPONSE_LEN || data.len() < 1 + RESPONSE_LEN {
            debug!(
                response_len = data[0],
                payload_len = data.len(),
                "EAP-MD5: invalid response"
            );
            return true;
        }

        false
    }

    fn process(&mut self, ctx: &SessionContext, resp: &EapPacket) {
        // Operator error, not peer behavior: log distinctly from protocol
        // violations.
        let Some(secret) = ctx.password.as_deref() else {
            warn!("EAP-MD5: no shared secret configured for peer");
            self.state = MethodOutcome::Failure;
            return;
        };
        if ctx.password_is_hashed {
            warn!("EAP-MD5: pre-hashed secret configured where plaintext is required");
            self.state = MethodOutcome::Failure;
            return;
        }

        // Frame already validated by check
        let Some(data) = resp.response_data(EapType::Md5Challenge) else {
            return;
        };
        if data.is_empty() || data[0] as usize != RESPONSE_LEN || data.len() < 1 + RESPONSE_LEN {
            return;
        }
        let peer_digest = &data[1..1 + RESPONSE_LEN];

        let expected = compute_response(resp.identifier, secret, &self.challenge);
        if bool::from(expected.ct_eq(peer_digest)) {
            debug!("EAP-MD5: done - success");
            self.state = MethodOutcome::Success;
        } else {
            debug!("EAP-MD5: done - failure");
            self.state = MethodOutcome::Failure;
        }
    }

    fn is_done(&self) -> bool {
        self.state.is_terminal()
    }

    fn is_success(&self) -> bool {
        self.state == MethodOutcome::Success
    }

    fn reset(&mut self) {
        self.challenge = [0u8; CHALLENGE_LEN];
        self.state = MethodOutcome::Continue;
    }
}

/// Register EAP-MD5 with a method registry
pub fn register(registry: &mut MethodRegistry) -> Result<(), EapError> {
    registry.register(
        MethodDescriptor::ietf(EapType::Md5Challenge.as_u8() as u32, "MD5"),
        Box::new(|_ctx| Ok(Box::new(EapMd5::new()) as Box<dyn EapMethod>)),
    )
}
