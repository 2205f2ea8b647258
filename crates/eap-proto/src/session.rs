//! EAP exchange state machine
//!
//! An [`EapSession`] drives one authentication exchange: it owns the active
//! method instance, assigns request identifiers, and sequences the
//! check/process rounds. One session per peer exchange; concurrent peers are
//! independent sessions with no shared mutable state (the method registry is
//! read-only after startup).

use tracing::debug;

use crate::method::{MethodOutcome, MethodRegistry, SessionContext};
use crate::packet::{EapCode, EapError, EapPacket, EapType};

/// What the exchange driver should do after feeding a frame to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeEvent {
    /// Send the next request
    Send(EapPacket),
    /// The response was stale or structurally invalid; retransmit the prior
    /// request unchanged
    Retransmit(EapPacket),
    /// The exchange reached a terminal outcome; send the final packet
    Finished { success: bool, packet: EapPacket },
    /// Nothing to do (no outstanding request, or exchange already over)
    Discard,
}

/// State for a single authentication exchange.
///
/// Owns the active method instance exclusively; `reset` (or drop) releases
/// it along with any in-flight derived key material.
pub struct EapSession {
    ctx: SessionContext,
    method: Option<Box<dyn crate::method::EapMethod>>,
    current_identifier: u8,
    last_request: Option<EapPacket>,
    outcome: MethodOutcome,
}

impl EapSession {
    /// Create a session for a peer exchange
    pub fn new(ctx: SessionContext) -> Self {
        EapSession {
            ctx,
            method: None,
            current_identifier: 0,
            last_request: None,
            outcome: MethodOutcome::Continue,
        }
    }

    /// Select and instantiate the authentication method for this exchange.
    ///
    /// Constructor failure (e.g. a tunneled method without its provisioning
    /// key) marks the exchange Failure and surfaces the error.
    pub fn begin(
        &mut self,
        registry: &MethodRegistry,
        vendor_id: u32,
        method_type: u32,
    ) -> Result<(), EapError> {
        let ctor = registry
            .lookup(vendor_id, method_type)
            .ok_or(EapError::UnknownMethod(vendor_id, method_type))?;

        match ctor(&self.ctx) {
            Ok(method) => {
                self.method = Some(method);
                Ok(())
            }
            Err(e) => {
                self.outcome = MethodOutcome::Failure;
                Err(e)
            }
        }
    }

    /// Exchange outcome so far
    pub fn outcome(&self) -> MethodOutcome {
        self.outcome
    }

    /// Session context for this exchange
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Assign a fresh identifier, distinct from the previous one
    fn fresh_identifier(&mut self) -> u8 {
        let id = self.current_identifier;
        self.current_identifier = self.current_identifier.wrapping_add(1);
        id
    }

    /// Build the next request from the active method.
    ///
    /// Returns `None` and marks the exchange Failure if the method cannot
    /// produce one (resource exhaustion terminates cleanly, no retry loop).
    pub fn next_request(&mut self) -> Option<EapPacket> {
        if self.outcome.is_terminal() {
            return None;
        }
        if self.method.is_none() {
            return None;
        }

        let id = self.fresh_identifier();
        let method = self.method.as_mut().unwrap();
        match method.build_request(&self.ctx, id) {
            Some(request) => {
                self.last_request = Some(request.clone());
                Some(request)
            }
            None => {
                debug!("method produced no request, failing exchange");
                self.outcome = MethodOutcome::Failure;
                None
            }
        }
    }

    /// Feed a raw inbound frame into the exchange.
    ///
    /// Structural failures and identifier mismatches are treated as
    /// retransmissions of the prior request and never advance the method
    /// state. Only an accepted response reaches `process`.
    pub fn receive(&mut self, frame: &[u8]) -> ExchangeEvent {
        if self.outcome.is_terminal() {
            return ExchangeEvent::Discard;
        }
        if self.method.is_none() {
            return ExchangeEvent::Discard;
        }

        let packet = match EapPacket::from_bytes(frame) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(error = %e, "dropping malformed frame");
                return self.retransmit();
            }
        };

        if packet.code != EapCode::Response {
            debug!(code = ?packet.code, "ignoring non-response frame");
            return ExchangeEvent::Discard;
        }

        let Some(last) = &self.last_request else {
            return ExchangeEvent::Discard;
        };
        if packet.identifier != last.identifier {
            // Duplicate or out-of-order response: answer with the
            // outstanding request, leave the method untouched.
            debug!(
                got = packet.identifier,
                expected = last.identifier,
                "identifier mismatch, treating as retransmission"
            );
            return self.retransmit();
        }

        // A Nak means the peer refuses the selected method
        if packet.eap_type == Some(EapType::Nak) {
            debug!("peer rejected the selected method");
            return self.finish(false);
        }

        let method = self.method.as_mut().expect("checked above");
        if method.check(&self.ctx, &packet) {
            return self.retransmit();
        }

        method.process(&self.ctx, &packet);

        if method.is_done() {
            let success = method.is_success();
            self.finish(success)
        } else {
            match self.next_request() {
                Some(request) => ExchangeEvent::Send(request),
                None => self.finish(false),
            }
        }
    }

    fn retransmit(&self) -> ExchangeEvent {
        match &self.last_request {
            Some(request) => ExchangeEvent::Retransmit(request.clone()),
            None => ExchangeEvent::Discard,
        }
    }

    fn finish(&mut self, success: bool) -> ExchangeEvent {
        self.outcome = if success {
            MethodOutcome::Success
        } else {
            MethodOutcome::Failure
        };

        let id = self.fresh_identifier();
        let packet = if success {
            EapPacket::success(id)
        } else {
            EapPacket::failure(id)
        };
        ExchangeEvent::Finished { success, packet }
    }

    /// Access the active method (e.g. to read exported keys after success)
    pub fn method(&self) -> Option<&dyn crate::method::EapMethod> {
        self.method.as_deref()
    }

    /// Abort the exchange, releasing the method instance and any derived
    /// material it holds. Safe at any point, including mid-exchange;
    /// idempotent.
    pub fn reset(&mut self) {
        if let Some(method) = self.method.as_mut() {
            method.reset();
        }
        self.method = None;
        self.last_request = None;
        self.outcome = MethodOutcome::Continue;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::eap_md5;

    fn registry() -> MethodRegistry {
        let mut registry = MethodRegistry::new();
        eap_md5::register(&mut registry).unwrap();
        registry
    }

    fn session_for(secret: &str) -> EapSession {
        EapSession::new(SessionContext {
            identity: Some("alice".to_string()),
            password: Some(secret.as_bytes().to_vec()),
            password_is_hashed: false,
            pac_key: None,
        })
    }

    fn answer_challenge(request: &EapPacket, secret: &[u8]) -> Vec<u8> {
        let digest = eap_md5::compute_response(request.identifier, secret, &request.data[1..]);
        eap_md5::response_packet(request.identifier, &digest).to_bytes()
    }

    #[test]
    fn test_exchange_success() {
        let registry = registry();
        let mut session = session_for("secret123");
        session.begin(&registry, 0, 4).unwrap();

        let request = session.next_request().unwrap();
        let frame = answer_challenge(&request, b"secret123");

        match session.receive(&frame) {
            ExchangeEvent::Finished { success, packet } => {
                assert!(success);
                assert_eq!(packet.code, EapCode::Success);
                // Fresh identifier, distinct from the request's
                assert_ne!(packet.identifier, request.identifier);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(session.outcome(), MethodOutcome::Success);
    }

    #[test]
    fn test_exchange_failure() {
        let registry = registry();
        let mut session = session_for("secret123");
        session.begin(&registry, 0, 4).unwrap();

        let request = session.next_request().unwrap();
        let frame = answer_challenge(&request, b"wrong-secret");

        match session.receive(&frame) {
            ExchangeEvent::Finished { success, packet } => {
                assert!(!success);
                assert_eq!(packet.code, EapCode::Failure);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(session.outcome(), MethodOutcome::Failure);
    }

    #[test]
    fn test_unknown_method() {
        let registry = registry();
        let mut session = session_for("secret123");
        assert_eq!(
            session.begin(&registry, 0, 99).unwrap_err(),
            EapError::UnknownMethod(0, 99)
        );
    }

    #[test]
    fn test_stale_identifier_retransmits() {
        let registry = registry();
        let mut session = session_for("secret123");
        session.begin(&registry, 0, 4).unwrap();

        let request = session.next_request().unwrap();

        // Response with an identifier that doesn't match the outstanding
        // request: prior request is retransmitted, state untouched.
        let digest = eap_md5::compute_response(request.identifier, b"secret123", &request.data[1..]);
        let stale = eap_md5::response_packet(request.identifier.wrapping_add(7), &digest);

        match session.receive(&stale.to_bytes()) {
            ExchangeEvent::Retransmit(packet) => assert_eq!(packet, request),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(session.outcome(), MethodOutcome::Continue);

        // The real response still completes the exchange
        let frame = answer_challenge(&request, b"secret123");
        assert!(matches!(
            session.receive(&frame),
            ExchangeEvent::Finished { success: true, .. }
        ));
    }

    #[test]
    fn test_malformed_frame_retransmits() {
        let registry = registry();
        let mut session = session_for("secret123");
        session.begin(&registry, 0, 4).unwrap();

        let request = session.next_request().unwrap();
        match session.receive(&[0xFF, 0x00]) {
            ExchangeEvent::Retransmit(packet) => assert_eq!(packet, request),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(session.outcome(), MethodOutcome::Continue);
    }

    #[test]
    fn test_check_reject_retransmits() {
        let registry = registry();
        let mut session = session_for("secret123");
        session.begin(&registry, 0, 4).unwrap();

        let request = session.next_request().unwrap();

        // Truncated digest fails the method's structural check
        let mut data = vec![15u8];
        data.extend_from_slice(&[0xCD; 15]);
        let short = EapPacket::new(
            EapCode::Response,
            request.identifier,
            Some(EapType::Md5Challenge),
            data,
        );

        assert!(matches!(
            session.receive(&short.to_bytes()),
            ExchangeEvent::Retransmit(_)
        ));
        assert_eq!(session.outcome(), MethodOutcome::Continue);
    }

    #[test]
    fn test_nak_fails_exchange() {
        let registry = registry();
        let mut session = session_for("secret123");
        session.begin(&registry, 0, 4).unwrap();

        let request = session.next_request().unwrap();
        let nak = EapPacket::new(
            EapCode::Response,
            request.identifier,
            Some(EapType::Nak),
            vec![13],
        );

        assert!(matches!(
            session.receive(&nak.to_bytes()),
            ExchangeEvent::Finished { success: false, .. }
        ));
    }

    #[test]
    fn test_identifier_wraps() {
        let mut session = session_for("secret123");
        session.current_identifier = 255;
        assert_eq!(session.fresh_identifier(), 255);
        assert_eq!(session.fresh_identifier(), 0);
        assert_eq!(session.fresh_identifier(), 1);
    }

    #[test]
    fn test_receive_after_finish_discards() {
        let registry = registry();
        let mut session = session_for("secret123");
        session.begin(&registry, 0, 4).unwrap();

        let request = session.next_request().unwrap();
        let frame = answer_challenge(&request, b"secret123");
        session.receive(&frame);

        assert_eq!(session.receive(&frame), ExchangeEvent::Discard);
        assert!(session.next_request().is_none());
    }

    #[test]
    fn test_reset_releases_method() {
        let registry = registry();
        let mut session = session_for("secret123");
        session.begin(&registry, 0, 4).unwrap();
        session.next_request().unwrap();

        session.reset();
        assert!(session.method().is_none());
        assert_eq!(session.outcome(), MethodOutcome::Continue);
        assert!(session.next_request().is_none());

        // Idempotent, and a fresh begin works afterwards
        session.reset();
        session.begin(&registry, 0, 4).unwrap();
        assert!(session.next_request().is_some());
    }

    #[test]
    fn test_constructor_failure_marks_exchange_failed() {
        let mut registry = MethodRegistry::new();
        registry
            .register(
                crate::method::MethodDescriptor::ietf(43, "FAST"),
                Box::new(|_ctx| Err(EapError::Configuration("no tunnel"))),
            )
            .unwrap();

        let mut session = session_for("secret123");
        assert!(session.begin(&registry, 0, 43).is_err());
        assert_eq!(session.outcome(), MethodOutcome::Failure);
    }
}
