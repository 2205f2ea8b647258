//! EAP authentication orchestration
//!
//! The [`Authenticator`] tracks concurrent exchanges, runs the Identity
//! round, selects the configured method, and translates exchange events into
//! Accept/Reject/Challenge decisions for the surrounding transport (RADIUS,
//! 802.1X) is out of scope here; frames go in and out as raw bytes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use eap_proto::method::{KeyMaterial, MethodRegistry, SessionContext};
use eap_proto::packet::{EapCode, EapPacket, EapType};
use eap_proto::session::{EapSession, ExchangeEvent};

use crate::config::Config;

/// Decision handed back to the transport after each inbound frame
pub enum AuthDecision {
    /// Authentication continues: send this frame to the peer
    Challenge { frame: Vec<u8> },
    /// Peer authenticated; key material is present when the method derives
    /// any (tunneled methods), absent otherwise
    Accept {
        identity: String,
        key_material: Option<KeyMaterial>,
        frame: Vec<u8>,
    },
    /// Authentication failed
    Reject { frame: Vec<u8> },
    /// Frame did not belong to a live exchange; drop it
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Identity request sent, awaiting the peer's identity
    AwaitingIdentity,
    /// Method selected, exchange in progress
    MethodExchange,
}

struct SessionEntry {
    phase: Phase,
    /// Outstanding Identity request, kept for retransmission
    identity_request: EapPacket,
    exchange: Option<EapSession>,
    created_at: u64,
    last_activity: u64,
    /// Retransmissions seen; the session is torn down past the limit
    retransmits: u32,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Drives EAP exchanges for many concurrent peers.
///
/// Each exchange is an independent session; the shared method registry is
/// read-only after startup, so sessions never contend.
pub struct Authenticator {
    registry: Arc<MethodRegistry>,
    config: Config,
    sessions: HashMap<String, SessionEntry>,
    next_session: u64,
}

impl Authenticator {
    /// Create an authenticator over a populated method registry
    pub fn new(registry: Arc<MethodRegistry>, config: Config) -> Self {
        Authenticator {
            registry,
            config,
            sessions: HashMap::new(),
            next_session: 0,
        }
    }

    /// EAP method type offered after the Identity round
    fn method_type(&self) -> u32 {
        match self.config.default_method.as_str() {
            "fast" => EapType::Fast.as_u8() as u32,
            _ => EapType::Md5Challenge.as_u8() as u32,
        }
    }

    /// Start a new exchange. Returns the session id and the Identity request
    /// frame to send to the peer.
    pub fn begin(&mut self) -> (String, Vec<u8>) {
        self.next_session = self.next_session.wrapping_add(1);
        let session_id = format!("eap-{}-{}", self.next_session, unix_now());

        let identity_request = EapPacket::identity_request(0, "");
        let frame = identity_request.to_bytes();

        let now = unix_now();
        self.sessions.insert(
            session_id.clone(),
            SessionEntry {
                phase: Phase::AwaitingIdentity,
                identity_request,
                exchange: None,
                created_at: now,
                last_activity: now,
                retransmits: 0,
            },
        );

        debug!(session_id = %session_id, "started exchange");
        (session_id, frame)
    }

    /// Feed a peer frame into its exchange
    pub fn respond(&mut self, session_id: &str, frame: &[u8]) -> AuthDecision {
        let phase = match self.sessions.get_mut(session_id) {
            Some(entry) => {
                entry.last_activity = unix_now();
                entry.phase
            }
            None => {
                debug!(session_id = %session_id, "frame for unknown session");
                return AuthDecision::Discard;
            }
        };

        match phase {
            Phase::AwaitingIdentity => self.handle_identity(session_id, frame),
            Phase::MethodExchange => self.handle_method_round(session_id, frame),
        }
    }

    fn handle_identity(&mut self, session_id: &str, frame: &[u8]) -> AuthDecision {
        let entry = self.sessions.get_mut(session_id).expect("session exists");

        let packet = match EapPacket::from_bytes(frame) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(error = %e, "malformed frame during identity round");
                return Self::bump_retransmit(
                    &mut self.sessions,
                    session_id,
                    self.config.max_attempts,
                );
            }
        };

        let identity_ok = packet.code == EapCode::Response
            && packet.eap_type == Some(EapType::Identity)
            && packet.identifier == entry.identity_request.identifier;
        if !identity_ok {
            return Self::bump_retransmit(&mut self.sessions, session_id, self.config.max_attempts);
        }

        let identity = String::from_utf8_lossy(&packet.data).to_string();
        info!(identity = %identity, "identity received, selecting method");

        let ctx = self.context_for(&identity);
        let mut exchange = EapSession::new(ctx);

        if let Err(e) = exchange.begin(&self.registry, 0, self.method_type()) {
            warn!(error = %e, "method selection failed");
            return self.reject(session_id, packet.identifier.wrapping_add(1));
        }

        match exchange.next_request() {
            Some(request) => {
                let frame = request.to_bytes();
                let entry = self.sessions.get_mut(session_id).expect("session exists");
                entry.exchange = Some(exchange);
                entry.phase = Phase::MethodExchange;
                AuthDecision::Challenge { frame }
            }
            None => self.reject(session_id, packet.identifier.wrapping_add(1)),
        }
    }

    fn handle_method_round(&mut self, session_id: &str, frame: &[u8]) -> AuthDecision {
        let entry = self.sessions.get_mut(session_id).expect("session exists");
        let exchange = entry.exchange.as_mut().expect("exchange exists");

        match exchange.receive(frame) {
            ExchangeEvent::Send(request) => AuthDecision::Challenge {
                frame: request.to_bytes(),
            },
            ExchangeEvent::Retransmit(request) => {
                entry.retransmits += 1;
                if entry.retransmits > self.config.max_attempts {
                    warn!(session_id = %session_id, "too many retransmissions, aborting exchange");
                    let id = request.identifier.wrapping_add(1);
                    return self.reject(session_id, id);
                }
                AuthDecision::Challenge {
                    frame: request.to_bytes(),
                }
            }
            ExchangeEvent::Finished { success, packet } => {
                let identity = exchange
                    .context()
                    .identity
                    .clone()
                    .unwrap_or_default();
                let key_material = exchange.method().and_then(|m| m.key_material());
                let frame = packet.to_bytes();
                self.sessions.remove(session_id);

                if success {
                    info!(identity = %identity, "authentication succeeded");
                    AuthDecision::Accept {
                        identity,
                        key_material,
                        frame,
                    }
                } else {
                    info!(identity = %identity, "authentication failed");
                    AuthDecision::Reject { frame }
                }
            }
            ExchangeEvent::Discard => AuthDecision::Discard,
        }
    }

    /// Build the per-exchange context from the user store.
    ///
    /// An unknown identity gets an empty context; the method then fails the
    /// exchange without revealing whether the user exists.
    fn context_for(&self, identity: &str) -> SessionContext {
        let Some(user) = self.config.find_user(identity) else {
            debug!(identity = %identity, "unknown identity");
            return SessionContext {
                identity: Some(identity.to_string()),
                ..Default::default()
            };
        };

        SessionContext {
            identity: Some(identity.to_string()),
            password: Some(user.password.as_bytes().to_vec()),
            password_is_hashed: user.password_hashed,
            pac_key: user.parse_pac_key().ok().flatten(),
        }
    }

    fn bump_retransmit(
        sessions: &mut HashMap<String, SessionEntry>,
        session_id: &str,
        max_attempts: u32,
    ) -> AuthDecision {
        let entry = sessions.get_mut(session_id).expect("session exists");
        entry.retransmits += 1;
        if entry.retransmits > max_attempts {
            warn!(session_id = %session_id, "too many retransmissions during identity round");
            let id = entry.identity_request.identifier.wrapping_add(1);
            sessions.remove(session_id);
            return AuthDecision::Reject {
                frame: EapPacket::failure(id).to_bytes(),
            };
        }
        AuthDecision::Challenge {
            frame: entry.identity_request.to_bytes(),
        }
    }

    fn reject(&mut self, session_id: &str, identifier: u8) -> AuthDecision {
        self.sessions.remove(session_id);
        AuthDecision::Reject {
            frame: EapPacket::failure(identifier).to_bytes(),
        }
    }

    /// Abort an exchange, releasing its method state and key material
    pub fn abort(&mut self, session_id: &str) {
        if let Some(mut entry) = self.sessions.remove(session_id) {
            if let Some(exchange) = entry.exchange.as_mut() {
                exchange.reset();
            }
            debug!(session_id = %session_id, "exchange aborted");
        }
    }

    /// Drop sessions idle longer than the configured timeout
    pub fn cleanup_timed_out(&mut self) -> usize {
        let timeout = self.config.session_timeout;
        let now = unix_now();
        let before = self.sessions.len();
        self.sessions
            .retain(|_, entry| now.saturating_sub(entry.last_activity) <= timeout);
        before - self.sessions.len()
    }

    /// Number of live exchanges
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Age of a session in seconds
    pub fn session_age(&self, session_id: &str) -> Option<u64> {
        self.sessions
            .get(session_id)
            .map(|entry| unix_now().saturating_sub(entry.created_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::User;
    use eap_proto::methods::eap_md5;

    fn test_config() -> Config {
        Config {
            users: vec![User {
                username: "alice".to_string(),
                password: "password123".to_string(),
                password_hashed: false,
                pac_key: None,
            }],
            ..Config::default()
        }
    }

    fn authenticator() -> Authenticator {
        let mut registry = MethodRegistry::new();
        eap_md5::register(&mut registry).unwrap();
        Authenticator::new(Arc::new(registry), test_config())
    }

    /// Run identity round, returning the method challenge packet
    fn run_identity(auth: &mut Authenticator, session_id: &str, identity: &str) -> EapPacket {
        let response = EapPacket::identity_response(0, identity);
        match auth.respond(session_id, &response.to_bytes()) {
            AuthDecision::Challenge { frame } => EapPacket::from_bytes(&frame).unwrap(),
            _ => panic!("expected method challenge after identity"),
        }
    }

    #[test]
    fn test_begin_sends_identity_request() {
        let mut auth = authenticator();
        let (session_id, frame) = auth.begin();

        let packet = EapPacket::from_bytes(&frame).unwrap();
        assert_eq!(packet.code, EapCode::Request);
        assert_eq!(packet.eap_type, Some(EapType::Identity));
        assert_eq!(auth.session_count(), 1);
        assert!(auth.session_age(&session_id).is_some());
    }

    #[test]
    fn test_full_md5_exchange_accepts() {
        let mut auth = authenticator();
        let (session_id, _) = auth.begin();

        let challenge = run_identity(&mut auth, &session_id, "alice");
        assert_eq!(challenge.eap_type, Some(EapType::Md5Challenge));

        let digest = eap_md5::compute_response(
            challenge.identifier,
            b"password123",
            &challenge.data[1..],
        );
        let response = eap_md5::response_packet(challenge.identifier, &digest);

        match auth.respond(&session_id, &response.to_bytes()) {
            AuthDecision::Accept {
                identity,
                key_material,
                frame,
            } => {
                assert_eq!(identity, "alice");
                // MD5 derives no keys
                assert!(key_material.is_none());
                let packet = EapPacket::from_bytes(&frame).unwrap();
                assert_eq!(packet.code, EapCode::Success);
            }
            _ => panic!("expected accept"),
        }
        // Session released on completion
        assert_eq!(auth.session_count(), 0);
    }

    #[test]
    fn test_wrong_password_rejects() {
        let mut auth = authenticator();
        let (session_id, _) = auth.begin();

        let challenge = run_identity(&mut auth, &session_id, "alice");
        let digest =
            eap_md5::compute_response(challenge.identifier, b"wrong", &challenge.data[1..]);
        let response = eap_md5::response_packet(challenge.identifier, &digest);

        match auth.respond(&session_id, &response.to_bytes()) {
            AuthDecision::Reject { frame } => {
                let packet = EapPacket::from_bytes(&frame).unwrap();
                assert_eq!(packet.code, EapCode::Failure);
            }
            _ => panic!("expected reject"),
        }
    }

    #[test]
    fn test_unknown_user_fails_without_leaking() {
        // The exchange proceeds and fails at process time, the same shape as
        // a wrong password.
        let mut auth = authenticator();
        let (session_id, _) = auth.begin();

        let challenge = run_identity(&mut auth, &session_id, "mallory");
        assert_eq!(challenge.eap_type, Some(EapType::Md5Challenge));

        let digest =
            eap_md5::compute_response(challenge.identifier, b"anything", &challenge.data[1..]);
        let response = eap_md5::response_packet(challenge.identifier, &digest);

        assert!(matches!(
            auth.respond(&session_id, &response.to_bytes()),
            AuthDecision::Reject { .. }
        ));
    }

    #[test]
    fn test_unknown_session_discarded() {
        let mut auth = authenticator();
        let response = EapPacket::identity_response(0, "alice");
        assert!(matches!(
            auth.respond("nonexistent", &response.to_bytes()),
            AuthDecision::Discard
        ));
    }

    #[test]
    fn test_garbage_during_identity_retransmits() {
        let mut auth = authenticator();
        let (session_id, first) = auth.begin();

        match auth.respond(&session_id, &[0xFF]) {
            AuthDecision::Challenge { frame } => assert_eq!(frame, first),
            _ => panic!("expected identity retransmission"),
        }
    }

    #[test]
    fn test_retransmit_limit_aborts() {
        let mut auth = authenticator();
        let (session_id, _) = auth.begin();

        let mut rejected = false;
        for _ in 0..=auth.config.max_attempts {
            if let AuthDecision::Reject { .. } = auth.respond(&session_id, &[0xFF]) {
                rejected = true;
                break;
            }
        }
        assert!(rejected);
        assert_eq!(auth.session_count(), 0);
    }

    #[test]
    fn test_abort_releases_session() {
        let mut auth = authenticator();
        let (session_id, _) = auth.begin();
        run_identity(&mut auth, &session_id, "alice");

        auth.abort(&session_id);
        assert_eq!(auth.session_count(), 0);

        // Aborting twice is harmless
        auth.abort(&session_id);
    }

    #[test]
    fn test_cleanup_timed_out() {
        let mut auth = authenticator();
        let (session_id, _) = auth.begin();

        // Nothing is stale yet
        assert_eq!(auth.cleanup_timed_out(), 0);
        assert_eq!(auth.session_count(), 1);

        // Backdate the session past the timeout
        auth.sessions.get_mut(&session_id).unwrap().last_activity = 0;
        assert_eq!(auth.cleanup_timed_out(), 1);
        assert_eq!(auth.session_count(), 0);
    }

    #[test]
    fn test_concurrent_sessions_independent() {
        let mut auth = authenticator();
        let (first, _) = auth.begin();
        let (second, _) = auth.begin();
        assert_ne!(first, second);
        assert_eq!(auth.session_count(), 2);

        // Completing one leaves the other untouched
        let challenge = run_identity(&mut auth, &first, "alice");
        let digest = eap_md5::compute_response(
            challenge.identifier,
            b"password123",
            &challenge.data[1..],
        );
        let response = eap_md5::response_packet(challenge.identifier, &digest);
        auth.respond(&first, &response.to_bytes());

        assert_eq!(auth.session_count(), 1);
    }
}
