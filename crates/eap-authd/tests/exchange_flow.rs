//! End-to-end exchange flows through the authenticator, playing the peer
//! side by hand.

use std::sync::Arc;

use eap_authd::{AuthDecision, Authenticator, Config, User};
use eap_proto::method::{EapMethod, MethodRegistry};
use eap_proto::methods::eap_fast::{
    self, build_crypto_binding, parse_payload, EapFast, SecureTunnel, BINDING_SUBTYPE_RESPONSE,
};
use eap_proto::methods::eap_md5::{self, EapMd5};
use eap_proto::packet::{EapCode, EapError, EapPacket, EapType};
use eap_proto::tlv::{Tlv, TlvResult};
use eap_proto::tprf::{derive_imck, CMK_LEN, ISK_LEN, PAC_KEY_LEN, SIMCK_LEN, TLS_RANDOM_LEN};

/// Tunnel stub: identity encryption with fixed handshake parameters, so the
/// peer side can compute the same compound keys.
struct PlainTunnel;

const SESSION_KEY_SEED: [u8; SIMCK_LEN] = [0x42; SIMCK_LEN];

impl SecureTunnel for PlainTunnel {
    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, EapError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, EapError> {
        Ok(ciphertext.to_vec())
    }

    fn server_random(&self) -> [u8; TLS_RANDOM_LEN] {
        [0xA5; TLS_RANDOM_LEN]
    }

    fn client_random(&self) -> [u8; TLS_RANDOM_LEN] {
        [0x5A; TLS_RANDOM_LEN]
    }

    fn session_key_seed(&self) -> [u8; SIMCK_LEN] {
        SESSION_KEY_SEED
    }
}

fn fast_config() -> Config {
    Config {
        users: vec![User {
            username: "alice".to_string(),
            password: "password123".to_string(),
            password_hashed: false,
            pac_key: Some("77".repeat(PAC_KEY_LEN)),
        }],
        default_method: "fast".to_string(),
        ..Config::default()
    }
}

fn fast_authenticator() -> Authenticator {
    let mut registry = MethodRegistry::new();
    eap_md5::register(&mut registry).unwrap();
    eap_fast::register(
        &mut registry,
        |_ctx| Ok(Box::new(PlainTunnel) as Box<dyn SecureTunnel>),
        |_ctx| Ok(Box::new(EapMd5::new()) as Box<dyn EapMethod>),
    )
    .unwrap();

    Authenticator::new(Arc::new(registry), fast_config())
}

fn challenge_packet(decision: AuthDecision) -> EapPacket {
    match decision {
        AuthDecision::Challenge { frame } => EapPacket::from_bytes(&frame).unwrap(),
        _ => panic!("expected a challenge"),
    }
}

/// The compound key after one inner method with an all-zero ISK
fn peer_cmk() -> [u8; CMK_LEN] {
    let (_, cmk) = derive_imck(&SESSION_KEY_SEED, &[0u8; ISK_LEN]);
    cmk
}

#[test]
fn tunneled_exchange_exports_keys() {
    let mut auth = fast_authenticator();
    let (session_id, frame) = auth.begin();

    // Identity round
    let identity_request = EapPacket::from_bytes(&frame).unwrap();
    let identity_response =
        EapPacket::identity_response(identity_request.identifier, "alice");
    let outer = challenge_packet(auth.respond(&session_id, &identity_response.to_bytes()));
    assert_eq!(outer.eap_type, Some(EapType::Fast));

    // Unwrap the inner MD5 challenge (identity tunnel)
    let parsed = parse_payload(&outer.data).unwrap();
    let inner_request = EapPacket::from_bytes(parsed.eap_payload.unwrap()).unwrap();
    assert_eq!(inner_request.eap_type, Some(EapType::Md5Challenge));

    // Answer it and wrap the response
    let digest = eap_md5::compute_response(
        inner_request.identifier,
        b"password123",
        &inner_request.data[1..],
    );
    let inner_response = eap_md5::response_packet(inner_request.identifier, &digest);
    let wrapped = EapFast::wrap_eap_payload(&inner_response);
    let response = EapPacket::new(
        EapCode::Response,
        outer.identifier,
        Some(EapType::Fast),
        wrapped,
    );

    // Server moves to the protected result round
    let binding_round = challenge_packet(auth.respond(&session_id, &response.to_bytes()));
    let parsed = parse_payload(&binding_round.data).unwrap();
    assert_eq!(parsed.result, Some(TlvResult::Success));
    let server_binding = parsed.crypto_binding.unwrap();
    assert!(server_binding.verify(&peer_cmk()));

    // Peer confirms
    let confirm = Tlv::encode_all(&[
        Tlv::result(TlvResult::Success),
        build_crypto_binding(&peer_cmk(), BINDING_SUBTYPE_RESPONSE, &[7u8; 32]),
    ]);
    let response = EapPacket::new(
        EapCode::Response,
        binding_round.identifier,
        Some(EapType::Fast),
        confirm,
    );

    match auth.respond(&session_id, &response.to_bytes()) {
        AuthDecision::Accept {
            identity,
            key_material,
            frame,
        } => {
            assert_eq!(identity, "alice");
            let keys = key_material.expect("tunneled method exports keys");
            assert_eq!(keys.master_secret.len(), 48);
            assert_eq!(keys.session_key.len(), 64);
            assert_eq!(keys.extended_session_key.len(), 64);

            let packet = EapPacket::from_bytes(&frame).unwrap();
            assert_eq!(packet.code, EapCode::Success);
        }
        _ => panic!("expected accept with key material"),
    }
}

#[test]
fn tunneled_exchange_bad_binding_rejects() {
    let mut auth = fast_authenticator();
    let (session_id, frame) = auth.begin();

    let identity_request = EapPacket::from_bytes(&frame).unwrap();
    let identity_response =
        EapPacket::identity_response(identity_request.identifier, "alice");
    let outer = challenge_packet(auth.respond(&session_id, &identity_response.to_bytes()));

    let parsed = parse_payload(&outer.data).unwrap();
    let inner_request = EapPacket::from_bytes(parsed.eap_payload.unwrap()).unwrap();
    let digest = eap_md5::compute_response(
        inner_request.identifier,
        b"password123",
        &inner_request.data[1..],
    );
    let inner_response = eap_md5::response_packet(inner_request.identifier, &digest);
    let response = EapPacket::new(
        EapCode::Response,
        outer.identifier,
        Some(EapType::Fast),
        EapFast::wrap_eap_payload(&inner_response),
    );

    let binding_round = challenge_packet(auth.respond(&session_id, &response.to_bytes()));

    // Result claims success, but the binding was MACed with the wrong key
    let confirm = Tlv::encode_all(&[
        Tlv::result(TlvResult::Success),
        build_crypto_binding(&[0xEE; CMK_LEN], BINDING_SUBTYPE_RESPONSE, &[7u8; 32]),
    ]);
    let response = EapPacket::new(
        EapCode::Response,
        binding_round.identifier,
        Some(EapType::Fast),
        confirm,
    );

    match auth.respond(&session_id, &response.to_bytes()) {
        AuthDecision::Reject { frame } => {
            let packet = EapPacket::from_bytes(&frame).unwrap();
            assert_eq!(packet.code, EapCode::Failure);
        }
        _ => panic!("expected reject"),
    }
}

#[test]
fn md5_exchange_via_authenticator() {
    let mut registry = MethodRegistry::new();
    eap_md5::register(&mut registry).unwrap();

    let config = Config {
        users: vec![User {
            username: "alice".to_string(),
            password: "password123".to_string(),
            password_hashed: false,
            pac_key: None,
        }],
        ..Config::default()
    };
    let mut auth = Authenticator::new(Arc::new(registry), config);

    let (session_id, frame) = auth.begin();
    let identity_request = EapPacket::from_bytes(&frame).unwrap();
    let identity_response =
        EapPacket::identity_response(identity_request.identifier, "alice");

    let challenge = challenge_packet(auth.respond(&session_id, &identity_response.to_bytes()));
    let digest = eap_md5::compute_response(
        challenge.identifier,
        b"password123",
        &challenge.data[1..],
    );
    let response = eap_md5::response_packet(challenge.identifier, &digest);

    match auth.respond(&session_id, &response.to_bytes()) {
        AuthDecision::Accept { key_material, .. } => assert!(key_material.is_none()),
        _ => panic!("expected accept"),
    }
}
