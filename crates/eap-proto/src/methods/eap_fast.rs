//! EAP-FAST tunneled method engine (RFC 4851)
//!
//! EAP-FAST is a two-phase protocol: Phase 1 establishes a TLS tunnel (here
//! consumed as an opaque [`SecureTunnel`] collaborator), Phase 2 runs an
//! inner EAP method plus control TLVs inside the tunnel and binds the two
//! together with a compound-key MAC before any session keys are released.
//!
//! # Phase 2 round structure
//!
//! ```text
//! server                                peer
//!   | EAP-Payload TLV (inner request) -> |
//!   | <- EAP-Payload TLV (inner resp)    |   (repeat until inner done)
//!   | Result + Crypto-Binding TLV ->     |
//!   | <- Result + Crypto-Binding TLV     |
//!   outcome decided; MSK/EMSK derived on Success
//! ```

use hmac::{Hmac, Mac};
use rand::Rng;
use sha1::Sha1;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::method::{
    EapMethod, KeyMaterial, MethodDescriptor, MethodOutcome, MethodRegistry, SessionContext,
};
use crate::packet::{EapCode, EapError, EapPacket, EapType};
use crate::tlv::{self, Tlv, TlvError, TlvResult, TlvSignal, TlvType};
use crate::tprf::{
    derive_emsk, derive_imck, derive_master_secret, derive_msk, CMK_LEN, ISK_LEN, PAC_KEY_LEN,
    SIMCK_LEN, TLS_RANDOM_LEN,
};

type HmacSha1 = Hmac<Sha1>;

/// Secure-channel collaborator carrying the Phase 2 exchange.
///
/// The engine never sees TLS records; it hands plaintext TLV payloads to the
/// tunnel and receives decrypted payloads back. The tunnel also exposes the
/// handshake parameters the key schedule consumes.
pub trait SecureTunnel {
    /// Protect an outgoing tunnel payload
    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, EapError>;

    /// Recover the plaintext of an incoming tunnel payload
    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, EapError>;

    /// Server random from the tunnel handshake
    fn server_random(&self) -> [u8; TLS_RANDOM_LEN];

    /// Client random from the tunnel handshake
    fn client_random(&self) -> [u8; TLS_RANDOM_LEN];

    /// Initial compound session key (S-IMCK[0]) derived from the tunnel
    /// key block
    fn session_key_seed(&self) -> [u8; SIMCK_LEN];
}

/// Crypto-Binding TLV sub-type values
pub const BINDING_SUBTYPE_REQUEST: u8 = 0;
pub const BINDING_SUBTYPE_RESPONSE: u8 = 1;

/// Crypto-Binding TLV version carried in outgoing records
const BINDING_VERSION: u8 = 1;

/// Typed view over a Crypto-Binding TLV value.
///
/// Constructed only after the full record length is validated; field
/// accessors never re-check offsets.
///
/// Value layout (56 bytes):
/// ```text
/// | Reserved | Version | Received Ver | Sub-Type | Nonce (32) | Compound MAC (20) |
/// ```
#[derive(Debug, Clone, Copy)]
pub struct CryptoBinding<'a> {
    mandatory: bool,
    value: &'a [u8],
}

impl<'a> CryptoBinding<'a> {
    /// Fixed value length of the binding record
    pub const VALUE_LEN: usize = 56;

    const NONCE_OFF: usize = 4;
    const MAC_OFF: usize = 36;

    /// Validate a TLV value as a binding record. `None` if too short.
    pub fn new(mandatory: bool, value: &'a [u8]) -> Option<Self> {
        if value.len() < Self::VALUE_LEN {
            return None;
        }
        Some(CryptoBinding { mandatory, value })
    }

    pub fn version(&self) -> u8 {
        self.value[1]
    }

    pub fn received_version(&self) -> u8 {
        self.value[2]
    }

    pub fn subtype(&self) -> u8 {
        self.value[3]
    }

    pub fn nonce(&self) -> &'a [u8] {
        &self.value[Self::NONCE_OFF..Self::MAC_OFF]
    }

    pub fn compound_mac(&self) -> &'a [u8] {
        &self.value[Self::MAC_OFF..Self::VALUE_LEN]
    }

    /// Verify the record's compound MAC against a derived compound key.
    pub fn verify(&self, cmk: &[u8; CMK_LEN]) -> bool {
        let expected = compound_mac(cmk, self.mandatory, &self.value[..Self::VALUE_LEN]);
        bool::from(expected.ct_eq(self.compound_mac()))
    }
}

/// Compound MAC over the full binding record (header included) with the MAC
/// field zeroed, keyed by the compound key.
fn compound_mac(cmk: &[u8; CMK_LEN], mandatory: bool, value: &[u8]) -> [u8; CMK_LEN] {
    let mut record = Vec::with_capacity(Tlv::HEADER_LEN + value.len());
    Tlv::put_header(
        &mut record,
        TlvType::CryptoBinding as u16,
        mandatory,
        value.len() as u16,
    );
    record.extend_from_slice(value);

    let mac_field = Tlv::HEADER_LEN + CryptoBinding::MAC_OFF;
    record[mac_field..mac_field + CMK_LEN].fill(0);

    let mut mac = HmacSha1::new_from_slice(cmk).expect("HMAC can take key of any size");
    mac.update(&record);

    let mut out = [0u8; CMK_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// Build an outgoing Crypto-Binding TLV with a valid compound MAC
pub fn build_crypto_binding(
    cmk: &[u8; CMK_LEN],
    subtype: u8,
    nonce: &[u8; 32],
) -> Tlv {
    let mut value = vec![0u8; CryptoBinding::VALUE_LEN];
    value[1] = BINDING_VERSION;
    value[2] = BINDING_VERSION;
    value[3] = subtype;
    value[CryptoBinding::NONCE_OFF..CryptoBinding::MAC_OFF].copy_from_slice(nonce);

    let mac = compound_mac(cmk, true, &value);
    value[CryptoBinding::MAC_OFF..].copy_from_slice(&mac);

    Tlv::new(TlvType::CryptoBinding, true, value)
}

/// Accumulator built while scanning one decrypted tunnel payload.
///
/// Byte fields borrow from the payload buffer and must not outlive it.
#[derive(Debug, Default)]
pub struct TlvParseResult<'a> {
    /// Encapsulated inner EAP packet
    pub eap_payload: Option<&'a [u8]>,
    /// Result TLV status
    pub result: Option<TlvResult>,
    /// Intermediate-Result TLV status
    pub iresult: Option<TlvResult>,
    /// Crypto-Binding record
    pub crypto_binding: Option<CryptoBinding<'a>>,
    /// Request-Action TLV value
    pub request_action: Option<u16>,
    /// PAC TLV value (opaque provisioning credential)
    pub pac: Option<&'a [u8]>,
}

/// Scan a decrypted tunnel payload into a [`TlvParseResult`].
///
/// Each non-informational type may occur at most once; a duplicate is a
/// protocol violation that stops the scan. An undersized Result /
/// Intermediate-Result / Request-Action marks the affected field Failure and
/// keeps scanning; an undersized Crypto-Binding is fatal because the record
/// layout is needed for MAC verification.
pub fn parse_payload(payload: &[u8]) -> Result<TlvParseResult<'_>, TlvError> {
    let mut parsed = TlvParseResult::default();

    tlv::scan(payload, |tlv_type, mandatory, value| {
        match TlvType::from_u16(tlv_type) {
            Some(TlvType::EapPayload) => {
                if parsed.eap_payload.is_some() {
                    debug!("more than one EAP-Payload TLV in the message");
                    return TlvSignal::FatalMalformed;
                }
                parsed.eap_payload = Some(value);
                TlvSignal::Accepted
            }
            Some(TlvType::Result) => {
                if parsed.result.is_some() {
                    debug!("more than one Result TLV in the message");
                    return TlvSignal::FatalMalformed;
                }
                if value.len() < 2 {
                    debug!("too short Result TLV");
                    parsed.result = Some(TlvResult::Failure);
                    return TlvSignal::Accepted;
                }
                parsed.result = Some(TlvResult::from_wire(u16::from_be_bytes([
                    value[0], value[1],
                ])));
                TlvSignal::Accepted
            }
            Some(TlvType::IntermediateResult) => {
                if parsed.iresult.is_some() {
                    debug!("more than one Intermediate-Result TLV in the message");
                    return TlvSignal::FatalMalformed;
                }
                if value.len() < 2 {
                    debug!("too short Intermediate-Result TLV");
                    parsed.iresult = Some(TlvResult::Failure);
                    return TlvSignal::Accepted;
                }
                parsed.iresult = Some(TlvResult::from_wire(u16::from_be_bytes([
                    value[0], value[1],
                ])));
                TlvSignal::Accepted
            }
            Some(TlvType::CryptoBinding) => {
                if parsed.crypto_binding.is_some() {
                    debug!("more than one Crypto-Binding TLV in the message");
                    return TlvSignal::FatalMalformed;
                }
                match CryptoBinding::new(mandatory, value) {
                    Some(binding) => {
                        parsed.crypto_binding = Some(binding);
                        TlvSignal::Accepted
                    }
                    None => {
                        debug!("too short Crypto-Binding TLV");
                        TlvSignal::FatalMalformed
                    }
                }
            }
            Some(TlvType::RequestAction) => {
                if parsed.request_action.is_some() {
                    debug!("more than one Request-Action TLV in the message");
                    return TlvSignal::FatalMalformed;
                }
                if value.len() < 2 {
                    debug!("too short Request-Action TLV");
                    parsed.iresult = Some(TlvResult::Failure);
                    return TlvSignal::Accepted;
                }
                parsed.request_action = Some(u16::from_be_bytes([value[0], value[1]]));
                TlvSignal::Accepted
            }
            Some(TlvType::Pac) => {
                if parsed.pac.is_some() {
                    debug!("more than one PAC TLV in the message");
                    return TlvSignal::FatalMalformed;
                }
                parsed.pac = Some(value);
                TlvSignal::Accepted
            }
            _ => TlvSignal::UnknownIgnorable,
        }
    })?;

    Ok(parsed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FastPhase {
    /// Inner EAP method rounds inside the tunnel
    InnerAuth,
    /// Protected result + crypto-binding exchange
    CryptoBinding,
    /// Outcome decided
    Done,
}

/// EAP-FAST server-side method engine
pub struct EapFast {
    tunnel: Box<dyn SecureTunnel>,
    inner: Box<dyn EapMethod>,
    pac_key: [u8; PAC_KEY_LEN],
    phase: FastPhase,
    state: MethodOutcome,
    /// Current S-IMCK[j]
    simck: [u8; SIMCK_LEN],
    /// Compound MAC key, set once the inner method completes
    cmk: Option<[u8; CMK_LEN]>,
    keys: Option<KeyMaterial>,
}

impl std::fmt::Debug for EapFast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EapFast")
            .field("phase", &self.phase)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl EapFast {
    /// Create an engine over an established tunnel, hosting `inner` as the
    /// Phase 2 authentication method.
    ///
    /// Fails if no tunnel provisioning key is configured for the peer; the
    /// master secret cannot be derived without one.
    pub fn new(
        tunnel: Box<dyn SecureTunnel>,
        inner: Box<dyn EapMethod>,
        ctx: &SessionContext,
    ) -> Result<Self, EapError> {
        let Some(pac_key) = ctx.pac_key else {
            warn!("EAP-FAST: no tunnel provisioning key configured for peer");
            return Err(EapError::Configuration(
                "tunnel provisioning key not configured",
            ));
        };

        let simck = tunnel.session_key_seed();
        Ok(EapFast {
            tunnel,
            inner,
            pac_key,
            phase: FastPhase::InnerAuth,
            state: MethodOutcome::Continue,
            simck,
            cmk: None,
            keys: None,
        })
    }

    /// Derived session keys; `None` until the outcome is Success.
    pub fn exported_keys(&self) -> Option<&KeyMaterial> {
        self.keys.as_ref()
    }

    /// Frame an inner EAP packet as a single mandatory EAP-Payload TLV.
    ///
    /// The buffer is sized exactly to header + payload.
    pub fn wrap_eap_payload(inner: &EapPacket) -> Vec<u8> {
        let msg = inner.to_bytes();
        let mut buf = Vec::with_capacity(Tlv::HEADER_LEN + msg.len());
        Tlv::put_header(&mut buf, TlvType::EapPayload as u16, true, msg.len() as u16);
        buf.extend_from_slice(&msg);
        buf
    }

    /// Encrypt a plaintext TLV payload and wrap it as an outer EAP request
    fn tunnel_request(&mut self, id: u8, plaintext: &[u8]) -> Option<EapPacket> {
        match self.tunnel.encrypt(plaintext) {
            Ok(ciphertext) => Some(EapPacket::new(
                EapCode::Request,
                id,
                Some(EapType::Fast),
                ciphertext,
            )),
            Err(e) => {
                warn!(error = %e, "EAP-FAST: tunnel encryption failed");
                self.fail();
                None
            }
        }
    }

    fn fail(&mut self) {
        self.state = MethodOutcome::Failure;
        self.phase = FastPhase::Done;
    }

    /// Advance the compound key schedule after the inner method completed.
    ///
    /// The method contract exposes no inner key material, so the ISK is the
    /// all-zero value defined for inner methods without key derivation.
    fn advance_key_schedule(&mut self) {
        let isk = [0u8; ISK_LEN];
        let (simck, cmk) = derive_imck(&self.simck, &isk);
        self.simck = simck;
        self.cmk = Some(cmk);
    }

    /// Outcome is Success: derive and expose the session keys.
    fn finish_success(&mut self) {
        let master_secret = derive_master_secret(
            &self.pac_key,
            &self.tunnel.server_random(),
            &self.tunnel.client_random(),
        );
        self.keys = Some(KeyMaterial {
            master_secret,
            session_key: derive_msk(&self.simck),
            extended_session_key: derive_emsk(&self.simck),
        });
        self.state = MethodOutcome::Success;
        self.phase = FastPhase::Done;
        debug!("EAP-FAST: authentication done - success");
    }

    fn process_inner_round(&mut self, ctx: &SessionContext, parsed: &TlvParseResult<'_>) {
        if parsed.result == Some(TlvResult::Failure) {
            debug!("EAP-FAST: peer reported failure during inner authentication");
            self.fail();
            return;
        }

        let Some(payload) = parsed.eap_payload else {
            // Pure control round; nothing for the inner method this time
            debug!("EAP-FAST: no EAP-Payload TLV in this round");
            return;
        };

        let inner_resp = match EapPacket::from_bytes(payload) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(error = %e, "EAP-FAST: malformed inner EAP packet");
                self.fail();
                return;
            }
        };

        if self.inner.check(ctx, &inner_resp) {
            debug!("EAP-FAST: inner method rejected response");
            return;
        }
        self.inner.process(ctx, &inner_resp);

        if parsed.iresult == Some(TlvResult::Failure) {
            debug!("EAP-FAST: peer reported intermediate failure");
            self.fail();
            return;
        }

        if self.inner.is_done() {
            if self.inner.is_success() {
                self.advance_key_schedule();
                self.phase = FastPhase::CryptoBinding;
            } else {
                debug!("EAP-FAST: inner method failed");
                self.fail();
            }
        }
    }

    fn process_binding_round(&mut self, parsed: &TlvParseResult<'_>) {
        let Some(cmk) = self.cmk else {
            self.fail();
            return;
        };

        // A failed (or missing) binding overrides any Result TLV content:
        // without it the inner method and the tunnel are not proven to
        // terminate at the same endpoints.
        let binding_ok = parsed
            .crypto_binding
            .as_ref()
            .map(|binding| binding.verify(&cmk))
            .unwrap_or(false);

        if !binding_ok {
            warn!("EAP-FAST: crypto-binding verification failed");
            self.fail();
            return;
        }

        match parsed.result {
            Some(TlvResult::Success) => self.finish_success(),
            other => {
                debug!(?other, "EAP-FAST: peer did not confirm success");
                self.fail();
            }
        }
    }
}

impl EapMethod for EapFast {
    fn build_request(&mut self, ctx: &SessionContext, id: u8) -> Option<EapPacket> {
        match self.phase {
            FastPhase::InnerAuth => {
                let inner_req = match self.inner.build_request(ctx, id) {
                    Some(req) => req,
                    None => {
                        debug!("EAP-FAST: inner method produced no request");
                        self.fail();
                        return None;
                    }
                };
                let plaintext = Self::wrap_eap_payload(&inner_req);
                self.tunnel_request(id, &plaintext)
            }
            FastPhase::CryptoBinding => {
                let cmk = self.cmk?;
                let mut nonce = [0u8; 32];
                rand::rng().fill(&mut nonce);

                let plaintext = Tlv::encode_all(&[
                    Tlv::result(TlvResult::Success),
                    build_crypto_binding(&cmk, BINDING_SUBTYPE_REQUEST, &nonce),
                ]);
                self.tunnel_request(id, &plaintext)
            }
            FastPhase::Done => None,
        }
    }

    fn check(&self, _ctx: &SessionContext, resp: &EapPacket) -> bool {
        let Some(data) = resp.response_data(EapType::Fast) else {
            debug!("EAP-FAST: invalid frame");
            return true;
        };
        if data.is_empty() {
            debug!("EAP-FAST: empty tunnel payload");
            return true;
        }
        false
    }

    fn process(&mut self, ctx: &SessionContext, resp: &EapPacket) {
        let Some(data) = resp.response_data(EapType::Fast) else {
            return;
        };

        let plaintext = match self.tunnel.decrypt(data) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(error = %e, "EAP-FAST: tunnel decryption failed");
                self.fail();
                return;
            }
        };

        let parsed = match parse_payload(&plaintext) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "EAP-FAST: tunnel payload rejected");
                self.fail();
                return;
            }
        };

        match self.phase {
            FastPhase::InnerAuth => self.process_inner_round(ctx, &parsed),
            FastPhase::CryptoBinding => self.process_binding_round(&parsed),
            FastPhase::Done => {}
        }
    }

    fn is_done(&self) -> bool {
        self.state.is_terminal()
    }

    fn is_success(&self) -> bool {
        self.state == MethodOutcome::Success
    }

    fn reset(&mut self) {
        self.inner.reset();
        self.phase = FastPhase::InnerAuth;
        self.state = MethodOutcome::Continue;
        self.simck = self.tunnel.session_key_seed();
        self.cmk = None;
        self.keys = None;
    }

    fn key_material(&self) -> Option<KeyMaterial> {
        self.keys.clone()
    }
}

/// Register EAP-FAST with a method registry.
///
/// `tunnel_factory` yields the established secure channel for a session;
/// `inner_factory` constructs the hosted Phase 2 method.
pub fn register<T, I>(
    registry: &mut MethodRegistry,
    tunnel_factory: T,
    inner_factory: I,
) -> Result<(), EapError>
where
    T: Fn(&SessionContext) -> Result<Box<dyn SecureTunnel>, EapError> + Send + Sync + 'static,
    I: Fn(&SessionContext) -> Result<Box<dyn EapMethod>, EapError> + Send + Sync + 'static,
{
    registry.register(
        MethodDescriptor::ietf(EapType::Fast.as_u8() as u32, "FAST"),
        Box::new(move |ctx| {
            let tunnel = tunnel_factory(ctx)?;
            let inner = inner_factory(ctx)?;
            Ok(Box::new(EapFast::new(tunnel, inner, ctx)?) as Box<dyn EapMethod>)
        }),
    )
}
