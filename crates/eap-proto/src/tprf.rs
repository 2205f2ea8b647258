//! T-PRF key derivation (RFC 4851 Section 5.5)
//!
//! The tunneled method derives all of its secrets through a SHA-1-based
//! pseudorandom expansion function:
//!
//! ```text
//! T1 = HMAC-SHA1(key, S + outputlength + 0x01)
//! T2 = HMAC-SHA1(key, T1 + S + outputlength + 0x02)
//! ...
//! where S = label + 0x00 + seed
//! ```
//!
//! Blocks are concatenated and truncated to the requested length. The labels
//! are protocol constants; a single changed byte breaks interoperability
//! silently, so they are pinned by tests.

use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// TLS random length (server_random / client_random)
pub const TLS_RANDOM_LEN: usize = 32;

/// Tunnel provisioning key (PAC-Key) length
pub const PAC_KEY_LEN: usize = 32;

/// TLS master secret length
pub const MASTER_SECRET_LEN: usize = 48;

/// Compound session key (S-IMCK) length
pub const SIMCK_LEN: usize = 40;

/// Compound MAC key (CMK) length
pub const CMK_LEN: usize = 20;

/// Inner-method session key (ISK) length
pub const ISK_LEN: usize = 32;

/// Master Session Key length
pub const MSK_LEN: usize = 64;

/// Extended Master Session Key length
pub const EMSK_LEN: usize = 64;

/// Label for deriving the TLS master secret from a PAC-Key (RFC 4851, 5.1)
pub const LABEL_PAC_TO_MASTER_SECRET: &str = "PAC to master secret label hash";

/// Label for the compound key schedule (RFC 4851, 5.2)
pub const LABEL_COMPOUND_KEYS: &str = "Inner Methods Compound Keys";

/// Label for MSK derivation (RFC 4851, 5.4)
pub const LABEL_SESSION_KEY: &str = "Session Key Generating Function";

/// Label for EMSK derivation (RFC 4851, 5.4)
pub const LABEL_EXTENDED_SESSION_KEY: &str = "Extended Session Key Generating Function";

/// Expand `key` under `label` and `seed` into `out_len` pseudorandom bytes.
///
/// Each block MACs the previous block, the label (followed by its NUL
/// separator octet), the seed, the requested output length (big-endian) and
/// a 1-based block counter. Deterministic for fixed inputs.
pub fn t_prf(key: &[u8], label: &str, seed: &[u8], out_len: usize) -> Vec<u8> {
    let out_len_be = (out_len as u16).to_be_bytes();
    let mut out = Vec::with_capacity(out_len);
    let mut block: Vec<u8> = Vec::new();
    let mut counter: u8 = 0;

    while out.len() < out_len {
        counter = counter.wrapping_add(1);

        let mut mac = HmacSha1::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(&block);
        mac.update(label.as_bytes());
        mac.update(&[0x00]);
        mac.update(seed);
        mac.update(&out_len_be);
        mac.update(&[counter]);
        block = mac.finalize().into_bytes().to_vec();

        out.extend_from_slice(&block);
    }

    out.truncate(out_len);
    out
}

/// Derive the 48-byte TLS master secret from a PAC-Key (RFC 4851, 5.1):
///
/// ```text
/// master_secret = T-PRF(PAC-Key, "PAC to master secret label hash",
///                       server_random + client_random, 48)
/// ```
///
/// The fixed-size random parameters make a wrong-length caller a compile
/// error rather than a runtime condition.
pub fn derive_master_secret(
    pac_key: &[u8; PAC_KEY_LEN],
    server_random: &[u8; TLS_RANDOM_LEN],
    client_random: &[u8; TLS_RANDOM_LEN],
) -> [u8; MASTER_SECRET_LEN] {
    let mut seed = [0u8; 2 * TLS_RANDOM_LEN];
    seed[..TLS_RANDOM_LEN].copy_from_slice(server_random);
    seed[TLS_RANDOM_LEN..].copy_from_slice(client_random);

    let out = t_prf(pac_key, LABEL_PAC_TO_MASTER_SECRET, &seed, MASTER_SECRET_LEN);
    let mut master_secret = [0u8; MASTER_SECRET_LEN];
    master_secret.copy_from_slice(&out);
    master_secret
}

/// Advance the compound key schedule one inner method (RFC 4851, 5.2):
///
/// ```text
/// IMCK[j] = T-PRF(S-IMCK[j-1], "Inner Methods Compound Keys", ISK[j], 60)
/// ```
///
/// Returns `(S-IMCK[j], CMK[j])`: the first 40 and last 20 bytes of the
/// expansion.
pub fn derive_imck(
    simck: &[u8; SIMCK_LEN],
    isk: &[u8; ISK_LEN],
) -> ([u8; SIMCK_LEN], [u8; CMK_LEN]) {
    let out = t_prf(simck, LABEL_COMPOUND_KEYS, isk, SIMCK_LEN + CMK_LEN);

    let mut next_simck = [0u8; SIMCK_LEN];
    let mut cmk = [0u8; CMK_LEN];
    next_simck.copy_from_slice(&out[..SIMCK_LEN]);
    cmk.copy_from_slice(&out[SIMCK_LEN..]);
    (next_simck, cmk)
}

/// Derive the 64-byte Master Session Key (RFC 4851, 5.4):
///
/// ```text
/// MSK = T-PRF(S-IMCK[j], "Session Key Generating Function", 64)
/// ```
pub fn derive_msk(simck: &[u8; SIMCK_LEN]) -> [u8; MSK_LEN] {
    let out = t_prf(simck, LABEL_SESSION_KEY, b"", MSK_LEN);
    let mut msk = [0u8; MSK_LEN];
    msk.copy_from_slice(&out);
    msk
}

/// Derive the 64-byte Extended Master Session Key (RFC 4851, 5.4)
pub fn derive_emsk(simck: &[u8; SIMCK_LEN]) -> [u8; EMSK_LEN] {
    let out = t_prf(simck, LABEL_EXTENDED_SESSION_KEY, b"", EMSK_LEN);
    let mut emsk = [0u8; EMSK_LEN];
    emsk.copy_from_slice(&out);
    emsk
}
