//! Built-in EAP method implementations

pub mod eap_fast;
pub mod eap_md5;
