// ABOUTME: Deterministic identifier derivation for conversations and attachments
// ABOUTME: Same platform input always maps to the same adapter-facing id

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Derive a short, url-safe, deterministic id from arbitrary platform input.
pub fn deterministic_id(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let encoded = STANDARD.encode(&digest[..15]);
    encoded.trim_end_matches('=').replace('+', "A").replace('/', "B")
}

/// The canonical conversation id exchanged with the framework.
///
/// Inputs already carrying the adapter prefix pass through unchanged, so
/// ids observed on the wire can be fed back in safely.
pub fn conversation_id(adapter_type: &str, platform_conversation_id: &str) -> String {
    let prefix = format!("{}_", adapter_type);
    if platform_conversation_id.starts_with(&prefix) {
        return platform_conversation_id.to_string();
    }
    format!("{}{}", prefix, deterministic_id(platform_conversation_id))
}

/// Stable attachment id derived from the platform's download handle.
pub fn attachment_id(source_id: &str) -> String {
    deterministic_id(source_id)
}
