//! Request signing check for inbound interactivity calls.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
pub const SIGNATURE_HEADER: &str = "x-slack-signature";

/// Requests older (or newer) than this are treated as replays.
pub const REPLAY_WINDOW_SECS: u64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing {0} header")]
    MissingHeader(&'static str),
    #[error("timestamp is not a number")]
    MalformedTimestamp,
    #[error("request timestamp is outside the replay window")]
    Stale,
    #[error("signature does not match")]
    Mismatch,
}

/// Checks `v0=hex(hmac_sha256(secret, "v0:{timestamp}:{body}"))`.
pub fn verify(
    signing_secret: &[u8],
    timestamp: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
    now_unix_secs: u64,
) -> Result<(), SignatureError> {
    let timestamp = timestamp.ok_or(SignatureError::MissingHeader(TIMESTAMP_HEADER))?;
    let signature = signature.ok_or(SignatureError::MissingHeader(SIGNATURE_HEADER))?;

    let sent_at: u64 = timestamp.trim().parse().map_err(|_| SignatureError::MalformedTimestamp)?;
    if now_unix_secs.abs_diff(sent_at) > REPLAY_WINDOW_SECS {
        return Err(SignatureError::Stale);
    }

    let provided = signature
        .strip_prefix("v0=")
        .and_then(|hex_digest| hex::decode(hex_digest).ok())
        .ok_or(SignatureError::Mismatch)?;

    let mut mac = HmacSha256::new_from_slice(signing_secret).map_err(|_| SignatureError::Mismatch)?;
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    mac.verify_slice(&provided).map_err(|_| SignatureError::Mismatch)
}

/// Produces the header value for `body`; used by tests and local tooling.
pub fn sign(signing_secret: &[u8], timestamp: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(signing_secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    format!("v0={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::{sign, verify, SignatureError, SIGNATURE_HEADER, TIMESTAMP_HEADER};

    const SECRET: &[u8] = b"8f742231b10e8888abcd99yyyzzz85a5";
    const NOW: u64 = 1_710_061_200;

    #[test]
    fn valid_signature_passes() {
        let body = b"payload=%7B%22type%22%3A%22block_actions%22%7D";
        let signature = sign(SECRET, "1710061200", body);

        assert!(signature.starts_with("v0="));
        assert_eq!(verify(SECRET, Some("1710061200"), Some(&signature), body, NOW), Ok(()));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let signature = sign(SECRET, "1710061200", b"payload=a");
        assert_eq!(
            verify(SECRET, Some("1710061200"), Some(&signature), b"payload=b", NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn replays_outside_five_minutes_are_rejected() {
        let signature = sign(SECRET, "1710060800", b"payload=a");
        assert_eq!(
            verify(SECRET, Some("1710060800"), Some(&signature), b"payload=a", NOW),
            Err(SignatureError::Stale)
        );
    }

    #[test]
    fn missing_headers_are_named() {
        assert_eq!(
            verify(SECRET, None, Some("v0=00"), b"", NOW),
            Err(SignatureError::MissingHeader(TIMESTAMP_HEADER))
        );
        assert_eq!(
            verify(SECRET, Some("1710061200"), None, b"", NOW),
            Err(SignatureError::MissingHeader(SIGNATURE_HEADER))
        );
    }

    #[test]
    fn signatures_without_version_prefix_are_rejected() {
        let signature = sign(SECRET, "1710061200", b"payload=a");
        let bare = signature.trim_start_matches("v0=");
        assert_eq!(
            verify(SECRET, Some("1710061200"), Some(bare), b"payload=a", NOW),
            Err(SignatureError::Mismatch)
        );
    }
}
