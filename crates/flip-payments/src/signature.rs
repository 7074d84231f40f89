//! Webhook Signature Verification
//!
//! The gateway signs each notification with `x-signature: ts=<ms>,v1=<hex>`
//! where `v1` is HMAC-SHA256 (keyed by the shared webhook secret) over the
//! manifest `id:{resource_id};request-id:{x-request-id};ts:{ts};`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{PaymentError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Parsed `x-signature` header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureHeader {
    pub ts: String,
    pub v1: String,
}

impl SignatureHeader {
    /// Parse `ts=...,v1=...`; other keys are ignored. Returns `None` when either
    /// part is missing or empty.
    pub fn parse(header: &str) -> Option<Self> {
        let mut ts = None;
        let mut v1 = None;

        for part in header.split(',') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            match key.trim() {
                "ts" => ts = Some(value.trim().to_string()),
                "v1" => v1 = Some(value.trim().to_string()),
                _ => {}
            }
        }

        match (ts, v1) {
            (Some(ts), Some(v1)) if !ts.is_empty() && !v1.is_empty() => Some(Self { ts, v1 }),
            _ => None,
        }
    }
}

/// The signed string
pub fn manifest(resource_id: &str, request_id: &str, ts: &str) -> String {
    format!("id:{resource_id};request-id:{request_id};ts:{ts};")
}

/// Lowercase hex HMAC-SHA256 of `message`
pub fn sign(secret: &str, message: &str) -> Result<String> {
    Ok(hex::encode(mac_for(secret, message)?.finalize().into_bytes()))
}

fn mac_for(secret: &str, message: &str) -> Result<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::Config(format!("webhook secret: {e}")))?;
    mac.update(message.as_bytes());
    Ok(mac)
}

/// Outcome of checking one notification
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification {
    Valid,
    Invalid(String),
    /// No secret configured; the notification is trusted as-is
    Bypassed,
}

impl Verification {
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Valid | Self::Bypassed)
    }
}

/// Checks notification signatures against the shared secret
#[derive(Clone, Debug, Default)]
pub struct WebhookVerifier {
    secret: Option<String>,
}

impl WebhookVerifier {
    /// A blank secret is treated as no secret
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.trim().is_empty()),
        }
    }

    pub const fn is_enforcing(&self) -> bool {
        self.secret.is_some()
    }

    /// Verify one notification. Missing headers fail closed.
    pub fn verify(
        &self,
        signature: Option<&str>,
        request_id: Option<&str>,
        resource_id: &str,
    ) -> Verification {
        let Some(secret) = self.secret.as_deref() else {
            tracing::warn!(resource_id, "Webhook secret not configured, skipping signature check");
            return Verification::Bypassed;
        };

        let (Some(signature), Some(request_id)) = (
            signature.filter(|s| !s.is_empty()),
            request_id.filter(|s| !s.is_empty()),
        ) else {
            return Verification::Invalid("missing x-signature or x-request-id".into());
        };

        let Some(header) = SignatureHeader::parse(signature) else {
            return Verification::Invalid("malformed x-signature".into());
        };

        // Only canonical lowercase hex can equal the computed digest
        let is_lower_hex = header
            .v1
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        let Some(candidate) = is_lower_hex.then(|| hex::decode(&header.v1).ok()).flatten() else {
            return Verification::Invalid("signature is not lowercase hex".into());
        };

        let message = manifest(resource_id, request_id, &header.ts);
        let mac = match mac_for(secret, &message) {
            Ok(mac) => mac,
            Err(e) => return Verification::Invalid(e.to_string()),
        };
        match mac.verify_slice(&candidate) {
            Ok(()) => Verification::Valid,
            Err(_) => Verification::Invalid("signature mismatch".into()),
        }
    }
}
