//! Gateway signature codec
//!
//! The gateway signs a payload by taking every recognized field (`pp_*` and
//! `ppmpf_*`) except the hash itself, dropping empty values, sorting by key,
//! joining the *values* with `&` and prefixing the integrity salt. The HMAC-SHA256
//! of that message, keyed with the same salt, is sent as uppercase hex in
//! `pp_SecureHash`.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::utils::secure_eq;
use hmac::{Hmac, Mac};
use serde_json::{Map, Value as JsonValue};
use sha2::Sha256;
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

pub const SECURE_HASH_FIELD: &str = "pp_SecureHash";

const SIGNED_PREFIXES: [&str; 2] = ["pp_", "ppmpf_"];

fn is_signed_key(key: &str) -> bool {
    key != SECURE_HASH_FIELD && SIGNED_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// Canonical, key-ordered field set for a single signing operation.
///
/// Empty values and the hash field are never stored, so two sets built from
/// the same non-empty pairs compare equal regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignedFieldSet {
    fields: BTreeMap<String, String>,
}

impl SignedFieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if value.is_empty() || key == SECURE_HASH_FIELD {
            return;
        }
        self.fields.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Outbound payload: every field plus the computed hash.
    pub fn into_signed_fields(self, secure_hash: String) -> BTreeMap<String, String> {
        let mut fields = self.fields;
        fields.insert(SECURE_HASH_FIELD.to_string(), secure_hash);
        fields
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SignedFieldSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = SignedFieldSet::new();
        for (k, v) in iter {
            set.insert(k, v);
        }
        set
    }
}

/// Computes and verifies `pp_SecureHash` values with the merchant integrity salt.
#[derive(Clone)]
pub struct SignatureCodec {
    salt: String,
    mac: HmacSha256,
}

impl std::fmt::Debug for SignatureCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureCodec").finish_non_exhaustive()
    }
}

impl SignatureCodec {
    pub fn new(integrity_salt: impl Into<String>) -> PaymentResult<Self> {
        let salt = integrity_salt.into();
        let mac = HmacSha256::new_from_slice(salt.as_bytes()).map_err(|e| {
            PaymentError::ValidationError {
                message: format!("invalid integrity salt: {}", e),
                field: Some("integrity_salt".to_string()),
            }
        })?;
        Ok(Self { salt, mac })
    }

    pub fn sign(&self, fields: &SignedFieldSet) -> String {
        self.sign_pairs(fields.iter())
    }

    fn sign_pairs<'a>(&self, pairs: impl Iterator<Item = (&'a str, &'a str)>) -> String {
        let mut canonical: Vec<(&str, &str)> = pairs
            .filter(|(k, v)| !v.is_empty() && is_signed_key(k))
            .collect();
        canonical.sort_unstable_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

        let joined = canonical
            .iter()
            .map(|(_, v)| *v)
            .collect::<Vec<_>>()
            .join("&");
        let message = format!("{}&{}", self.salt, joined);

        let mut mac = self.mac.clone();
        mac.update(message.as_bytes());
        hex::encode_upper(mac.finalize().into_bytes())
    }

    /// Verifies a decoded JSON response from the gateway.
    pub fn verify(&self, response: &Map<String, JsonValue>) -> PaymentResult<()> {
        let received = match response.get(SECURE_HASH_FIELD) {
            Some(JsonValue::String(hash)) if !hash.is_empty() => hash.as_str(),
            _ => {
                return Err(PaymentError::IntegrityError {
                    message: format!("{} missing from gateway response", SECURE_HASH_FIELD),
                })
            }
        };

        let rendered: Vec<(&str, String)> = response
            .iter()
            .map(|(k, v)| (k.as_str(), render_field_value(v)))
            .collect();
        let expected = self.sign_pairs(rendered.iter().map(|(k, v)| (*k, v.as_str())));

        self.compare(&expected, received)
    }

    /// Verifies a flat string field map, e.g. a posted card callback.
    pub fn verify_fields(&self, fields: &BTreeMap<String, String>) -> PaymentResult<()> {
        let received = fields
            .get(SECURE_HASH_FIELD)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| PaymentError::IntegrityError {
                message: format!("{} missing from callback fields", SECURE_HASH_FIELD),
            })?;

        let expected = self.sign_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        self.compare(&expected, received)
    }

    fn compare(&self, expected: &str, received: &str) -> PaymentResult<()> {
        if secure_eq(expected.as_bytes(), received.as_bytes()) {
            Ok(())
        } else {
            Err(PaymentError::IntegrityError {
                message: "secure hash mismatch".to_string(),
            })
        }
    }
}

/// Renders an untrusted JSON value the way it appears in the signed message.
pub fn render_field_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}
