//! Registry certificate trust
//!
//! The build step registers a private registry CA under
//! `/etc/ssl/certs/<hash>.0`, so the hash has to be the one OpenSSL computes
//! for `openssl x509 -hash`: SHA-1 over the canonical DER form of the
//! subject name, first four bytes read little-endian.

use k8s_openapi::api::core::v1::Secret;
use sha1::{Digest, Sha1};
use thiserror::Error;
use x509_parser::prelude::*;

use crate::cluster::{from_dynamic, ClusterError, ResourceClient, ResourceKind};

/// Secret key holding the CA certificate
pub const CA_CERT_KEY: &str = "ca.crt";

const TAG_UTF8_STRING: u8 = 0x0c;
const TAG_PRINTABLE_STRING: u8 = 0x13;
const TAG_T61_STRING: u8 = 0x14;
const TAG_IA5_STRING: u8 = 0x16;
const TAG_VISIBLE_STRING: u8 = 0x1a;
const TAG_UNIVERSAL_STRING: u8 = 0x1c;
const TAG_BMP_STRING: u8 = 0x1e;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_SET: u8 = 0x31;

#[derive(Error, Debug)]
pub enum TrustError {
    #[error("certificate secret {0} not found")]
    SecretNotFound(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("invalid PEM data: {0}")]
    Pem(String),

    #[error("invalid certificate: {0}")]
    Certificate(String),
}

/// Hash of the CA stored in the named secret.
///
/// An empty string means the secret carries no CA, which is normal for
/// issuers such as ACME that do not publish one.
pub async fn registry_certificate_hash(
    resources: &dyn ResourceClient,
    namespace: &str,
    secret_name: &str,
) -> Result<String, TrustError> {
    let object = resources
        .get(ResourceKind::Secret, namespace, secret_name)
        .await?
        .ok_or_else(|| TrustError::SecretNotFound(secret_name.to_string()))?;
    let secret: Secret = from_dynamic(ResourceKind::Secret, &object)?;

    match secret.data.as_ref().and_then(|data| data.get(CA_CERT_KEY)) {
        Some(ca) => ca_subject_hash(&ca.0),
        None => Ok(String::new()),
    }
}

/// OpenSSL subject hash of the first certificate in a PEM blob
pub fn ca_subject_hash(pem_bytes: &[u8]) -> Result<String, TrustError> {
    let (_, pem) = parse_x509_pem(pem_bytes).map_err(|e| TrustError::Pem(e.to_string()))?;
    let (_, cert) = X509Certificate::from_der(&pem.contents)
        .map_err(|e| TrustError::Certificate(e.to_string()))?;

    let canonical = canonical_name(cert.subject());
    let digest = Sha1::digest(&canonical);
    let value = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
    Ok(format!("{value:08x}"))
}

/// Canonical encoding: the RDN sets back to back, without the outer SEQUENCE
fn canonical_name(name: &X509Name<'_>) -> Vec<u8> {
    let mut out = Vec::new();
    for rdn in name.iter() {
        let mut entries: Vec<Vec<u8>> = rdn
            .iter()
            .map(|attr| {
                let mut entry = tlv(TAG_OID, attr.attr_type().as_bytes());
                entry.extend(canonical_value(attr));
                tlv(TAG_SEQUENCE, &entry)
            })
            .collect();
        // DER orders SET OF members by encoding
        entries.sort();
        out.extend(tlv(TAG_SET, &entries.concat()));
    }
    out
}

fn canonical_value(attr: &AttributeTypeAndValue<'_>) -> Vec<u8> {
    let value = attr.attr_value();
    // Tags above 30 do not occur in distinguished names
    let tag = u8::try_from(value.tag().0).unwrap_or(0);
    match decode_string(tag, value.data) {
        Some(text) => tlv(TAG_UTF8_STRING, canonical_text(&text).as_bytes()),
        None => tlv(tag, value.data),
    }
}

/// Text of the string types OpenSSL canonicalizes; other values keep their
/// original encoding
fn decode_string(tag: u8, data: &[u8]) -> Option<String> {
    match tag {
        TAG_UTF8_STRING | TAG_PRINTABLE_STRING | TAG_IA5_STRING | TAG_VISIBLE_STRING => {
            std::str::from_utf8(data).ok().map(str::to_string)
        }
        // Read as Latin-1
        TAG_T61_STRING => Some(data.iter().map(|&b| char::from(b)).collect()),
        TAG_BMP_STRING => {
            if data.len() % 2 != 0 {
                return None;
            }
            let units = data
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
            char::decode_utf16(units).collect::<Result<String, _>>().ok()
        }
        TAG_UNIVERSAL_STRING => {
            if data.len() % 4 != 0 {
                return None;
            }
            data.chunks_exact(4)
                .map(|quad| {
                    char::from_u32(u32::from_be_bytes([quad[0], quad[1], quad[2], quad[3]]))
                })
                .collect()
        }
        _ => None,
    }
}

/// Trim, collapse internal whitespace runs and lowercase ASCII
fn canonical_text(text: &str) -> String {
    text.split_ascii_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);
    let len = content.len();
    if len < 0x80 {
        #[allow(clippy::cast_possible_truncation)]
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        let significant = &bytes[skip..];
        #[allow(clippy::cast_possible_truncation)]
        out.push(0x80 | significant.len() as u8);
        out.extend_from_slice(significant);
    }
    out.extend_from_slice(content);
    out
}
