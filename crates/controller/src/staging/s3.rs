//! Object store access for uploaded blobs
//!
//! Only one call is needed: a signed `HEAD` on the blob to read the user
//! metadata recorded at upload time. Requests are path-style and signed with
//! AWS Signature Version 4, which every S3-compatible store accepts.

use std::collections::HashMap;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use k8s_openapi::api::core::v1::Secret;
use reqwest::Url;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::blob::{BlobStore, BlobStoreFactory};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_REGION: &str = "us-east-1";
const META_PREFIX: &str = "x-amz-meta-";
/// SHA-256 of the empty payload
const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Object store connection details, as kept in the staging namespace secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3ConnectionDetails {
    pub endpoint: String,
    pub use_ssl: bool,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub location: String,
}

impl S3ConnectionDetails {
    pub fn from_secret(secret: &Secret) -> anyhow::Result<Self> {
        let data = secret.data.as_ref().ok_or_else(|| anyhow!("secret has no data"))?;
        let field = |key: &str| -> anyhow::Result<String> {
            let raw = data
                .get(key)
                .ok_or_else(|| anyhow!("secret is missing key {key}"))?;
            String::from_utf8(raw.0.clone()).with_context(|| format!("key {key} is not UTF-8"))
        };
        let optional = |key: &str| field(key).ok().filter(|v| !v.is_empty());

        Ok(Self {
            endpoint: field("endpoint")?,
            use_ssl: optional("useSSL").is_some_and(|v| v.eq_ignore_ascii_case("true")),
            access_key_id: field("accessKeyID")?,
            secret_access_key: field("secretAccessKey")?,
            bucket: field("bucket")?,
            location: optional("location").unwrap_or_else(|| DEFAULT_REGION.to_string()),
        })
    }

    /// `http` or `https`, depending on whether the store wants TLS
    #[must_use]
    pub fn protocol(&self) -> &'static str {
        if self.use_ssl {
            "https"
        } else {
            "http"
        }
    }

    fn object_url(&self, key: &str) -> anyhow::Result<Url> {
        let raw = format!(
            "{}://{}/{}/{}",
            self.protocol(),
            self.endpoint.trim_end_matches('/'),
            uri_encode(&self.bucket),
            uri_encode(key)
        );
        Url::parse(&raw).with_context(|| format!("invalid object store URL {raw}"))
    }
}

/// `BlobStore` over an S3-compatible endpoint
pub struct S3BlobStore {
    http: reqwest::Client,
    details: S3ConnectionDetails,
}

impl S3BlobStore {
    #[must_use]
    pub fn new(http: reqwest::Client, details: S3ConnectionDetails) -> Self {
        Self { http, details }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn meta(&self, blob_uid: &str) -> anyhow::Result<HashMap<String, String>> {
        let url = self.details.object_url(blob_uid)?;
        let signed = sign_request("HEAD", &url, &self.details, Utc::now())?;
        debug!(url = %url, "Fetching blob metadata");

        let response = self
            .http
            .head(url.clone())
            .header("x-amz-date", &signed.amz_date)
            .header("x-amz-content-sha256", EMPTY_PAYLOAD_SHA256)
            .header("authorization", &signed.authorization)
            .send()
            .await
            .with_context(|| format!("HEAD {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("object store answered HTTP {status} for blob {blob_uid}"));
        }

        Ok(response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                let key = name.as_str().strip_prefix(META_PREFIX)?;
                Some((key.to_lowercase(), value.to_str().ok()?.to_string()))
            })
            .collect())
    }
}

/// Builds `S3BlobStore`s sharing one HTTP client
#[derive(Clone, Default)]
pub struct S3Connector {
    http: reqwest::Client,
}

impl S3Connector {
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl BlobStoreFactory for S3Connector {
    fn connect(&self, details: &S3ConnectionDetails) -> anyhow::Result<Box<dyn BlobStore>> {
        if details.endpoint.is_empty() || details.bucket.is_empty() {
            return Err(anyhow!("object store endpoint and bucket are required"));
        }
        Ok(Box::new(S3BlobStore::new(self.http.clone(), details.clone())))
    }
}

#[derive(Debug)]
struct SignedHeaders {
    amz_date: String,
    authorization: String,
}

fn sign_request(
    method: &str,
    url: &Url,
    details: &S3ConnectionDetails,
    now: DateTime<Utc>,
) -> anyhow::Result<SignedHeaders> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();

    let host = url.host_str().ok_or_else(|| anyhow!("URL {url} has no host"))?;
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let signed_headers = "host;x-amz-content-sha256;x-amz-date";
    let canonical_request = format!(
        "{method}\n{path}\n\nhost:{host}\nx-amz-content-sha256:{EMPTY_PAYLOAD_SHA256}\nx-amz-date:{amz_date}\n\n{signed_headers}\n{EMPTY_PAYLOAD_SHA256}",
        path = url.path(),
    );

    let scope = format!("{date_stamp}/{}/s3/aws4_request", details.location);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac(format!("AWS4{}", details.secret_access_key).as_bytes(), &date_stamp)?;
    let k_region = hmac(&k_date, &details.location)?;
    let k_service = hmac(&k_region, "s3")?;
    let k_signing = hmac(&k_service, "aws4_request")?;
    let signature = hex::encode(hmac(&k_signing, &string_to_sign)?);

    Ok(SignedHeaders {
        amz_date,
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            details.access_key_id
        ),
    })
}

fn hmac(key: &[u8], data: &str) -> anyhow::Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| anyhow!("invalid HMAC key: {e}"))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Percent-encode each path segment, keeping the `/` separators
fn uri_encode(raw: &str) -> String {
    raw.split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/")
}
