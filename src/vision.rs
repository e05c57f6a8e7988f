use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::ops::Range;

use crate::classifier::{Classifier, ClassifyError, LabelDetector};
use crate::config::VisionConfig;
use crate::types::SafetyAnnotation;

const SAFE_SEARCH_DETECTION: &str = "SAFE_SEARCH_DETECTION";
const LABEL_DETECTION: &str = "LABEL_DETECTION";
const MAX_LABELS: u32 = 10;

#[derive(Debug, Serialize)]
struct BatchAnnotateRequest {
    requests: Vec<AnnotateImageRequest>,
}

#[derive(Debug, Serialize)]
struct AnnotateImageRequest {
    image: ImageContent,
    features: Vec<Feature>,
}

#[derive(Debug, Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
    max_results: u32,
}

#[derive(Debug, Deserialize)]
struct BatchAnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    safe_search_annotation: Option<SafetyAnnotation>,
    #[serde(default)]
    label_annotations: Vec<LabelAnnotation>,
    error: Option<Status>,
}

#[derive(Debug, Deserialize)]
struct LabelAnnotation {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

/// Cloud Vision `images:annotate` over REST. Image bytes are fetched here and
/// sent inline, so the classifier never needs access to the source hosts.
pub struct GoogleVisionClient {
    http: reqwest::Client,
    config: VisionConfig,
}

impl GoogleVisionClient {
    pub fn new(config: VisionConfig) -> Result<Self, ClassifyError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("safesearch-filter/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, config })
    }

    #[tracing::instrument(skip(self))]
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, ClassifyError> {
        let resolution = |reason: String| ClassifyError::Resolution {
            uri: uri.to_string(),
            reason,
        };

        let url = fetchable_url(uri, self.config.allow_private_hosts).map_err(resolution)?;
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| resolution(e.to_string()))?;
        if !response.status().is_success() {
            return Err(resolution(format!("status {}", response.status())));
        }

        let limit = self.config.max_image_bytes;
        if response
            .content_length()
            .is_some_and(|len| len > limit as u64)
        {
            return Err(resolution(format!("image larger than {limit} bytes")));
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| resolution(e.to_string()))?
        {
            if bytes.len() + chunk.len() > limit {
                return Err(resolution(format!("image larger than {limit} bytes")));
            }
            bytes.extend_from_slice(&chunk);
        }
        tracing::debug!(size = bytes.len(), "Image fetched");
        Ok(bytes)
    }

    async fn annotate(
        &self,
        requests: Vec<AnnotateImageRequest>,
    ) -> Result<Vec<AnnotateImageResponse>, ClassifyError> {
        let expected = requests.len();
        let mut builder = self
            .http
            .post(format!("{}/images:annotate", self.config.endpoint))
            .json(&BatchAnnotateRequest { requests });
        if let Some(key) = &self.config.api_key {
            builder = builder.query(&[("key", key)]);
        }
        if let Some(token) = &self.config.access_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClassifyError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: BatchAnnotateResponse = response.json().await?;
        if body.responses.len() != expected {
            return Err(ClassifyError::Api {
                status: status.as_u16(),
                message: format!(
                    "expected {expected} responses, got {}",
                    body.responses.len()
                ),
            });
        }

        // One failed image fails the whole call.
        if let Some(error) = body.responses.iter().find_map(|r| r.error.as_ref()) {
            return Err(ClassifyError::Api {
                status: status.as_u16(),
                message: format!("code {}: {}", error.code, error.message),
            });
        }

        Ok(body.responses)
    }

    fn image_request(bytes: &[u8], kind: &'static str, max_results: u32) -> AnnotateImageRequest {
        AnnotateImageRequest {
            image: ImageContent {
                content: STANDARD.encode(bytes),
            },
            features: vec![Feature { kind, max_results }],
        }
    }

    async fn classify_inner(
        &self,
        uris: &[String],
    ) -> Result<HashMap<String, SafetyAnnotation>, ClassifyError> {
        let in_flight = self.config.max_concurrent_fetches;

        let fetches: Vec<_> = uris.iter().map(|uri| self.fetch(uri)).collect();
        let images: Vec<Vec<u8>> = stream::iter(fetches)
            .buffered(in_flight)
            .try_collect()
            .await?;

        let sizes: Vec<usize> = images.iter().map(|bytes| encoded_len(bytes.len())).collect();
        let chunks = plan_chunks(
            &sizes,
            self.config.max_images_per_call,
            self.config.max_request_bytes,
        );
        tracing::debug!(chunk_count = chunks.len(), "Submitting annotate requests");

        let annotated: Vec<Vec<(String, SafetyAnnotation)>> = stream::iter(chunks)
            .map(|range| {
                let chunk_uris = &uris[range.clone()];
                let chunk_images = &images[range];
                async move {
                    let requests = chunk_images
                        .iter()
                        .map(|bytes| {
                            Self::image_request(
                                bytes,
                                SAFE_SEARCH_DETECTION,
                                self.config.max_results,
                            )
                        })
                        .collect();
                    let responses = self.annotate(requests).await?;
                    chunk_uris
                        .iter()
                        .zip(responses)
                        .map(|(uri, response)| {
                            response
                                .safe_search_annotation
                                .map(|annotation| (uri.clone(), annotation))
                                .ok_or_else(|| ClassifyError::MissingAnnotation(uri.clone()))
                        })
                        .collect::<Result<Vec<_>, ClassifyError>>()
                }
            })
            .buffered(in_flight)
            .try_collect()
            .await?;

        Ok(annotated.into_iter().flatten().collect())
    }
}

/// Base64 length of `len` raw bytes.
fn encoded_len(len: usize) -> usize {
    len.div_ceil(3) * 4
}

/// Splits consecutive images into annotate requests holding at most
/// `max_count` images and at most `max_bytes` of encoded content. An image
/// larger than the budget on its own still gets a request of its own.
fn plan_chunks(sizes: &[usize], max_count: usize, max_bytes: usize) -> Vec<Range<usize>> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut bytes = 0;
    for (index, &size) in sizes.iter().enumerate() {
        let count = index - start;
        if count > 0 && (count >= max_count || bytes + size > max_bytes) {
            chunks.push(start..index);
            start = index;
            bytes = 0;
        }
        bytes += size;
    }
    if start < sizes.len() {
        chunks.push(start..sizes.len());
    }
    chunks
}

/// Only http(s) URLs are fetched. Unless `allow_private_hosts` is set, literal
/// loopback, private, link-local and metadata hosts are refused. Names that
/// resolve to such addresses are not caught here.
fn fetchable_url(uri: &str, allow_private_hosts: bool) -> Result<reqwest::Url, String> {
    let url = reqwest::Url::parse(uri).map_err(|e| format!("invalid URI: {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme {}", url.scheme()));
    }
    let host = url.host_str().ok_or_else(|| "URI has no host".to_string())?;
    if !allow_private_hosts && is_private_host(host) {
        return Err(format!("host {host} is not allowed"));
    }
    Ok(url)
}

fn is_private_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            ip.is_loopback()
                || ip.is_private()
                || ip.is_link_local()
                || ip.is_unspecified()
                || ip.is_broadcast()
        }
        Ok(IpAddr::V6(ip)) => {
            let first = ip.segments()[0];
            ip.is_loopback()
                || ip.is_unspecified()
                || first & 0xfe00 == 0xfc00
                || first & 0xffc0 == 0xfe80
                || ip
                    .to_ipv4_mapped()
                    .is_some_and(|v4| is_private_host(&v4.to_string()))
        }
        Err(_) => {
            let host = host.to_ascii_lowercase();
            host == "localhost"
                || host.ends_with(".localhost")
                || host == "metadata.google.internal"
        }
    }
}

#[async_trait]
impl Classifier for GoogleVisionClient {
    #[tracing::instrument(skip(self, uris), fields(input_count = uris.len()))]
    async fn classify(
        &self,
        uris: &[String],
    ) -> Result<HashMap<String, SafetyAnnotation>, ClassifyError> {
        if uris.is_empty() {
            return Ok(HashMap::new());
        }

        match tokio::time::timeout(self.config.timeout, self.classify_inner(uris)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(timeout = ?self.config.timeout, "Classifier call timed out");
                Err(ClassifyError::Timeout)
            }
        }
    }
}

#[async_trait]
impl LabelDetector for GoogleVisionClient {
    #[tracing::instrument(skip(self))]
    async fn labels(&self, uri: &str) -> Result<Vec<String>, ClassifyError> {
        let detect = async {
            let bytes = self.fetch(uri).await?;
            let responses = self
                .annotate(vec![Self::image_request(&bytes, LABEL_DETECTION, MAX_LABELS)])
                .await?;
            Ok::<_, ClassifyError>(
                responses
                    .into_iter()
                    .flat_map(|r| r.label_annotations)
                    .map(|label| label.description)
                    .collect(),
            )
        };

        tokio::time::timeout(self.config.timeout, detect)
            .await
            .map_err(|_| ClassifyError::Timeout)?
    }
}
