//! HTTP utilities for AWS API calls
//!
//! Two wire protocols are used: JSON 1.1 (ECS, Application Auto Scaling, SSM)
//! and the form-encoded Query protocol with XML responses (RDS).

use super::auth::{sign_request, AwsCredentials, RequestToSign};
use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::{Duration, SystemTime};

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

/// Error codes that mean the resource does not exist
const NOT_FOUND_CODES: &[&str] = &[
    "ServiceNotFoundException",
    "ClusterNotFoundException",
    "DBInstanceNotFound",
    "DBInstanceNotFoundFault",
    "ParameterNotFound",
    "ResourceNotFoundException",
    "ObjectNotFoundException",
];

/// Error returned by an AWS API
#[derive(Debug, Clone, thiserror::Error)]
#[error("API request failed: {status} {code}: {message}")]
pub struct AwsApiError {
    pub status: u16,
    pub code: String,
    pub message: String,
}

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// A service endpoint in one region
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    pub region: String,
    /// Signing name of the service (e.g. `ecs`, `application-autoscaling`)
    pub service: String,
}

impl Endpoint {
    /// Regional endpoint, or the override URL (used for local stacks and tests)
    pub fn new(service: &str, region: &str, override_url: Option<&str>) -> Result<Self> {
        let url = match override_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}.{}.amazonaws.com", service, region),
        };
        let parsed = url::Url::parse(&url).with_context(|| format!("Invalid endpoint URL: {}", url))?;
        if parsed.host_str().is_none() {
            return Err(anyhow::anyhow!("Endpoint URL has no host: {}", url));
        }

        Ok(Self {
            url: format!("{}/", url),
            region: region.to_string(),
            service: service.to_string(),
        })
    }
}

/// HTTP client wrapper for AWS API calls
#[derive(Clone)]
pub struct AwsHttpClient {
    client: Client,
}

impl AwsHttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("lights-out/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Call a JSON 1.1 protocol operation
    pub async fn post_json(
        &self,
        endpoint: &Endpoint,
        credentials: &AwsCredentials,
        target: &str,
        body: &Value,
    ) -> Result<Value> {
        tracing::debug!("POST {} {}", endpoint.url, target);

        let payload = serde_json::to_vec(body).context("Failed to encode request body")?;
        let signed = sign_request(
            &credentials.get().await?,
            &RequestToSign {
                url: &endpoint.url,
                region: &endpoint.region,
                service: &endpoint.service,
                content_type: JSON_CONTENT_TYPE,
                target: Some(target),
                body: &payload,
            },
            SystemTime::now(),
        )?;

        let mut request = self
            .client
            .post(&endpoint.url)
            .header("content-type", JSON_CONTENT_TYPE)
            .header("x-amz-target", target);
        for (name, value) in signed {
            request = request.header(name, value);
        }

        let response = request
            .body(payload)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&response_body));
            return Err(parse_json_error(status.as_u16(), &response_body).into());
        }

        // Handle empty response
        if response_body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&response_body).context("Failed to parse response JSON")
    }

    /// Call a Query protocol operation, returning the raw XML body
    pub async fn post_query(
        &self,
        endpoint: &Endpoint,
        credentials: &AwsCredentials,
        params: &[(&str, &str)],
    ) -> Result<String> {
        let action = params
            .iter()
            .find(|(k, _)| *k == "Action")
            .map(|(_, v)| *v)
            .unwrap_or("-");
        tracing::debug!("POST {} Action={}", endpoint.url, action);

        let payload = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        let signed = sign_request(
            &credentials.get().await?,
            &RequestToSign {
                url: &endpoint.url,
                region: &endpoint.region,
                service: &endpoint.service,
                content_type: FORM_CONTENT_TYPE,
                target: None,
                body: payload.as_bytes(),
            },
            SystemTime::now(),
        )?;

        let mut request = self
            .client
            .post(&endpoint.url)
            .header("content-type", FORM_CONTENT_TYPE);
        for (name, value) in signed {
            request = request.header(name, value);
        }

        let response = request
            .body(payload)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(AwsApiError {
                status: status.as_u16(),
                code: xml_text(&body, "Code").unwrap_or_else(|| "Unknown".to_string()),
                message: xml_text(&body, "Message").unwrap_or_default(),
            }
            .into());
        }

        Ok(body)
    }
}

/// Build an error from a JSON 1.1 error body (`{"__type": "...#Code", "message": "..."}`)
fn parse_json_error(status: u16, body: &str) -> AwsApiError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let code = parsed
        .get("__type")
        .and_then(|v| v.as_str())
        .map(|t| t.rsplit('#').next().unwrap_or(t).to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    let message = parsed
        .get("message")
        .or_else(|| parsed.get("Message"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    AwsApiError {
        status,
        code,
        message,
    }
}

/// Text content of the first `<tag>...</tag>` element in an XML document
pub fn xml_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(decode_xml_entities(xml[start..end].trim()))
}

/// Replace the predefined XML entities; `&amp;` last so it is not decoded twice
fn decode_xml_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Whether an error is an API "resource does not exist" response
pub fn is_not_found(error: &anyhow::Error) -> bool {
    error
        .chain()
        .filter_map(|e| e.downcast_ref::<AwsApiError>())
        .any(|e| e.status == 404 || NOT_FOUND_CODES.contains(&e.code.as_str()))
}

/// Format an AWS API error for display
/// Security: Sanitizes error messages to avoid leaking sensitive API details
pub fn format_aws_error(error: &anyhow::Error) -> String {
    if let Some(api) = error.chain().find_map(|e| e.downcast_ref::<AwsApiError>()) {
        let hint = match api.status {
            400 if api.code.contains("Throttl") => "Rate limit exceeded. Please try again later.",
            400 => "Invalid request. Check your parameters.",
            401 | 403 => "Permission denied. Check the IAM permissions of the execution role.",
            404 => "Resource not found.",
            409 => "Resource conflict. The resource may be in an incompatible state.",
            429 => "Rate limit exceeded. Please try again later.",
            500..=599 => "AWS service temporarily unavailable. Please try again.",
            _ => "Request failed.",
        };
        return format!("{} ({})", hint, api.code);
    }

    // Truncate long error messages and remove potential sensitive data
    let error_str = format!("{:#}", error);
    let sanitized = error_str
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(120)
        .collect::<String>();

    if sanitized.len() < error_str.len() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}
