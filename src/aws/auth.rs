//! AWS Authentication
//!
//! Credentials come from the standard AWS provider chain (environment,
//! shared profiles, SSO, ECS container endpoint, EC2 instance metadata).
//! Requests are signed with Signature Version 4.

use anyhow::{Context, Result};
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sigv4::http_request::{
    sign, SignableBody, SignableRequest, SigningParams, SigningSettings,
};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;

/// Region used when nothing is configured
pub const FALLBACK_REGION: &str = "us-east-1";

/// Refresh temporary credentials this long before they expire
const CREDENTIAL_EXPIRY_BUFFER: Duration = Duration::from_secs(5 * 60);

/// Credentials holder with caching of temporary credentials
#[derive(Clone)]
pub struct AwsCredentials {
    provider: SharedCredentialsProvider,
    cache: Arc<RwLock<Option<Credentials>>>,
}

impl fmt::Debug for AwsCredentials {
    // Security: never print key material
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials").finish_non_exhaustive()
    }
}

impl AwsCredentials {
    /// Static credentials, mainly for local stacks and tests
    pub fn new(access_key_id: &str, secret_access_key: &str, session_token: Option<&str>) -> Self {
        Self::from_provider(SharedCredentialsProvider::new(Credentials::new(
            access_key_id,
            secret_access_key,
            session_token.map(str::to_string),
            None,
            "static",
        )))
    }

    pub fn from_provider(provider: SharedCredentialsProvider) -> Self {
        Self {
            provider,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Current credentials, refreshed from the provider when they are about to expire
    pub async fn get(&self) -> Result<Credentials> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if is_fresh(cached, SystemTime::now()) {
                    return Ok(cached.clone());
                }
                tracing::debug!("Cached AWS credentials expiring, refreshing");
            }
        }

        let credentials = self
            .provider
            .provide_credentials()
            .await
            .context("Failed to resolve AWS credentials")?;

        {
            let mut cache = self.cache.write().await;
            *cache = Some(credentials.clone());
        }
        Ok(credentials)
    }
}

/// Whether credentials remain usable for at least the expiry buffer
fn is_fresh(credentials: &Credentials, now: SystemTime) -> bool {
    match credentials.expiry() {
        None => true,
        Some(expiry) => expiry
            .checked_sub(CREDENTIAL_EXPIRY_BUFFER)
            .is_some_and(|refresh_at| now < refresh_at),
    }
}

/// Ambient configuration from the default AWS provider chains
pub struct AmbientConfig {
    pub credentials: AwsCredentials,
    pub region: Option<String>,
}

/// Resolve credentials and region the way the AWS CLI does
pub async fn load_ambient() -> Result<AmbientConfig> {
    let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .load()
        .await;
    let provider = sdk_config
        .credentials_provider()
        .context("No AWS credentials provider found. Configure AWS credentials")?;

    let region = sdk_config
        .region()
        .map(|r| r.to_string())
        .filter(|r| {
            let valid = validate_region(r);
            if !valid {
                tracing::warn!("Ignoring invalid region from the AWS configuration");
            }
            valid
        });

    Ok(AmbientConfig {
        credentials: AwsCredentials::from_provider(provider),
        region,
    })
}

/// One `POST` request to sign
pub struct RequestToSign<'a> {
    pub url: &'a str,
    pub region: &'a str,
    /// Signing name of the service (e.g. `ecs`, `application-autoscaling`)
    pub service: &'a str,
    pub content_type: &'a str,
    pub target: Option<&'a str>,
    pub body: &'a [u8],
}

/// Compute SigV4 headers for a request.
///
/// Returns the headers to attach: `authorization`, `x-amz-date` and, for
/// temporary credentials, `x-amz-security-token`.
pub fn sign_request(
    credentials: &Credentials,
    request: &RequestToSign<'_>,
    now: SystemTime,
) -> Result<Vec<(String, String)>> {
    let identity = Identity::new(credentials.clone(), credentials.expiry());
    let params: SigningParams<'_> = v4::SigningParams::builder()
        .identity(&identity)
        .region(request.region)
        .name(request.service)
        .time(now)
        .settings(SigningSettings::default())
        .build()
        .context("Failed to build signing parameters")?
        .into();

    let mut headers = vec![("content-type", request.content_type)];
    if let Some(target) = request.target {
        headers.push(("x-amz-target", target));
    }
    let signable = SignableRequest::new(
        "POST",
        request.url,
        headers.into_iter(),
        SignableBody::Bytes(request.body),
    )
    .context("Failed to prepare request for signing")?;

    let (instructions, _signature) = sign(signable, &params)
        .context("Failed to sign request")?
        .into_parts();

    Ok(instructions
        .headers()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect())
}

/// Validate an AWS region name (e.g. `eu-west-1`, `us-gov-west-1`)
pub fn validate_region(region: &str) -> bool {
    if region.len() < 9 || region.len() > 25 {
        return false;
    }
    let parts: Vec<&str> = region.split('-').collect();
    if parts.len() < 3 {
        return false;
    }
    let Some(last) = parts.last() else {
        return false;
    };
    last.chars().all(|c| c.is_ascii_digit())
        && parts[..parts.len() - 1]
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_lowercase()))
}
