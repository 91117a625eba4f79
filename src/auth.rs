//! Signed assertions and bearer tokens
//!
//! A service-account credential is turned into a short-lived RS256 JWT
//! (the assertion) and exchanged at the credential's token endpoint for
//! a bearer token using the OAuth JWT-bearer grant. Tokens may be kept
//! in an explicit [`TokenCache`]; without one, every call mints a fresh
//! assertion and exchanges it.

use crate::credential::Credential;
use crate::error::{PipelineError, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// OAuth grant type for exchanging a signed JWT
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Assertion lifetime in seconds
pub const ASSERTION_TTL_SECS: i64 = 3600;

/// Tokens this close to expiry are not handed out from the cache
const EXPIRY_MARGIN_SECS: i64 = 30;

/// JWT claim set carried by a signed assertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub key: String,
    pub aud: String,
    pub exp: i64,
    pub sub: String,
}

/// A signed, time-bounded assertion minted from a credential
///
/// `exp` is fixed when minted; an expired assertion is replaced, never
/// refreshed.
#[derive(Clone)]
pub struct SignedAssertion {
    jwt: String,
    claims: Claims,
}

impl SignedAssertion {
    /// Sign the claim set for `credential` with its private key
    pub fn mint(credential: &Credential, now: DateTime<Utc>) -> Result<Self> {
        let claims = Claims {
            iss: credential.client_id.clone(),
            key: credential.key_id.clone(),
            aud: credential.token_uri.clone(),
            exp: (now + Duration::seconds(ASSERTION_TTL_SECS)).timestamp(),
            sub: credential.client_id.clone(),
        };

        let key = EncodingKey::from_rsa_pem(credential.private_key.as_bytes())
            .map_err(|e| PipelineError::Auth(format!("Invalid private key: {}", e)))?;

        let jwt = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| PipelineError::Auth(format!("Failed to sign assertion: {}", e)))?;

        Ok(Self { jwt, claims })
    }

    pub fn as_str(&self) -> &str {
        &self.jwt
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.claims.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl fmt::Debug for SignedAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedAssertion")
            .field("claims", &self.claims)
            .field("jwt", &"<redacted>")
            .finish()
    }
}

/// Opaque access token presented to the vault
///
/// Expires with the assertion it was exchanged for.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl BearerToken {
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// `Authorization` header value
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.value)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A bearer token remembered for the client it was issued to
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub client_id: String,
    pub token: BearerToken,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    pub fn new(client_id: impl Into<String>, token: BearerToken) -> Self {
        let expires_at = token.expires_at();
        Self {
            client_id: client_id.into(),
            token,
            expires_at,
        }
    }

    /// Whether the token can still be used at `now`
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

/// Process-wide slot for one cached bearer token
#[derive(Debug, Default)]
pub struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached token for `client_id` if it is still valid at `now`
    pub async fn get(&self, client_id: &str, now: DateTime<Utc>) -> Option<BearerToken> {
        let slot = self.slot.lock().await;
        slot.as_ref()
            .filter(|cached| cached.client_id == client_id && cached.is_valid(now))
            .map(|cached| cached.token.clone())
    }

    pub async fn store(&self, cached: CachedToken) {
        *self.slot.lock().await = Some(cached);
    }

    pub async fn clear(&self) {
        self.slot.lock().await.take();
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    assertion: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(rename = "accessToken", default)]
    camel: Option<String>,
    #[serde(rename = "access_token", default)]
    snake: Option<String>,
}

impl TokenResponse {
    /// The first non-empty access token, `accessToken` preferred
    fn into_access_token(self) -> Option<String> {
        [self.camel, self.snake]
            .into_iter()
            .flatten()
            .find(|token| !token.is_empty())
    }
}

/// Mints assertions and exchanges them for bearer tokens
///
/// No retry: a signing or exchange failure ends the invocation.
#[derive(Clone)]
pub struct AuthTokenIssuer {
    http: reqwest::Client,
    cache: Option<Arc<TokenCache>>,
}

impl AuthTokenIssuer {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http, cache: None }
    }

    /// Reuse tokens from `cache` until they expire
    pub fn with_cache(mut self, cache: Arc<TokenCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub async fn issue_bearer(&self, credential: &Credential) -> Result<BearerToken> {
        self.issue_bearer_at(credential, Utc::now()).await
    }

    /// Issue a bearer token treating `now` as the current time
    pub async fn issue_bearer_at(
        &self,
        credential: &Credential,
        now: DateTime<Utc>,
    ) -> Result<BearerToken> {
        if let Some(ref cache) = self.cache {
            if let Some(token) = cache.get(&credential.client_id, now).await {
                tracing::debug!(client_id = %credential.client_id, "Reusing cached bearer token");
                return Ok(token);
            }
        }

        let assertion = SignedAssertion::mint(credential, now)?;
        let token = self.exchange(&credential.token_uri, &assertion).await?;

        tracing::info!(
            client_id = %credential.client_id,
            expires_at = %token.expires_at(),
            "Bearer token issued"
        );

        if let Some(ref cache) = self.cache {
            cache
                .store(CachedToken::new(credential.client_id.clone(), token.clone()))
                .await;
        }

        Ok(token)
    }

    async fn exchange(&self, token_uri: &str, assertion: &SignedAssertion) -> Result<BearerToken> {
        let response = self
            .http
            .post(token_uri)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .json(&TokenRequest {
                grant_type: JWT_BEARER_GRANT,
                assertion: assertion.as_str(),
            })
            .send()
            .await
            .map_err(|e| PipelineError::Auth(format!("Token request to {} failed: {}", token_uri, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::AuthRejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Auth(format!("Malformed token response: {}", e)))?;

        let access_token = parsed.into_access_token().ok_or_else(|| {
            PipelineError::Auth("Token response carried no access token".to_string())
        })?;

        Ok(BearerToken::new(access_token, assertion.expires_at()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use jsonwebtoken::{DecodingKey, Validation};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PRIVATE_KEY: &str = include_str!("../tests/fixtures/service_account_key.pem");
    const PUBLIC_KEY: &str = include_str!("../tests/fixtures/service_account_key.pub.pem");

    fn credential(token_uri: &str) -> Credential {
        Credential {
            client_id: "client-1".to_string(),
            key_id: "key-1".to_string(),
            token_uri: token_uri.to_string(),
            private_key: PRIVATE_KEY.to_string(),
        }
    }

    fn verify(jwt: &str, audience: &str) -> Claims {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[audience]);
        validation.set_issuer(&["client-1"]);
        let key = DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).unwrap();
        jsonwebtoken::decode::<Claims>(jwt, &key, &validation)
            .unwrap()
            .claims
    }

    #[test]
    fn test_mint_claims_and_signature() {
        let now = Utc::now();
        let assertion = SignedAssertion::mint(&credential("https://auth.test/token"), now).unwrap();

        let claims = verify(assertion.as_str(), "https://auth.test/token");
        assert_eq!(claims.iss, "client-1");
        assert_eq!(claims.sub, "client-1");
        assert_eq!(claims.key, "key-1");
        assert_eq!(claims.exp, now.timestamp() + 3600);
        assert_eq!(assertion.expires_at().timestamp(), claims.exp);
    }

    #[test]
    fn test_mint_malformed_key() {
        let mut cred = credential("https://auth.test/token");
        cred.private_key = "not a key".to_string();

        let err = SignedAssertion::mint(&cred, Utc::now()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let token = BearerToken::new("secret-token", Utc::now());
        assert!(!format!("{:?}", token).contains("secret-token"));

        let assertion = SignedAssertion::mint(&credential("https://auth.test/token"), Utc::now()).unwrap();
        assert!(!format!("{:?}", assertion).contains(assertion.as_str()));
    }

    #[test]
    fn test_header_value() {
        let token = BearerToken::new("abc", Utc::now());
        assert_eq!(token.header_value(), "Bearer abc");
    }

    #[test]
    fn test_cached_token_validity() {
        let now = Utc::now();
        let cached = CachedToken::new("client-1", BearerToken::new("t", now + Duration::seconds(600)));

        assert!(cached.is_valid(now));
        assert!(cached.is_valid(now + Duration::seconds(500)));
        assert!(!cached.is_valid(now + Duration::seconds(590)));
        assert!(!cached.is_valid(now + Duration::seconds(601)));
    }

    #[tokio::test]
    async fn test_token_cache_scoped_to_client() {
        let now = Utc::now();
        let cache = TokenCache::new();
        cache
            .store(CachedToken::new("client-1", BearerToken::new("t", now + Duration::seconds(600))))
            .await;

        assert!(cache.get("client-1", now).await.is_some());
        assert!(cache.get("client-2", now).await.is_none());

        cache.clear().await;
        assert!(cache.get("client-1", now).await.is_none());
    }

    #[tokio::test]
    async fn test_issue_bearer_exchanges_assertion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(header("accept", "application/json"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(json!({ "grant_type": JWT_BEARER_GRANT })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": "bearer-1",
                "tokenType": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token_uri = format!("{}/oauth/token", server.uri());
        let issuer = AuthTokenIssuer::new(reqwest::Client::new());
        let token = issuer.issue_bearer(&credential(&token_uri)).await.unwrap();
        assert_eq!(token.as_str(), "bearer-1");

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let claims = verify(body["assertion"].as_str().unwrap(), &token_uri);
        assert_eq!(token.expires_at().timestamp(), claims.exp);
    }

    #[tokio::test]
    async fn test_issue_bearer_snake_case_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "bearer-2" })))
            .mount(&server)
            .await;

        let issuer = AuthTokenIssuer::new(reqwest::Client::new());
        let token = issuer.issue_bearer(&credential(&server.uri())).await.unwrap();
        assert_eq!(token.as_str(), "bearer-2");
    }

    #[test]
    fn test_token_response_field_precedence() {
        let both: TokenResponse =
            serde_json::from_value(json!({ "accessToken": "camel", "access_token": "snake" })).unwrap();
        assert_eq!(both.into_access_token().as_deref(), Some("camel"));

        let empty_camel: TokenResponse =
            serde_json::from_value(json!({ "accessToken": "", "access_token": "snake" })).unwrap();
        assert_eq!(empty_camel.into_access_token().as_deref(), Some("snake"));

        let neither: TokenResponse = serde_json::from_value(json!({ "tokenType": "Bearer" })).unwrap();
        assert!(neither.into_access_token().is_none());
    }

    #[tokio::test]
    async fn test_issue_bearer_both_token_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": "bearer-camel",
                "access_token": "bearer-snake"
            })))
            .mount(&server)
            .await;

        let issuer = AuthTokenIssuer::new(reqwest::Client::new());
        let token = issuer.issue_bearer(&credential(&server.uri())).await.unwrap();
        assert_eq!(token.as_str(), "bearer-camel");
    }

    #[tokio::test]
    async fn test_issue_bearer_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let issuer = AuthTokenIssuer::new(reqwest::Client::new());
        let err = issuer.issue_bearer(&credential(&server.uri())).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Auth);
        match err {
            PipelineError::AuthRejected { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid_grant");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_issue_bearer_missing_token_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "tokenType": "Bearer" })))
            .mount(&server)
            .await;

        let issuer = AuthTokenIssuer::new(reqwest::Client::new());
        let err = issuer.issue_bearer(&credential(&server.uri())).await.unwrap_err();
        assert!(matches!(err, PipelineError::Auth(_)));
    }

    #[tokio::test]
    async fn test_cache_reuses_then_remints_after_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accessToken": "bearer-3" })))
            .expect(2)
            .mount(&server)
            .await;

        let cache = Arc::new(TokenCache::new());
        let issuer = AuthTokenIssuer::new(reqwest::Client::new()).with_cache(cache);
        let cred = credential(&server.uri());
        let now = Utc::now();

        issuer.issue_bearer_at(&cred, now).await.unwrap();
        issuer
            .issue_bearer_at(&cred, now + Duration::seconds(60))
            .await
            .unwrap();
        issuer
            .issue_bearer_at(&cred, now + Duration::seconds(ASSERTION_TTL_SECS + 1))
            .await
            .unwrap();
    }
}
