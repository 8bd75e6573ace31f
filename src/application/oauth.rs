use crate::application::run_context::NowProvider;
use crate::infrastructure::config::OAuthSettings;
use crate::infrastructure::credential_store::{StoredToken, TokenStore};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::oauth_client::{
    TokenEndpointClient, TokenGrant, TokenRequest, TokenResponse,
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const EXPIRY_LEEWAY_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    Stored(StoredToken),
    Refreshed(StoredToken),
    ReauthenticationRequired,
}

/// Keeps a usable Google access token in the token store.
pub struct GoogleAuthenticator<S, C>
where
    S: TokenStore,
    C: TokenEndpointClient,
{
    settings: OAuthSettings,
    store: Arc<S>,
    client: Arc<C>,
    token_endpoint: String,
    authorization_endpoint: String,
    now_provider: NowProvider,
}

impl<S, C> GoogleAuthenticator<S, C>
where
    S: TokenStore,
    C: TokenEndpointClient,
{
    pub fn new(settings: OAuthSettings, store: Arc<S>, client: Arc<C>) -> Self {
        Self {
            settings,
            store,
            client,
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            authorization_endpoint: AUTHORIZATION_ENDPOINT.to_string(),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn consent_url(&self, state: &str) -> Result<String, InfraError> {
        if state.trim().is_empty() {
            return Err(InfraError::OAuth("state must not be empty".to_string()));
        }
        if self.settings.scopes.is_empty() {
            return Err(InfraError::OAuth("at least one scope is required".to_string()));
        }

        let mut url = Url::parse(&self.authorization_endpoint).map_err(|error| {
            InfraError::OAuth(format!("invalid authorization endpoint: {error}"))
        })?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", &self.settings.redirect_uri)
            .append_pair("scope", &self.settings.scopes.join(" "))
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("state", state);
        Ok(url.to_string())
    }

    pub async fn exchange_code(&self, code: &str) -> Result<StoredToken, InfraError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(InfraError::OAuth("authorization code must not be empty".to_string()));
        }

        let response = self
            .client
            .request_token(self.request(TokenGrant::AuthorizationCode {
                code: code.to_string(),
                redirect_uri: self.settings.redirect_uri.clone(),
            }))
            .await?;
        let token = self.stored_token(response, None);
        self.store.save(&token)?;
        info!(expires_at = %token.expires_at, "stored new google token");
        Ok(token)
    }

    /// Returns the stored token if still usable, otherwise tries one refresh.
    pub async fn ensure_token(&self) -> Result<TokenStatus, InfraError> {
        let Some(stored) = self.store.load()? else {
            return Ok(TokenStatus::ReauthenticationRequired);
        };
        if stored.is_usable_at((self.now_provider)(), EXPIRY_LEEWAY_SECONDS) {
            debug!(expires_at = %stored.expires_at, "using stored google token");
            return Ok(TokenStatus::Stored(stored));
        }
        let Some(refresh_token) = stored.refresh_token.clone() else {
            return Ok(TokenStatus::ReauthenticationRequired);
        };

        match self
            .client
            .request_token(self.request(TokenGrant::RefreshToken { refresh_token }))
            .await
        {
            Ok(response) => {
                let token = self.stored_token(response, stored.refresh_token);
                self.store.save(&token)?;
                info!(expires_at = %token.expires_at, "refreshed google token");
                Ok(TokenStatus::Refreshed(token))
            }
            Err(InfraError::OAuth(message)) => {
                warn!(%message, "google token refresh rejected");
                Ok(TokenStatus::ReauthenticationRequired)
            }
            Err(error) => Err(error),
        }
    }

    /// Bearer token for calendar calls; missing consent is an error here.
    pub async fn access_token(&self) -> Result<String, InfraError> {
        match self.ensure_token().await? {
            TokenStatus::Stored(token) | TokenStatus::Refreshed(token) => Ok(token.access_token),
            TokenStatus::ReauthenticationRequired => Err(InfraError::OAuth(
                "no usable google token; run `msgblock auth-url` and `msgblock auth --code <CODE>`"
                    .to_string(),
            )),
        }
    }

    fn request(&self, grant: TokenGrant) -> TokenRequest {
        TokenRequest {
            endpoint: self.token_endpoint.clone(),
            client_id: self.settings.client_id.clone(),
            client_secret: self.settings.client_secret.clone(),
            grant,
        }
    }

    fn stored_token(
        &self,
        response: TokenResponse,
        previous_refresh: Option<String>,
    ) -> StoredToken {
        StoredToken {
            expires_at: (self.now_provider)() + Duration::seconds(response.expires_in.max(0)),
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh),
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: response.scope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::credential_store::InMemoryTokenStore;
    use async_trait::async_trait;
    use chrono::DateTime;
    use proptest::prelude::*;
    use std::sync::Mutex;

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T08:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    #[derive(Debug, Default)]
    struct FakeTokenEndpoint {
        reject_with: Mutex<Option<String>>,
        requests: Mutex<Vec<TokenGrant>>,
    }

    impl FakeTokenEndpoint {
        fn rejecting(message: &str) -> Self {
            Self {
                reject_with: Mutex::new(Some(message.to_string())),
                ..Self::default()
            }
        }

        fn grants(&self) -> Vec<TokenGrant> {
            self.requests.lock().expect("requests mutex poisoned").clone()
        }
    }

    #[async_trait]
    impl TokenEndpointClient for FakeTokenEndpoint {
        async fn request_token(&self, request: TokenRequest) -> Result<TokenResponse, InfraError> {
            self.requests
                .lock()
                .expect("requests mutex poisoned")
                .push(request.grant.clone());
            if let Some(message) = self.reject_with.lock().expect("reject mutex poisoned").clone() {
                return Err(InfraError::OAuth(message));
            }
            let access_token = match request.grant {
                TokenGrant::AuthorizationCode { code, .. } => format!("access-for-{code}"),
                TokenGrant::RefreshToken { .. } => "refreshed-access".to_string(),
            };
            Ok(TokenResponse {
                access_token,
                refresh_token: None,
                expires_in: 3600,
                token_type: None,
                scope: None,
            })
        }
    }

    fn settings() -> OAuthSettings {
        OAuthSettings {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            redirect_uri: "http://127.0.0.1:8080/oauth2/callback".to_string(),
            scopes: vec!["https://www.googleapis.com/auth/calendar.events".to_string()],
        }
    }

    fn authenticator(
        store: &Arc<InMemoryTokenStore>,
        client: &Arc<FakeTokenEndpoint>,
    ) -> GoogleAuthenticator<InMemoryTokenStore, FakeTokenEndpoint> {
        GoogleAuthenticator::new(settings(), Arc::clone(store), Arc::clone(client))
            .with_now_provider(Arc::new(fixed_now))
    }

    fn stored(expires_in_seconds: i64, refresh_token: Option<&str>) -> StoredToken {
        StoredToken {
            access_token: "stored-access".to_string(),
            refresh_token: refresh_token.map(ToOwned::to_owned),
            expires_at: fixed_now() + Duration::seconds(expires_in_seconds),
            token_type: "Bearer".to_string(),
            scope: None,
        }
    }

    #[test]
    fn consent_url_requests_offline_access() {
        let store = Arc::new(InMemoryTokenStore::default());
        let client = Arc::new(FakeTokenEndpoint::default());
        let url = authenticator(&store, &client)
            .consent_url("state-1")
            .expect("consent url");
        assert!(url.starts_with(AUTHORIZATION_ENDPOINT));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("state=state-1"));
        assert!(authenticator(&store, &client).consent_url(" ").is_err());
    }

    #[tokio::test]
    async fn exchanged_code_is_stored() {
        let store = Arc::new(InMemoryTokenStore::default());
        let client = Arc::new(FakeTokenEndpoint::default());
        let token = authenticator(&store, &client)
            .exchange_code(" abc ")
            .await
            .expect("exchange code");

        assert_eq!(token.access_token, "access-for-abc");
        assert_eq!(token.expires_at, fixed_now() + Duration::seconds(3600));
        assert_eq!(store.load().expect("load"), Some(token));
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_keeps_refresh_token() {
        let store = Arc::new(InMemoryTokenStore::default());
        store.save(&stored(-120, Some("refresh-1"))).expect("save");
        let client = Arc::new(FakeTokenEndpoint::default());

        let status = authenticator(&store, &client)
            .ensure_token()
            .await
            .expect("ensure token");
        match status {
            TokenStatus::Refreshed(token) => {
                assert_eq!(token.access_token, "refreshed-access");
                assert_eq!(token.refresh_token.as_deref(), Some("refresh-1"));
            }
            other => panic!("expected refreshed token, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_token_makes_access_token_fail() {
        let store = Arc::new(InMemoryTokenStore::default());
        let client = Arc::new(FakeTokenEndpoint::default());
        let error = authenticator(&store, &client)
            .access_token()
            .await
            .expect_err("no token stored");
        assert!(matches!(error, InfraError::OAuth(message) if message.contains("msgblock auth")));
        assert!(client.grants().is_empty());
    }

    // Feature: msgblock, Property: a usable stored token never hits the token endpoint
    proptest! {
        #[test]
        fn usable_token_is_reused(remaining in (EXPIRY_LEEWAY_SECONDS + 1)..604_800i64) {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(async move {
                let store = Arc::new(InMemoryTokenStore::default());
                store.save(&stored(remaining, Some("refresh"))).expect("save");
                let client = Arc::new(FakeTokenEndpoint::default());

                let token = authenticator(&store, &client)
                    .access_token()
                    .await
                    .expect("access token");
                assert_eq!(token, "stored-access");
                assert!(client.grants().is_empty());
            });
        }
    }

    // Feature: msgblock, Property: a rejected refresh asks for re-authentication
    proptest! {
        #[test]
        fn rejected_refresh_requires_reauthentication(expired_ago in 0i64..86_400i64) {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(async move {
                let store = Arc::new(InMemoryTokenStore::default());
                store.save(&stored(-expired_ago, Some("revoked"))).expect("save");
                let client = Arc::new(FakeTokenEndpoint::rejecting("invalid_grant"));

                let status = authenticator(&store, &client)
                    .ensure_token()
                    .await
                    .expect("ensure token");
                assert_eq!(status, TokenStatus::ReauthenticationRequired);
                assert_eq!(client.grants().len(), 1);
            });
        }
    }
}
