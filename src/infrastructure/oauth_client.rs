use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenGrant {
    AuthorizationCode { code: String, redirect_uri: String },
    RefreshToken { refresh_token: String },
}

#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    pub grant: TokenGrant,
}

impl TokenRequest {
    pub fn form_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("client_id", self.client_id.clone()),
            ("client_secret", self.client_secret.clone()),
        ];
        match &self.grant {
            TokenGrant::AuthorizationCode { code, redirect_uri } => {
                params.push(("grant_type", "authorization_code".to_string()));
                params.push(("code", code.clone()));
                params.push(("redirect_uri", redirect_uri.clone()));
            }
            TokenGrant::RefreshToken { refresh_token } => {
                params.push(("grant_type", "refresh_token".to_string()));
                params.push(("refresh_token", refresh_token.clone()));
            }
        }
        params
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

#[async_trait]
pub trait TokenEndpointClient: Send + Sync {
    async fn request_token(&self, request: TokenRequest) -> Result<TokenResponse, InfraError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestTokenEndpointClient {
    client: Client,
}

impl ReqwestTokenEndpointClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenPayload {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

fn parse_token_payload(
    success: bool,
    status: u16,
    body: &str,
) -> Result<TokenResponse, InfraError> {
    let payload = serde_json::from_str::<TokenPayload>(body).map_err(|error| {
        InfraError::OAuth(format!("invalid token response payload: {error}; body={body}"))
    })?;

    if !success || payload.error.is_some() {
        let code = payload.error.unwrap_or_else(|| format!("http_{status}"));
        let detail = payload.error_description.unwrap_or_else(|| body.to_string());
        return Err(InfraError::OAuth(format!("token endpoint error: {code}; {detail}")));
    }

    let access_token = payload
        .access_token
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| {
            InfraError::OAuth("token response did not include access_token".to_string())
        })?;
    Ok(TokenResponse {
        access_token,
        refresh_token: payload.refresh_token,
        expires_in: payload.expires_in.unwrap_or(0).max(0),
        token_type: payload.token_type,
        scope: payload.scope,
    })
}

#[async_trait]
impl TokenEndpointClient for ReqwestTokenEndpointClient {
    async fn request_token(&self, request: TokenRequest) -> Result<TokenResponse, InfraError> {
        let response = self
            .client
            .post(&request.endpoint)
            .form(&request.form_params())
            .send()
            .await
            .map_err(|error| InfraError::OAuth(format!("request failed: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::OAuth(format!("failed reading token response: {error}")))?;
        parse_token_payload(status.is_success(), status.as_u16(), &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(grant: TokenGrant) -> TokenRequest {
        TokenRequest {
            endpoint: "https://oauth2.googleapis.com/token".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            grant,
        }
    }

    #[test]
    fn refresh_grant_sends_refresh_token_only() {
        let params = request(TokenGrant::RefreshToken {
            refresh_token: "r-1".to_string(),
        })
        .form_params();
        assert!(params.contains(&("grant_type", "refresh_token".to_string())));
        assert!(params.contains(&("refresh_token", "r-1".to_string())));
        assert!(params.iter().all(|(key, _)| *key != "code"));
    }

    #[test]
    fn code_grant_sends_code_and_redirect_uri() {
        let params = request(TokenGrant::AuthorizationCode {
            code: "c-1".to_string(),
            redirect_uri: "http://127.0.0.1:8080/cb".to_string(),
        })
        .form_params();
        assert!(params.contains(&("grant_type", "authorization_code".to_string())));
        assert!(params.contains(&("redirect_uri", "http://127.0.0.1:8080/cb".to_string())));
    }

    #[test]
    fn endpoint_errors_surface_code_and_description() {
        let body = r#"{"error":"invalid_grant","error_description":"Token has been revoked."}"#;
        match parse_token_payload(false, 400, body) {
            Err(InfraError::OAuth(message)) => {
                assert!(message.contains("invalid_grant"));
                assert!(message.contains("revoked"));
            }
            other => panic!("expected oauth error, got {other:?}"),
        }
    }

    #[test]
    fn successful_payload_clamps_negative_expiry() {
        let body = r#"{"access_token":"a","expires_in":-5,"token_type":"Bearer"}"#;
        let parsed = parse_token_payload(true, 200, body).expect("token");
        assert_eq!(parsed.access_token, "a");
        assert_eq!(parsed.expires_in, 0);
        assert_eq!(parsed.refresh_token, None);
    }
}
