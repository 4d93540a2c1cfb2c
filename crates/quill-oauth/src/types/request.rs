use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use smol_str::{SmolStr, format_smolstr};
use url::Url;

use crate::error::{OAuthError, Result};

/// Client authentication at the token, PAR, device and introspection endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    ClientSecretBasic,
    ClientSecretPost,
    None,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::ClientSecretBasic => "client_secret_basic",
            AuthMethod::ClientSecretPost => "client_secret_post",
            AuthMethod::None => "none",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of an authorization request (RFC 6749 §4.1.1, OIDC Core §3.1.2.1).
///
/// When `request_uri` is set the request has been pushed, and only
/// `client_id` + `request_uri` go on the browser redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub client_id: SmolStr,
    pub redirect_uri: SmolStr,
    pub scope: Option<SmolStr>,
    pub state: Option<SmolStr>,
    pub prompt: Option<SmolStr>,
    pub acr_values: Option<SmolStr>,
    pub login_hint: Option<SmolStr>,
    pub max_age: Option<u64>,
    pub ui_locales: Option<SmolStr>,
    // https://datatracker.ietf.org/doc/html/rfc7636#section-4.3
    pub code_challenge: Option<SmolStr>,
    pub code_challenge_method: Option<SmolStr>,
    // https://datatracker.ietf.org/doc/html/rfc9449#section-10
    pub dpop_jkt: Option<SmolStr>,
    // https://datatracker.ietf.org/doc/html/rfc9126#section-4
    pub request_uri: Option<SmolStr>,
    /// Extra parameters; a key that matches a built-in parameter replaces it.
    pub custom: Vec<(SmolStr, SmolStr)>,
}

impl AuthorizationRequest {
    pub fn new(client_id: impl Into<SmolStr>, redirect_uri: impl Into<SmolStr>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            ..Default::default()
        }
    }

    /// The redirect for a pushed request.
    pub fn pushed(client_id: impl Into<SmolStr>, request_uri: impl Into<SmolStr>) -> Self {
        Self {
            client_id: client_id.into(),
            request_uri: Some(request_uri.into()),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(OAuthError::config("client_id must not be empty"));
        }
        Ok(())
    }

    /// Query parameters in wire order.
    pub fn to_pairs(&self) -> Vec<(SmolStr, SmolStr)> {
        if let Some(request_uri) = &self.request_uri {
            return vec![
                ("client_id".into(), self.client_id.clone()),
                ("request_uri".into(), request_uri.clone()),
            ];
        }
        let mut pairs: Vec<(SmolStr, SmolStr)> = vec![
            ("response_type".into(), "code".into()),
            ("client_id".into(), self.client_id.clone()),
        ];
        let mut push = |key: &str, value: Option<SmolStr>| {
            if let Some(value) = value {
                pairs.push((key.into(), value));
            }
        };
        push("redirect_uri", Some(self.redirect_uri.clone()).filter(|r| !r.is_empty()));
        push("scope", self.scope.clone());
        push("state", self.state.clone());
        push("prompt", self.prompt.clone());
        push("acr_values", self.acr_values.clone());
        push("login_hint", self.login_hint.clone());
        push("max_age", self.max_age.map(|age| format_smolstr!("{age}")));
        push("ui_locales", self.ui_locales.clone());
        push("code_challenge", self.code_challenge.clone());
        push("code_challenge_method", self.code_challenge_method.clone());
        push("dpop_jkt", self.dpop_jkt.clone());

        for (key, value) in &self.custom {
            match pairs.iter_mut().find(|(k, _)| k == key) {
                Some(existing) => existing.1 = value.clone(),
                None => pairs.push((key.clone(), value.clone())),
            }
        }
        pairs
    }

    /// `endpoint` with this request appended to its query.
    pub fn authorization_url(&self, endpoint: &Url) -> Result<Url> {
        self.validate()?;
        let mut url = endpoint.clone();
        url.query_pairs_mut()
            .extend_pairs(self.to_pairs().iter().map(|(k, v)| (k.as_str(), v.as_str())));
        Ok(url)
    }
}

/// Pushed authorization request body; `client_id` is contributed by client
/// authentication, so it is left out here.
#[derive(Debug)]
pub struct ParParameters<'a>(pub &'a AuthorizationRequest);

impl Serialize for ParParameters<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        let pairs = self.0.to_pairs();
        let mut map = serializer.serialize_map(None)?;
        for (key, value) in pairs.iter().filter(|(k, _)| k != "client_id") {
            map.serialize_entry(key.as_str(), value.as_str())?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenGrantType {
    #[serde(rename = "authorization_code")]
    AuthorizationCode,
    #[serde(rename = "refresh_token")]
    RefreshToken,
    #[serde(rename = "client_credentials")]
    ClientCredentials,
    // https://datatracker.ietf.org/doc/html/rfc8628#section-3.4
    #[serde(rename = "urn:ietf:params:oauth:grant-type:device_code")]
    DeviceCode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequestParameters {
    // https://datatracker.ietf.org/doc/html/rfc6749#section-4.1.3
    pub grant_type: TokenGrantType,
    pub code: SmolStr,
    pub redirect_uri: SmolStr,
    // https://datatracker.ietf.org/doc/html/rfc7636#section-4.5
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<SmolStr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequestParameters {
    // https://datatracker.ietf.org/doc/html/rfc6749#section-6
    pub grant_type: TokenGrantType,
    pub refresh_token: SmolStr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<SmolStr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCredentialsParameters {
    // https://datatracker.ietf.org/doc/html/rfc6749#section-4.4.2
    pub grant_type: TokenGrantType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<SmolStr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCodeParameters {
    pub grant_type: TokenGrantType,
    pub device_code: SmolStr,
}

// https://datatracker.ietf.org/doc/html/rfc8628#section-3.1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAuthorizationParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<SmolStr>,
}

// https://datatracker.ietf.org/doc/html/rfc7662#section-2.1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionRequestParameters {
    pub token: SmolStr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type_hint: Option<SmolStr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AuthorizationRequest {
        AuthorizationRequest {
            scope: Some("openid profile".into()),
            state: Some("xyz".into()),
            max_age: Some(300),
            code_challenge: Some("challenge".into()),
            code_challenge_method: Some("S256".into()),
            ..AuthorizationRequest::new("my-client", "http://localhost:9876/callback")
        }
    }

    #[test]
    fn authorization_url_carries_parameters() {
        let endpoint = Url::parse("https://auth.example.com/authorize?tenant=a").unwrap();
        let url = request().authorization_url(&endpoint).unwrap();
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |k: &str| query.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("tenant"), Some("a"));
        assert_eq!(get("response_type"), Some("code"));
        assert_eq!(get("client_id"), Some("my-client"));
        assert_eq!(get("redirect_uri"), Some("http://localhost:9876/callback"));
        assert_eq!(get("scope"), Some("openid profile"));
        assert_eq!(get("max_age"), Some("300"));
        assert_eq!(get("code_challenge_method"), Some("S256"));
        assert_eq!(get("prompt"), None);
    }

    #[test]
    fn custom_parameters_override_and_extend() {
        let mut req = request();
        req.custom = vec![
            ("scope".into(), "email".into()),
            ("audience".into(), "api".into()),
        ];
        let pairs = req.to_pairs();
        assert_eq!(pairs.iter().filter(|(k, _)| k == "scope").count(), 1);
        assert!(pairs.contains(&("scope".into(), "email".into())));
        assert_eq!(pairs.last(), Some(&("audience".into(), "api".into())));
    }

    #[test]
    fn pushed_request_only_sends_request_uri() {
        let pairs = AuthorizationRequest::pushed("my-client", "urn:ietf:params:oauth:request_uri:abc")
            .to_pairs();
        assert_eq!(
            pairs,
            vec![
                ("client_id".into(), "my-client".into()),
                ("request_uri".into(), "urn:ietf:params:oauth:request_uri:abc".into()),
            ]
        );
    }

    #[test]
    fn empty_client_id_is_rejected() {
        let endpoint = Url::parse("https://auth.example.com/authorize").unwrap();
        let err = AuthorizationRequest::new("", "http://localhost/cb")
            .authorization_url(&endpoint)
            .unwrap_err();
        assert!(matches!(err, OAuthError::Config(_)));
    }

    #[test]
    fn par_parameters_omit_client_id() {
        let body = serde_html_form::to_string(ParParameters(&request())).unwrap();
        assert!(body.starts_with("response_type=code&redirect_uri="));
        assert!(!body.contains("client_id"));
    }

    #[test]
    fn device_grant_type_urn() {
        let body = serde_html_form::to_string(DeviceCodeParameters {
            grant_type: TokenGrantType::DeviceCode,
            device_code: "dc".into(),
        })
        .unwrap();
        assert_eq!(
            body,
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Adevice_code&device_code=dc"
        );
    }
}
