use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use smol_str::SmolStr;

// https://datatracker.ietf.org/doc/html/rfc9126#section-2.2
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ParResponse {
    pub request_uri: SmolStr,
    pub expires_in: Option<u64>,
}

// https://datatracker.ietf.org/doc/html/rfc6749#section-5.1
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TokenResponse {
    pub access_token: SmolStr,
    pub token_type: SmolStr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<SmolStr>,
    // https://openid.net/specs/openid-connect-core-1_0.html#TokenResponse
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<SmolStr>,
    /// Any other members the server returned.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenResponse {
    pub fn is_dpop_bound(&self) -> bool {
        self.token_type.eq_ignore_ascii_case("dpop")
    }
}

// https://datatracker.ietf.org/doc/html/rfc7662#section-2.2
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<SmolStr>,
    /// A string or an array of strings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<SmolStr>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// https://datatracker.ietf.org/doc/html/rfc8628#section-3.2
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceAuthorizationResponse {
    pub device_code: SmolStr,
    pub user_code: SmolStr,
    // some providers still send the draft name
    #[serde(alias = "verification_url")]
    pub verification_uri: SmolStr,
    pub verification_uri_complete: Option<SmolStr>,
    pub expires_in: u64,
    pub interval: Option<u64>,
}

// https://datatracker.ietf.org/doc/html/rfc6749#section-5.2
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OAuthErrorResponse {
    pub error: SmolStr,
    pub error_description: Option<SmolStr>,
    pub error_uri: Option<SmolStr>,
}
