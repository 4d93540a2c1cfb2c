use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, format_smolstr};
use url::Url;

use crate::error::{OAuthError, Result};

/// Authorization server metadata, as served by OpenID discovery or RFC 8414.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ServerMetadata {
    // https://datatracker.ietf.org/doc/html/rfc8414#section-2
    pub issuer: SmolStr,
    pub authorization_endpoint: Option<SmolStr>,
    pub token_endpoint: Option<SmolStr>,
    pub jwks_uri: Option<SmolStr>,
    pub userinfo_endpoint: Option<SmolStr>,
    pub scopes_supported: Option<Vec<SmolStr>>,
    pub response_types_supported: Option<Vec<SmolStr>>,
    pub grant_types_supported: Option<Vec<SmolStr>>,
    pub token_endpoint_auth_methods_supported: Option<Vec<SmolStr>>,
    pub revocation_endpoint: Option<SmolStr>,
    pub introspection_endpoint: Option<SmolStr>,
    pub code_challenge_methods_supported: Option<Vec<SmolStr>>,

    // https://datatracker.ietf.org/doc/html/rfc9126#section-5
    pub pushed_authorization_request_endpoint: Option<SmolStr>,
    pub require_pushed_authorization_requests: Option<bool>,

    // https://datatracker.ietf.org/doc/html/rfc8628#section-4
    pub device_authorization_endpoint: Option<SmolStr>,

    // https://datatracker.ietf.org/doc/html/rfc9207#section-3
    pub authorization_response_iss_parameter_supported: Option<bool>,

    // https://datatracker.ietf.org/doc/html/rfc9449#section-5.1
    pub dpop_signing_alg_values_supported: Option<Vec<SmolStr>>,
}

/// The endpoints a flow talks to, merged from discovery and explicit
/// configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints {
    pub issuer: Option<SmolStr>,
    pub authorization: Option<Url>,
    pub token: Option<Url>,
    pub introspection: Option<Url>,
    pub pushed_authorization: Option<Url>,
    pub device_authorization: Option<Url>,
    pub auth_methods_supported: Option<Vec<SmolStr>>,
    pub iss_parameter_supported: bool,
}

impl Endpoints {
    pub fn from_metadata(metadata: &ServerMetadata) -> Result<Self> {
        let parse = |value: &Option<SmolStr>| -> Result<Option<Url>> {
            value.as_deref().map(Url::parse).transpose().map_err(Into::into)
        };
        Ok(Self {
            issuer: Some(metadata.issuer.clone()).filter(|i| !i.is_empty()),
            authorization: parse(&metadata.authorization_endpoint)?,
            token: parse(&metadata.token_endpoint)?,
            introspection: parse(&metadata.introspection_endpoint)?,
            pushed_authorization: parse(&metadata.pushed_authorization_request_endpoint)?,
            device_authorization: parse(&metadata.device_authorization_endpoint)?,
            auth_methods_supported: metadata.token_endpoint_auth_methods_supported.clone(),
            iss_parameter_supported: metadata
                .authorization_response_iss_parameter_supported
                .unwrap_or(false),
        })
    }

    /// Fill every endpoint `overrides` sets on top of `self`.
    pub fn with_overrides(self, overrides: Endpoints) -> Self {
        Self {
            issuer: overrides.issuer.or(self.issuer),
            authorization: overrides.authorization.or(self.authorization),
            token: overrides.token.or(self.token),
            introspection: overrides.introspection.or(self.introspection),
            pushed_authorization: overrides.pushed_authorization.or(self.pushed_authorization),
            device_authorization: overrides.device_authorization.or(self.device_authorization),
            auth_methods_supported: overrides.auth_methods_supported.or(self.auth_methods_supported),
            iss_parameter_supported: overrides.iss_parameter_supported || self.iss_parameter_supported,
        }
    }

    pub fn authorization(&self) -> Result<&Url> {
        require(self.authorization.as_ref(), "authorization")
    }

    pub fn token(&self) -> Result<&Url> {
        require(self.token.as_ref(), "token")
    }

    pub fn introspection(&self) -> Result<&Url> {
        require(self.introspection.as_ref(), "introspection")
    }

    pub fn pushed_authorization(&self) -> Result<&Url> {
        require(self.pushed_authorization.as_ref(), "pushed authorization request")
    }

    pub fn device_authorization(&self) -> Result<&Url> {
        require(self.device_authorization.as_ref(), "device authorization")
    }
}

fn require<'a>(url: Option<&'a Url>, name: &str) -> Result<&'a Url> {
    url.ok_or_else(|| {
        OAuthError::config(format_smolstr!(
            "no {name} endpoint: set it explicitly or configure an issuer to discover it"
        ))
    })
}
