//! Authorization server discovery.

use http::{Request, StatusCode};
use url::Url;

use crate::error::{OAuthError, Result};
use crate::http_client::HttpClient;
use crate::request::parse_response;
use crate::types::ServerMetadata;

/// Compare two issuer strings strictly but without spuriously failing on trivial differences.
///
/// Rules:
/// - Schemes must match exactly.
/// - Hostnames and effective ports must match (treat missing port the same as default port).
/// - Path must match, except that an empty path and `/` are equivalent.
/// - Query/fragment are not considered; if present on either side, the comparison fails.
pub(crate) fn issuer_equivalent(a: &str, b: &str) -> bool {
    fn normalize(url: &Url) -> Option<(String, String, u16, String)> {
        if url.query().is_some() || url.fragment().is_some() {
            return None;
        }
        let scheme = url.scheme().to_string();
        let host = url.host_str()?.to_string();
        let port = url.port_or_known_default()?;
        let path = match url.path() {
            "" | "/" => "/".to_string(),
            other => other.trim_end_matches('/').to_string(),
        };
        Some((scheme, host, port, path))
    }

    match (Url::parse(a), Url::parse(b)) {
        (Ok(ua), Ok(ub)) => normalize(&ua).is_some_and(|na| Some(na) == normalize(&ub)),
        _ => a == b,
    }
}

// https://openid.net/specs/openid-connect-discovery-1_0.html#ProviderConfigurationRequest
fn openid_configuration_url(issuer: &Url) -> Result<Url> {
    let path = issuer.path().trim_end_matches('/');
    Ok(issuer.join(&format!("{path}/.well-known/openid-configuration"))?)
}

// https://datatracker.ietf.org/doc/html/rfc8414#section-3.1
fn authorization_server_url(issuer: &Url) -> Result<Url> {
    let path = issuer.path().trim_end_matches('/');
    Ok(issuer.join(&format!("/.well-known/oauth-authorization-server{path}"))?)
}

async fn fetch_metadata<C: HttpClient + Sync>(client: &C, url: &Url) -> Result<ServerMetadata> {
    tracing::debug!(%url, "fetching server metadata");
    let req = Request::builder()
        .uri(url.as_str())
        .header(http::header::ACCEPT, "application/json")
        .body(Vec::new())?;
    let res = client
        .send_http(req)
        .await
        .map_err(OAuthError::transport)?;
    parse_response(res.status(), res.body())
}

/// Fetch the issuer's discovery document, falling back to RFC 8414 metadata
/// when the OpenID configuration is missing.
#[tracing::instrument(level = "debug", skip_all, fields(issuer = %issuer))]
pub async fn discover<C: HttpClient + Sync>(client: &C, issuer: &Url) -> Result<ServerMetadata> {
    let metadata = match fetch_metadata(client, &openid_configuration_url(issuer)?).await {
        Err(OAuthError::HttpFailure(e)) if e.status == StatusCode::NOT_FOUND => {
            fetch_metadata(client, &authorization_server_url(issuer)?).await?
        }
        other => other?,
    };
    // https://openid.net/specs/openid-connect-discovery-1_0.html#ProviderConfigurationValidation
    if !issuer_equivalent(&metadata.issuer, issuer.as_str()) {
        return Err(OAuthError::IssuerMismatch {
            expected: issuer.as_str().into(),
            found: metadata.issuer,
        });
    }
    Ok(metadata)
}
