use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use smol_str::SmolStr;

use super::{jws::RegisteredHeader, jwt::Claims};
use crate::error::Result;
use crate::keys::DpopKeyPair;

/// Serialize and sign a compact JWS with the key pair's algorithm.
pub fn create_signed_jwt(key: &DpopKeyPair, header: RegisteredHeader, claims: Claims) -> Result<SmolStr> {
    let header = URL_SAFE_NO_PAD.encode(serde_json::to_string(&header).map_err(signing_error)?);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_string(&claims).map_err(signing_error)?);
    let signature = key.sign(format!("{header}.{payload}").as_bytes())?;
    Ok(format!("{header}.{payload}.{}", URL_SAFE_NO_PAD.encode(signature)).into())
}

fn signing_error(e: serde_json::Error) -> crate::error::OAuthError {
    crate::error::OAuthError::Signing(smol_str::format_smolstr!("{e}"))
}
