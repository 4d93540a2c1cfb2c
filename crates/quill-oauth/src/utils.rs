use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use smol_str::SmolStr;

use crate::error::{OAuthError, Result};
use crate::types::AuthMethod;

/// Fill `LEN` bytes from `rng`, surfacing entropy failures instead of panicking.
pub fn get_random_values<R, const LEN: usize>(rng: &mut R) -> Result<[u8; LEN]>
where
    R: RngCore + CryptoRng,
{
    let mut bytes = [0u8; LEN];
    rng.try_fill_bytes(&mut bytes)
        .map_err(OAuthError::RandomnessUnavailable)?;
    Ok(bytes)
}

/// Opaque `state` value for an authorization request.
pub fn generate_state() -> Result<SmolStr> {
    Ok(URL_SAFE_NO_PAD
        .encode(get_random_values::<_, 24>(&mut OsRng)?)
        .into())
}

/// Pick the token endpoint authentication method.
///
/// A configured method always wins. Otherwise prefer `client_secret_basic`,
/// then `client_secret_post`, among what the server advertises; a missing list
/// means the RFC 8414 default of `client_secret_basic`.
pub fn negotiate_auth_method(
    configured: Option<AuthMethod>,
    has_secret: bool,
    supported: Option<&[SmolStr]>,
) -> AuthMethod {
    if let Some(method) = configured {
        return method;
    }
    if !has_secret {
        return AuthMethod::None;
    }
    let Some(supported) = supported else {
        return AuthMethod::ClientSecretBasic;
    };
    [AuthMethod::ClientSecretBasic, AuthMethod::ClientSecretPost]
        .into_iter()
        .find(|method| supported.iter().any(|s| s == method.as_str()))
        .unwrap_or(AuthMethod::None)
}
