use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use http::Method;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use smol_str::SmolStr;
use url::Url;

use crate::error::Result;
use crate::jose::{
    create_signed_jwt,
    jws::RegisteredHeader,
    jwt::{Claims, PublicClaims, RegisteredClaims},
};
use crate::keys::DpopKeyPair;
use crate::utils::get_random_values;

pub const JWT_HEADER_TYP_DPOP: &str = "dpop+jwt";

pub const DPOP_HEADER: &str = "DPoP";

const JTI_ENTROPY_BYTES: usize = 30;

/// Fresh unlinkable proof identifier: the hash of 30 random bytes.
pub(crate) fn generate_jti() -> Result<SmolStr> {
    let bytes = get_random_values::<_, JTI_ENTROPY_BYTES>(&mut OsRng)?;
    Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(bytes)).into())
}

/// Build a compact DPoP proof JWT bound to `method` and `url`, with the public
/// key embedded as a JWK header.
// https://datatracker.ietf.org/doc/html/rfc9449#section-4.2
pub fn build_dpop_proof(key: &DpopKeyPair, method: &Method, url: &Url) -> Result<SmolStr> {
    let mut header = RegisteredHeader::from(key.algorithm());
    header.typ = Some(JWT_HEADER_TYP_DPOP.into());
    header.jwk = Some(key.public_jwk());

    let claims = Claims {
        registered: RegisteredClaims {
            jti: Some(generate_jti()?),
            iat: Some(Utc::now().timestamp()),
        },
        public: PublicClaims {
            htm: Some(method.as_str().into()),
            htu: Some(htu(url)),
        },
    };
    create_signed_jwt(key, header, claims)
}

// htu excludes query and fragment
fn htu(url: &Url) -> SmolStr {
    let mut url = url.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.as_str().into()
}
