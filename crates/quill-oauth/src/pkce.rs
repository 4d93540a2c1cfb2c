//! Proof Key for Code Exchange (RFC 7636).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use smol_str::SmolStr;

use crate::error::Result;
use crate::utils::get_random_values;

/// Bytes of entropy behind the verifier; encodes to the 128 character maximum.
pub const VERIFIER_BYTES: usize = 96;

pub const CHALLENGE_METHOD: &str = "S256";

/// A verifier and its S256 challenge. One pair per authorization attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct Pkce {
    verifier: SmolStr,
    challenge: SmolStr,
}

impl std::fmt::Debug for Pkce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkce")
            .field("challenge", &self.challenge)
            .finish_non_exhaustive()
    }
}

impl Pkce {
    /// Generate a pair from the operating system entropy source.
    pub fn generate() -> Result<Self> {
        Self::generate_with(&mut OsRng)
    }

    pub fn generate_with<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self> {
        // https://datatracker.ietf.org/doc/html/rfc7636#section-4.1
        let verifier = URL_SAFE_NO_PAD.encode(get_random_values::<_, VERIFIER_BYTES>(rng)?);
        // https://datatracker.ietf.org/doc/html/rfc7636#section-4.2
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Ok(Self {
            verifier: verifier.into(),
            challenge: challenge.into(),
        })
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    pub fn method(&self) -> &'static str {
        CHALLENGE_METHOD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OAuthError;
    use crate::utils::tests::BrokenRng;

    #[test]
    fn verifier_and_challenge_lengths() {
        let pkce = Pkce::generate().unwrap();
        assert_eq!(pkce.verifier().len(), 128);
        assert_eq!(pkce.challenge().len(), 43);
        assert_eq!(pkce.method(), "S256");
    }

    #[test]
    fn both_halves_decode_as_base64url() {
        for _ in 0..16 {
            let pkce = Pkce::generate().unwrap();
            assert_eq!(URL_SAFE_NO_PAD.decode(pkce.verifier()).unwrap().len(), VERIFIER_BYTES);
            assert_eq!(URL_SAFE_NO_PAD.decode(pkce.challenge()).unwrap().len(), 32);
        }
    }

    #[test]
    fn challenge_is_sha256_of_verifier() {
        let pkce = Pkce::generate().unwrap();
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(pkce.verifier().as_bytes()));
        assert_eq!(pkce.challenge(), expected);
    }

    #[test]
    fn entropy_failure_is_fatal() {
        assert!(matches!(
            Pkce::generate_with(&mut BrokenRng),
            Err(OAuthError::RandomnessUnavailable(_))
        ));
    }

    #[test]
    fn debug_hides_verifier() {
        let pkce = Pkce::generate().unwrap();
        assert!(!format!("{pkce:?}").contains(pkce.verifier()));
    }
}
