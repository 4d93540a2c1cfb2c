//! Asymmetric key material for DPoP.
//!
//! Keys are modelled as a closed set of families. The family (and with it the
//! JWS algorithm) is resolved once, when a [`DpopKeyPair`] is constructed, so
//! signing never has to inspect key types again.

use std::fmt;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use elliptic_curve::sec1::ToEncodedPoint;
use pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Sha256, Sha384, Sha512};
use signature::{SignatureEncoding, Signer};
use smol_str::{SmolStr, format_smolstr};

use crate::error::{OAuthError, Result};
use crate::jose::{Algorithm, Jwk};

/// Key family tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    EcP256,
    EcP384,
    EcP521,
    Ed25519,
}

impl fmt::Display for KeyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyFamily::Rsa => "RSA",
            KeyFamily::EcP256 => "ECDSA P-256",
            KeyFamily::EcP384 => "ECDSA P-384",
            KeyFamily::EcP521 => "ECDSA P-521",
            KeyFamily::Ed25519 => "Ed25519",
        })
    }
}

#[derive(Clone)]
pub enum PrivateKey {
    Rsa(Box<RsaPrivateKey>),
    EcP256(p256::SecretKey),
    EcP384(p384::SecretKey),
    EcP521(p521::SecretKey),
    Ed25519(ed25519_dalek::SigningKey),
}

#[derive(Clone, PartialEq, Eq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    EcP256(p256::PublicKey),
    EcP384(p384::PublicKey),
    EcP521(p521::PublicKey),
    Ed25519(ed25519_dalek::VerifyingKey),
}

// Never print key material.
impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PrivateKey").field(&self.family()).finish()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.family()).finish()
    }
}

impl PrivateKey {
    pub fn family(&self) -> KeyFamily {
        match self {
            PrivateKey::Rsa(_) => KeyFamily::Rsa,
            PrivateKey::EcP256(_) => KeyFamily::EcP256,
            PrivateKey::EcP384(_) => KeyFamily::EcP384,
            PrivateKey::EcP521(_) => KeyFamily::EcP521,
            PrivateKey::Ed25519(_) => KeyFamily::Ed25519,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            PrivateKey::Rsa(key) => PublicKey::Rsa(key.to_public_key()),
            PrivateKey::EcP256(key) => PublicKey::EcP256(key.public_key()),
            PrivateKey::EcP384(key) => PublicKey::EcP384(key.public_key()),
            PrivateKey::EcP521(key) => PublicKey::EcP521(key.public_key()),
            PrivateKey::Ed25519(key) => PublicKey::Ed25519(key.verifying_key()),
        }
    }

    /// Decode a PEM private key: PKCS#8 for every family, PKCS#1 for RSA and
    /// SEC1 for the NIST curves.
    pub fn from_pem(pem: &str) -> Result<Self> {
        match pem_label(pem)? {
            "PRIVATE KEY" => {
                if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(pem) {
                    return Ok(PrivateKey::Rsa(Box::new(key)));
                }
                if let Ok(key) = p256::SecretKey::from_pkcs8_pem(pem) {
                    return Ok(PrivateKey::EcP256(key));
                }
                if let Ok(key) = p384::SecretKey::from_pkcs8_pem(pem) {
                    return Ok(PrivateKey::EcP384(key));
                }
                if let Ok(key) = p521::SecretKey::from_pkcs8_pem(pem) {
                    return Ok(PrivateKey::EcP521(key));
                }
                if let Ok(key) = ed25519_dalek::SigningKey::from_pkcs8_pem(pem) {
                    return Ok(PrivateKey::Ed25519(key));
                }
                Err(OAuthError::UnsupportedKeyType(
                    "PKCS#8 key of an unrecognised algorithm".into(),
                ))
            }
            "RSA PRIVATE KEY" => RsaPrivateKey::from_pkcs1_pem(pem)
                .map(|key| PrivateKey::Rsa(Box::new(key)))
                .map_err(|e| OAuthError::Key(format_smolstr!("{e}"))),
            "EC PRIVATE KEY" => {
                if let Ok(key) = p256::SecretKey::from_sec1_pem(pem) {
                    return Ok(PrivateKey::EcP256(key));
                }
                if let Ok(key) = p384::SecretKey::from_sec1_pem(pem) {
                    return Ok(PrivateKey::EcP384(key));
                }
                if let Ok(key) = p521::SecretKey::from_sec1_pem(pem) {
                    return Ok(PrivateKey::EcP521(key));
                }
                Err(OAuthError::UnsupportedKeyType(
                    "EC key on an unsupported curve".into(),
                ))
            }
            other => Err(OAuthError::UnsupportedKeyType(format_smolstr!(
                "PEM block `{other}`"
            ))),
        }
    }

    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_pem(&read_pem(path.as_ref())?)
    }

    /// Sign `message` with the given algorithm, returning the raw JWS signature.
    pub(crate) fn sign(&self, alg: Algorithm, message: &[u8]) -> Result<Vec<u8>> {
        let signing = |e: signature::Error| OAuthError::Signing(format_smolstr!("{e}"));
        match (self, alg) {
            (PrivateKey::Rsa(key), Algorithm::Rs256) => {
                let key = rsa::pkcs1v15::SigningKey::<Sha256>::new(key.as_ref().clone());
                Ok(key.try_sign(message).map_err(signing)?.to_vec())
            }
            (PrivateKey::Rsa(key), Algorithm::Rs384) => {
                let key = rsa::pkcs1v15::SigningKey::<Sha384>::new(key.as_ref().clone());
                Ok(key.try_sign(message).map_err(signing)?.to_vec())
            }
            (PrivateKey::Rsa(key), Algorithm::Rs512) => {
                let key = rsa::pkcs1v15::SigningKey::<Sha512>::new(key.as_ref().clone());
                Ok(key.try_sign(message).map_err(signing)?.to_vec())
            }
            (PrivateKey::EcP256(key), Algorithm::Es256) => {
                let key = p256::ecdsa::SigningKey::from_bytes(&key.to_bytes()).map_err(signing)?;
                let sig: p256::ecdsa::Signature = key.try_sign(message).map_err(signing)?;
                Ok(sig.to_bytes().to_vec())
            }
            (PrivateKey::EcP384(key), Algorithm::Es384) => {
                let key = p384::ecdsa::SigningKey::from_bytes(&key.to_bytes()).map_err(signing)?;
                let sig: p384::ecdsa::Signature = key.try_sign(message).map_err(signing)?;
                Ok(sig.to_bytes().to_vec())
            }
            (PrivateKey::EcP521(key), Algorithm::Es512) => {
                let key = p521::ecdsa::SigningKey::from_bytes(&key.to_bytes()).map_err(signing)?;
                let sig: p521::ecdsa::Signature = key.try_sign(message).map_err(signing)?;
                Ok(sig.to_bytes().to_vec())
            }
            (PrivateKey::Ed25519(key), Algorithm::EdDsa) => {
                let sig: ed25519_dalek::Signature = key.try_sign(message).map_err(signing)?;
                Ok(sig.to_bytes().to_vec())
            }
            (key, alg) => Err(OAuthError::Signing(format_smolstr!(
                "{} key cannot sign {}",
                key.family(),
                alg.as_str()
            ))),
        }
    }
}

impl PublicKey {
    pub fn family(&self) -> KeyFamily {
        match self {
            PublicKey::Rsa(_) => KeyFamily::Rsa,
            PublicKey::EcP256(_) => KeyFamily::EcP256,
            PublicKey::EcP384(_) => KeyFamily::EcP384,
            PublicKey::EcP521(_) => KeyFamily::EcP521,
            PublicKey::Ed25519(_) => KeyFamily::Ed25519,
        }
    }

    /// Decode a PEM `PUBLIC KEY` (SubjectPublicKeyInfo) block.
    pub fn from_pem(pem: &str) -> Result<Self> {
        match pem_label(pem)? {
            "PUBLIC KEY" => {
                if let Ok(key) = RsaPublicKey::from_public_key_pem(pem) {
                    return Ok(PublicKey::Rsa(key));
                }
                if let Ok(key) = p256::PublicKey::from_public_key_pem(pem) {
                    return Ok(PublicKey::EcP256(key));
                }
                if let Ok(key) = p384::PublicKey::from_public_key_pem(pem) {
                    return Ok(PublicKey::EcP384(key));
                }
                if let Ok(key) = p521::PublicKey::from_public_key_pem(pem) {
                    return Ok(PublicKey::EcP521(key));
                }
                if let Ok(key) = ed25519_dalek::VerifyingKey::from_public_key_pem(pem) {
                    return Ok(PublicKey::Ed25519(key));
                }
                Err(OAuthError::UnsupportedKeyType(
                    "public key of an unrecognised algorithm".into(),
                ))
            }
            other => Err(OAuthError::UnsupportedKeyType(format_smolstr!(
                "PEM block `{other}`"
            ))),
        }
    }

    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_pem(&read_pem(path.as_ref())?)
    }

    /// The JWS algorithm this key signs with.
    pub fn algorithm(&self) -> Result<Algorithm> {
        Ok(match self {
            PublicKey::Rsa(key) => match key.size() * 8 {
                bits if bits >= 4096 => Algorithm::Rs512,
                bits if bits >= 3072 => Algorithm::Rs384,
                bits if bits >= 2048 => Algorithm::Rs256,
                bits => {
                    return Err(OAuthError::UnsupportedKeyType(format_smolstr!(
                        "{bits}-bit RSA key"
                    )));
                }
            },
            PublicKey::EcP256(_) => Algorithm::Es256,
            PublicKey::EcP384(_) => Algorithm::Es384,
            PublicKey::EcP521(_) => Algorithm::Es512,
            PublicKey::Ed25519(_) => Algorithm::EdDsa,
        })
    }

    /// Public JWK. EC coordinates are left-padded to the curve's byte size.
    pub fn to_jwk(&self) -> Jwk {
        match self {
            PublicKey::Rsa(key) => Jwk::Rsa {
                e: b64(&key.e().to_bytes_be()),
                n: b64(&key.n().to_bytes_be()),
            },
            PublicKey::EcP256(key) => {
                let point = key.to_encoded_point(false);
                ec_jwk(
                    "P-256", 256,
                    point.x().map(|x| x.as_slice()),
                    point.y().map(|y| y.as_slice()),
                )
            }
            PublicKey::EcP384(key) => {
                let point = key.to_encoded_point(false);
                ec_jwk(
                    "P-384", 384,
                    point.x().map(|x| x.as_slice()),
                    point.y().map(|y| y.as_slice()),
                )
            }
            PublicKey::EcP521(key) => {
                let point = key.to_encoded_point(false);
                ec_jwk(
                    "P-521", 521,
                    point.x().map(|x| x.as_slice()),
                    point.y().map(|y| y.as_slice()),
                )
            }
            PublicKey::Ed25519(key) => Jwk::Okp {
                crv: "Ed25519".into(),
                x: b64(key.as_bytes()),
            },
        }
    }
}

/// A private key with its public half and resolved signing algorithm.
#[derive(Clone, Debug)]
pub struct DpopKeyPair {
    private: PrivateKey,
    public: PublicKey,
    alg: Algorithm,
}

impl DpopKeyPair {
    /// Pair an explicitly supplied public key with a private key.
    pub fn new(private: PrivateKey, public: PublicKey) -> Result<Self> {
        if private.family() != public.family() {
            return Err(OAuthError::KeyTypeMismatch {
                private: private.family(),
                public: public.family(),
            });
        }
        if private.public_key().to_jwk() != public.to_jwk() {
            return Err(OAuthError::Key(
                "public key does not belong to the private key".into(),
            ));
        }
        let alg = public.algorithm()?;
        Ok(Self {
            private,
            public,
            alg,
        })
    }

    pub fn from_private(private: PrivateKey) -> Result<Self> {
        let public = private.public_key();
        Self::new(private, public)
    }

    /// Load from PEM files; without a public key file the public half is
    /// derived from the private key.
    pub fn load(private_path: impl AsRef<Path>, public_path: Option<&Path>) -> Result<Self> {
        let private = PrivateKey::from_pem_file(private_path)?;
        match public_path {
            Some(path) => Self::new(private, PublicKey::from_pem_file(path)?),
            None => Self::from_private(private),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.alg
    }

    pub fn family(&self) -> KeyFamily {
        self.public.family()
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn public_jwk(&self) -> Jwk {
        self.public.to_jwk()
    }

    /// RFC 7638 JWK thumbprint (SHA-256, base64url).
    pub fn thumbprint(&self) -> SmolStr {
        self.public_jwk().thumbprint()
    }

    pub(crate) fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        self.private.sign(self.alg, message)
    }
}

fn b64(bytes: &[u8]) -> SmolStr {
    URL_SAFE_NO_PAD.encode(bytes).into()
}

fn ec_jwk(
    crv: &'static str,
    bits: usize,
    x: Option<&[u8]>,
    y: Option<&[u8]>,
) -> Jwk {
    let size = bits.div_ceil(8);
    Jwk::Ec {
        crv: crv.into(),
        x: b64(&pad_left(x.unwrap_or_default(), size)),
        y: b64(&pad_left(y.unwrap_or_default(), size)),
    }
}

/// Left-pad a big-endian integer to `size` bytes.
pub(crate) fn pad_left(bytes: &[u8], size: usize) -> Vec<u8> {
    if bytes.len() >= size {
        return bytes.to_vec();
    }
    let mut out = vec![0u8; size - bytes.len()];
    out.extend_from_slice(bytes);
    out
}

fn pem_label(pem: &str) -> Result<&str> {
    pem.lines()
        .map(str::trim)
        .find_map(|line| {
            line.strip_prefix("-----BEGIN ")
                .and_then(|rest| rest.strip_suffix("-----"))
        })
        .ok_or_else(|| OAuthError::Key("no PEM block found".into()))
}

fn read_pem(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| OAuthError::Key(format_smolstr!("{}: {e}", path.display())))
}
