//! RSASSA-PKCS1-v1_5 with SHA-256, used for token acquisition and
//! asymmetrically signed provider requests.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use checkout_types::GatewayError;

/// Holds a parsed private key. Construction fails loudly so a gateway with a
/// bad key is never registered.
#[derive(Clone)]
pub struct RsaSigner {
    gateway: String,
    key: SigningKey<Sha256>,
}

impl std::fmt::Debug for RsaSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaSigner")
            .field("gateway", &self.gateway)
            .finish_non_exhaustive()
    }
}

impl RsaSigner {
    /// Parses a PEM private key, PKCS#8 first, then PKCS#1.
    pub fn from_pem(gateway: &str, pem: &str) -> Result<Self, GatewayError> {
        let pem = pem.trim();
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| GatewayError::config(gateway, format!("invalid RSA private key: {}", e)))?;
        Ok(Self {
            gateway: gateway.to_string(),
            key: SigningKey::<Sha256>::new(key),
        })
    }

    pub fn from_file(gateway: &str, path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(
                gateway,
                format!("cannot read private key {}: {}", path.display(), e),
            )
        })?;
        Self::from_pem(gateway, &pem)
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, GatewayError> {
        let signature = self
            .key
            .try_sign(message)
            .map_err(|e| GatewayError::signing(&self.gateway, e))?;
        Ok(signature.to_vec())
    }

    /// base64(RSASSA-PKCS1-v1_5-SHA256(message)).
    pub fn sign_b64(&self, message: &str) -> Result<String, GatewayError> {
        Ok(BASE64.encode(self.sign(message.as_bytes())?))
    }
}

/// Public-key half, for verifying provider callbacks signed with the
/// provider's private key.
#[derive(Clone)]
pub struct RsaVerifier {
    key: VerifyingKey<Sha256>,
}

impl std::fmt::Debug for RsaVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaVerifier").finish_non_exhaustive()
    }
}

impl RsaVerifier {
    pub fn from_pem(gateway: &str, pem: &str) -> Result<Self, GatewayError> {
        let pem = pem.trim();
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| GatewayError::config(gateway, format!("invalid RSA public key: {}", e)))?;
        Ok(Self {
            key: VerifyingKey::<Sha256>::new(key),
        })
    }

    pub fn from_file(gateway: &str, path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(
                gateway,
                format!("cannot read public key {}: {}", path.display(), e),
            )
        })?;
        Self::from_pem(gateway, &pem)
    }

    /// Verifies a base64 signature. Any decoding or verification failure is
    /// reported the same way.
    pub fn verify_b64(&self, message: &str, signature_b64: &str) -> bool {
        let Ok(raw) = BASE64.decode(signature_b64.trim()) else {
            return false;
        };
        let Ok(signature) = Signature::try_from(raw.as_slice()) else {
            return false;
        };
        self.key.verify(message.as_bytes(), &signature).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PKCS8: &str = include_str!("../../testdata/test_private_pkcs8.pem");
    const PKCS1: &str = include_str!("../../testdata/test_private_pkcs1.pem");
    const PUBLIC: &str = include_str!("../../testdata/test_public.pem");

    const MESSAGE: &str = "CLIENT-123|2025-03-01T10:00:00.000+07:00";
    // openssl dgst -sha256 -sign test_private_pkcs8.pem | base64
    const EXPECTED: &str = "HM3buNvLbeLZbD20kAS3f7BrBgSoQ8Cp16RyfEn1LNAjRCErWN4avHsF+H3g4xpRjhJWYo7Hj6lZhLfRp3iQvLCZQrq8ltK32j0mjLBj944ofmUal3oEKe7LLySltAVmeGvlhjccMzV6CiOt/MweERvol8fCwakoFbJppWgyHn7EBLB+et6at4reTbSqQ4FfDbiNOSub0+Pfs2euKWuVqcdTez6DXZnGLaFKc2HnRskxINEUK0OnaciycOnTa4bFr9DdZimrX5tMo5jcZ/OaC8kXNRJ7iN/35c4GLgjQLgYIIWdm4KkXjeoENyGl8LnyjtCXOUyOIdLvNGK/JcOqLg==";

    #[test]
    fn test_pkcs8_signature_matches_openssl() {
        let signer = RsaSigner::from_pem("BRI_DIRECT", PKCS8).unwrap();
        assert_eq!(signer.sign_b64(MESSAGE).unwrap(), EXPECTED);
    }

    #[test]
    fn test_pkcs1_fallback() {
        let signer = RsaSigner::from_pem("BRI_DIRECT", PKCS1).unwrap();
        assert_eq!(signer.sign_b64(MESSAGE).unwrap(), EXPECTED);
    }

    #[test]
    fn test_invalid_key_is_config_error() {
        let err = RsaSigner::from_pem("BRI_DIRECT", "not a key").unwrap_err();
        assert!(matches!(err, GatewayError::Config { .. }));
        let err = RsaSigner::from_file("BRI_DIRECT", "/nonexistent/key.pem").unwrap_err();
        assert!(matches!(err, GatewayError::Config { .. }));
    }

    #[test]
    fn test_verify_roundtrip() {
        let verifier = RsaVerifier::from_pem("DANA_DIRECT", PUBLIC).unwrap();
        assert!(verifier.verify_b64(MESSAGE, EXPECTED));
        assert!(!verifier.verify_b64("tampered", EXPECTED));
        assert!(!verifier.verify_b64(MESSAGE, "!!not-base64!!"));
    }
}
