//! HMAC request signing over the SNAP string-to-sign.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HmacAlgorithm {
    Sha256,
    Sha512,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureEncoding {
    /// Lowercase hex.
    Hex,
    Base64,
}

/// Removes insignificant whitespace from a JSON document without touching
/// key order or string contents. Input that is not valid JSON is returned
/// unchanged.
pub fn minify(body: &[u8]) -> Vec<u8> {
    if serde_json::from_slice::<serde::de::IgnoredAny>(body).is_err() {
        return body.to_vec();
    }
    let mut out = Vec::with_capacity(body.len());
    let mut in_string = false;
    let mut escaped = false;
    for &b in body {
        if in_string {
            out.push(b);
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b' ' | b'\t' | b'\n' | b'\r' => {}
            b'"' => {
                in_string = true;
                out.push(b);
            }
            _ => out.push(b),
        }
    }
    out
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn sha512_hex(data: &[u8]) -> String {
    hex::encode(Sha512::digest(data))
}

/// `lowerhex(sha256(minify(body)))`; an empty body gives an empty segment.
pub fn body_hash(body: &[u8]) -> String {
    if body.is_empty() {
        return String::new();
    }
    sha256_hex(&minify(body))
}

#[derive(Clone)]
enum Keyed {
    Sha256(Hmac<Sha256>),
    Sha512(Hmac<Sha512>),
}

/// Keyed HMAC signer. The key is bound once at construction and never
/// appears in `Debug` output.
#[derive(Clone)]
pub struct SymmetricSigner {
    keyed: Keyed,
    encoding: SignatureEncoding,
}

impl std::fmt::Debug for SymmetricSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricSigner")
            .field("algorithm", &self.algorithm())
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

impl SymmetricSigner {
    pub fn new(
        algorithm: HmacAlgorithm,
        encoding: SignatureEncoding,
        secret: impl AsRef<[u8]>,
    ) -> Result<Self, InvalidLength> {
        let secret = secret.as_ref();
        let keyed = match algorithm {
            HmacAlgorithm::Sha256 => Keyed::Sha256(<Hmac<Sha256> as Mac>::new_from_slice(secret)?),
            HmacAlgorithm::Sha512 => Keyed::Sha512(<Hmac<Sha512> as Mac>::new_from_slice(secret)?),
        };
        Ok(Self { keyed, encoding })
    }

    pub fn sha512_base64(secret: impl AsRef<[u8]>) -> Result<Self, InvalidLength> {
        Self::new(HmacAlgorithm::Sha512, SignatureEncoding::Base64, secret)
    }

    pub fn sha256_hex(secret: impl AsRef<[u8]>) -> Result<Self, InvalidLength> {
        Self::new(HmacAlgorithm::Sha256, SignatureEncoding::Hex, secret)
    }

    pub fn algorithm(&self) -> HmacAlgorithm {
        match self.keyed {
            Keyed::Sha256(_) => HmacAlgorithm::Sha256,
            Keyed::Sha512(_) => HmacAlgorithm::Sha512,
        }
    }

    /// `METHOD:PATH:TOKEN:bodyhash:TIMESTAMP`, or `METHOD:PATH:bodyhash:TIMESTAMP`
    /// for schemes that carry no token.
    pub fn string_to_sign(
        method: &str,
        path: &str,
        token: Option<&str>,
        body: &[u8],
        timestamp: &str,
    ) -> String {
        let hash = body_hash(body);
        match token {
            Some(token) => format!("{}:{}:{}:{}:{}", method, path, token, hash, timestamp),
            None => format!("{}:{}:{}:{}", method, path, hash, timestamp),
        }
    }

    pub fn mac(&self, message: &[u8]) -> Vec<u8> {
        match &self.keyed {
            Keyed::Sha256(keyed) => {
                let mut mac = keyed.clone();
                mac.update(message);
                mac.finalize().into_bytes().to_vec()
            }
            Keyed::Sha512(keyed) => {
                let mut mac = keyed.clone();
                mac.update(message);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }

    pub fn sign(&self, message: &str) -> String {
        let raw = self.mac(message.as_bytes());
        match self.encoding {
            SignatureEncoding::Hex => hex::encode(raw),
            SignatureEncoding::Base64 => BASE64.encode(raw),
        }
    }

    pub fn sign_request(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: &[u8],
        timestamp: &str,
    ) -> String {
        self.sign(&Self::string_to_sign(method, path, token, body, timestamp))
    }

    /// Constant-time comparison against a signature received from a provider.
    pub fn verify(&self, message: &str, signature: &str) -> bool {
        super::verify::constant_time_eq(self.sign(message).as_bytes(), signature.trim().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minify_preserves_key_order_and_strings() {
        let body = br#"{ "zeta" : 1,
            "alpha": { "b": "x y", "a": [1, 2] },
            "q": "say \"hi \" there" }"#;
        let out = String::from_utf8(minify(body)).unwrap();
        assert_eq!(
            out,
            r#"{"zeta":1,"alpha":{"b":"x y","a":[1,2]},"q":"say \"hi \" there"}"#
        );
    }

    #[test]
    fn test_minify_leaves_invalid_json() {
        assert_eq!(minify(b"not json  here"), b"not json  here".to_vec());
    }

    #[test]
    fn test_body_hash_is_whitespace_insensitive() {
        let pretty = b"{\n  \"a\": 1,\n  \"b\": \"c\"\n}";
        let compact = br#"{"a":1,"b":"c"}"#;
        assert_eq!(body_hash(pretty), body_hash(compact));
        assert_eq!(body_hash(compact), sha256_hex(compact));
        assert_eq!(body_hash(b""), "");
    }

    #[test]
    fn test_string_to_sign_layout() {
        let body = br#"{"a":1}"#;
        let hash = sha256_hex(body);
        assert_eq!(
            SymmetricSigner::string_to_sign("POST", "/snap/v1.0/x", Some("tok"), body, "TS"),
            format!("POST:/snap/v1.0/x:tok:{}:TS", hash)
        );
        assert_eq!(
            SymmetricSigner::string_to_sign("POST", "/cb", None, body, "TS"),
            format!("POST:/cb:{}:TS", hash)
        );
    }

    #[test]
    fn test_known_hmac_vectors() {
        // RFC 4231 test case 2
        let sha256 = SymmetricSigner::sha256_hex("Jefe").unwrap();
        assert_eq!(
            sha256.sign("what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
        let sha512 = SymmetricSigner::new(HmacAlgorithm::Sha512, SignatureEncoding::Hex, "Jefe").unwrap();
        assert_eq!(
            sha512.sign("what do ya want for nothing?"),
            "164b7a7bfcf819e2e395fbe73b56e0a387bd64222e831fd610270cd7ea2505549758bf75c05a994a6d034f65f8f0e6fdcaeab1a34d4a6b4b636e070a38bce737"
        );
    }

    #[test]
    fn test_verify() {
        let signer = SymmetricSigner::sha512_base64("secret").unwrap();
        let sig = signer.sign("payload");
        assert!(signer.verify("payload", &sig));
        assert!(!signer.verify("payload", "AAAA"));
        assert!(!signer.verify("other", &sig));
    }

    #[test]
    fn test_signer_reuses_bound_key() {
        let signer = SymmetricSigner::sha256_hex("").unwrap();
        assert_eq!(signer.algorithm(), HmacAlgorithm::Sha256);
        assert_eq!(signer.sign("a"), signer.sign("a"));
        assert_ne!(signer.sign("a"), signer.sign("b"));
        assert!(!format!("{:?}", signer).contains("Keyed"));
    }
}
