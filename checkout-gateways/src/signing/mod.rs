//! Reusable signing primitives shared by the provider clients.

pub mod asymmetric;
pub mod symmetric;
pub mod timestamp;
pub mod token;
pub mod verify;

pub use asymmetric::{RsaSigner, RsaVerifier};
pub use symmetric::{HmacAlgorithm, SignatureEncoding, SymmetricSigner, body_hash, minify};
pub use timestamp::{iso_wib, midtrans_wib, snap_timestamp};
pub use token::{AccessToken, TokenCache};
pub use verify::{constant_time_eq, verify_digest_hex, verify_token};
