//! Signing and sealing primitives shared by both transports.
//!
//! HMAC-SHA256 signs the semantic payload (before compression and
//! encryption). RSA-OAEP with SHA-256 seals the transport body; long
//! payloads are split into blocks that each fit one OAEP operation.

use crate::error::{Classify, ErrorKind};
use hmac::{Hmac, Mac};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

/// HTTP header carrying the signature.
pub const HASH_HEADER: &str = "HashSHA256";

/// gRPC metadata key carrying the signature.
pub const HASH_METADATA: &str = "hashsha256";

/// Header that lets a client opt out of request verification.
pub const HASH_BYPASS_HEADER: &str = "Hash";

/// SHA-256 output length, used for the OAEP overhead.
const SHA256_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("signature is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("refusing to encrypt an empty payload")]
    EmptyPayload,

    #[error("ciphertext length {len} is not a multiple of the key size {block}")]
    BadCiphertext { len: usize, block: usize },

    #[error("rsa: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("cannot read key file {path}: {source}")]
    KeyFile {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse key {path}: {reason}")]
    KeyParse { path: String, reason: String },
}

impl Classify for CryptoError {
    fn kind(&self) -> ErrorKind {
        match self {
            CryptoError::InvalidHex(_) | CryptoError::EmptyPayload => ErrorKind::InputInvalid,
            CryptoError::SignatureMismatch => ErrorKind::SignatureMismatch,
            CryptoError::KeyFile { source, .. } => ErrorKind::from_io(source),
            CryptoError::BadCiphertext { .. } | CryptoError::Rsa(_) | CryptoError::KeyParse { .. } => {
                ErrorKind::Internal
            }
        }
    }
}

fn mac_for(key: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC can take key of any size")
}

/// Computes the hex HMAC-SHA256 of `payload`. An empty key disables signing
/// and yields `None`.
///
/// # Examples
///
/// ```
/// use pulsemon_common::crypto::{sign, verify};
///
/// let hash = sign(b"payload", "secret").unwrap();
/// assert!(verify(b"payload", &hash, "secret").is_ok());
/// assert!(sign(b"payload", "").is_none());
/// ```
pub fn sign(payload: &[u8], key: &str) -> Option<String> {
    if key.is_empty() {
        return None;
    }
    let mut mac = mac_for(key);
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Checks `expected_hex` against the HMAC of `payload` in constant time.
/// With an empty key verification is skipped.
pub fn verify(payload: &[u8], expected_hex: &str, key: &str) -> Result<(), CryptoError> {
    if key.is_empty() {
        return Ok(());
    }
    let expected = hex::decode(expected_hex.trim())?;
    let mut mac = mac_for(key);
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| CryptoError::SignatureMismatch)
}

fn block_limit(key: &RsaPublicKey) -> usize {
    key.size().saturating_sub(2 * SHA256_LEN + 2)
}

/// Seals `payload` with RSA-OAEP(SHA-256).
pub fn encrypt(payload: &[u8], key: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
    if payload.is_empty() {
        return Err(CryptoError::EmptyPayload);
    }
    let limit = block_limit(key);
    if limit == 0 {
        return Err(CryptoError::Rsa(rsa::Error::MessageTooLong));
    }
    let mut rng = rand::thread_rng();
    let mut out = Vec::with_capacity(payload.len().div_ceil(limit) * key.size());
    for chunk in payload.chunks(limit) {
        out.extend(key.encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)?);
    }
    Ok(out)
}

/// Opens a payload produced by [`encrypt`].
pub fn decrypt(ciphertext: &[u8], key: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError> {
    let block = key.size();
    if ciphertext.is_empty() || ciphertext.len() % block != 0 {
        return Err(CryptoError::BadCiphertext {
            len: ciphertext.len(),
            block,
        });
    }
    let mut out = Vec::with_capacity(ciphertext.len());
    for chunk in ciphertext.chunks(block) {
        out.extend(key.decrypt(Oaep::new::<Sha256>(), chunk)?);
    }
    Ok(out)
}

fn read_pem(path: &Path) -> Result<String, CryptoError> {
    std::fs::read_to_string(path).map_err(|source| CryptoError::KeyFile {
        path: path.display().to_string(),
        source,
    })
}

/// Loads a public key from a PEM file (SPKI or PKCS#1).
pub fn load_public_key(path: &Path) -> Result<RsaPublicKey, CryptoError> {
    let pem = read_pem(path)?;
    RsaPublicKey::from_public_key_pem(&pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(&pem))
        .map_err(|e| CryptoError::KeyParse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

/// Loads a private key from a PEM file (PKCS#8 or PKCS#1).
pub fn load_private_key(path: &Path) -> Result<RsaPrivateKey, CryptoError> {
    let pem = read_pem(path)?;
    RsaPrivateKey::from_pkcs8_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&pem))
        .map_err(|e| CryptoError::KeyParse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

/// Loads an optional public key; `None` keeps encryption off.
pub fn load_optional_public_key(path: Option<&Path>) -> Result<Option<RsaPublicKey>, CryptoError> {
    path.map(load_public_key).transpose()
}

/// Loads an optional private key; `None` keeps decryption off.
pub fn load_optional_private_key(
    path: Option<&Path>,
) -> Result<Option<RsaPrivateKey>, CryptoError> {
    path.map(load_private_key).transpose()
}

pub fn generate_key_pair(bits: usize) -> Result<(RsaPrivateKey, RsaPublicKey), CryptoError> {
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), bits)?;
    let public = RsaPublicKey::from(&private);
    Ok((private, public))
}

/// Writes `private.pem` (PKCS#8) and `public.pem` (SPKI) into `dir`.
pub fn write_key_pair(
    dir: &Path,
    private: &RsaPrivateKey,
    public: &RsaPublicKey,
) -> Result<(), CryptoError> {
    let encode_err = |reason: String| CryptoError::KeyParse {
        path: dir.display().to_string(),
        reason,
    };
    let private_pem = private
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| encode_err(e.to_string()))?;
    let public_pem = public
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| encode_err(e.to_string()))?;

    let write = |name: &str, body: &str| {
        let path = dir.join(name);
        std::fs::write(&path, body).map_err(|source| CryptoError::KeyFile {
            path: path.display().to_string(),
            source,
        })
    };
    write("private.pem", private_pem.as_str())?;
    write("public.pem", &public_pem)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::OnceLock;

    fn test_keys() -> &'static (RsaPrivateKey, RsaPublicKey) {
        static KEYS: OnceLock<(RsaPrivateKey, RsaPublicKey)> = OnceLock::new();
        KEYS.get_or_init(|| generate_key_pair(1024).unwrap())
    }

    #[test]
    fn known_hmac_vector() {
        // RFC 4231 test case 2.
        let hash = sign(b"what do ya want for nothing?", "Jefe").unwrap();
        assert_eq!(
            hash,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn verify_rejects_non_hex() {
        let err = verify(b"x", "zz-not-hex", "k").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputInvalid);
    }

    #[test]
    fn verify_skipped_without_key() {
        assert!(verify(b"x", "whatever", "").is_ok());
    }

    #[test]
    fn encrypt_rejects_empty_payload() {
        let (_, public) = test_keys();
        let err = encrypt(b"", public).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputInvalid);
    }

    #[test]
    fn long_payload_spans_several_blocks() {
        let (private, public) = test_keys();
        let payload = vec![7u8; 1000];
        let sealed = encrypt(&payload, public).unwrap();
        assert_eq!(sealed.len() % public.size(), 0);
        assert!(sealed.len() > public.size());
        assert_eq!(decrypt(&sealed, private).unwrap(), payload);
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let (private, public) = test_keys();
        let mut sealed = encrypt(b"hello", public).unwrap();
        sealed.pop();
        assert!(matches!(
            decrypt(&sealed, private),
            Err(CryptoError::BadCiphertext { .. })
        ));
    }

    #[test]
    fn key_pair_survives_pem_files() {
        let dir = tempfile::tempdir().unwrap();
        let (private, public) = test_keys();
        write_key_pair(dir.path(), private, public).unwrap();

        let loaded_public = load_public_key(&dir.path().join("public.pem")).unwrap();
        let loaded_private = load_private_key(&dir.path().join("private.pem")).unwrap();
        let sealed = encrypt(b"metrics", &loaded_public).unwrap();
        assert_eq!(decrypt(&sealed, &loaded_private).unwrap(), b"metrics");
    }

    #[test]
    fn missing_key_path_means_feature_off() {
        assert!(load_optional_public_key(None).unwrap().is_none());
        let err = load_public_key(Path::new("/nonexistent/public.pem")).unwrap_err();
        assert!(matches!(err, CryptoError::KeyFile { .. }));
    }

    #[test]
    fn garbage_pem_fails_to_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.pem");
        std::fs::write(&path, "not a key").unwrap();
        assert!(matches!(
            load_private_key(&path),
            Err(CryptoError::KeyParse { .. })
        ));
    }

    proptest! {
        #[test]
        fn hmac_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..512),
                           key in "[a-z]{1,16}", other in "[A-Z]{1,16}") {
            let hash = sign(&payload, &key).unwrap();
            prop_assert!(verify(&payload, &hash, &key).is_ok());
            let foreign = sign(&payload, &other).unwrap();
            prop_assert!(matches!(verify(&payload, &foreign, &key), Err(CryptoError::SignatureMismatch)));
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]
        #[test]
        fn rsa_round_trip(payload in proptest::collection::vec(any::<u8>(), 1..400)) {
            let (private, public) = test_keys();
            let sealed = encrypt(&payload, public).unwrap();
            prop_assert_eq!(decrypt(&sealed, private).unwrap(), payload);
        }
    }
}
