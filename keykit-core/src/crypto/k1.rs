//! secp256k1 provider with `EOS` public keys and base58check WIF.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256, Sha512};

use super::{CryptoError, CryptoResult, EccProvider, PrivateKey};

/// Version byte of a mainnet WIF private key.
const WIF_VERSION: u8 = 0x80;

/// Prefix of legacy public key strings.
const PUBKEY_PREFIX: &str = "EOS";

const CHECKSUM_LEN: usize = 4;
const COMPRESSED_POINT_LEN: usize = 33;
const SIGNATURE_LEN: usize = 65;

/// Header offset of a compact signature over a compressed public key.
const SIGNATURE_HEADER: u8 = 27 + 4;

/// secp256k1 provider compatible with the legacy key formats:
///
/// ```text
/// wif       = base58(0x80 || key || sha256(sha256(0x80 || key))[..4])
/// pubkey    = "EOS" || base58(point || ripemd160(point)[..4])
/// child     = sha256(parent || label)
/// signature = hex(header || r || s), signed over sha256(message)
/// shared    = sha512(x(key * pubkey))
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct K1Provider;

impl K1Provider {
    /// Creates the provider.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn secret_key(key: &PrivateKey) -> CryptoResult<SecretKey> {
        SecretKey::from_slice(key.as_bytes())
            .map_err(|_| CryptoError::InvalidPrivateKey("scalar out of range".to_string()))
    }

    fn encode_public(public: &PublicKey) -> String {
        let point = public.to_encoded_point(true);
        let point = point.as_bytes();
        let checksum = Ripemd160::digest(point);

        let mut payload = Vec::with_capacity(point.len() + CHECKSUM_LEN);
        payload.extend_from_slice(point);
        payload.extend_from_slice(&checksum[..CHECKSUM_LEN]);
        format!("{PUBKEY_PREFIX}{}", bs58::encode(payload).into_string())
    }

    fn decode_public(pubkey: &str) -> CryptoResult<PublicKey> {
        let invalid = |reason: &str| CryptoError::InvalidPublicKey(reason.to_string());

        let encoded = pubkey
            .strip_prefix(PUBKEY_PREFIX)
            .ok_or_else(|| invalid("missing prefix"))?;
        let payload = bs58::decode(encoded)
            .into_vec()
            .map_err(|err| CryptoError::InvalidPublicKey(err.to_string()))?;
        if payload.len() != COMPRESSED_POINT_LEN + CHECKSUM_LEN {
            return Err(invalid("length mismatch"));
        }
        let (point, checksum) = payload.split_at(COMPRESSED_POINT_LEN);
        if Ripemd160::digest(point)[..CHECKSUM_LEN] != *checksum {
            return Err(invalid("checksum mismatch"));
        }
        PublicKey::from_sec1_bytes(point).map_err(|_| invalid("not a curve point"))
    }
}

fn sha256d(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(bytes)).into()
}

impl EccProvider for K1Provider {
    fn random_key(&self) -> CryptoResult<PrivateKey> {
        let secret = SecretKey::random(&mut OsRng);
        Ok(PrivateKey::from_bytes(secret.to_bytes().into()))
    }

    fn child_key(&self, parent: &PrivateKey, label: &str) -> CryptoResult<PrivateKey> {
        let mut hasher = Sha256::new();
        hasher.update(parent.as_bytes());
        hasher.update(label.as_bytes());
        let child = PrivateKey::from_bytes(hasher.finalize().into());
        Self::secret_key(&child)?;
        Ok(child)
    }

    fn to_wif(&self, key: &PrivateKey) -> String {
        let mut payload = Vec::with_capacity(1 + 32 + CHECKSUM_LEN);
        payload.push(WIF_VERSION);
        payload.extend_from_slice(key.as_bytes());
        let checksum = sha256d(&payload);
        payload.extend_from_slice(&checksum[..CHECKSUM_LEN]);
        let wif = bs58::encode(&payload).into_string();
        zeroize::Zeroize::zeroize(&mut payload);
        wif
    }

    fn from_wif(&self, wif: &str) -> CryptoResult<PrivateKey> {
        let invalid = |reason: &str| CryptoError::InvalidWif(reason.to_string());

        let mut payload = bs58::decode(wif)
            .into_vec()
            .map_err(|err| CryptoError::InvalidWif(err.to_string()))?;
        if payload.len() != 1 + 32 + CHECKSUM_LEN {
            return Err(invalid("length mismatch"));
        }
        if payload[0] != WIF_VERSION {
            return Err(invalid("version mismatch"));
        }
        let (body, checksum) = payload.split_at(1 + 32);
        if sha256d(body)[..CHECKSUM_LEN] != *checksum {
            return Err(invalid("checksum mismatch"));
        }

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&body[1..]);
        zeroize::Zeroize::zeroize(&mut payload);
        let key = PrivateKey::from_bytes(bytes);
        Self::secret_key(&key)?;
        Ok(key)
    }

    fn to_public(&self, key: &PrivateKey) -> CryptoResult<String> {
        Ok(Self::encode_public(&Self::secret_key(key)?.public_key()))
    }

    fn sign(&self, message: &[u8], key: &PrivateKey) -> CryptoResult<String> {
        let signing_key = SigningKey::from(Self::secret_key(key)?);
        let digest = Sha256::digest(message);
        let (signature, recovery_id) = signing_key
            .sign_prehash_recoverable(&digest)
            .map_err(|err| CryptoError::Signing(err.to_string()))?;

        let mut encoded = Vec::with_capacity(SIGNATURE_LEN);
        encoded.push(SIGNATURE_HEADER + recovery_id.to_byte());
        encoded.extend_from_slice(&signature.to_bytes());
        Ok(hex::encode(encoded))
    }

    fn recover(&self, signature: &str, message: &[u8]) -> CryptoResult<String> {
        let invalid = |reason: &str| CryptoError::InvalidSignature(reason.to_string());

        let bytes = hex::decode(signature)
            .map_err(|err| CryptoError::InvalidSignature(err.to_string()))?;
        if bytes.len() != SIGNATURE_LEN {
            return Err(invalid("length mismatch"));
        }
        let recovery_id = bytes[0]
            .checked_sub(SIGNATURE_HEADER)
            .and_then(RecoveryId::from_byte)
            .ok_or_else(|| invalid("bad header"))?;
        let signature = Signature::from_slice(&bytes[1..]).map_err(|_| invalid("bad r or s"))?;

        let digest = Sha256::digest(message);
        let verifying_key = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
            .map_err(|_| invalid("recovery failed"))?;
        Ok(Self::encode_public(&PublicKey::from(&verifying_key)))
    }

    fn shared_secret(&self, key: &PrivateKey, pubkey: &str) -> CryptoResult<Vec<u8>> {
        let secret = Self::secret_key(key)?;
        let public = Self::decode_public(pubkey)?;
        let shared = k256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
        Ok(Sha512::digest(shared.raw_secret_bytes()).to_vec())
    }

    fn is_valid_pubkey(&self, pubkey: &str) -> bool {
        Self::decode_public(pubkey).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEV_WIF: &str = "5KQwrPbwdL6PhXujxW37FSSQZ1JiwsST4cqQzDeyXtP79zkvFD3";
    const DEV_PUBKEY: &str = "EOS6MRyAjQq8ud7hVNYcfnVPJqcVpscN5So8BhtHuGYqET5GDW5CV";

    #[test]
    fn test_known_wif_to_public() {
        let ecc = K1Provider::new();
        assert_eq!(ecc.public_from_wif(DEV_WIF).expect("pubkey"), DEV_PUBKEY);
        assert!(ecc.is_valid_pubkey(DEV_PUBKEY));
        assert!(!ecc.is_valid_pubkey(&DEV_PUBKEY[1..]));
    }

    #[test]
    fn test_wif_round_trip() {
        let ecc = K1Provider::new();
        let key = ecc.from_wif(DEV_WIF).expect("wif");
        assert_eq!(ecc.to_wif(&key), DEV_WIF);

        let random = ecc.random_key().expect("random");
        assert_eq!(ecc.from_wif(&ecc.to_wif(&random)).expect("wif"), random);
    }

    #[test]
    fn test_wif_checksum_rejected() {
        let ecc = K1Provider::new();
        assert!(!ecc.is_valid_wif(&DEV_WIF[1..]));
        let mut tampered = DEV_WIF.to_string();
        tampered.replace_range(10..11, if &DEV_WIF[10..11] == "a" { "b" } else { "a" });
        assert!(!ecc.is_valid_wif(&tampered));
        assert!(!ecc.is_valid_wif("not base58 0OIl"));
    }

    #[test]
    fn test_child_key_is_deterministic() {
        let ecc = K1Provider::new();
        let owner = ecc.from_wif(DEV_WIF).expect("wif");
        let first = ecc.child_key(&owner, "active").expect("child");
        let second = ecc.child_key(&owner, "active").expect("child");
        assert_eq!(
            ecc.to_public(&first).expect("pubkey"),
            ecc.to_public(&second).expect("pubkey")
        );
        let other = ecc.child_key(&owner, "other").expect("child");
        assert_ne!(first, other);
    }

    #[test]
    fn test_sign_and_recover() {
        let ecc = K1Provider::new();
        let key = ecc.from_wif(DEV_WIF).expect("wif");
        let signature = ecc.sign(b"hello", &key).expect("sign");
        assert_eq!(signature.len(), SIGNATURE_LEN * 2);
        assert_eq!(ecc.recover(&signature, b"hello").expect("recover"), DEV_PUBKEY);
        assert!(ecc
            .recover(&signature, b"other")
            .map_or(true, |pubkey| pubkey != DEV_PUBKEY));
    }

    #[test]
    fn test_shared_secret_is_symmetric() {
        let ecc = K1Provider::new();
        let alice = ecc.random_key().expect("random");
        let bob = ecc.random_key().expect("random");
        let alice_pub = ecc.to_public(&alice).expect("pubkey");
        let bob_pub = ecc.to_public(&bob).expect("pubkey");

        let ab = ecc.shared_secret(&alice, &bob_pub).expect("shared");
        let ba = ecc.shared_secret(&bob, &alice_pub).expect("shared");
        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 64);
    }
}
