//! Structural classification of key material.

use std::fmt;

use strum::{AsRefStr, Display};

use crate::crypto::{EccProvider, PrivateKey};

/// Tag that marks a WIF as a master secret: `PW` followed by the WIF.
pub const MASTER_PREFIX: &str = "PW";

/// Key material handed to the key store: either a string (master secret, WIF
/// or public key) or an already decoded private key.
#[derive(Clone)]
pub enum KeyInput {
    /// Encoded key material.
    Text(String),
    /// A decoded private key.
    Private(PrivateKey),
}

impl fmt::Debug for KeyInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(_) => f.write_str("Text(<redacted>)"),
            Self::Private(key) => f.debug_tuple("Private").field(key).finish(),
        }
    }
}

impl From<&str> for KeyInput {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for KeyInput {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<PrivateKey> for KeyInput {
    fn from(value: PrivateKey) -> Self {
        Self::Private(value)
    }
}

impl From<&PrivateKey> for KeyInput {
    fn from(value: &PrivateKey) -> Self {
        Self::Private(value.clone())
    }
}

/// The role a piece of key material can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SecretKind {
    /// `PW` + WIF root secret.
    Master,
    /// WIF encoded private key.
    Wif,
    /// Decoded private key.
    RawPrivate,
    /// Encoded public key.
    Pubkey,
    /// Anything else.
    Unknown,
}

/// Key material after classification, carrying the decoded value.
#[derive(Debug, Clone)]
pub enum Classified {
    /// Root secret; holds the decoded root key (without the `PW` tag).
    Master(PrivateKey),
    /// WIF string, decoded.
    Wif(PrivateKey),
    /// Decoded private key.
    RawPrivate(PrivateKey),
    /// Public key string.
    Pubkey(String),
    /// Unrecognized input.
    Unknown,
}

impl Classified {
    /// The tag of this classification.
    #[must_use]
    pub const fn kind(&self) -> SecretKind {
        match self {
            Self::Master(_) => SecretKind::Master,
            Self::Wif(_) => SecretKind::Wif,
            Self::RawPrivate(_) => SecretKind::RawPrivate,
            Self::Pubkey(_) => SecretKind::Pubkey,
            Self::Unknown => SecretKind::Unknown,
        }
    }
}

/// Classifies key material by structure. Never fails; unmatched input is
/// [`Classified::Unknown`].
#[must_use]
pub fn classify(ecc: &dyn EccProvider, input: &KeyInput) -> Classified {
    match input {
        KeyInput::Private(key) => {
            if ecc.to_public(key).is_ok() {
                Classified::RawPrivate(key.clone())
            } else {
                Classified::Unknown
            }
        }
        KeyInput::Text(text) => classify_str(ecc, text),
    }
}

/// Classifies an encoded key string.
#[must_use]
pub fn classify_str(ecc: &dyn EccProvider, text: &str) -> Classified {
    if let Some(root) = text
        .strip_prefix(MASTER_PREFIX)
        .and_then(|wif| ecc.from_wif(wif).ok())
    {
        return Classified::Master(root);
    }
    if let Ok(key) = ecc.from_wif(text) {
        return Classified::Wif(key);
    }
    if ecc.is_valid_pubkey(text) {
        return Classified::Pubkey(text.to_string());
    }
    Classified::Unknown
}

/// Returns `true` if `text` is a master secret.
#[must_use]
pub fn is_master_secret(ecc: &dyn EccProvider, text: &str) -> bool {
    matches!(classify_str(ecc, text), Classified::Master(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::K1Provider;

    const MASTER: &str = "PW5JMx76CTUTXxpAbwAqGMMVzSeJaP5UVTT5c2uobcpaMUdLAphSp";
    const PUBKEY: &str = "EOS6MRyAjQq8ud7hVNYcfnVPJqcVpscN5So8BhtHuGYqET5GDW5CV";

    #[test]
    fn test_classify_strings() {
        let ecc = K1Provider::new();
        let wif = &MASTER[MASTER_PREFIX.len()..];

        assert_eq!(classify_str(&ecc, PUBKEY).kind(), SecretKind::Pubkey);
        assert_eq!(classify_str(&ecc, MASTER).kind(), SecretKind::Master);
        assert_eq!(classify_str(&ecc, wif).kind(), SecretKind::Wif);
        assert_eq!(classify_str(&ecc, &wif[1..]).kind(), SecretKind::Unknown);
        assert_eq!(classify_str(&ecc, "").kind(), SecretKind::Unknown);
        assert_eq!(classify_str(&ecc, "PW").kind(), SecretKind::Unknown);
        assert!(is_master_secret(&ecc, MASTER));
        assert!(!is_master_secret(&ecc, wif));
    }

    #[test]
    fn test_classify_private_key() {
        let ecc = K1Provider::new();
        let key = ecc.random_key().expect("random");
        assert_eq!(classify(&ecc, &KeyInput::from(&key)).kind(), SecretKind::RawPrivate);

        let out_of_range = PrivateKey::from_bytes([0u8; 32]);
        assert_eq!(classify(&ecc, &out_of_range.into()).kind(), SecretKind::Unknown);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(SecretKind::RawPrivate.to_string(), "raw_private");
        assert_eq!(SecretKind::Master.as_ref(), "master");
    }
}
