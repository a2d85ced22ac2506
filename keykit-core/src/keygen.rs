//! Key derivation from a permission tree.
//!
//! An account's permissions form a tree (`owner` at the root, `active` below
//! it, custom permissions below those). Each node's path is its chain of
//! ancestor names, and each node's key can be derived from its parent's key
//! with the node name as the derivation label. Holding any ancestor key is
//! therefore enough to recreate every key below it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::{CryptoResult, EccProvider, PrivateKey};
use crate::error::{KeystoreError, KeystoreResult};
use crate::path::{KeyPath, ACTIVE, OWNER};
use crate::secret::{self, Classified, MASTER_PREFIX};

/// A weighted public key inside an [`Authority`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyWeight {
    /// Encoded public key.
    pub key: String,
    /// Weight towards the threshold.
    #[serde(default)]
    pub weight: u16,
}

/// An `actor@permission` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionLevel {
    /// Account name.
    pub actor: String,
    /// Permission name on that account.
    pub permission: String,
}

/// A weighted account permission inside an [`Authority`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionLevelWeight {
    /// The delegated permission.
    pub permission: PermissionLevel,
    /// Weight towards the threshold.
    #[serde(default)]
    pub weight: u16,
}

/// Keys and accounts that satisfy a permission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authority {
    /// Weight needed to satisfy the permission.
    #[serde(default)]
    pub threshold: u32,
    /// Weighted keys.
    #[serde(default)]
    pub keys: Vec<KeyWeight>,
    /// Weighted account permissions.
    #[serde(default)]
    pub accounts: Vec<PermissionLevelWeight>,
}

impl Authority {
    /// Authority satisfied by a single key.
    #[must_use]
    pub fn single_key(pubkey: impl Into<String>) -> Self {
        Self {
            threshold: 1,
            keys: vec![KeyWeight {
                key: pubkey.into(),
                weight: 1,
            }],
            accounts: Vec::new(),
        }
    }

    /// Returns `true` if `pubkey` is one of the authority's keys.
    #[must_use]
    pub fn contains_key(&self, pubkey: &str) -> bool {
        self.keys.iter().any(|weight| weight.key == pubkey)
    }
}

/// One node of an account's permission tree, in the ledger's wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionNode {
    /// Permission name.
    #[serde(alias = "perm_name")]
    pub name: String,
    /// Parent permission name; empty for the root.
    #[serde(default)]
    pub parent: String,
    /// Keys and accounts that satisfy this permission.
    #[serde(alias = "required_auth")]
    pub authority: Authority,
}

impl PermissionNode {
    /// Creates a node.
    #[must_use]
    pub fn new(name: impl Into<String>, parent: impl Into<String>, authority: Authority) -> Self {
        Self {
            name: name.into(),
            parent: parent.into(),
            authority,
        }
    }
}

/// Canonical path of every permission node, with its authority.
pub type AuthsByPath = BTreeMap<KeyPath, Authority>;

/// Maps every permission node to its canonical path.
///
/// A node's path is its ancestor names joined with `/` from the root down.
/// A parent that is not itself in the tree still contributes its name.
/// `owner/active` prefixes collapse to `active`.
///
/// # Errors
///
/// Returns [`KeystoreError::Shape`] if two nodes share a name or a parent
/// chain loops, and [`KeystoreError::Path`] if a node yields an invalid path.
pub fn auths_by_path(tree: &[PermissionNode]) -> KeystoreResult<AuthsByPath> {
    let mut by_name: HashMap<&str, &PermissionNode> = HashMap::with_capacity(tree.len());
    for node in tree {
        if by_name.insert(node.name.as_str(), node).is_some() {
            return Err(KeystoreError::Shape(format!(
                "duplicate permission '{}'",
                node.name
            )));
        }
    }

    let mut auths = AuthsByPath::new();
    for node in tree {
        let mut names = vec![node.name.as_str()];
        let mut visited = BTreeSet::from([node.name.as_str()]);
        let mut parent = node.parent.as_str();

        while !parent.is_empty() {
            if !visited.insert(parent) {
                return Err(KeystoreError::Shape(format!(
                    "permission '{parent}' is its own ancestor"
                )));
            }
            names.push(parent);
            parent = by_name.get(parent).map_or("", |next| next.parent.as_str());
        }

        names.reverse();
        let path = KeyPath::parse(&names.join("/"))?;
        auths.insert(path, node.authority.clone());
    }
    Ok(auths)
}

/// A key produced by [`derive_keys`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKey {
    /// Path of the derived key.
    pub path: KeyPath,
    /// The derived private key.
    pub private_key: PrivateKey,
}

/// Derives the key at `target` from the closest known ancestor.
///
/// Returns every intermediate key from just below that ancestor down to and
/// including `target`, or nothing if `target` is already known or has no
/// known ancestor. The most specific ancestor wins. `owner` counts as an
/// ancestor of `active` and everything below it.
///
/// # Errors
///
/// Returns an error if the provider cannot derive a child key.
pub fn derive_keys(
    ecc: &dyn EccProvider,
    target: &KeyPath,
    known: &BTreeMap<KeyPath, PrivateKey>,
) -> KeystoreResult<Vec<DerivedKey>> {
    if known.contains_key(target) {
        return Ok(Vec::new());
    }

    let closest = known
        .iter()
        .filter_map(|(path, key)| Some((path, key, target.segments_below(path)?)))
        .max_by_key(|(path, _, _)| path.depth());

    let implied_owner = || {
        let owner = KeyPath::owner();
        let key = known.get(&owner)?;
        target
            .is_active_rooted()
            .then(|| (owner, key, target.segments().collect::<Vec<_>>()))
    };

    let (mut path, mut key, segments) = match closest {
        Some((path, key, segments)) => (path.clone(), key.clone(), segments),
        None => match implied_owner() {
            Some((owner, key, segments)) => (owner, key.clone(), segments),
            None => return Ok(Vec::new()),
        },
    };

    let mut derived = Vec::with_capacity(segments.len());
    for segment in segments {
        key = ecc.child_key(&key, segment)?;
        path = path.child(segment)?;
        derived.push(DerivedKey {
            path: path.clone(),
            private_key: key.clone(),
        });
    }
    Ok(derived)
}

/// A pair of values for the two root roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleKeys {
    /// Value for `owner`.
    pub owner: String,
    /// Value for `active`.
    pub active: String,
}

/// A master secret with the keys it derives.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootKeyset {
    /// `PW` + WIF master secret.
    pub master_secret: String,
    /// Owner and active WIFs.
    pub private_keys: RoleKeys,
    /// Owner and active public keys.
    pub public_keys: RoleKeys,
}

impl fmt::Debug for RootKeyset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootKeyset")
            .field("master_secret", &"<redacted>")
            .field("private_keys", &"<redacted>")
            .field("public_keys", &self.public_keys)
            .finish()
    }
}

/// Derives `owner` from the master key and `active` from `owner`.
pub(crate) fn root_keys(
    ecc: &dyn EccProvider,
    master: &PrivateKey,
) -> CryptoResult<(PrivateKey, PrivateKey)> {
    let owner = ecc.child_key(master, OWNER)?;
    let active = ecc.child_key(&owner, ACTIVE)?;
    Ok((owner, active))
}

/// Generates (or re-creates) an account's root keys.
///
/// With `master_secret` set, the same keys are re-derived every time; without
/// it a fresh random master key is generated.
///
/// # Errors
///
/// Returns [`KeystoreError::InvalidSecret`] if `master_secret` is not a
/// master secret.
pub fn gen_root_keyset(
    ecc: &dyn EccProvider,
    master_secret: Option<&str>,
) -> KeystoreResult<RootKeyset> {
    let master = match master_secret {
        None => ecc.random_key()?,
        Some(text) => match secret::classify_str(ecc, text) {
            Classified::Master(master) => master,
            other => {
                return Err(KeystoreError::InvalidSecret(format!(
                    "expected a master secret, got {}",
                    other.kind()
                )))
            }
        },
    };

    let (owner, active) = root_keys(ecc, &master)?;
    Ok(RootKeyset {
        master_secret: format!("{MASTER_PREFIX}{}", ecc.to_wif(&master)),
        private_keys: RoleKeys {
            owner: ecc.to_wif(&owner),
            active: ecc.to_wif(&active),
        },
        public_keys: RoleKeys {
            owner: ecc.to_public(&owner)?,
            active: ecc.to_public(&active)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::K1Provider;

    const MASTER: &str = "PW5JMx76CTUTXxpAbwAqGMMVzSeJaP5UVTT5c2uobcpaMUdLAphSp";
    const PUBKEY: &str = "EOS78Cs5HPKY7HKHrSMnR76uj7yeajPuNwSH1Fsria3sJuufwE3Zd";

    fn path(value: &str) -> KeyPath {
        KeyPath::parse(value).expect("path")
    }

    fn account_tree() -> Vec<PermissionNode> {
        vec![
            PermissionNode::new("active", "owner", Authority::single_key(PUBKEY)),
            PermissionNode::new("mypermission", "active", Authority::single_key(PUBKEY)),
            PermissionNode::new("owner", "", Authority::single_key(PUBKEY)),
        ]
    }

    #[test]
    fn test_auths_by_path() {
        let auths = auths_by_path(&account_tree()).expect("auths");
        let paths: Vec<&str> = auths.keys().map(KeyPath::as_str).collect();
        assert_eq!(paths, vec!["active", "active/mypermission", "owner"]);
        assert!(auths[&path("owner")].contains_key(PUBKEY));
    }

    #[test]
    fn test_auths_by_path_wire_shape() {
        let json = r#"[
            {"perm_name": "owner", "parent": "", "required_auth": {"threshold": 1, "keys": [], "accounts": []}},
            {"perm_name": "active", "parent": "owner", "required_auth": {"threshold": 1,
                "keys": [{"key": "EOS78Cs5HPKY7HKHrSMnR76uj7yeajPuNwSH1Fsria3sJuufwE3Zd", "weight": 1}],
                "accounts": [{"permission": {"actor": "bob", "permission": "active"}, "weight": 1}]}}
        ]"#;
        let tree: Vec<PermissionNode> = serde_json::from_str(json).expect("tree");
        let auths = auths_by_path(&tree).expect("auths");
        assert_eq!(auths.len(), 2);
        assert_eq!(auths[&KeyPath::active()].accounts[0].permission.actor, "bob");
    }

    #[test]
    fn test_missing_parent_contributes_its_name() {
        let tree = vec![PermissionNode::new("child", "detached", Authority::default())];
        let auths = auths_by_path(&tree).expect("auths");
        assert!(auths.contains_key(&path("detached/child")));
    }

    #[test]
    fn test_shape_errors() {
        let cycle = vec![
            PermissionNode::new("a", "b", Authority::default()),
            PermissionNode::new("b", "a", Authority::default()),
        ];
        assert!(matches!(auths_by_path(&cycle), Err(KeystoreError::Shape(_))));

        let own_parent = vec![PermissionNode::new("a", "a", Authority::default())];
        assert!(matches!(auths_by_path(&own_parent), Err(KeystoreError::Shape(_))));

        let duplicate = vec![
            PermissionNode::new("owner", "", Authority::default()),
            PermissionNode::new("owner", "", Authority::default()),
        ];
        assert!(matches!(auths_by_path(&duplicate), Err(KeystoreError::Shape(_))));
    }

    #[test]
    fn test_derive_keys_from_closest_ancestor() {
        let ecc = K1Provider::new();
        let owner = ecc.random_key().expect("random");
        let active = ecc.child_key(&owner, "active").expect("child");

        let mut known = BTreeMap::new();
        known.insert(KeyPath::owner(), owner.clone());
        known.insert(KeyPath::active(), active.clone());

        let derived = derive_keys(&ecc, &path("active/a/b"), &known).expect("derive");
        let paths: Vec<&str> = derived.iter().map(|key| key.path.as_str()).collect();
        assert_eq!(paths, vec!["active/a", "active/a/b"]);

        let a = ecc.child_key(&active, "a").expect("child");
        let b = ecc.child_key(&a, "b").expect("child");
        assert_eq!(derived[1].private_key, b);

        assert!(derive_keys(&ecc, &KeyPath::active(), &known).expect("derive").is_empty());
        assert!(derive_keys(&ecc, &path("active2"), &known).expect("derive").is_empty());
    }

    #[test]
    fn test_derive_keys_is_deterministic() {
        let ecc = K1Provider::new();
        let mut known = BTreeMap::new();
        known.insert(KeyPath::owner(), ecc.random_key().expect("random"));

        let first = derive_keys(&ecc, &path("active/x"), &known).expect("derive");
        let second = derive_keys(&ecc, &path("active/x"), &known).expect("derive");
        assert_eq!(first, second);

        let paths: Vec<&str> = first.iter().map(|key| key.path.as_str()).collect();
        assert_eq!(paths, vec!["active", "active/x"]);
        let active = ecc.child_key(&known[&KeyPath::owner()], "active").expect("child");
        assert_eq!(first[0].private_key, active);
    }

    #[test]
    fn test_gen_root_keyset() {
        let ecc = K1Provider::new();
        let keyset = gen_root_keyset(&ecc, Some(MASTER)).expect("keyset");
        assert_eq!(keyset.master_secret, MASTER);
        assert_eq!(
            ecc.public_from_wif(&keyset.private_keys.active).expect("public"),
            keyset.public_keys.active
        );
        assert_eq!(keyset, gen_root_keyset(&ecc, Some(MASTER)).expect("keyset"));

        let fresh = gen_root_keyset(&ecc, None).expect("keyset");
        assert!(secret::is_master_secret(&ecc, &fresh.master_secret));
        assert_ne!(fresh.master_secret, MASTER);
        assert!(!format!("{fresh:?}").contains(&fresh.private_keys.owner));

        let wif = &MASTER[MASTER_PREFIX.len()..];
        assert!(matches!(
            gen_root_keyset(&ecc, Some(wif)),
            Err(KeystoreError::InvalidSecret(_))
        ));
    }
}
