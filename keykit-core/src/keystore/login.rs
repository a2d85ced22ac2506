use std::collections::BTreeMap;

use crate::crypto::{EccProvider, PrivateKey};
use crate::error::{KeystoreError, KeystoreResult};
use crate::keygen::{self, Authority, AuthsByPath, PermissionNode};
use crate::matcher::PathMatcher;
use crate::path::{KeyPath, ACTIVE, OWNER};
use crate::secret::{self, Classified, KeyInput};
use crate::storage::StorageError;

use super::{KeystoreInner, MUTABLE};

/// Input of [`Keystore::derive_keys`](super::Keystore::derive_keys).
#[derive(Debug, Clone)]
pub struct LoginRequest {
    /// Master secret, WIF or decoded private key.
    pub secret: KeyInput,
    /// Globs of the key paths to also save to the persistent substrate.
    pub save_key_matches: Vec<String>,
    /// The account's permission tree. When absent the last accepted tree is
    /// used, and failing that one is synthesized from the secret.
    pub permissions: Option<Vec<PermissionNode>>,
}

impl LoginRequest {
    /// Logs in with `secret`, saving nothing to disk.
    pub fn new(secret: impl Into<KeyInput>) -> Self {
        Self {
            secret: secret.into(),
            save_key_matches: Vec::new(),
            permissions: None,
        }
    }

    /// Sets the globs of key paths to persist.
    #[must_use]
    pub fn save_key_matches<S: Into<String>>(mut self, patterns: impl IntoIterator<Item = S>) -> Self {
        self.save_key_matches = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the permission tree.
    #[must_use]
    pub fn permissions(mut self, tree: Vec<PermissionNode>) -> Self {
        self.permissions = Some(tree);
        self
    }
}

/// Root keys implied by the login secret.
enum RootKeys {
    Master { owner: PrivateKey, active: PrivateKey },
    Single(PrivateKey),
}

impl RootKeys {
    fn keys(&self) -> Vec<&PrivateKey> {
        match self {
            Self::Master { owner, active } => vec![owner, active],
            Self::Single(key) => vec![key],
        }
    }
}

impl KeystoreInner {
    pub(super) fn derive_keys(&mut self, request: LoginRequest) -> KeystoreResult<()> {
        self.keep_alive();
        let ecc = &*self.platform.ecc;

        let roots = match secret::classify(ecc, &request.secret) {
            Classified::Master(master) => {
                let (owner, active) = keygen::root_keys(ecc, &master)?;
                RootKeys::Master { owner, active }
            }
            Classified::Wif(key) | Classified::RawPrivate(key) => RootKeys::Single(key),
            Classified::Pubkey(_) | Classified::Unknown => return Err(KeystoreError::InvalidLogin),
        };

        let save = PathMatcher::all(&request.save_key_matches)?;
        self.check_save_patterns(&save)?;

        let supplied = request.permissions.is_some();
        let tree = match request.permissions {
            Some(tree) => tree,
            None => match self.cached_permissions()? {
                Some(tree) => tree,
                None => synthesize_tree(ecc, &roots)?,
            },
        };
        let auths = keygen::auths_by_path(&tree)?;
        unique_key_by_role(&auths, ACTIVE)?;
        unique_key_by_role(&auths, OWNER)?;

        let mut updates = BTreeMap::new();
        for key in roots.keys() {
            let pubkey = ecc.to_public(key)?;
            for (path, auth) in &auths {
                if auth.contains_key(&pubkey) {
                    updates.insert(path.clone(), key.clone());
                }
            }
        }
        let matched = updates.len();
        if matched == 0 {
            log::info!("login for {} matched no authority", self.account);
            return Err(KeystoreError::InvalidLogin);
        }

        if supplied {
            self.cache_permissions(&tree)?;
        }

        let to_disk = |path: &KeyPath| save.iter().any(|matcher| matcher.matches(path));

        let mut stored = 0usize;
        for (path, key) in &updates {
            let key = Classified::RawPrivate(key.clone());
            if self.add_key(path, &key, to_disk(path))?.is_some() {
                stored += 1;
            }
        }

        let mut known = self.resident_private_keys(true)?;
        known.extend(updates);

        // Parents sort first, so each child can derive from one restored here.
        let mut derived = 0usize;
        for (path, auth) in &auths {
            if known.contains_key(path) {
                continue;
            }
            let Some(child) = keygen::derive_keys(ecc, path, &known)?
                .into_iter()
                .find(|child| child.path == *path)
            else {
                continue;
            };
            if !auth.contains_key(&ecc.to_public(&child.private_key)?) {
                log::debug!("{path} was rotated away from its derived key, not restoring it");
                continue;
            }
            let key = Classified::RawPrivate(child.private_key.clone());
            if self.add_key(path, &key, to_disk(path))?.is_some() {
                derived += 1;
            }
            known.insert(path.clone(), child.private_key);
        }

        // Nothing was written when every key, derived ones included, is denied.
        if stored + derived == 0 {
            log::info!("login for {} denied at {}", self.account, self.location());
            return Err(KeystoreError::PageScope);
        }
        log::info!(
            "login for {}: {stored} of {matched} matched keys stored, {derived} derived",
            self.account
        );
        Ok(())
    }

    fn check_save_patterns(&self, save: &[PathMatcher]) -> KeystoreResult<()> {
        let mut guarded = vec![KeyPath::owner()];
        if !self.config.persist_active {
            guarded.push(KeyPath::active());
        }
        for path in guarded {
            if let Some(matcher) = save.iter().find(|matcher| matcher.matches(&path)) {
                log::warn!("save pattern '{}' covers {path}", matcher.as_str());
                return Err(KeystoreError::DiskSecurity {
                    path: path.to_string(),
                });
            }
        }
        Ok(())
    }

    fn cache_permissions(&self, tree: &[PermissionNode]) -> KeystoreResult<()> {
        let raw = serde_json::to_string(tree)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        self.ns.save(
            &*self.platform.persistent,
            &self.permissions_key(),
            Some(raw.as_str()),
            MUTABLE,
        )?;
        Ok(())
    }

    fn cached_permissions(&self) -> KeystoreResult<Option<Vec<PermissionNode>>> {
        let Some(raw) = self.ns.get(&*self.platform.persistent, &self.permissions_key())? else {
            return Ok(None);
        };
        let tree = serde_json::from_str(&raw)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        Ok(Some(tree))
    }
}

/// Tree used when the host supplies none: the roots the secret implies.
fn synthesize_tree(
    ecc: &dyn EccProvider,
    roots: &RootKeys,
) -> KeystoreResult<Vec<PermissionNode>> {
    Ok(match roots {
        RootKeys::Master { owner, active } => vec![
            PermissionNode::new(OWNER, "", Authority::single_key(ecc.to_public(owner)?)),
            PermissionNode::new(ACTIVE, OWNER, Authority::single_key(ecc.to_public(active)?)),
        ],
        RootKeys::Single(key) => vec![PermissionNode::new(
            ACTIVE,
            OWNER,
            Authority::single_key(ecc.to_public(key)?),
        )],
    })
}

/// Fails if a key of `role` also satisfies any other permission.
fn unique_key_by_role(auths: &AuthsByPath, role: &str) -> KeystoreResult<()> {
    let role_path = KeyPath::parse(role)?;
    let Some(auth) = auths.get(&role_path) else {
        return Ok(());
    };
    for weight in &auth.keys {
        let reused = auths
            .iter()
            .find(|(path, other)| **path != role_path && other.contains_key(&weight.key));
        if let Some((other, _)) = reused {
            return Err(KeystoreError::KeyReuse {
                role: role.to_string(),
                other: other.to_string(),
            });
        }
    }
    Ok(())
}
