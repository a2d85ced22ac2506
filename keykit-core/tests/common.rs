//! Common test utilities shared across integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use keykit_core::crypto::{EccProvider, K1Provider};
use keykit_core::keygen::{gen_root_keyset, Authority, PermissionNode, RootKeyset};
use keykit_core::platform::{
    KeyValueStore, ManualClock, ManualTicker, MemoryHistory, MemoryStore, Platform,
};
use keykit_core::{Keystore, KeystoreConfig};

pub const ACCOUNT: &str = "myaccount";
pub const MASTER: &str = "PW5JMx76CTUTXxpAbwAqGMMVzSeJaP5UVTT5c2uobcpaMUdLAphSp";
pub const MINUTE: Duration = Duration::from_secs(60);

/// Hand-driven host: in-memory substrates, history, clock and ticker.
pub struct Host {
    pub volatile: Arc<MemoryStore>,
    pub persistent: Arc<dyn KeyValueStore>,
    pub history: Arc<MemoryHistory>,
    pub clock: Arc<ManualClock>,
    pub ticker: Arc<ManualTicker>,
}

impl Host {
    pub fn new() -> Self {
        Self::with_persistent(Arc::new(MemoryStore::new()))
    }

    pub fn with_persistent(persistent: Arc<dyn KeyValueStore>) -> Self {
        Self {
            volatile: Arc::new(MemoryStore::new()),
            persistent,
            history: Arc::new(MemoryHistory::new("/")),
            clock: Arc::new(ManualClock::new(Duration::from_secs(1_700_000_000))),
            ticker: Arc::new(ManualTicker::new()),
        }
    }

    pub fn platform(&self) -> Platform {
        Platform::new(
            self.volatile.clone(),
            self.persistent.clone(),
            self.history.clone(),
        )
        .with_clock(self.clock.clone())
        .with_ticker(Some(self.ticker.clone()))
    }

    pub fn keystore(&self, config: KeystoreConfig) -> Keystore {
        Keystore::new(ACCOUNT, config, self.platform()).expect("keystore")
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}

pub fn keyset() -> RootKeyset {
    gen_root_keyset(&K1Provider::new(), Some(MASTER)).expect("keyset")
}

/// Public key of `parent_wif`'s child named `label`.
pub fn child_pubkey(parent_wif: &str, label: &str) -> String {
    let ecc = K1Provider::new();
    let parent = ecc.from_wif(parent_wif).expect("wif");
    let child = ecc.child_key(&parent, label).expect("child");
    ecc.to_public(&child).expect("public")
}

/// `owner` → `active` → `mypermission`, all keyed from [`MASTER`].
pub fn permissions() -> Vec<PermissionNode> {
    let keyset = keyset();
    vec![
        PermissionNode::new("owner", "", Authority::single_key(&keyset.public_keys.owner)),
        PermissionNode::new(
            "active",
            "owner",
            Authority::single_key(&keyset.public_keys.active),
        ),
        PermissionNode::new(
            "mypermission",
            "active",
            Authority::single_key(child_pubkey(&keyset.private_keys.active, "mypermission")),
        ),
    ]
}
