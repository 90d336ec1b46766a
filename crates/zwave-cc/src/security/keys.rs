//! Security classes and the per-class key store.

use std::collections::BTreeMap;
use std::fmt;

use zwave_crypto::NetworkKeys;

/// Security classes, strongest first. A node is granted exactly one class
/// at inclusion; the driver keeps keys for every class it participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SecurityClass {
    S2AccessControl,
    S2Authenticated,
    S2Unauthenticated,
    S0,
}

impl SecurityClass {
    /// Whether this class uses the S2 wire format.
    pub fn is_s2(self) -> bool {
        !matches!(self, SecurityClass::S0)
    }
}

/// Derived keys per security class.
#[derive(Default)]
pub struct KeyStore {
    keys: BTreeMap<SecurityClass, NetworkKeys>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive and store the key set for a class from its raw network key.
    pub fn insert(&mut self, class: SecurityClass, network_key: &[u8; 16]) {
        self.keys.insert(class, NetworkKeys::derive(network_key));
    }

    pub fn get(&self, class: SecurityClass) -> Option<&NetworkKeys> {
        self.keys.get(&class)
    }

    pub fn has(&self, class: SecurityClass) -> bool {
        self.keys.contains_key(&class)
    }

    /// The strongest class a key is loaded for.
    pub fn highest_class(&self) -> Option<SecurityClass> {
        self.keys.keys().next().copied()
    }
}

// Never print key material.
impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("classes", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}
