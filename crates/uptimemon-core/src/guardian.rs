//! Guardian directory — immutable address-to-name resolution.
//!
//! Built once at startup from configuration (or the bundled mainnet set)
//! and passed explicitly into every component that resolves guardian
//! names. Lookups are case-insensitive on the address.

use std::collections::HashMap;

use crate::error::UptimeError;

/// One configured guardian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardianEntry {
    pub index: u8,
    pub name: String,
    /// 20-byte address, `0x`-prefixed hex (any case).
    pub address: String,
}

impl GuardianEntry {
    pub fn new(index: u8, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Immutable guardian address book.
pub struct GuardianDirectory {
    by_addr: HashMap<String, String>,
    names: Vec<String>,
}

impl GuardianDirectory {
    /// Build a directory from configured entries.
    ///
    /// Duplicate addresses are a configuration error: silently keeping
    /// one of the two names would corrupt per-guardian accounting.
    pub fn from_entries(entries: &[GuardianEntry]) -> Result<Self, UptimeError> {
        let mut by_addr = HashMap::with_capacity(entries.len());
        let mut names = Vec::with_capacity(entries.len());
        for entry in entries {
            let addr = entry.address.to_lowercase();
            if by_addr.insert(addr, entry.name.clone()).is_some() {
                return Err(UptimeError::Config(format!(
                    "duplicate guardian address {}",
                    entry.address
                )));
            }
            names.push(entry.name.clone());
        }
        Ok(Self { by_addr, names })
    }

    /// The mainnet guardian set (19 guardians).
    pub fn mainnet() -> Self {
        let entries = mainnet_entries();
        // The bundled set has no duplicates.
        Self::from_entries(&entries).unwrap_or(Self {
            by_addr: HashMap::new(),
            names: Vec::new(),
        })
    }

    /// Resolve a guardian address to its name, case-insensitively.
    pub fn name(&self, addr: &str) -> Option<&str> {
        self.by_addr.get(&addr.to_lowercase()).map(String::as_str)
    }

    /// All guardian names, in configured order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// The current mainnet guardian set.
pub fn mainnet_entries() -> Vec<GuardianEntry> {
    vec![
        GuardianEntry::new(0, "RockawayX", "0x5893B5A76c3f739645648885bDCcC06cd70a3Cd3"),
        GuardianEntry::new(1, "Staked", "0xfF6CB952589BDE862c25Ef4392132fb9D4A42157"),
        GuardianEntry::new(2, "Figment", "0x114De8460193bdf3A2fCf81f86a09765F4762fD1"),
        GuardianEntry::new(3, "ChainodeTech", "0x107A0086b32d7A0977926A205131d8731D39cbEB"),
        GuardianEntry::new(4, "Inotel", "0x8C82B2fd82FaeD2711d59AF0F2499D16e726f6b2"),
        GuardianEntry::new(5, "HashKey Cloud", "0x11b39756C042441BE6D8650b69b54EbE715E2343"),
        GuardianEntry::new(6, "ChainLayer", "0x54Ce5B4D348fb74B958e8966e2ec3dBd4958a7cd"),
        GuardianEntry::new(7, "xLabs", "0x15e7cAF07C4e3DC8e7C469f92C8Cd88FB8005a20"),
        GuardianEntry::new(8, "Forbole", "0x74a3bf913953D695260D88BC1aA25A4eeE363ef0"),
        GuardianEntry::new(9, "Staking Fund", "0x000aC0076727b35FBea2dAc28fEE5cCB0fEA768e"),
        GuardianEntry::new(10, "Moonlet", "0xAF45Ced136b9D9e24903464AE889F5C8a723FC14"),
        GuardianEntry::new(11, "P2P Validator", "0xf93124b7c738843CBB89E864c862c38cddCccF95"),
        GuardianEntry::new(12, "01node", "0xD2CC37A4dc036a8D232b48f62cDD4731412f4890"),
        GuardianEntry::new(13, "MCF", "0xDA798F6896A3331F64b48c12D1D57Fd9cbe70811"),
        GuardianEntry::new(14, "Everstake", "0x71AA1BE1D36CaFE3867910F99C09e347899C19C3"),
        GuardianEntry::new(15, "Chorus One", "0x8192b6E7387CCd768277c17DAb1b7a5027c0b3Cf"),
        GuardianEntry::new(16, "syncnode", "0x178e21ad2E77AE06711549CFBB1f9c7a9d8096e8"),
        GuardianEntry::new(17, "Triton", "0x5E1487F35515d02A92753504a8D75471b9f49EdB"),
        GuardianEntry::new(
            18,
            "Staking Facilities",
            "0x6FbEBc898F403E4773E95feB15E80C9A99c8348d",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_has_19_guardians() {
        let dir = GuardianDirectory::mainnet();
        assert_eq!(dir.len(), 19);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let dir = GuardianDirectory::mainnet();
        assert_eq!(
            dir.name("0x5893b5a76c3f739645648885bdccc06cd70a3cd3"),
            Some("RockawayX")
        );
        assert_eq!(
            dir.name("0x5893B5A76C3F739645648885BDCCC06CD70A3CD3"),
            Some("RockawayX")
        );
    }

    #[test]
    fn unknown_address_resolves_to_none() {
        let dir = GuardianDirectory::mainnet();
        assert_eq!(dir.name("0xdeadbeef00000000000000000000000000000000"), None);
    }

    #[test]
    fn duplicate_address_is_config_error() {
        let entries = vec![
            GuardianEntry::new(0, "a", "0xAA"),
            GuardianEntry::new(1, "b", "0xaa"),
        ];
        assert!(GuardianDirectory::from_entries(&entries).is_err());
    }
}
