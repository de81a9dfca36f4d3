//! Backup systems, derived from owned upgrades and the current scale.

use crate::common::Scale;
use crate::upgrades::UpgradeQuery;
use serde::{Deserialize, Serialize};

/// Backup tier upgrades, in the order they must be bought.
pub const BACKUP_TIER_UPGRADES: [&str; 4] = [
    "backup_local",
    "backup_distributed",
    "backup_encrypted",
    "backup_quantum",
];

pub const MAX_BACKUP_QUALITY: u8 = BACKUP_TIER_UPGRADES.len() as u8;

/// Never persisted as a source of truth; always recomputed from upgrades.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSystems {
    /// 0..=4
    pub quality: u8,
    pub locations: u32,
    pub redundancy: u32,
    pub encryption_level: u32,
}

impl BackupSystems {
    pub fn derive(upgrades: &dyn UpgradeQuery, scale: Scale) -> Self {
        let quality = BACKUP_TIER_UPGRADES
            .iter()
            .take_while(|upgrade| upgrades.is_purchased(upgrade))
            .count() as u8;
        let encryption_level = if upgrades.is_purchased("backup_quantum") {
            3
        } else if upgrades.is_purchased("backup_encrypted") {
            2
        } else {
            u32::from(quality > 0)
        };
        Self {
            quality,
            locations: u32::from(quality) * (scale.index() as u32 + 1),
            redundancy: u32::from(quality).min(3),
            encryption_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Owned(HashSet<&'static str>);

    impl UpgradeQuery for Owned {
        fn is_purchased(&self, upgrade_id: &str) -> bool {
            self.0.contains(upgrade_id)
        }
    }

    #[test]
    fn quality_counts_consecutive_tiers_only() {
        let none = Owned(HashSet::new());
        assert_eq!(BackupSystems::derive(&none, Scale::Local), BackupSystems::default());

        let gap = Owned(["backup_local", "backup_encrypted"].into_iter().collect());
        let backups = BackupSystems::derive(&gap, Scale::Regional);
        assert_eq!(backups.quality, 1);
        assert_eq!(backups.locations, 2);
        assert_eq!(backups.encryption_level, 2);

        let all = Owned(BACKUP_TIER_UPGRADES.into_iter().collect());
        let backups = BackupSystems::derive(&all, Scale::National);
        assert_eq!(backups.quality, MAX_BACKUP_QUALITY);
        assert_eq!(backups.locations, 12);
        assert_eq!(backups.redundancy, 3);
        assert_eq!(backups.encryption_level, 3);
    }
}
