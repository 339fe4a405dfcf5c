//! Canonical forms of legacy free-text column values.
//!
//! Early releases stored enum-like settings as free text, and several of
//! those strings were written by hand or by long-gone code paths, so old
//! databases contain arbitrary case variants and outright unknown values.
//! Decoding is total: `from_legacy` always yields a canonical member, falling
//! back to the documented default instead of failing the migration. Steps
//! that want to log the fallback use `try_from_legacy`.

/// How a chain is synced. Legacy match is case-insensitive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncMode {
    Fast,
    Slow,
    New,
}

impl SyncMode {
    pub const DEFAULT: SyncMode = SyncMode::Fast;

    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::Fast => "Fast",
            SyncMode::Slow => "Slow",
            SyncMode::New => "New",
        }
    }

    pub fn try_from_legacy(raw: &str) -> Option<SyncMode> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fast" => Some(SyncMode::Fast),
            "slow" => Some(SyncMode::Slow),
            "new" => Some(SyncMode::New),
            _ => None,
        }
    }

    pub fn from_legacy(raw: &str) -> SyncMode {
        Self::try_from_legacy(raw).unwrap_or(Self::DEFAULT)
    }
}

/// Whether an account was created in-app or restored from a backup.
/// Derived from the legacy account-level sync mode: accounts that were
/// syncing as `New` had just been created, everything else was restored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountOrigin {
    Created,
    Restored,
}

impl AccountOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountOrigin::Created => "Created",
            AccountOrigin::Restored => "Restored",
        }
    }

    pub fn from_legacy_sync_mode(raw: &str) -> AccountOrigin {
        match SyncMode::try_from_legacy(raw) {
            Some(SyncMode::New) => AccountOrigin::Created,
            _ => AccountOrigin::Restored,
        }
    }
}

/// Bitcoin address derivation scheme. Legacy match is exact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Derivation {
    Bip44,
    Bip49,
    Bip84,
}

impl Derivation {
    pub const DEFAULT: Derivation = Derivation::Bip44;

    pub fn as_str(self) -> &'static str {
        match self {
            Derivation::Bip44 => "bip44",
            Derivation::Bip49 => "bip49",
            Derivation::Bip84 => "bip84",
        }
    }

    pub fn try_from_legacy(raw: &str) -> Option<Derivation> {
        match raw {
            "bip44" => Some(Derivation::Bip44),
            "bip49" => Some(Derivation::Bip49),
            "bip84" => Some(Derivation::Bip84),
            _ => None,
        }
    }

    pub fn from_legacy(raw: &str) -> Derivation {
        Self::try_from_legacy(raw).unwrap_or(Self::DEFAULT)
    }
}

/// How the app talks to an EVM node. Legacy match is exact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommunicationMode {
    Infura,
    Incubed,
}

impl CommunicationMode {
    pub const DEFAULT: CommunicationMode = CommunicationMode::Infura;

    pub fn as_str(self) -> &'static str {
        match self {
            CommunicationMode::Infura => "infura",
            CommunicationMode::Incubed => "incubed",
        }
    }

    pub fn try_from_legacy(raw: &str) -> Option<CommunicationMode> {
        match raw {
            "infura" => Some(CommunicationMode::Infura),
            "incubed" => Some(CommunicationMode::Incubed),
            _ => None,
        }
    }

    pub fn from_legacy(raw: &str) -> CommunicationMode {
        Self::try_from_legacy(raw).unwrap_or(Self::DEFAULT)
    }
}
