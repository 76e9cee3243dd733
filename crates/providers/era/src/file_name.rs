//! Archive file naming.

use std::{fmt, path::Path};

/// The two archive formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EraKind {
    /// Pre-merge execution history, indexed by block number.
    Era1,
    /// Beacon blocks and states, indexed by slot.
    Era,
}

impl EraKind {
    /// The file extension without the dot.
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Era1 => "era1",
            Self::Era => "era",
        }
    }
}

/// A parsed archive file name: `<network>-<era:05>-<hash:8>.<ext>`.
///
/// The `<network>-<era>-<count>-<hash>` variant is also accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EraFileId {
    /// Network prefix.
    pub network: String,
    /// Era number.
    pub number: u64,
    /// Short hash suffix.
    pub hash: String,
    /// Archive format.
    pub kind: EraKind,
}

impl EraFileId {
    /// Creates an id.
    pub fn new(network: impl Into<String>, number: u64, hash: [u8; 4], kind: EraKind) -> Self {
        let hash = hash.iter().map(|b| format!("{b:02x}")).collect();
        Self { network: network.into(), number, hash, kind }
    }

    /// Parses a file name. Returns `None` if it does not follow the naming convention.
    pub fn parse(path: &Path) -> Option<Self> {
        let kind = match path.extension()?.to_str()? {
            "era1" => EraKind::Era1,
            "era" => EraKind::Era,
            _ => return None,
        };
        let stem = path.file_stem()?.to_str()?;
        let parts = stem.split('-').collect::<Vec<_>>();
        let (network, number, hash) = match parts.as_slice() {
            [network, number, hash] | [network, number, _, hash] => (*network, *number, *hash),
            _ => return None,
        };
        if network.is_empty() || hash.len() != 8 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let number = number.parse().ok()?;
        Some(Self { network: network.to_string(), number, hash: hash.to_string(), kind })
    }
}

impl fmt::Display for EraFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:05}-{}.{}", self.network, self.number, self.hash, self.kind.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::path::PathBuf;

    #[rstest]
    #[case("mainnet-00000-5ec1ffb8.era1", "mainnet", 0, EraKind::Era1)]
    #[case("mainnet-01896-e6ebe562.era1", "mainnet", 1896, EraKind::Era1)]
    #[case("sepolia-00573-1b8d2d2e.era", "sepolia", 573, EraKind::Era)]
    #[case("mainnet-00010-00001-a1b2c3d4.era1", "mainnet", 10, EraKind::Era1)]
    fn test_parse(
        #[case] name: &str,
        #[case] network: &str,
        #[case] number: u64,
        #[case] kind: EraKind,
    ) {
        let id = EraFileId::parse(&PathBuf::from("/data").join(name)).unwrap();
        assert_eq!(id.network, network);
        assert_eq!(id.number, number);
        assert_eq!(id.kind, kind);
    }

    #[rstest]
    #[case("mainnet-00000-5ec1ffb8.e2s")]
    #[case("mainnet-00000.era1")]
    #[case("mainnet-abc-5ec1ffb8.era1")]
    #[case("mainnet-00000-xyz.era1")]
    #[case("README")]
    fn test_parse_rejects(#[case] name: &str) {
        assert!(EraFileId::parse(Path::new(name)).is_none());
    }

    #[test]
    fn test_display_roundtrip() {
        let id = EraFileId::new("holesky", 42, [0xde, 0xad, 0xbe, 0xef], EraKind::Era);
        assert_eq!(id.to_string(), "holesky-00042-deadbeef.era");
        assert_eq!(EraFileId::parse(Path::new(&id.to_string())).unwrap(), id);
    }
}
