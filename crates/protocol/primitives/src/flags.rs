//! Flags controlling the expensive steps of block persistence.

bitflags::bitflags! {
    /// Selects which validation and storage steps a `persist_blocks` call skips.
    ///
    /// One set of flags is chosen per import run and passed to every persist call of that run.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct PersistBlockFlags: u8 {
        /// Skip all validation, including the body/header consistency checks.
        const NO_VALIDATION = 1 << 0;
        /// Skip execution; only structural checks are performed.
        const NO_FULL_VALIDATION = 1 << 1;
        /// Do not store block bodies.
        const NO_PERSIST_BODIES = 1 << 2;
        /// Do not store receipts.
        const NO_PERSIST_RECEIPTS = 1 << 3;
        /// Do not write the recent block hash history.
        const NO_PERSIST_SLOT_HASHES = 1 << 4;
    }
}

impl PersistBlockFlags {
    /// Returns true if the structural checks must run.
    pub const fn validates(&self) -> bool {
        !self.contains(Self::NO_VALIDATION)
    }

    /// Returns true if blocks must be executed and their results compared with the header.
    pub const fn executes(&self) -> bool {
        self.validates() && !self.contains(Self::NO_FULL_VALIDATION)
    }
}
