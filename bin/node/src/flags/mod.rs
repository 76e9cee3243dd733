//! CLI flags shared between subcommands.

mod globals;
pub use globals::GlobalArgs;

mod archive;
pub use archive::ArchiveArgs;
