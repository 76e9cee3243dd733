//! Read-only access to era and era1 history archives.
//!
//! Era1 files hold pre-merge execution blocks indexed by block number. Era files hold signed
//! beacon blocks indexed by slot, with the execution payload embedded from Bellatrix on, and
//! the beacon state at the end of each era. Both formats share the e2store record container.
//!
//! [`EraReader`] locates the files of one network in a directory and decodes blocks on demand.
//! The [`BlockArchive`] trait abstracts it for the importer.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

mod error;
pub use error::{ArchiveKey, DecodeError, EraError};

pub mod e2store;

mod container;

mod file_name;
pub use file_name::{EraFileId, EraKind};

mod era1;
pub use era1::Era1File;

mod era;
pub use era::EraFile;

mod beacon;
pub use beacon::{
    BeaconBlock, ExecutionPayload, ExecutionRequests, decode_execution_payload,
    decode_signed_beacon_block,
};

mod state;
pub use state::{HistoricalBoundary, HistoricalSummary, decode_historical_boundary, state_slot};

mod archive;
pub use archive::BlockArchive;

mod reader;
pub use reader::EraReader;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
