//! # fwa-firmware — Resolving Firmware Images
//!
//! Analyzers never touch blob paths or repositories directly. They ask the
//! [`FirmwareAccessor`] for a [`FirmwareHandle`] by one of three routes:
//!
//! | route | source of bytes |
//! |---|---|
//! | [`FirmwareAccessor::get_by_blob`] | bytes supplied by the caller |
//! | [`FirmwareAccessor::get_by_id`] | the durable store, by content id |
//! | [`FirmwareAccessor::get_by_version`] | a [`FirmwareRepository`], by version name |
//!
//! Every route converges on content identity: the same bytes resolved
//! through any route, by any number of concurrent callers, are hashed and
//! parsed once.
//!
//! Parsing is behind the [`FirmwareParser`] seam. [`FlatImageParser`] is a
//! layout-driven parser for raw images; real UEFI volume parsing plugs in
//! through the same trait.

pub mod accessor;
pub mod error;
pub mod handle;
pub mod parser;
pub mod repository;

pub use accessor::{AccessorSettings, FirmwareAccessor};
pub use error::{AccessError, ParseError, RepositoryError};
pub use handle::FirmwareHandle;
pub use parser::{FirmwareParser, FlatImageParser, ParsedFirmware, Region};
pub use repository::{DirectoryRepository, FirmwareRepository};
