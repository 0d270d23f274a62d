//! Built-in analyzers, registered under their family's default id by
//! [`AnalyzerRegistry::with_builtins`](crate::AnalyzerRegistry::with_builtins).

mod diff_regions;
mod image_info;
mod stable_hash_match;

pub use diff_regions::DiffRegions;
pub use image_info::ImageInfo;
pub use stable_hash_match::StableHashMatch;
