//! Markdown library export of curated items.

pub mod vault;

pub use vault::{build_library, LibraryPaths, LibrarySummary};
