//! AICF record format.
//!
//! Section-based, line-oriented encoding used for the machine-oriented half of
//! the session memory store: one index record plus one category record per
//! kind of extracted knowledge.
//!
//! # Module layout
//!
//! - [`document`]: `Document`, `Section`: lossless section model used for in-place updates
//! - [`index`]: `IndexRecord`, `parse_index`, `compile_index`
//! - [`category`]: `Category`, `CategoryRecord`, `parse_category`, `compile_category`
//! - [`link`]: `TypedId`, `Link`, `LinkLine`
//! - [`sanitize`]: boundary rules for the unescaped field separator
//! - [`error`]: `FormatError`, `FormatResult`

pub mod category;
pub mod document;
pub mod error;
pub mod index;
pub mod link;
pub mod sanitize;

pub use category::{compile_category, parse_category, Category, CategoryRecord, Row};
pub use document::{Document, Section};
pub use error::{FormatError, FormatResult};
pub use index::{
    compile_index, parse_index, ActivityEntry, IndexRecord, KeyValues, INDEX_SECTIONS,
    RECENT_ACTIVITY_CAP,
};
pub use link::{Link, LinkLine, TypedId};
pub use sanitize::{sanitize_value, validate_value};

/// Marker that opens a section header line (`@NAME`).
pub const SECTION_MARKER: char = '@';

/// Separator between positional field values in a row.
pub const FIELD_SEPARATOR: char = '|';

/// Arrow joining the two ends of a link (`C:1->D:2`).
pub const LINK_ARROW: &str = "->";

/// Format version written into fresh index records.
pub const FORMAT_VERSION: &str = "3.1.0";
