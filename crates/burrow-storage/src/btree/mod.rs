//! Disk-backed B+-tree index.
//!
//! The engine is generic over the indexed attribute's key type; the three
//! supported types (`i32`, `f64`, [`StrKey`]) share one implementation of
//! the node codec, the insertion path, the split primitives, and the range
//! scan.

mod index;
mod key;
mod meta;
mod node;
mod scan;

pub use index::BTreeIndex;
pub use key::{IndexKey, StrKey};
pub use meta::{IndexMetadata, RELATION_NAME_LEN};
pub use node::{LeafView, NonLeafView};
pub use scan::RangeOp;
