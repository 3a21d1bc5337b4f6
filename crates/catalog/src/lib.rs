mod identity;
mod resolution;

pub use identity::{IdentityTable, IdentityTableError};
pub use resolution::select_width;

/// Stable handle for one remote catalog item, drawn from `[0, catalog_size)`.
pub type ContentId = u32;
