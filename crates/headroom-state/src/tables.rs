//! redb table definitions for the scale state store.

use redb::TableDefinition;

/// Last-scale records keyed by resource group identifier. Values are the
/// same JSON document the file backend writes.
pub const SCALE_STATE: TableDefinition<&str, &[u8]> = TableDefinition::new("scale_state");
