//! Table definitions and key encoding for redb storage

use redb::TableDefinition;

/// Pattern rows: `encode_key(kb_id, name)` -> postcard `PatternRecord`
pub const PATTERNS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("patterns");

/// Separator between kb_id and pattern name in row keys.
///
/// NUL never appears in kb ids or 40-hex names, so prefix scans over
/// `kb\x00 .. kb\x01` cover exactly one namespace.
const KEY_SEPARATOR: char = '\0';

pub fn encode_key(kb_id: &str, name: &str) -> String {
    format!("{kb_id}{KEY_SEPARATOR}{name}")
}

/// Inclusive-exclusive range bounds covering every key of one kb
pub fn kb_range(kb_id: &str) -> (String, String) {
    (format!("{kb_id}\u{0}"), format!("{kb_id}\u{1}"))
}
