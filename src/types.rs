use std::collections::BTreeMap;

pub type CollectionName = String;
pub type EntityId = String;

/// Raw query-parameter map as handed over by the HTTP layer.
pub type ParamMap = BTreeMap<String, String>;

/// Bookkeeping fields excluded from wildcard attribute selection.
pub const BUILTIN_ATTRS: [&str; 3] = ["dateCreated", "dateModified", "dateExpired"];

/// Identity fields stripped from mutation payloads and attribute views.
pub const IDENTITY_FIELDS: [&str; 2] = ["id", "type"];

/// Store-internal document identity, never surfaced in results.
pub const INTERNAL_ID: &str = "_id";

pub fn is_builtin_attr(field: &str) -> bool {
    BUILTIN_ATTRS.contains(&field)
}

pub fn is_identity_field(field: &str) -> bool {
    IDENTITY_FIELDS.contains(&field)
}
