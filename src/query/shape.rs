use crate::document::unwrap_value;
use crate::errors::BrokerError;
use crate::query::plan::Projection;
use crate::types::{BUILTIN_ATTRS, IDENTITY_FIELDS};
use bson::{Bson, Document as BsonDocument};
use serde_json::Value;

/// Requested output representation. The four modes are mutually
/// exclusive on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Normalized,
    KeyValues,
    Values,
    Unique,
}

/// Parsed `options` parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    pub mode: OutputMode,
    pub count: bool,
    pub append: bool,
}

/// Parses the comma-separated `options` parameter.
///
/// # Errors
/// `BadRequest` on unknown tokens or more than one shaping mode.
pub fn parse_options(raw: Option<&str>) -> Result<RenderOptions, BrokerError> {
    let mut opts = RenderOptions::default();
    let Some(raw) = raw else { return Ok(opts) };
    for token in raw.split(',') {
        let mode = match token {
            "keyValues" => Some(OutputMode::KeyValues),
            "values" => Some(OutputMode::Values),
            "unique" => Some(OutputMode::Unique),
            "count" => {
                opts.count = true;
                None
            }
            "append" => {
                opts.append = true;
                None
            }
            other => {
                return Err(BrokerError::BadRequest(format!("unsupported option: {other}")));
            }
        };
        if let Some(mode) = mode {
            if opts.mode != OutputMode::Normalized {
                return Err(BrokerError::BadRequest(
                    "conflicting output-shape options".into(),
                ));
            }
            opts.mode = mode;
        }
    }
    Ok(opts)
}

/// Shapes a result list into the requested representation.
///
/// # Errors
/// JSON conversion failures only.
pub fn shape_entities(docs: Vec<BsonDocument>, mode: OutputMode) -> Result<Value, BrokerError> {
    let items =
        docs.into_iter().map(|d| shape_entity(d, mode)).collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Array(items))
}

/// Shapes a single document.
///
/// # Errors
/// JSON conversion failures only.
pub fn shape_entity(doc: BsonDocument, mode: OutputMode) -> Result<Value, BrokerError> {
    match mode {
        OutputMode::Normalized => to_json(&Bson::Document(doc)),
        OutputMode::KeyValues => to_json(&Bson::Document(key_values(doc))),
        OutputMode::Values => {
            let vals =
                values_of(doc).iter().map(to_json).collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(vals))
        }
        OutputMode::Unique => {
            let mut seen: Vec<Value> = Vec::new();
            for v in values_of(doc) {
                let v = to_json(&v)?;
                if !seen.contains(&v) {
                    seen.push(v);
                }
            }
            Ok(Value::Array(seen))
        }
    }
}

/// Flattens structured attributes to their `value` sub-field; plain and
/// list-valued fields pass through unchanged.
fn key_values(doc: BsonDocument) -> BsonDocument {
    let mut out = BsonDocument::new();
    for (field, value) in doc {
        out.insert(field, unwrap_value(value));
    }
    out
}

/// Unwrapped values in document field iteration order, names dropped.
fn values_of(doc: BsonDocument) -> Vec<Bson> {
    doc.into_iter().map(|(_, value)| unwrap_value(value)).collect()
}

/// Removes builtin date fields unless the caller asked for them.
pub fn strip_builtins(doc: &mut BsonDocument, attrs: &Projection) {
    for field in BUILTIN_ATTRS {
        if !attrs.requested(field) {
            doc.remove(field);
        }
    }
}

/// Removes `id`/`type` unless the caller asked for them; used by the
/// attributes sub-view.
pub fn strip_identity(doc: &mut BsonDocument, attrs: &Projection) {
    for field in IDENTITY_FIELDS {
        if !attrs.requested(field) {
            doc.remove(field);
        }
    }
}

/// Restricts each structured attribute's metadata sub-document to the
/// requested metadata selection.
pub fn apply_metadata_projection(doc: &mut BsonDocument, metadata: &Projection) {
    if *metadata == Projection::None {
        return;
    }
    for (_, value) in doc.iter_mut() {
        if let Bson::Document(attr) = value
            && let Some(Bson::Document(meta)) = attr.get_mut("metadata")
        {
            let keep: Vec<String> =
                meta.keys().filter(|k| metadata.keeps(k.as_str())).cloned().collect();
            let mut filtered = BsonDocument::new();
            for k in keep {
                if let Some(v) = meta.remove(&k) {
                    filtered.insert(k, v);
                }
            }
            *meta = filtered;
        }
    }
}

fn to_json(value: &Bson) -> Result<Value, BrokerError> {
    Ok(serde_json::to_value(value)?)
}
