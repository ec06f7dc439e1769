use bson::{Bson, Document as BsonDocument};
use std::io;

/// Heterogeneous attribute value: a plain scalar, an NGSI-style
/// structured attribute carrying a `value` sub-field plus metadata, or
/// a list. The shaper unwraps these to their payload value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Scalar(Bson),
    Structured { value: Bson, metadata: BsonDocument },
    List(Vec<Bson>),
}

impl AttrValue {
    #[must_use]
    pub fn classify(raw: Bson) -> Self {
        match raw {
            Bson::Document(mut d) => match d.remove("value") {
                Some(value) => Self::Structured { value, metadata: d },
                // A document without a `value` sub-field is an opaque scalar.
                None => Self::Scalar(Bson::Document(d)),
            },
            Bson::Array(items) => Self::List(items),
            other => Self::Scalar(other),
        }
    }

    /// The attribute's payload value: structured attributes unwrap to
    /// their `value` sub-field, lists and scalars pass through.
    #[must_use]
    pub fn unwrap(self) -> Bson {
        match self {
            Self::Scalar(b) => b,
            Self::Structured { value, .. } => value,
            Self::List(items) => Bson::Array(items),
        }
    }
}

/// Unwraps a raw field value in one step.
#[must_use]
pub fn unwrap_value(raw: Bson) -> Bson {
    AttrValue::classify(raw).unwrap()
}

/// Convert a serde_json::Value that must be an object into a bson::Document.
/// Returns io::Error with InvalidData on malformed input.
pub fn json_value_to_bson_document(val: &serde_json::Value) -> io::Result<BsonDocument> {
    let obj = val
        .as_object()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "expected JSON object"))?;
    BsonDocument::try_from(obj.clone())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Parse a JSON string into a bson::Document. The JSON must be a top-level object.
pub fn parse_json_to_bson_document(json: &str) -> io::Result<BsonDocument> {
    let val: serde_json::Value =
        serde_json::from_str(json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    json_value_to_bson_document(&val)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn classify_structured_attribute() {
        let raw = Bson::Document(doc! {"value": 21.5, "type": "Number", "metadata": {}});
        match AttrValue::classify(raw) {
            AttrValue::Structured { value, metadata } => {
                assert_eq!(value, Bson::Double(21.5));
                assert_eq!(metadata.get_str("type").unwrap(), "Number");
            }
            other => panic!("expected structured attribute, got {other:?}"),
        }
    }

    #[test]
    fn plain_and_list_values_pass_through() {
        assert_eq!(unwrap_value(Bson::String("on".into())), Bson::String("on".into()));
        let list = Bson::Array(vec![Bson::Int32(1), Bson::Int32(2)]);
        assert_eq!(unwrap_value(list.clone()), list);
    }

    #[test]
    fn document_without_value_is_scalar() {
        let raw = Bson::Document(doc! {"lat": 1, "lon": 2});
        assert!(matches!(AttrValue::classify(raw), AttrValue::Scalar(_)));
    }

    #[test]
    fn json_to_bson_success() {
        let d = parse_json_to_bson_document("{\"a\":1,\"b\":\"x\"}").unwrap();
        assert_eq!(d.get_i32("a").unwrap(), 1);
        assert_eq!(d.get_str("b").unwrap(), "x");
    }

    #[test]
    fn json_to_bson_rejects_array() {
        let e = parse_json_to_bson_document("[1,2,3]").unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::InvalidData);
    }
}
