use super::{DeleteReport, EntityStore, StoreError, UpdateReport};
use crate::query::{CmpOp, Filter, FindOptions, Order, Projection, SortSpec};
use crate::types::INTERNAL_ID;
use bson::{Bson, Document as BsonDocument};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use uuid::Uuid;

/// In-memory entity store. Collections are created implicitly on first
/// insert; documents keep insertion order, which fixes the unsorted
/// result order and the `values` traversal order.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, Vec<BsonDocument>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntityStore for MemoryStore {
    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        opts: &FindOptions,
    ) -> Result<Vec<BsonDocument>, StoreError> {
        let collections = self.collections.read();
        let docs = collections.get(collection).map(Vec::as_slice).unwrap_or(&[]);
        let mut matched: Vec<BsonDocument> =
            docs.iter().filter(|d| eval_filter(d, filter)).cloned().collect();

        if !opts.sort.is_empty() {
            matched.sort_by(|a, b| compare_docs(a, b, &opts.sort));
        }

        let skip = opts.skip.unwrap_or(0);
        let limit = if opts.limit == 0 { usize::MAX } else { opts.limit };
        let end = skip.saturating_add(limit).min(matched.len());
        let mut page: Vec<BsonDocument> =
            if skip >= matched.len() { Vec::new() } else { matched[skip..end].to_vec() };

        for doc in &mut page {
            *doc = project(doc, &opts.projection);
        }
        Ok(page)
    }

    fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let collections = self.collections.read();
        let docs = collections.get(collection).map(Vec::as_slice).unwrap_or(&[]);
        Ok(docs.iter().filter(|d| eval_filter(d, filter)).count() as u64)
    }

    fn insert(&self, collection: &str, mut doc: BsonDocument) -> Result<String, StoreError> {
        let internal_id = Uuid::new_v4().to_string();
        doc.insert(INTERNAL_ID, Bson::String(internal_id.clone()));
        self.collections.write().entry(collection.to_string()).or_default().push(doc);
        Ok(internal_id)
    }

    fn set_field(
        &self,
        collection: &str,
        entity_id: &str,
        field: &str,
        value: Bson,
        upsert: bool,
    ) -> Result<UpdateReport, StoreError> {
        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_string()).or_default();
        if let Some(doc) = docs.iter_mut().find(|d| has_entity_id(d, entity_id)) {
            let modified = u64::from(set_path(doc, field, value));
            return Ok(UpdateReport { matched: 1, modified });
        }
        if upsert {
            let mut doc = BsonDocument::new();
            doc.insert(INTERNAL_ID, Bson::String(Uuid::new_v4().to_string()));
            doc.insert("id", Bson::String(entity_id.to_string()));
            set_path(&mut doc, field, value);
            docs.push(doc);
            return Ok(UpdateReport { matched: 0, modified: 1 });
        }
        Ok(UpdateReport::default())
    }

    fn unset_field(
        &self,
        collection: &str,
        entity_id: &str,
        field: &str,
    ) -> Result<UpdateReport, StoreError> {
        let mut collections = self.collections.write();
        let docs = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::NoSuchCollection(collection.to_string()))?;
        if let Some(doc) = docs.iter_mut().find(|d| has_entity_id(d, entity_id)) {
            let modified = u64::from(unset_path(doc, field));
            return Ok(UpdateReport { matched: 1, modified });
        }
        Ok(UpdateReport::default())
    }

    fn delete_by_id(&self, collection: &str, entity_id: &str) -> Result<DeleteReport, StoreError> {
        let mut collections = self.collections.write();
        let docs = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::NoSuchCollection(collection.to_string()))?;
        match docs.iter().position(|d| has_entity_id(d, entity_id)) {
            Some(pos) => {
                docs.remove(pos);
                Ok(DeleteReport { deleted: 1 })
            }
            None => Ok(DeleteReport { deleted: 0 }),
        }
    }

    fn increment_field(
        &self,
        collection: &str,
        entity_id: &str,
        field: &str,
        delta: i64,
    ) -> Result<UpdateReport, StoreError> {
        let mut collections = self.collections.write();
        let docs = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::NoSuchCollection(collection.to_string()))?;
        if let Some(doc) = docs.iter_mut().find(|d| has_entity_id(d, entity_id)) {
            let current = get_path_owned(doc, field).map(|v| as_f64(&v)).unwrap_or(0.0);
            #[allow(clippy::cast_precision_loss)]
            let modified = u64::from(set_path(doc, field, Bson::Double(current + delta as f64)));
            return Ok(UpdateReport { matched: 1, modified });
        }
        Ok(UpdateReport::default())
    }
}

fn has_entity_id(doc: &BsonDocument, entity_id: &str) -> bool {
    doc.get_str("id").is_ok_and(|id| id == entity_id)
}

// --- filter evaluation ---

pub(crate) fn eval_filter(doc: &BsonDocument, filter: &Filter) -> bool {
    match filter {
        Filter::And(fs) => fs.iter().all(|f| eval_filter(doc, f)),
        Filter::Or(fs) => fs.iter().any(|f| eval_filter(doc, f)),
        Filter::In { path, values } => {
            get_path(doc, path).is_some_and(|v| is_in_set(v, values))
        }
        Filter::Cmp { path, op, value } => match (get_path(doc, path), op) {
            // $ne also matches documents where the field is absent.
            (None, CmpOp::Ne) => true,
            (None, _) => false,
            (Some(v), CmpOp::Eq) => bson_eq(v, value),
            (Some(v), CmpOp::Ne) => !bson_eq(v, value),
            (Some(v), CmpOp::Gt) => compare_bson(v, value) == Ordering::Greater,
            (Some(v), CmpOp::Gte) => compare_bson(v, value) != Ordering::Less,
            (Some(v), CmpOp::Lt) => compare_bson(v, value) == Ordering::Less,
            (Some(v), CmpOp::Lte) => compare_bson(v, value) != Ordering::Greater,
        },
        Filter::Regex { path, pattern } => {
            if let Some(Bson::String(s)) = get_path(doc, path) {
                regex::Regex::new(pattern).is_ok_and(|re| re.is_match(s))
            } else {
                false
            }
        }
        Filter::Near { path, coordinates, modifiers } => {
            let Some(stored) = get_path(doc, path).and_then(extract_point) else {
                return false;
            };
            let distance = haversine_meters(stored, *coordinates);
            modifiers.iter().all(|(name, value)| {
                #[allow(clippy::cast_precision_loss)]
                let bound = *value as f64;
                match name.as_str() {
                    "maxDistance" => distance <= bound,
                    "minDistance" => distance >= bound,
                    other => {
                        log::debug!("ignoring unsupported near modifier: {other}");
                        true
                    }
                }
            })
        }
        // Stored geometries are Points here, so both polygon predicates
        // reduce to point-in-polygon; the tree keeps them distinct for
        // backends with full geometry support.
        Filter::GeoIntersects { path, polygon } | Filter::GeoWithin { path, polygon } => {
            get_path(doc, path)
                .and_then(extract_point)
                .is_some_and(|p| point_in_polygon(p, polygon))
        }
    }
}

/// In-set semantics: an array-valued field matches by containment, a
/// scalar by membership of the set.
fn is_in_set(v: &Bson, set: &[Bson]) -> bool {
    match v {
        Bson::Array(items) => items.iter().any(|item| set.iter().any(|s| bson_eq(item, s))),
        other => set.iter().any(|s| bson_eq(other, s)),
    }
}

fn bson_eq(a: &Bson, b: &Bson) -> bool {
    match (a, b) {
        (Bson::Array(xs), Bson::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| bson_eq(x, y))
        }
        _ if is_num(a) && is_num(b) => as_f64(a).total_cmp(&as_f64(b)) == Ordering::Equal,
        _ => a == b,
    }
}

fn is_num(x: &Bson) -> bool {
    matches!(x, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

fn as_f64(x: &Bson) -> f64 {
    match x {
        Bson::Int32(i) => f64::from(*i),
        #[allow(clippy::cast_precision_loss)]
        Bson::Int64(i) => *i as f64,
        Bson::Double(f) => *f,
        _ => f64::NAN,
    }
}

pub(crate) fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    if is_num(a) && is_num(b) {
        return as_f64(a).total_cmp(&as_f64(b));
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(v: &Bson) -> u8 {
    match v {
        Bson::Null => 0,
        Bson::Boolean(_) => 1,
        Bson::Int32(_) => 2,
        Bson::Int64(_) => 3,
        Bson::Double(_) => 4,
        Bson::String(_) => 5,
        Bson::Array(_) => 6,
        Bson::Document(_) => 7,
        _ => 8,
    }
}

fn compare_docs(a: &BsonDocument, b: &BsonDocument, sort: &[SortSpec]) -> Ordering {
    for s in sort {
        let ord = match (get_path(a, &s.field), get_path(b, &s.field)) {
            (Some(x), Some(y)) => compare_bson(x, y),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return if matches!(s.order, Order::Asc) { ord } else { ord.reverse() };
        }
    }
    Ordering::Equal
}

// --- path access ---

fn get_path<'a>(doc: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    let mut cur = doc;
    let mut iter = path.split('.').peekable();
    while let Some(seg) = iter.next() {
        if iter.peek().is_none() {
            return cur.get(seg);
        }
        match cur.get(seg) {
            Some(Bson::Document(d)) => cur = d,
            _ => return None,
        }
    }
    None
}

fn get_path_owned(doc: &BsonDocument, path: &str) -> Option<Bson> {
    get_path(doc, path).cloned()
}

fn ensure_subdoc<'a>(root: &'a mut BsonDocument, key: &str) -> &'a mut BsonDocument {
    let needs_new = !matches!(root.get(key), Some(Bson::Document(_)));
    if needs_new {
        root.insert(key.to_string(), Bson::Document(BsonDocument::new()));
    }
    match root.get_mut(key) {
        Some(Bson::Document(d)) => d,
        _ => unreachable!(),
    }
}

fn traverse_to_parent<'a>(
    root: &'a mut BsonDocument,
    path: &str,
) -> (&'a mut BsonDocument, String) {
    let mut cur = root;
    let mut iter = path.split('.').peekable();
    let mut last = String::new();
    while let Some(seg) = iter.next() {
        if iter.peek().is_none() {
            last = seg.to_string();
            break;
        }
        cur = ensure_subdoc(cur, seg);
    }
    (cur, last)
}

fn set_path(root: &mut BsonDocument, path: &str, value: Bson) -> bool {
    let (parent, last) = traverse_to_parent(root, path);
    let old = parent.insert(last, value.clone());
    old.as_ref() != Some(&value)
}

fn unset_path(root: &mut BsonDocument, path: &str) -> bool {
    let (parent, last) = traverse_to_parent(root, path);
    parent.remove(&last).is_some()
}

// --- projection ---

fn project(doc: &BsonDocument, projection: &Projection) -> BsonDocument {
    let mut out = BsonDocument::new();
    for (field, value) in doc {
        if field.as_str() == INTERNAL_ID {
            continue;
        }
        if projection.keeps(field) {
            out.insert(field.clone(), value.clone());
        }
    }
    out
}

// --- geo evaluation ---

fn extract_point(value: &Bson) -> Option<[f64; 2]> {
    let coords = match value {
        Bson::Document(d) => d.get("coordinates"),
        Bson::Array(_) => Some(value),
        _ => None,
    }?;
    let Bson::Array(items) = coords else { return None };
    if items.len() < 2 {
        return None;
    }
    let lon = as_f64(&items[0]);
    let lat = as_f64(&items[1]);
    if lon.is_nan() || lat.is_nan() { None } else { Some([lon, lat]) }
}

const EARTH_RADIUS_M: f64 = 6_371_000.0;

fn haversine_meters(a: [f64; 2], b: [f64; 2]) -> f64 {
    let (lon1, lat1) = (a[0].to_radians(), a[1].to_radians());
    let (lon2, lat2) = (b[0].to_radians(), b[1].to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Ray-casting point-in-polygon over [lon, lat] vertices.
fn point_in_polygon(point: [f64; 2], polygon: &[Vec<f64>]) -> bool {
    let vertices: Vec<[f64; 2]> =
        polygon.iter().filter(|v| v.len() >= 2).map(|v| [v[0], v[1]]).collect();
    if vertices.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let (xi, yi) = (vertices[i][0], vertices[i][1]);
        let (xj, yj) = (vertices[j][0], vertices[j][1]);
        if ((yi > point[1]) != (yj > point[1]))
            && point[0] < (xj - xi) * (point[1] - yi) / (yj - yi) + xi
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert("Entities", doc! {"id": "e1", "type": "Device", "temp": {"value": 21}})
            .unwrap();
        store
            .insert("Entities", doc! {"id": "e2", "type": "Device", "temp": {"value": 35}})
            .unwrap();
        store
            .insert("Entities", doc! {"id": "e3", "type": "Thing", "temp": {"value": 28}})
            .unwrap();
        store
    }

    #[test]
    fn find_filters_sorts_and_pages() {
        let store = seeded();
        let filter = Filter::Cmp {
            path: "temp.value".into(),
            op: CmpOp::Gt,
            value: Bson::Int64(20),
        };
        let opts = FindOptions {
            sort: vec![SortSpec { field: "temp.value".into(), order: Order::Desc }],
            limit: 2,
            ..FindOptions::default()
        };
        let docs = store.find("Entities", &filter, &opts).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].get_str("id").unwrap(), "e2");
        assert_eq!(docs[1].get_str("id").unwrap(), "e3");
        assert!(docs[0].get(INTERNAL_ID).is_none());
    }

    #[test]
    fn zero_limit_means_no_cap() {
        let store = seeded();
        let docs = store.find("Entities", &Filter::all(), &FindOptions::default()).unwrap();
        assert_eq!(docs.len(), 3);
    }

    #[test]
    fn in_set_matches_array_fields_by_containment() {
        let store = MemoryStore::new();
        store
            .insert("Entities", doc! {"id": "e1", "status": ["active", "alert"]})
            .unwrap();
        store.insert("Entities", doc! {"id": "e2", "status": "active"}).unwrap();
        store.insert("Entities", doc! {"id": "e3", "status": "idle"}).unwrap();
        let filter = Filter::In {
            path: "status".into(),
            values: vec![Bson::String("active".into())],
        };
        let docs = store.find("Entities", &filter, &FindOptions::default()).unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn ne_matches_absent_fields() {
        let store = seeded();
        let filter = Filter::Cmp {
            path: "humidity".into(),
            op: CmpOp::Ne,
            value: Bson::Int64(1),
        };
        assert_eq!(store.count("Entities", &filter).unwrap(), 3);
    }

    #[test]
    fn regex_filters_strings() {
        let store = seeded();
        let filter = Filter::Regex { path: "type".into(), pattern: "^Dev".into() };
        assert_eq!(store.count("Entities", &filter).unwrap(), 2);
    }

    #[test]
    fn near_with_max_distance() {
        let store = MemoryStore::new();
        store
            .insert(
                "Entities",
                doc! {"id": "close", "location": {"value": {"type": "Point", "coordinates": [10.0, 20.0]}}},
            )
            .unwrap();
        store
            .insert(
                "Entities",
                doc! {"id": "far", "location": {"value": {"type": "Point", "coordinates": [11.0, 20.0]}}},
            )
            .unwrap();
        let filter = Filter::Near {
            path: "location.value".into(),
            coordinates: [10.0, 20.0],
            modifiers: vec![("maxDistance".into(), 5000)],
        };
        let docs = store.find("Entities", &filter, &FindOptions::default()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get_str("id").unwrap(), "close");
    }

    #[test]
    fn within_polygon() {
        let store = MemoryStore::new();
        store
            .insert(
                "Entities",
                doc! {"id": "in", "location": {"value": {"type": "Point", "coordinates": [5.0, 5.0]}}},
            )
            .unwrap();
        store
            .insert(
                "Entities",
                doc! {"id": "out", "location": {"value": {"type": "Point", "coordinates": [20.0, 5.0]}}},
            )
            .unwrap();
        let square = vec![
            vec![0.0, 0.0],
            vec![0.0, 10.0],
            vec![10.0, 10.0],
            vec![10.0, 0.0],
        ];
        let filter = Filter::GeoWithin { path: "location.value".into(), polygon: square };
        let docs = store.find("Entities", &filter, &FindOptions::default()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get_str("id").unwrap(), "in");
    }

    #[test]
    fn set_unset_and_increment_fields() {
        let store = seeded();
        let rep = store
            .set_field("Entities", "e1", "label", Bson::String("hot".into()), false)
            .unwrap();
        assert_eq!(rep, UpdateReport { matched: 1, modified: 1 });

        let rep = store.unset_field("Entities", "e1", "label").unwrap();
        assert_eq!(rep, UpdateReport { matched: 1, modified: 1 });

        let rep = store.increment_field("Entities", "e1", "devices.value", 1).unwrap();
        assert_eq!(rep.matched, 1);
        let docs = store
            .find(
                "Entities",
                &Filter::Cmp {
                    path: "devices.value".into(),
                    op: CmpOp::Eq,
                    value: Bson::Int64(1),
                },
                &FindOptions::default(),
            )
            .unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn upsert_creates_missing_entity() {
        let store = MemoryStore::new();
        let rep = store
            .set_field("Entities", "ghost", "temp", Bson::Int32(7), true)
            .unwrap();
        assert_eq!(rep, UpdateReport { matched: 0, modified: 1 });
        assert_eq!(store.count("Entities", &Filter::all()).unwrap(), 1);
    }

    #[test]
    fn delete_by_id_reports_outcome() {
        let store = seeded();
        assert_eq!(store.delete_by_id("Entities", "e1").unwrap(), DeleteReport { deleted: 1 });
        assert_eq!(store.delete_by_id("Entities", "e1").unwrap(), DeleteReport { deleted: 0 });
    }
}
