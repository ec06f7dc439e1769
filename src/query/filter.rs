use crate::errors::BrokerError;
use crate::query::operand::coerce_bson;
use crate::types::ParamMap;
use bson::Bson;

/// Attribute path carrying the GeoJSON value of an entity's location.
pub const GEO_FIELD: &str = "location.value";
/// Coordinate sub-path used by exact geo matches.
pub const GEO_COORDS_FIELD: &str = "location.value.coordinates";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// Composite filter expression evaluated against stored entities.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    In { path: String, values: Vec<Bson> },
    Cmp { path: String, op: CmpOp, value: Bson },
    Regex { path: String, pattern: String },
    Near { path: String, coordinates: [f64; 2], modifiers: Vec<(String, i64)> },
    GeoIntersects { path: String, polygon: Vec<Vec<f64>> },
    GeoWithin { path: String, polygon: Vec<Vec<f64>> },
}

impl Filter {
    /// A filter matching every document.
    #[must_use]
    pub const fn all() -> Self {
        Self::And(Vec::new())
    }
}

/// Attribute-comparison operators in the order they are probed.
/// `>=`/`<=` must precede their single-character forms, `==` and the
/// `:` alias precede everything carrying a bare `=`.
const Q_OPERATORS: [(&str, Option<CmpOp>); 7] = [
    ("==", None),
    (":", None),
    ("!=", Some(CmpOp::Ne)),
    (">=", Some(CmpOp::Gte)),
    ("<=", Some(CmpOp::Lte)),
    ("<", Some(CmpOp::Lt)),
    (">", Some(CmpOp::Gt)),
];

/// Builds the composite filter for a request's parameter set.
///
/// Per-field clauses merge last-write-wins into a keyed map; OR-groups
/// from multi-value parameters collect under the top-level AND.
#[derive(Debug, Default)]
pub struct FilterBuilder {
    clauses: Vec<(String, Filter)>,
    groups: Vec<Filter>,
}

impl FilterBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the full parameter set into a single filter expression.
    ///
    /// # Errors
    /// `BadRequest` on malformed or unsupported parameters,
    /// `NotImplemented` for the `disjoint` geo predicate.
    pub fn build(params: &ParamMap) -> Result<Filter, BrokerError> {
        let mut b = Self::new();

        match (params.get("type"), params.get("typePattern")) {
            (Some(types), _) => b.in_or_clause("type", types),
            (None, Some(pattern)) => {
                b.set_clause("type", Filter::Regex { path: "type".into(), pattern: pattern.clone() });
            }
            (None, None) => {}
        }

        match (params.get("id"), params.get("idPattern")) {
            (Some(ids), _) => b.in_or_clause("id", ids),
            (None, Some(pattern)) => {
                b.set_clause("id", Filter::Regex { path: "id".into(), pattern: pattern.clone() });
            }
            (None, None) => {}
        }

        if let Some(categories) = params.get("category") {
            b.in_or_clause("category.value", categories);
        }

        // q and mq are mutually exclusive; q wins when both are given.
        if let Some(q) = params.get("q") {
            b.attribute_clauses(q, false);
        } else if let Some(mq) = params.get("mq") {
            b.attribute_clauses(mq, true);
        }

        // Geospatial parameters only apply as an all-or-nothing group.
        if let (Some(georel), Some(geometry), Some(coords)) =
            (params.get("georel"), params.get("geometry"), params.get("coords"))
        {
            b.geo_clause(georel, geometry, coords)?;
        }

        if let Some(values) = params.get("values") {
            b.legacy_value_clauses(values)?;
        }

        Ok(b.finish())
    }

    /// Replaces any earlier clause on the same field path.
    pub fn set_clause(&mut self, path: &str, node: Filter) {
        if let Some(entry) = self.clauses.iter_mut().find(|(p, _)| p == path) {
            entry.1 = node;
        } else {
            self.clauses.push((path.to_string(), node));
        }
    }

    /// Comma-separated multi-value match: a single value restricts the
    /// field directly, several values become an OR-group of in-set
    /// matches.
    fn in_or_clause(&mut self, path: &str, raw: &str) {
        let values: Vec<&str> = raw.split(',').collect();
        if values.len() == 1 {
            self.set_clause(
                path,
                Filter::In { path: path.into(), values: vec![Bson::String(values[0].into())] },
            );
        } else {
            let branches = values
                .into_iter()
                .map(|v| Filter::In { path: path.into(), values: vec![Bson::String(v.into())] })
                .collect();
            self.groups.push(Filter::Or(branches));
        }
    }

    /// Semicolon-separated `field<op>value` clauses. `==` and its `:`
    /// alias produce single-value in-set nodes so array-valued fields
    /// match by containment. Clauses without a recognized operator are
    /// skipped, as the source behavior did.
    fn attribute_clauses(&mut self, raw: &str, metadata_namespace: bool) {
        for clause in raw.split(';') {
            let Some((field, op, operand)) = split_clause(clause) else {
                log::debug!("skipping attribute clause without operator: {clause}");
                continue;
            };
            let path =
                if metadata_namespace { metadata_path(field) } else { field.to_string() };
            let value = coerce_bson(operand);
            let node = match op {
                None => Filter::In { path: path.clone(), values: vec![value] },
                Some(op) => Filter::Cmp { path: path.clone(), op, value },
            };
            self.set_clause(&path, node);
        }
    }

    fn geo_clause(
        &mut self,
        georel: &str,
        geometry: &str,
        coords: &str,
    ) -> Result<(), BrokerError> {
        let georels: Vec<&str> = georel.split(';').collect();
        let groups: Vec<&str> = coords.split(';').collect();
        let geometry = capitalize(geometry);

        match georels[0] {
            "near" => {
                if geometry != "Point" {
                    return Err(BrokerError::BadRequest(
                        "near requires Point geometry".into(),
                    ));
                }
                if georels.len() < 2 {
                    return Err(BrokerError::BadRequest(
                        "near requires at least one modifier".into(),
                    ));
                }
                if groups.len() > 1 {
                    return Err(BrokerError::BadRequest(
                        "near takes a single coordinate pair".into(),
                    ));
                }
                let coordinates = parse_coord_pair(groups[0])?;
                let mut modifiers = Vec::with_capacity(georels.len() - 1);
                for raw in &georels[1..] {
                    let (name, value) = raw.split_once(':').ok_or_else(|| {
                        BrokerError::BadRequest(format!("malformed near modifier: {raw}"))
                    })?;
                    let value = value.parse::<i64>().map_err(|_| {
                        BrokerError::BadRequest(format!("non-numeric near modifier: {raw}"))
                    })?;
                    modifiers.push((name.to_string(), value));
                }
                self.set_clause(
                    GEO_FIELD,
                    Filter::Near { path: GEO_FIELD.into(), coordinates, modifiers },
                );
            }
            kind @ ("intersects" | "coveredBy") => {
                // The expected geometry name is literally "Polygone".
                if geometry != "Polygone" {
                    return Err(BrokerError::BadRequest(format!(
                        "{kind} requires Polygone geometry"
                    )));
                }
                if groups.len() > 4 {
                    return Err(BrokerError::BadRequest(
                        "too many polygon coordinate groups".into(),
                    ));
                }
                let polygon = groups
                    .iter()
                    .map(|g| parse_float_list(g))
                    .collect::<Result<Vec<_>, _>>()?;
                let node = if kind == "intersects" {
                    Filter::GeoIntersects { path: GEO_FIELD.into(), polygon }
                } else {
                    Filter::GeoWithin { path: GEO_FIELD.into(), polygon }
                };
                self.set_clause(GEO_FIELD, node);
            }
            "equals" => {
                let mut branches = Vec::with_capacity(groups.len());
                for group in &groups {
                    let pair = parse_coord_pair(group)?;
                    branches.push(Filter::Cmp {
                        path: GEO_COORDS_FIELD.into(),
                        op: CmpOp::Eq,
                        value: Bson::Array(vec![
                            Bson::Double(pair[0]),
                            Bson::Double(pair[1]),
                        ]),
                    });
                }
                self.groups.push(Filter::Or(branches));
            }
            "disjoint" => {
                return Err(BrokerError::NotImplemented(
                    "disjoint geo predicate".into(),
                ));
            }
            other => {
                return Err(BrokerError::BadRequest(format!(
                    "unsupported geo predicate: {other}"
                )));
            }
        }
        Ok(())
    }

    /// Legacy `values` parameter: comma-separated `field|value` pairs
    /// restricting each field to an exact coerced value.
    fn legacy_value_clauses(&mut self, raw: &str) -> Result<(), BrokerError> {
        for pair in raw.split(',') {
            let (field, value) = pair.split_once('|').ok_or_else(|| {
                BrokerError::BadRequest(format!("malformed values pair: {pair}"))
            })?;
            self.set_clause(
                field,
                Filter::Cmp { path: field.into(), op: CmpOp::Eq, value: coerce_bson(value) },
            );
        }
        Ok(())
    }

    #[must_use]
    pub fn finish(self) -> Filter {
        let mut items: Vec<Filter> =
            self.clauses.into_iter().map(|(_, node)| node).collect();
        items.extend(self.groups);
        if items.len() == 1 { items.pop().unwrap_or(Filter::all()) } else { Filter::And(items) }
    }
}

fn split_clause(clause: &str) -> Option<(&str, Option<CmpOp>, &str)> {
    for (token, op) in Q_OPERATORS {
        if let Some((field, operand)) = clause.split_once(token)
            && !field.is_empty()
        {
            return Some((field, op, operand));
        }
    }
    None
}

/// `attr.rest` addresses `attr.metadata.rest`; a bare attribute name
/// addresses its whole metadata sub-document.
fn metadata_path(field: &str) -> String {
    match field.split_once('.') {
        Some((attr, rest)) => format!("{attr}.metadata.{rest}"),
        None => format!("{field}.metadata"),
    }
}

/// First letter upper, remainder lower, matching the geometry-name
/// normalization of the source API.
fn capitalize(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

fn parse_float_list(raw: &str) -> Result<Vec<f64>, BrokerError> {
    raw.split(',')
        .map(|p| {
            p.trim().parse::<f64>().map_err(|_| {
                BrokerError::BadRequest(format!("malformed coordinate: {p}"))
            })
        })
        .collect()
}

fn parse_coord_pair(raw: &str) -> Result<[f64; 2], BrokerError> {
    let floats = parse_float_list(raw)?;
    if floats.len() != 2 {
        return Err(BrokerError::BadRequest(format!(
            "expected a lon,lat coordinate pair: {raw}"
        )));
    }
    Ok([floats[0], floats[1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> ParamMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn single_type_restricts_with_in_set() {
        let f = FilterBuilder::build(&params(&[("type", "Device")])).unwrap();
        assert_eq!(
            f,
            Filter::In { path: "type".into(), values: vec![Bson::String("Device".into())] }
        );
    }

    #[test]
    fn multi_type_becomes_or_group() {
        let f = FilterBuilder::build(&params(&[("type", "Device,Application")])).unwrap();
        let Filter::Or(branches) = f else { panic!("expected OR group, got {f:?}") };
        assert_eq!(branches.len(), 2);
    }

    #[test]
    fn type_takes_precedence_over_pattern() {
        let f = FilterBuilder::build(&params(&[
            ("type", "Device"),
            ("typePattern", "Dev.*"),
        ]))
        .unwrap();
        assert!(matches!(f, Filter::In { .. }));
    }

    #[test]
    fn q_comparison_coerces_integer() {
        let f = FilterBuilder::build(&params(&[("q", "temperature>=20")])).unwrap();
        assert_eq!(
            f,
            Filter::Cmp {
                path: "temperature".into(),
                op: CmpOp::Gte,
                value: Bson::Int64(20)
            }
        );
    }

    #[test]
    fn q_equality_is_in_set() {
        let f = FilterBuilder::build(&params(&[("q", "status==active")])).unwrap();
        assert_eq!(
            f,
            Filter::In { path: "status".into(), values: vec![Bson::String("active".into())] }
        );
        let g = FilterBuilder::build(&params(&[("q", "status:active")])).unwrap();
        assert_eq!(f, g);
    }

    #[test]
    fn q_wins_over_mq() {
        let f = FilterBuilder::build(&params(&[("q", "a>1"), ("mq", "b.c>2")])).unwrap();
        assert!(matches!(f, Filter::Cmp { ref path, .. } if path == "a"));
    }

    #[test]
    fn mq_addresses_metadata_namespace() {
        let f = FilterBuilder::build(&params(&[("mq", "temperature.accuracy>0.9")])).unwrap();
        assert_eq!(
            f,
            Filter::Cmp {
                path: "temperature.metadata.accuracy".into(),
                op: CmpOp::Gt,
                value: Bson::Double(0.9)
            }
        );
    }

    #[test]
    fn later_clause_overwrites_same_field() {
        let f = FilterBuilder::build(&params(&[("q", "temp>5;temp<9")])).unwrap();
        assert_eq!(
            f,
            Filter::Cmp { path: "temp".into(), op: CmpOp::Lt, value: Bson::Int64(9) }
        );
    }

    #[test]
    fn near_builds_point_clause_with_modifier() {
        let f = FilterBuilder::build(&params(&[
            ("georel", "near;maxDistance:5000"),
            ("geometry", "Point"),
            ("coords", "10.0,20.0"),
        ]))
        .unwrap();
        assert_eq!(
            f,
            Filter::Near {
                path: GEO_FIELD.into(),
                coordinates: [10.0, 20.0],
                modifiers: vec![("maxDistance".into(), 5000)],
            }
        );
    }

    #[test]
    fn near_rejects_polygon_geometry() {
        let err = FilterBuilder::build(&params(&[
            ("georel", "near;maxDistance:5000"),
            ("geometry", "Polygon"),
            ("coords", "10.0,20.0"),
        ]))
        .unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn near_requires_a_modifier() {
        let err = FilterBuilder::build(&params(&[
            ("georel", "near"),
            ("geometry", "Point"),
            ("coords", "10.0,20.0"),
        ]))
        .unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn covered_by_requires_polygone_spelling() {
        let base = [
            ("georel", "coveredBy"),
            ("geometry", "polygone"),
            ("coords", "0,0;0,10;10,10;10,0"),
        ];
        let f = FilterBuilder::build(&params(&base)).unwrap();
        assert!(matches!(f, Filter::GeoWithin { ref polygon, .. } if polygon.len() == 4));

        let err = FilterBuilder::build(&params(&[
            ("georel", "coveredBy"),
            ("geometry", "Polygon"),
            ("coords", "0,0;0,10;10,10;10,0"),
        ]))
        .unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn disjoint_is_not_implemented() {
        let err = FilterBuilder::build(&params(&[
            ("georel", "disjoint"),
            ("geometry", "Point"),
            ("coords", "1,2"),
        ]))
        .unwrap_err();
        assert_eq!(err.status(), 501);
    }

    #[test]
    fn geo_equals_builds_or_of_coordinate_matches() {
        let f = FilterBuilder::build(&params(&[
            ("georel", "equals"),
            ("geometry", "Point"),
            ("coords", "1.0,2.0;3.0,4.0"),
        ]))
        .unwrap();
        let Filter::Or(branches) = f else { panic!("expected OR group, got {f:?}") };
        assert_eq!(branches.len(), 2);
        assert!(matches!(
            &branches[0],
            Filter::Cmp { path, op: CmpOp::Eq, .. } if path == GEO_COORDS_FIELD
        ));
    }

    #[test]
    fn incomplete_geo_group_is_ignored() {
        let f = FilterBuilder::build(&params(&[("georel", "near"), ("geometry", "Point")]))
            .unwrap();
        assert_eq!(f, Filter::all());
    }

    #[test]
    fn legacy_values_pairs() {
        let f = FilterBuilder::build(&params(&[("values", "temp|21,label|hot")])).unwrap();
        let Filter::And(items) = f else { panic!("expected AND, got {f:?}") };
        assert_eq!(items.len(), 2);
        assert!(items.contains(&Filter::Cmp {
            path: "temp".into(),
            op: CmpOp::Eq,
            value: Bson::Int64(21)
        }));
    }

    #[test]
    fn empty_params_match_all() {
        assert_eq!(FilterBuilder::build(&ParamMap::new()).unwrap(), Filter::all());
    }
}
