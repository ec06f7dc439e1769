use crate::errors::BrokerError;
use crate::query::filter::{Filter, FilterBuilder};
use crate::types::{ParamMap, is_builtin_attr};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub order: Order,
}

/// Field selection for result documents.
///
/// `None` leaves documents untouched. `Wildcard` keeps every attribute
/// except builtins, unless a builtin was listed explicitly alongside
/// the `*`. `Include` keeps only the listed fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Projection {
    #[default]
    None,
    Wildcard {
        explicit_builtins: Vec<String>,
    },
    Include(Vec<String>),
}

impl Projection {
    /// Parses a comma-separated `attrs`/`metadata` parameter value.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else { return Self::None };
        let fields: Vec<String> = raw.split(',').map(str::to_string).collect();
        if fields.iter().any(|f| f == "*") {
            let explicit_builtins =
                fields.into_iter().filter(|f| is_builtin_attr(f)).collect();
            Self::Wildcard { explicit_builtins }
        } else {
            Self::Include(fields)
        }
    }

    /// Whether the caller explicitly asked for this field.
    #[must_use]
    pub fn requested(&self, field: &str) -> bool {
        match self {
            Self::None => false,
            Self::Wildcard { explicit_builtins } => {
                explicit_builtins.iter().any(|f| f == field)
            }
            Self::Include(fields) => fields.iter().any(|f| f == field),
        }
    }

    /// Whether a document field survives this projection. Builtins are
    /// dropped by the wildcard unless explicitly listed.
    #[must_use]
    pub fn keeps(&self, field: &str) -> bool {
        match self {
            Self::None => true,
            Self::Wildcard { explicit_builtins } => {
                !is_builtin_attr(field) || explicit_builtins.iter().any(|f| f == field)
            }
            Self::Include(fields) => fields.iter().any(|f| f == field),
        }
    }
}

/// Sort/skip/limit window handed to the store together with the
/// projection. A limit of 0 means "no explicit cap".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindOptions {
    pub projection: Projection,
    pub sort: Vec<SortSpec>,
    pub skip: Option<usize>,
    pub limit: usize,
}

/// Per-request query plan: constructed fresh from the parameter set,
/// consumed once by the executor.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub filter: Filter,
    pub attrs: Projection,
    pub metadata: Projection,
    pub sort: Vec<SortSpec>,
    pub skip: Option<usize>,
    pub limit: usize,
}

impl QueryPlan {
    /// Builds the full plan for a request parameter set.
    ///
    /// # Errors
    /// Propagates filter-construction errors and rejects non-numeric
    /// `offset`/`limit` values.
    pub fn build(params: &ParamMap) -> Result<Self, BrokerError> {
        let filter = FilterBuilder::build(params)?;
        let attrs = Projection::parse(params.get("attrs").map(String::as_str));
        let metadata = Projection::parse(params.get("metadata").map(String::as_str));
        let sort = parse_order_by(params.get("orderBy").map(String::as_str));
        let skip = match params.get("offset") {
            None => None,
            Some(raw) => Some(raw.parse::<usize>().map_err(|_| {
                BrokerError::BadRequest(format!("invalid offset: {raw}"))
            })?),
        };
        let limit = match params.get("limit") {
            None => 0,
            Some(raw) => raw.parse::<usize>().map_err(|_| {
                BrokerError::BadRequest(format!("invalid limit: {raw}"))
            })?,
        };
        Ok(Self { filter, attrs, metadata, sort, skip, limit })
    }

    #[must_use]
    pub fn find_options(&self) -> FindOptions {
        FindOptions {
            projection: self.attrs.clone(),
            sort: self.sort.clone(),
            skip: self.skip,
            limit: self.limit,
        }
    }
}

/// `orderBy` is a comma-separated field list; a leading `!` flips that
/// key to descending. Keys apply in listed order.
fn parse_order_by(raw: Option<&str>) -> Vec<SortSpec> {
    let Some(raw) = raw else { return Vec::new() };
    raw.split(',')
        .filter(|f| !f.is_empty() && *f != "!")
        .map(|field| match field.strip_prefix('!') {
            Some(stripped) => SortSpec { field: stripped.to_string(), order: Order::Desc },
            None => SortSpec { field: field.to_string(), order: Order::Asc },
        })
        .collect()
}
