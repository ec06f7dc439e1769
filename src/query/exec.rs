use crate::errors::BrokerError;
use crate::query::plan::QueryPlan;
use crate::store::EntityStore;
use bson::Document as BsonDocument;

/// Runs a query plan against the entity collection.
///
/// Execution faults are downgraded to NotFound on this read path:
/// callers cannot distinguish "genuinely absent" from "query failed".
/// An empty result set is NotFound as well, not an empty payload.
///
/// # Errors
/// `NotFound` when nothing matches or the store fails.
pub fn execute(
    store: &dyn EntityStore,
    collection: &str,
    plan: &QueryPlan,
) -> Result<Vec<BsonDocument>, BrokerError> {
    let opts = plan.find_options();
    let docs = store.find(collection, &plan.filter, &opts).map_err(|e| {
        log::warn!("query execution failed on {collection}: {e}");
        BrokerError::NotFound(format!("query failed on {collection}"))
    })?;
    if docs.is_empty() {
        return Err(BrokerError::NotFound(format!("no entities matched in {collection}")));
    }
    Ok(docs)
}

/// `execute`, optionally with the exact total match count. The count
/// ignores the pagination window and travels as an envelope header.
///
/// # Errors
/// Same surface as `execute`.
pub fn execute_with_count(
    store: &dyn EntityStore,
    collection: &str,
    plan: &QueryPlan,
    want_count: bool,
) -> Result<(Vec<BsonDocument>, Option<u64>), BrokerError> {
    let docs = execute(store, collection, plan)?;
    let count = if want_count {
        let n = store.count(collection, &plan.filter).map_err(|e| {
            log::warn!("count failed on {collection}: {e}");
            BrokerError::NotFound(format!("count failed on {collection}"))
        })?;
        Some(n)
    } else {
        None
    };
    Ok((docs, count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::filter::{CmpOp, Filter};
    use crate::query::plan::{Order, Projection, SortSpec};
    use crate::store::{EntityStore, MemoryStore};
    use crate::types::ParamMap;
    use bson::doc;

    fn plan_for(filter: Filter) -> QueryPlan {
        let mut plan = QueryPlan::build(&ParamMap::new()).unwrap();
        plan.filter = filter;
        plan
    }

    #[test]
    fn empty_result_is_not_found() {
        let store = MemoryStore::new();
        store.insert("Entities", doc! {"id": "e1", "temp": 3}).unwrap();
        let plan = plan_for(Filter::Cmp {
            path: "temp".into(),
            op: CmpOp::Gt,
            value: bson::Bson::Int64(100),
        });
        let err = execute(&store, "Entities", &plan).unwrap_err();
        assert_eq!(err.status(), 404);
    }

    #[test]
    fn count_ignores_pagination() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.insert("Entities", doc! {"id": format!("e{i}"), "temp": i}).unwrap();
        }
        let mut plan = plan_for(Filter::all());
        plan.limit = 2;
        plan.sort = vec![SortSpec { field: "temp".into(), order: Order::Asc }];
        plan.attrs = Projection::Include(vec!["id".into()]);
        let (docs, count) = execute_with_count(&store, "Entities", &plan, true).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(count, Some(5));
    }
}
