//! Context-entity operations: list/retrieve on the read side
//! (`mod.rs`) and the mutation state machine (`mutate.rs`).

mod mutate;
mod response;

pub use response::Response;

use crate::config::BrokerConfig;
use crate::errors::BrokerError;
use crate::query::{
    CmpOp, Filter, QueryPlan, apply_metadata_projection, execute, execute_with_count,
    parse_options, shape_entities, shape_entity, strip_builtins, strip_identity,
};
use crate::store::EntityStore;
use crate::types::ParamMap;
use bson::Bson;
use serde_json::json;
use std::sync::Arc;

/// Entity query/update service. Stateless per request: every call
/// builds its plan from the parameter set, runs it, and shapes the
/// result; all durable state lives in the store.
pub struct Entities {
    store: Arc<dyn EntityStore>,
    config: BrokerConfig,
}

impl Entities {
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, config: BrokerConfig) -> Self {
        log::info!("entities service initialization complete");
        Self { store, config }
    }

    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &dyn EntityStore {
        self.store.as_ref()
    }

    /// Lists entities matching the request parameter set.
    pub fn list_entities(&self, params: &ParamMap) -> Response {
        match self.try_list(params) {
            Ok(resp) => resp,
            Err(err) => self.fail(err),
        }
    }

    fn try_list(&self, params: &ParamMap) -> Result<Response, BrokerError> {
        let plan = QueryPlan::build(params)?;
        let opts = parse_options(params.get("options").map(String::as_str))?;
        let (mut docs, count) = execute_with_count(
            self.store(),
            &self.config.entities_collection,
            &plan,
            opts.count,
        )?;
        for doc in &mut docs {
            apply_metadata_projection(doc, &plan.metadata);
        }
        let body = shape_entities(docs, opts.mode)?;
        Ok(self.ok(body).with_count(count))
    }

    /// Retrieves one entity by id (optionally narrowed by type).
    pub fn get_entity(&self, entity_type: Option<&str>, id: &str, params: &ParamMap) -> Response {
        match self.try_get(entity_type, id, params, false) {
            Ok(resp) => resp,
            Err(err) => self.fail(err),
        }
    }

    /// Retrieves the attributes sub-view of one entity: identity fields
    /// are stripped unless explicitly requested.
    pub fn get_entity_attributes(
        &self,
        entity_type: Option<&str>,
        id: &str,
        params: &ParamMap,
    ) -> Response {
        match self.try_get(entity_type, id, params, true) {
            Ok(resp) => resp,
            Err(err) => self.fail(err),
        }
    }

    fn try_get(
        &self,
        entity_type: Option<&str>,
        id: &str,
        params: &ParamMap,
        attrs_view: bool,
    ) -> Result<Response, BrokerError> {
        let mut plan = QueryPlan::build(params)?;
        plan.filter = by_id_filter(id, entity_type);
        let opts = parse_options(params.get("options").map(String::as_str))?;

        let mut docs = execute(self.store(), &self.config.entities_collection, &plan)?;
        if docs.len() > 1 {
            return Err(BrokerError::Conflict(format!("entity {id} matched more than once")));
        }
        let mut doc = docs.remove(0);

        strip_builtins(&mut doc, &plan.attrs);
        if attrs_view {
            strip_identity(&mut doc, &plan.attrs);
        }
        apply_metadata_projection(&mut doc, &plan.metadata);
        let body = shape_entity(doc, opts.mode)?;
        Ok(self.ok(body))
    }

    // --- envelope helpers ---

    fn ok(&self, body: serde_json::Value) -> Response {
        log::info!("200: {}", self.config.messages.descriptor("200").description);
        Response::new(200, body)
    }

    pub(crate) fn no_content(&self) -> Response {
        let descriptor = self.config.messages.descriptor("204");
        log::info!("204: {}", descriptor.description);
        Response::new(204, serde_json::to_value(descriptor).unwrap_or_else(|_| json!({})))
    }

    pub(crate) fn fail(&self, err: BrokerError) -> Response {
        let status = err.status();
        let descriptor = self.config.messages.descriptor(err.catalog_key());
        log::info!("{status}: {} ({err})", descriptor.description);
        Response::new(status, serde_json::to_value(descriptor).unwrap_or_else(|_| json!({})))
    }
}

/// Exact-match lookup filter for a `(type, id)` pair.
fn by_id_filter(id: &str, entity_type: Option<&str>) -> Filter {
    let mut items = vec![Filter::Cmp {
        path: "id".into(),
        op: CmpOp::Eq,
        value: Bson::String(id.to_string()),
    }];
    if let Some(t) = entity_type {
        items.push(Filter::Cmp {
            path: "type".into(),
            op: CmpOp::Eq,
            value: Bson::String(t.to_string()),
        });
    }
    Filter::And(items)
}
