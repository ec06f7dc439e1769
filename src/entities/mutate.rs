use super::{Entities, Response};
use crate::errors::BrokerError;
use crate::query::{CmpOp, Filter, FindOptions};
use crate::types::{INTERNAL_ID, is_builtin_attr, is_identity_field};
use bson::{Bson, Document as BsonDocument};
use chrono::Utc;
use serde_json::json;

impl Entities {
    /// Creates a new entity. Unknown types are substituted with the
    /// configured default type rather than rejected.
    pub fn create_entity(&self, payload: BsonDocument) -> Response {
        match self.try_create(payload) {
            Ok(resp) => resp,
            Err(err) => self.fail(err),
        }
    }

    fn try_create(&self, mut payload: BsonDocument) -> Result<Response, BrokerError> {
        let id = payload
            .get_str("id")
            .map_err(|_| BrokerError::BadRequestPayload("entity id missing".into()))?
            .to_string();
        let entity_type = match payload.get_str("type") {
            Ok(t) if self.config().knows_type(t) => t.to_string(),
            _ => self.config().default_type.clone(),
        };
        payload.insert("type", Bson::String(entity_type.clone()));

        let now = Utc::now().to_rfc3339();
        payload.insert("dateCreated", Bson::String(now.clone()));
        payload.insert("dateModified", Bson::String(now));

        let collection = self.config().entities_collection.clone();
        let internal_id = self.store().insert(&collection, payload.clone()).map_err(|e| {
            log::warn!("entity insert failed: {e}");
            BrokerError::BadRequest(format!("entity insert failed for {id}"))
        })?;
        log::info!("entity {id} inserted OK");

        self.apply_creation_counters(&entity_type, &payload);

        payload.remove(INTERNAL_ID);
        let body = json!({
            "Response": "OK",
            "ID": internal_id,
            "Entity": serde_json::to_value(&payload)?,
        });
        Ok(Response::new(201, body)
            .with_location(format!("v1/entities/{id}?type={entity_type}")))
    }

    /// Counter side effects on parent Location/Zone records. Failures
    /// are logged and never propagate to the create outcome.
    fn apply_creation_counters(&self, entity_type: &str, payload: &BsonDocument) {
        match entity_type {
            "Device" => {
                let locations = self.config().locations_collection.clone();
                let zones = self.config().zones_collection.clone();
                self.bump_parent_counter(&locations, parent_link(payload, "lid"), "devices.value");
                self.bump_parent_counter(&zones, parent_link(payload, "zid"), "devices.value");
            }
            "Application" => {
                let locations = self.config().locations_collection.clone();
                self.bump_parent_counter(
                    &locations,
                    parent_link(payload, "lid"),
                    "applications.value",
                );
            }
            _ => {}
        }
    }

    fn bump_parent_counter(&self, collection: &str, parent: Option<String>, field: &str) {
        let Some(parent) = parent else {
            log::info!("no parent link on payload, skipping {field} counter");
            return;
        };
        match self.store().increment_field(collection, &parent, field, 1) {
            Ok(rep) if rep.matched > 0 => log::info!("counter {field} on {parent} updated OK"),
            Ok(_) => log::info!("counter target {parent} not found in {collection}"),
            Err(e) => log::warn!("counter {field} on {parent} failed: {e}"),
        }
    }

    /// Append-or-update (POST): upserts every payload attribute. With
    /// `append` set, keys already present on the entity are conflicts;
    /// they are flagged and skipped while the remaining keys still get
    /// upserted.
    pub fn update_entity_attrs(
        &self,
        id: &str,
        payload: BsonDocument,
        append: bool,
    ) -> Response {
        match self.try_update_attrs(id, payload, append) {
            Ok(resp) => resp,
            Err(err) => self.fail(err),
        }
    }

    fn try_update_attrs(
        &self,
        id: &str,
        mut payload: BsonDocument,
        append: bool,
    ) -> Result<Response, BrokerError> {
        strip_payload_identity(&mut payload);
        if payload.is_empty() {
            return Err(BrokerError::BadRequestPayload("no attributes in payload".into()));
        }
        let collection = self.config().entities_collection.clone();
        let existing = self.find_by_id(id)?;

        let mut updated = 0u64;
        let mut conflict = false;
        for (field, value) in payload {
            if append && existing.as_ref().is_some_and(|doc| doc.contains_key(&field)) {
                log::info!("append conflict on existing attribute {field} of {id}");
                conflict = true;
                continue;
            }
            match self.store().set_field(&collection, id, &field, value, true) {
                Ok(rep) if rep.matched > 0 || rep.modified > 0 => updated += 1,
                Ok(_) => {}
                Err(e) => log::warn!("attribute upsert {field} on {id} failed: {e}"),
            }
        }

        if updated > 0 && !conflict {
            self.touch(&collection, id);
            Ok(self.no_content())
        } else {
            Err(BrokerError::BadRequest(format!("attribute update failed for {id}")))
        }
    }

    /// Strict patch: every payload key must already exist on the
    /// entity. Present keys are still applied individually when another
    /// key is missing; the overall outcome is then a bad request.
    pub fn patch_entity_attrs(&self, id: &str, payload: BsonDocument) -> Response {
        match self.try_patch(id, payload) {
            Ok(resp) => resp,
            Err(err) => self.fail(err),
        }
    }

    fn try_patch(&self, id: &str, mut payload: BsonDocument) -> Result<Response, BrokerError> {
        strip_payload_identity(&mut payload);
        if payload.is_empty() {
            return Err(BrokerError::BadRequestPayload("no attributes in payload".into()));
        }
        let collection = self.config().entities_collection.clone();
        let existing = self.find_by_id(id)?;

        let mut updated = 0u64;
        let mut failed = false;
        for (field, value) in payload {
            let present = existing.as_ref().is_some_and(|doc| doc.contains_key(&field));
            if !present {
                log::info!("patch miss on absent attribute {field} of {id}");
                failed = true;
                continue;
            }
            match self.store().set_field(&collection, id, &field, value, false) {
                Ok(rep) if rep.matched > 0 => updated += 1,
                Ok(_) => failed = true,
                Err(e) => {
                    log::warn!("attribute patch {field} on {id} failed: {e}");
                    failed = true;
                }
            }
        }

        if updated > 0 && !failed {
            self.touch(&collection, id);
            Ok(self.no_content())
        } else {
            Err(BrokerError::BadRequest(format!("patch failed for {id}")))
        }
    }

    /// Replace (PUT): unsets every existing non-builtin, non-identity
    /// field, then upserts every payload key. The unset-then-set
    /// sequence is not atomic; concurrent writers can interleave.
    pub fn replace_entity(&self, id: &str, payload: BsonDocument) -> Response {
        match self.try_replace(id, payload) {
            Ok(resp) => resp,
            Err(err) => self.fail(err),
        }
    }

    fn try_replace(&self, id: &str, mut payload: BsonDocument) -> Result<Response, BrokerError> {
        strip_payload_identity(&mut payload);
        if payload.is_empty() {
            return Err(BrokerError::BadRequestPayload("no attributes in payload".into()));
        }
        let collection = self.config().entities_collection.clone();

        if let Some(existing) = self.find_by_id(id)? {
            for field in existing.keys() {
                if is_builtin_attr(field) || is_identity_field(field) || field.as_str() == INTERNAL_ID {
                    continue;
                }
                if let Err(e) = self.store().unset_field(&collection, id, field) {
                    log::warn!("replace unset {field} on {id} failed: {e}");
                }
            }
        }

        let mut updated = 0u64;
        for (field, value) in payload {
            match self.store().set_field(&collection, id, &field, value, true) {
                Ok(rep) if rep.matched > 0 || rep.modified > 0 => updated += 1,
                Ok(_) => {}
                Err(e) => log::warn!("replace set {field} on {id} failed: {e}"),
            }
        }

        if updated > 0 {
            self.touch(&collection, id);
            Ok(self.no_content())
        } else {
            Err(BrokerError::BadRequest(format!("replace failed for {id}")))
        }
    }

    /// Deletes an entity. The type must route to a known physical
    /// collection; a failed delete is a bad request, not a not-found.
    pub fn delete_entity(&self, entity_type: &str, id: &str) -> Response {
        match self.try_delete(entity_type, id) {
            Ok(resp) => resp,
            Err(err) => self.fail(err),
        }
    }

    fn try_delete(&self, entity_type: &str, id: &str) -> Result<Response, BrokerError> {
        let collection = self
            .config()
            .collection_for_type(entity_type)
            .ok_or_else(|| {
                BrokerError::BadRequest(format!("unknown entity type: {entity_type}"))
            })?
            .to_string();
        let report = self.store().delete_by_id(&collection, id).map_err(|e| {
            log::warn!("delete of {id} failed: {e}");
            BrokerError::BadRequest(format!("delete failed for {id}"))
        })?;
        if report.deleted > 0 {
            log::info!("entity {id} deleted OK");
            Ok(Response::new(204, json!({})))
        } else {
            log::info!("entity {id} delete FAILED");
            Err(BrokerError::BadRequest(format!("delete failed for {id}")))
        }
    }

    // --- shared plumbing ---

    fn find_by_id(&self, id: &str) -> Result<Option<BsonDocument>, BrokerError> {
        let filter = Filter::Cmp {
            path: "id".into(),
            op: CmpOp::Eq,
            value: Bson::String(id.to_string()),
        };
        let mut docs = self
            .store()
            .find(&self.config().entities_collection, &filter, &FindOptions::default())
            .map_err(|e| {
                log::warn!("lookup of {id} failed: {e}");
                BrokerError::BadRequest(format!("lookup failed for {id}"))
            })?;
        if docs.is_empty() { Ok(None) } else { Ok(Some(docs.remove(0))) }
    }

    /// Refreshes the modification timestamp after a successful mutation.
    fn touch(&self, collection: &str, id: &str) {
        let now = Bson::String(Utc::now().to_rfc3339());
        if let Err(e) = self.store().set_field(collection, id, "dateModified", now, false) {
            log::warn!("dateModified refresh on {id} failed: {e}");
        }
    }
}

fn strip_payload_identity(payload: &mut BsonDocument) {
    payload.remove("id");
    payload.remove("type");
}

fn parent_link(payload: &BsonDocument, attr: &str) -> Option<String> {
    let parent = payload.get_document(attr).ok()?;
    parent
        .get_str("entity")
        .or_else(|_| parent.get_str("value"))
        .ok()
        .map(str::to_string)
}
