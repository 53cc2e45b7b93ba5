// Material request workflow: creation with line items, bulk approval, item edits
// Every mutation recomputes totalEstimatedCost and commits as one unit of work

use chrono::Utc;
use futures::future::try_join_all;
use std::sync::Arc;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{
    total_estimated_cost, CreateMaterialRequestBody, MaterialRequest, MaterialRequestDetail,
    MaterialRequestItem, NewItemInput, RequestStatus, UpdateItemBody, UpdateMaterialRequestBody,
};
use crate::models::material_request::{DEFAULT_TITLE, DEFAULT_URGENCY};
use crate::services::store::{FieldOpsStore, StoreError, UnitOfWork};

pub struct MaterialRequestService {
    store: Arc<dyn FieldOpsStore>,
    /// Reject out-of-order status changes instead of only logging them
    enforce_transitions: bool,
}

impl MaterialRequestService {
    pub fn new(store: Arc<dyn FieldOpsStore>, enforce_transitions: bool) -> Self {
        Self {
            store,
            enforce_transitions,
        }
    }

    /// Create a pending request for a task, with its items, and return it re-read
    pub async fn create(
        &self,
        user: &AuthUser,
        mut body: CreateMaterialRequestBody,
    ) -> Result<MaterialRequestDetail, ApiError> {
        let task = self
            .store
            .get_task(&body.task_id)
            .await
            .map_err(|e| ApiError::server("Failed to create material request", e))?
            .ok_or_else(|| ApiError::not_found("Task"))?;

        let now = Utc::now();
        let items_input = body.take_items();

        let mut request = MaterialRequest {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task.id.clone(),
            project_id: task.project_id.clone(),
            requested_by: user.uid.clone(),
            title: non_blank(body.title).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            description: body.description,
            urgency: non_blank(body.urgency).unwrap_or_else(|| DEFAULT_URGENCY.to_string()),
            expected_delivery_date: body.expected_delivery_date,
            status: RequestStatus::Pending,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            notes: None,
            total_estimated_cost: 0.0,
            version: 1,
            created_at: now,
            updated_at: None,
        };

        let items: Vec<MaterialRequestItem> = items_input
            .into_iter()
            .map(|input| input.into_item(&request.id, now))
            .collect();
        if items.is_empty() {
            tracing::warn!("Material request {} created without items", request.id);
        }
        request.total_estimated_cost = total_estimated_cost(&items);

        tracing::info!(
            "Creating material request {} for task {} with {} item(s)",
            request.id,
            task.id,
            items.len()
        );

        let request_id = request.id.clone();
        self.store
            .commit(UnitOfWork::new().put_request(request, None).put_items(items))
            .await
            .map_err(|e| ApiError::from_store("Failed to create material request", e))?;

        self.get(&request_id).await
    }

    /// Single request with items, task name and requester name
    pub async fn get(&self, request_id: &str) -> Result<MaterialRequestDetail, ApiError> {
        let request = self
            .store
            .get_material_request(request_id)
            .await
            .map_err(|e| ApiError::server("Failed to fetch material request", e))?
            .ok_or_else(|| ApiError::not_found("Material request"))?;

        self.detail(request)
            .await
            .map_err(|e| ApiError::server("Failed to fetch material request", e))
    }

    pub async fn list_by_project(&self, project_id: &str) -> Result<Vec<MaterialRequestDetail>, ApiError> {
        let requests = self
            .store
            .list_material_requests_by_project(project_id)
            .await
            .map_err(|e| ApiError::server("Failed to fetch material requests", e))?;
        self.details(requests).await
    }

    /// Requests of a task; a task without requests yields an empty list
    pub async fn list_by_task(&self, task_id: &str) -> Result<Vec<MaterialRequestDetail>, ApiError> {
        let requests = self
            .store
            .list_material_requests_by_task(task_id)
            .await
            .map_err(|e| ApiError::server("Failed to fetch material requests", e))?;
        self.details(requests).await
    }

    /// Approver update: overwrite the decision fields, patch the listed items,
    /// recompute the total, and commit all of it together.
    pub async fn update(
        &self,
        user: &AuthUser,
        request_id: &str,
        body: UpdateMaterialRequestBody,
    ) -> Result<MaterialRequestDetail, ApiError> {
        let mut request = self
            .store
            .get_material_request(request_id)
            .await
            .map_err(|e| ApiError::server("Failed to update material request", e))?
            .ok_or_else(|| ApiError::not_found("Material request"))?;

        if let Some(expected) = body.expected_version {
            if expected != request.version {
                return Err(ApiError::Conflict {
                    id: request.id.clone(),
                    expected,
                    actual: request.version,
                });
            }
        }

        if !request.status.can_transition_to(body.status) {
            if self.enforce_transitions {
                return Err(ApiError::InvalidTransition {
                    from: request.status,
                    to: body.status,
                });
            }
            tracing::warn!(
                "Material request {} moved from {} to {} outside the approval flow",
                request.id,
                request.status,
                body.status
            );
        }

        let now = Utc::now();
        let mut items = self
            .store
            .get_request_items(request_id)
            .await
            .map_err(|e| ApiError::server("Failed to update material request", e))?;

        let mut touched: Vec<usize> = Vec::new();
        for patch in body.approved_items.iter().flatten() {
            match items.iter().position(|i| i.id == patch.id) {
                Some(idx) => {
                    patch.apply(&mut items[idx], now);
                    if !touched.contains(&idx) {
                        touched.push(idx);
                    }
                }
                None => tracing::warn!(
                    "Skipping approval for item {} - not part of material request {}",
                    patch.id,
                    request_id
                ),
            }
        }

        let read_version = request.version;
        request.status = body.status;
        request.approved_by = Some(user.uid.clone());
        request.approved_at = Some(now);
        request.rejection_reason = body.rejection_reason;
        request.notes = body.notes;
        request.total_estimated_cost = total_estimated_cost(&items);
        request.version = read_version + 1;
        request.updated_at = Some(now);

        tracing::info!(
            "Updating material request {} to {} by {} ({} item(s) patched, total {:.2})",
            request.id,
            request.status,
            user.uid,
            touched.len(),
            request.total_estimated_cost
        );

        let changed_items = touched.into_iter().map(|idx| items[idx].clone());
        self.store
            .commit(
                UnitOfWork::new()
                    .put_request(request, Some(read_version))
                    .put_items(changed_items),
            )
            .await
            .map_err(|e| ApiError::from_store("Failed to update material request", e))?;

        self.get(request_id).await
    }

    /// Append a pending item; fields are taken as given
    pub async fn add_item(
        &self,
        request_id: &str,
        input: NewItemInput,
    ) -> Result<MaterialRequestItem, ApiError> {
        let mut request = self
            .store
            .get_material_request(request_id)
            .await
            .map_err(|e| ApiError::server("Failed to add item", e))?
            .ok_or_else(|| ApiError::not_found("Material request"))?;

        let now = Utc::now();
        let item = input.into_item(request_id, now);

        let mut items = self
            .store
            .get_request_items(request_id)
            .await
            .map_err(|e| ApiError::server("Failed to add item", e))?;
        items.push(item.clone());

        self.commit_with_total(&mut request, &items, UnitOfWork::new().put_items(vec![item.clone()]))
            .await
            .map_err(|e| ApiError::from_store("Failed to add item", e))?;

        tracing::info!("Added item {} to material request {}", item.id, request_id);
        Ok(item)
    }

    /// Unrestricted partial update of one item
    pub async fn update_item(
        &self,
        item_id: &str,
        body: UpdateItemBody,
    ) -> Result<MaterialRequestItem, ApiError> {
        let mut item = self
            .store
            .get_request_item(item_id)
            .await
            .map_err(|e| ApiError::server("Failed to update item", e))?
            .ok_or_else(|| ApiError::not_found("Item"))?;

        body.apply(&mut item, Utc::now());
        let request_id = item.material_request_id.clone();
        self.commit_item_change(&request_id, Some(item.clone()), None)
            .await
            .map_err(|e| ApiError::from_store("Failed to update item", e))?;

        tracing::info!("Updated item {}", item_id);
        Ok(item)
    }

    /// Delete one item regardless of the owning request's status
    pub async fn delete_item(&self, item_id: &str) -> Result<(), ApiError> {
        let item = self
            .store
            .get_request_item(item_id)
            .await
            .map_err(|e| ApiError::server("Failed to delete item", e))?
            .ok_or_else(|| ApiError::not_found("Item"))?;

        self.commit_item_change(&item.material_request_id, None, Some(item_id))
            .await
            .map_err(|e| ApiError::from_store("Failed to delete item", e))?;

        tracing::info!("Deleted item {} from material request {}", item_id, item.material_request_id);
        Ok(())
    }

    /// Commit an item upsert or delete together with the parent's recomputed total
    async fn commit_item_change(
        &self,
        request_id: &str,
        upsert: Option<MaterialRequestItem>,
        delete: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut items = self.store.get_request_items(request_id).await?;
        if let Some(changed) = &upsert {
            match items.iter_mut().find(|i| i.id == changed.id) {
                Some(slot) => *slot = changed.clone(),
                None => items.push(changed.clone()),
            }
        }
        if let Some(id) = delete {
            items.retain(|i| i.id != id);
        }

        let mut unit = UnitOfWork::new().put_items(upsert);
        if let Some(id) = delete {
            unit = unit.delete_item(id);
        }

        match self.store.get_material_request(request_id).await? {
            Some(mut request) => self.commit_with_total(&mut request, &items, unit).await,
            None => {
                // Orphaned item: nothing to recompute
                tracing::warn!("Item change on missing material request {}", request_id);
                self.store.commit(unit).await
            }
        }
    }

    async fn commit_with_total(
        &self,
        request: &mut MaterialRequest,
        items: &[MaterialRequestItem],
        unit: UnitOfWork,
    ) -> Result<(), StoreError> {
        let read_version = request.version;
        request.total_estimated_cost = total_estimated_cost(items);
        request.version = read_version + 1;
        request.updated_at = Some(Utc::now());
        self.store
            .commit(unit.put_request(request.clone(), Some(read_version)))
            .await
    }

    async fn detail(
        &self,
        request: MaterialRequest,
    ) -> Result<MaterialRequestDetail, StoreError> {
        let items = self.store.get_request_items(&request.id).await?;
        let task_name = self.store.get_task(&request.task_id).await?.map(|t| t.name);
        let requester_name = self.store.get_user(&request.requested_by).await?.map(|u| u.name);

        Ok(MaterialRequestDetail {
            request,
            items,
            task_name,
            requester_name,
        })
    }

    async fn details(&self, requests: Vec<MaterialRequest>) -> Result<Vec<MaterialRequestDetail>, ApiError> {
        try_join_all(requests.into_iter().map(|r| self.detail(r)))
            .await
            .map_err(|e| ApiError::server("Failed to fetch material requests", e))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApprovedItemPatch, TaskRecord, UserRecord};
    use crate::services::store::MemoryStore;

    fn approver() -> AuthUser {
        AuthUser {
            uid: "u-approver".to_string(),
            name: "Site Manager".to_string(),
        }
    }

    fn requester() -> AuthUser {
        AuthUser {
            uid: "u-foreman".to_string(),
            name: "Foreman".to_string(),
        }
    }

    async fn setup(enforce: bool) -> (Arc<MemoryStore>, MaterialRequestService) {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_task(TaskRecord {
                id: "task-1".to_string(),
                name: "Pour slab B2".to_string(),
                project_id: Some("proj-9".to_string()),
                created_by: Some("u-approver".to_string()),
                assigned_user_ids: vec!["u-foreman".to_string()],
            })
            .await;
        store
            .insert_user(UserRecord {
                id: "u-foreman".to_string(),
                name: "Foreman".to_string(),
            })
            .await;
        let service = MaterialRequestService::new(store.clone(), enforce);
        (store, service)
    }

    fn create_body(value: serde_json::Value) -> CreateMaterialRequestBody {
        serde_json::from_value(value).unwrap()
    }

    fn update_body(value: serde_json::Value) -> UpdateMaterialRequestBody {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_create_applies_defaults_and_denormalizes() {
        let (_, service) = setup(false).await;
        let created = service
            .create(
                &requester(),
                create_body(serde_json::json!({
                    "taskId": "task-1",
                    "items": [
                        {"itemName": "Cement", "quantityRequested": 10, "unit": "bags", "estimatedUnitCost": 5},
                        {"itemName": "Sand", "quantityRequested": "2", "unit": "m3"}
                    ]
                })),
            )
            .await
            .unwrap();

        assert_eq!(created.request.title, "Material Request");
        assert_eq!(created.request.urgency, "medium");
        assert_eq!(created.request.status, RequestStatus::Pending);
        assert_eq!(created.request.project_id.as_deref(), Some("proj-9"));
        assert_eq!(created.request.requested_by, "u-foreman");
        assert_eq!(created.items.len(), 2);
        assert!(created.items.iter().all(|i| i.status == RequestStatus::Pending));
        assert_eq!(created.request.total_estimated_cost, 50.0);
        assert_eq!(created.task_name.as_deref(), Some("Pour slab B2"));
        assert_eq!(created.requester_name.as_deref(), Some("Foreman"));
    }

    #[tokio::test]
    async fn test_create_on_missing_task_is_not_found() {
        let (store, service) = setup(false).await;
        let err = service
            .create(&requester(), create_body(serde_json::json!({"taskId": "nope", "items": [{"itemName": "x"}]})))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert_eq!(store.item_count().await, 0);
    }

    #[tokio::test]
    async fn test_create_legacy_single_item() {
        let (store, service) = setup(false).await;
        let created = service
            .create(
                &requester(),
                create_body(serde_json::json!({
                    "taskId": "task-1",
                    "itemName": "Cement",
                    "quantityRequested": "25"
                })),
            )
            .await
            .unwrap();

        assert_eq!(store.item_count().await, 1);
        assert_eq!(created.items[0].item_name, "Cement");
        assert_eq!(created.items[0].quantity_requested, 25.0);
        assert_eq!(created.items[0].unit, "pcs");
    }

    #[tokio::test]
    async fn test_create_without_any_items_still_succeeds() {
        let (_, service) = setup(false).await;
        let created = service
            .create(&requester(), create_body(serde_json::json!({"taskId": "task-1", "title": "Formwork"})))
            .await
            .unwrap();
        assert!(created.items.is_empty());
        assert_eq!(created.request.title, "Formwork");
        assert_eq!(created.request.total_estimated_cost, 0.0);
    }

    #[tokio::test]
    async fn test_update_partial_approval_recomputes_cost() {
        let (_, service) = setup(false).await;
        let created = service
            .create(
                &requester(),
                create_body(serde_json::json!({
                    "taskId": "task-1",
                    "items": [
                        {"itemName": "Cement", "quantityRequested": 10, "estimatedUnitCost": 5},
                        {"itemName": "Rebar", "quantityRequested": 3},
                        {"itemName": "Mesh", "quantityRequested": 4, "estimatedUnitCost": 1}
                    ]
                })),
            )
            .await
            .unwrap();
        let rebar_id = created.items[1].id.clone();
        let mesh_before = created.items[2].clone();

        let updated = service
            .update(
                &approver(),
                &created.request.id,
                update_body(serde_json::json!({
                    "status": "approved",
                    "approvedItems": [
                        {"id": rebar_id, "status": "approved", "quantityApproved": 2}
                    ],
                    "notes": "deliver before Friday"
                })),
            )
            .await
            .unwrap();

        assert_eq!(updated.request.status, RequestStatus::Approved);
        assert_eq!(updated.request.approved_by.as_deref(), Some("u-approver"));
        assert!(updated.request.approved_at.is_some());
        assert_eq!(updated.request.notes.as_deref(), Some("deliver before Friday"));
        // 10*5 + 2*0 + 4*1
        assert_eq!(updated.request.total_estimated_cost, 54.0);
        assert_eq!(updated.request.version, 2);

        let rebar = updated.items.iter().find(|i| i.id == rebar_id).unwrap();
        assert_eq!(rebar.status, RequestStatus::Approved);
        assert_eq!(rebar.quantity_approved, Some(2.0));
        let mesh = updated.items.iter().find(|i| i.id == mesh_before.id).unwrap();
        assert_eq!(mesh, &mesh_before);
    }

    #[tokio::test]
    async fn test_update_missing_request_creates_nothing() {
        let (store, service) = setup(false).await;
        let err = service
            .update(
                &approver(),
                "missing",
                UpdateMaterialRequestBody {
                    status: RequestStatus::Approved,
                    approved_items: Some(vec![ApprovedItemPatch {
                        id: "i1".to_string(),
                        status: Some(RequestStatus::Approved),
                        quantity_approved: Some(1.0),
                        estimated_unit_cost: None,
                        supplier: None,
                        delivery_date: None,
                        notes: None,
                    }]),
                    rejection_reason: None,
                    notes: None,
                    expected_version: None,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::NotFound(_)));
        assert_eq!(store.item_count().await, 0);
    }

    #[tokio::test]
    async fn test_out_of_order_transition_logged_or_rejected() {
        let (_, lenient) = setup(false).await;
        let created = lenient
            .create(&requester(), create_body(serde_json::json!({"taskId": "task-1"})))
            .await
            .unwrap();
        lenient
            .update(&approver(), &created.request.id, update_body(serde_json::json!({"status": "rejected"})))
            .await
            .unwrap();
        let reopened = lenient
            .update(&approver(), &created.request.id, update_body(serde_json::json!({"status": "approved"})))
            .await
            .unwrap();
        assert_eq!(reopened.request.status, RequestStatus::Approved);

        let (_, strict) = setup(true).await;
        let created = strict
            .create(&requester(), create_body(serde_json::json!({"taskId": "task-1"})))
            .await
            .unwrap();
        let err = strict
            .update(&approver(), &created.request.id, update_body(serde_json::json!({"status": "issued"})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::InvalidTransition {
                from: RequestStatus::Pending,
                to: RequestStatus::Issued
            }
        ));
    }

    #[tokio::test]
    async fn test_stale_expected_version_conflicts() {
        let (_, service) = setup(false).await;
        let created = service
            .create(&requester(), create_body(serde_json::json!({"taskId": "task-1"})))
            .await
            .unwrap();
        service
            .update(&approver(), &created.request.id, update_body(serde_json::json!({"status": "approved", "expectedVersion": 1})))
            .await
            .unwrap();

        let err = service
            .update(&approver(), &created.request.id, update_body(serde_json::json!({"status": "rejected", "expectedVersion": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict { expected: 1, actual: 2, .. }));
    }

    #[tokio::test]
    async fn test_item_mutations_keep_total_in_sync() {
        let (_, service) = setup(false).await;
        let created = service
            .create(
                &requester(),
                create_body(serde_json::json!({
                    "taskId": "task-1",
                    "items": [{"itemName": "Cement", "quantityRequested": 10, "estimatedUnitCost": 5}]
                })),
            )
            .await
            .unwrap();
        let request_id = created.request.id.clone();

        let added = service
            .add_item(
                &request_id,
                serde_json::from_value(serde_json::json!({"itemName": "Tiles", "quantityRequested": 20, "estimatedUnitCost": 2})).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(added.status, RequestStatus::Pending);
        assert_eq!(service.get(&request_id).await.unwrap().request.total_estimated_cost, 90.0);

        let updated = service
            .update_item(
                &added.id,
                serde_json::from_value(serde_json::json!({"quantityApproved": 5, "supplier": "TileCo"})).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(updated.supplier.as_deref(), Some("TileCo"));
        assert_eq!(service.get(&request_id).await.unwrap().request.total_estimated_cost, 60.0);

        service.delete_item(&added.id).await.unwrap();
        let after = service.get(&request_id).await.unwrap();
        assert_eq!(after.items.len(), 1);
        assert_eq!(after.request.total_estimated_cost, 50.0);
    }

    #[tokio::test]
    async fn test_item_mutations_on_missing_targets() {
        let (_, service) = setup(false).await;
        assert!(matches!(
            service.add_item("missing", NewItemInput::default()).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            service.update_item("missing", UpdateItemBody::default()).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(service.delete_item("missing").await, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_by_project_and_task() {
        let (_, service) = setup(false).await;
        service
            .create(&requester(), create_body(serde_json::json!({"taskId": "task-1", "title": "A"})))
            .await
            .unwrap();
        service
            .create(&requester(), create_body(serde_json::json!({"taskId": "task-1", "title": "B"})))
            .await
            .unwrap();

        assert_eq!(service.list_by_project("proj-9").await.unwrap().len(), 2);
        assert_eq!(service.list_by_task("task-1").await.unwrap().len(), 2);
        assert!(service.list_by_task("task-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_approved_items_from_another_request_are_skipped() {
        let (_, service) = setup(false).await;
        let first = service
            .create(
                &requester(),
                create_body(serde_json::json!({
                    "taskId": "task-1",
                    "items": [{"itemName": "Cement", "quantityRequested": 10, "estimatedUnitCost": 5}]
                })),
            )
            .await
            .unwrap();
        let second = service
            .create(
                &requester(),
                create_body(serde_json::json!({
                    "taskId": "task-1",
                    "items": [{"itemName": "Rebar", "quantityRequested": 3, "estimatedUnitCost": 20}]
                })),
            )
            .await
            .unwrap();
        let foreign = second.items[0].clone();

        let updated = service
            .update(
                &approver(),
                &first.request.id,
                update_body(serde_json::json!({
                    "status": "approved",
                    "approvedItems": [
                        {"id": foreign.id, "status": "rejected", "quantityApproved": 1, "estimatedUnitCost": 999}
                    ]
                })),
            )
            .await
            .unwrap();

        assert_eq!(updated.request.status, RequestStatus::Approved);
        assert_eq!(updated.request.total_estimated_cost, 50.0);
        assert_eq!(updated.items.len(), 1);
        assert_eq!(updated.items[0].quantity_approved, None);

        let untouched = service.get(&second.request.id).await.unwrap();
        assert_eq!(untouched.items[0], foreign);
        assert_eq!(untouched.request.total_estimated_cost, 60.0);
        assert_eq!(untouched.request.version, second.request.version);
    }
}
