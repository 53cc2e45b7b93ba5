// Material request models
// Collections: material_requests/{id}, material_request_items/{item_id}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::lenient;

pub const DEFAULT_TITLE: &str = "Material Request";
pub const DEFAULT_URGENCY: &str = "medium";
pub const DEFAULT_UNIT: &str = "pcs";

/// Status shared by requests and their line items
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Issued,
    Purchased,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Issued => "issued",
            RequestStatus::Purchased => "purchased",
        }
    }

    /// Approval flow: pending -> {approved, rejected}, approved -> {issued, purchased}.
    /// Re-applying the current status is always allowed.
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        self == next
            || matches!(
                (self, next),
                (Pending, Approved) | (Pending, Rejected) | (Approved, Issued) | (Approved, Purchased)
            )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request for physical materials tied to a task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MaterialRequest {
    pub id: String,
    pub task_id: String,
    /// Denormalized from the task at creation time
    #[serde(default)]
    pub project_id: Option<String>,
    pub requested_by: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub urgency: String,
    #[serde(default)]
    pub expected_delivery_date: Option<String>,
    #[serde(default)]
    pub status: RequestStatus,
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default, with = "super::timestamp::option")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub total_estimated_cost: f64,
    /// Incremented on every committed update; used for optimistic concurrency
    #[serde(default = "initial_version")]
    pub version: u64,
    #[serde(with = "super::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "super::timestamp::option")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn initial_version() -> u64 {
    1
}

/// One line item of a material request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MaterialRequestItem {
    pub id: String,
    pub material_request_id: String,
    #[serde(default)]
    pub item_name: String,
    #[serde(default)]
    pub quantity_requested: f64,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(default)]
    pub specifications: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub quality_grade: Option<String>,
    #[serde(default)]
    pub estimated_unit_cost: Option<f64>,
    #[serde(default)]
    pub supplier: Option<String>,
    #[serde(default)]
    pub delivery_date: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: RequestStatus,
    #[serde(default)]
    pub quantity_approved: Option<f64>,
    #[serde(with = "super::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "super::timestamp::option")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_unit() -> String {
    DEFAULT_UNIT.to_string()
}

impl MaterialRequestItem {
    /// Approved quantity (or requested, when not yet approved) times unit cost
    pub fn estimated_cost(&self) -> f64 {
        self.quantity_approved.unwrap_or(self.quantity_requested)
            * self.estimated_unit_cost.unwrap_or(0.0)
    }
}

/// Sum of line costs; items without a unit cost contribute nothing
pub fn total_estimated_cost(items: &[MaterialRequestItem]) -> f64 {
    items.iter().map(MaterialRequestItem::estimated_cost).sum()
}

/// Request returned by the API: the row plus its items and display names
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialRequestDetail {
    #[serde(flatten)]
    pub request: MaterialRequest,
    pub items: Vec<MaterialRequestItem>,
    pub task_name: Option<String>,
    pub requester_name: Option<String>,
}

/// Item fields accepted on create (bulk or single add). Nothing is required.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItemInput {
    #[serde(default)]
    pub item_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub quantity_requested: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub specifications: Option<String>,
    /// Legacy name for `specifications`
    #[serde(default)]
    pub requirements: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub quality_grade: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub estimated_unit_cost: Option<f64>,
    #[serde(default)]
    pub supplier: Option<String>,
    #[serde(default)]
    pub delivery_date: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewItemInput {
    /// Build a pending item owned by `material_request_id`
    pub fn into_item(self, material_request_id: &str, now: DateTime<Utc>) -> MaterialRequestItem {
        MaterialRequestItem {
            id: uuid::Uuid::new_v4().to_string(),
            material_request_id: material_request_id.to_string(),
            item_name: self.item_name.unwrap_or_default(),
            quantity_requested: self.quantity_requested.unwrap_or(0.0),
            unit: self.unit.filter(|u| !u.trim().is_empty()).unwrap_or_else(default_unit),
            specifications: self.specifications.or(self.requirements),
            brand: self.brand,
            model: self.model,
            quality_grade: self.quality_grade,
            estimated_unit_cost: self.estimated_unit_cost,
            supplier: self.supplier,
            delivery_date: self.delivery_date,
            notes: self.notes,
            status: RequestStatus::Pending,
            quantity_approved: None,
            created_at: now,
            updated_at: None,
        }
    }
}

/// Request body for POST /api/material-requests
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMaterialRequestBody {
    #[serde(deserialize_with = "lenient::id")]
    pub task_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub urgency: Option<String>,
    #[serde(default)]
    pub expected_delivery_date: Option<String>,
    #[serde(default)]
    pub items: Option<Vec<NewItemInput>>,
    /// Legacy single-item payload: itemName, quantityRequested, unit, ...
    #[serde(flatten)]
    pub legacy_item: NewItemInput,
}

impl CreateMaterialRequestBody {
    /// Items to create: the `items` array when non-empty, otherwise the
    /// legacy flat fields when either `itemName` or `quantityRequested` is present.
    pub fn take_items(&mut self) -> Vec<NewItemInput> {
        match self.items.take() {
            Some(items) if !items.is_empty() => items,
            _ => {
                let legacy = std::mem::take(&mut self.legacy_item);
                if legacy.item_name.is_some() || legacy.quantity_requested.is_some() {
                    vec![legacy]
                } else {
                    vec![]
                }
            }
        }
    }
}

/// Per-item approval entry inside an update
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedItemPatch {
    #[serde(deserialize_with = "lenient::id")]
    pub id: String,
    #[serde(default)]
    pub status: Option<RequestStatus>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub quantity_approved: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub estimated_unit_cost: Option<f64>,
    #[serde(default)]
    pub supplier: Option<String>,
    #[serde(default)]
    pub delivery_date: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ApprovedItemPatch {
    pub fn apply(&self, item: &mut MaterialRequestItem, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            item.status = status;
        }
        if self.quantity_approved.is_some() {
            item.quantity_approved = self.quantity_approved;
        }
        if self.estimated_unit_cost.is_some() {
            item.estimated_unit_cost = self.estimated_unit_cost;
        }
        if let Some(supplier) = &self.supplier {
            item.supplier = Some(supplier.clone());
        }
        if let Some(date) = &self.delivery_date {
            item.delivery_date = Some(date.clone());
        }
        if let Some(notes) = &self.notes {
            item.notes = Some(notes.clone());
        }
        item.updated_at = Some(now);
    }
}

/// Request body for PATCH /api/material-requests/:id
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMaterialRequestBody {
    pub status: RequestStatus,
    #[serde(default)]
    pub approved_items: Option<Vec<ApprovedItemPatch>>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// When set, the update only applies if the stored version still matches
    #[serde(default)]
    pub expected_version: Option<u64>,
}

/// Request body for PUT /api/material-request-items/:id (any subset of fields)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateItemBody {
    #[serde(default)]
    pub item_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub quantity_requested: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub specifications: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub quality_grade: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub estimated_unit_cost: Option<f64>,
    #[serde(default)]
    pub supplier: Option<String>,
    #[serde(default)]
    pub delivery_date: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: Option<RequestStatus>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub quantity_approved: Option<f64>,
}

impl UpdateItemBody {
    pub fn apply(self, item: &mut MaterialRequestItem, now: DateTime<Utc>) {
        if let Some(v) = self.item_name {
            item.item_name = v;
        }
        if let Some(v) = self.quantity_requested {
            item.quantity_requested = v;
        }
        if let Some(v) = self.unit {
            item.unit = v;
        }
        if self.specifications.is_some() {
            item.specifications = self.specifications;
        }
        if self.brand.is_some() {
            item.brand = self.brand;
        }
        if self.model.is_some() {
            item.model = self.model;
        }
        if self.quality_grade.is_some() {
            item.quality_grade = self.quality_grade;
        }
        if self.estimated_unit_cost.is_some() {
            item.estimated_unit_cost = self.estimated_unit_cost;
        }
        if self.supplier.is_some() {
            item.supplier = self.supplier;
        }
        if self.delivery_date.is_some() {
            item.delivery_date = self.delivery_date;
        }
        if self.notes.is_some() {
            item.notes = self.notes;
        }
        if let Some(v) = self.status {
            item.status = v;
        }
        if self.quantity_approved.is_some() {
            item.quantity_approved = self.quantity_approved;
        }
        item.updated_at = Some(now);
    }
}

/// Response for delete operations
#[derive(Debug, Clone, Serialize)]
pub struct MaterialRequestStatusResponse {
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(requested: f64, approved: Option<f64>, unit_cost: Option<f64>) -> MaterialRequestItem {
        let mut item = NewItemInput {
            item_name: Some("Rebar".to_string()),
            quantity_requested: Some(requested),
            estimated_unit_cost: unit_cost,
            ..Default::default()
        }
        .into_item("req-1", Utc::now());
        item.quantity_approved = approved;
        item
    }

    #[test]
    fn test_total_cost_prefers_approved_quantity_and_skips_missing_cost() {
        let items = vec![item(10.0, None, Some(5.0)), item(3.0, Some(2.0), None)];
        assert_eq!(total_estimated_cost(&items), 50.0);
    }

    #[test]
    fn test_total_cost_of_no_items_is_zero() {
        assert_eq!(total_estimated_cost(&[]), 0.0);
    }

    #[test]
    fn test_status_transitions() {
        use RequestStatus::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Purchased));
        assert!(Rejected.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(Approved));
        assert!(!Approved.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Issued));
    }

    #[test]
    fn test_legacy_flat_item_is_used_without_items_array() {
        let mut body: CreateMaterialRequestBody = serde_json::from_value(serde_json::json!({
            "taskId": 42,
            "itemName": "Cement",
            "quantityRequested": "25"
        }))
        .unwrap();
        assert_eq!(body.task_id, "42");

        let items = body.take_items();
        assert_eq!(items.len(), 1);
        let created = items.into_iter().next().unwrap().into_item("req-1", Utc::now());
        assert_eq!(created.item_name, "Cement");
        assert_eq!(created.quantity_requested, 25.0);
        assert_eq!(created.unit, "pcs");
        assert_eq!(created.status, RequestStatus::Pending);
    }

    #[test]
    fn test_items_array_wins_over_legacy_fields() {
        let mut body: CreateMaterialRequestBody = serde_json::from_value(serde_json::json!({
            "taskId": "t-1",
            "itemName": "Ignored",
            "items": [
                {"itemName": "Sand", "quantityRequested": 2, "unit": "m3", "requirements": "washed"},
                {"itemName": "Gravel", "quantityRequested": 4, "unit": "m3"}
            ]
        }))
        .unwrap();

        let items = body.take_items();
        assert_eq!(items.len(), 2);
        let sand = items[0].clone().into_item("req-1", Utc::now());
        assert_eq!(sand.specifications.as_deref(), Some("washed"));
    }

    #[test]
    fn test_no_items_and_no_legacy_fields_yields_nothing() {
        let mut body: CreateMaterialRequestBody =
            serde_json::from_value(serde_json::json!({"taskId": "t-1", "items": []})).unwrap();
        assert!(body.take_items().is_empty());
    }
}
