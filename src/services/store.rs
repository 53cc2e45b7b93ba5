// Persistence boundary for tasks, material requests and task messages
// Multi-row writes go through a UnitOfWork so they land atomically

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{MaterialRequest, MaterialRequestItem, TaskMessage, TaskRecord, UserRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict { id: String, expected: u64, actual: u64 },

    #[error("Item {item_id} references missing material request {request_id}")]
    MissingParent { item_id: String, request_id: String },
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// A request row to write, optionally guarded by the version it was read at
#[derive(Debug, Clone)]
pub struct RequestWrite {
    pub request: MaterialRequest,
    pub expected_version: Option<u64>,
}

/// Set of writes applied all-or-nothing by [`FieldOpsStore::commit`]
#[derive(Debug, Clone, Default)]
pub struct UnitOfWork {
    pub requests: Vec<RequestWrite>,
    pub upsert_items: Vec<MaterialRequestItem>,
    pub delete_items: Vec<String>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_request(mut self, request: MaterialRequest, expected_version: Option<u64>) -> Self {
        self.requests.push(RequestWrite {
            request,
            expected_version,
        });
        self
    }

    pub fn put_items(mut self, items: impl IntoIterator<Item = MaterialRequestItem>) -> Self {
        self.upsert_items.extend(items);
        self
    }

    pub fn delete_item(mut self, item_id: impl Into<String>) -> Self {
        self.delete_items.push(item_id.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.upsert_items.is_empty() && self.delete_items.is_empty()
    }
}

#[async_trait]
pub trait FieldOpsStore: Send + Sync {
    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError>;

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError>;

    async fn get_material_request(&self, id: &str) -> Result<Option<MaterialRequest>, StoreError>;

    /// Newest first
    async fn list_material_requests_by_project(
        &self,
        project_id: &str,
    ) -> Result<Vec<MaterialRequest>, StoreError>;

    /// Newest first
    async fn list_material_requests_by_task(
        &self,
        task_id: &str,
    ) -> Result<Vec<MaterialRequest>, StoreError>;

    /// Items of a request in creation order
    async fn get_request_items(
        &self,
        request_id: &str,
    ) -> Result<Vec<MaterialRequestItem>, StoreError>;

    async fn get_request_item(
        &self,
        item_id: &str,
    ) -> Result<Option<MaterialRequestItem>, StoreError>;

    /// Apply every write in `unit` or none of them
    async fn commit(&self, unit: UnitOfWork) -> Result<(), StoreError>;

    /// Oldest first
    async fn list_task_messages(&self, task_id: &str) -> Result<Vec<TaskMessage>, StoreError>;

    /// Insert `message` unless the task already holds a message with the same
    /// client key, in which case the stored copy is returned untouched
    async fn create_task_message(&self, message: &TaskMessage) -> Result<MessageInsert, StoreError>;
}

/// Outcome of [`FieldOpsStore::create_task_message`]
#[derive(Debug, Clone, PartialEq)]
pub enum MessageInsert {
    Created,
    Duplicate(TaskMessage),
}

#[derive(Default)]
struct MemoryState {
    tasks: HashMap<String, TaskRecord>,
    users: HashMap<String, UserRecord>,
    requests: HashMap<String, MaterialRequest>,
    /// Insertion order doubles as creation order
    items: Vec<MaterialRequestItem>,
    messages: Vec<TaskMessage>,
}

/// In-process store for local runs and tests
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_task(&self, task: TaskRecord) {
        self.state.write().await.tasks.insert(task.id.clone(), task);
    }

    pub async fn insert_user(&self, user: UserRecord) {
        self.state.write().await.users.insert(user.id.clone(), user);
    }

    pub async fn item_count(&self) -> usize {
        self.state.read().await.items.len()
    }
}

fn newest_first(mut requests: Vec<MaterialRequest>) -> Vec<MaterialRequest> {
    requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    requests
}

#[async_trait]
impl FieldOpsStore for MemoryStore {
    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.state.read().await.tasks.get(task_id).cloned())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.state.read().await.users.get(user_id).cloned())
    }

    async fn get_material_request(&self, id: &str) -> Result<Option<MaterialRequest>, StoreError> {
        Ok(self.state.read().await.requests.get(id).cloned())
    }

    async fn list_material_requests_by_project(
        &self,
        project_id: &str,
    ) -> Result<Vec<MaterialRequest>, StoreError> {
        let state = self.state.read().await;
        Ok(newest_first(
            state
                .requests
                .values()
                .filter(|r| r.project_id.as_deref() == Some(project_id))
                .cloned()
                .collect(),
        ))
    }

    async fn list_material_requests_by_task(
        &self,
        task_id: &str,
    ) -> Result<Vec<MaterialRequest>, StoreError> {
        let state = self.state.read().await;
        Ok(newest_first(
            state
                .requests
                .values()
                .filter(|r| r.task_id == task_id)
                .cloned()
                .collect(),
        ))
    }

    async fn get_request_items(
        &self,
        request_id: &str,
    ) -> Result<Vec<MaterialRequestItem>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .items
            .iter()
            .filter(|i| i.material_request_id == request_id)
            .cloned()
            .collect())
    }

    async fn get_request_item(
        &self,
        item_id: &str,
    ) -> Result<Option<MaterialRequestItem>, StoreError> {
        let state = self.state.read().await;
        Ok(state.items.iter().find(|i| i.id == item_id).cloned())
    }

    async fn commit(&self, unit: UnitOfWork) -> Result<(), StoreError> {
        let mut state = self.state.write().await;

        // Validate everything before touching state
        for write in &unit.requests {
            if let (Some(expected), Some(current)) =
                (write.expected_version, state.requests.get(&write.request.id))
            {
                if current.version != expected {
                    return Err(StoreError::VersionConflict {
                        id: write.request.id.clone(),
                        expected,
                        actual: current.version,
                    });
                }
            }
        }
        for item in &unit.upsert_items {
            let parent_known = state.requests.contains_key(&item.material_request_id)
                || unit
                    .requests
                    .iter()
                    .any(|w| w.request.id == item.material_request_id);
            if !parent_known {
                return Err(StoreError::MissingParent {
                    item_id: item.id.clone(),
                    request_id: item.material_request_id.clone(),
                });
            }
        }

        for write in unit.requests {
            state.requests.insert(write.request.id.clone(), write.request);
        }
        for item in unit.upsert_items {
            match state.items.iter_mut().find(|i| i.id == item.id) {
                Some(existing) => *existing = item,
                None => state.items.push(item),
            }
        }
        if !unit.delete_items.is_empty() {
            state.items.retain(|i| !unit.delete_items.contains(&i.id));
        }
        Ok(())
    }

    async fn list_task_messages(&self, task_id: &str) -> Result<Vec<TaskMessage>, StoreError> {
        let state = self.state.read().await;
        let mut messages: Vec<TaskMessage> = state
            .messages
            .iter()
            .filter(|m| m.task_id == task_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    async fn create_task_message(&self, message: &TaskMessage) -> Result<MessageInsert, StoreError> {
        let mut state = self.state.write().await;
        if let Some(key) = message.client_message_id.as_deref() {
            let existing = state.messages.iter().find(|m| {
                m.task_id == message.task_id && m.client_message_id.as_deref() == Some(key)
            });
            if let Some(existing) = existing {
                return Ok(MessageInsert::Duplicate(existing.clone()));
            }
        }
        state.messages.push(message.clone());
        Ok(MessageInsert::Created)
    }
}
