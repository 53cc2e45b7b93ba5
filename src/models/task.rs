// Task and user records read by the material request and task chat services
// Collections: tasks/{id}, users/{id}

use serde::{Deserialize, Serialize};

use super::lenient;

/// Task as stored by the task management side of the app
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    #[serde(deserialize_with = "lenient::id")]
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub project_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub created_by: Option<String>,
    #[serde(default, deserialize_with = "lenient::id_list")]
    pub assigned_user_ids: Vec<String>,
}

/// Minimal user profile used for display names
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(deserialize_with = "lenient::id")]
    pub id: String,
    pub name: String,
}
