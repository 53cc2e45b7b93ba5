// Firestore-backed store
// Uses the Firestore REST API with a service account (or the GCP metadata server)

pub mod codec;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::{MaterialRequest, MaterialRequestItem, TaskMessage, TaskRecord, UserRecord};
use crate::services::store::{FieldOpsStore, MessageInsert, StoreError, UnitOfWork};
use codec::{decode_document, encode_document};

pub const TASKS_COLLECTION: &str = "tasks";
pub const USERS_COLLECTION: &str = "users";
pub const MATERIAL_REQUESTS_COLLECTION: &str = "material_requests";
pub const MATERIAL_REQUEST_ITEMS_COLLECTION: &str = "material_request_items";
pub const TASK_MESSAGES_COLLECTION: &str = "task_messages";

/// Service account credentials from JSON file
#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountCredentials {
    client_email: String,
    private_key: String,
    token_uri: Option<String>,
}

/// JWT claims for the Google OAuth2 assertion grant
#[derive(Debug, Serialize)]
struct GoogleJwtClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

struct CachedToken {
    token: String,
    expires_at: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Firestore REST client implementing [`FieldOpsStore`]
pub struct FirestoreStore {
    client: Client,
    project_id: String,
    credentials: Option<ServiceAccountCredentials>,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
}

impl FirestoreStore {
    /// Create the store; `credentials_path` points at a service account JSON file
    pub async fn new(project_id: String, credentials_path: Option<&str>) -> Result<Self, StoreError> {
        let credentials = match credentials_path {
            Some(path) => Some(Self::load_credentials(path)?),
            None => {
                tracing::warn!("No service account credentials configured - relying on GCP metadata server");
                None
            }
        };

        let store = Self {
            client: Client::new(),
            project_id,
            credentials,
            cached_token: Arc::new(RwLock::new(None)),
        };

        if let Err(e) = store.access_token().await {
            tracing::warn!("Failed to get initial Firestore access token: {}", e);
        }

        Ok(store)
    }

    fn load_credentials(path: &str) -> Result<ServiceAccountCredentials, StoreError> {
        tracing::info!("Loading service account credentials from: {}", path);
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Backend(format!("Failed to read credentials file {}: {}", path, e)))?;
        let credentials: ServiceAccountCredentials = serde_json::from_str(&raw)?;
        tracing::info!("Loaded credentials for service account: {}", credentials.client_email);
        Ok(credentials)
    }

    /// Cached bearer token, refreshed when less than a minute remains
    async fn access_token(&self) -> Result<String, StoreError> {
        {
            let cache = self.cached_token.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.expires_at > Utc::now().timestamp() + 60 {
                    return Ok(cached.token.clone());
                }
            }
        }

        let token = match &self.credentials {
            Some(creds) => self.token_from_service_account(creds).await?,
            None => self.token_from_metadata_server().await?,
        };

        // Tokens live for an hour; refresh after 55 minutes
        *self.cached_token.write().await = Some(CachedToken {
            token: token.clone(),
            expires_at: Utc::now().timestamp() + 3300,
        });
        Ok(token)
    }

    async fn token_from_metadata_server(&self) -> Result<String, StoreError> {
        let response = self
            .client
            .get("http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token")
            .header("Metadata-Flavor", "Google")
            .timeout(std::time::Duration::from_secs(2))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Backend("Metadata server not available".to_string()));
        }
        Ok(response.json::<TokenResponse>().await?.access_token)
    }

    async fn token_from_service_account(
        &self,
        creds: &ServiceAccountCredentials,
    ) -> Result<String, StoreError> {
        let now = Utc::now().timestamp();
        let token_uri = creds
            .token_uri
            .as_deref()
            .unwrap_or("https://oauth2.googleapis.com/token");

        let claims = GoogleJwtClaims {
            iss: creds.client_email.clone(),
            scope: "https://www.googleapis.com/auth/datastore".to_string(),
            aud: token_uri.to_string(),
            iat: now,
            exp: now + 3600,
        };

        let key = EncodingKey::from_rsa_pem(creds.private_key.as_bytes())
            .map_err(|e| StoreError::Backend(format!("Failed to parse private key: {}", e)))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| StoreError::Backend(format!("Failed to encode JWT: {}", e)))?;

        let response = self
            .client
            .post(token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(StoreError::Backend(format!("Token exchange failed: {}", error_text)));
        }
        Ok(response.json::<TokenResponse>().await?.access_token)
    }

    /// Resource name prefix: projects/{p}/databases/(default)/documents
    fn documents_root(&self) -> String {
        format!("projects/{}/databases/(default)/documents", self.project_id)
    }

    fn base_url(&self) -> String {
        format!("https://firestore.googleapis.com/v1/{}", self.documents_root())
    }

    fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.documents_root(), collection, id)
    }

    async fn build_request(&self, method: Method, url: &str) -> Result<reqwest::RequestBuilder, StoreError> {
        let token = self.access_token().await?;
        Ok(self.client.request(method, url).bearer_auth(token))
    }

    /// GET a single document, optionally inside a transaction
    async fn get_document<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
        transaction: Option<&str>,
    ) -> Result<Option<T>, StoreError> {
        let mut url = format!("{}/{}/{}", self.base_url(), collection, urlencoding::encode(id));
        if let Some(tx) = transaction {
            url = format!("{}?transaction={}", url, urlencoding::encode(tx));
        }

        let response = self.build_request(Method::GET, &url).await?.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(StoreError::Backend(format!("Firestore get error: {}", error_text)));
        }

        let doc: Value = response.json().await?;
        decode_document(&doc).map(Some)
    }

    /// runQuery over a root collection with a single equality filter
    async fn query_equal<T: DeserializeOwned>(
        &self,
        collection: &str,
        field: &str,
        value: &str,
        order_by: &str,
        descending: bool,
    ) -> Result<Vec<T>, StoreError> {
        let structured_query = json!({
            "from": [{"collectionId": collection}],
            "where": {
                "fieldFilter": {
                    "field": {"fieldPath": field},
                    "op": "EQUAL",
                    "value": {"stringValue": value}
                }
            },
            "orderBy": [{
                "field": {"fieldPath": order_by},
                "direction": if descending { "DESCENDING" } else { "ASCENDING" }
            }]
        });
        let query = json!({"structuredQuery": structured_query});

        tracing::debug!("Firestore query on {}: {}={}", collection, field, value);

        let response = self
            .build_request(Method::POST, &format!("{}:runQuery", self.base_url()))
            .await?
            .json(&query)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            tracing::error!("Firestore query error: {}", error_text);
            return Err(StoreError::Backend(format!("Firestore query failed: {}", error_text)));
        }

        let results: Vec<Value> = response.json().await?;
        let docs = results
            .iter()
            .filter_map(|r| r.get("document"))
            .filter_map(|d| match decode_document(d) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    tracing::warn!("Failed to parse {} document: {}", collection, e);
                    None
                }
            })
            .collect();
        Ok(docs)
    }

    async fn begin_transaction(&self) -> Result<String, StoreError> {
        let response = self
            .build_request(Method::POST, &format!("{}:beginTransaction", self.base_url()))
            .await?
            .json(&json!({}))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(StoreError::Backend(format!("Failed to begin transaction: {}", error_text)));
        }

        let body: Value = response.json().await?;
        body.get("transaction")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| StoreError::Backend("beginTransaction returned no id".to_string()))
    }

    async fn rollback(&self, transaction: &str) {
        let result = match self
            .build_request(Method::POST, &format!("{}:rollback", self.base_url()))
            .await
        {
            Ok(req) => req.json(&json!({"transaction": transaction})).send().await.map(|_| ()),
            Err(e) => {
                tracing::warn!("Failed to build rollback request: {}", e);
                return;
            }
        };
        if let Err(e) = result {
            tracing::warn!("Firestore rollback failed: {}", e);
        }
    }

    /// Reads that must hold for the commit to go through
    async fn check_preconditions(&self, unit: &UnitOfWork, transaction: &str) -> Result<(), StoreError> {
        for write in &unit.requests {
            let Some(expected) = write.expected_version else {
                continue;
            };
            let current: Option<MaterialRequest> = self
                .get_document(MATERIAL_REQUESTS_COLLECTION, &write.request.id, Some(transaction))
                .await?;
            if let Some(current) = current {
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
            if unit.requests.iter().any(|w| w.request.id == item.material_request_id) {
                continue;
            }
            let parent: Option<MaterialRequest> = self
                .get_document(MATERIAL_REQUESTS_COLLECTION, &item.material_request_id, Some(transaction))
                .await?;
            if parent.is_none() {
                return Err(StoreError::MissingParent {
                    item_id: item.id.clone(),
                    request_id: item.material_request_id.clone(),
                });
            }
        }
        Ok(())
    }

    fn build_writes(&self, unit: &UnitOfWork) -> Result<Vec<Value>, StoreError> {
        let mut writes = Vec::with_capacity(
            unit.requests.len() + unit.upsert_items.len() + unit.delete_items.len(),
        );

        for write in &unit.requests {
            let mut doc = encode_document(&write.request)?;
            doc["name"] = json!(self.document_name(MATERIAL_REQUESTS_COLLECTION, &write.request.id));
            writes.push(json!({"update": doc}));
        }
        for item in &unit.upsert_items {
            let mut doc = encode_document(item)?;
            doc["name"] = json!(self.document_name(MATERIAL_REQUEST_ITEMS_COLLECTION, &item.id));
            writes.push(json!({"update": doc}));
        }
        for item_id in &unit.delete_items {
            writes.push(json!({
                "delete": self.document_name(MATERIAL_REQUEST_ITEMS_COLLECTION, item_id)
            }));
        }
        Ok(writes)
    }
}

#[async_trait]
impl FieldOpsStore for FirestoreStore {
    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        self.get_document(TASKS_COLLECTION, task_id, None).await
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError> {
        self.get_document(USERS_COLLECTION, user_id, None).await
    }

    async fn get_material_request(&self, id: &str) -> Result<Option<MaterialRequest>, StoreError> {
        self.get_document(MATERIAL_REQUESTS_COLLECTION, id, None).await
    }

    async fn list_material_requests_by_project(
        &self,
        project_id: &str,
    ) -> Result<Vec<MaterialRequest>, StoreError> {
        self.query_equal(MATERIAL_REQUESTS_COLLECTION, "projectId", project_id, "createdAt", true)
            .await
    }

    async fn list_material_requests_by_task(
        &self,
        task_id: &str,
    ) -> Result<Vec<MaterialRequest>, StoreError> {
        self.query_equal(MATERIAL_REQUESTS_COLLECTION, "taskId", task_id, "createdAt", true)
            .await
    }

    async fn get_request_items(
        &self,
        request_id: &str,
    ) -> Result<Vec<MaterialRequestItem>, StoreError> {
        self.query_equal(
            MATERIAL_REQUEST_ITEMS_COLLECTION,
            "materialRequestId",
            request_id,
            "createdAt",
            false,
        )
        .await
    }

    async fn get_request_item(
        &self,
        item_id: &str,
    ) -> Result<Option<MaterialRequestItem>, StoreError> {
        self.get_document(MATERIAL_REQUEST_ITEMS_COLLECTION, item_id, None).await
    }

    async fn commit(&self, unit: UnitOfWork) -> Result<(), StoreError> {
        if unit.is_empty() {
            return Ok(());
        }

        let transaction = self.begin_transaction().await?;

        let writes = match self.check_preconditions(&unit, &transaction).await {
            Ok(()) => self.build_writes(&unit),
            Err(e) => Err(e),
        };
        let writes = match writes {
            Ok(w) => w,
            Err(e) => {
                self.rollback(&transaction).await;
                return Err(e);
            }
        };

        let response = self
            .build_request(Method::POST, &format!("{}:commit", self.base_url()))
            .await?
            .json(&json!({"writes": writes, "transaction": transaction}))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            tracing::error!("Firestore commit error: {}", error_text);
            return Err(StoreError::Backend(format!("Firestore commit failed: {}", error_text)));
        }

        tracing::info!(
            "Committed {} request(s), {} item upsert(s), {} item delete(s)",
            unit.requests.len(),
            unit.upsert_items.len(),
            unit.delete_items.len()
        );
        Ok(())
    }

    async fn list_task_messages(&self, task_id: &str) -> Result<Vec<TaskMessage>, StoreError> {
        self.query_equal(TASK_MESSAGES_COLLECTION, "taskId", task_id, "createdAt", false)
            .await
    }

    async fn create_task_message(&self, message: &TaskMessage) -> Result<MessageInsert, StoreError> {
        let url = format!(
            "{}/{}?documentId={}",
            self.base_url(),
            TASK_MESSAGES_COLLECTION,
            urlencoding::encode(&message.id)
        );

        let response = self
            .build_request(Method::POST, &url)
            .await?
            .json(&encode_document(message)?)
            .send()
            .await?;

        // ALREADY_EXISTS: the id derives from the client key, so this is a retried send
        if response.status() == StatusCode::CONFLICT {
            let existing: Option<TaskMessage> = self
                .get_document(TASK_MESSAGES_COLLECTION, &message.id, None)
                .await?;
            return match existing {
                Some(existing) => {
                    tracing::info!("Task message {} already stored on task {}", message.id, message.task_id);
                    Ok(MessageInsert::Duplicate(existing))
                }
                None => Err(StoreError::Backend(format!(
                    "Firestore reported task message {} as existing but it could not be read",
                    message.id
                ))),
            };
        }

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(StoreError::Backend(format!("Firestore create error: {}", error_text)));
        }

        tracing::info!("Created task message {} on task {}", message.id, message.task_id);
        Ok(MessageInsert::Created)
    }
}
