// Services module

pub mod attachments;
pub mod firestore;
pub mod material_requests;
pub mod store;

pub use attachments::AttachmentStorage;
pub use firestore::FirestoreStore;
pub use material_requests::MaterialRequestService;
pub use store::{FieldOpsStore, MemoryStore, StoreError, UnitOfWork};
