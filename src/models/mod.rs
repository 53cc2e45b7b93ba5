// Models module

pub mod lenient;
pub mod material_request;
pub mod task;
pub mod task_message;
pub mod timestamp;

pub use material_request::{
    total_estimated_cost, ApprovedItemPatch, CreateMaterialRequestBody, MaterialRequest,
    MaterialRequestDetail, MaterialRequestItem, MaterialRequestStatusResponse, NewItemInput,
    RequestStatus, UpdateItemBody, UpdateMaterialRequestBody,
};
pub use task::{TaskRecord, UserRecord};
pub use task_message::{task_message_id, SenderRef, StoredAttachment, TaskMessage};
