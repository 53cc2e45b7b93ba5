// Routes module

pub mod extract;
pub mod health;
pub mod material_requests;
pub mod task_messages;

pub use extract::ApiJson;
pub use health::health_routes;
pub use material_requests::material_requests_routes;
pub use task_messages::task_messages_routes;
