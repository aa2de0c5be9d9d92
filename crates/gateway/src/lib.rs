pub mod api;
pub mod error;
pub mod hub;
pub mod state;

pub use api::router;
pub use error::{ApiError, ErrorCode};
pub use hub::{HubEvent, HubHandle, Topic, spawn_hub};
pub use state::AppState;
