pub mod auth;
pub mod generation_task;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

// Re-export the handlers the binary wires into the router.
pub use middleware::require_auth;
pub use rest::{
    archive_subject_handler, clear_draft_handler, create_subject_handler, get_draft_handler,
    get_subject_handler, update_subject_handler,
};
pub use ws_handler::ws_handler;
