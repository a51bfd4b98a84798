//! Transport-facing API surface and process hooks.

pub mod api;
#[cfg(feature = "tokio-runtime")]
pub mod signal;

pub use api::{
    build_join_request, submit_json, ActiveListResponse, Health, JoinRequestBody, SubmitResponse,
    SubmitStatus, TerminateAllResponse,
};
#[cfg(feature = "tokio-runtime")]
pub use signal::shutdown_on_ctrl_c;
