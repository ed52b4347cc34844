//! HTTP API surface

mod health;
mod job_submit;
mod sse;

pub use health::health_routes;
pub use job_submit::job_routes;
pub use sse::event_stream;
