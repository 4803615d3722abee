//! HTTP API handlers for folio-ingest
//!
//! REST for projects, manuscripts and dispatch; worker callbacks; SSE for
//! progress observers.

pub mod callbacks;
pub mod health;
pub mod projects;
pub mod sse;

pub use callbacks::callback_routes;
pub use health::health_routes;
pub use projects::project_routes;
pub use sse::event_routes;
