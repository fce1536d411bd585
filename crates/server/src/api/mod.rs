pub mod checkin;
pub mod error;
pub mod feeds;
pub mod handlers;
pub mod middleware;
pub mod pipelines;
pub mod routes;
pub mod semaphore;

pub use error::{ApiError, ErrorResponse};
pub use routes::create_router;
