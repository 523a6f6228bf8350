pub mod routes;
pub mod server;
pub mod types;

pub use routes::{ApiError, AppState};
pub use server::{router, ApiServer};
pub use types::{CronResponse, ErrorResponse, HealthResponse, QuoteResponse, QuoteSide};
