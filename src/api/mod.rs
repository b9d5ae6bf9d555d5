//! Operator HTTP surface (C11).

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use handlers::AppState;
pub use routes::create_routes;
pub use server::{ApiServer, ApiServerConfig};
