pub mod error;
pub mod handlers;
pub mod market;
pub mod server;

pub use error::ApiError;
pub use server::{ApiServer, AppState};
