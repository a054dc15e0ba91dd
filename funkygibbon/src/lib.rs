pub mod app_state;
pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod sync_engine;

pub use app_state::AppState;
pub use config::Config;
pub use error::{AppError, AppResult};
