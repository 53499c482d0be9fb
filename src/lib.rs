// ============================================================================
// sampleapp Library
// ============================================================================

pub mod app;
pub mod config;
pub mod error;
pub mod fruits;
pub mod greeting;
pub mod handlers;
pub mod models;
pub mod state;
pub mod testkit;

pub use app::build_router;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use greeting::{GreetingClientError, GreetingService, HttpGreetingService};
pub use state::AppState;
