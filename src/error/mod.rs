mod app;
mod config;
mod load;
mod server;
mod validation;

pub use app::{AppError, AppResult};
pub use config::ConfigError;
pub use load::LoadError;
pub use server::ServerError;
pub use validation::ValidationError;
