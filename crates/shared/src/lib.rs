pub mod chat_log_service;
pub mod config;
mod config_env;
pub mod context_store;
pub mod evaluation;
pub mod models;
pub mod repos;
pub mod risk;
pub mod scoring;

/// Loads a `.env` file from the working directory when one exists.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}
