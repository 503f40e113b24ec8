pub mod analytics;
pub mod capture;
pub mod export;
pub mod openai;
pub mod record_store;
pub mod secrets;
pub mod state;
