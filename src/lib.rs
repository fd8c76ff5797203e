pub mod clustering;
pub mod db;
pub mod environment;
pub mod error;
pub mod feed;
pub mod keywords;
pub mod llm;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod pool;
pub mod prompt;
pub mod quality;
pub mod synthesis;
pub mod text;

pub const TARGET_LLM_REQUEST: &str = "llm_request";
pub const TARGET_DB: &str = "db_query";
pub const TARGET_PIPELINE: &str = "pipeline";
