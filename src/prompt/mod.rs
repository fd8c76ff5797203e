// Declare submodules
mod clustering;
mod synthesis;

pub use clustering::clustering_prompt;
pub use clustering::CLUSTERING_SYSTEM_PROMPT;
pub use synthesis::{synthesis_prompt, synthesis_system_prompt};
