pub mod article;
pub mod candidate;
pub mod core;
pub mod digest;
pub mod run;
pub mod schema;

pub use candidate::NewCandidate;
pub use core::Database;
pub use digest::NewDigest;
pub use run::RunClaim;
