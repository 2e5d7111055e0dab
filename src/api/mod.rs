pub mod error;
pub mod router;
pub mod search;

pub use error::ApiError;
pub use router::build_router;
