pub mod filter;
pub mod page;
pub mod page_token;
pub mod query;

pub use filter::{SearchFilter, SearchLimits, ValidationError};
pub use page::{Message, SearchResultPage};
pub use page_token::PageToken;
pub use query::NormalizedQuery;
