pub mod limiter;
pub mod store;

pub use limiter::{QuotaConfig, QuotaDecision, QuotaLimiter, RejectionEvent};
pub use store::{CounterStore, InMemoryCounterStore, WindowSnapshot};
