//! View synchronization
//! - query.rs: shared query cache with generation-checked fetches
//! - policy.rs: mutation -> query invalidation rules and `ViewSync`
//! - preview.rs: debounced preview state machine and its driver

pub mod policy;
pub mod preview;
pub mod query;

pub use policy::{InvalidationPolicy, ViewSync};
pub use preview::{PreviewFrame, PreviewSubscription, PreviewSynchronizer};
pub use query::{QueryCache, QueryKey, QueryState};
