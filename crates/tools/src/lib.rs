pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod registry;
pub mod traits;

pub use error::LifecycleError;
pub use lifecycle::{values_match, LifecycleManager, ToolDraft};
pub use registry::{ToolListing, ToolRegistry};
pub use traits::{LocalNameLocks, NameGuard, NameLocks};
