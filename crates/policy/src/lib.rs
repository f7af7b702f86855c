pub mod capability;
pub mod policy;

pub use capability::{rules, Capability};
pub use policy::{is_dunder, DenyPattern, PolicyChange, PolicyError, ValidatorPolicy};
