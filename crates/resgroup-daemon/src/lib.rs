pub mod config;
pub mod runtime;
pub mod sampler;
pub mod store;

pub use config::Config;
pub use runtime::{open_controller, open_manager, GroupManager};
pub use sampler::{GroupUsage, UsageSampler, UsageSnapshot};
pub use store::JsonFileRegistry;
