pub mod buffer;
pub mod connector;
pub mod context;
pub mod error;
pub mod fetch;
pub mod hooks;
pub mod json_writer;
mod loader;
pub mod plan;
pub mod postprocess;
pub mod resolve;
pub mod response;
pub mod template;
pub mod utils;
pub mod value;

#[cfg(test)]
mod tests;

pub use connector::{Batch, BatchFactory, DataSource, SubscriptionDataSource};
pub use context::Context;
pub use error::{DataSourceError, ResolveError};
pub use fetch::batch::EntityBatchFactory;
pub use hive_router_resolver_config::ResolverConfig;
pub use postprocess::process as postprocess_plan;
pub use resolve::Resolver;
