pub mod elastic;
pub mod registry;

pub use elastic::{ElasticClient, ElasticError};
pub use registry::IndexRegistry;
