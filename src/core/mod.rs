pub mod admission;
pub mod pipeline;
pub mod rate_limiter;
pub mod resource;

pub use admission::{AdmissionController, AdmissionError};
pub use pipeline::{ComposeError, ServeContext, ServeMux, ServeOption, make_handler};
pub use rate_limiter::{LimiterPool, PoolQuota, RateLimiterRegistry, RegistryError};
pub use resource::{GatedPath, ResourceId};
