pub mod http_server;
pub mod policy_gate;

pub use http_server::{HttpServer, LifecycleState};
pub use policy_gate::{DenialReason, PolicyDenial, PolicyGate};
