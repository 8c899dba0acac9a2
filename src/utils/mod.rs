pub mod graceful_shutdown;
pub mod listen_addr;

pub use graceful_shutdown::{GracefulShutdown, ShutdownReason, ShutdownToken};
pub use listen_addr::{ListenAddr, ListenAddrError, ListenHost};
