use std::fmt;

use axum::Router;

use crate::utils::graceful_shutdown::ShutdownToken;

/// Lifecycle of a serving listener.
///
/// `Starting -> Serving -> Draining -> Closed`, or `Serving -> Closed` when the
/// serve loop ends on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Serving,
    Draining,
    Closed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Starting => "starting",
            LifecycleState::Serving => "serving",
            LifecycleState::Draining => "draining",
            LifecycleState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// HttpServer defines the port for running a bound server until shutdown.
pub trait HttpServer: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Serve `router` until the serve loop fails or `shutdown` fires and the
    /// drain ends.
    ///
    /// # Returns
    /// The serve loop's error if it exited on its own, otherwise the outcome of
    /// the drain (`Ok` on a clean drain).
    fn serve(
        self,
        router: Router,
        shutdown: ShutdownToken,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send;
}
