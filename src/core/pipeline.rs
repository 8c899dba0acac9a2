//! Composition of the single request entry point from an ordered option list.
//!
//! Each [`ServeOption`] receives the multiplexer accumulated so far and returns
//! the next one. Options register routes on the current level, or call
//! [`ServeMux::mediate`] to interpose a wrapper: everything registered after
//! that call lives on a child level that only sees traffic the parent level
//! did not match, and that traffic passes through the wrapper first.
use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use axum::{
    Router,
    extract::Request,
    http::{Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{MethodRouter, Route},
};
use thiserror::Error;
use tower::{Layer, Service};

use crate::config::models::GatewayConfig;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ComposeError {
    #[error("serve option '{option}' failed: {reason}")]
    Option { option: &'static str, reason: String },
}

impl ComposeError {
    pub fn option(option: &'static str, reason: impl Into<String>) -> Self {
        ComposeError::Option {
            option,
            reason: reason.into(),
        }
    }
}

/// What every option may read while building.
#[derive(Debug, Clone)]
pub struct ServeContext {
    config: Arc<GatewayConfig>,
    local_addr: SocketAddr,
}

impl ServeContext {
    pub fn new(config: Arc<GatewayConfig>, local_addr: SocketAddr) -> Self {
        Self { config, local_addr }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

pub type ServeOption =
    Box<dyn FnOnce(&ServeContext, ServeMux) -> Result<ServeMux, ComposeError> + Send>;

type Wrapper = Box<dyn FnOnce(Router) -> Router + Send>;

struct Level {
    router: Router,
    fallback: Option<Router>,
    wrapper: Option<Wrapper>,
}

impl Level {
    fn new(wrapper: Option<Wrapper>) -> Self {
        Self {
            router: Router::new(),
            fallback: None,
            wrapper,
        }
    }
}

/// Accumulated multiplexer: a stack of router levels, outermost first.
pub struct ServeMux {
    levels: Vec<Level>,
}

impl Default for ServeMux {
    fn default() -> Self {
        Self::new()
    }
}

impl ServeMux {
    pub fn new() -> Self {
        Self {
            levels: vec![Level::new(None)],
        }
    }

    fn current(&mut self) -> &mut Level {
        // levels is never empty
        let last = self.levels.len() - 1;
        &mut self.levels[last]
    }

    pub fn route(mut self, path: &str, method_router: MethodRouter) -> Self {
        let level = self.current();
        level.router = std::mem::take(&mut level.router).route(path, method_router);
        self
    }

    pub fn route_service<T>(mut self, path: &str, service: T) -> Self
    where
        T: Service<Request, Error = Infallible> + Clone + Send + Sync + 'static,
        T::Response: IntoResponse,
        T::Future: Send + 'static,
    {
        let level = self.current();
        level.router = std::mem::take(&mut level.router).route_service(path, service);
        self
    }

    pub fn merge(mut self, other: Router) -> Self {
        let level = self.current();
        level.router = std::mem::take(&mut level.router).merge(other);
        self
    }

    /// Handle everything the current level (and any deeper level) leaves unmatched.
    pub fn fallback_service<T>(mut self, service: T) -> Self
    where
        T: Service<Request, Error = Infallible> + Clone + Send + Sync + 'static,
        T::Response: IntoResponse,
        T::Future: Send + 'static,
    {
        self.current().fallback = Some(Router::new().fallback_service(service));
        self
    }

    /// Push a child level whose traffic is passed through `wrap` first.
    ///
    /// A fallback already installed on the current level moves into the child,
    /// so it stays the last resort and becomes subject to `wrap`.
    pub fn mediate<F>(mut self, wrap: F) -> Self
    where
        F: FnOnce(Router) -> Router + Send + 'static,
    {
        let fallback = self.current().fallback.take();
        let mut child = Level::new(Some(Box::new(wrap)));
        child.fallback = fallback;
        self.levels.push(child);
        self
    }

    /// Convenience over [`mediate`](Self::mediate) for a tower layer.
    pub fn mediate_layer<L>(self, layer: L) -> Self
    where
        L: Layer<Route> + Clone + Send + Sync + 'static,
        L::Service: Service<Request> + Clone + Send + Sync + 'static,
        <L::Service as Service<Request>>::Response: IntoResponse + 'static,
        <L::Service as Service<Request>>::Error: Into<Infallible> + 'static,
        <L::Service as Service<Request>>::Future: Send + 'static,
    {
        self.mediate(move |router| router.layer(layer))
    }

    /// Number of levels, the root included.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Collapse the level stack into one router, innermost level first.
    pub fn into_router(self) -> Router {
        let mut inner: Option<Router> = None;
        for level in self.levels.into_iter().rev() {
            let mut router = level.router;
            if let Some(next) = inner.take().or(level.fallback) {
                router = router.fallback_service(next);
            }
            if let Some(wrapper) = level.wrapper {
                router = wrapper(router);
            }
            inner = Some(router);
        }
        inner.unwrap_or_default()
    }
}

/// Answer `CONNECT` with a bare 200 instead of dispatching it.
pub async fn connect_guard(req: Request, next: Next) -> Response {
    if req.method() == Method::CONNECT {
        return StatusCode::OK.into_response();
    }
    next.run(req).await
}

/// Fold `options` left to right over an empty multiplexer.
///
/// The returned router answers `CONNECT` with a bare 200 before any dispatch.
/// The first failing option aborts composition.
pub fn make_handler(
    ctx: &ServeContext,
    options: Vec<ServeOption>,
) -> Result<Router, ComposeError> {
    let count = options.len();
    let mux = options
        .into_iter()
        .try_fold(ServeMux::new(), |mux, option| option(ctx, mux))?;

    tracing::debug!(options = count, levels = mux.depth(), "Composed request handler");
    Ok(mux.into_router().layer(middleware::from_fn(connect_guard)))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{
        body::{Body, to_bytes},
        routing::get,
    };
    use tower::ServiceExt;

    use super::*;

    fn ctx() -> ServeContext {
        ServeContext::new(
            Arc::new(GatewayConfig::default()),
            "127.0.0.1:8080".parse().unwrap(),
        )
    }

    fn text_route(path: &'static str, body: &'static str) -> ServeOption {
        Box::new(move |_: &ServeContext, mux: ServeMux| Ok(mux.route(path, get(move || async move { body }))))
    }

    async fn call(router: &Router, method: Method, uri: &str) -> (StatusCode, String) {
        let response = router
            .clone()
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn options_fold_in_order() {
        let router = make_handler(
            &ctx(),
            vec![text_route("/a", "first"), text_route("/b", "second")],
        )
        .unwrap();

        assert_eq!(call(&router, Method::GET, "/a").await, (StatusCode::OK, "first".into()));
        assert_eq!(call(&router, Method::GET, "/b").await, (StatusCode::OK, "second".into()));
        assert_eq!(call(&router, Method::GET, "/c").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn connect_is_answered_before_dispatch() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let option: ServeOption = Box::new(move |_: &ServeContext, mux: ServeMux| {
            Ok(mux.fallback_service(tower::service_fn(move |_req: Request| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, Infallible>(StatusCode::IM_A_TEAPOT.into_response()) }
            })))
        });
        let router = make_handler(&ctx(), vec![option]).unwrap();

        let (status, body) = call(&router, Method::CONNECT, "/anything").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        assert_eq!(call(&router, Method::GET, "/anything").await.0, StatusCode::IM_A_TEAPOT);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_option_aborts_composition() {
        let built = Arc::new(AtomicUsize::new(0));
        let after = built.clone();
        let options: Vec<ServeOption> = vec![
            text_route("/a", "first"),
            Box::new(|_: &ServeContext, _: ServeMux| Err(ComposeError::option("broken", "no luck"))),
            Box::new(move |_: &ServeContext, mux: ServeMux| {
                after.fetch_add(1, Ordering::SeqCst);
                Ok(mux)
            }),
        ];

        let err = make_handler(&ctx(), options).unwrap_err();
        assert_eq!(err.to_string(), "serve option 'broken' failed: no luck");
        assert_eq!(built.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mediation_wraps_only_later_registrations() {
        let wrapped = Arc::new(AtomicUsize::new(0));
        let counter = wrapped.clone();

        let mediate: ServeOption = Box::new(move |_: &ServeContext, mux: ServeMux| {
            Ok(mux.mediate(move |router| {
                router.layer(middleware::from_fn(move |req: Request, next: middleware::Next| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        next.run(req).await
                    }
                }))
            }))
        });

        let router = make_handler(
            &ctx(),
            vec![text_route("/outer", "outer"), mediate, text_route("/inner", "inner")],
        )
        .unwrap();

        assert_eq!(call(&router, Method::GET, "/outer").await.1, "outer");
        assert_eq!(wrapped.load(Ordering::SeqCst), 0);

        assert_eq!(call(&router, Method::GET, "/inner").await.1, "inner");
        assert_eq!(wrapped.load(Ordering::SeqCst), 1);

        // unmatched traffic also crosses the wrapper
        assert_eq!(call(&router, Method::GET, "/nowhere").await.0, StatusCode::NOT_FOUND);
        assert_eq!(wrapped.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fallback_moves_behind_later_mediation() {
        let wrapped = Arc::new(AtomicUsize::new(0));
        let counter = wrapped.clone();

        let mux = ServeMux::new()
            .fallback_service(tower::service_fn(|_req: Request| async {
                Ok::<_, Infallible>("fallback".into_response())
            }))
            .mediate(move |router| {
                router.layer(middleware::from_fn(move |req: Request, next: middleware::Next| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        next.run(req).await
                    }
                }))
            });
        assert_eq!(mux.depth(), 2);
        let router = mux.into_router();

        assert_eq!(call(&router, Method::GET, "/x").await, (StatusCode::OK, "fallback".into()));
        assert_eq!(wrapped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn context_exposes_config_and_address() {
        let ctx = ctx();
        assert_eq!(ctx.local_addr().port(), 8080);
        assert_eq!(ctx.config().listen_addr, "/ip4/127.0.0.1/tcp/8080");
    }
}
