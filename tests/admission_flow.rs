// End-to-end admission through the composed handler, driven with tower oneshot
#[cfg(test)]
mod test {
    use std::{
        net::SocketAddr,
        num::NonZeroU32,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        extract::{ConnectInfo, Request},
        http::{Method, StatusCode},
        routing::get,
    };
    use cidgate::{
        AdmissionController, RateLimiterRegistry,
        adapters::{health_option, with_admission},
        config::{GatewayConfig, GatewayMode},
        core::{PoolQuota, ResourceId, ServeContext, ServeMux, ServeOption, make_handler},
        ports::{DenialReason, PolicyDenial, PolicyGate},
    };
    use tower::ServiceExt;

    const CID_V0: &str = "QmPZ9gcCEpqKTo6aq61g2nXGUhM4iCL3ewB6LDXZCtioEB";

    #[derive(Default)]
    struct CountingGate {
        takedown: bool,
        subscribed: bool,
        moderation_calls: AtomicUsize,
        access_calls: AtomicUsize,
    }

    #[async_trait]
    impl PolicyGate for CountingGate {
        async fn check_moderation(&self, _resource: &ResourceId) -> Result<(), PolicyDenial> {
            self.moderation_calls.fetch_add(1, Ordering::SeqCst);
            if self.takedown {
                Err(PolicyDenial::new(
                    StatusCode::GONE,
                    "blocked",
                    DenialReason::TakenDown,
                ))
            } else {
                Ok(())
            }
        }

        async fn check_access(&self, _resource: &ResourceId) -> Result<(), PolicyDenial> {
            self.access_calls.fetch_add(1, Ordering::SeqCst);
            if self.subscribed {
                Ok(())
            } else {
                Err(PolicyDenial::new(
                    StatusCode::NOT_FOUND,
                    "No users have subscribed to this hash yet.",
                    DenialReason::Rejected,
                ))
            }
        }
    }

    fn content_option() -> ServeOption {
        Box::new(|_: &ServeContext, mux: ServeMux| {
            Ok(mux.route(
                "/ipfs/{*rest}",
                get(|req: Request| async move {
                    req.extensions()
                        .get::<ResourceId>()
                        .map(|id| id.as_str().to_string())
                        .unwrap_or_default()
                }),
            ))
        })
    }

    fn registry(client_burst: u32, resource_burst: u32) -> Arc<RateLimiterRegistry> {
        let quota = |burst| {
            PoolQuota::new(
                NonZeroU32::new(burst).unwrap(),
                Duration::from_secs(60),
            )
        };
        Arc::new(RateLimiterRegistry::new(quota(client_burst), quota(resource_burst), 1_000).unwrap())
    }

    fn gateway(mode: GatewayMode, gate: Arc<CountingGate>, limiters: Arc<RateLimiterRegistry>) -> axum::Router {
        let ctx = ServeContext::new(
            Arc::new(GatewayConfig::default()),
            "127.0.0.1:8080".parse().unwrap(),
        );
        let handler = make_handler(&ctx, vec![health_option(), content_option()]).unwrap();
        with_admission(handler, AdmissionController::new(mode, limiters, gate))
    }

    fn request(method: Method, uri: &str, peer: &str) -> Request {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let peer: SocketAddr = peer.parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(peer));
        req
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_dedicated_gateway_serves_subscribed_content() {
        let gate = Arc::new(CountingGate {
            subscribed: true,
            ..Default::default()
        });
        let app = gateway(GatewayMode::Dedicated, gate.clone(), registry(1, 1));

        let response = app
            .oneshot(request(Method::GET, &format!("/ipfs/{CID_V0}/a.txt"), "10.0.0.1:5000"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, CID_V0);
        assert_eq!(gate.moderation_calls.load(Ordering::SeqCst), 1);
        assert_eq!(gate.access_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dedicated_gateway_rejects_unsubscribed_content() {
        let gate = Arc::new(CountingGate::default());
        let app = gateway(GatewayMode::Dedicated, gate, registry(1, 1));

        let response = app
            .oneshot(request(Method::GET, &format!("/ipfs/{CID_V0}"), "10.0.0.1:5000"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "No users have subscribed to this hash yet.");
    }

    #[tokio::test]
    async fn test_takedown_wins_over_subscription() {
        let gate = Arc::new(CountingGate {
            takedown: true,
            subscribed: true,
            ..Default::default()
        });
        let app = gateway(GatewayMode::Dedicated, gate.clone(), registry(1, 1));

        let response = app
            .oneshot(request(Method::GET, &format!("/ipfs/{CID_V0}"), "10.0.0.1:5000"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::GONE);
        assert_eq!(gate.access_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_encoded_gated_paths_cannot_skip_moderation() {
        let gate = Arc::new(CountingGate {
            takedown: true,
            subscribed: true,
            ..Default::default()
        });
        let app = gateway(GatewayMode::Dedicated, gate.clone(), registry(1, 1));

        for uri in [format!("/%69pfs/{CID_V0}"), format!("/ipfs%2F{CID_V0}")] {
            let response = app
                .clone()
                .oneshot(request(Method::GET, &uri, "10.0.0.1:5000"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::GONE, "{uri}");
        }
        assert_eq!(gate.moderation_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_open_gateway_limits_each_client_separately() {
        let gate = Arc::new(CountingGate::default());
        let app = gateway(GatewayMode::Open, gate.clone(), registry(1, 100));

        let first = app
            .clone()
            .oneshot(request(Method::GET, &format!("/ipfs/{CID_V0}"), "10.0.0.1:5000"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        // same address, different port: still the same client
        let second = app
            .clone()
            .oneshot(request(Method::GET, &format!("/ipfs/{CID_V0}"), "10.0.0.1:5001"))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_text(second).await, "Too many requests from this IP");

        let other = app
            .oneshot(request(Method::GET, &format!("/ipfs/{CID_V0}"), "10.0.0.2:5000"))
            .await
            .unwrap();
        assert_eq!(other.status(), StatusCode::OK);

        assert_eq!(gate.access_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_open_gateway_limits_popular_resource() {
        let gate = Arc::new(CountingGate::default());
        let app = gateway(GatewayMode::Open, gate, registry(100, 1));

        let first = app
            .clone()
            .oneshot(request(Method::GET, &format!("/ipfs/{CID_V0}"), "10.0.0.1:5000"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(request(Method::GET, &format!("/ipfs/{CID_V0}"), "10.0.0.2:5000"))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_text(second).await, "Too many requests for this CID");
    }

    #[tokio::test]
    async fn test_malformed_resource_is_bad_request() {
        let gate = Arc::new(CountingGate::default());
        let app = gateway(GatewayMode::Dedicated, gate.clone(), registry(1, 1));

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/ipfs/not-a-cid", "10.0.0.1:5000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "Invalid hash");

        let response = app
            .oneshot(request(Method::GET, "/ipfs/", "10.0.0.1:5000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "Invalid path");

        assert_eq!(gate.moderation_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ungated_paths_bypass_admission() {
        let gate = Arc::new(CountingGate::default());
        let app = gateway(GatewayMode::Open, gate.clone(), registry(1, 1));

        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(request(Method::GET, "/health", "10.0.0.1:5000"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(gate.moderation_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connect_is_answered_without_routing() {
        let gate = Arc::new(CountingGate::default());
        let app = gateway(GatewayMode::Open, gate, registry(5, 5));

        let response = app
            .oneshot(request(Method::CONNECT, "/anything", "10.0.0.1:5000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.is_empty());
    }
}
