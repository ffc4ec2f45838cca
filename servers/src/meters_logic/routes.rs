//! HTTP surface of the gateway. Every reading endpoint answers 200 with a JSON
//! payload; failures are reported inside it.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{ConnectInfo, Query, Request, State},
    routing::get,
};

use lib_meters::MeterService;
use lib_meters::meters::{CacheMode, EnvironmentResponse, PowerResponse};

pub type SharedService = Arc<MeterService>;

/// Raw query pairs. A repeated parameter is not an error; the last value wins.
type QueryPairs = Query<Vec<(String, String)>>;

fn last_param(pairs: Vec<(String, String)>, name: &str) -> Option<String> {
    pairs
        .into_iter()
        .filter(|(key, _)| key == name)
        .map(|(_, value)| value)
        .last()
}

pub fn router(service: SharedService) -> Router {
    Router::new()
        .route("/api/v1/power", get(power))
        .route("/api/v1/power_cached", get(power_cached))
        .route("/api/v1/environment", get(environment))
        .route("/ra9", get(alive))
        .with_state(service)
}

/// The `ip` parameter, or the address of the peer that sent the request.
fn meter_key(explicit: Option<String>, request: &Request) -> String {
    explicit
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(peer)| peer.ip().to_string())
        })
        .unwrap_or_default()
}

async fn power(
    State(service): State<SharedService>,
    Query(pairs): QueryPairs,
    request: Request,
) -> Json<PowerResponse> {
    let ip = meter_key(last_param(pairs, "ip"), &request);
    Json(service.power(&ip, CacheMode::Bypass).await)
}

async fn power_cached(
    State(service): State<SharedService>,
    Query(pairs): QueryPairs,
    request: Request,
) -> Json<PowerResponse> {
    let ip = meter_key(last_param(pairs, "ip"), &request);
    Json(service.power(&ip, CacheMode::PreferCached).await)
}

async fn environment(
    State(service): State<SharedService>,
    Query(pairs): QueryPairs,
) -> Json<EnvironmentResponse> {
    let name = last_param(pairs, "name");
    Json(service.environment(name.as_deref()).await)
}

async fn alive() -> &'static str {
    "I am alive"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::StatusCode;
    use lib_meters::meters::{
        ChannelDriver, ChannelExecutorPool, DeviceDirectory, DeviceKind, DeviceLocation,
        EnvironmentReading,
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    struct FixedDriver {
        calls: Arc<AtomicUsize>,
    }

    impl ChannelDriver for FixedDriver {
        fn read_power(&mut self, serial: &str) -> anyhow::Result<Option<f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((serial == "7").then_some(42.5))
        }

        fn read_environment(&mut self, _address: &str) -> anyhow::Result<EnvironmentReading> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(EnvironmentReading::new(Some(22.4), None))
        }
    }

    fn app(calls: &Arc<AtomicUsize>) -> Router {
        let meters = DeviceDirectory::new(
            DeviceKind::Meter,
            [(
                "10.0.0.5",
                DeviceLocation {
                    address: "7".to_string(),
                    channel: 0,
                },
            )],
        );
        let sensors = DeviceDirectory::new(
            DeviceKind::Sensor,
            [(
                "rack-a",
                DeviceLocation {
                    address: "1".to_string(),
                    channel: 0,
                },
            )],
        );
        let driver: Box<dyn ChannelDriver> = Box::new(FixedDriver {
            calls: Arc::clone(calls),
        });
        let pool = ChannelExecutorPool::new([(0, driver)], 2);
        let service = MeterService::new(meters, sensors, pool, Duration::from_secs(10), "0.0");
        router(Arc::new(service))
    }

    async fn get_json(app: Router, request: Request) -> Value {
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn get_request(uri: &str) -> Request {
        axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_power_for_explicit_ip() {
        let calls = Arc::new(AtomicUsize::new(0));
        let body = get_json(app(&calls), get_request("/api/v1/power?ip=10.0.0.5")).await;

        assert_eq!(body["power"], json!(42.5));
        assert_eq!(body["error"], json!(false));
        assert_eq!(body["msg"], json!("success"));
        assert_eq!(body["ipaddr"], json!("10.0.0.5"));
        assert_eq!(body["version"], json!("0.0"));
        assert!(body["time"].as_f64().unwrap() > 0.0);
        assert!(body["elapsed"].is_number());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_power_cached_falls_back_to_peer_address() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(&calls);

        for _ in 0..2 {
            let mut request = get_request("/api/v1/power_cached");
            request
                .extensions_mut()
                .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 5], 50123))));
            let body = get_json(app.clone(), request).await;
            assert_eq!(body["power"], json!(42.5));
            assert_eq!(body["ipaddr"], json!("10.0.0.5"));
        }
        // Second request was a cache hit.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_ip_is_reported_without_a_driver_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let body = get_json(app(&calls), get_request("/api/v1/power?ip=10.9.9.9")).await;

        assert_eq!(body["power"], json!(-1));
        assert_eq!(body["error"], json!(true));
        assert_eq!(body["msg"], json!("IP Not Found"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_environment_with_and_without_name() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(&calls);

        let body = get_json(app.clone(), get_request("/api/v1/environment?name=rack-a")).await;
        assert_eq!(body["temperature"], json!(22.4));
        assert_eq!(body["humidity"], json!("NULL"));
        assert_eq!(body["error"], json!(false));
        assert_eq!(body["msg"], json!(""));

        let body = get_json(app, get_request("/api/v1/environment")).await;
        assert_eq!(body["temperature"], json!("NULL"));
        assert_eq!(body["humidity"], json!("NULL"));
        assert_eq!(body["error"], json!(true));
        assert_eq!(body["msg"], json!("too few arguments"));
        assert_eq!(body["elapsed"], json!(0.0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_repeated_parameters_take_the_last_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(&calls);

        let body = get_json(app.clone(), get_request("/api/v1/power?ip=10.9.9.9&ip=10.0.0.5")).await;
        assert_eq!(body["power"], json!(42.5));
        assert_eq!(body["ipaddr"], json!("10.0.0.5"));

        let body = get_json(
            app.clone(),
            get_request("/api/v1/power_cached?ip=10.0.0.5&ip=10.0.0.5"),
        )
        .await;
        assert_eq!(body["error"], json!(false));

        let body = get_json(app, get_request("/api/v1/environment?name=nowhere&name=rack-a")).await;
        assert_eq!(body["temperature"], json!(22.4));
        assert_eq!(body["error"], json!(false));
    }

    #[tokio::test]
    async fn test_liveness_endpoint() {
        let calls = Arc::new(AtomicUsize::new(0));
        let response = app(&calls).oneshot(get_request("/ra9")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"I am alive");
    }
}
