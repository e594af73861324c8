use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tollgate::rate_limit::{peer_identifier, AdmissionLayer, Quota};
use tollgate::{
    AdmissionError, BucketConfig, DistributedConfig, DistributedRateLimiter, LocalRateLimiter,
};
use tower::{service_fn, Service, ServiceBuilder, ServiceExt};

mod common;
use common::test_helpers::FailingStore;

#[derive(Debug, Clone)]
struct Request {
    remote_addr: String,
}

fn request(ip: &str) -> Request {
    Request { remote_addr: format!("{}:50123", ip) }
}

fn client_ip(req: &Request) -> String {
    peer_identifier(&req.remote_addr)
}

#[tokio::test]
async fn admitted_requests_carry_quota_and_rejections_skip_the_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handler = service_fn(move |req: Request| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(format!("hello {}", peer_identifier(&req.remote_addr)))
        }
    });

    let limiter = LocalRateLimiter::new(BucketConfig::new(2.0, 0.0).unwrap());
    let mut svc = ServiceBuilder::new().layer(AdmissionLayer::new(limiter, client_ip)).service(handler);

    let first = svc.ready().await.unwrap().call(request("192.0.2.1")).await.unwrap();
    assert_eq!(first.response, "hello 192.0.2.1");
    assert_eq!(first.quota, Quota { limit: 2.0, remaining: 1.0 });
    assert_eq!(
        first.quota.headers(),
        [("X-RateLimit-Limit", "2".to_string()), ("X-RateLimit-Remaining", "1.00".to_string())]
    );

    let second = svc.ready().await.unwrap().call(request("192.0.2.1")).await.unwrap();
    assert_eq!(second.quota.remaining, 0.0);

    let third = svc.ready().await.unwrap().call(request("192.0.2.1")).await;
    let err = third.expect_err("bucket is empty");
    assert!(err.is_rejected());
    assert_eq!(err.status_code(), Some(429));
    assert!(matches!(err, AdmissionError::Rejected { limit } if limit == 2.0));
    assert_eq!(calls.load(Ordering::SeqCst), 2, "rejected request must not reach the handler");

    let other = svc.ready().await.unwrap().call(request("192.0.2.2")).await.unwrap();
    assert_eq!(other.into_inner(), "hello 192.0.2.2");
}

#[tokio::test]
async fn callers_are_keyed_by_host_not_port() {
    let limiter = Arc::new(LocalRateLimiter::new(BucketConfig::new(1.0, 0.0).unwrap()));
    let svc = ServiceBuilder::new()
        .layer(AdmissionLayer::shared(limiter.clone(), client_ip))
        .service(service_fn(|_req: Request| async { Ok::<_, Infallible>(()) }));

    let first = Request { remote_addr: "[2001:db8::7]:50001".into() };
    let second = Request { remote_addr: "[2001:db8::7]:50002".into() };
    assert!(svc.clone().oneshot(first).await.is_ok());
    assert!(svc.oneshot(second).await.unwrap_err().is_rejected());
    assert_eq!(limiter.peek("2001:db8::7"), Some(0.0));
    assert_eq!(limiter.len(), 1);
}

#[tokio::test]
async fn inner_errors_pass_through() {
    let handler = service_fn(|_req: Request| async {
        Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "handler failed"))
    });
    let limiter = LocalRateLimiter::new(BucketConfig::new(1.0, 1.0).unwrap());
    let svc = ServiceBuilder::new().layer(AdmissionLayer::new(limiter, client_ip)).service(handler);

    let err = svc.oneshot(request("192.0.2.1")).await.expect_err("inner failure");
    assert!(!err.is_rejected());
    assert_eq!(err.into_inner().map(|e| e.to_string()), Some("handler failed".to_string()));
}

#[tokio::test]
async fn degraded_store_rejects_through_the_middleware() {
    let handler = service_fn(|_req: Request| async { Ok::<_, Infallible>(()) });
    let limiter = DistributedRateLimiter::new(
        FailingStore::default(),
        DistributedConfig::new(BucketConfig::new(5.0, 1.0).unwrap()),
    );
    let svc = ServiceBuilder::new().layer(AdmissionLayer::new(limiter, client_ip)).service(handler);

    let err = svc.oneshot(request("192.0.2.1")).await.expect_err("fail closed");
    assert_eq!(err.status_code(), Some(429));
}

#[tokio::test]
async fn shared_limiter_counts_across_services() {
    let limiter = Arc::new(LocalRateLimiter::new(BucketConfig::new(1.0, 0.0).unwrap()));
    let layer = AdmissionLayer::shared(limiter.clone(), client_ip);
    let a = ServiceBuilder::new()
        .layer(layer.clone())
        .service(service_fn(|_req: Request| async { Ok::<_, Infallible>("a") }));
    let b = ServiceBuilder::new()
        .layer(layer)
        .service(service_fn(|_req: Request| async { Ok::<_, Infallible>("b") }));

    assert!(a.oneshot(request("192.0.2.1")).await.is_ok());
    assert!(b.oneshot(request("192.0.2.1")).await.unwrap_err().is_rejected());
    assert_eq!(limiter.peek("192.0.2.1"), Some(0.0));
}
