//! A shared `Service` under concurrent callers.

use std::sync::Arc;
use std::time::Duration;

use vex::resilience::{with_circuit_breaker, with_rate_limit, with_retry};
use vex::{CancellationToken, Chunker, Service, StubProvider};

fn shared_service() -> (Arc<Service>, Arc<StubProvider>) {
    let provider = Arc::new(StubProvider::new(64));
    let service = Service::builder(provider.clone())
        .layer(with_rate_limit(1_000.0, 1_000))
        .layer(with_circuit_breaker(5, Duration::from_secs(30)))
        .layer(with_retry(2))
        .chunker(Chunker::sentence())
        .build();
    (Arc::new(service), provider)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_batches_produce_identical_vectors() {
    let (service, provider) = shared_service();
    let text = "Concurrent embedding test. Same text every time.";

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .embed(&CancellationToken::new(), text)
                    .await
                    .expect("embed should succeed")
                    .expect("text has chunks")
            })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    let first = &results[0];
    for (i, result) in results.iter().enumerate().skip(1) {
        assert_eq!(first, result, "task {i} produced a different vector");
    }
    assert_eq!(provider.calls(), 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelling_one_caller_leaves_others_untouched() {
    let (service, _) = shared_service();
    let cancelled = CancellationToken::new();
    cancelled.cancel();

    let doomed = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.embed(&cancelled, "doomed").await })
    };
    let healthy = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.embed(&CancellationToken::new(), "healthy").await })
    };

    assert!(doomed.await.unwrap().unwrap_err().is_cancelled());
    assert!(healthy.await.unwrap().unwrap().is_some());
}
