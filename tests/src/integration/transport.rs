//! Transport-level properties: correlation under concurrency, timeout
//! isolation, the single shutdown retry, and call independence.

#[cfg(test)]
mod tests {
    use crate::support::serve_echo;
    use queue_rpc::{CallMode, MemoryBroker, RpcClient, TransportError};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn client_over(broker: Arc<MemoryBroker>, timeout_secs: u64) -> Arc<RpcClient> {
        Arc::new(RpcClient::new(broker, "gateway-tests", timeout_secs))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_calls_receive_their_own_replies() {
        let broker = Arc::new(MemoryBroker::new());
        serve_echo(&broker, "echo_1.0");
        let client = client_over(broker, 5);

        let mut handles = Vec::new();
        for i in 0..64u32 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                let params = serde_json::to_vec(&json!({ "n": i })).unwrap();
                let reply = client
                    .call("echo_1.0", "Examples.Echo", CallMode::Unsigned, &params)
                    .await
                    .unwrap();
                let v: serde_json::Value = serde_json::from_slice(&reply).unwrap();
                assert_eq!(v["n"], i, "caller {i} got someone else's reply");
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn timeout_does_not_block_other_calls() {
        let broker = Arc::new(MemoryBroker::new());
        // Swallows requests marked slow, echoes the rest.
        broker.serve("svc_1.0", |request| {
            let frame: serde_json::Value = serde_json::from_slice(&request).ok()?;
            if frame["Params"]["slow"] == true {
                return None;
            }
            Some(serde_json::to_vec(&json!({ "Result": frame["Params"] })).ok()?)
        });
        let client = client_over(broker, 1);

        let slow_client = Arc::clone(&client);
        let slow = tokio::spawn(async move {
            slow_client
                .call("svc_1.0", "Svc.Slow", CallMode::Unsigned, br#"{"slow":true}"#)
                .await
        });

        // The fast call completes while the slow one is still pending.
        let reply = client
            .call("svc_1.0", "Svc.Fast", CallMode::Unsigned, br#"{"slow":false}"#)
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_slice(&reply).unwrap();
        assert_eq!(v["slow"], false);

        let err = slow.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "timeout 1s");
    }

    #[tokio::test]
    async fn shutdown_is_retried_exactly_once() {
        let broker = Arc::new(MemoryBroker::new());
        serve_echo(&broker, "echo_1.0");
        let client = client_over(Arc::clone(&broker), 5);

        // Warm the sub-client so the fault hits an established channel.
        client
            .call("echo_1.0", "Examples.Echo", CallMode::Unsigned, b"{}")
            .await
            .unwrap();

        // One failure: absorbed by the automatic retry.
        broker.fail_next_publishes(1);
        client
            .call("echo_1.0", "Examples.Echo", CallMode::Unsigned, b"{}")
            .await
            .unwrap();

        // Two consecutive failures: the retry also shuts down, final error.
        broker.fail_next_publishes(2);
        let err = client
            .call("echo_1.0", "Examples.Echo", CallMode::Unsigned, b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Shutdown));

        // The client recovers on the next call.
        client
            .call("echo_1.0", "Examples.Echo", CallMode::Unsigned, b"{}")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_backend_fails_fast() {
        let broker = Arc::new(MemoryBroker::new());
        let client = client_over(broker, 5);
        let err = client
            .call("ghost_1.0", "Any.Thing", CallMode::Unsigned, b"{}")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no such service: ghost_1.0");
    }

    #[tokio::test]
    async fn repeated_calls_are_independent_cycles() {
        let broker = Arc::new(MemoryBroker::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        broker.serve("svc_1.0", move |request| {
            counter.fetch_add(1, Ordering::SeqCst);
            let frame: serde_json::Value = serde_json::from_slice(&request).ok()?;
            Some(serde_json::to_vec(&json!({ "Result": frame["Params"] })).ok()?)
        });
        let client = client_over(broker, 5);

        for _ in 0..3 {
            let reply = client
                .call("svc_1.0", "Svc.Same", CallMode::Unsigned, br#"{"x":1}"#)
                .await
                .unwrap();
            assert_eq!(reply, br#"{"x":1}"#);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3, "a reply was cached");
    }

    #[tokio::test]
    async fn channel_open_failure_reconnects_once() {
        let broker = Arc::new(MemoryBroker::new());
        serve_echo(&broker, "echo_1.0");
        let client = client_over(Arc::clone(&broker), 5);

        broker.fail_next_channel_opens(1);
        client
            .call("echo_1.0", "Examples.Echo", CallMode::Unsigned, b"{}")
            .await
            .unwrap();
    }
}
