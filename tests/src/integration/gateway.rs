//! Router-level flows: the four ingestion modes, request signing, error
//! envelopes, and response shaping, all over the in-memory broker.

#[cfg(test)]
mod tests {
    use crate::support::{
        multipart_body, multipart_content_type, query_string, serve_body_reply, serve_echo,
        test_router, TEST_SIGN_KEY,
    };
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::Router;
    use chrono::Local;
    use http_gateway::sign;
    use queue_rpc::MemoryBroker;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String, String) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, content_type, String::from_utf8_lossy(&bytes).into_owned())
    }

    fn pairs(entries: &[(&str, &str)]) -> Vec<(String, String)> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn envelope(body: &str) -> (i64, String) {
        let v: Value = serde_json::from_str(body).expect("error envelope is JSON");
        (
            v["ErrorCode"].as_i64().unwrap(),
            v["ErrorMsg"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn default_mode_round_trip() {
        let broker = Arc::new(MemoryBroker::new());
        let seen = serve_echo(&broker, "examples_1.0");
        let router = test_router(broker, 5);

        let query = query_string(&pairs(&[
            ("module", "examples"),
            ("version", "1.0"),
            ("method", "Examples.Echo"),
            ("bizContent", r#"{"Body":"hahaha"}"#),
        ]));
        let request = Request::get(format!("/gateway?{query}"))
            .header("X-Real-IP", "203.0.113.9")
            .body(Body::empty())
            .unwrap();
        let (status, content_type, body) = send(&router, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, "application/json; charset=UTF-8");
        let reply: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(reply["Body"], "hahaha");
        assert_eq!(reply["ClientIP"], "203.0.113.9");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, "Examples.Echo");
        assert_eq!(seen[0].params["ClientIP"], "203.0.113.9");
    }

    #[tokio::test]
    async fn default_mode_wraps_jsonp_callback() {
        let broker = Arc::new(MemoryBroker::new());
        serve_echo(&broker, "examples_1.0");
        let router = test_router(broker, 5);

        let query = query_string(&pairs(&[
            ("module", "examples"),
            ("version", "1.0"),
            ("method", "Examples.Echo"),
            ("bizContent", r#"{"n":1}"#),
            ("callback", "foo"),
        ]));
        let request = Request::get(format!("/gateway?{query}"))
            .body(Body::empty())
            .unwrap();
        let (_, _, body) = send(&router, request).await;

        assert!(body.starts_with("foo("), "not JSONP-wrapped: {body}");
        assert!(body.ends_with(')'));
        let inner: Value = serde_json::from_str(&body[4..body.len() - 1]).unwrap();
        assert_eq!(inner["n"], 1);
    }

    #[tokio::test]
    async fn signed_request_routes_to_signed_variant() {
        let broker = Arc::new(MemoryBroker::new());
        let seen = serve_echo(&broker, "examples_1.0");
        let router = test_router(broker, 5);

        let timestamp = Local::now().format("%Y%m%d%H%M%S").to_string();
        let mut params = pairs(&[
            ("module", "examples"),
            ("version", "1.0"),
            ("method", "Examples.Echo"),
            ("bizContent", r#"{"Body":"hi"}"#),
        ]);
        params.push(("timestamp".to_string(), timestamp));
        let signature = sign::compute(&params, TEST_SIGN_KEY);
        params.push(("sign".to_string(), signature));

        let request = Request::get(format!("/gateway?{}", query_string(&params)))
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&router, request).await;

        assert_eq!(status, StatusCode::OK);
        let reply: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(reply["Body"], "hi");

        // The suffix convention stays on the wire side.
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].method, "Examples.EchoWithSign");
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let broker = Arc::new(MemoryBroker::new());
        let seen = serve_echo(&broker, "examples_1.0");
        let router = test_router(broker, 5);

        let timestamp = Local::now().format("%Y%m%d%H%M%S").to_string();
        let mut params = pairs(&[
            ("module", "examples"),
            ("version", "1.0"),
            ("method", "Examples.Echo"),
            ("bizContent", "{}"),
        ]);
        params.push(("timestamp".to_string(), timestamp));
        let mut signature = sign::compute(&params, TEST_SIGN_KEY);
        // Flip the first hex digit.
        let flipped = if signature.starts_with('0') { "1" } else { "0" };
        signature.replace_range(0..1, flipped);
        params.push(("sign".to_string(), signature));

        let request = Request::get(format!("/gateway?{}", query_string(&params)))
            .body(Body::empty())
            .unwrap();
        let (_, _, body) = send(&router, request).await;

        let (code, message) = envelope(&body);
        assert_eq!(code, 5002);
        assert!(message.contains("signature failed"), "{message}");
        assert!(seen.lock().unwrap().is_empty(), "backend was contacted");
    }

    #[tokio::test]
    async fn stale_timestamp_is_rejected() {
        let broker = Arc::new(MemoryBroker::new());
        serve_echo(&broker, "examples_1.0");
        let router = test_router(broker, 5);

        let stale = (Local::now() - chrono::Duration::minutes(6))
            .format("%Y%m%d%H%M%S")
            .to_string();
        let mut params = pairs(&[
            ("module", "examples"),
            ("version", "1.0"),
            ("method", "Examples.Echo"),
            ("bizContent", "{}"),
        ]);
        params.push(("timestamp".to_string(), stale));
        let signature = sign::compute(&params, TEST_SIGN_KEY);
        params.push(("sign".to_string(), signature));

        let request = Request::get(format!("/gateway?{}", query_string(&params)))
            .body(Body::empty())
            .unwrap();
        let (_, _, body) = send(&router, request).await;

        let (code, message) = envelope(&body);
        assert_eq!(code, 5002);
        assert!(message.contains("request already expired"), "{message}");
    }

    #[tokio::test]
    async fn suffixed_method_name_is_rejected_without_backend_contact() {
        let broker = Arc::new(MemoryBroker::new());
        let seen = serve_echo(&broker, "examples_1.0");
        let router = test_router(broker, 5);

        let query = query_string(&pairs(&[
            ("module", "examples"),
            ("version", "1.0"),
            ("method", "Examples.EchoWithSign"),
            ("bizContent", "{}"),
        ]));
        let request = Request::get(format!("/gateway?{query}"))
            .body(Body::empty())
            .unwrap();
        let (_, _, body) = send(&router, request).await;

        let (code, message) = envelope(&body);
        assert_eq!(code, 5001);
        assert!(message.contains("Examples.EchoWithSign"), "{message}");
        assert!(seen.lock().unwrap().is_empty(), "backend was contacted");
    }

    #[tokio::test]
    async fn body_mode_relays_backend_content_type() {
        let broker = Arc::new(MemoryBroker::new());
        serve_body_reply(&broker, "shop_1.0", "<xml>ok</xml>", "text/xml");
        let router = test_router(broker, 5);

        let request = Request::post("/gateway/b/m/shop_1.0_Pay.Notify")
            .body(Body::from("<notify/>"))
            .unwrap();
        let (status, content_type, body) = send(&router, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, "text/xml; charset=UTF-8");
        assert_eq!(body, "<xml>ok</xml>");
    }

    #[tokio::test]
    async fn body_mode_delivers_raw_body_to_backend() {
        let broker = Arc::new(MemoryBroker::new());
        let seen = serve_echo(&broker, "shop_1.0");
        let router = test_router(broker, 5);

        let request = Request::post("/gateway/b/m/shop_1.0_Pay.Notify")
            .body(Body::from("hello"))
            .unwrap();
        let (_, content_type, body) = send(&router, request).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].method, "Pay.Notify");
        assert_eq!(seen[0].params["Body"], "hello");
        // The echoed params parse as {Body, ContentType}; no declared
        // content type falls back to text/plain.
        assert_eq!(content_type, "text/plain; charset=UTF-8");
        assert_eq!(body, "hello");
    }

    #[tokio::test]
    async fn raw_mode_uses_json_body_as_payload() {
        let broker = Arc::new(MemoryBroker::new());
        let seen = serve_echo(&broker, "svc_1.0");
        let router = test_router(broker, 5);

        let request = Request::post("/gateway/r/m/svc%7C1.0%7CSvc.Do")
            .body(Body::from(r#"{"a":"1"}"#))
            .unwrap();
        let (_, content_type, body) = send(&router, request).await;

        assert_eq!(content_type, "application/json; charset=UTF-8");
        let reply: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(reply["a"], "1");
        assert_eq!(seen.lock().unwrap()[0].params["a"], "1");
    }

    #[tokio::test]
    async fn url_mode_decodes_payload_from_path() {
        let broker = Arc::new(MemoryBroker::new());
        serve_echo(&broker, "svc_1.0");
        let router = test_router(broker, 5);

        let request = Request::get(
            "/gateway/u/m/svc%7C1.0%7CSvc.Do/b/%7B%22Body%22%3A%22hahaha%22%7D",
        )
        .body(Body::empty())
        .unwrap();
        let (_, content_type, body) = send(&router, request).await;

        assert_eq!(content_type, "text/plain; charset=UTF-8");
        assert_eq!(body, "hahaha");
    }

    #[tokio::test]
    async fn form_mode_maps_fields_into_payload() {
        let broker = Arc::new(MemoryBroker::new());
        let seen = serve_echo(&broker, "svc_1.0");
        let router = test_router(broker, 5);

        let request = Request::post("/gateway/f/m/svc%7C1.0%7CSvc.Do")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("trade_no=42&status=paid"))
            .unwrap();
        let (status, _, _) = send(&router, request).await;

        assert_eq!(status, StatusCode::OK);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].params["trade_no"], "42");
        assert_eq!(seen[0].params["status"], "paid");
    }

    #[tokio::test]
    async fn default_mode_accepts_multipart_fields() {
        let broker = Arc::new(MemoryBroker::new());
        let seen = serve_echo(&broker, "examples_1.0");
        let router = test_router(broker, 5);

        let body = multipart_body(&pairs(&[
            ("module", "examples"),
            ("version", "1.0"),
            ("method", "Examples.Echo"),
            ("bizContent", r#"{"Body":"hi"}"#),
        ]));
        let request = Request::post("/gateway")
            .header(header::CONTENT_TYPE, multipart_content_type())
            .body(Body::from(body))
            .unwrap();
        let (status, _, body) = send(&router, request).await;

        assert_eq!(status, StatusCode::OK);
        let reply: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(reply["Body"], "hi");
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].method, "Examples.Echo");
        assert_eq!(seen[0].params["Body"], "hi");
    }

    #[tokio::test]
    async fn form_mode_accepts_multipart_fields() {
        let broker = Arc::new(MemoryBroker::new());
        let seen = serve_echo(&broker, "svc_1.0");
        let router = test_router(broker, 5);

        let body = multipart_body(&pairs(&[("trade_no", "42"), ("status", "paid")]));
        let request = Request::post("/gateway/f/m/svc%7C1.0%7CSvc.Do")
            .header(header::CONTENT_TYPE, multipart_content_type())
            .body(Body::from(body))
            .unwrap();
        let (status, _, _) = send(&router, request).await;

        assert_eq!(status, StatusCode::OK);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].params["trade_no"], "42");
        assert_eq!(seen[0].params["status"], "paid");
        assert!(
            seen[0].params.get("upload").is_none(),
            "file part leaked into the payload"
        );
    }

    #[tokio::test]
    async fn malformed_multipart_reports_form_error() {
        let broker = Arc::new(MemoryBroker::new());
        let seen = serve_echo(&broker, "examples_1.0");
        let router = test_router(broker, 5);

        let query = query_string(&pairs(&[
            ("module", "examples"),
            ("version", "1.0"),
            ("method", "Examples.Echo"),
            ("bizContent", "{}"),
        ]));
        // A multipart content type with no boundary cannot be parsed.
        let request = Request::post(format!("/gateway?{query}"))
            .header(header::CONTENT_TYPE, "multipart/form-data")
            .body(Body::from("not multipart"))
            .unwrap();
        let (_, _, body) = send(&router, request).await;

        let (code, _) = envelope(&body);
        assert_eq!(code, 5000);
        assert!(seen.lock().unwrap().is_empty(), "backend was contacted");
    }

    #[tokio::test]
    async fn unknown_destination_reports_transport_error() {
        let broker = Arc::new(MemoryBroker::new());
        let router = test_router(broker, 5);

        let query = query_string(&pairs(&[
            ("module", "ghost"),
            ("version", "1.0"),
            ("method", "Any.Thing"),
            ("bizContent", "{}"),
        ]));
        let request = Request::get(format!("/gateway?{query}"))
            .body(Body::empty())
            .unwrap();
        let (_, _, body) = send(&router, request).await;

        let (code, message) = envelope(&body);
        assert_eq!(code, 5003);
        assert_eq!(message, "no such service: ghost_1.0");
    }

    #[tokio::test]
    async fn malformed_biz_content_reports_form_error() {
        let broker = Arc::new(MemoryBroker::new());
        let seen = serve_echo(&broker, "examples_1.0");
        let router = test_router(broker, 5);

        let query = query_string(&pairs(&[
            ("module", "examples"),
            ("version", "1.0"),
            ("method", "Examples.Echo"),
            ("bizContent", "not json"),
        ]));
        let request = Request::get(format!("/gateway?{query}"))
            .body(Body::empty())
            .unwrap();
        let (_, _, body) = send(&router, request).await;

        let (code, _) = envelope(&body);
        assert_eq!(code, 5000);
        assert!(seen.lock().unwrap().is_empty(), "backend was contacted");
    }

    #[tokio::test]
    async fn responses_carry_permissive_cors() {
        let broker = Arc::new(MemoryBroker::new());
        serve_echo(&broker, "examples_1.0");
        let router = test_router(broker, 5);

        let query = query_string(&pairs(&[
            ("module", "examples"),
            ("version", "1.0"),
            ("method", "Examples.Echo"),
            ("bizContent", "{}"),
        ]));
        let request = Request::get(format!("/gateway?{query}"))
            .header(header::ORIGIN, "http://example.com")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();

        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok()),
            Some("*")
        );
    }
}
