use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use serde_json::{json, Value as JsonValue};

use super::*;
use crate::{
    core::{ErrorKind, RequestHook, SyncError},
    normalize::MergeStrategy,
    store::StoreEvent,
    transport::TransportResponse,
};

struct Scripted {
    delay: Duration,
    response: SyncResult<TransportResponse>,
}

/// Transport answering from per-url scripts, `{}` when a script runs dry
#[derive(Default)]
struct MockTransport {
    routes: Mutex<HashMap<String, VecDeque<Scripted>>>,
    seen: Mutex<Vec<OutgoingRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    fn script(&self, url: &str, delay_ms: u64, response: SyncResult<TransportResponse>) {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(Scripted {
                delay: Duration::from_millis(delay_ms),
                response,
            });
    }

    fn reply(&self, url: &str, delay_ms: u64, body: JsonValue) {
        self.script(
            url,
            delay_ms,
            Ok(TransportResponse::new(StatusCode::OK, body.to_string())),
        );
    }

    fn seen(&self) -> Vec<OutgoingRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        request: OutgoingRequest,
        _signal: AbortSignal,
    ) -> SyncResult<TransportResponse> {
        let scripted = self
            .routes
            .lock()
            .unwrap()
            .get_mut(&request.url)
            .and_then(|queue| queue.pop_front());
        self.seen.lock().unwrap().push(request);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = match scripted {
            Some(scripted) => {
                tokio::time::sleep(scripted.delay).await;
                scripted.response
            }
            None => Ok(TransportResponse::new(StatusCode::OK, "{}")),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn coordinator_with(config: Config, transport: Arc<MockTransport>) -> Coordinator {
    Coordinator::builder(config)
        .transport(transport)
        .build()
        .unwrap()
}

fn coordinator(transport: Arc<MockTransport>) -> Coordinator {
    coordinator_with(Config::default(), transport)
}

fn users(ids: &[&str]) -> JsonValue {
    let data: Vec<JsonValue> = ids
        .iter()
        .map(|id| json!({"id": id, "name": format!("user {id}")}))
        .collect();
    json!({"userList": {"data": data, "primaryKey": "id"}})
}

#[tokio::test]
async fn test_newer_request_supersedes_in_flight_one() {
    let transport = Arc::new(MockTransport::default());
    transport.reply("/users", 200, users(&["stale"]));
    transport.reply("/users", 10, users(&["fresh"]));
    let coordinator = coordinator(transport.clone());
    let mut events = coordinator.store().subscribe();

    let first_outcome = Arc::new(Mutex::new(None));
    let first = {
        let coordinator = coordinator.clone();
        let captured = first_outcome.clone();
        let options = RequestOptions::get().on_result(move |result| {
            *captured.lock().unwrap() = Some(result.as_ref().err().map(|e| e.is_cancelled()));
        });
        tokio::spawn(async move { coordinator.submit("/users", options).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    let second = coordinator.submit("/users", RequestOptions::get()).await;
    let first = first.await.unwrap();

    assert!(first.is_cancelled());
    assert!(second.is_success());
    assert_eq!(*first_outcome.lock().unwrap(), Some(Some(true)));

    let storage = coordinator.store().storage();
    assert_eq!(
        storage["userList"],
        json!({"fresh": {"id": "fresh", "name": "user fresh"}})
    );
    assert_eq!(coordinator.registry().get_stats().request_count, 0);
    assert!(!coordinator.store().is_active("/users"));

    let errors = coordinator.store().error_history("/users");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].request_id, first.request_id);

    let mut first_removed = 0;
    while let Ok(event) = events.try_recv() {
        if let StoreEvent::ActivityRemoved { request_id, .. } = event {
            if request_id == first.request_id {
                first_removed += 1;
            }
        }
    }
    assert_eq!(first_removed, 1);
}

#[tokio::test]
async fn test_dropped_submit_settles_as_cancelled() {
    let transport = Arc::new(MockTransport::default());
    transport.reply("/slow", 500, json!({"slow": {"v": 1}}));
    let coordinator = coordinator(transport);

    let outcome = Arc::new(Mutex::new(None));
    let captured = outcome.clone();
    let options = RequestOptions::get().on_result(move |result| {
        *captured.lock().unwrap() = Some(result.as_ref().err().map(|e| e.is_cancelled()));
    });

    let timed_out = tokio::time::timeout(
        Duration::from_millis(20),
        coordinator.submit("/slow", options),
    )
    .await;
    assert!(timed_out.is_err());

    assert!(!coordinator.store().is_active("/slow"));
    assert_eq!(coordinator.registry().get_stats().request_count, 0);
    assert_eq!(*outcome.lock().unwrap(), Some(Some(true)));

    let errors = coordinator.store().error_history("/slow");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].is_cancelled());
    assert!(!coordinator
        .registry()
        .is_latest("/slow", &errors[0].request_id));

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(coordinator.store().storage().is_empty());
    assert_eq!(coordinator.store().error_history("/slow").len(), 1);

    let next = coordinator.submit("/slow", RequestOptions::get()).await;
    assert!(next.is_success());
}

#[tokio::test]
async fn test_text_response_does_not_touch_storage() {
    let transport = Arc::new(MockTransport::default());
    transport.script(
        "/motd",
        0,
        Ok(TransportResponse::new(StatusCode::OK, "hello")),
    );
    let coordinator = coordinator(transport);
    let mut events = coordinator.store().subscribe();

    let record = coordinator
        .submit("/motd", RequestOptions::get().response_type(ResponseType::Text))
        .await;

    assert_eq!(
        record.payload(),
        Some(&ResponsePayload::Text("hello".to_string()))
    );
    assert!(coordinator.store().storage().is_empty());
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, StoreEvent::StorageReplaced { .. }));
    }
}

#[tokio::test]
async fn test_different_endpoints_do_not_cancel_each_other() {
    let transport = Arc::new(MockTransport::default());
    transport.reply("/a", 50, json!({"a": {"x": 1}}));
    transport.reply("/b", 10, json!({"b": {"y": 2}}));
    let coordinator = coordinator(transport);

    let (a, b) = tokio::join!(
        coordinator.submit("/a", RequestOptions::get()),
        coordinator.submit("/b", RequestOptions::get()),
    );

    assert!(a.is_success());
    assert!(b.is_success());
    let storage = coordinator.store().storage();
    assert_eq!(storage["a"], json!({"x": 1}));
    assert_eq!(storage["b"], json!({"y": 2}));
}

#[tokio::test]
async fn test_activity_is_added_and_removed_once() {
    let transport = Arc::new(MockTransport::default());
    transport.reply("/slow", 50, json!({}));
    let coordinator = coordinator(transport);
    let mut events = coordinator.store().subscribe();

    let pending = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.submit("/slow", RequestOptions::get()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(coordinator.store().is_active("/slow"));
    assert_eq!(coordinator.store().active_count(), 1);

    let record = pending.await.unwrap();
    assert!(!coordinator.store().is_active("/slow"));

    let mut added = 0;
    let mut removed = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            StoreEvent::ActivityAdded { request_id, .. } => {
                assert_eq!(request_id, record.request_id);
                added += 1;
            }
            StoreEvent::ActivityRemoved { request_id, .. } => {
                assert_eq!(request_id, record.request_id);
                removed += 1;
            }
            _ => {}
        }
    }
    assert_eq!((added, removed), (1, 1));
}

#[tokio::test]
async fn test_history_keeps_settlement_order() {
    let transport = Arc::new(MockTransport::default());
    transport.reply("/log", 0, json!({}));
    transport.script("/log", 0, Err(SyncError::network("connection reset")));
    transport.reply("/log", 0, json!({}));
    let mut config = Config::default();
    config.modules.cancellation = false;
    let coordinator = coordinator_with(config, transport);

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(
            coordinator
                .submit("/log", RequestOptions::get())
                .await
                .request_id
                .clone(),
        );
    }

    let success: Vec<_> = coordinator
        .store()
        .success_history("/log")
        .iter()
        .map(|r| r.request_id.clone())
        .collect();
    let errors = coordinator.store().error_history("/log");
    assert_eq!(success, vec![ids[0].clone(), ids[2].clone()]);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].request_id, ids[1]);
    assert_eq!(errors[0].error().map(|e| e.kind()), Some(ErrorKind::Network));
}

#[tokio::test]
async fn test_history_clear_drops_previous_entries() {
    let transport = Arc::new(MockTransport::default());
    let coordinator = coordinator(transport);

    coordinator.submit("/h", RequestOptions::get()).await;
    coordinator.submit("/h", RequestOptions::get()).await;
    assert_eq!(coordinator.store().success_history("/h").len(), 2);

    let last = coordinator
        .submit("/h", RequestOptions::get().history_clear())
        .await;
    let history = coordinator.store().success_history("/h");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].request_id, last.request_id);

    coordinator.clear_history(None);
    assert!(coordinator.store().success_history("/h").is_empty());
}

#[tokio::test]
async fn test_ignore_skips_storage_but_runs_callback() {
    let transport = Arc::new(MockTransport::default());
    transport.reply("/cfg", 0, json!({"settings": {"theme": "dark"}}));
    let coordinator = coordinator(transport);

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let record = coordinator
        .submit(
            "/cfg",
            RequestOptions::get().ignore().on_result(move |result| {
                assert_eq!(
                    result.as_ref().ok().and_then(|p| p.as_json()),
                    Some(&json!({"settings": {"theme": "dark"}}))
                );
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await;

    assert!(record.is_success());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(coordinator.store().storage().is_empty());
    assert_eq!(coordinator.store().success_history("/cfg").len(), 1);
}

#[tokio::test]
async fn test_callback_receives_error() {
    let transport = Arc::new(MockTransport::default());
    transport.script(
        "/fail",
        0,
        Ok(TransportResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "boom")),
    );
    let coordinator = coordinator(transport);

    let status = Arc::new(Mutex::new(None));
    let captured = status.clone();
    let record = coordinator
        .submit(
            "/fail",
            RequestOptions::get().on_result(move |result| {
                *captured.lock().unwrap() = result.as_ref().err().and_then(|e| e.http_status());
            }),
        )
        .await;

    assert!(!record.is_success());
    assert_eq!(*status.lock().unwrap(), Some(500));
    assert!(coordinator.store().storage().is_empty());
}

#[tokio::test]
async fn test_headers_and_json_body() {
    let transport = Arc::new(MockTransport::default());
    let mut config = Config::default();
    config.base_url = Some("https://api.example.com/".to_string());
    config
        .request
        .default_headers
        .insert("x-client".to_string(), "default".to_string());
    config
        .request
        .default_body
        .insert("locale".to_string(), json!("en"));
    let coordinator = coordinator_with(config, transport.clone());

    let record = coordinator
        .submit(
            "/items",
            RequestOptions::post()
                .body(json!({"name": "book"}))
                .header(
                    HeaderName::from_static("x-client"),
                    HeaderValue::from_static("override"),
                ),
        )
        .await;

    let seen = transport.seen();
    assert_eq!(seen.len(), 1);
    let request = &seen[0];
    assert_eq!(request.url, "https://api.example.com/items");
    assert_eq!(request.headers["x-client"], "override");
    assert_eq!(request.headers[CONTENT_TYPE], JSON_CONTENT_TYPE);
    assert_eq!(
        request.headers["x-request-id"],
        record.request_id.as_str()
    );
    match &request.body {
        RequestBody::Json(bytes) => {
            let body: JsonValue = serde_json::from_slice(bytes).unwrap();
            assert_eq!(body, json!({"locale": "en", "name": "book"}));
        }
        other => panic!("unexpected body {other:?}"),
    }
}

#[tokio::test]
async fn test_get_sends_no_body() {
    let transport = Arc::new(MockTransport::default());
    let coordinator = coordinator(transport.clone());

    coordinator
        .submit("/q", RequestOptions::get().body(json!({"ignored": true})))
        .await;

    assert_eq!(transport.seen()[0].body, RequestBody::Empty);
}

#[tokio::test]
async fn test_multipart_leaves_content_type_to_transport() {
    let transport = Arc::new(MockTransport::default());
    let coordinator = coordinator(transport.clone());

    coordinator
        .submit(
            "/upload",
            RequestOptions::post()
                .body(json!({"album": "summer"}))
                .file(FileAttachment::new("a.png", vec![1u8, 2, 3]).with_content_type("image/png"))
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json")),
        )
        .await;

    let request = &transport.seen()[0];
    assert!(request.body.is_multipart());
    assert!(!request.headers.contains_key(CONTENT_TYPE));
}

#[tokio::test]
async fn test_disabled_modules_are_skipped() {
    let transport = Arc::new(MockTransport::default());
    transport.reply("/off", 0, json!({"k": {"v": 1}}));
    let mut config = Config::default();
    config.modules = Modules {
        listener: false,
        history: false,
        storage: false,
        cancellation: false,
    };
    let coordinator = coordinator_with(config, transport);
    let mut events = coordinator.store().subscribe();

    let record = coordinator.submit("/off", RequestOptions::get()).await;

    assert!(record.is_success());
    assert!(coordinator.store().storage().is_empty());
    assert!(coordinator.store().success_history("/off").is_empty());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_user_list_merges_across_requests() {
    let transport = Arc::new(MockTransport::default());
    transport.reply("/users?page=1", 0, users(&["1", "2"]));
    transport.reply("/users?page=1", 0, users(&["9"]));
    transport.reply(
        "/users?page=2",
        0,
        json!({"userList": {"data": [{"id": 2, "name": "renamed"}, {"id": 3}], "primaryKey": "id"}}),
    );
    let coordinator = coordinator(transport);

    coordinator
        .submit("/users?page=1", RequestOptions::get())
        .await;
    coordinator
        .submit("/users?page=2", RequestOptions::get())
        .await;

    let storage = coordinator.store().storage();
    assert_eq!(
        storage["userList"],
        json!({
            "1": {"id": "1", "name": "user 1"},
            "2": {"id": 2, "name": "renamed"},
            "3": {"id": 3},
        })
    );

    coordinator
        .submit(
            "/users?page=1",
            RequestOptions::get().strategy("userList", MergeStrategy::Replace),
        )
        .await;
    assert_eq!(
        coordinator.store().storage()["userList"],
        json!({"9": {"id": "9", "name": "user 9"}})
    );
}

#[tokio::test]
async fn test_custom_normalizer_wins_over_builtin() {
    let transport = Arc::new(MockTransport::default());
    transport.reply("/n", 0, json!({"count": 3}));
    let coordinator = Coordinator::builder(Config::default())
        .transport(transport)
        .normalizer(Arc::new(
            |current: &Storage, _response: &JsonValue, _strategies: &StrategyTable| {
                let mut next = current.clone();
                next.insert("system".to_string(), json!(true));
                next
            },
        ))
        .build()
        .unwrap();

    coordinator.submit("/n", RequestOptions::get()).await;
    assert_eq!(coordinator.store().storage()["system"], json!(true));

    coordinator
        .submit(
            "/n",
            RequestOptions::get().normalize_with(|current, response, _| {
                let mut next = current.clone();
                next.insert("raw".to_string(), response.clone());
                next
            }),
        )
        .await;
    assert_eq!(coordinator.store().storage()["raw"], json!({}));
}

#[tokio::test]
async fn test_stale_response_is_not_committed() {
    // A transport that ignores the abort signal and still answers late
    struct Stubborn;

    #[async_trait]
    impl Transport for Stubborn {
        async fn send(
            &self,
            request: OutgoingRequest,
            _signal: AbortSignal,
        ) -> SyncResult<TransportResponse> {
            Ok(TransportResponse::new(
                StatusCode::OK,
                json!({"owner": {"id": request.request_id.as_str()}}).to_string(),
            ))
        }
    }

    let coordinator = Coordinator::builder(Config::default())
        .transport(Arc::new(Stubborn))
        .build()
        .unwrap();

    // Another request became the latest for this endpoint and has settled
    let (other, _) = abort_pair();
    let someone_else = RequestId::from("someone-else");
    coordinator
        .registry()
        .supersede("/owner", someone_else.clone(), other);
    coordinator.registry().unregister(&someone_else);
    let stale = RequestContext::new("/owner", RequestId::from("stale"), Method::GET);
    let (_handle, signal) = abort_pair();
    coordinator
        .commit(
            &stale,
            &RequestOptions::get(),
            &signal,
            &ResponsePayload::Json(json!({"owner": {"id": "stale"}})),
        )
        .await;
    assert!(coordinator.store().storage().is_empty());

    let record = coordinator.submit("/owner", RequestOptions::get()).await;
    assert_eq!(
        coordinator.store().storage()["owner"]["id"],
        json!(record.request_id.as_str())
    );
}

#[tokio::test]
async fn test_submit_sequential_runs_in_order() {
    let transport = Arc::new(MockTransport::default());
    transport.reply("/seq/1", 40, json!({}));
    transport.reply("/seq/2", 0, json!({}));
    transport.reply("/seq/3", 10, json!({}));
    let coordinator = coordinator(transport.clone());

    let tickets: Vec<_> = (1..=3)
        .map(|i| coordinator.submit_sequential(format!("/seq/{i}"), RequestOptions::get()))
        .collect();
    assert_eq!(coordinator.queue().length(), 3);

    for ticket in tickets {
        assert!(ticket.await.unwrap().is_success());
    }

    let urls: Vec<_> = transport.seen().into_iter().map(|r| r.url).collect();
    assert_eq!(urls, vec!["/seq/1", "/seq/2", "/seq/3"]);
    assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.queue().length(), 0);
}

#[tokio::test]
async fn test_before_send_error_settles_request() {
    struct Reject;

    #[async_trait]
    impl RequestHook for Reject {
        fn name(&self) -> &str {
            "reject"
        }

        fn priority(&self) -> i32 {
            1
        }

        async fn before_send(
            &self,
            _ctx: &mut RequestContext,
            _request: &mut OutgoingRequest,
        ) -> SyncResult<()> {
            Err(SyncError::Internal("rejected".to_string()))
        }
    }

    let transport = Arc::new(MockTransport::default());
    let coordinator = Coordinator::builder(Config::default())
        .transport(transport.clone())
        .hook(Arc::new(Reject))
        .build()
        .unwrap();

    let record = coordinator.submit("/r", RequestOptions::get()).await;

    assert_eq!(record.error(), Some(&SyncError::Internal("rejected".to_string())));
    assert!(transport.seen().is_empty());
    assert!(!coordinator.store().is_active("/r"));
    assert_eq!(coordinator.registry().get_stats().request_count, 0);
    assert_eq!(coordinator.store().error_history("/r").len(), 1);
}

#[test]
fn test_resolve_url() {
    assert_eq!(resolve_url(None, "/a"), "/a");
    assert_eq!(resolve_url(Some("http://h/"), "/a"), "http://h/a");
    assert_eq!(resolve_url(Some("http://h"), "a"), "http://h/a");
    assert_eq!(
        resolve_url(Some("http://h"), "https://other/x"),
        "https://other/x"
    );
}
