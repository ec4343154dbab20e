use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use kestrel_script_runtime::assets::EmbeddedAssetsBuilder;
use kestrel_script_runtime::base64;
use kestrel_script_runtime::bundle::BundleSource;
use kestrel_script_runtime::config::FetchConfig;
use kestrel_script_runtime::dispatch::ResultQueue;
use kestrel_script_runtime::fetch::{FetchClient, FetchError, FetchOptions, FetchResult};
use kestrel_script_runtime::scheduler::{FrameInfo, FrameScheduler};
use kestrel_script_runtime::script::{HostServices, ScriptHost};
use rhai::{Array, Map};
use tokio::runtime::Runtime;
use wiremock::matchers::{body_string, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn start_server() -> (Runtime, MockServer) {
    let rt = Runtime::new().expect("tokio runtime");
    let server = rt.block_on(MockServer::start());
    (rt, server)
}

fn mount(rt: &Runtime, server: &MockServer, mock: Mock) {
    rt.block_on(mock.mount(server));
}

fn client() -> (FetchClient, ResultQueue<FetchResult>) {
    let queue = ResultQueue::new();
    let client = FetchClient::new(&FetchConfig::default(), queue.clone()).expect("fetch client");
    (client, queue)
}

fn wait_for_results(queue: &ResultQueue<FetchResult>, count: usize) -> Vec<FetchResult> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut results = Vec::new();
    while results.len() < count {
        assert!(Instant::now() < deadline, "expected {count} results, got {}", results.len());
        results.extend(queue.drain_all());
        thread::sleep(Duration::from_millis(5));
    }
    results
}

fn body_text(result: &FetchResult) -> String {
    let response = result.response().expect("response");
    String::from_utf8(base64::decode(&response.body_base64).expect("base64 body")).expect("utf-8 body")
}

#[test]
fn concurrent_requests_complete_exactly_once_with_their_own_ids() {
    let (rt, server) = start_server();
    for index in 0..8 {
        mount(
            &rt,
            &server,
            Mock::given(method("GET"))
                .and(path(format!("/item/{index}")))
                .respond_with(ResponseTemplate::new(200).set_body_string(format!("item-{index}"))),
        );
    }
    let (mut fetch, queue) = client();
    let mut expected = HashMap::new();
    for index in 0..8 {
        let id = fetch.start(&format!("{}/item/{index}", server.uri()), FetchOptions::default()).expect("start");
        expected.insert(id, format!("item-{index}"));
    }

    let results = wait_for_results(&queue, 8);
    assert_eq!(results.len(), 8);
    for result in &results {
        let body = expected.remove(&result.id).expect("each id is delivered once");
        assert_eq!(body_text(result), body);
        assert!(result.response().is_some_and(|response| response.ok));
    }
    assert!(expected.is_empty());
    thread::sleep(Duration::from_millis(20));
    assert!(queue.is_empty(), "no duplicate deliveries");
    fetch.shutdown();
}

#[test]
fn manual_redirect_returns_the_redirect_response() {
    let (rt, server) = start_server();
    mount(
        &rt,
        &server,
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/new").insert_header("x-hop", "first")),
    );
    mount(
        &rt,
        &server,
        Mock::given(method("GET")).and(path("/new")).respond_with(ResponseTemplate::new(200).set_body_string("moved")),
    );
    let (mut fetch, queue) = client();

    let manual = FetchOptions { follow_redirects: false, ..FetchOptions::default() };
    fetch.start(&format!("{}/old", server.uri()), manual).expect("start manual");
    let result = wait_for_results(&queue, 1).remove(0);
    let response = result.response().expect("redirect response");
    assert_eq!(response.status, 302);
    assert!(!response.ok);
    assert!(response.headers.iter().any(|(name, value)| name == "x-hop" && value == "first"));

    fetch.start(&format!("{}/old", server.uri()), FetchOptions::default()).expect("start follow");
    let result = wait_for_results(&queue, 1).remove(0);
    let response = result.response().expect("final response");
    assert_eq!(response.status, 200);
    assert!(response.url.ends_with("/new"));
    assert!(response.headers.iter().all(|(name, _)| name != "x-hop"), "headers of the first hop are dropped");
    assert_eq!(body_text(&result), "moved");
    fetch.shutdown();
}

#[test]
fn redirect_loops_stop_at_the_configured_limit() {
    let (rt, server) = start_server();
    mount(
        &rt,
        &server,
        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/loop")),
    );
    let queue = ResultQueue::new();
    let config = FetchConfig { max_redirects: 3, ..FetchConfig::default() };
    let mut fetch = FetchClient::new(&config, queue.clone()).expect("fetch client");

    let id = fetch.start(&format!("{}/loop", server.uri()), FetchOptions::default()).expect("start");
    let result = wait_for_results(&queue, 1).remove(0);
    assert_eq!(result.id, id);
    let message = result.error_message().expect("redirect loop fails");
    assert!(message.starts_with("Too many redirects"), "unexpected error: {message}");
    fetch.shutdown();
}

#[test]
fn unrecognized_methods_are_sent_verbatim() {
    let (rt, server) = start_server();
    mount(
        &rt,
        &server,
        Mock::given(method("PURGE"))
            .and(path("/cache"))
            .respond_with(ResponseTemplate::new(200).set_body_string("purged")),
    );
    let (mut fetch, queue) = client();

    let purge = FetchOptions { method: Some("PURGE".into()), ..FetchOptions::default() };
    fetch.start(&format!("{}/cache", server.uri()), purge).expect("start purge");
    let result = wait_for_results(&queue, 1).remove(0);
    assert_eq!(result.response().map(|response| response.status), Some(200));
    assert_eq!(body_text(&result), "purged");
    fetch.shutdown();
}

#[test]
fn post_bodies_are_sent_and_timeouts_become_errors() {
    let (rt, server) = start_server();
    mount(
        &rt,
        &server,
        Mock::given(method("POST"))
            .and(path("/echo"))
            .and(body_string("payload"))
            .respond_with(ResponseTemplate::new(201).set_body_string("created")),
    );
    mount(
        &rt,
        &server,
        Mock::given(method("POST"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3))),
    );
    let (mut fetch, queue) = client();

    let post = FetchOptions {
        method: Some("POST".into()),
        body: Some(b"payload".to_vec()),
        ..FetchOptions::default()
    };
    let echo_id = fetch.start(&format!("{}/echo", server.uri()), post.clone()).expect("start echo");
    let slow = FetchOptions { timeout: Some(Duration::from_millis(200)), ..post };
    let slow_id = fetch.start(&format!("{}/slow", server.uri()), slow).expect("start slow");

    let results = wait_for_results(&queue, 2);
    let echo = results.iter().find(|result| result.id == echo_id).expect("echo result");
    assert_eq!(echo.response().map(|response| response.status), Some(201));
    let slow = results.iter().find(|result| result.id == slow_id).expect("slow result");
    assert_eq!(slow.error_message(), Some("Request timed out"));
    fetch.shutdown();
}

#[test]
fn invalid_urls_are_rejected_without_queuing_a_result() {
    let (mut fetch, queue) = client();
    assert!(matches!(fetch.start("   ", FetchOptions::default()), Err(FetchError::MissingUrl)));
    assert!(matches!(fetch.start("not a url", FetchOptions::default()), Err(FetchError::InvalidUrl { .. })));
    assert!(queue.is_empty());
    assert_eq!(fetch.in_flight(), 0);
}

#[test]
fn script_handler_sees_the_completion_on_the_next_frame() {
    let (rt, server) = start_server();
    mount(
        &rt,
        &server,
        Mock::given(method("GET")).and(path("/data")).respond_with(ResponseTemplate::new(200).set_body_string("{}")),
    );
    let code = format!(
        r#"
        let trace = [];
        let app_state = #{{ record: |result| trace.push(result), snapshot: || trace, seen: [] }};
        fn on_init() {{
            on_fetch_complete(this.record);
            fetch("{}/data", #{{ headers: #{{ "X-Test": "yes" }} }});
        }}
        fn on_frame(w, h, t) {{
            let snapshot = this.snapshot;
            this.seen = snapshot.call();
        }}
        "#,
        server.uri()
    );
    let (fetch, queue) = client();
    let source = BundleSource { name: "fetch.rhai".into(), code };
    let services = HostServices::new(EmbeddedAssetsBuilder::new().freeze()).with_fetch(fetch);
    let mut host = ScriptHost::new(&source, services).expect("bundle compiles");
    host.initialize().expect("on_init");

    let deadline = Instant::now() + Duration::from_secs(10);
    while queue.is_empty() {
        assert!(Instant::now() < deadline, "fetch did not complete");
        thread::sleep(Duration::from_millis(5));
    }
    let seen = |host: &ScriptHost| -> Array {
        let state = host.app_state().clone().try_cast::<Map>().expect("state map");
        state["seen"].clone().try_cast::<Array>().expect("seen array")
    };
    assert!(seen(&host).is_empty(), "nothing is delivered outside a frame");

    let mut scheduler = FrameScheduler::default();
    let frame = FrameInfo { now_ms: 16.0, width: 1, height: 1, elapsed_seconds: 0.016 };
    let report = scheduler.tick(&mut host, &queue, frame);
    assert_eq!(report.completions_delivered, 1);

    let seen = seen(&host);
    assert_eq!(seen.len(), 1);
    let payload = seen[0].clone().try_cast::<Map>().expect("payload map");
    assert_eq!(payload["id"].as_int(), Ok(1));
    assert_eq!(payload["status"].as_int(), Ok(200));
    assert_eq!(payload["ok"].as_bool(), Ok(true));
    assert_eq!(payload["body"].clone().into_string().as_deref(), Ok("e30="));
    host.shutdown_fetch();
}
