//! Correlator tests.
//! - out-of-order responses reach the right caller
//! - adapter failures, unmatched responses, malformed frames
//! - disconnect fails pending work and rejects new sends
//! - reverse requests with and without a handler

use std::time::Duration;

use serde_json::{json, Value};

use crate::codec::{frame, Message};
use crate::error::DapError;
use crate::protocol::ThreadsResponseBody;
use crate::test_support::{manual_pair, settle};

#[tokio::test(flavor = "current_thread")]
async fn responses_are_matched_by_request_seq() {
    let (client, mut adapter) = manual_pair();

    let first = tokio::spawn({
        let client = client.clone();
        async move { client.send("evaluate", Some(json!({"expression": "a"}))).await }
    });
    let second = tokio::spawn({
        let client = client.clone();
        async move { client.send("evaluate", Some(json!({"expression": "b"}))).await }
    });

    let request_a = adapter.next_request().await;
    let request_b = adapter.next_request().await;
    let (request_a, request_b) = if request_a.arguments.as_ref().map(|a| a["expression"].clone())
        == Some(json!("a"))
    {
        (request_a, request_b)
    } else {
        (request_b, request_a)
    };
    assert_ne!(request_a.seq, request_b.seq);

    adapter.respond(&request_b, json!({"result": "B"})).await;
    adapter.respond(&request_a, json!({"result": "A"})).await;

    let first = first.await.expect("join first").expect("first ok");
    let second = second.await.expect("join second").expect("second ok");
    assert_eq!(first, Some(json!({"result": "A"})));
    assert_eq!(second, Some(json!({"result": "B"})));
}

#[tokio::test(flavor = "current_thread")]
async fn failed_response_completes_only_its_caller() {
    let (client, mut adapter) = manual_pair();
    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.send("stackTrace", Some(json!({"threadId": 9}))).await }
    });
    let request = adapter.next_request().await;
    adapter.fail(&request, "unknown thread").await;

    let outcome = pending.await.expect("join");
    assert_eq!(
        outcome,
        Err(DapError::Adapter {
            command: "stackTrace".into(),
            message: "unknown thread".to_string(),
        })
    );
    assert!(!client.is_closed());
}

#[tokio::test(flavor = "current_thread")]
async fn typed_request_decodes_body() {
    let (client, mut adapter) = manual_pair();
    let pending = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .request::<Option<Value>, ThreadsResponseBody>("threads", None)
                .await
        }
    });
    let request = adapter.next_request().await;
    assert!(request.arguments.is_none());
    adapter
        .respond(&request, json!({"threads": [{"id": 1, "name": "main"}]}))
        .await;
    let body = pending.await.expect("join").expect("threads");
    assert_eq!(body.threads.len(), 1);
    assert_eq!(body.threads[0].name, "main");
}

#[tokio::test(flavor = "current_thread")]
async fn unmatched_and_malformed_messages_keep_pump_alive() {
    let (client, mut adapter) = manual_pair();
    let mut output = client.subscribe("output");

    adapter
        .send_raw(&frame(
            br#"{"seq":1,"type":"response","request_seq":999,"success":true,"command":"threads"}"#,
        ))
        .await;
    adapter.send_raw(&frame(b"{broken")).await;
    adapter.send_raw(b"X-Unknown: 1\r\n\r\n").await;
    adapter
        .event("output", json!({"output": "still alive\n"}))
        .await;

    let event = output.recv().await.expect("output event");
    assert_eq!(event.body, Some(json!({"output": "still alive\n"})));
    assert!(!client.is_closed());
}

#[tokio::test(flavor = "current_thread")]
async fn non_utf8_header_keeps_pump_alive() {
    let (client, mut adapter) = manual_pair();
    let mut output = client.subscribe("output");

    adapter.send_raw(b"X-Junk: \xff\xfe\r\n\r\n").await;
    adapter
        .event("output", json!({"output": "after junk\n"}))
        .await;

    let event = tokio::time::timeout(Duration::from_secs(1), output.recv())
        .await
        .expect("event before timeout")
        .expect("output event");
    assert_eq!(event.body, Some(json!({"output": "after junk\n"})));
    assert!(!client.is_closed());
}

#[tokio::test(flavor = "current_thread")]
async fn disconnect_fails_all_pending_requests() {
    let (client, mut adapter) = manual_pair();
    let mut waiters = Vec::new();
    for command in ["threads", "stackTrace", "scopes"] {
        let client = client.clone();
        waiters.push(tokio::spawn(async move { client.send(command, None).await }));
    }
    for _ in 0..3 {
        adapter.next_request().await;
    }
    drop(adapter);

    for waiter in waiters {
        assert_eq!(waiter.await.expect("join"), Err(DapError::Disconnected));
    }
    tokio::time::timeout(Duration::from_secs(1), client.closed())
        .await
        .expect("closed resolves");
    assert!(client.is_closed());
    assert_eq!(client.send("threads", None).await, Err(DapError::Disconnected));
}

#[tokio::test(flavor = "current_thread")]
async fn subscriptions_end_on_disconnect() {
    let (client, adapter) = manual_pair();
    let mut stopped = client.subscribe("stopped");
    drop(adapter);
    assert!(stopped.recv().await.is_none());
}

#[tokio::test(flavor = "current_thread")]
async fn abandoned_wait_does_not_break_later_requests() {
    let (client, mut adapter) = manual_pair();
    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        client.send("evaluate", Some(json!({"expression": "slow"}))),
    )
    .await;
    assert!(abandoned.is_err());
    let slow = adapter.next_request().await;

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.send("threads", None).await }
    });
    let threads = adapter.next_request().await;
    adapter.respond(&slow, json!({"result": "late"})).await;
    adapter.respond(&threads, json!({"threads": []})).await;

    assert_eq!(
        pending.await.expect("join"),
        Ok(Some(json!({"threads": []})))
    );
}

#[tokio::test(flavor = "current_thread")]
async fn reverse_request_without_handler_gets_error_reply() {
    let (_client, mut adapter) = manual_pair();
    let seq = adapter
        .reverse_request("runInTerminal", json!({"cwd": "/tmp", "args": ["python3"]}))
        .await;
    let Message::Response(response) = adapter.next_message().await else {
        panic!("expected response");
    };
    assert_eq!(response.request_seq, seq);
    assert!(!response.success);
    assert_eq!(response.command, "runInTerminal");
}

#[tokio::test(flavor = "current_thread")]
async fn reverse_request_handler_answers() {
    let (client, mut adapter) = manual_pair();
    let mut requests = client.reverse_requests();
    let seq = adapter
        .reverse_request("runInTerminal", json!({"cwd": "/tmp", "args": ["python3"]}))
        .await;
    let request = requests.recv().await.expect("reverse request");
    assert_eq!(request.seq, seq);
    client
        .respond(request.seq, &request.command, Ok(Some(json!({"processId": 42}))))
        .expect("respond");

    let Message::Response(response) = adapter.next_message().await else {
        panic!("expected response");
    };
    assert!(response.success);
    assert_eq!(response.body, Some(json!({"processId": 42})));
    settle().await;
}
