use super::*;
use crate::{
    execution::{Execution, Output, TaskFailure},
    registry::{TaskHandler, task_fn},
    transport::TaskStream,
};
use core::time::Duration;
use futures::future::{Either, select};
use portable_atomic::AtomicUsize;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use taskwire_core::{TaskReply, TaskRequest, TaskResult};
use tokio::{
    sync::{Semaphore, mpsc},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::Status;

const TOKEN: &str = "secret";

#[derive(Default)]
struct Shared {
    stream: Mutex<Option<mpsc::UnboundedReceiver<Result<TaskRequest>>>>,
    replies: Mutex<Option<mpsc::UnboundedSender<(String, TaskReply)>>>,
    events: Mutex<Vec<Event>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    closed: AtomicBool,
    fail_replies: AtomicBool,
    reply_delay: Mutex<Option<Duration>>,
}

/// In-memory stand-in for the orchestrator connection.
#[derive(Clone, Default)]
struct MockTransport(Arc<Shared>);

#[tonic::async_trait]
impl Transport for MockTransport {
    async fn open_task_stream(&self, token: &str) -> Result<TaskStream> {
        assert_eq!(token, TOKEN);
        self.0.opens.fetch_add(1, Ordering::SeqCst);
        let rx = self
            .0
            .stream
            .lock()
            .take()
            .ok_or_else(|| Status::failed_precondition("stream already open"))?;
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn send_reply(&self, token: &str, reply: TaskReply, _timeout: Duration) -> Result<()> {
        if self.0.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        if self.0.fail_replies.load(Ordering::SeqCst) {
            return Err(Status::unavailable("orchestrator unavailable").into());
        }
        let delay = *self.0.reply_delay.lock();
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        if let Some(tx) = self.0.replies.lock().as_ref() {
            let _ = tx.send((token.to_string(), reply));
        }
        Ok(())
    }

    async fn emit_event(&self, token: &str, event: Event, _timeout: Duration) -> Result<()> {
        assert_eq!(token, TOKEN);
        if self.0.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        self.0.events.lock().push(event);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
        self.0.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    transport: MockTransport,
    tasks: Option<mpsc::UnboundedSender<Result<TaskRequest>>>,
    replies: mpsc::UnboundedReceiver<(String, TaskReply)>,
}

impl Harness {
    fn send(&self, execution_id: &str, task_key: &str, input: &str) {
        self.send_item(Ok(TaskRequest::new(execution_id, task_key, input)));
    }

    fn send_item(&self, item: Result<TaskRequest>) {
        self.tasks
            .as_ref()
            .expect("stream already ended")
            .send(item)
            .expect("listener dropped the stream");
    }

    fn end_stream(&mut self) {
        self.tasks = None;
    }

    async fn next_reply(&mut self) -> TaskReply {
        let (token, reply) = timeout(Duration::from_secs(2), self.replies.recv())
            .await
            .expect("timed out waiting for a reply")
            .expect("reply channel closed");
        assert_eq!(token, TOKEN);
        reply
    }

    fn drain_replies(&mut self) -> Vec<TaskReply> {
        let mut replies = Vec::new();
        while let Ok((_, reply)) = self.replies.try_recv() {
            replies.push(reply);
        }
        replies
    }

    fn opens(&self) -> usize {
        self.transport.0.opens.load(Ordering::SeqCst)
    }

    fn closes(&self) -> usize {
        self.transport.0.closes.load(Ordering::SeqCst)
    }
}

fn config() -> ServiceConfig {
    ServiceConfig::new("mock:0", TOKEN).with_call_timeout(Duration::from_secs(1))
}

fn setup_with(config: ServiceConfig) -> (Service<MockTransport>, Harness) {
    let (task_tx, task_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();

    let transport = MockTransport::default();
    *transport.0.stream.lock() = Some(task_rx);
    *transport.0.replies.lock() = Some(reply_tx);

    let service = Service::with_transport(config, transport.clone()).unwrap();
    let harness = Harness {
        transport,
        tasks: Some(task_tx),
        replies: reply_rx,
    };
    (service, harness)
}

fn setup() -> (Service<MockTransport>, Harness) {
    setup_with(config())
}

fn spawn_listen(
    service: &Service<MockTransport>,
    registry: HandlerRegistry,
) -> JoinHandle<Result<()>> {
    let service = service.clone();
    tokio::spawn(async move { service.listen(registry).await })
}

async fn wait_for_in_flight(service: &Service<MockTransport>, expected: usize) {
    timeout(Duration::from_secs(2), async {
        while service.in_flight() != expected {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "in-flight count stuck at {} (expected {expected})",
            service.in_flight()
        )
    });
}

#[derive(Deserialize)]
struct SumInput {
    a: i64,
    b: i64,
}

fn sum_handler() -> impl TaskHandler {
    task_fn("sum", |execution: Execution| async move {
        let input: SumInput = execution.decode_input()?;
        Ok::<_, TaskFailure>(Output::new("result", json!({ "result": input.a + input.b })))
    })
}

fn registry() -> HandlerRegistry {
    HandlerRegistry::new().with(sum_handler()).unwrap()
}

fn output(execution_id: &str, key: &str, data: &str) -> TaskReply {
    TaskReply {
        execution_id: execution_id.to_string(),
        result: TaskResult::Output {
            key: key.to_string(),
            data: data.to_string(),
        },
    }
}

#[tokio::test]
async fn sum_reply_carries_correlation_id() {
    let (service, mut harness) = setup();
    let listener = spawn_listen(&service, registry());

    harness.send("exec-1", "sum", r#"{"a":2,"b":3}"#);
    let reply = harness.next_reply().await;
    assert_eq!(reply, output("exec-1", "result", r#"{"result":5}"#));

    service.shutdown().await.unwrap();
    listener.await.unwrap().unwrap();

    assert_eq!(service.state(), ServiceState::Closed);
    assert_eq!(service.in_flight(), 0);
    assert_eq!(harness.opens(), 1);
    assert_eq!(harness.closes(), 1);
}

#[tokio::test]
async fn unknown_task_is_dropped_and_stream_continues() {
    let (service, mut harness) = setup();
    let listener = spawn_listen(&service, registry());

    harness.send("exec-1", "foo", "{}");
    harness.send("exec-2", "sum", r#"{"a":1,"b":1}"#);

    let reply = harness.next_reply().await;
    assert_eq!(reply, output("exec-2", "result", r#"{"result":2}"#));

    service.shutdown().await.unwrap();
    listener.await.unwrap().unwrap();
    assert!(harness.drain_replies().is_empty());
}

#[tokio::test]
async fn in_flight_returns_to_idle_level_after_execution() {
    let (service, mut harness) = setup();
    let listener = spawn_listen(&service, registry());

    // While listening, the pending receive holds one slot.
    wait_for_in_flight(&service, 1).await;
    assert_eq!(service.state(), ServiceState::Listening);

    harness.send("exec-1", "sum", r#"{"a":2,"b":3}"#);
    harness.next_reply().await;
    wait_for_in_flight(&service, 1).await;

    service.shutdown().await.unwrap();
    listener.await.unwrap().unwrap();
    assert_eq!(service.in_flight(), 0);
}

#[tokio::test]
async fn concurrent_listen_is_rejected() {
    let (service, harness) = setup();
    let a = spawn_listen(&service, registry());
    let b = spawn_listen(&service, registry());

    let (first, other) = match select(a, b).await {
        Either::Left((result, other)) | Either::Right((result, other)) => (result, other),
    };
    assert!(matches!(first.unwrap(), Err(Error::AlreadyListening)));

    service.shutdown().await.unwrap();
    other.await.unwrap().unwrap();
    assert_eq!(harness.opens(), 1);
}

#[tokio::test]
async fn listen_after_listen_returned_is_rejected() {
    let (service, mut harness) = setup();
    let listener = spawn_listen(&service, registry());
    harness.end_stream();
    assert!(matches!(listener.await.unwrap(), Err(Error::StreamEnded)));

    // The slot stays claimed after a terminal error.
    assert_eq!(service.state(), ServiceState::Listening);
    assert_eq!(service.in_flight(), 0);

    let err = service.listen(registry()).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyListening));
    assert_eq!(harness.opens(), 1);

    service.shutdown().await.unwrap();
    assert_eq!(service.state(), ServiceState::Closed);
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_executions() {
    let (service, mut harness) = setup();

    let gate = Arc::new(Semaphore::new(0));
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let blocking = {
        let gate = Arc::clone(&gate);
        task_fn("block", move |execution: Execution| {
            let gate = Arc::clone(&gate);
            let started_tx = started_tx.clone();
            async move {
                let _ = started_tx.send(execution.id().to_string());
                gate.acquire().await?.forget();
                Ok::<_, TaskFailure>(Output::new("done", json!(true)))
            }
        })
    };
    let registry = registry().with(blocking).unwrap();
    let listener = spawn_listen(&service, registry);

    for id in ["exec-1", "exec-2", "exec-3"] {
        harness.send(id, "block", "{}");
    }
    for _ in 0..3 {
        timeout(Duration::from_secs(2), started_rx.recv())
            .await
            .expect("handler did not start")
            .unwrap();
    }

    let shutdown = {
        let service = service.clone();
        tokio::spawn(async move { service.shutdown().await })
    };

    sleep(Duration::from_millis(50)).await;
    assert!(!shutdown.is_finished());
    assert_eq!(service.state(), ServiceState::Draining);

    gate.add_permits(3);
    timeout(Duration::from_secs(2), shutdown)
        .await
        .expect("shutdown must finish once executions complete")
        .unwrap()
        .unwrap();
    listener.await.unwrap().unwrap();

    let ids: HashSet<_> = harness
        .drain_replies()
        .into_iter()
        .map(|reply| reply.execution_id)
        .collect();
    let expected: HashSet<_> = ["exec-1", "exec-2", "exec-3"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(ids, expected);
    assert_eq!(service.in_flight(), 0);
    assert_eq!(harness.closes(), 1);
}

#[tokio::test]
async fn buffered_tasks_are_not_dispatched_after_cancel() {
    let (service, mut harness) = setup();
    let listener = spawn_listen(&service, registry());
    wait_for_in_flight(&service, 1).await;

    // Queued before cancellation but never polled: the listener only runs
    // again once shutdown yields, and by then the stream is cancelled.
    harness.send("late-1", "sum", r#"{"a":1,"b":2}"#);
    harness.send("late-2", "sum", r#"{"a":3,"b":4}"#);
    service.shutdown().await.unwrap();

    listener.await.unwrap().unwrap();
    sleep(Duration::from_millis(20)).await;
    assert!(harness.drain_replies().is_empty());
    assert_eq!(service.in_flight(), 0);
    assert_eq!(service.state(), ServiceState::Closed);
}

#[tokio::test]
async fn double_shutdown_closes_once() {
    let (service, harness) = setup();
    let listener = spawn_listen(&service, registry());
    wait_for_in_flight(&service, 1).await;

    let (a, b) = tokio::join!(service.shutdown(), service.shutdown());
    a.unwrap();
    b.unwrap();
    service.shutdown().await.unwrap();

    listener.await.unwrap().unwrap();
    assert_eq!(harness.closes(), 1);
    assert_eq!(service.state(), ServiceState::Closed);
}

#[tokio::test]
async fn panicking_handler_is_reported_and_drained() {
    let (service, mut harness) = setup();
    let boom = task_fn("boom", |_execution: Execution| async move {
        if true {
            panic!("kaboom");
        }
        Ok::<_, TaskFailure>(Output::new("never", json!(null)))
    });
    let listener = spawn_listen(&service, registry().with(boom).unwrap());

    harness.send("exec-1", "boom", "{}");
    let reply = harness.next_reply().await;
    assert_eq!(reply.execution_id, "exec-1");
    assert_eq!(
        reply.result,
        TaskResult::Error("task panicked: kaboom".to_string())
    );

    harness.send("exec-2", "sum", r#"{"a":20,"b":22}"#);
    let reply = harness.next_reply().await;
    assert_eq!(reply, output("exec-2", "result", r#"{"result":42}"#));

    service.shutdown().await.unwrap();
    listener.await.unwrap().unwrap();
    assert_eq!(service.in_flight(), 0);
}

#[tokio::test]
async fn handler_error_is_reported_as_failure() {
    let (service, mut harness) = setup();
    let listener = spawn_listen(&service, registry());

    harness.send("exec-1", "sum", r#"{"a":"two"}"#);
    let reply = harness.next_reply().await;
    assert_eq!(reply.execution_id, "exec-1");
    match reply.result {
        TaskResult::Error(message) => assert!(message.contains("Invalid task input")),
        other => panic!("expected an error reply, got {other:?}"),
    }

    service.shutdown().await.unwrap();
    listener.await.unwrap().unwrap();
}

#[tokio::test]
async fn stream_error_is_terminal() {
    let (service, harness) = setup();
    let listener = spawn_listen(&service, registry());

    harness.send_item(Err(Status::unavailable("orchestrator gone").into()));
    let result = timeout(Duration::from_secs(2), listener)
        .await
        .unwrap()
        .unwrap();
    match result {
        Err(Error::Rpc(status)) => assert_eq!(status.code(), tonic::Code::Unavailable),
        other => panic!("expected the stream error, got {other:?}"),
    }

    assert_eq!(service.in_flight(), 0);
    service.shutdown().await.unwrap();
    assert_eq!(harness.closes(), 1);
}

#[tokio::test]
async fn stream_end_is_terminal() {
    let (service, mut harness) = setup();
    let listener = spawn_listen(&service, registry());

    harness.end_stream();
    let result = timeout(Duration::from_secs(2), listener)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(Error::StreamEnded)));
}

#[tokio::test]
async fn reply_failure_does_not_stop_listening() {
    let (service, mut harness) = setup();
    let listener = spawn_listen(&service, registry());

    harness.transport.0.fail_replies.store(true, Ordering::SeqCst);
    harness.send("exec-1", "sum", r#"{"a":1,"b":2}"#);
    sleep(Duration::from_millis(20)).await;
    wait_for_in_flight(&service, 1).await;

    harness.transport.0.fail_replies.store(false, Ordering::SeqCst);
    harness.send("exec-2", "sum", r#"{"a":3,"b":4}"#);
    let reply = harness.next_reply().await;
    assert_eq!(reply, output("exec-2", "result", r#"{"result":7}"#));

    service.shutdown().await.unwrap();
    listener.await.unwrap().unwrap();
    assert!(harness.drain_replies().is_empty());
}

#[tokio::test]
async fn slow_reply_times_out() {
    let (service, mut harness) =
        setup_with(config().with_call_timeout(Duration::from_millis(50)));
    *harness.transport.0.reply_delay.lock() = Some(Duration::from_millis(500));
    let listener = spawn_listen(&service, registry());

    harness.send("exec-1", "sum", r#"{"a":1,"b":2}"#);
    sleep(Duration::from_millis(20)).await;
    wait_for_in_flight(&service, 1).await;

    service.shutdown().await.unwrap();
    listener.await.unwrap().unwrap();
    assert!(harness.drain_replies().is_empty());
}

#[tokio::test]
async fn emit_encodes_payload_until_closed() {
    let (service, harness) = setup();

    service
        .emit("ready", &json!({ "tasks": ["sum"] }))
        .await
        .unwrap();
    {
        let events = harness.transport.0.events.lock();
        assert_eq!(
            events.as_slice(),
            [Event {
                key: "ready".to_string(),
                data: r#"{"tasks":["sum"]}"#.to_string(),
            }]
        );
    }

    // Shutdown straight from idle.
    service.shutdown().await.unwrap();
    assert_eq!(service.state(), ServiceState::Closed);

    let err = service.emit("ready", &json!({})).await.unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed));

    let err = service.listen(registry()).await.unwrap_err();
    assert!(matches!(err, Error::ServiceShutdown));
    assert_eq!(harness.opens(), 0);
}

#[tokio::test]
async fn empty_registry_has_no_side_effect() {
    let (service, mut harness) = setup();

    let err = service.listen(HandlerRegistry::new()).await.unwrap_err();
    assert!(matches!(err, Error::NoHandlers));
    assert_eq!(service.state(), ServiceState::Idle);
    assert_eq!(harness.opens(), 0);

    let listener = spawn_listen(&service, registry());
    harness.send("exec-1", "sum", r#"{"a":0,"b":0}"#);
    assert_eq!(
        harness.next_reply().await,
        output("exec-1", "result", r#"{"result":0}"#)
    );
    service.shutdown().await.unwrap();
    listener.await.unwrap().unwrap();
}

#[test]
fn invalid_config_is_rejected_before_use() {
    let transport = MockTransport::default();
    let err = Service::with_transport(ServiceConfig::new("", TOKEN), transport.clone())
        .err()
        .expect("empty endpoint must be rejected");
    assert!(matches!(err, Error::EndpointNotSet));

    let err = Service::with_transport(ServiceConfig::new("mock:0", ""), transport.clone())
        .err()
        .expect("empty token must be rejected");
    assert!(matches!(err, Error::TokenNotSet));
    assert_eq!(transport.0.opens.load(Ordering::SeqCst), 0);
}
