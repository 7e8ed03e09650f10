//! Integration tests for the inspector server over real sockets.

use std::{
    io::{self, Write},
    net::TcpListener,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use debugport_server::{
    Admission, ServerConfig, ServerError, ServerState, SessionId, SessionPhase, SocketServer,
    SocketServerDelegate,
};
use futures_util::{SinkExt, StreamExt};
use tokio::{io::AsyncWriteExt, net::TcpStream, runtime::Handle};
use tokio_tungstenite::{connect_async, tungstenite::Message};

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Delegate callback recorded by [`RecordingDelegate`]
#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    StartSession(SessionId, String),
    EndSession(SessionId),
    MessageReceived(SessionId, String),
    ServerDone,
}

/// Delegate exposing fixed targets and recording every callback
struct RecordingDelegate {
    targets: Vec<String>,
    admission: Admission,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl SocketServerDelegate for RecordingDelegate {
    fn start_session(&mut self, session_id: SessionId, target_id: &str) {
        self.record(Call::StartSession(session_id, target_id.to_string()));
    }

    fn end_session(&mut self, session_id: SessionId) {
        self.record(Call::EndSession(session_id));
    }

    fn message_received(&mut self, session_id: SessionId, message: &str) {
        self.record(Call::MessageReceived(session_id, message.to_string()));
    }

    fn get_target_ids(&mut self) -> Vec<String> {
        self.targets.clone()
    }

    fn get_target_title(&mut self, id: &str) -> String {
        format!("Target {id}")
    }

    fn get_target_url(&mut self, id: &str) -> String {
        format!("file:///{id}.js")
    }

    fn server_done(&mut self) {
        self.record(Call::ServerDone);
    }

    fn admit_session(&mut self, _session_id: SessionId, _target_id: &str) -> Admission {
        self.admission
    }
}

impl RecordingDelegate {
    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Writer collecting diagnostic output
#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Helper struct to manage an in-process server
struct TestServer {
    server: SocketServer,
    calls: Arc<Mutex<Vec<Call>>>,
    output: SharedBuffer,
}

impl TestServer {
    fn new(targets: &[&str], admission: Admission, port: u16) -> Self {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let output = SharedBuffer::default();
        let delegate = RecordingDelegate {
            targets: targets.iter().map(|id| id.to_string()).collect(),
            admission,
            calls: calls.clone(),
        };
        let config =
            ServerConfig::new("127.0.0.1", port).with_close_timeout(Duration::from_millis(200));
        let server =
            SocketServer::with_output(delegate, &Handle::current(), config, Box::new(output.clone()));
        Self {
            server,
            calls,
            output,
        }
    }

    /// Start a server on an ephemeral port
    async fn start(targets: &[&str], admission: Admission) -> (Self, u16) {
        let test_server = Self::new(targets, admission, 0);
        let port = test_server.server.start().await.expect("Failed to start server");
        (test_server, port)
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Poll the recorded calls until `predicate` holds
    async fn wait_for(&self, predicate: impl Fn(&[Call]) -> bool) {
        tokio::time::timeout(WAIT_TIMEOUT, async {
            while !predicate(self.calls().as_slice()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("Timeout waiting for calls, got {:?}", self.calls()));
    }

    /// Poll until the server tracks a connection with `session_id`
    async fn wait_for_connection(&self, session_id: SessionId) {
        tokio::time::timeout(WAIT_TIMEOUT, async {
            while self.server.session(session_id).await.is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connection never registered");
    }

    /// Stop the server, failing the test if it does not finish in time
    async fn shutdown_within_timeout(&self) {
        tokio::time::timeout(WAIT_TIMEOUT, self.server.shutdown())
            .await
            .expect("shutdown did not complete");
    }

    fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }
}

fn started_session(calls: &[Call]) -> Option<SessionId> {
    calls.iter().find_map(|call| match call {
        Call::StartSession(id, _) => Some(*id),
        _ => None,
    })
}

#[tokio::test]
async fn test_start_on_ephemeral_port() {
    // テスト項目: ポート 0 で起動すると実際のポートが返され、バナーが出力される
    // given (前提条件):
    let test_server = TestServer::new(&["a"], Admission::Accept, 0);
    assert_eq!(test_server.server.port(), None);

    // when (操作):
    let port = test_server.server.start().await.unwrap();

    // then (期待する結果):
    assert_ne!(port, 0);
    assert_eq!(test_server.server.port(), Some(port));
    assert_eq!(test_server.server.state().await.unwrap(), ServerState::Running);
    let output = test_server.output.contents();
    assert!(output.contains(&format!("Debugger listening on ws://127.0.0.1:{port}/a")));
    assert!(output.contains("For help, see: https://nodejs.org/en/docs/inspector"));

    test_server.server.shutdown().await;
}

#[tokio::test]
async fn test_json_lists_targets() {
    // テスト項目: /json と /json/list がターゲット一覧を返す
    // given (前提条件):
    let (test_server, port) = TestServer::start(&["a", "b"], Admission::Accept).await;

    for path in ["json", "json/list"] {
        // when (操作):
        let targets: Vec<serde_json::Value> = reqwest::get(format!("http://127.0.0.1:{port}/{path}"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0]["id"], "a");
        assert_eq!(targets[0]["title"], "Target a");
        assert_eq!(targets[0]["url"], "file:///a.js");
        assert_eq!(targets[0]["type"], "node");
        assert_eq!(
            targets[0]["webSocketDebuggerUrl"],
            format!("ws://127.0.0.1:{port}/a")
        );
        assert_eq!(
            targets[1]["webSocketDebuggerUrl"],
            format!("ws://127.0.0.1:{port}/b")
        );
    }

    // HTTP だけの接続では Delegate のセッション通知は起きない
    assert!(test_server.calls().is_empty());
    test_server.server.shutdown().await;
}

#[tokio::test]
async fn test_json_version() {
    // テスト項目: /json/version がバージョン情報を返す
    // given (前提条件):
    let (test_server, port) = TestServer::start(&["a"], Admission::Accept).await;

    // when (操作):
    let version: serde_json::Value = reqwest::get(format!("http://127.0.0.1:{port}/json/version"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    // then (期待する結果):
    assert_eq!(version["Protocol-Version"], "1.1");
    assert!(version["Browser"].as_str().unwrap().starts_with("debugport/"));

    test_server.server.shutdown().await;
}

#[tokio::test]
async fn test_session_relay_and_shutdown() {
    // テスト項目: セッション確立、双方向のメッセージ中継、停止時の通知順序
    // given (前提条件):
    let (test_server, port) = TestServer::start(&["a", "b"], Admission::Accept).await;
    let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/a"))
        .await
        .expect("Failed to connect");
    test_server
        .wait_for(|calls| started_session(calls).is_some())
        .await;
    let session_id = started_session(&test_server.calls()).unwrap();
    assert_eq!(
        test_server.calls()[0],
        Call::StartSession(session_id, "a".to_string())
    );

    // when (操作): クライアントからの送信
    ws.send(Message::text("ping")).await.unwrap();

    // then (期待する結果):
    test_server
        .wait_for(|calls| calls.contains(&Call::MessageReceived(session_id, "ping".to_string())))
        .await;

    // when (操作): サーバーからの送信
    test_server.server.send(session_id, "pong");

    // then (期待する結果):
    let message = tokio::time::timeout(WAIT_TIMEOUT, ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(message.to_text().unwrap(), "pong");
    let info = test_server.server.session(session_id).await.unwrap();
    assert_eq!(info.phase, SessionPhase::Open);
    assert_eq!(info.target_id.as_deref(), Some("a"));

    // when (操作): 停止（クライアントは Close に応答する）
    let reader = tokio::spawn(async move { while let Some(Ok(_)) = ws.next().await {} });
    test_server.server.shutdown().await;

    // then (期待する結果):
    let calls = test_server.calls();
    let end = calls
        .iter()
        .position(|c| *c == Call::EndSession(session_id))
        .expect("EndSession not called");
    let done = calls
        .iter()
        .position(|c| *c == Call::ServerDone)
        .expect("ServerDone not called");
    assert!(end < done);
    assert_eq!(test_server.count(&Call::ServerDone), 1);
    assert!(test_server.server.session(session_id).await.is_none());
    let _ = tokio::time::timeout(WAIT_TIMEOUT, reader).await;
}

#[tokio::test]
async fn test_unknown_target_is_rejected() {
    // テスト項目: 未知のターゲットへの接続は 404 で拒否され、Delegate は呼ばれない
    // given (前提条件):
    let (test_server, port) = TestServer::start(&["a", "b"], Admission::Accept).await;

    // when (操作):
    let result = connect_async(format!("ws://127.0.0.1:{port}/z")).await;

    // then (期待する結果):
    match result {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 404);
        }
        other => panic!("expected HTTP 404, got {other:?}"),
    }
    assert!(test_server.calls().is_empty());

    test_server.server.shutdown().await;
    assert_eq!(test_server.calls(), vec![Call::ServerDone]);
}

#[tokio::test]
async fn test_declined_session_is_forbidden() {
    // テスト項目: Delegate が拒否したセッションは 403 で拒否され、登録されない
    // given (前提条件):
    let (test_server, port) = TestServer::start(&["a"], Admission::Decline).await;

    // when (操作):
    let result = connect_async(format!("ws://127.0.0.1:{port}/a")).await;

    // then (期待する結果):
    match result {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 403);
        }
        other => panic!("expected HTTP 403, got {other:?}"),
    }
    assert!(started_session(&test_server.calls()).is_none());

    test_server.server.shutdown().await;
}

#[tokio::test]
async fn test_deferred_session_accepted_by_host() {
    // テスト項目: 保留したアップグレードをホストが後から受理できる
    // given (前提条件):
    let (test_server, port) = TestServer::start(&["a"], Admission::Defer).await;
    let connecting =
        tokio::spawn(async move { connect_async(format!("ws://127.0.0.1:{port}/a")).await });
    let session_id = SessionId::new(1);
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            if let Some(info) = test_server.server.session(session_id).await
                && info.phase == SessionPhase::PendingUpgradeDecision
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("upgrade never became pending");
    assert!(test_server.calls().is_empty());

    // when (操作):
    test_server.server.accept_session(session_id);

    // then (期待する結果):
    let (mut ws, response) = connecting.await.unwrap().expect("Failed to connect");
    assert_eq!(response.status(), 101);
    assert_eq!(response.headers()["connection"], "upgrade");
    test_server
        .wait_for(|calls| calls.contains(&Call::StartSession(session_id, "a".to_string())))
        .await;

    // クライアント側からクローズすると EndSession が呼ばれる
    ws.close(None).await.unwrap();
    test_server
        .wait_for(|calls| calls.contains(&Call::EndSession(session_id)))
        .await;

    test_server.server.shutdown().await;
}

#[tokio::test]
async fn test_terminate_connections_then_stop() {
    // テスト項目: 強制切断後の停止でも EndSession と ServerDone が一度ずつ呼ばれる
    // given (前提条件):
    let (test_server, port) = TestServer::start(&["a"], Admission::Accept).await;
    let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/a"))
        .await
        .expect("Failed to connect");
    test_server
        .wait_for(|calls| started_session(calls).is_some())
        .await;
    let session_id = started_session(&test_server.calls()).unwrap();

    // when (操作):
    test_server.server.terminate_connections();

    // then (期待する結果): クローズハンドシェイクなしで切断される
    let next = tokio::time::timeout(WAIT_TIMEOUT, ws.next()).await.unwrap();
    assert!(!matches!(next, Some(Ok(Message::Close(_)))));
    test_server
        .wait_for(|calls| calls.contains(&Call::EndSession(session_id)))
        .await;
    assert_eq!(test_server.server.state().await.unwrap(), ServerState::Running);

    test_server.server.shutdown().await;
    assert_eq!(test_server.count(&Call::EndSession(session_id)), 1);
    assert_eq!(test_server.count(&Call::ServerDone), 1);
}

#[tokio::test]
async fn test_bind_failure_reports_and_stays_new() {
    // テスト項目: 使用中のポートでは起動に失敗し、診断出力に書かれる
    // given (前提条件):
    let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();
    let test_server = TestServer::new(&["a"], Admission::Accept, port);

    // when (操作):
    let result = test_server.server.start().await;

    // then (期待する結果):
    assert!(matches!(result, Err(ServerError::Bind { .. })));
    assert!(
        test_server
            .output
            .contents()
            .contains(&format!("Starting inspector on 127.0.0.1:{port} failed"))
    );
    assert_eq!(test_server.server.state().await.unwrap(), ServerState::New);
    assert_eq!(test_server.server.port(), None);

    test_server.server.shutdown().await;
    assert_eq!(test_server.calls(), vec![Call::ServerDone]);
}

#[tokio::test]
async fn test_double_stop_fires_each_callback_once() {
    // テスト項目: 二重 stop で両方のコールバックが一度ずつ呼ばれ、ServerDone は一度
    // given (前提条件):
    let (test_server, port) = TestServer::start(&["a"], Admission::Accept).await;
    let (_ws, _) = connect_async(format!("ws://127.0.0.1:{port}/a"))
        .await
        .expect("Failed to connect");
    test_server
        .wait_for(|calls| started_session(calls).is_some())
        .await;
    let fired = Arc::new(AtomicUsize::new(0));

    // when (操作):
    for _ in 0..2 {
        let fired = fired.clone();
        test_server.server.stop(move || {
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }
    test_server.server.shutdown().await;

    // then (期待する結果):
    assert_eq!(fired.load(Ordering::SeqCst), 2);
    assert_eq!(test_server.count(&Call::ServerDone), 1);

    // 停止後の stop はコールバックのみ即座に実行される
    let late = fired.clone();
    test_server.server.stop(move || {
        late.fetch_add(1, Ordering::SeqCst);
    });
    tokio::time::timeout(WAIT_TIMEOUT, async {
        while fired.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(test_server.count(&Call::ServerDone), 1);
}

#[tokio::test]
async fn test_send_to_unknown_session_is_ignored() {
    // テスト項目: 存在しないセッションへの送信は何も起こさない
    // given (前提条件):
    let (test_server, _port) = TestServer::start(&["a"], Admission::Accept).await;

    // when (操作):
    test_server.server.send(SessionId::new(42), "nobody");

    // then (期待する結果):
    assert_eq!(test_server.server.state().await.unwrap(), ServerState::Running);
    assert!(test_server.server.session(SessionId::new(42)).await.is_none());
    assert!(test_server.calls().is_empty());

    test_server.server.shutdown().await;
}

#[tokio::test]
async fn test_stop_before_start() {
    // テスト項目: 起動前の停止は即座に完了し、以後の操作は失敗する
    // given (前提条件):
    let test_server = TestServer::new(&["a"], Admission::Accept, 0);

    // when (操作):
    test_server.server.shutdown().await;

    // then (期待する結果):
    assert_eq!(test_server.calls(), vec![Call::ServerDone]);
    assert!(matches!(
        test_server.server.start().await,
        Err(ServerError::EventLoopClosed)
    ));
    assert!(matches!(
        test_server.server.state().await,
        Err(ServerError::EventLoopClosed)
    ));
}

/// Queue more data than the socket buffers hold so writes to `session_id` block
fn flood(test_server: &TestServer, session_id: SessionId) {
    let chunk = "x".repeat(1024 * 1024);
    for _ in 0..64 {
        test_server.server.send(session_id, chunk.clone());
    }
}

#[tokio::test]
async fn test_shutdown_with_peer_not_reading() {
    // テスト項目: 受信しないクライアントがいても停止が完了し、EndSession が一度呼ばれる
    // given (前提条件):
    let (test_server, port) = TestServer::start(&["a"], Admission::Accept).await;
    let (_ws, _) = connect_async(format!("ws://127.0.0.1:{port}/a"))
        .await
        .expect("Failed to connect");
    test_server
        .wait_for(|calls| started_session(calls).is_some())
        .await;
    let session_id = started_session(&test_server.calls()).unwrap();
    flood(&test_server, session_id);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // when (操作):
    test_server.shutdown_within_timeout().await;

    // then (期待する結果):
    assert_eq!(test_server.count(&Call::EndSession(session_id)), 1);
    assert_eq!(test_server.count(&Call::ServerDone), 1);
}

#[tokio::test]
async fn test_terminate_connections_with_peer_not_reading() {
    // テスト項目: 書き込みが詰まったセッションも強制切断で終了する
    // given (前提条件):
    let (test_server, port) = TestServer::start(&["a"], Admission::Accept).await;
    let (_ws, _) = connect_async(format!("ws://127.0.0.1:{port}/a"))
        .await
        .expect("Failed to connect");
    test_server
        .wait_for(|calls| started_session(calls).is_some())
        .await;
    let session_id = started_session(&test_server.calls()).unwrap();
    flood(&test_server, session_id);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // when (操作):
    test_server.server.terminate_connections();

    // then (期待する結果):
    test_server
        .wait_for(|calls| calls.contains(&Call::EndSession(session_id)))
        .await;
    test_server.shutdown_within_timeout().await;
    assert_eq!(test_server.count(&Call::EndSession(session_id)), 1);
    assert_eq!(test_server.count(&Call::ServerDone), 1);
}

#[tokio::test]
async fn test_shutdown_with_half_sent_request() {
    // テスト項目: リクエストヘッダーを送り切らない接続があっても停止が完了する
    // given (前提条件):
    let (test_server, port) = TestServer::start(&["a"], Admission::Accept).await;
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream
        .write_all(b"GET /json HTTP/1.1\r\nHost: x\r\n")
        .await
        .unwrap();
    test_server.wait_for_connection(SessionId::new(1)).await;

    // when (操作):
    test_server.shutdown_within_timeout().await;

    // then (期待する結果):
    assert_eq!(test_server.calls(), vec![Call::ServerDone]);
    assert!(test_server.server.session(SessionId::new(1)).await.is_none());
}
