use std::{net::SocketAddr, sync::Arc, time::Duration};

use agent_control_core::{Connection, IdentityReport, TransportError};
use agent_control_transport::{
    AgentMessage, ConnectionEvent, PresharedKeyFactory, ServerMessage, TransportProfile,
    TransportRegistry,
};
use serde_json::{Value, json};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
    time::timeout,
};
use tokio_test::assert_ok;

const WAIT: Duration = Duration::from_secs(5);

struct Agent {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Agent {
    async fn connect(addr: SocketAddr) -> Self {
        let (reader, writer) = TcpStream::connect(addr).await.unwrap().into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    async fn send(&mut self, message: &AgentMessage) {
        let line = message.to_line().unwrap();
        self.send_raw(&line).await;
    }

    async fn hello(&mut self) {
        self.send(&AgentMessage::Hello {
            launcher: Some("bind".into()),
            launcher_args: vec!["--port".into(), "9000".into()],
        })
        .await;
    }

    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        timeout(WAIT, self.reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        line
    }

    async fn next_request(&mut self) -> String {
        let line = self.read_line().await;
        match serde_json::from_str(&line).unwrap() {
            ServerMessage::GetIdentity { request_id } => request_id,
            other => panic!("Unexpected message: {other:?}"),
        }
    }
}

async fn start(
    profile: &TransportProfile,
) -> (SocketAddr, mpsc::UnboundedReceiver<ConnectionEvent>) {
    let server = profile
        .server
        .bind(profile.server_options("127.0.0.1", 0))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(server.serve(tx));
    (addr, rx)
}

fn tcp_profile() -> TransportProfile {
    TransportRegistry::with_defaults().get("tcp").unwrap().clone()
}

async fn accepted(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> Arc<dyn Connection> {
    match timeout(WAIT, rx.recv()).await.unwrap() {
        Some(ConnectionEvent::Accepted(conn)) => conn,
        other => panic!("Expected accepted connection, got {other:?}"),
    }
}

fn report() -> IdentityReport {
    IdentityReport {
        user: Some("svc".into()),
        hostname: Some("web-02".into()),
        platform: Some("Linux".into()),
        pid: Some(4242),
        ..IdentityReport::default()
    }
}

#[tokio::test]
async fn hello_then_identity_round_trip() {
    let (addr, mut rx) = start(&tcp_profile()).await;
    let mut agent = Agent::connect(addr).await;
    agent.hello().await;

    let conn = accepted(&mut rx).await;
    assert_eq!(conn.info("launcher"), Some(Value::from("bind")));
    assert_eq!(conn.info("launcher_args"), Some(json!(["--port", "9000"])));
    assert_eq!(conn.info("transport"), None);
    assert!(conn.peer_addr().unwrap().ip().is_loopback());
    assert_eq!(conn.server_addr(), Some(addr));

    let call = tokio::spawn({
        let conn = Arc::clone(&conn);
        async move { conn.call_identity().await }
    });
    let request_id = agent.next_request().await;
    agent
        .send(&AgentMessage::Identity {
            request_id,
            report: report(),
        })
        .await;

    let got = assert_ok!(timeout(WAIT, call).await.unwrap().unwrap());
    assert_eq!(got, report());
    assert!(!conn.is_closed());
}

#[tokio::test]
async fn remote_error_fails_the_call() {
    let (addr, mut rx) = start(&tcp_profile()).await;
    let mut agent = Agent::connect(addr).await;
    agent.hello().await;
    let conn = accepted(&mut rx).await;

    let call = tokio::spawn({
        let conn = Arc::clone(&conn);
        async move { conn.call_identity().await }
    });
    let request_id = agent.next_request().await;
    agent.send_raw("this is not json\n").await;
    agent
        .send(&AgentMessage::Error {
            request_id,
            message: "agent crashed".into(),
        })
        .await;

    let err = timeout(WAIT, call).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, TransportError::Remote(m) if m == "agent crashed"));
}

#[tokio::test]
async fn disconnect_fails_pending_call_and_reports_closed() {
    let (addr, mut rx) = start(&tcp_profile()).await;
    let mut agent = Agent::connect(addr).await;
    agent.hello().await;
    let conn = accepted(&mut rx).await;

    let call = tokio::spawn({
        let conn = Arc::clone(&conn);
        async move { conn.call_identity().await }
    });
    agent.next_request().await;
    drop(agent);

    let err = timeout(WAIT, call).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, TransportError::Closed));

    match timeout(WAIT, rx.recv()).await.unwrap() {
        Some(ConnectionEvent::Closed(closed)) => {
            assert!(std::ptr::addr_eq(Arc::as_ptr(&closed), Arc::as_ptr(&conn)));
        }
        other => panic!("Expected closed event, got {other:?}"),
    }
    assert!(conn.is_closed());
    assert!(matches!(conn.call_identity().await, Err(TransportError::Closed)));
}

#[tokio::test]
async fn unsupported_transport_is_rejected() {
    let mut profile = tcp_profile();
    profile.transport = "obfs3".into();

    let err = profile
        .server
        .bind(profile.server_options("127.0.0.1", 0))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, TransportError::Unsupported(t) if t == "obfs3"));
}

#[tokio::test]
async fn preshared_key_gates_the_connection() {
    let profile = tcp_profile().with_authenticator(Arc::new(PresharedKeyFactory::new("hunter2")));
    let (addr, mut rx) = start(&profile).await;

    let mut intruder = Agent::connect(addr).await;
    intruder.send_raw("letmein\n").await;
    assert_eq!(intruder.read_line().await, "DENIED\n");

    let mut agent = Agent::connect(addr).await;
    agent.send_raw("hunter2\n").await;
    assert_eq!(agent.read_line().await, "OK\n");
    agent.hello().await;

    let conn = accepted(&mut rx).await;
    assert_eq!(conn.info("launcher"), Some(Value::from("bind")));
}

#[tokio::test]
async fn silent_agent_is_dropped_after_hello_timeout() {
    let profile = tcp_profile().with_kwarg("hello_timeout_secs", json!(1));
    let (addr, mut rx) = start(&profile).await;

    let mut agent = Agent::connect(addr).await;
    assert_eq!(agent.read_line().await, "");
    assert!(rx.try_recv().is_err());
}

fn spawn_identity_call(
    conn: &Arc<dyn Connection>,
) -> tokio::task::JoinHandle<Result<IdentityReport, TransportError>> {
    let conn = Arc::clone(conn);
    tokio::spawn(async move { conn.call_identity().await })
}

#[tokio::test]
async fn mistyped_attribute_only_empties_that_field() {
    let (addr, mut rx) = start(&tcp_profile()).await;
    let mut agent = Agent::connect(addr).await;
    agent.hello().await;
    let conn = accepted(&mut rx).await;

    let call = spawn_identity_call(&conn);
    let request_id = agent.next_request().await;
    let reply = json!({
        "type": "identity",
        "request_id": request_id,
        "report": ["svc", "web-02", "Linux", null, null, "x86_64", null, "n/a"],
    });
    agent.send_raw(&format!("{reply}\n")).await;

    let got = assert_ok!(timeout(WAIT, call).await.unwrap().unwrap());
    assert_eq!(got.hostname.as_deref(), Some("web-02"));
    assert_eq!(got.machine_arch.as_deref(), Some("x86_64"));
    assert_eq!(got.pid, None);
    assert_eq!(got.exec_path, None);
}

#[tokio::test]
async fn unusable_reply_fails_its_call() {
    let (addr, mut rx) = start(&tcp_profile()).await;
    let mut agent = Agent::connect(addr).await;
    agent.hello().await;
    let conn = accepted(&mut rx).await;

    let call = spawn_identity_call(&conn);
    let request_id = agent.next_request().await;
    let reply = json!({"type": "identity", "request_id": request_id, "report": "garbage"});
    agent.send_raw(&format!("{reply}\n")).await;

    let err = timeout(WAIT, call).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, TransportError::Protocol(_)));
    assert!(!conn.is_closed());
}

#[tokio::test]
async fn close_drops_the_agent() {
    let (addr, mut rx) = start(&tcp_profile()).await;
    let mut agent = Agent::connect(addr).await;
    agent.hello().await;
    let conn = accepted(&mut rx).await;

    let call = spawn_identity_call(&conn);
    agent.next_request().await;
    conn.close().await;

    assert_eq!(agent.read_line().await, "");
    let err = timeout(WAIT, call).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, TransportError::Closed));
    assert!(matches!(
        timeout(WAIT, rx.recv()).await.unwrap(),
        Some(ConnectionEvent::Closed(_))
    ));
    assert!(conn.is_closed());
}
