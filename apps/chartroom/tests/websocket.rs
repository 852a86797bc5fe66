use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use chartroom_client_core::protocol::{ClientRequest, ServerMessage};
use chartroom_client_core::transport::{
    BackoffPolicy, MemorySessionStore, SessionStore, Transport, TransportConfig, TransportError,
    WebSocketConnector,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;
use url::Url;

const DOCUMENT: &[u8] = b"\x89PNG\r\n\x1a\nroute";

#[derive(Clone, Default)]
struct RouteServer {
    sessions_seen: Arc<Mutex<Vec<Option<String>>>>,
    hang_up_first: Arc<AtomicBool>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(server): State<RouteServer>,
) -> impl IntoResponse {
    let session = params.get("session_id").cloned();
    server.sessions_seen.lock().unwrap().push(session.clone());
    ws.on_upgrade(move |socket| serve_editor(socket, session, server))
}

async fn serve_editor(mut socket: WebSocket, session: Option<String>, server: RouteServer) {
    if session.is_none() {
        let greeting = json!({"type": "set_session", "session_id": "e2e-session"});
        if socket.send(WsMessage::Text(greeting.to_string())).await.is_err() {
            return;
        }
    }
    if server.hang_up_first.swap(false, Ordering::SeqCst) {
        return;
    }

    while let Some(Ok(message)) = socket.recv().await {
        let WsMessage::Text(text) = message else {
            continue;
        };
        let Ok(request) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let id = request["request_id"].clone();
        let replies = match request["type"].as_str() {
            Some("get-png") => vec![
                WsMessage::Text(
                    json!({"type": "png", "request_id": id, "filename": "route.png"}).to_string(),
                ),
                WsMessage::Binary(DOCUMENT.to_vec()),
            ],
            Some("get-waypoints") => vec![WsMessage::Text(
                json!({
                    "type": "waypoints",
                    "request_id": id,
                    "waypoints": [
                        {"name": "Start", "x": 10.0, "y": 20.0},
                        {"name": "End", "x": 40.0, "y": 80.0, "lon": 4.5, "lat": 52.1},
                    ],
                })
                .to_string(),
            )],
            _ => vec![WsMessage::Text(
                json!({
                    "type": "result",
                    "result": "exception",
                    "request_id": id,
                    "exception_type": "ValueError",
                    "message": "unknown request",
                })
                .to_string(),
            )],
        };
        for reply in replies {
            if socket.send(reply).await.is_err() {
                return;
            }
        }
    }
}

async fn spawn_server(server: RouteServer) -> Url {
    let router = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(server);
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    Url::parse(&format!("ws://{addr}/ws")).unwrap()
}

fn client(url: Url, store: Arc<MemorySessionStore>) -> Transport {
    Transport::new(
        TransportConfig {
            server_url: url,
            backoff: BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(50)),
        },
        Arc::new(WebSocketConnector),
        store,
    )
}

#[tokio::test]
async fn requests_round_trip_over_a_real_socket() {
    let url = spawn_server(RouteServer::default()).await;
    let store = Arc::new(MemorySessionStore::new());
    let transport = client(url, store.clone());
    transport.connect();

    let reply = timeout(Duration::from_secs(5), transport.call(&ClientRequest::GetWaypoints))
        .await
        .expect("waypoints reply")
        .expect("waypoints request");
    match reply.message {
        ServerMessage::Waypoints(waypoints) => {
            assert_eq!(waypoints.len(), 2);
            assert_eq!(waypoints[1].lat, Some(52.1));
        }
        other => panic!("unexpected message {other:?}"),
    }

    let document = timeout(Duration::from_secs(5), transport.call(&ClientRequest::GetPng))
        .await
        .expect("png reply")
        .expect("png request");
    assert_eq!(document.attachment.as_deref(), Some(DOCUMENT));

    let fault = timeout(Duration::from_secs(5), transport.call(&ClientRequest::Step(1)))
        .await
        .expect("step reply");
    assert!(matches!(fault, Err(TransportError::Fault(ref f)) if f.kind == "ValueError"));
    assert!(transport.phase().is_open());

    assert_eq!(store.load().as_deref(), Some("e2e-session"));
    transport.shutdown();
}

#[tokio::test]
async fn reconnect_resumes_the_assigned_session() {
    let server = RouteServer::default();
    server.hang_up_first.store(true, Ordering::SeqCst);
    let url = spawn_server(server.clone()).await;
    let transport = client(url, Arc::new(MemorySessionStore::new()));
    transport.connect();

    timeout(Duration::from_secs(5), async {
        while server.sessions_seen.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("client never reconnected");
    transport.wait_until_open().await.unwrap();

    let reply = timeout(Duration::from_secs(5), transport.call(&ClientRequest::GetWaypoints))
        .await
        .expect("reply after reconnect")
        .expect("request after reconnect");
    assert_eq!(reply.kind, "waypoints");
    assert_eq!(transport.session_id().as_deref(), Some("e2e-session"));

    let seen = server.sessions_seen.lock().unwrap().clone();
    assert!(seen.len() >= 2, "expected a reconnect, saw {seen:?}");
    assert_eq!(seen[0], None);
    assert_eq!(seen[1].as_deref(), Some("e2e-session"));
    transport.shutdown();
}
