// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests over real sockets.
//!
//! Each test starts the gateway on an ephemeral port over an isolated
//! TestHarness and talks to it with a WebSocket client and plain HTTP.

use std::net::SocketAddr;
use std::time::Duration;

use deskline_core::PluginAdapter;
use deskline_core::types::Role;
use deskline_gateway::ChatGateway;
use deskline_test_utils::TestHarness;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const GUEST: &str = "e2e-visitor-00000001";

struct Server {
    harness: TestHarness,
    gateway: ChatGateway,
    addr: SocketAddr,
}

impl Server {
    async fn start() -> Self {
        let harness = TestHarness::new().await.unwrap();
        let mut config = harness.config.server.clone();
        config.host = "127.0.0.1".to_string();
        config.port = 0;
        let gateway = ChatGateway::new(config, harness.service.clone(), CancellationToken::new());
        let addr = gateway.start().await.unwrap();
        Self {
            harness,
            gateway,
            addr,
        }
    }

    async fn socket(&self, query: &str) -> Socket {
        let url = format!("ws://{}/ws?{query}", self.addr);
        let (socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        socket
    }

    async fn agent_socket(&self, agent: &str) -> Socket {
        let credential = self.harness.credential(agent, Role::Support).unwrap();
        let mut socket = self.socket(&format!("token={credential}")).await;
        assert_eq!(recv(&mut socket).await["type"], "active_chats");
        assert_eq!(recv(&mut socket).await["type"], "queue_snapshot");
        socket
    }
}

async fn send(socket: &mut Socket, frame: Value) {
    socket.send(Message::text(frame.to_string())).await.unwrap();
}

async fn recv(socket: &mut Socket) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Skip frames until one has the given `type`.
async fn recv_type(socket: &mut Socket, kind: &str) -> Value {
    loop {
        let frame = recv(socket).await;
        if frame["type"] == kind {
            return frame;
        }
    }
}

/// Skip frames until the ack for `request_id`.
async fn ack(socket: &mut Socket, request_id: &str) -> Value {
    loop {
        let frame = recv_type(socket, "ack").await;
        if frame["requestId"] == request_id {
            return frame;
        }
    }
}

#[tokio::test]
async fn full_conversation_over_websocket() {
    let server = Server::start().await;
    let mut guest = server.socket(&format!("guest={GUEST}")).await;
    let mut agent = server.agent_socket("agent-a").await;

    send(&mut guest, json!({"type": "start_conversation", "requestId": "g1"})).await;
    let joined = recv(&mut guest).await;
    assert_eq!(joined["type"], "chat_joined");
    assert!(joined["history"].as_array().unwrap().is_empty());
    let started = recv(&mut guest).await;
    assert_eq!(started["requestId"], "g1");
    assert_eq!(started["ok"], true);
    let id = started["data"]["id"].as_str().unwrap().to_string();

    let update = recv_type(&mut agent, "queue_updated").await;
    assert_eq!(update["change"], "opened");
    assert_eq!(update["conversation"]["id"], id.as_str());

    send(
        &mut agent,
        json!({"type": "conversation_claim", "requestId": "a1", "conversationId": id}),
    )
    .await;
    let claimed = ack(&mut agent, "a1").await;
    assert_eq!(claimed["ok"], true);
    assert_eq!(claimed["data"]["status"], "claimed");

    send(
        &mut guest,
        json!({"type": "message_send", "requestId": "g2", "conversationId": id, "text": "hello"}),
    )
    .await;
    let delivered = recv_type(&mut agent, "message_new").await;
    assert_eq!(delivered["message"]["senderRole"], "guest");
    assert_eq!(delivered["message"]["text"], "hello");
    assert_eq!(ack(&mut guest, "g2").await["ok"], true);

    send(
        &mut agent,
        json!({"type": "typing", "requestId": "a2", "conversationId": id, "isTyping": true}),
    )
    .await;
    let typing = recv_type(&mut guest, "typing").await;
    assert_eq!(typing["role"], "support");
    assert_eq!(typing["isTyping"], true);

    send(
        &mut agent,
        json!({"type": "conversation_close", "requestId": "a3", "conversationId": id}),
    )
    .await;
    let closed = recv_type(&mut guest, "conversation_closed").await;
    assert_eq!(closed["conversation"]["status"], "closed");

    send(
        &mut guest,
        json!({"type": "message_send", "requestId": "g3", "conversationId": id, "text": "wait"}),
    )
    .await;
    let refused = ack(&mut guest, "g3").await;
    assert_eq!(refused["ok"], false);
    assert_eq!(refused["error"]["code"], "conversation_closed");

    // History stays available over HTTP after close.
    let response = reqwest::Client::new()
        .get(format!("http://{}/chat/{id}/messages", server.addr))
        .header("x-guest-token", GUEST)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let history: Value = response.json().await.unwrap();
    assert_eq!(history.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn handshake_rejects_bad_credentials() {
    let server = Server::start().await;
    let url = format!("ws://{}/ws?token=not-a-credential", server.addr);
    assert!(tokio_tungstenite::connect_async(url).await.is_err());

    let url = format!("ws://{}/ws", server.addr);
    assert!(tokio_tungstenite::connect_async(url).await.is_err());
}

#[tokio::test]
async fn malformed_frames_get_error_acks() {
    let server = Server::start().await;
    let mut guest = server.socket(&format!("guest={GUEST}")).await;

    send(&mut guest, json!({"type": "shout", "requestId": "x1"})).await;
    let reply = recv(&mut guest).await;
    assert_eq!(reply["type"], "ack");
    assert_eq!(reply["requestId"], "x1");
    assert_eq!(reply["error"]["code"], "invalid_request");

    // The connection survives and keeps working.
    send(&mut guest, json!({"type": "start_conversation", "requestId": "x2"})).await;
    assert_eq!(ack(&mut guest, "x2").await["ok"], true);
}

#[tokio::test]
async fn rest_and_socket_share_one_queue() {
    let server = Server::start().await;
    let mut agent = server.agent_socket("agent-a").await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/chat/start", server.addr))
        .header("x-guest-token", GUEST)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let conversation: Value = response.json().await.unwrap();

    let update = recv_type(&mut agent, "queue_updated").await;
    assert_eq!(update["conversation"]["id"], conversation["id"]);

    send(&mut agent, json!({"type": "queue_request", "requestId": "q1"})).await;
    let queue = ack(&mut agent, "q1").await;
    assert_eq!(queue["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn shutdown_closes_open_sockets() {
    let server = Server::start().await;
    let mut guest = server.socket(&format!("guest={GUEST}")).await;
    assert_eq!(server.harness.service.connection_count(), 1);

    server.gateway.shutdown().await.unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match guest.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return true,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(closed);
}
