//! End-to-end run of a relay node over real sockets
//!
//! Two clients authenticate, meet in a room and exchange payloads through
//! the host, while the HTTP endpoint lists the room.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use room_relay::protocol::{ClientMessage, ServerMessage};
use room_relay::relay::transport::{encode_frame, read_frame};
use room_relay::{Channel, ConnectionId, RelayConfig, RelayNode, Room};

const KEY: &str = "smoke test key";
const TIMEOUT: Duration = Duration::from_secs(5);

struct Client {
    stream: TcpStream,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
        }
    }

    async fn send(&mut self, channel: Channel, message: ClientMessage<'_>) {
        let mut buf = BytesMut::new();
        message.encode(&mut buf);
        self.stream
            .write_all(&encode_frame(channel, &buf))
            .await
            .unwrap();
    }

    /// Next frame from the node, owned so callers can decode it
    async fn recv(&mut self) -> Vec<u8> {
        let (_, frame) = tokio::time::timeout(TIMEOUT, read_frame(&mut self.stream, 1 << 16))
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
            .expect("connection closed");
        frame.to_vec()
    }

    /// Run the handshake and return the assigned id
    async fn authenticate(&mut self) -> ConnectionId {
        let frame = self.recv().await;
        assert_eq!(
            ServerMessage::decode(&frame).unwrap(),
            ServerMessage::AuthenticationRequest
        );

        self.send(
            Channel::Reliable,
            ClientMessage::AuthenticationResponse { key: KEY.into() },
        )
        .await;

        let frame = self.recv().await;
        assert_eq!(
            ServerMessage::decode(&frame).unwrap(),
            ServerMessage::Authenticated
        );
        let frame = self.recv().await;
        match ServerMessage::decode(&frame).unwrap() {
            ServerMessage::GetId(id) => id,
            other => panic!("expected GetId, got {:?}", other),
        }
    }
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        path
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_room_lifecycle_over_tcp() {
    let config = RelayConfig::default()
        .auth_key(KEY)
        .bind(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .ports(0, 0);
    let node = RelayNode::bind(config).await.unwrap();
    let transport_addr = node.transport_addr().unwrap();
    let endpoint_addr = node.endpoint_addr().unwrap().unwrap();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(node.run_until(shutdown.clone()));

    let mut host = Client::connect(transport_addr).await;
    let host_id = host.authenticate().await;

    host.send(
        Channel::Reliable,
        ClientMessage::CreateRoom {
            max_players: 4,
            name: "Smoke".into(),
            is_public: true,
            data: "map=dust".into(),
            app_id: 12,
        },
    )
    .await;
    let frame = host.recv().await;
    let room_id = match ServerMessage::decode(&frame).unwrap() {
        ServerMessage::RoomCreated(id) => id.to_string(),
        other => panic!("expected RoomCreated, got {:?}", other),
    };

    let mut member = Client::connect(transport_addr).await;
    let member_id = member.authenticate().await;
    assert_ne!(member_id, host_id);

    member
        .send(
            Channel::Reliable,
            ClientMessage::JoinRoom {
                room_id: room_id.clone(),
            },
        )
        .await;
    let frame = member.recv().await;
    assert_eq!(
        ServerMessage::decode(&frame).unwrap(),
        ServerMessage::RoomJoined(member_id)
    );
    let frame = host.recv().await;
    assert_eq!(
        ServerMessage::decode(&frame).unwrap(),
        ServerMessage::RoomJoined(member_id)
    );

    member
        .send(
            Channel::Unreliable,
            ClientMessage::SendData {
                payload: b"ping",
                target: ConnectionId(0),
            },
        )
        .await;
    let frame = host.recv().await;
    assert_eq!(
        ServerMessage::decode(&frame).unwrap(),
        ServerMessage::GetData {
            payload: b"ping",
            sender: Some(member_id),
        }
    );

    host.send(
        Channel::Reliable,
        ClientMessage::SendData {
            payload: b"pong",
            target: member_id,
        },
    )
    .await;
    let frame = member.recv().await;
    assert_eq!(
        ServerMessage::decode(&frame).unwrap(),
        ServerMessage::GetData {
            payload: b"pong",
            sender: None,
        }
    );

    let rooms: Vec<Room> = tokio::time::timeout(TIMEOUT, async {
        loop {
            let body = http_get(endpoint_addr, "/api/servers").await;
            let rooms: Vec<Room> = serde_json::from_str(&body).unwrap_or_default();
            if rooms.first().map_or(false, |room| room.clients.len() == 2) {
                return rooms;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(rooms[0].server_id, room_id);
    assert_eq!(rooms[0].host_id, host_id);

    // Host leaving closes the room for everyone
    drop(host);
    let frame = member.recv().await;
    assert_eq!(
        ServerMessage::decode(&frame).unwrap(),
        ServerMessage::RoomLeft
    );

    shutdown.cancel();
    tokio::time::timeout(TIMEOUT, handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
