//! Relay router
//!
//! Single task that owns a node's room table. Transport events arrive on a
//! channel in receipt order, so frames from one sender are handled and
//! forwarded in the order they were read.
//!
//! Rooms form a star: the host may address any one member, every other
//! member's traffic goes to the host tagged with the sender's id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::buffer::BufferPool;
use crate::error::{Error, ProtocolError};
use crate::protocol::{ClientMessage, RoomDataUpdate, ServerMessage};
use crate::types::{Channel, ConnectionId};

use super::balancer_link::RoomChangeNotifier;
use super::id::IdGenerator;
use super::listing::{ListingPublisher, RelayListing, RoomSnapshot};
use super::room::{Departure, RoomRegistry, RoomSettings};
use super::transport::{RelayEvent, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerState {
    AwaitingAuth,
    Authenticated,
}

/// Forwards frames between room members and applies room control messages
pub struct RelayRouter<T: Transport> {
    transport: Arc<T>,
    rooms: RoomRegistry,
    pool: Arc<BufferPool>,
    ids: IdGenerator,
    auth_key: String,
    max_packet_size: usize,
    peers: HashMap<ConnectionId, PeerState>,
    listing: Arc<RelayListing>,
    publisher: Option<ListingPublisher>,
    notifier: Option<RoomChangeNotifier>,
}

impl<T: Transport> RelayRouter<T> {
    pub fn new(
        transport: Arc<T>,
        rooms: RoomRegistry,
        pool: Arc<BufferPool>,
        ids: IdGenerator,
        auth_key: impl Into<String>,
        max_packet_size: usize,
    ) -> Self {
        Self {
            transport,
            rooms,
            pool,
            ids,
            auth_key: auth_key.into(),
            max_packet_size,
            peers: HashMap::new(),
            listing: Arc::new(RelayListing::new()),
            publisher: None,
            notifier: None,
        }
    }

    /// Publish room changes to `listing` instead of a private one
    pub fn with_listing(mut self, listing: Arc<RelayListing>) -> Self {
        self.listing = listing;
        self
    }

    /// Hand room changes to a publisher task instead of serializing inline
    pub fn with_listing_publisher(mut self, publisher: ListingPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Flag every room change to the load balancer notifier
    pub fn with_room_change_notifier(mut self, notifier: RoomChangeNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    pub fn listing(&self) -> &Arc<RelayListing> {
        &self.listing
    }

    /// Process events until the channel closes or `cancel` fires
    pub async fn run(mut self, mut events: mpsc::Receiver<RelayEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            self.handle_event(event).await;
        }

        tracing::debug!(rooms = self.rooms.len(), "Relay router stopped");
    }

    pub async fn handle_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Connected(id) => {
                self.peers.insert(id, PeerState::AwaitingAuth);
                self.send(id, Channel::Reliable, ServerMessage::AuthenticationRequest);
            }
            RelayEvent::Disconnected(id) => {
                if self.forget_peer(id).await {
                    tracing::debug!(connection_id = %id, "Peer disconnected");
                }
            }
            RelayEvent::Data {
                connection,
                channel,
                frame,
            } => self.handle_frame(connection, channel, &frame).await,
        }
    }

    async fn handle_frame(&mut self, sender: ConnectionId, channel: Channel, frame: &[u8]) {
        let Some(state) = self.peers.get(&sender).copied() else {
            return;
        };

        let message = match ClientMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                self.violation(sender, e).await;
                return;
            }
        };

        if state == PeerState::AwaitingAuth {
            match message {
                ClientMessage::AuthenticationResponse { key } if key == self.auth_key => {
                    self.peers.insert(sender, PeerState::Authenticated);
                    self.listing.set_connected(self.authenticated_count());
                    self.send(sender, Channel::Reliable, ServerMessage::Authenticated);
                    self.send(sender, Channel::Reliable, ServerMessage::GetId(sender));
                    tracing::debug!(connection_id = %sender, "Peer authenticated");
                }
                ClientMessage::AuthenticationResponse { .. } => {
                    self.violation(sender, ProtocolError::BadKey).await
                }
                _ => self.violation(sender, ProtocolError::NotAuthenticated).await,
            }
            return;
        }

        match message {
            ClientMessage::AuthenticationResponse { .. } => {
                tracing::debug!(connection_id = %sender, "Ignoring repeated authentication");
            }
            ClientMessage::CreateRoom {
                max_players,
                name,
                is_public,
                data,
                app_id,
            } => {
                let settings = RoomSettings {
                    app_id,
                    is_public,
                    name,
                    data,
                    max_players,
                };
                self.create_room(sender, settings).await;
            }
            ClientMessage::JoinRoom { room_id } => self.join_room(sender, &room_id).await,
            ClientMessage::LeaveRoom => {
                if let Some(departure) = self.rooms.leave_current(sender) {
                    self.announce_departure(sender, &departure);
                    self.send(sender, Channel::Reliable, ServerMessage::RoomLeft);
                    self.rooms_modified().await;
                }
            }
            ClientMessage::KickPlayer { target } => self.kick(sender, target).await,
            ClientMessage::UpdateRoomData(update) => self.update_room(sender, update).await,
            ClientMessage::SendData { payload, target } => {
                self.forward(sender, channel, payload, target).await
            }
        }
    }

    /// Apply the forwarding rule to one payload
    async fn forward(
        &mut self,
        sender: ConnectionId,
        channel: Channel,
        payload: &[u8],
        target: ConnectionId,
    ) {
        let Some(room) = self.rooms.room_for_client(sender) else {
            tracing::trace!(connection_id = %sender, "Dropping payload from peer outside any room");
            return;
        };

        let (recipient, tag) = if room.host_id == sender {
            if !room.is_member(target) {
                tracing::trace!(
                    connection_id = %sender,
                    target = %target,
                    error = %Error::RouteNotFound,
                    "Dropping host payload"
                );
                return;
            }
            (target, None)
        } else {
            (room.host_id, Some(sender))
        };

        if payload.len() > self.max_packet_size {
            self.violation(
                sender,
                ProtocolError::Oversized {
                    size: payload.len(),
                    max: self.max_packet_size,
                },
            )
            .await;
            return;
        }

        self.send(
            recipient,
            channel,
            ServerMessage::GetData {
                payload,
                sender: tag,
            },
        );
    }

    async fn create_room(&mut self, host: ConnectionId, settings: RoomSettings) {
        let mut modified = false;
        if let Some(departure) = self.rooms.leave_current(host) {
            self.announce_departure(host, &departure);
            modified = true;
        }

        let created = self
            .rooms
            .create_room(&self.ids, host, settings)
            .await
            .map(|room| room.server_id.clone());

        match created {
            Ok(room_id) => {
                self.send(host, Channel::Reliable, ServerMessage::RoomCreated(&room_id));
                modified = true;
            }
            Err(e) => {
                tracing::warn!(connection_id = %host, error = %e, "Failed to create room");
                self.send(host, Channel::Reliable, ServerMessage::RoomLeft);
            }
        }

        if modified {
            self.rooms_modified().await;
        }
    }

    async fn join_room(&mut self, client: ConnectionId, room_id: &str) {
        let mut modified = false;
        if let Some(current) = self.rooms.room_for_client(client) {
            if current.server_id == room_id {
                return;
            }
            if let Some(departure) = self.rooms.leave_current(client) {
                self.announce_departure(client, &departure);
                modified = true;
            }
        }

        match self.rooms.join_room(room_id, client) {
            Ok(room) => {
                let host = room.host_id;
                self.send(client, Channel::Reliable, ServerMessage::RoomJoined(client));
                self.send(host, Channel::Reliable, ServerMessage::RoomJoined(client));
                modified = true;
            }
            Err(e) => {
                tracing::debug!(connection_id = %client, room = %room_id, error = %e, "Join refused");
                self.send(client, Channel::Reliable, ServerMessage::RoomLeft);
            }
        }

        if modified {
            self.rooms_modified().await;
        }
    }

    async fn kick(&mut self, host: ConnectionId, target: ConnectionId) {
        let Some(room) = self.rooms.room_for_client(host) else {
            return;
        };
        if room.host_id != host || target == host || !room.is_member(target) {
            tracing::debug!(connection_id = %host, target = %target, "Ignoring kick");
            return;
        }

        let room_id = room.server_id.clone();
        if let Some(departure) = self.rooms.leave_room(&room_id, target) {
            self.announce_departure(target, &departure);
            self.send(target, Channel::Reliable, ServerMessage::RoomLeft);
            tracing::info!(room = %room_id, target = %target, "Player kicked");
            self.rooms_modified().await;
        }
    }

    async fn update_room(&mut self, host: ConnectionId, update: RoomDataUpdate) {
        let room_id = match self.rooms.room_for_client(host) {
            Some(room) if room.host_id == host => room.server_id.clone(),
            _ => {
                tracing::debug!(connection_id = %host, "Ignoring room update from non-host");
                return;
            }
        };

        if let Err(e) = self.rooms.update_room(&room_id, update) {
            tracing::warn!(room = %room_id, error = %e, "Failed to update room");
            return;
        }
        self.rooms_modified().await;
    }

    /// Tell the rest of a room that `who` is gone
    fn announce_departure(&self, who: ConnectionId, departure: &Departure) {
        match departure {
            Departure::Left { host_id, .. } => {
                self.send(*host_id, Channel::Reliable, ServerMessage::PlayerDisconnected(who));
            }
            Departure::Closed(room) => {
                for member in room.clients.iter().filter(|member| **member != who) {
                    self.send(*member, Channel::Reliable, ServerMessage::RoomLeft);
                }
            }
        }
    }

    /// Drop all state of a connection. Returns false if it was unknown.
    async fn forget_peer(&mut self, id: ConnectionId) -> bool {
        if self.peers.remove(&id).is_none() {
            return false;
        }
        self.listing.set_connected(self.authenticated_count());

        if let Some(departure) = self.rooms.leave_current(id) {
            self.announce_departure(id, &departure);
            self.rooms_modified().await;
        }
        true
    }

    async fn violation(&mut self, id: ConnectionId, error: ProtocolError) {
        tracing::warn!(connection_id = %id, error = %error, "Protocol violation, disconnecting");
        self.transport.disconnect(id);
        self.forget_peer(id).await;
    }

    fn authenticated_count(&self) -> u32 {
        self.peers
            .values()
            .filter(|state| **state == PeerState::Authenticated)
            .count() as u32
    }

    /// Assemble `message` in a pooled buffer and hand it to the transport
    fn send(&self, to: ConnectionId, channel: Channel, message: ServerMessage<'_>) {
        let mut buf = self.pool.rent(message.encoded_len());
        message.encode(&mut buf);
        self.transport.send(to, channel, &buf);
        self.pool.give_back(buf);
    }

    async fn rooms_modified(&self) {
        match &self.publisher {
            Some(publisher) => publisher.submit(RoomSnapshot::capture(&self.rooms)),
            None => {
                if let Err(e) = self.listing.publish(&self.rooms).await {
                    tracing::error!(error = %e, "Failed to publish room listing");
                }
            }
        }
        if let Some(notifier) = &self.notifier {
            notifier.notify();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::get;
    use bytes::{Bytes, BytesMut};

    use super::*;
    use crate::relay::balancer_link::LoadBalancerLink;
    use crate::protocol::DATA_FRAME_OVERHEAD;
    use crate::types::{Region, Room};

    const KEY: &str = "Secret Auth Key";
    const MAX_PACKET: usize = 64;

    #[derive(Default)]
    struct MockTransport {
        sent: Mutex<Vec<(ConnectionId, Channel, Vec<u8>)>>,
        disconnected: Mutex<Vec<ConnectionId>>,
    }

    impl MockTransport {
        fn take_sent(&self) -> Vec<(ConnectionId, Channel, Vec<u8>)> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }

        fn sent_to(&self, id: ConnectionId) -> Vec<Vec<u8>> {
            self.take_sent()
                .into_iter()
                .filter(|(to, _, _)| *to == id)
                .map(|(_, _, frame)| frame)
                .collect()
        }
    }

    impl Transport for MockTransport {
        fn send(&self, connection: ConnectionId, channel: Channel, frame: &[u8]) {
            self.sent
                .lock()
                .unwrap()
                .push((connection, channel, frame.to_vec()));
        }

        fn disconnect(&self, connection: ConnectionId) {
            self.disconnected.lock().unwrap().push(connection);
        }
    }

    fn router() -> (RelayRouter<MockTransport>, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::default());
        let pool = Arc::new(BufferPool::new(4, MAX_PACKET + DATA_FRAME_OVERHEAD));
        let router = RelayRouter::new(
            transport.clone(),
            RoomRegistry::new(Region::Europe),
            pool,
            IdGenerator::local(5),
            KEY,
            MAX_PACKET,
        );
        (router, transport)
    }

    fn frame(message: ClientMessage<'_>) -> Bytes {
        let mut buf = BytesMut::new();
        message.encode(&mut buf);
        buf.freeze()
    }

    async fn send(
        router: &mut RelayRouter<MockTransport>,
        from: u32,
        channel: Channel,
        message: ClientMessage<'_>,
    ) {
        router
            .handle_event(RelayEvent::Data {
                connection: ConnectionId(from),
                channel,
                frame: frame(message),
            })
            .await;
    }

    async fn connect(router: &mut RelayRouter<MockTransport>, id: u32) {
        router
            .handle_event(RelayEvent::Connected(ConnectionId(id)))
            .await;
        send(
            router,
            id,
            Channel::Reliable,
            ClientMessage::AuthenticationResponse { key: KEY.into() },
        )
        .await;
    }

    /// Host 1 with members 2 and 3 in one room
    async fn room_with_members(
        router: &mut RelayRouter<MockTransport>,
        transport: &MockTransport,
    ) -> Room {
        for id in 1..=3 {
            connect(router, id).await;
        }
        send(
            router,
            1,
            Channel::Reliable,
            ClientMessage::CreateRoom {
                max_players: 0,
                name: "Arena".into(),
                is_public: true,
                data: String::new(),
                app_id: 1,
            },
        )
        .await;
        let room_id = router.rooms().room_for_client(ConnectionId(1)).unwrap().server_id.clone();
        for id in 2..=3 {
            send(
                router,
                id,
                Channel::Reliable,
                ClientMessage::JoinRoom {
                    room_id: room_id.clone(),
                },
            )
            .await;
        }
        transport.take_sent();
        router.rooms().get(&room_id).unwrap().clone()
    }

    fn decode(frame: &[u8]) -> ServerMessage<'_> {
        ServerMessage::decode(frame).unwrap()
    }

    #[tokio::test]
    async fn test_authentication_handshake() {
        let (mut router, transport) = router();

        connect(&mut router, 7).await;

        let frames = transport.sent_to(ConnectionId(7));
        let messages: Vec<_> = frames.iter().map(|f| decode(f)).collect();
        assert_eq!(
            messages,
            vec![
                ServerMessage::AuthenticationRequest,
                ServerMessage::Authenticated,
                ServerMessage::GetId(ConnectionId(7)),
            ]
        );
        assert_eq!(router.listing().stats().await.connected_clients, 1);
    }

    #[tokio::test]
    async fn test_wrong_key_disconnects() {
        let (mut router, transport) = router();

        router
            .handle_event(RelayEvent::Connected(ConnectionId(1)))
            .await;
        send(
            &mut router,
            1,
            Channel::Reliable,
            ClientMessage::AuthenticationResponse {
                key: "guess".into(),
            },
        )
        .await;

        assert_eq!(*transport.disconnected.lock().unwrap(), vec![ConnectionId(1)]);
    }

    #[tokio::test]
    async fn test_message_before_auth_disconnects() {
        let (mut router, transport) = router();

        router
            .handle_event(RelayEvent::Connected(ConnectionId(1)))
            .await;
        send(&mut router, 1, Channel::Reliable, ClientMessage::LeaveRoom).await;

        assert_eq!(*transport.disconnected.lock().unwrap(), vec![ConnectionId(1)]);
    }

    #[tokio::test]
    async fn test_member_traffic_goes_to_host_tagged() {
        let (mut router, transport) = router();
        room_with_members(&mut router, &transport).await;

        // Nominal target is member 3, but non-host traffic always goes to the host
        send(
            &mut router,
            2,
            Channel::Unreliable,
            ClientMessage::SendData {
                payload: b"move",
                target: ConnectionId(3),
            },
        )
        .await;

        let sent = transport.take_sent();
        assert_eq!(sent.len(), 1);
        let (to, channel, frame) = &sent[0];
        assert_eq!(*to, ConnectionId(1));
        assert_eq!(*channel, Channel::Unreliable);
        assert_eq!(
            decode(frame),
            ServerMessage::GetData {
                payload: b"move",
                sender: Some(ConnectionId(2)),
            }
        );
    }

    #[tokio::test]
    async fn test_host_addresses_one_member() {
        let (mut router, transport) = router();
        room_with_members(&mut router, &transport).await;

        send(
            &mut router,
            1,
            Channel::Reliable,
            ClientMessage::SendData {
                payload: b"state",
                target: ConnectionId(3),
            },
        )
        .await;

        let sent = transport.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, ConnectionId(3));
        assert_eq!(
            decode(&sent[0].2),
            ServerMessage::GetData {
                payload: b"state",
                sender: None,
            }
        );
    }

    #[tokio::test]
    async fn test_host_to_non_member_dropped() {
        let (mut router, transport) = router();
        room_with_members(&mut router, &transport).await;
        connect(&mut router, 9).await;
        transport.take_sent();

        send(
            &mut router,
            1,
            Channel::Reliable,
            ClientMessage::SendData {
                payload: b"state",
                target: ConnectionId(9),
            },
        )
        .await;

        assert!(transport.take_sent().is_empty());
        assert!(transport.disconnected.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_payload_outside_room_dropped() {
        let (mut router, transport) = router();
        connect(&mut router, 4).await;
        transport.take_sent();

        send(
            &mut router,
            4,
            Channel::Reliable,
            ClientMessage::SendData {
                payload: b"hello",
                target: ConnectionId(1),
            },
        )
        .await;

        assert!(transport.take_sent().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_payload_disconnects_sender() {
        let (mut router, transport) = router();
        room_with_members(&mut router, &transport).await;

        let big = vec![0u8; MAX_PACKET + 1];
        send(
            &mut router,
            2,
            Channel::Reliable,
            ClientMessage::SendData {
                payload: &big,
                target: ConnectionId(1),
            },
        )
        .await;

        assert_eq!(*transport.disconnected.lock().unwrap(), vec![ConnectionId(2)]);
        // Host hears about the departure, but never gets the payload
        let to_host = transport.sent_to(ConnectionId(1));
        assert_eq!(to_host.len(), 1);
        assert_eq!(
            decode(&to_host[0]),
            ServerMessage::PlayerDisconnected(ConnectionId(2))
        );
        assert!(router.rooms().room_for_client(ConnectionId(2)).is_none());
    }

    #[tokio::test]
    async fn test_host_oversized_payload_disconnects_host() {
        let (mut router, transport) = router();
        let room = room_with_members(&mut router, &transport).await;

        let big = vec![0u8; MAX_PACKET + 1];
        send(
            &mut router,
            1,
            Channel::Reliable,
            ClientMessage::SendData {
                payload: &big,
                target: ConnectionId(2),
            },
        )
        .await;

        assert_eq!(*transport.disconnected.lock().unwrap(), vec![ConnectionId(1)]);
        // The host leaving closes the room; the payload never reaches the member
        let to_member = transport.sent_to(ConnectionId(2));
        assert_eq!(to_member.len(), 1);
        assert_eq!(decode(&to_member[0]), ServerMessage::RoomLeft);
        assert!(!router.rooms().contains(&room.server_id));
    }

    #[tokio::test]
    async fn test_malformed_frame_disconnects() {
        let (mut router, transport) = router();
        connect(&mut router, 1).await;

        router
            .handle_event(RelayEvent::Data {
                connection: ConnectionId(1),
                channel: Channel::Reliable,
                frame: Bytes::from_static(&[200, 1, 2]),
            })
            .await;

        assert_eq!(*transport.disconnected.lock().unwrap(), vec![ConnectionId(1)]);
    }

    #[tokio::test]
    async fn test_host_disconnect_closes_room() {
        let (mut router, transport) = router();
        let room = room_with_members(&mut router, &transport).await;

        router
            .handle_event(RelayEvent::Disconnected(ConnectionId(1)))
            .await;

        assert!(router.rooms().get(&room.server_id).is_none());
        let sent = transport.take_sent();
        let mut notified: Vec<_> = sent
            .iter()
            .filter(|(_, _, frame)| decode(frame) == ServerMessage::RoomLeft)
            .map(|(to, _, _)| *to)
            .collect();
        notified.sort();
        assert_eq!(notified, vec![ConnectionId(2), ConnectionId(3)]);
    }

    #[tokio::test]
    async fn test_join_full_room_refused() {
        let (mut router, transport) = router();
        for id in 1..=3 {
            connect(&mut router, id).await;
        }
        send(
            &mut router,
            1,
            Channel::Reliable,
            ClientMessage::CreateRoom {
                max_players: 2,
                name: "Duel".into(),
                is_public: false,
                data: String::new(),
                app_id: 1,
            },
        )
        .await;
        let room_id = router.rooms().room_for_client(ConnectionId(1)).unwrap().server_id.clone();
        send(
            &mut router,
            2,
            Channel::Reliable,
            ClientMessage::JoinRoom {
                room_id: room_id.clone(),
            },
        )
        .await;
        transport.take_sent();

        send(
            &mut router,
            3,
            Channel::Reliable,
            ClientMessage::JoinRoom { room_id },
        )
        .await;

        let to_late = transport.sent_to(ConnectionId(3));
        assert_eq!(to_late.len(), 1);
        assert_eq!(decode(&to_late[0]), ServerMessage::RoomLeft);
    }

    #[tokio::test]
    async fn test_kick_requires_host() {
        let (mut router, transport) = router();
        let room = room_with_members(&mut router, &transport).await;

        send(
            &mut router,
            2,
            Channel::Reliable,
            ClientMessage::KickPlayer {
                target: ConnectionId(3),
            },
        )
        .await;
        assert!(router.rooms().get(&room.server_id).unwrap().is_member(ConnectionId(3)));

        send(
            &mut router,
            1,
            Channel::Reliable,
            ClientMessage::KickPlayer {
                target: ConnectionId(3),
            },
        )
        .await;
        assert!(!router.rooms().get(&room.server_id).unwrap().is_member(ConnectionId(3)));
        let to_kicked = transport.sent_to(ConnectionId(3));
        assert_eq!(decode(to_kicked.last().unwrap()), ServerMessage::RoomLeft);
    }

    #[tokio::test]
    async fn test_room_changes_are_published() {
        let (mut router, transport) = router();
        room_with_members(&mut router, &transport).await;

        let stats = router.listing().stats().await;
        assert_eq!(stats.room_count, 1);
        assert_eq!(stats.public_room_count, 1);

        send(
            &mut router,
            1,
            Channel::Reliable,
            ClientMessage::UpdateRoomData(RoomDataUpdate {
                is_public: Some(false),
                ..RoomDataUpdate::default()
            }),
        )
        .await;

        assert_eq!(router.listing().stats().await.public_room_count, 0);
        assert_eq!(router.listing().listing(None).await.json, "[]");
    }

    #[tokio::test]
    async fn test_host_invariant_holds() {
        let (mut router, transport) = router();
        room_with_members(&mut router, &transport).await;

        send(&mut router, 2, Channel::Reliable, ClientMessage::LeaveRoom).await;
        router
            .handle_event(RelayEvent::Disconnected(ConnectionId(3)))
            .await;

        for room in router.rooms().rooms() {
            assert!(room.is_member(room.host_id));
        }
        assert_eq!(
            router
                .rooms()
                .room_for_client(ConnectionId(1))
                .unwrap()
                .clients
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_room_changes_go_through_publisher_task() {
        let (router, transport) = router();
        let cancel = CancellationToken::new();
        let (publisher, handle) = router.listing().spawn_publisher(cancel.clone());
        let mut router = router.with_listing_publisher(publisher);
        room_with_members(&mut router, &transport).await;

        let listing = router.listing().clone();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while listing.stats().await.room_count != 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        let rooms: Vec<Room> = serde_json::from_str(&listing.listing(None).await.json).unwrap();
        assert_eq!(rooms[0].clients.len(), 3);

        cancel.cancel();
        handle.await.unwrap();
    }

    /// Load balancer stand-in that answers `/api/roomsupdated` slowly
    #[derive(Default)]
    struct SlowBalancer {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    async fn slow_rooms_updated(State(balancer): State<Arc<SlowBalancer>>) -> StatusCode {
        let now = balancer.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        balancer.peak.fetch_max(now, Ordering::SeqCst);
        balancer.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        balancer.in_flight.fetch_sub(1, Ordering::SeqCst);
        StatusCode::OK
    }

    #[tokio::test]
    async fn test_room_changes_keep_one_notification_in_flight() {
        let balancer = Arc::new(SlowBalancer::default());
        let app = axum::Router::new()
            .route("/api/roomsupdated", get(slow_rooms_updated))
            .with_state(balancer.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let cancel = CancellationToken::new();
        let link = LoadBalancerLink::new("127.0.0.1", port, KEY, Duration::from_secs(2));
        let (notifier, handle) = link.spawn_notifier(cancel.clone());

        let (router, transport) = router();
        let mut router = router.with_room_change_notifier(notifier);
        room_with_members(&mut router, &transport).await;
        for round in 0..20 {
            send(
                &mut router,
                1,
                Channel::Reliable,
                ClientMessage::UpdateRoomData(RoomDataUpdate {
                    name: Some(format!("Arena {}", round)),
                    ..RoomDataUpdate::default()
                }),
            )
            .await;
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while balancer.calls.load(Ordering::SeqCst) == 0
                || balancer.in_flight.load(Ordering::SeqCst) > 0
            {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        // Let a coalesced follow-up, if any, run to completion
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(balancer.peak.load(Ordering::SeqCst), 1);
        assert_eq!(balancer.in_flight.load(Ordering::SeqCst), 0);
        let calls = balancer.calls.load(Ordering::SeqCst);
        assert!((1..=2).contains(&calls), "{} calls for 23 changes", calls);

        cancel.cancel();
        handle.await.unwrap();
    }
}
