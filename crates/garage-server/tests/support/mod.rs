//! Broker side of an MQTT 3.1.1 session, just enough to drive the client
//! over a real socket.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const CONNECT: u8 = 1;
pub const PUBLISH: u8 = 3;
pub const PUBREL: u8 = 6;
pub const SUBSCRIBE: u8 = 8;
pub const PINGREQ: u8 = 12;
pub const DISCONNECT: u8 = 14;

/// SUBACK return code for a granted QoS 2 subscription.
pub const GRANTED_QOS2: u8 = 0x02;
/// SUBACK return code for a rejected subscription.
pub const REJECTED: u8 = 0x80;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct FakeBroker {
    listener: TcpListener,
}

impl FakeBroker {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        Self { listener }
    }

    pub fn port(&self) -> u16 {
        self.listener
            .local_addr()
            .expect("should have address")
            .port()
    }

    /// Accepts one client and answers its CONNECT with an accepting CONNACK.
    pub async fn accept(&self) -> Session {
        let (stream, _) = tokio::time::timeout(STEP_TIMEOUT, self.listener.accept())
            .await
            .expect("client should connect in time")
            .expect("accept should succeed");

        let mut session = Session { stream };
        let connect = session.read_packet().await;
        assert_eq!(connect.kind, CONNECT, "first packet must be CONNECT");
        session.send(&[0x20, 0x02, 0x00, 0x00]).await;
        session
    }
}

/// One control packet as read off the wire.
pub struct RawPacket {
    pub kind: u8,
    pub flags: u8,
    pub body: Vec<u8>,
}

impl RawPacket {
    /// Topic and payload of a PUBLISH.
    pub fn publish_parts(&self) -> (String, Vec<u8>) {
        assert_eq!(self.kind, PUBLISH);
        let topic_len = usize::from(u16::from_be_bytes([self.body[0], self.body[1]]));
        let topic = String::from_utf8(self.body[2..2 + topic_len].to_vec()).expect("utf-8 topic");

        let mut offset = 2 + topic_len;
        if self.qos() > 0 {
            offset += 2;
        }
        (topic, self.body[offset..].to_vec())
    }

    fn qos(&self) -> u8 {
        (self.flags >> 1) & 0x03
    }

    fn packet_id(&self) -> [u8; 2] {
        match self.kind {
            PUBLISH => {
                let topic_len = usize::from(u16::from_be_bytes([self.body[0], self.body[1]]));
                [self.body[2 + topic_len], self.body[3 + topic_len]]
            }
            _ => [self.body[0], self.body[1]],
        }
    }
}

pub struct Session {
    stream: TcpStream,
}

impl Session {
    pub async fn read_packet(&mut self) -> RawPacket {
        tokio::time::timeout(STEP_TIMEOUT, self.read_packet_unbounded())
            .await
            .expect("client should send a packet in time")
    }

    async fn read_packet_unbounded(&mut self) -> RawPacket {
        let header = self.stream.read_u8().await.expect("should read fixed header");

        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = self.stream.read_u8().await.expect("should read length");
            len |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }

        let mut body = vec![0; len];
        self.stream
            .read_exact(&mut body)
            .await
            .expect("should read body");

        RawPacket {
            kind: header >> 4,
            flags: header & 0x0f,
            body,
        }
    }

    /// Reads until a packet of `kind` arrives, completing QoS 2 handshakes
    /// and answering pings on the way.
    pub async fn next_of(&mut self, kind: u8) -> RawPacket {
        loop {
            let packet = self.read_packet().await;
            self.acknowledge(&packet).await;
            if packet.kind == kind {
                return packet;
            }
        }
    }

    /// Reads the next SUBSCRIBE and returns its packet id and topic filters.
    pub async fn expect_subscribe(&mut self) -> (u16, Vec<String>) {
        let packet = self.next_of(SUBSCRIBE).await;
        let body = &packet.body;
        let packet_id = u16::from_be_bytes([body[0], body[1]]);

        let mut topics = Vec::new();
        let mut offset = 2;
        while offset < body.len() {
            let len = usize::from(u16::from_be_bytes([body[offset], body[offset + 1]]));
            offset += 2;
            topics.push(
                String::from_utf8(body[offset..offset + len].to_vec()).expect("utf-8 filter"),
            );
            // Topic bytes plus the requested QoS byte.
            offset += len + 1;
        }
        (packet_id, topics)
    }

    pub async fn suback(&mut self, packet_id: u16, codes: &[u8]) {
        let mut packet = vec![0x90];
        encode_len(2 + codes.len(), &mut packet);
        packet.extend_from_slice(&packet_id.to_be_bytes());
        packet.extend_from_slice(codes);
        self.send(&packet).await;
    }

    /// Sends a QoS 0 PUBLISH to the client.
    pub async fn publish(&mut self, topic: &str, payload: &[u8]) {
        let topic_len = u16::try_from(topic.len()).expect("topic fits in u16");
        let mut body = Vec::with_capacity(2 + topic.len() + payload.len());
        body.extend_from_slice(&topic_len.to_be_bytes());
        body.extend_from_slice(topic.as_bytes());
        body.extend_from_slice(payload);

        let mut packet = vec![0x30];
        encode_len(body.len(), &mut packet);
        packet.extend_from_slice(&body);
        self.send(&packet).await;
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream
            .write_all(bytes)
            .await
            .expect("should write to client");
    }

    async fn acknowledge(&mut self, packet: &RawPacket) {
        let [hi, lo] = match packet.kind {
            PUBLISH if packet.qos() == 2 => packet.packet_id(),
            PUBREL => packet.packet_id(),
            PINGREQ => {
                let _ = self.stream.write_all(&[0xd0, 0x00]).await;
                return;
            }
            _ => return,
        };
        let reply = if packet.kind == PUBLISH { 0x50 } else { 0x70 };
        // The client may already be gone after DISCONNECT.
        let _ = self.stream.write_all(&[reply, 0x02, hi, lo]).await;
    }
}

fn encode_len(mut len: usize, out: &mut Vec<u8>) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
}
