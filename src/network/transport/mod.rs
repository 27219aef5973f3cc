/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! DNS transport helpers for datagram and stream sockets.
//!
//! Converts between Hickory `Message` and wire bytes. Datagrams carry one
//! message each; streams use the 2-byte big-endian length prefix of RFC 1035
//! section 4.2.2.

use bytes::BytesMut;
use hickory_proto::op::Message;
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::core::error::{DnsError, Result};

/// Serialize a message to wire format.
#[inline]
pub fn encode_message(msg: &Message) -> Result<Vec<u8>> {
    Ok(msg.to_bytes()?)
}

/// Serialize DNS Message and send it as one datagram on a connected socket.
pub async fn send_message_udp(socket: &UdpSocket, msg: &Message) -> Result<()> {
    let bytes = encode_message(msg)?;
    let n = socket
        .send(&bytes)
        .await
        .map_err(|e| DnsError::protocol(format!("UDP send error: {}", e)))?;
    if n != bytes.len() {
        return Err(DnsError::protocol(format!(
            "Partial UDP send: sent {} of {} bytes",
            n,
            bytes.len()
        )));
    }
    Ok(())
}

/// Receive one datagram from a connected socket and decode it.
///
/// Malformed payloads surface as [`DnsError::HickoryProtocol`]; callers
/// reading in a loop simply move on to the next datagram.
pub async fn recv_message_udp(socket: &UdpSocket, buf: &mut [u8]) -> Result<Message> {
    let n = socket
        .recv(buf)
        .await
        .map_err(|e| DnsError::protocol(format!("UDP recv error: {}", e)))?;
    Ok(Message::from_bytes(&buf[..n])?)
}

/// Read one length-prefixed message from a stream.
pub async fn read_from_async_io<R>(reader: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut len_prefix = [0u8; 2];
    reader
        .read_exact(&mut len_prefix)
        .await
        .map_err(|e| DnsError::protocol(format!("Failed to read length prefix: {}", e)))?;
    let msg_len = u16::from_be_bytes(len_prefix) as usize;

    let mut buf = BytesMut::zeroed(msg_len);
    reader
        .read_exact(&mut buf[..])
        .await
        .map_err(|e| DnsError::protocol(format!("Failed to read DNS message body: {}", e)))?;

    Ok(Message::from_bytes(&buf)?)
}

/// Write one message to a stream as a single length-prefixed frame.
pub async fn write_to_async_io<W>(writer: &mut W, msg: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_message(msg)?;
    if bytes.len() > u16::MAX as usize {
        return Err(DnsError::protocol(format!(
            "DNS message too large: {} bytes (max 65535)",
            bytes.len()
        )));
    }

    let mut frame = BytesMut::with_capacity(2 + bytes.len());
    frame.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    frame.extend_from_slice(&bytes);

    writer
        .write_all(&frame)
        .await
        .map_err(|e| DnsError::protocol(format!("Failed to write DNS frame: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| DnsError::protocol(format!("Failed to flush DNS frame: {}", e)))
}

/// Perform one query/answer exchange over an established stream.
///
/// Frames whose id does not match the query are skipped. The whole exchange,
/// including the write, is bounded by `limit`.
pub async fn exchange_over_stream<S>(stream: &mut S, msg: &Message, limit: Duration) -> Result<Message>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match timeout(limit, write_then_read(stream, msg)).await {
        Ok(result) => result,
        Err(_) => Err(DnsError::protocol(format!(
            "DNS stream exchange timed out after {}ms",
            limit.as_millis()
        ))),
    }
}

async fn write_then_read<S>(stream: &mut S, msg: &Message) -> Result<Message>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_to_async_io(stream, msg).await?;
    loop {
        let answer = read_from_async_io(stream).await?;
        if answer.id() == msg.id() {
            return Ok(answer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dns_utils::build_response_from_request;
    use hickory_proto::op::{Query, ResponseCode};
    use hickory_proto::rr::{Name, RecordType};
    use std::str::FromStr;

    fn query(id: u16) -> Message {
        let mut msg = Message::new();
        msg.set_id(id);
        msg.add_query(Query::query(
            Name::from_str("example.com.").unwrap(),
            RecordType::A,
        ));
        msg
    }

    #[tokio::test]
    async fn stream_exchange_skips_foreign_ids() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let request = query(7);

        let server_task = tokio::spawn(async move {
            let received = read_from_async_io(&mut server).await.unwrap();
            let mut stray = build_response_from_request(&received, ResponseCode::Refused);
            stray.set_id(received.id().wrapping_add(1));
            write_to_async_io(&mut server, &stray).await.unwrap();
            let answer = build_response_from_request(&received, ResponseCode::NXDomain);
            write_to_async_io(&mut server, &answer).await.unwrap();
        });

        let answer = exchange_over_stream(&mut client, &request, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(answer.id(), 7);
        assert_eq!(answer.response_code(), ResponseCode::NXDomain);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn stream_exchange_times_out() {
        let (mut client, _server) = tokio::io::duplex(4096);
        let result = exchange_over_stream(&mut client, &query(1), Duration::from_millis(50)).await;
        assert!(matches!(result, Err(DnsError::Protocol(_))));
    }

    #[tokio::test]
    async fn udp_helpers_round_trip_over_loopback() {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        a.connect(b.local_addr().unwrap()).await.unwrap();
        b.connect(a.local_addr().unwrap()).await.unwrap();

        send_message_udp(&a, &query(99)).await.unwrap();
        let mut buf = [0u8; 512];
        let received = recv_message_udp(&b, &mut buf).await.unwrap();
        assert_eq!(received.id(), 99);
        assert_eq!(received.queries().len(), 1);
    }

    #[tokio::test]
    async fn malformed_datagram_is_a_decode_error() {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        a.connect(b.local_addr().unwrap()).await.unwrap();
        b.connect(a.local_addr().unwrap()).await.unwrap();

        a.send(&[0xde, 0xad, 0xbe]).await.unwrap();
        let mut buf = [0u8; 512];
        let result = recv_message_udp(&b, &mut buf).await;
        assert!(matches!(result, Err(DnsError::HickoryProtocol(_))));
    }

    #[tokio::test]
    async fn malformed_frame_is_a_decode_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(&[0x00, 0x03, 0x01, 0x02, 0x03]).await.unwrap();
        let result = read_from_async_io(&mut client).await;
        assert!(matches!(result, Err(DnsError::HickoryProtocol(_))));
    }
}
