//! Trait abstraction for datagram sends to enable testing

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// Fire-and-forget datagram output.
#[async_trait]
pub trait DatagramSender: Send + Sync {
    /// Send one datagram to `target`, returning the number of bytes written
    async fn send_to(&self, data: &[u8], target: SocketAddr) -> io::Result<usize>;
}

/// Wrapper around tokio::net::UdpSocket that implements DatagramSender
pub struct UdpSender {
    socket: UdpSocket,
}

impl UdpSender {
    /// Binds an outbound socket with broadcast enabled.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if the address cannot be bound.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        socket.set_broadcast(true)?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl DatagramSender for UdpSender {
    async fn send_to(&self, data: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(data, target).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_sender_loopback() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap();

        let sender = UdpSender::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let written = sender.send_to(b"R1:ping", target).await.unwrap();
        assert_eq!(written, 7);

        let mut buf = [0u8; 64];
        let (len, from) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"R1:ping");
        assert_eq!(from, sender.local_addr().unwrap());
    }

    #[test]
    fn test_mock_records_and_fails() {
        let mock = mocks::MockDatagramSender::new();
        let target: SocketAddr = "10.0.0.5:2367".parse().unwrap();

        tokio_test::block_on(mock.send_to(b"abc", target)).unwrap();
        assert_eq!(mock.get_sent(), vec![(b"abc".to_vec(), target)]);

        mock.set_send_error(io::ErrorKind::ConnectionRefused);
        let err = tokio_test::block_on(mock.send_to(b"abc", target)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
        assert_eq!(mock.get_sent().len(), 1);
    }
}
