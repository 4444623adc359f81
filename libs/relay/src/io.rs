//! Non-blocking endpoint I/O.

use std::future::Future;
use std::io;

use dcnet_networking::TapDevice;
use tokio::io::unix::AsyncFd;
use tokio::io::{Interest, Ready};
use tokio::net::{TcpStream, UnixDatagram, UnixStream};

/// An endpoint the relay can wait on and move bytes through.
///
/// `try_read` and `try_write` must never block; they return
/// [`io::ErrorKind::WouldBlock`] when the endpoint is not actually ready,
/// which also clears any cached readiness.
pub trait RelayIo {
    /// Wait until the endpoint is ready for any of `interest`.
    fn ready(&self, interest: Interest) -> impl Future<Output = io::Result<Ready>>;

    /// Read without blocking. `Ok(0)` means the endpoint is closed.
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write without blocking.
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;
}

impl RelayIo for TcpStream {
    fn ready(&self, interest: Interest) -> impl Future<Output = io::Result<Ready>> {
        TcpStream::ready(self, interest)
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }
}

impl RelayIo for UnixStream {
    fn ready(&self, interest: Interest) -> impl Future<Output = io::Result<Ready>> {
        UnixStream::ready(self, interest)
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        UnixStream::try_read(self, buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        UnixStream::try_write(self, buf)
    }
}

/// Datagram sockets stand in for interfaces: one datagram is one frame.
impl RelayIo for UnixDatagram {
    fn ready(&self, interest: Interest) -> impl Future<Output = io::Result<Ready>> {
        UnixDatagram::ready(self, interest)
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.try_recv(buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        self.try_send(buf)
    }
}

impl RelayIo for AsyncFd<TapDevice> {
    async fn ready(&self, interest: Interest) -> io::Result<Ready> {
        // Readiness stays cached until a try_io call hits WouldBlock.
        let guard = AsyncFd::ready(self, interest).await?;
        Ok(guard.ready())
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.try_io(Interest::READABLE, |tap| tap.read_frame(buf))
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        self.try_io(Interest::WRITABLE, |tap| tap.write_frame(buf))
    }
}

/// Whether an I/O error only means "try again later".
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[case(io::ErrorKind::WouldBlock, true)]
    #[case(io::ErrorKind::Interrupted, true)]
    #[case(io::ErrorKind::ConnectionReset, false)]
    #[case(io::ErrorKind::BrokenPipe, false)]
    fn test_is_transient(#[case] kind: io::ErrorKind, #[case] transient: bool) {
        assert_eq!(is_transient(&io::Error::from(kind)), transient);
    }

    #[tokio::test]
    async fn test_datagram_preserves_boundaries() {
        let (a, b) = UnixDatagram::pair().unwrap();
        a.ready(Interest::WRITABLE).await.unwrap();
        RelayIo::try_write(&a, b"one").unwrap();
        RelayIo::try_write(&a, b"three").unwrap();

        let mut buf = [0u8; 16];
        RelayIo::ready(&b, Interest::READABLE).await.unwrap();
        assert_eq!(RelayIo::try_read(&b, &mut buf).unwrap(), 3);
        assert_eq!(RelayIo::try_read(&b, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"three");
    }
}
