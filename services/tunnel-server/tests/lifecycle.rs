//! Connection lifecycle against a recording host.

use std::cell::RefCell;
use std::fs::File;
use std::future::Future;
use std::io::{self, Read};
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use dcnet_networking::{AddressPair, NetworkError};
use dcnet_proto::{encode_frame, HandshakeError, HANDSHAKE};
use dcnet_relay::{RelayIo, RelayOutcome, Side};
use dcnet_server::{
    handle_connection, ConnectionError, ConnectionSettings, HelperHandle, Host, PrivilegeError,
    ProvisionedInterface,
};
use nix::fcntl::OFlag;
use nix::unistd::{pipe2, Pid};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, Interest, ReadBuf, Ready};
use tokio::net::{UnixDatagram, UnixStream};

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostEvent {
    CreateInterface,
    ConfigureInterface { name: String, pair: AddressPair },
    StartHelper { name: String, pair: AddressPair },
    DropPrivileges,
    SocketClosed,
    InterfaceReleased { helper_running: bool },
}

type EventLog = Rc<RefCell<Vec<HostEvent>>>;

/// Read end of the helper pipe, as the supervisor would hold it.
struct HelperObserver {
    pipe: File,
}

impl HelperObserver {
    /// Whether the owner still holds the write end.
    fn running(&mut self) -> bool {
        let mut buf = [0u8; 1];
        match self.pipe.read(&mut buf) {
            Ok(0) => false,
            Ok(_) => true,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => true,
            Err(e) => panic!("helper pipe read failed: {}", e),
        }
    }
}

/// Interface double: a datagram socket whose far end the test drives.
struct MockInterface {
    inner: UnixDatagram,
    log: EventLog,
    helper: Rc<RefCell<Option<HelperObserver>>>,
}

impl RelayIo for MockInterface {
    fn ready(&self, interest: Interest) -> impl Future<Output = io::Result<Ready>> {
        RelayIo::ready(&self.inner, interest)
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        RelayIo::try_read(&self.inner, buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        RelayIo::try_write(&self.inner, buf)
    }
}

impl AsRawFd for MockInterface {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl Drop for MockInterface {
    fn drop(&mut self) {
        let helper_running = self
            .helper
            .borrow_mut()
            .as_mut()
            .map(HelperObserver::running)
            .unwrap_or(false);
        self.log
            .borrow_mut()
            .push(HostEvent::InterfaceReleased { helper_running });
    }
}

/// Socket double that records when it is closed.
struct RecordingSocket {
    inner: UnixStream,
    log: EventLog,
}

impl AsyncRead for RecordingSocket {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl RelayIo for RecordingSocket {
    fn ready(&self, interest: Interest) -> impl Future<Output = io::Result<Ready>> {
        RelayIo::ready(&self.inner, interest)
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        RelayIo::try_read(&self.inner, buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        RelayIo::try_write(&self.inner, buf)
    }
}

impl AsRawFd for RecordingSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl Drop for RecordingSocket {
    fn drop(&mut self) {
        self.log.borrow_mut().push(HostEvent::SocketClosed);
    }
}

/// Host double recording every privileged operation.
struct MockHost {
    log: EventLog,
    interface_name: String,
    interface: RefCell<Option<UnixDatagram>>,
    helper: Rc<RefCell<Option<HelperObserver>>>,
    start_helper: bool,
    fail_privilege_drop: bool,
}

impl MockHost {
    fn new(interface_name: &str, interface: UnixDatagram) -> Self {
        Self {
            log: Rc::new(RefCell::new(Vec::new())),
            interface_name: interface_name.to_string(),
            interface: RefCell::new(Some(interface)),
            helper: Rc::new(RefCell::new(None)),
            start_helper: true,
            fail_privilege_drop: false,
        }
    }

    fn events(&self) -> Vec<HostEvent> {
        self.log.borrow().clone()
    }

    fn host_calls(&self) -> Vec<HostEvent> {
        self.events()
            .into_iter()
            .filter(|e| {
                !matches!(
                    e,
                    HostEvent::SocketClosed | HostEvent::InterfaceReleased { .. }
                )
            })
            .collect()
    }

    fn helper_running(&self) -> Option<bool> {
        self.helper.borrow_mut().as_mut().map(HelperObserver::running)
    }

    fn socket(&self, inner: UnixStream) -> RecordingSocket {
        RecordingSocket {
            inner,
            log: self.log.clone(),
        }
    }
}

impl Host for MockHost {
    type Interface = MockInterface;

    fn create_interface(&self) -> Result<ProvisionedInterface<MockInterface>, NetworkError> {
        self.log.borrow_mut().push(HostEvent::CreateInterface);
        let inner = self
            .interface
            .borrow_mut()
            .take()
            .expect("interface created twice");

        Ok(ProvisionedInterface {
            handle: MockInterface {
                inner,
                log: self.log.clone(),
                helper: self.helper.clone(),
            },
            name: self.interface_name.clone(),
        })
    }

    fn configure_interface(&self, name: &str, pair: &AddressPair) -> Result<(), NetworkError> {
        self.log.borrow_mut().push(HostEvent::ConfigureInterface {
            name: name.to_string(),
            pair: *pair,
        });
        Ok(())
    }

    fn start_helper(
        &self,
        name: &str,
        pair: &AddressPair,
        _inherited: &[RawFd],
    ) -> Option<HelperHandle> {
        self.log.borrow_mut().push(HostEvent::StartHelper {
            name: name.to_string(),
            pair: *pair,
        });
        if !self.start_helper {
            return None;
        }

        let (read_end, write_end): (OwnedFd, OwnedFd) =
            pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK).unwrap();
        *self.helper.borrow_mut() = Some(HelperObserver {
            pipe: File::from(read_end),
        });
        Some(HelperHandle::new(Pid::this(), write_end))
    }

    fn drop_privileges(&self) -> Result<(), PrivilegeError> {
        self.log.borrow_mut().push(HostEvent::DropPrivileges);
        if self.fail_privilege_drop {
            return Err(PrivilegeError::SetUid {
                uid: nix::unistd::Uid::from_raw(65534),
                source: nix::Error::EPERM,
            });
        }
        Ok(())
    }
}

fn pair(server: [u8; 4], peer: [u8; 4]) -> AddressPair {
    AddressPair {
        server: Ipv4Addr::from(server),
        peer: Ipv4Addr::from(peer),
    }
}

fn ethernet_frame(len: usize) -> Vec<u8> {
    let mut frame = vec![0x00, 0xd0, 0xf1, 0x00, 0x00, 0x01];
    frame.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x02, 0x08, 0x00]);
    frame.resize(len, 0xab);
    frame
}

struct Fixture {
    host: MockHost,
    socket: RecordingSocket,
    client: UnixStream,
    host_side: UnixDatagram,
}

fn fixture(interface_name: &str) -> Fixture {
    fixture_with(interface_name, |_| {})
}

fn fixture_with(interface_name: &str, configure: impl FnOnce(&mut MockHost)) -> Fixture {
    let (server, client) = UnixStream::pair().unwrap();
    let (interface, host_side) = UnixDatagram::pair().unwrap();
    let mut host = MockHost::new(interface_name, interface);
    configure(&mut host);
    let socket = host.socket(server);
    Fixture {
        host,
        socket,
        client,
        host_side,
    }
}

#[tokio::test]
async fn test_tunnel_establishes_and_relays() {
    let Fixture {
        host,
        socket,
        mut client,
        host_side,
    } = fixture("tap3");
    let settings = ConnectionSettings::default();

    let connection = handle_connection(&host, socket, &settings);

    let driver = async {
        client.write_all(&HANDSHAKE).await.unwrap();

        // adapter -> host
        let outbound = ethernet_frame(64);
        client
            .write_all(&encode_frame(&outbound).unwrap())
            .await
            .unwrap();
        let mut buf = [0u8; 2048];
        let n = host_side.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &outbound[..]);

        // host -> adapter
        let inbound = ethernet_frame(64);
        host_side.send(&inbound).await.unwrap();
        let mut received = [0u8; 66];
        client.read_exact(&mut received).await.unwrap();
        assert_eq!(&received[..2], &[64, 0]);
        assert_eq!(&received[2..], &inbound[..]);

        drop(client);
    };

    let (result, ()) = tokio::join!(connection, driver);
    let summary = result.unwrap();

    let expected_pair = pair([172, 20, 1, 6], [172, 20, 1, 7]);
    assert_eq!(summary.interface, "tap3");
    assert_eq!(summary.pair, expected_pair);
    assert_eq!(summary.outcome, RelayOutcome::PeerClosed(Side::Socket));
    assert_eq!(summary.stats.frames_to_interface, 1);
    assert_eq!(summary.stats.frames_to_socket, 1);

    assert_eq!(
        host.events(),
        vec![
            HostEvent::CreateInterface,
            HostEvent::ConfigureInterface {
                name: "tap3".into(),
                pair: expected_pair,
            },
            HostEvent::StartHelper {
                name: "tap3".into(),
                pair: expected_pair,
            },
            HostEvent::DropPrivileges,
            HostEvent::SocketClosed,
            HostEvent::InterfaceReleased {
                helper_running: true
            },
        ]
    );
    assert_eq!(host.helper_running(), Some(false));
}

#[tokio::test]
async fn test_wrong_identifier_provisions_nothing() {
    let Fixture {
        host,
        socket,
        mut client,
        host_side: _host_side,
    } = fixture("tap0");

    // Right length, wrong identifier. Exactly eight bytes so nothing is left
    // unread when the server closes.
    client
        .write_all(&[0x06, 0x00, b'D', b'C', b'N', b'E', b'X', 0x01])
        .await
        .unwrap();

    let err = handle_connection(&host, socket, &ConnectionSettings::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ConnectionError::Handshake(HandshakeError::Mismatch { .. })
    ));
    assert_eq!(err.reason_code(), "handshake_mismatch");
    assert!(host.host_calls().is_empty());

    // The connection is closed
    let mut buf = [0u8; 8];
    assert_eq!(client.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_silent_client_times_out() {
    let Fixture {
        host,
        socket,
        client: _client,
        host_side: _host_side,
    } = fixture("tap0");

    let started = tokio::time::Instant::now();
    let err = handle_connection(&host, socket, &ConnectionSettings::default())
        .await
        .unwrap_err();

    assert_eq!(err.reason_code(), "handshake_timeout");
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(host.host_calls().is_empty());
}

#[tokio::test]
async fn test_interface_beyond_limit_is_released_unconfigured() {
    let Fixture {
        host,
        socket,
        mut client,
        host_side: _host_side,
    } = fixture("tap64");

    client.write_all(&HANDSHAKE).await.unwrap();

    let err = handle_connection(&host, socket, &ConnectionSettings::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ConnectionError::TooManyConnections(NetworkError::TooManyConnections { index: 64, max: 64 })
    ));
    assert_eq!(
        host.events(),
        vec![
            HostEvent::CreateInterface,
            HostEvent::SocketClosed,
            HostEvent::InterfaceReleased {
                helper_running: false
            },
        ]
    );
}

#[tokio::test]
async fn test_unexpected_interface_name_is_provisioning_failure() {
    let Fixture {
        host,
        socket,
        mut client,
        host_side: _host_side,
    } = fixture("eth0");

    client.write_all(&HANDSHAKE).await.unwrap();

    let err = handle_connection(&host, socket, &ConnectionSettings::default())
        .await
        .unwrap_err();

    assert_eq!(err.reason_code(), "interface_provisioning_failed");
    assert_eq!(host.host_calls(), vec![HostEvent::CreateInterface]);
}

#[tokio::test]
async fn test_privilege_drop_failure_aborts_before_relay() {
    let Fixture {
        host,
        socket,
        mut client,
        host_side: _host_side,
    } = fixture_with("tap1", |host| host.fail_privilege_drop = true);

    client.write_all(&HANDSHAKE).await.unwrap();

    let err = handle_connection(&host, socket, &ConnectionSettings::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ConnectionError::PrivilegeDrop(_)));
    assert_eq!(
        host.host_calls().last(),
        Some(&HostEvent::DropPrivileges)
    );
    assert_eq!(host.helper_running(), Some(false));

    let mut buf = [0u8; 8];
    assert_eq!(client.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_idle_connection_tears_down_and_signals_helper() {
    let Fixture {
        host,
        socket,
        mut client,
        host_side: _host_side,
    } = fixture("tap2");

    client.write_all(&HANDSHAKE).await.unwrap();

    let started = tokio::time::Instant::now();
    let summary = handle_connection(&host, socket, &ConnectionSettings::default())
        .await
        .unwrap();

    assert_eq!(summary.outcome, RelayOutcome::IdleTimeout);
    assert!(started.elapsed() >= Duration::from_secs(35 * 60));

    let events = host.events();
    let tail = &events[events.len() - 2..];
    assert_eq!(
        tail,
        &[
            HostEvent::SocketClosed,
            HostEvent::InterfaceReleased {
                helper_running: true
            },
        ]
    );
    assert_eq!(host.helper_running(), Some(false));

    let mut buf = [0u8; 8];
    assert_eq!(client.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_helper_does_not_stop_tunnel() {
    let Fixture {
        host,
        socket,
        mut client,
        host_side: _host_side,
    } = fixture_with("tap5", |host| host.start_helper = false);

    client.write_all(&HANDSHAKE).await.unwrap();
    drop(client);

    let summary = handle_connection(&host, socket, &ConnectionSettings::default())
        .await
        .unwrap();

    assert_eq!(summary.outcome, RelayOutcome::PeerClosed(Side::Socket));
    assert_eq!(summary.pair, pair([172, 20, 1, 10], [172, 20, 1, 11]));
    assert_eq!(host.helper_running(), None);
}
