//! SSDP discovery service.
//!
//! Two independent background loops make the device discoverable:
//! a listener answering M-SEARCH queries with a unicast response, and a
//! broadcaster sending periodic `ssdp:alive` notifications so clients that
//! never query still find the device within one interval. The loops share
//! nothing but the read-only device identity.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::device::DeviceIdentity;

const SSDP_MULTICAST: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
const SSDP_PORT: u16 = 1900;
const DEVICE_TYPE: &str = "urn:schemas-upnp-org:device:MediaServer:1";
const CACHE_MAX_AGE: u32 = 1800;
const SERVER_IDENT: &str = "webtuner-proxy/1.0 UPnP/1.0 HDHomeRun/1.0";
const NOTIFY_INTERVAL: Duration = Duration::from_secs(30);

/// Start the listener and broadcaster as detached background tasks.
pub fn spawn(identity: Arc<DeviceIdentity>) {
    tokio::spawn(run_listener(Arc::clone(&identity)));
    tokio::spawn(run_broadcaster(Arc::clone(&identity)));
    info!(
        "SSDP services started - device {} at {}",
        identity.device_id, identity.base_url
    );
}

/// Listen for M-SEARCH queries and answer each matching one with a single
/// unicast response. Malformed or non-matching datagrams are dropped
/// silently. Errors end this loop only; the broadcaster and the HTTP API
/// are unaffected.
pub async fn run_listener(identity: Arc<DeviceIdentity>) {
    let socket = match listener_socket() {
        Ok(socket) => socket,
        Err(e) => {
            error!("SSDP listener setup failed: {}", e);
            return;
        }
    };
    info!("SSDP listener started on {}:{}", SSDP_MULTICAST, SSDP_PORT);

    let mut buf = [0u8; 1024];
    loop {
        let (len, addr) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                error!("SSDP listener receive error: {}", e);
                return;
            }
        };
        handle_datagram(&socket, &identity, &buf[..len], addr).await;
    }
}

/// Reply to one inbound datagram if it is a search for our device type.
/// Returns whether a response was sent.
pub async fn handle_datagram(
    socket: &UdpSocket,
    identity: &DeviceIdentity,
    data: &[u8],
    from: SocketAddr,
) -> bool {
    if !is_search_for_us(data) {
        return false;
    }
    info!("Received SSDP M-SEARCH from {}", from);
    if let Err(e) = socket.send_to(search_response(identity).as_bytes(), from).await {
        warn!("SSDP response to {} failed: {}", from, e);
        return false;
    }
    true
}

/// Announce presence to the multicast group every interval. Send errors are
/// logged and the loop keeps its schedule.
pub async fn run_broadcaster(identity: Arc<DeviceIdentity>) {
    let socket = match notify_socket() {
        Ok(socket) => socket,
        Err(e) => {
            error!("SSDP broadcaster setup failed: {}", e);
            return;
        }
    };
    info!("SSDP broadcaster started for {}", identity.base_url);

    let target = SocketAddr::from((SSDP_MULTICAST, SSDP_PORT));
    broadcast_loop(socket, target, identity, NOTIFY_INTERVAL).await;
}

/// Send the alive notification to `target` once per `period`, forever.
/// The first notification goes out immediately.
async fn broadcast_loop(
    socket: UdpSocket,
    target: SocketAddr,
    identity: Arc<DeviceIdentity>,
    period: Duration,
) {
    let notify = alive_notify(&identity);
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        match socket.send_to(notify.as_bytes(), target).await {
            Ok(_) => debug!("Sent SSDP alive notification"),
            Err(e) => warn!("SSDP alive notification failed: {}", e),
        }
    }
}

/// Whether a datagram is an M-SEARCH for our device type.
fn is_search_for_us(data: &[u8]) -> bool {
    contains(data, b"M-SEARCH") && contains(data, DEVICE_TYPE.as_bytes())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Unicast reply to an M-SEARCH query.
fn search_response(identity: &DeviceIdentity) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         CACHE-CONTROL: max-age={max_age}\r\n\
         EXT:\r\n\
         LOCATION: {base}/device.xml\r\n\
         SERVER: {server}\r\n\
         ST: {device_type}\r\n\
         USN: uuid:{device_id}::{device_type}\r\n\
         \r\n",
        max_age = CACHE_MAX_AGE,
        base = identity.base_url,
        server = SERVER_IDENT,
        device_type = DEVICE_TYPE,
        device_id = identity.device_id,
    )
}

/// Unsolicited `ssdp:alive` announcement.
fn alive_notify(identity: &DeviceIdentity) -> String {
    format!(
        "NOTIFY * HTTP/1.1\r\n\
         HOST: {multicast}:{port}\r\n\
         CACHE-CONTROL: max-age={max_age}\r\n\
         LOCATION: {base}/device.xml\r\n\
         SERVER: {server}\r\n\
         NT: {device_type}\r\n\
         NTS: ssdp:alive\r\n\
         USN: uuid:{device_id}::{device_type}\r\n\
         \r\n",
        multicast = SSDP_MULTICAST,
        port = SSDP_PORT,
        max_age = CACHE_MAX_AGE,
        base = identity.base_url,
        server = SERVER_IDENT,
        device_type = DEVICE_TYPE,
        device_id = identity.device_id,
    )
}

/// Multicast-joined socket bound to the SSDP port.
fn listener_socket() -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, SSDP_PORT).into())?;
    socket.join_multicast_v4(&SSDP_MULTICAST, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

/// Ephemeral socket for outgoing notifications.
fn notify_socket() -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_multicast_ttl_v4(2)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            device_id: "1234ABCD".to_string(),
            device_auth: "1234ABCD".to_string(),
            friendly_name: "webtuner-proxy".to_string(),
            manufacturer: "Silicondust".to_string(),
            model: "HDTC-2US".to_string(),
            firmware_name: "hdhomerun3_atsc".to_string(),
            firmware_version: "20200101".to_string(),
            tuner_count: 2,
            base_url: "http://192.168.1.50:6095".to_string(),
        }
    }

    #[test]
    fn search_matching_requires_both_markers() {
        let query = format!(
            "M-SEARCH * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\n\
             MAN: \"ssdp:discover\"\r\nMX: 3\r\nST: {}\r\n\r\n",
            DEVICE_TYPE
        );
        assert!(is_search_for_us(query.as_bytes()));
        assert!(!is_search_for_us(b"M-SEARCH * HTTP/1.1\r\nST: ssdp:all\r\n\r\n"));
        assert!(!is_search_for_us(
            format!("NOTIFY * HTTP/1.1\r\nNT: {}\r\n\r\n", DEVICE_TYPE).as_bytes()
        ));
        assert!(!is_search_for_us(b"\x00\x01garbage"));
    }

    #[test]
    fn search_response_carries_location_and_usn() {
        let response = search_response(&identity());
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("LOCATION: http://192.168.1.50:6095/device.xml\r\n"));
        assert!(response.contains(&format!("USN: uuid:1234ABCD::{}\r\n", DEVICE_TYPE)));
        assert!(response.contains("CACHE-CONTROL: max-age=1800\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[test]
    fn alive_notify_is_a_notify_with_nts() {
        let notify = alive_notify(&identity());
        assert!(notify.starts_with("NOTIFY * HTTP/1.1\r\n"));
        assert!(notify.contains("HOST: 239.255.255.250:1900\r\n"));
        assert!(notify.contains("NTS: ssdp:alive\r\n"));
        assert!(notify.contains(&format!("NT: {}\r\n", DEVICE_TYPE)));
        assert!(notify.contains("LOCATION: http://192.168.1.50:6095/device.xml\r\n"));
    }

    #[tokio::test]
    async fn matching_query_gets_exactly_one_unicast_reply() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();
        let identity = identity();

        let query = format!("M-SEARCH * HTTP/1.1\r\nST: {}\r\n\r\n", DEVICE_TYPE);
        let replied =
            handle_datagram(&responder, &identity, query.as_bytes(), client_addr).await;
        assert!(replied);

        let mut buf = [0u8; 1024];
        let (len, from) = tokio::time::timeout(
            Duration::from_secs(1),
            client.recv_from(&mut buf),
        )
        .await
        .expect("reply within bounded time")
        .unwrap();
        assert_eq!(from, responder.local_addr().unwrap());
        let reply = std::str::from_utf8(&buf[..len]).unwrap();
        assert!(reply.contains("LOCATION: http://192.168.1.50:6095/device.xml"));

        // No second datagram follows.
        let second = tokio::time::timeout(
            Duration::from_millis(200),
            client.recv_from(&mut buf),
        )
        .await;
        assert!(second.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn broadcaster_announces_on_its_interval() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let task = tokio::spawn(broadcast_loop(
            sender,
            target,
            Arc::new(identity()),
            NOTIFY_INTERVAL,
        ));

        // Virtual 65 s window: announcements at 0 s, 30 s, and 60 s.
        tokio::time::sleep(Duration::from_secs(65)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        task.abort();

        let mut count = 0;
        let mut buf = [0u8; 2048];
        while let Ok((len, _)) = receiver.try_recv_from(&mut buf) {
            let notify = std::str::from_utf8(&buf[..len]).unwrap();
            assert!(notify.starts_with("NOTIFY * HTTP/1.1\r\n"));
            assert!(notify.contains("NTS: ssdp:alive\r\n"));
            count += 1;
        }
        assert!(
            (2..=3).contains(&count),
            "expected 2-3 announcements in 65s, got {}",
            count
        );
    }

    #[tokio::test]
    async fn non_matching_query_is_ignored() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();

        let replied =
            handle_datagram(&responder, &identity(), b"M-SEARCH * HTTP/1.1\r\n\r\n", client_addr)
                .await;
        assert!(!replied);
    }
}
