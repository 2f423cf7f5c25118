//! Blocking client for the authentication server's ticket-granting
//! service. One datagram out, one datagram back, per server, in the
//! caller's thread. Login is allowed to wait on the network; the socket
//! timeout is the only bound.

use crate::constants::*;
use crate::error::KafsError;
use crate::token::rx::{self, GetTicketReply, GetTicketRequest};
use rand::Rng;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::{debug, warn};

pub(crate) struct KaClient {
    timeout: Duration,
}

impl KaClient {
    pub(crate) fn new(timeout: Duration) -> Self {
        KaClient { timeout }
    }

    /// Try each server in order and return the first granted ticket.
    /// A refusal from one server does not stop the walk; the last failure
    /// is reported when every server has been tried.
    pub(crate) fn get_ticket(
        &self,
        servers: &[SocketAddr],
        request: &GetTicketRequest,
    ) -> Result<GetTicketReply, KafsError> {
        if servers.is_empty() {
            return Err(KafsError::ResolutionFailed);
        }
        if request.auth_domain.0.len() > KA_AUTH_DOMAIN_MAX {
            return Err(KafsError::RxBadPacket);
        }

        let epoch = crate::krb::now_epoch();
        let cid = rand::rng().random::<u32>() & !0b11;

        let mut last_err = KafsError::ResolutionFailed;
        for server in servers {
            match self.exchange(*server, epoch, cid, request) {
                Ok(reply) if reply.code == 0 => return Ok(reply),
                Ok(reply) => {
                    warn!(
                        code = reply.code,
                        server = %server,
                        "authentication server refused the ticket"
                    );
                    last_err = KafsError::KaFailure(reply.code);
                }
                Err(err) => {
                    debug!(server = %server, ?err, "ticket exchange failed");
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    fn exchange(
        &self,
        server: SocketAddr,
        epoch: u32,
        cid: u32,
        request: &GetTicketRequest,
    ) -> Result<GetTicketReply, KafsError> {
        let packet = rx::request_packet(epoch, cid, 1, request)?;

        let bind_addr: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_read_timeout(Some(self.timeout))?;
        // Connected socket, so stray datagrams from other hosts never
        // reach the parser.
        socket.connect(server)?;
        socket.send(&packet)?;

        let mut buf = [0u8; RX_MAX_PACKET];
        let n = socket.recv(&mut buf)?;
        rx::parse_reply(&buf[..n], cid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::rx::{RxHeader, XdrOpaque, XdrString};
    use binrw::BinRead;

    fn sample_request() -> GetTicketRequest {
        GetTicketRequest {
            kvno: 0,
            auth_domain: XdrString::from("EXAMPLE.ORG"),
            ticket: XdrOpaque(vec![0x6e; 93]),
            name: XdrString::from("afs"),
            instance: XdrString::from("example.org"),
            start: 1_700_000_000,
            end: 1_700_036_000,
        }
    }

    /// One-shot kaserver: reads a request, feeds it to the handler, sends
    /// whatever comes back.
    fn spawn_server(
        handler: impl FnOnce(RxHeader, GetTicketRequest) -> Vec<u8> + Send + 'static,
    ) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind fake server");
        let addr = socket.local_addr().expect("server addr");
        std::thread::spawn(move || {
            let mut buf = [0u8; 2048];
            let (n, peer) = socket.recv_from(&mut buf).expect("server recv");
            let mut c = std::io::Cursor::new(&buf[..n]);
            let header = RxHeader::read(&mut c).expect("parse request header");
            let request = GetTicketRequest::read(&mut c).expect("parse request body");
            let reply = handler(header, request);
            socket.send_to(&reply, peer).expect("server send");
        });
        addr
    }

    #[test]
    fn test_granted_ticket() {
        let addr = spawn_server(|header, request| {
            assert_eq!(request.name.0, "afs");
            assert_eq!(request.auth_domain.0, "EXAMPLE.ORG");
            rx::reply_packet(
                &header,
                &GetTicketReply {
                    code: 0,
                    kvno: 5,
                    ticket: XdrOpaque(vec![0x2a; 60]),
                    start: request.start,
                    end: request.end,
                },
            )
        });

        let client = KaClient::new(Duration::from_secs(2));
        let reply = client
            .get_ticket(&[addr], &sample_request())
            .expect("granted");
        assert_eq!(reply.kvno, 5);
        assert_eq!(reply.ticket.0.len(), 60);
        assert_eq!(reply.end, 1_700_036_000);
    }

    #[test]
    fn test_server_abort() {
        let addr = spawn_server(|header, _| rx::abort_packet(&header, 180_490));
        let client = KaClient::new(Duration::from_secs(2));
        assert!(matches!(
            client.get_ticket(&[addr], &sample_request()),
            Err(KafsError::RxAbort(180_490))
        ));
    }

    #[test]
    fn test_server_refusal() {
        let addr = spawn_server(|header, _| {
            rx::reply_packet(
                &header,
                &GetTicketReply {
                    code: 180_484,
                    kvno: 0,
                    ticket: XdrOpaque(Vec::new()),
                    start: 0,
                    end: 0,
                },
            )
        });
        let client = KaClient::new(Duration::from_secs(2));
        assert!(matches!(
            client.get_ticket(&[addr], &sample_request()),
            Err(KafsError::KaFailure(180_484))
        ));
    }

    #[test]
    fn test_dead_server_falls_through() {
        let live = spawn_server(|header, request| {
            rx::reply_packet(
                &header,
                &GetTicketReply {
                    code: 0,
                    kvno: 1,
                    ticket: XdrOpaque(vec![1, 2, 3, 4]),
                    start: request.start,
                    end: request.end,
                },
            )
        });
        // Nothing listens on the first address; the walk must reach the
        // second.
        let dead: SocketAddr = "127.0.0.1:1".parse().expect("addr");
        let client = KaClient::new(Duration::from_millis(400));
        let reply = client
            .get_ticket(&[dead, live], &sample_request())
            .expect("fallback server");
        assert_eq!(reply.kvno, 1);
    }

    #[test]
    fn test_no_servers() {
        let client = KaClient::new(Duration::from_secs(1));
        assert!(matches!(
            client.get_ticket(&[], &sample_request()),
            Err(KafsError::ResolutionFailed)
        ));
    }
}
