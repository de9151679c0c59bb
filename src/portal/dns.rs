//! Catch-all DNS responder.
//!
//! Answers every A query with the portal address so that a phone joining
//! the access point runs its captive-portal check against our HTTP server.
//! Other record types get an empty (NOERROR) answer.

use log::{debug, info, warn};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const HEADER_LEN: usize = 12;
const TYPE_A: u16 = 1;
const TYPE_ANY: u16 = 255;
const CLASS_IN: u16 = 1;
/// Short TTL so clients forget the portal answers once online.
const ANSWER_TTL: u32 = 60;
const MAX_PACKET: usize = 512;
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Build the answer for `query`, or `None` if it is not a standard query.
pub fn build_response(query: &[u8], addr: Ipv4Addr) -> Option<Vec<u8>> {
    if query.len() < HEADER_LEN {
        return None;
    }
    let flags = u16::from_be_bytes([query[2], query[3]]);
    let is_response = flags & 0x8000 != 0;
    let opcode = (flags >> 11) & 0x0F;
    let qdcount = u16::from_be_bytes([query[4], query[5]]);
    if is_response || opcode != 0 || qdcount == 0 {
        return None;
    }

    // First question only: labels up to the root, then type and class.
    let mut pos = HEADER_LEN;
    loop {
        let len = *query.get(pos)? as usize;
        if len == 0 {
            pos += 1;
            break;
        }
        // Compression pointers cannot appear in the first question.
        if len & 0xC0 != 0 {
            return None;
        }
        pos += 1 + len;
    }
    let question_end = pos + 4;
    let question = query.get(HEADER_LEN..question_end)?;
    let qtype = u16::from_be_bytes([query[pos], query[pos + 1]]);
    let qclass = u16::from_be_bytes([query[pos + 2], query[pos + 3]]);

    let answer = (qtype == TYPE_A || qtype == TYPE_ANY) && qclass == CLASS_IN;

    let mut out = Vec::with_capacity(question_end + 16);
    out.extend_from_slice(&query[0..2]);
    // QR and AA set, RD copied from the query, RCODE 0
    let reply_flags = 0x8000 | 0x0400 | (flags & 0x0100);
    out.extend_from_slice(&reply_flags.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&u16::from(answer).to_be_bytes());
    out.extend_from_slice(&[0, 0, 0, 0]);
    out.extend_from_slice(question);

    if answer {
        out.extend_from_slice(&[0xC0, 0x0C]);
        out.extend_from_slice(&TYPE_A.to_be_bytes());
        out.extend_from_slice(&CLASS_IN.to_be_bytes());
        out.extend_from_slice(&ANSWER_TTL.to_be_bytes());
        out.extend_from_slice(&4u16.to_be_bytes());
        out.extend_from_slice(&addr.octets());
    }

    Some(out)
}

/// UDP responder thread.
pub struct DnsResponder {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    local_addr: SocketAddr,
}

impl DnsResponder {
    /// Bind `bind_addr` and answer every query with `portal_ip`.
    pub fn start(bind_addr: SocketAddr, portal_ip: Ipv4Addr) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        let local_addr = socket.local_addr()?;
        info!("[Portal] DNS responder on {} -> {}", local_addr, portal_ip);

        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = {
            let shutdown = shutdown.clone();
            thread::spawn(move || Self::run(socket, portal_ip, &shutdown))
        };

        Ok(Self {
            handle: Some(handle),
            shutdown,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn run(socket: UdpSocket, portal_ip: Ipv4Addr, shutdown: &AtomicBool) {
        let mut buf = [0u8; MAX_PACKET];
        while !shutdown.load(Ordering::Acquire) {
            match socket.recv_from(&mut buf) {
                Ok((len, peer)) => match build_response(&buf[..len], portal_ip) {
                    Some(reply) => {
                        if let Err(e) = socket.send_to(&reply, peer) {
                            debug!("[Portal] DNS reply to {} failed: {}", peer, e);
                        }
                    }
                    None => debug!("[Portal] Ignored DNS packet from {}", peer),
                },
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => {
                    warn!("[Portal] DNS socket error: {}", e);
                    break;
                }
            }
        }
    }

    /// Stop the responder and wait for its thread.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DnsResponder {
    fn drop(&mut self) {
        self.stop();
    }
}


#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use terelina_esp32_macros::tap_test;

    #[tap_test]
    fn any_a_query_points_at_portal() {
        let mut q = vec![0x12, 0x34, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0];
        q.extend_from_slice(&[3, b'w', b'w', b'w', 0, 0, 1, 0, 1]);
        let r = build_response(&q, Ipv4Addr::new(192, 168, 71, 1)).unwrap();
        assert_eq!(&r[r.len() - 4..], &[192, 168, 71, 1]);
    }
}
