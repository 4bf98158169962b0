use super::request::Request;
use super::response::Response;
use super::wire::{self, Split};
use super::Disconnection;
use crate::error::ProtocolError;
use crate::prelude::*;
use std::io::{Read, Write};

#[derive(Debug)]
pub enum Incoming {
    Request(Request),
    Malformed { error: ProtocolError, frame: Vec<u8> },
}

/// Everything one readable event produced. Frames read before a hangup are still delivered.
#[derive(Debug, Default)]
pub struct Received {
    pub incoming: Vec<Incoming>,
    pub hangup: Option<Disconnection>,
}

pub struct Client {
    conn: TcpStream,
    identity: String,
    received: Vec<u8>,
    outgoing: Vec<u8>,
    sent: usize,
    max_pending: usize,
    /// Set once the peer fell too far behind. Nothing more is queued and the next flush fails.
    stalled: bool,

    pub(super) waiting_for_write: bool,
    /// Poller interest is one-shot: false once an event fired and until it is re-armed.
    pub(super) armed: bool,
}
impl Client {
    pub fn accept(conn: TcpStream, identity: String, max_pending: usize) -> io::Result<Self> {
        conn.set_nonblocking(true)?;
        conn.set_nodelay(true)?;
        Ok(Self {
            conn,
            identity,
            received: vec![],
            outgoing: vec![],
            sent: 0,
            max_pending,
            stalled: false,
            waiting_for_write: false,
            armed: false,
        })
    }
    pub(super) fn conn(&self) -> &TcpStream {
        &self.conn
    }
    pub fn identity(&self) -> &str {
        &self.identity
    }
    pub fn pending(&self) -> usize {
        self.outgoing.len() - self.sent
    }
    /// Queues a frame. A peer whose backlog goes past `max_pending` is marked stalled.
    pub fn submit(&mut self, response: &Response) {
        if self.stalled {
            return;
        }
        response.write(&mut self.outgoing);
        self.waiting_for_write = true;
        if self.pending() > self.max_pending {
            log::warn!("{} stopped reading, {} bytes queued", self.identity, self.pending());
            self.stalled = true;
            self.outgoing = vec![];
            self.sent = 0;
        }
    }

    /// Writes queued frames until done or the socket would block.
    pub(super) fn flush(&mut self) -> Result<(), Disconnection> {
        if self.stalled {
            return Err(Disconnection::Transport(io::Error::new(
                io::ErrorKind::Other,
                format!("more than {} bytes left unread", self.max_pending),
            )));
        }
        while self.sent < self.outgoing.len() {
            match self.conn.write(&self.outgoing[self.sent..]) {
                Ok(0) => return Err(Disconnection::Closed),
                Ok(n) => self.sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Disconnection::Transport(e)),
            }
        }
        self.outgoing.clear();
        self.sent = 0;
        self.waiting_for_write = false;
        Ok(())
    }

    /// Drains the socket and splits off every complete frame.
    pub(super) fn read(&mut self, scratch: &mut [u8], max_frame_len: u32) -> Received {
        let mut hangup = None;
        loop {
            match self.conn.read(scratch) {
                Ok(0) => {
                    hangup = Some(Disconnection::Closed);
                    break;
                }
                Ok(n) => self.received.extend_from_slice(&scratch[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    hangup = Some(Disconnection::Transport(e));
                    break;
                }
            }
        }

        let mut incoming = vec![];
        let mut cursor = 0;
        loop {
            match wire::split_frame(&self.received[cursor..], max_frame_len) {
                Ok(Split::Incomplete) => break,
                Ok(Split::Frame { opcode, payload, consumed, .. }) => {
                    incoming.push(match Request::decode(opcode, payload) {
                        Ok(request) => Incoming::Request(request),
                        Err(error) => Incoming::Malformed {
                            error,
                            frame: self.received[cursor..cursor + consumed].to_vec(),
                        },
                    });
                    cursor += consumed;
                }
                Ok(Split::Short { frame, consumed }) => {
                    incoming.push(Incoming::Malformed {
                        error: ProtocolError::ShortFrame(frame.len()),
                        frame: frame.to_vec(),
                    });
                    cursor += consumed;
                }
                Err(error) => {
                    // the stream cannot be resynchronised past a bogus length
                    hangup = Some(Disconnection::Protocol(error));
                    break;
                }
            }
        }
        self.received.drain(..cursor);
        Received { incoming, hangup }
    }
}
impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut fields = f.debug_struct("Client");
        if let Ok(addr) = self.conn.peer_addr() {
            fields.field("conn", &addr);
        }
        fields.field("identity", &self.identity);
        fields.field("pending", &self.pending());
        fields.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::request::Opcode;
    use std::net::TcpListener;

    fn pair(max_pending: usize) -> (Client, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let peer = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (conn, _) = listener.accept().unwrap();
        (Client::accept(conn, "ws1".into(), max_pending).unwrap(), peer)
    }

    #[test]
    fn flush_delivers_queued_frames() {
        let (mut client, mut peer) = pair(1024);
        client.submit(&Response::ok(Opcode::Authenticate, "login succeeded"));
        assert!(client.waiting_for_write);
        client.flush().unwrap();
        assert!(!client.waiting_for_write);
        assert_eq!(client.pending(), 0);

        let mut frame = [0; 6 + 15];
        peer.read_exact(&mut frame).unwrap();
        assert_eq!(&frame[..6], &[21, 0, 0, 0, b'A', 0]);
        assert_eq!(&frame[6..], b"login succeeded");
    }

    #[test]
    fn backlog_past_the_limit_fails_the_flush() {
        let (mut client, _peer) = pair(64);
        client.submit(&Response::ok(Opcode::SetSpace, "set space to town"));
        assert!(!client.stalled);
        for _ in 0..4 {
            client.submit(&Response::ok(Opcode::SetSpace, "set space to town"));
        }
        assert!(client.stalled);
        assert_eq!(client.pending(), 0);
        client.submit(&Response::ok(Opcode::SetSpace, "set space to town"));
        assert_eq!(client.pending(), 0);
        assert!(matches!(client.flush(), Err(Disconnection::Transport(_))));
    }
}
