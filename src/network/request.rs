use super::wire::{self, Wire};
use crate::error::ProtocolError;
use crate::types::Rect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Connect = b'C',
    Authenticate = b'A',
    SetSpace = b'S',
    Lock = b'L',
    Unlock = b'U',
    GetStatus = b'G',
    Locked = b'l',
    Unlocked = b'u',
}
impl Opcode {
    pub fn byte(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Authenticate(String),
    SetSpace(String),
    Lock { rect: Rect, description: String },
    Unlock { rect: Rect, description: String },
    GetStatus,
}

type Decoder = fn(&[u8]) -> Result<Request, ProtocolError>;

/// Request opcodes the daemon serves. Anything else is [`ProtocolError::UnknownOpcode`].
const DECODERS: [(Opcode, Decoder); 5] = [
    (Opcode::Authenticate, authenticate),
    (Opcode::SetSpace, set_space),
    (Opcode::Lock, lock),
    (Opcode::Unlock, unlock),
    (Opcode::GetStatus, get_status),
];

fn authenticate(pkt: &[u8]) -> Result<Request, ProtocolError> {
    Ok(Request::Authenticate(text(pkt)))
}
fn set_space(pkt: &[u8]) -> Result<Request, ProtocolError> {
    Ok(Request::SetSpace(text(pkt)))
}
fn lock(pkt: &[u8]) -> Result<Request, ProtocolError> {
    let (rect, description) = rect_and_text(Opcode::Lock, pkt)?;
    Ok(Request::Lock { rect, description })
}
fn unlock(pkt: &[u8]) -> Result<Request, ProtocolError> {
    let (rect, description) = rect_and_text(Opcode::Unlock, pkt)?;
    Ok(Request::Unlock { rect, description })
}
fn get_status(_: &[u8]) -> Result<Request, ProtocolError> {
    Ok(Request::GetStatus)
}

fn text(pkt: &[u8]) -> String {
    String::from_utf8_lossy(pkt).into_owned()
}
/// Four i16s, then the description running to the end of the frame.
fn rect_and_text(opcode: Opcode, pkt: &[u8]) -> Result<(Rect, String), ProtocolError> {
    let (rect, rest) = Rect::decode(pkt).ok_or(ProtocolError::ShortPayload {
        opcode: opcode.byte() as char,
        needed: 8,
        got: pkt.len(),
    })?;
    Ok((rect, text(rest)))
}

impl Request {
    pub fn decode(opcode: u8, payload: &[u8]) -> Result<Self, ProtocolError> {
        let (_, decode) = DECODERS
            .iter()
            .find(|(op, _)| op.byte() == opcode)
            .ok_or(ProtocolError::UnknownOpcode(opcode))?;
        decode(payload)
    }
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::Authenticate(_) => Opcode::Authenticate,
            Request::SetSpace(_) => Opcode::SetSpace,
            Request::Lock { .. } => Opcode::Lock,
            Request::Unlock { .. } => Opcode::Unlock,
            Request::GetStatus => Opcode::GetStatus,
        }
    }
    /// Client side of the codec: appends this request as a frame.
    pub fn encode(&self, out: &mut Vec<u8>) {
        wire::frame(out, self.opcode().byte(), 0, |out| match self {
            Request::Authenticate(s) | Request::SetSpace(s) => out.extend_from_slice(s.as_bytes()),
            Request::Lock { rect, description } | Request::Unlock { rect, description } => {
                wire::ToWire::encode(rect, out);
                out.extend_from_slice(description.as_bytes());
            }
            Request::GetStatus => {}
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(request: Request) {
        let mut buf = vec![];
        request.encode(&mut buf);
        match wire::split_frame(&buf, 1024).unwrap() {
            wire::Split::Frame { opcode, payload, consumed, .. } => {
                assert_eq!(consumed, buf.len());
                assert_eq!(Request::decode(opcode, payload), Ok(request));
            }
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[test]
    fn every_request_kind_decodes() {
        roundtrip(Request::Authenticate("alice".into()));
        roundtrip(Request::SetSpace("spaces/town/MAIN".into()));
        roundtrip(Request::Lock { rect: Rect::new(1, 2, 3, 4), description: "fence".into() });
        roundtrip(Request::Unlock { rect: Rect::new(-1, -1, 0, 0), description: String::new() });
        roundtrip(Request::GetStatus);
    }

    #[test]
    fn lock_payload_layout() {
        let payload = [1, 0, 2, 0, 3, 0, 4, 0, b'f', b'e', b'n', b'c', b'e'];
        assert_eq!(
            Request::decode(b'L', &payload),
            Ok(Request::Lock { rect: Rect::new(1, 2, 3, 4), description: "fence".into() })
        );
    }

    #[test]
    fn short_rect_payload() {
        assert_eq!(
            Request::decode(b'U', &[1, 0, 2, 0, 3]),
            Err(ProtocolError::ShortPayload { opcode: 'U', needed: 8, got: 5 })
        );
    }

    #[test]
    fn admin_and_reply_opcodes_are_not_requests() {
        for op in [b'C', b'D', b'P', b'l', b'u', 0] {
            assert_eq!(Request::decode(op, b"x"), Err(ProtocolError::UnknownOpcode(op)));
        }
    }
}
