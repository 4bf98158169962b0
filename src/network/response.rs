use super::request::Opcode;
use super::wire::{self, ToWire, Wire};
use crate::types::{Lock, Rect};

pub const OK: u8 = 0;
pub const FAILED: u8 = 1;

/// Payload of the unsolicited `l`/`u` frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub rect: Rect,
    pub host: String,
    pub owner: String,
    pub description: String,
    pub time: f64,
}
impl Notification {
    fn encode(&self, out: &mut Vec<u8>) {
        (self.rect, &self.host, &self.owner, &self.description, self.time as f32).encode(out)
    }
    pub fn decode(pkt: &[u8]) -> Option<Self> {
        let ((rect, host, owner, description, time), _) =
            <(Rect, String, String, String, f32)>::decode(pkt)?;
        Some(Self { rect, host, owner, description, time: time as f64 })
    }
}

/// One workstation's share of a status reply.
#[derive(Debug, Clone, PartialEq)]
pub struct HostLocks {
    pub host: String,
    pub locks: Vec<Lock>,
}
impl HostLocks {
    /// `u32 record length`, host, `u32 count`, then rect/owner/description/time per lock.
    fn encode(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.extend_from_slice(&[0; 4]);
        (&self.host, self.locks.len() as u32).encode(out);
        for lock in &self.locks {
            (lock.rect, &lock.owner, &lock.description, lock.time as f32).encode(out);
        }
        let len = (out.len() - start - 4) as u32;
        out[start..start + 4].copy_from_slice(&len.to_le_bytes());
    }
    pub fn decode_all(mut pkt: &[u8]) -> Option<Vec<Self>> {
        let mut hosts = vec![];
        while !pkt.is_empty() {
            let (record, rem) = wire::str(pkt)?;
            pkt = rem;
            let ((host, count), mut record) = <(String, u32)>::decode(record)?;
            let mut locks = vec![];
            for _ in 0..count {
                let ((rect, owner, description, time), rem) =
                    <(Rect, String, String, f32)>::decode(record)?;
                record = rem;
                locks.push(Lock { rect, owner, description, time: time as f64 });
            }
            hosts.push(HostLocks { host, locks });
        }
        Some(hosts)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Status byte plus human-readable text, answering `opcode`.
    Reply { opcode: Opcode, ok: bool, text: String },
    Status(Vec<HostLocks>),
    Locked(Notification),
    Unlocked(Notification),
}
impl Response {
    pub fn ok(opcode: Opcode, text: impl Into<String>) -> Self {
        Response::Reply { opcode, ok: true, text: text.into() }
    }
    pub fn failed(opcode: Opcode, text: impl Into<String>) -> Self {
        Response::Reply { opcode, ok: false, text: text.into() }
    }
    pub fn opcode(&self) -> Opcode {
        match self {
            Response::Reply { opcode, .. } => *opcode,
            Response::Status(_) => Opcode::GetStatus,
            Response::Locked(_) => Opcode::Locked,
            Response::Unlocked(_) => Opcode::Unlocked,
        }
    }
    pub fn write(&self, out: &mut Vec<u8>) {
        let flag = match self {
            Response::Reply { ok: false, .. } => FAILED,
            _ => OK,
        };
        wire::frame(out, self.opcode().byte(), flag, |out| match self {
            Response::Reply { text, .. } => out.extend_from_slice(text.as_bytes()),
            Response::Status(hosts) => hosts.iter().for_each(|h| h.encode(out)),
            Response::Locked(n) | Response::Unlocked(n) => n.encode(out),
        })
    }
}
