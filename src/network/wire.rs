//! Little-endian building blocks for request, reply and notification frames.
//!
//! ```text
//! +----------------------+--------+---------------+---------+
//! | length (u32 LE)      | opcode | status/unused | payload |
//! | whole frame, header  | 1 byte | 1 byte        |         |
//! | included             |        |               |         |
//! +----------------------+--------+---------------+---------+
//! ```
use crate::error::ProtocolError;
use crate::types::Rect;

pub const HEADER_LEN: usize = 6;

/// Splitting a frame off the front of the receive buffer.
#[derive(Debug, PartialEq)]
pub enum Split<'a> {
    /// Not a whole frame buffered yet.
    Incomplete,
    /// Header byte 4, header byte 5, payload; and the bytes consumed.
    Frame { opcode: u8, flag: u8, payload: &'a [u8], consumed: usize },
    /// The declared length cannot hold a header. Skip `consumed` bytes and carry on.
    Short { frame: &'a [u8], consumed: usize },
}

pub fn split_frame(buf: &[u8], limit: u32) -> Result<Split<'_>, ProtocolError> {
    let Some((len, _)) = u32(buf) else {
        return Ok(Split::Incomplete);
    };
    if len > limit {
        return Err(ProtocolError::Oversized { len, limit });
    }
    let len = len as usize;
    if len < HEADER_LEN {
        let consumed = len.max(4);
        return Ok(match buf.get(..consumed) {
            Some(frame) => Split::Short { frame, consumed },
            None => Split::Incomplete,
        });
    }
    Ok(match buf.get(..len) {
        Some(frame) => Split::Frame {
            opcode: frame[4],
            flag: frame[5],
            payload: &frame[HEADER_LEN..],
            consumed: len,
        },
        None => Split::Incomplete,
    })
}

/// Appends a frame to `out`, filling in the length once the payload is written.
pub fn frame(out: &mut Vec<u8>, opcode: u8, flag: u8, payload: impl FnOnce(&mut Vec<u8>)) {
    let start = out.len();
    out.extend_from_slice(&[0; 4]);
    out.push(opcode);
    out.push(flag);
    payload(out);
    let len = (out.len() - start) as u32;
    out[start..start + 4].copy_from_slice(&len.to_le_bytes());
}

pub trait Wire<'a>: Sized {
    fn decode(pkt: &'a [u8]) -> Option<(Self, &'a [u8])>;
}
pub trait ToWire {
    fn encode(&self, out: &mut Vec<u8>);
}

macro_rules! le {
    { $($i:ident)* } => {
        $(
            pub fn $i(buf: &[u8]) -> Option<($i, &[u8])> {
                let (n, rem) = (buf.len() >= core::mem::size_of::<$i>())
                    .then(|| buf.split_at(core::mem::size_of::<$i>()))?;
                Some(($i::from_le_bytes(n.try_into().ok()?), rem))
            }
            impl Wire<'_> for $i {
                fn decode(pkt: &[u8]) -> Option<(Self, &[u8])> {
                    $i(pkt)
                }
            }
            impl ToWire for $i {
                fn encode(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }
        )*
    }
}
le! { u8 i16 u32 f32 }

macro_rules! impl_wire {
    {} => {};
    {$t:ident $($rt:ident)*} => {
        #[allow(non_snake_case)]
        impl<'a, $t: Wire<'a>, $($rt: Wire<'a>),*> Wire<'a> for ($t, $($rt,)*) {
            fn decode(pkt: &'a [u8]) -> Option<(Self, &'a [u8])> {
                let ($t, pkt) = $t::decode(pkt)?;
                $(let ($rt, pkt) = $rt::decode(pkt)?;)*
                Some((($t, $($rt,)*), pkt))
            }
        }
        #[allow(non_snake_case)]
        impl<$t: ToWire, $($rt: ToWire),*> ToWire for ($t, $($rt,)*) {
            fn encode(&self, out: &mut Vec<u8>) {
                let ($t, $($rt,)*) = self;
                $t.encode(out);
                $($rt.encode(out);)*
            }
        }
        impl_wire!($($rt)*);
    }
}
impl_wire!(A B C D E F);

/// u32 length, then the bytes.
pub fn str(buf: &[u8]) -> Option<(&[u8], &[u8])> {
    let (len, rem) = u32(buf)?;
    let len = usize::try_from(len).ok()?;
    (len <= rem.len()).then(|| rem.split_at(len))
}
impl<'a> Wire<'a> for &'a [u8] {
    fn decode(pkt: &'a [u8]) -> Option<(Self, &'a [u8])> {
        str(pkt)
    }
}
impl Wire<'_> for String {
    fn decode(pkt: &[u8]) -> Option<(Self, &[u8])> {
        str(pkt).map(|(s, rem)| (String::from_utf8_lossy(s).into_owned(), rem))
    }
}
impl ToWire for str {
    fn encode(&self, out: &mut Vec<u8>) {
        (self.len() as u32).encode(out);
        out.extend_from_slice(self.as_bytes());
    }
}
impl ToWire for String {
    fn encode(&self, out: &mut Vec<u8>) {
        self.as_str().encode(out)
    }
}
impl<T: ToWire + ?Sized> ToWire for &T {
    fn encode(&self, out: &mut Vec<u8>) {
        (**self).encode(out)
    }
}

/// Four i16s: left, top, right, bottom.
impl Wire<'_> for Rect {
    fn decode(pkt: &[u8]) -> Option<(Self, &[u8])> {
        let ((left, top, right, bottom), rem) = <(i16, i16, i16, i16)>::decode(pkt)?;
        Some((Rect { left, top, right, bottom }, rem))
    }
}
impl ToWire for Rect {
    fn encode(&self, out: &mut Vec<u8>) {
        (self.left, self.top, self.right, self.bottom).encode(out)
    }
}
