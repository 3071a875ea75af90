// Packets as they move through the simulated network

use std::net::Ipv4Addr;

use crate::vn_interface::{
    FrameView, PacketUid, PayloadView, SeqNo, Spi, DEFAULT_TTL, IPV4_HEADER_SIZE,
    UDP_HEADER_SIZE, WRAPPER_HEADER_SIZE,
};

/// UDP-style datagram: ports plus opaque application payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: Vec<u8>,
}

/// Tunnel wrapper. Only `spi` and `seq` are readable without the inbound SA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncapsulatedPacket {
    pub spi: Spi,
    pub seq: SeqNo,
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketBody {
    Datagram(Datagram),
    Encapsulated(EncapsulatedPacket),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub uid: PacketUid,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub ttl: u8,
    pub body: PacketBody,
}

/// A packet on a link, addressed at layer 2 to `next_hop`
#[derive(Debug, Clone)]
pub struct Frame {
    pub next_hop: Ipv4Addr,
    pub packet: Packet,
}

const TAG_DATAGRAM: u8 = 0;
const TAG_WRAPPER: u8 = 1;
// tag + uid + src + dst + ttl
const INNER_HEADER_LEN: usize = 1 + 8 + 4 + 4 + 1;

impl Packet {
    pub fn datagram(
        uid: PacketUid,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            uid,
            src,
            dst,
            ttl: DEFAULT_TTL,
            body: PacketBody::Datagram(Datagram {
                src_port,
                dst_port,
                payload,
            }),
        }
    }

    pub fn wrapper(uid: PacketUid, src: Ipv4Addr, dst: Ipv4Addr, wrapper: EncapsulatedPacket) -> Self {
        Self {
            uid,
            src,
            dst,
            ttl: DEFAULT_TTL,
            body: PacketBody::Encapsulated(wrapper),
        }
    }

    /// On-wire size in bytes, used for serialization delay
    pub fn size(&self) -> usize {
        IPV4_HEADER_SIZE
            + match &self.body {
                PacketBody::Datagram(d) => UDP_HEADER_SIZE + d.payload.len(),
                PacketBody::Encapsulated(w) => WRAPPER_HEADER_SIZE + w.ciphertext.len(),
            }
    }

    pub fn as_wrapper(&self) -> Option<&EncapsulatedPacket> {
        match &self.body {
            PacketBody::Encapsulated(w) => Some(w),
            PacketBody::Datagram(_) => None,
        }
    }

    /// What a capture on the link would record
    pub fn view(&self) -> FrameView {
        FrameView {
            packet: self.uid,
            src: self.src,
            dst: self.dst,
            ttl: self.ttl,
            size: self.size(),
            content: match &self.body {
                PacketBody::Datagram(d) => PayloadView::Plain {
                    src_port: d.src_port,
                    dst_port: d.dst_port,
                    payload: d.payload.clone(),
                },
                PacketBody::Encapsulated(w) => PayloadView::Wrapped {
                    spi: w.spi,
                    seq: w.seq,
                    ciphertext: w.ciphertext.clone(),
                },
            },
        }
    }

    /// Serialise the whole packet (addresses included) for tunnel-mode protection
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(INNER_HEADER_LEN + self.size());
        let tag = match self.body {
            PacketBody::Datagram(_) => TAG_DATAGRAM,
            PacketBody::Encapsulated(_) => TAG_WRAPPER,
        };
        out.push(tag);
        out.extend_from_slice(&self.uid.to_be_bytes());
        out.extend_from_slice(&self.src.octets());
        out.extend_from_slice(&self.dst.octets());
        out.push(self.ttl);

        match &self.body {
            PacketBody::Datagram(d) => {
                out.extend_from_slice(&d.src_port.to_be_bytes());
                out.extend_from_slice(&d.dst_port.to_be_bytes());
                out.extend_from_slice(&(d.payload.len() as u32).to_be_bytes());
                out.extend_from_slice(&d.payload);
            }
            PacketBody::Encapsulated(w) => {
                out.extend_from_slice(&w.spi.to_be_bytes());
                out.extend_from_slice(&w.seq.to_be_bytes());
                out.extend_from_slice(&(w.ciphertext.len() as u32).to_be_bytes());
                out.extend_from_slice(&w.ciphertext);
            }
        }
        out
    }

    /// Inverse of `encode`. Returns None on truncated or trailing input.
    pub fn decode(bytes: &[u8]) -> Option<Packet> {
        let mut r = Reader { bytes, pos: 0 };
        let tag = r.u8()?;
        let uid = r.u64()?;
        let src = Ipv4Addr::from(r.u32()?);
        let dst = Ipv4Addr::from(r.u32()?);
        let ttl = r.u8()?;

        let body = match tag {
            TAG_DATAGRAM => {
                let src_port = r.u16()?;
                let dst_port = r.u16()?;
                let len = r.u32()? as usize;
                PacketBody::Datagram(Datagram {
                    src_port,
                    dst_port,
                    payload: r.take(len)?.to_vec(),
                })
            }
            TAG_WRAPPER => {
                let spi = r.u32()?;
                let seq = r.u64()?;
                let len = r.u32()? as usize;
                PacketBody::Encapsulated(EncapsulatedPacket {
                    spi,
                    seq,
                    ciphertext: r.take(len)?.to_vec(),
                })
            }
            _ => return None,
        };

        if r.pos != bytes.len() {
            return None;
        }
        Some(Packet {
            uid,
            src,
            dst,
            ttl,
            body,
        })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.bytes.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Option<u64> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Some(u64::from_be_bytes(a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Packet {
        Packet::datagram(
            42,
            Ipv4Addr::new(10, 1, 1, 1),
            Ipv4Addr::new(10, 1, 2, 1),
            49153,
            9,
            (0..=255u8).collect(),
        )
    }

    #[test]
    fn test_sizes_include_headers() {
        let p = sample();
        assert_eq!(p.size(), 20 + 8 + 256);

        let w = Packet::wrapper(
            1,
            Ipv4Addr::new(10, 1, 100, 1),
            Ipv4Addr::new(10, 1, 200, 2),
            EncapsulatedPacket {
                spi: 1,
                seq: 1,
                ciphertext: vec![0; 100],
            },
        );
        assert_eq!(w.size(), 20 + 12 + 100);
    }

    #[test]
    fn test_encode_preserves_addresses_and_ttl() {
        let mut p = sample();
        p.ttl = 7;
        let decoded = Packet::decode(&p.encode()).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn test_decode_rejects_truncated_and_trailing() {
        let bytes = sample().encode();
        assert!(Packet::decode(&bytes[..bytes.len() - 1]).is_none());

        let mut longer = bytes.clone();
        longer.push(0);
        assert!(Packet::decode(&longer).is_none());

        let mut bad_tag = bytes;
        bad_tag[0] = 9;
        assert!(Packet::decode(&bad_tag).is_none());

        assert!(Packet::decode(&[]).is_none());
    }

    #[test]
    fn test_view_of_wrapper_hides_payload() {
        let w = Packet::wrapper(
            3,
            Ipv4Addr::new(10, 1, 100, 1),
            Ipv4Addr::new(10, 1, 200, 2),
            EncapsulatedPacket {
                spi: 0x101,
                seq: 5,
                ciphertext: vec![1, 2, 3],
            },
        );
        let view = w.view();
        assert!(view.is_wrapped());
        assert_eq!(view.body_bytes(), &[1, 2, 3]);
        assert!(matches!(
            view.content,
            PayloadView::Wrapped { spi: 0x101, seq: 5, .. }
        ));
    }
}
