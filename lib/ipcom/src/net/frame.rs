use crate::error::{Error, NetResult};

/// Leading byte of every framed message.
pub const FRAME_START: u8 = 0x23;
/// Header bytes ahead of the data: start, to, from, length.
pub const HEADER_SIZE: usize = 4;
/// The length field is `data.len() + 1` and must fit in a byte.
pub const MAX_DATA_SIZE: usize = 254;

/// Command ids carried as the first decrypted data byte of a framed reply.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ReplyKind {
    Connect = 1,
    Disconnect = 2,
    KeepAlive = 3,
    FrameReply = 4,
    Outputs = 5,
    KeyboardStatus = 6,
    NonSecureConnect = 14,
    TriCom = 35,
}

impl ReplyKind {
    #[inline]
    pub fn classify(id: u8) -> Option<ReplyKind> {
        match id {
            1 => Some(ReplyKind::Connect),
            2 => Some(ReplyKind::Disconnect),
            3 => Some(ReplyKind::KeepAlive),
            4 => Some(ReplyKind::FrameReply),
            5 => Some(ReplyKind::Outputs),
            6 => Some(ReplyKind::KeyboardStatus),
            14 => Some(ReplyKind::NonSecureConnect),
            35 => Some(ReplyKind::TriCom),
            _ => None,
        }
    }
}

/// A framed message: `0x23 | to | from | length | data | checksum`.
///
/// `data` is whatever sits between the header and the checksum byte:
/// ciphertext on the wire, plaintext after decoding. The checksum is the
/// XOR of the data bytes exactly as they travel, so it is computed and
/// verified over ciphertext.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame {
    pub to: u8,
    pub from: u8,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(to: u8, from: u8, data: Vec<u8>) -> NetResult<Frame> {
        if data.is_empty() || data.len() > MAX_DATA_SIZE {
            return Err(Error::OutOfRange {
                what: "frame data size",
                value: data.len() as i64,
            });
        }

        Ok(Frame { to, from, data })
    }

    /// XOR of all data bytes.
    #[inline]
    pub fn checksum(data: &[u8]) -> u8 {
        data.iter().fold(0, |acc, &byte| acc ^ byte)
    }

    /// First data byte, which names the command.
    #[inline]
    pub fn command(&self) -> u8 {
        self.data[0]
    }

    #[inline]
    pub fn kind(&self) -> Option<ReplyKind> {
        ReplyKind::classify(self.command())
    }

    /// Total size on the wire, header and checksum included.
    #[inline]
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.data.len() + 1
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_size());
        out.push(FRAME_START);
        out.push(self.to);
        out.push(self.from);
        out.push((self.data.len() + 1) as u8);
        out.extend_from_slice(&self.data);
        out.push(Self::checksum(&self.data));
        out
    }

    /// Parses one complete frame. `bytes` must span exactly the frame as
    /// sized by its length field; the checksum is verified against the
    /// data as given.
    pub fn read(bytes: &[u8]) -> NetResult<Frame> {
        if bytes.len() < HEADER_SIZE + 1 {
            return Err(Error::Truncated);
        }
        if bytes[0] != FRAME_START {
            return Err(Error::Garbage(bytes.len()));
        }

        let to = bytes[1];
        let from = bytes[2];
        let length = bytes[3] as usize;

        if length == 0 {
            return Err(Error::Garbage(bytes.len()));
        }

        let data_size = length - 1;
        if bytes.len() != HEADER_SIZE + data_size + 1 {
            return Err(Error::Truncated);
        }

        let data = bytes[HEADER_SIZE..HEADER_SIZE + data_size].to_vec();
        let checksum = bytes[HEADER_SIZE + data_size];

        if Self::checksum(&data) != checksum {
            return Err(Error::BadChecksum { to, from });
        }

        Frame::new(to, from, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_parse_roundtrip() {
        let frame = Frame::new(62, 0, vec![0x01, 10, 20, 30, 40, 50, 60, 70, 80]).unwrap();
        let bytes = frame.to_bytes();

        assert_eq!(bytes[0], FRAME_START);
        assert_eq!(bytes[1], 62);
        assert_eq!(bytes[2], 0);
        assert_eq!(bytes[3], 10);
        assert_eq!(bytes.len(), frame.wire_size());

        let parsed = Frame::read(&bytes).unwrap();
        assert_eq!(parsed, frame);
        assert_eq!(parsed.command(), 0x01);
    }

    #[test]
    fn test_roundtrip_arbitrary_sizes() {
        for size in &[1usize, 2, 17, 100, MAX_DATA_SIZE] {
            let data: Vec<u8> = (0..*size).map(|i| i as u8).collect();
            let frame = Frame::new(1, 2, data).unwrap();
            let parsed = Frame::read(&frame.to_bytes()).unwrap();
            assert_eq!(parsed, frame);
        }
    }

    #[test]
    fn test_roundtrip_random_data() {
        let data: Vec<u8> = (0..200).map(|_| rand::random::<u8>()).collect();
        let frame = Frame::new(77, 3, data).unwrap();
        assert_eq!(Frame::read(&frame.to_bytes()).unwrap(), frame);
    }

    #[test]
    fn test_rejects_oversized_and_empty_data() {
        assert!(Frame::new(1, 0, vec![0; MAX_DATA_SIZE + 1]).is_err());
        assert!(Frame::new(1, 0, vec![]).is_err());
    }

    #[test]
    fn test_read_rejects_bad_checksum() {
        let frame = Frame::new(1, 0, vec![3, 4, 5]).unwrap();
        let mut bytes = frame.to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        match Frame::read(&bytes) {
            Err(Error::BadChecksum { to: 1, from: 0 }) => {}
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_read_rejects_bad_start() {
        let frame = Frame::new(1, 0, vec![3]).unwrap();
        let mut bytes = frame.to_bytes();
        bytes[0] = 0x24;

        match Frame::read(&bytes) {
            Err(Error::Garbage(_)) => {}
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_read_rejects_size_mismatch() {
        let frame = Frame::new(1, 0, vec![3, 4]).unwrap();
        let bytes = frame.to_bytes();

        match Frame::read(&bytes[..bytes.len() - 1]) {
            Err(Error::Truncated) => {}
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_checksum_is_xor() {
        assert_eq!(Frame::checksum(&[]), 0);
        assert_eq!(Frame::checksum(&[0xFF]), 0xFF);
        assert_eq!(Frame::checksum(&[0x0F, 0xF0]), 0xFF);
        assert_eq!(Frame::checksum(&[1, 2, 3]), 0);
    }

    #[test]
    fn test_reply_kind_table() {
        assert_eq!(ReplyKind::classify(3), Some(ReplyKind::KeepAlive));
        assert_eq!(ReplyKind::classify(5), Some(ReplyKind::Outputs));
        assert_eq!(ReplyKind::classify(14), Some(ReplyKind::NonSecureConnect));
        assert_eq!(ReplyKind::classify(35), Some(ReplyKind::TriCom));
        assert_eq!(ReplyKind::classify(99), None);
    }
}
