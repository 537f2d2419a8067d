use crate::net::buffer::Buffer;
use crate::net::command::{SNAPSHOT_MARKER, SNAPSHOT_WIRE_LEN};
use crate::net::frame::{Frame, FRAME_START, HEADER_SIZE};
use crate::snapshot::Snapshot;
use chrono::Utc;
use homelink::crypto::Cipher;
use homelink::logging;

/// A decoded inbound message.
#[derive(Debug)]
pub enum Inbound {
    Snapshot(Snapshot),
    Reply(Frame),
}

/// What the scan decided to do with the current window.
enum Scan {
    /// Not enough bytes for any decision; block for more input.
    Wait,
    /// Consume a complete 130-byte snapshot.
    Snapshot,
    /// Consume a complete frame of this total size.
    Frame(usize),
    /// Discard this many garbage bytes ahead of the next start byte.
    Skip(usize),
    /// Nothing recognizable anywhere in the window; drop it all.
    Drop(usize),
}

/// Incremental demultiplexer for the two intermixed inbound shapes: raw
/// encrypted state snapshots and `0x23`-framed replies. Bytes are appended
/// as they arrive; complete messages are pulled out one at a time.
pub struct StreamParser {
    buffer: Buffer,
    log: logging::Logger,
}

impl StreamParser {
    pub fn new(log: &logging::Logger) -> StreamParser {
        StreamParser {
            buffer: Buffer::new(),
            log: log.new(logging::o!("component" => "parser")),
        }
    }

    #[inline]
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend(bytes);
    }

    #[inline]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pulls the next complete message out of the window. Returns `None`
    /// once the window holds no complete message; partial messages are
    /// never dropped, garbage ahead of a recognizable marker is.
    pub fn next(&mut self, cipher: &Cipher) -> Option<Inbound> {
        loop {
            match self.scan() {
                Scan::Wait => return None,
                Scan::Snapshot => {
                    let raw = self.buffer.read_slice()[..SNAPSHOT_WIRE_LEN].to_vec();
                    self.buffer.consume(SNAPSHOT_WIRE_LEN);

                    let plain = cipher.decrypt(&raw);
                    match Snapshot::decode(&plain, Utc::now()) {
                        Ok(snapshot) => return Some(Inbound::Snapshot(snapshot)),
                        Err(err) => {
                            logging::warn!(self.log, "discarding undecodable state message";
                                           "error" => %err);
                        }
                    }
                }
                Scan::Frame(total) => {
                    let raw = self.buffer.read_slice()[..total].to_vec();
                    self.buffer.consume(total);

                    match Frame::read(&raw) {
                        Ok(frame) => {
                            // Checksum verified over the ciphertext; only
                            // now does the data get decrypted.
                            let plain = cipher.decrypt(&frame.data);
                            return Some(Inbound::Reply(Frame {
                                to: frame.to,
                                from: frame.from,
                                data: plain,
                            }));
                        }
                        Err(err) => {
                            logging::warn!(self.log, "dropping frame"; "error" => %err);
                        }
                    }
                }
                Scan::Skip(count) => {
                    logging::warn!(self.log, "discarding garbage ahead of frame"; "bytes" => count);
                    self.buffer.consume(count);
                }
                Scan::Drop(count) => {
                    logging::warn!(self.log, "no recognizable marker in buffer, discarding";
                                   "bytes" => count);
                    self.buffer.clear();
                    return None;
                }
            }
        }
    }

    fn scan(&self) -> Scan {
        let window = self.buffer.read_slice();
        let available = window.len();

        if available == 0 {
            return Scan::Wait;
        }

        // A window opening with the snapshot marker is a snapshot and
        // nothing else; short of 130 bytes it must block for more input,
        // never be rescanned as a frame.
        if window[0] == SNAPSHOT_MARKER[0] {
            if available == 1 {
                return Scan::Wait;
            }
            if window[1] == SNAPSHOT_MARKER[1] {
                if available < SNAPSHOT_WIRE_LEN {
                    return Scan::Wait;
                }
                return Scan::Snapshot;
            }
        }

        match window.iter().position(|&byte| byte == FRAME_START) {
            None => Scan::Drop(available),
            Some(0) => {
                if available < HEADER_SIZE {
                    return Scan::Wait;
                }

                let length = window[3] as usize;
                if length == 0 {
                    // Degenerate header; drop the start byte and rescan.
                    return Scan::Skip(1);
                }

                let total = HEADER_SIZE + (length - 1) + 1;
                if available < total {
                    return Scan::Wait;
                }

                Scan::Frame(total)
            }
            Some(skip) => Scan::Skip(skip),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::command;
    use crate::snapshot::SNAPSHOT_LEN;
    use homelink::crypto::PUBLIC_KEY_SIZE;

    /// Session cipher whose encryption of `05 01` is the `79 DB` marker,
    /// matching the live gateway.
    fn session_cipher() -> Cipher {
        let mut key = [0u8; PUBLIC_KEY_SIZE];
        key[0] = 0x2F;
        key[120] = 0x06;

        let mut cipher = Cipher::new();
        cipher.install_public_key(key);
        cipher
    }

    fn snapshot_wire(cipher: &Cipher, matrix: &[(usize, u8)]) -> Vec<u8> {
        let mut plain = vec![0u8; SNAPSHOT_LEN];
        plain[0] = 0x05;
        plain[1] = 0x01;
        for &(offset, value) in matrix {
            plain[2 + offset] = value;
        }

        let wire = cipher.encrypt(&plain);
        assert_eq!(&wire[..2], &SNAPSHOT_MARKER);
        wire
    }

    fn keepalive_wire(cipher: &Cipher) -> Vec<u8> {
        command::keep_alive(cipher).unwrap()
    }

    fn drain(parser: &mut StreamParser, cipher: &Cipher) -> Vec<Inbound> {
        let mut out = Vec::new();
        while let Some(inbound) = parser.next(cipher) {
            out.push(inbound);
        }
        out
    }

    #[test]
    fn test_snapshot_in_one_chunk() {
        let cipher = session_cipher();
        let mut parser = StreamParser::new(&logging::null());

        parser.extend(&snapshot_wire(&cipher, &[(28, 0xFF)]));
        let inbound = drain(&mut parser, &cipher);

        assert_eq!(inbound.len(), 1);
        match &inbound[0] {
            Inbound::Snapshot(snapshot) => assert_eq!(snapshot.get(4, 5).unwrap(), 255),
            other => panic!("Unexpected inbound {:?}", other),
        }
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_snapshot_byte_at_a_time() {
        let cipher = session_cipher();
        let mut parser = StreamParser::new(&logging::null());
        let wire = snapshot_wire(&cipher, &[]);

        for (i, byte) in wire.iter().enumerate() {
            parser.extend(&[*byte]);
            let inbound = drain(&mut parser, &cipher);

            if i < wire.len() - 1 {
                assert!(inbound.is_empty(), "early emission at byte {}", i);
            } else {
                assert_eq!(inbound.len(), 1);
            }
        }
    }

    #[test]
    fn test_partial_snapshot_blocks() {
        let cipher = session_cipher();
        let mut parser = StreamParser::new(&logging::null());
        let wire = snapshot_wire(&cipher, &[]);

        // 129 bytes: one short of a snapshot, nothing may come out even
        // though the tail contains what look like random markers.
        parser.extend(&wire[..129]);
        assert!(parser.next(&cipher).is_none());
        assert_eq!(parser.buffered(), 129);

        parser.extend(&wire[129..]);
        assert_eq!(drain(&mut parser, &cipher).len(), 1);
    }

    #[test]
    fn test_snapshot_plus_leftover() {
        let cipher = session_cipher();
        let mut parser = StreamParser::new(&logging::null());
        let mut bytes = snapshot_wire(&cipher, &[]);
        bytes.push(SNAPSHOT_MARKER[0]);

        parser.extend(&bytes);
        assert_eq!(drain(&mut parser, &cipher).len(), 1);

        // The trailing marker byte stays buffered as a possible snapshot
        // start.
        assert_eq!(parser.buffered(), 1);
    }

    #[test]
    fn test_two_snapshots_back_to_back() {
        let cipher = session_cipher();
        let mut parser = StreamParser::new(&logging::null());

        let mut bytes = snapshot_wire(&cipher, &[(0, 1)]);
        bytes.extend(snapshot_wire(&cipher, &[(0, 2)]));
        assert_eq!(bytes.len(), 260);

        parser.extend(&bytes);
        let inbound = drain(&mut parser, &cipher);

        assert_eq!(inbound.len(), 2);
        match (&inbound[0], &inbound[1]) {
            (Inbound::Snapshot(first), Inbound::Snapshot(second)) => {
                assert_eq!(first.get(1, 1).unwrap(), 1);
                assert_eq!(second.get(1, 1).unwrap(), 2);
            }
            other => panic!("Unexpected inbound {:?}", other),
        }
    }

    #[test]
    fn test_framed_reply_decrypted() {
        let cipher = session_cipher();
        let mut parser = StreamParser::new(&logging::null());

        parser.extend(&keepalive_wire(&cipher));
        let inbound = drain(&mut parser, &cipher);

        assert_eq!(inbound.len(), 1);
        match &inbound[0] {
            Inbound::Reply(frame) => {
                assert_eq!(frame.command(), 0x03);
                assert_eq!(frame.to, 0x01);
            }
            other => panic!("Unexpected inbound {:?}", other),
        }
    }

    #[test]
    fn test_garbage_before_frame_is_skipped() {
        let cipher = session_cipher();
        let mut parser = StreamParser::new(&logging::null());

        let mut bytes = vec![0x00, 0x11, 0x42];
        bytes.extend(keepalive_wire(&cipher));

        parser.extend(&bytes);
        let inbound = drain(&mut parser, &cipher);

        assert_eq!(inbound.len(), 1);
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_pure_garbage_is_dropped() {
        let cipher = session_cipher();
        let mut parser = StreamParser::new(&logging::null());

        parser.extend(&[0x00, 0x11, 0x22, 0x33]);
        assert!(parser.next(&cipher).is_none());
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_bad_checksum_frame_dropped_stream_recovers() {
        let cipher = session_cipher();
        let mut parser = StreamParser::new(&logging::null());

        let mut corrupted = keepalive_wire(&cipher);
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;

        let mut bytes = corrupted;
        bytes.extend(snapshot_wire(&cipher, &[]));

        parser.extend(&bytes);
        let inbound = drain(&mut parser, &cipher);

        // The corrupted frame vanishes silently; the snapshot behind it
        // still comes out.
        assert_eq!(inbound.len(), 1);
        match &inbound[0] {
            Inbound::Snapshot(_) => {}
            other => panic!("Unexpected inbound {:?}", other),
        }
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let cipher = session_cipher();
        let mut parser = StreamParser::new(&logging::null());
        let wire = keepalive_wire(&cipher);

        parser.extend(&wire[..3]);
        assert!(parser.next(&cipher).is_none());

        parser.extend(&wire[3..]);
        assert_eq!(drain(&mut parser, &cipher).len(), 1);
    }
}
