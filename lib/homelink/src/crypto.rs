use ctor::ctor;

/// Size of the public key delivered by the gateway during the handshake.
pub const PUBLIC_KEY_SIZE: usize = 128;

const KEY_TABLE_SIZE: usize = 256;
const KEY_ROTATION: usize = 128;

/// Fixed key table used in dual-key mode, together with the public key.
/// The byte values are mandated by the gateway firmware and must not be
/// altered.
pub const PRIVATE_KEY: [u8; KEY_TABLE_SIZE] = [
    83, 131, 251, 50, 127, 126, 154, 233, 1, 179,
    127, 128, 6, 207, 57, 38, 111, 93, 37, 91,
    30, 38, 40, 196, 179, 120, 4, 172, 159, 11,
    174, 157, 87, 172, 78, 130, 14, 180, 186, 108,
    39, 56, 10, 113, 155, 225, 247, 253, 20, 204,
    20, 13, 113, 229, 184, 247, 124, 203, 224, 11,
    4, 120, 177, 127, 43, 234, 133, 65, 149, 34,
    24, 238, 6, 255, 121, 19, 38, 211, 8, 16,
    117, 4, 83, 108, 4, 253, 145, 243, 49, 147,
    182, 20, 227, 83, 246, 206, 110, 195, 116, 254,
    206, 98, 1, 189, 141, 17, 38, 57, 10, 116,
    81, 202, 86, 66, 81, 213, 123, 142, 166, 71,
    220, 127, 116, 9, 144, 143, 154, 242, 12, 116,
    129, 100, 16, 13, 100, 206, 84, 181, 120, 129,
    165, 144, 54, 235, 130, 201, 231, 92, 189, 63,
    59, 41, 211, 47, 34, 110, 111, 36, 221, 251,
    221, 152, 0, 29, 75, 130, 206, 18, 209, 51,
    41, 34, 79, 146, 249, 148, 235, 18, 87, 47,
    250, 48, 199, 241, 157, 114, 202, 141, 37, 235,
    44, 61, 227, 251, 204, 188, 84, 17, 83, 37,
    226, 206, 120, 249, 220, 111, 232, 226, 251, 65,
    60, 237, 111, 154, 177, 243, 114, 120, 2, 204,
    145, 61, 32, 127, 190, 233, 83, 212, 251, 255,
    110, 66, 177, 246, 94, 77, 20, 3, 180, 251,
    47, 83, 122, 188, 158, 167, 206, 142, 202, 8,
    196, 123, 25, 161, 43, 127,
];

/// Fixed key table used in single-key mode, before the handshake has
/// delivered a public key. This is `PRIVATE_KEY` rotated by 128 positions;
/// both tables ship as literals and the relationship is checked at startup.
pub const PRIVATE_KEY2: [u8; KEY_TABLE_SIZE] = [
    12, 116, 129, 100, 16, 13, 100, 206, 84, 181,
    120, 129, 165, 144, 54, 235, 130, 201, 231, 92,
    189, 63, 59, 41, 211, 47, 34, 110, 111, 36,
    221, 251, 221, 152, 0, 29, 75, 130, 206, 18,
    209, 51, 41, 34, 79, 146, 249, 148, 235, 18,
    87, 47, 250, 48, 199, 241, 157, 114, 202, 141,
    37, 235, 44, 61, 227, 251, 204, 188, 84, 17,
    83, 37, 226, 206, 120, 249, 220, 111, 232, 226,
    251, 65, 60, 237, 111, 154, 177, 243, 114, 120,
    2, 204, 145, 61, 32, 127, 190, 233, 83, 212,
    251, 255, 110, 66, 177, 246, 94, 77, 20, 3,
    180, 251, 47, 83, 122, 188, 158, 167, 206, 142,
    202, 8, 196, 123, 25, 161, 43, 127, 83, 131,
    251, 50, 127, 126, 154, 233, 1, 179, 127, 128,
    6, 207, 57, 38, 111, 93, 37, 91, 30, 38,
    40, 196, 179, 120, 4, 172, 159, 11, 174, 157,
    87, 172, 78, 130, 14, 180, 186, 108, 39, 56,
    10, 113, 155, 225, 247, 253, 20, 204, 20, 13,
    113, 229, 184, 247, 124, 203, 224, 11, 4, 120,
    177, 127, 43, 234, 133, 65, 149, 34, 24, 238,
    6, 255, 121, 19, 38, 211, 8, 16, 117, 4,
    83, 108, 4, 253, 145, 243, 49, 147, 182, 20,
    227, 83, 246, 206, 110, 195, 116, 254, 206, 98,
    1, 189, 141, 17, 38, 57, 10, 116, 81, 202,
    86, 66, 81, 213, 123, 142, 166, 71, 220, 127,
    116, 9, 144, 143, 154, 242,
];

/// Verify the key table rotation invariant before anything can touch the
/// cipher.
#[ctor]
fn VERIFY_KEY_TABLES() {
    for i in 0..KEY_TABLE_SIZE {
        if PRIVATE_KEY2[i] != PRIVATE_KEY[(i + KEY_ROTATION) % KEY_TABLE_SIZE] {
            panic!("Key table corruption at index {}", i)
        }
    }
}

/// Which buffer feeds the running index. The index always advances with
/// the ciphertext byte: the output while encrypting, the input while
/// decrypting. That shared rule is what makes the two directions inverses
/// of each other.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Feedback {
    Output,
    Input,
}

/// Stateful XOR stream cipher for the IPCom wire protocol.
///
/// Starts in single-key mode (`PRIVATE_KEY2` only). Installing the 128-byte
/// public key received during the handshake switches every subsequent
/// message, in both directions, to dual-key mode. A server-negotiated
/// non-secure session disables the transform entirely.
///
/// The feedback index is reset to zero for every message; no state is
/// carried across messages.
pub struct Cipher {
    public_key: Option<[u8; PUBLIC_KEY_SIZE]>,
    secure: bool,
}

impl Cipher {
    #[inline]
    pub fn new() -> Cipher {
        Cipher {
            public_key: None,
            secure: true,
        }
    }

    /// Switch to dual-key mode for all subsequent traffic.
    #[inline]
    pub fn install_public_key(&mut self, key: [u8; PUBLIC_KEY_SIZE]) {
        self.public_key = Some(key);
    }

    /// Disable the transform for the rest of the session (non-secure mode).
    #[inline]
    pub fn disable(&mut self) {
        self.secure = false;
        self.public_key = None;
    }

    #[inline]
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    #[inline]
    pub fn has_public_key(&self) -> bool {
        self.public_key.is_some()
    }

    #[inline]
    pub fn encrypt(&self, plain: &[u8]) -> Vec<u8> {
        self.transform(plain, Feedback::Output)
    }

    #[inline]
    pub fn decrypt(&self, cipher: &[u8]) -> Vec<u8> {
        self.transform(cipher, Feedback::Input)
    }

    fn transform(&self, buf: &[u8], feedback: Feedback) -> Vec<u8> {
        if !self.secure {
            return buf.to_vec();
        }

        let mut out = vec![0u8; buf.len()];
        let mut idx = 0u8;

        for pos in 0..buf.len() {
            idx ^= pos as u8;

            out[pos] = match self.public_key {
                Some(ref public) => {
                    buf[pos] ^ PRIVATE_KEY[idx as usize] ^ public[idx as usize % PUBLIC_KEY_SIZE]
                }
                None => buf[pos] ^ PRIVATE_KEY2[idx as usize],
            };

            idx = match feedback {
                Feedback::Output => out[pos],
                Feedback::Input => buf[pos],
            };
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_buffer(len: usize) -> Vec<u8> {
        (0..len).map(|_| rand::random::<u8>()).collect()
    }

    /// Public key under which the encryption of `05 01` yields the
    /// `79 DB` marker observed on the live bus.
    fn marker_public_key() -> [u8; PUBLIC_KEY_SIZE] {
        let mut key = [0u8; PUBLIC_KEY_SIZE];
        key[0] = 0x2F;
        key[120] = 0x06;
        key
    }

    #[test]
    fn test_key_table_rotation() {
        for i in 0..KEY_TABLE_SIZE {
            assert_eq!(
                PRIVATE_KEY2[i],
                PRIVATE_KEY[(i + KEY_ROTATION) % KEY_TABLE_SIZE],
                "mismatch at index {}",
                i
            );
        }
    }

    #[test]
    fn test_single_key_roundtrip() {
        let cipher = Cipher::new();
        let plain = random_buffer(200);

        let encrypted = cipher.encrypt(&plain);

        assert_ne!(encrypted, plain);
        assert_eq!(cipher.decrypt(&encrypted), plain);
    }

    #[test]
    fn test_dual_key_roundtrip() {
        let mut cipher = Cipher::new();
        let mut key = [0u8; PUBLIC_KEY_SIZE];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = (i * 7) as u8;
        }
        cipher.install_public_key(key);

        let plain = random_buffer(300);
        let encrypted = cipher.encrypt(&plain);

        assert_eq!(cipher.decrypt(&encrypted), plain);
    }

    #[test]
    fn test_mode_switch_changes_output() {
        let mut cipher = Cipher::new();
        let single = cipher.encrypt(&[0x05, 0x01]);

        cipher.install_public_key(marker_public_key());
        let dual = cipher.encrypt(&[0x05, 0x01]);

        assert_ne!(single, dual);
    }

    #[test]
    fn test_status_request_marker() {
        let mut cipher = Cipher::new();
        cipher.install_public_key(marker_public_key());

        assert_eq!(cipher.encrypt(&[0x05, 0x01]), vec![0x79, 0xDB]);
        assert_eq!(cipher.decrypt(&[0x79, 0xDB]), vec![0x05, 0x01]);
    }

    #[test]
    fn test_non_secure_passthrough() {
        let mut cipher = Cipher::new();
        cipher.disable();

        let plain = random_buffer(64);

        assert_eq!(cipher.encrypt(&plain), plain);
        assert_eq!(cipher.decrypt(&plain), plain);
        assert!(!cipher.is_secure());
        assert!(!cipher.has_public_key());
    }

    #[test]
    fn test_empty_buffer() {
        let cipher = Cipher::new();
        assert_eq!(cipher.encrypt(&[]), Vec::<u8>::new());
    }
}
