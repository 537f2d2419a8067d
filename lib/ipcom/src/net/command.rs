use crate::config::ClientConfig;
use crate::error::{Error, NetResult};
use crate::net::frame::Frame;
use crate::snapshot::{MODULE_COUNT, OUTPUT_COUNT};
use byteorder::WriteBytesExt;
use homelink::crypto::Cipher;
use std::io::Write;

/// Client-side command ids.
pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_DISCONNECT: u8 = 0x02;
pub const CMD_KEEPALIVE: u8 = 0x03;
pub const CMD_OUTPUTS: u8 = 0x05;

const CONNECT_VERSION: u8 = 0x02;
const OUTPUTS_VERSION: u8 = 0x01;
const SET_VALUES_TAG: u8 = 0x01;

/// Ciphertext prefix of a state message under the session keys.
pub const SNAPSHOT_MARKER: [u8; 2] = [0x79, 0xDB];
/// Full encrypted size of a state message.
pub const SNAPSHOT_WIRE_LEN: usize = 130;

/// The ConnectRequest payload is always 56 bytes.
pub const CONNECT_REQUEST_LEN: usize = 56;
const CREDENTIAL_FIELD_LEN: usize = 26;

/// The raw status request, encrypted for the wire. This is the sole way to
/// obtain snapshots; the gateway streams one per request.
pub fn status_request(cipher: &Cipher) -> Vec<u8> {
    cipher.encrypt(&[CMD_OUTPUTS, OUTPUTS_VERSION])
}

/// The 56-byte ConnectRequest:
/// `01 02 | USER:<u> pad 26 | PWD:<p> pad 26 | bus | 00`.
pub fn connect_request(
    username: &str,
    password: &str,
    bus_number: u8,
) -> NetResult<[u8; CONNECT_REQUEST_LEN]> {
    let user_field = credential_field("username", "USER:", username)?;
    let pwd_field = credential_field("password", "PWD:", password)?;

    let mut payload = [0u8; CONNECT_REQUEST_LEN];
    {
        let mut stream = &mut payload[..];
        stream.write_u8(CMD_CONNECT).expect("Error writing command id");
        stream
            .write_u8(CONNECT_VERSION)
            .expect("Error writing version");
        stream.write_all(&user_field).expect("Error writing username");
        stream.write_all(&pwd_field).expect("Error writing password");
        stream.write_u8(bus_number).expect("Error writing bus number");
        stream.write_u8(0x00).expect("Error writing bus lock");
    }

    Ok(payload)
}

fn credential_field(
    label: &'static str,
    prefix: &str,
    value: &str,
) -> NetResult<[u8; CREDENTIAL_FIELD_LEN]> {
    if value.is_empty() {
        return Err(Error::Config(format!("{} is empty", label)));
    }

    let text = format!("{}{}", prefix, value);
    if text.len() > CREDENTIAL_FIELD_LEN {
        return Err(Error::Config(format!(
            "{} exceeds {} bytes",
            label,
            CREDENTIAL_FIELD_LEN - prefix.len()
        )));
    }

    let mut field = [b' '; CREDENTIAL_FIELD_LEN];
    field[..text.len()].copy_from_slice(text.as_bytes());
    Ok(field)
}

/// Complete wire bytes of a SetValues write for one module: the bus prefix
/// when the bus is non-zero, then a frame addressed at
/// `exo_address_base + (module - 1)` whose data is the encrypted
/// `01 v1..v8` block.
///
/// All eight values always go out together. Sending fewer would zero the
/// remaining outputs on the physical module, which is why every caller
/// routes through the shadow writer's full-row merge.
pub fn set_values(
    config: &ClientConfig,
    cipher: &Cipher,
    module: u8,
    values: [u8; OUTPUT_COUNT],
) -> NetResult<Vec<u8>> {
    if module < 1 || module as usize > MODULE_COUNT {
        return Err(Error::OutOfRange {
            what: "module",
            value: module as i64,
        });
    }

    let mut block = Vec::with_capacity(1 + OUTPUT_COUNT);
    block.push(SET_VALUES_TAG);
    block.extend_from_slice(&values);

    let to = config.exo_address_base + (module - 1);
    let frame = Frame::new(to, 0x00, cipher.encrypt(&block))?;

    let mut wire = Vec::with_capacity(frame.wire_size() + 1);
    if config.exo_bus != 0 {
        wire.push(config.exo_bus);
    }
    wire.extend_from_slice(&frame.to_bytes());
    Ok(wire)
}

/// Heartbeat frame for the otherwise quiet control path.
pub fn keep_alive(cipher: &Cipher) -> NetResult<Vec<u8>> {
    Ok(Frame::new(0x01, 0x00, cipher.encrypt(&[CMD_KEEPALIVE]))?.to_bytes())
}

/// Best-effort disconnect notice sent during teardown.
pub fn disconnect(cipher: &Cipher) -> NetResult<Vec<u8>> {
    Ok(Frame::new(0x01, 0x00, cipher.encrypt(&[CMD_DISCONNECT]))?.to_bytes())
}
