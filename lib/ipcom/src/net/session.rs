use crate::config::ClientConfig;
use crate::error::{Error, NetResult};
use crate::net::command;
use homelink::crypto::{Cipher, PUBLIC_KEY_SIZE};
use homelink::logging;
use homelink::util::mask_secret;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Connection lifecycle. Only `Established` and `Degraded` may emit
/// command or keep-alive traffic; every other state must stay silent.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SessionState {
    Disconnected,
    TcpOpen,
    Authenticating,
    Established,
    Degraded,
}

const CONNECT_RESPONSE_LEN: usize = 135;
const PUBLIC_KEY_OFFSET: usize = 7;
const AUTH_NACK: [u8; 2] = [0x7E, 0xE3];
const NONSECURE_MARKER: [u8; 2] = [0x0E, 0x65];

/// An authenticated transport: the TCP stream plus the cipher state the
/// handshake produced. Dropping the session closes the socket and discards
/// the key material with it.
pub struct Session {
    stream: TcpStream,
    cipher: Cipher,
    state: SessionState,
    log: logging::Logger,
}

impl Session {
    /// Opens the TCP connection with a bounded timeout. Resolution,
    /// refusal, timeout and socket failures each map to their own kind.
    pub fn connect(config: &ClientConfig, log: &logging::Logger) -> NetResult<Session> {
        config.validate()?;

        let endpoint = config.endpoint();
        let log = log.new(logging::o!("endpoint" => endpoint.clone()));

        let addr = resolve(&endpoint, &config.host)?;
        let timeout = Duration::from_secs(config.connect_timeout_secs);

        logging::info!(log, "connecting"; "timeout_secs" => config.connect_timeout_secs);

        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_read_timeout(Some(timeout))?;

        logging::info!(log, "tcp connection established");

        Ok(Session {
            stream,
            cipher: Cipher::new(),
            state: SessionState::TcpOpen,
            log,
        })
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[inline]
    pub fn authenticated(&self) -> bool {
        self.state == SessionState::Established || self.state == SessionState::Degraded
    }

    /// Runs the handshake: the 56-byte ConnectRequest goes out raw under
    /// the single-key cipher, the 135-byte ConnectResponse comes back the
    /// same way. Success installs the public key and switches to dual-key
    /// mode; a non-secure offer disables encryption but still counts as
    /// authenticated.
    pub fn authenticate(&mut self, config: &ClientConfig) -> NetResult<()> {
        let payload =
            command::connect_request(&config.username, &config.password, config.bus_number)?;

        self.state = SessionState::Authenticating;
        logging::info!(self.log, "authenticating";
                       "username" => mask_secret(&config.username, 2),
                       "bus" => config.bus_number);

        let packet = self.cipher.encrypt(&payload);
        self.stream.write_all(&packet)?;

        let reply = self.read_connect_response()?;
        let plain = self.cipher.decrypt(&reply);

        if plain[0] == command::CMD_CONNECT {
            let mut key = [0u8; PUBLIC_KEY_SIZE];
            key.copy_from_slice(&plain[PUBLIC_KEY_OFFSET..CONNECT_RESPONSE_LEN]);
            self.cipher.install_public_key(key);
            self.state = SessionState::Established;

            logging::info!(self.log, "authenticated"; "mode" => "dual-key");
            Ok(())
        } else if plain[0] == NONSECURE_MARKER[0] && plain[1] == NONSECURE_MARKER[1] {
            self.cipher.disable();
            self.state = SessionState::Degraded;

            logging::warn!(self.log, "gateway negotiated non-secure mode, encryption disabled");
            Ok(())
        } else {
            self.state = SessionState::Disconnected;

            logging::error!(self.log, "authentication rejected"; "status" => plain[0]);
            Err(Error::AuthRejected { reason: "status" })
        }
    }

    /// Reads the raw handshake reply. The gateway answers with either the
    /// full 135 bytes or the short `7E E3` nack before closing.
    fn read_connect_response(&mut self) -> NetResult<Vec<u8>> {
        let mut buf = [0u8; CONNECT_RESPONSE_LEN];
        let mut total = 0usize;

        while total < CONNECT_RESPONSE_LEN {
            match self.stream.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(count) => total += count,
                Err(ref err) if is_read_timeout(err) => break,
                Err(err) => {
                    self.state = SessionState::Disconnected;
                    return Err(err.into());
                }
            }
        }

        if total == AUTH_NACK.len() && buf[..2] == AUTH_NACK {
            self.state = SessionState::Disconnected;
            logging::error!(self.log, "gateway nacked the handshake");
            return Err(Error::AuthRejected {
                reason: "server-nack",
            });
        }

        if total != CONNECT_RESPONSE_LEN {
            self.state = SessionState::Disconnected;
            logging::error!(self.log, "unexpected handshake reply size"; "bytes" => total);
            return Err(Error::AuthMalformed(format!(
                "connect response was {} bytes, expected {}",
                total, CONNECT_RESPONSE_LEN
            )));
        }

        Ok(buf.to_vec())
    }

    /// Splits the session into its transport parts for the engine. Panics
    /// unless the handshake has completed.
    pub fn into_parts(self) -> (TcpStream, Cipher, SessionState) {
        if !self.authenticated() {
            panic!("Attempted to use an unauthenticated session");
        }
        (self.stream, self.cipher, self.state)
    }
}

fn resolve(endpoint: &str, host: &str) -> NetResult<SocketAddr> {
    endpoint
        .to_socket_addrs()
        .map_err(|_| Error::Resolve(host.to_string()))?
        .next()
        .ok_or_else(|| Error::Resolve(host.to_string()))
}

#[inline]
fn is_read_timeout(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::TimedOut
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn config(port: u16) -> ClientConfig {
        ClientConfig {
            host: "127.0.0.1".into(),
            port,
            username: "u".into(),
            password: "p".into(),
            connect_timeout_secs: 2,
            ..ClientConfig::default()
        }
    }

    fn spawn_gateway<F>(respond: F) -> u16
    where
        F: FnOnce(&Cipher, &mut TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let cipher = Cipher::new();

            let mut request = [0u8; command::CONNECT_REQUEST_LEN];
            stream.read_exact(&mut request).unwrap();
            let plain = cipher.decrypt(&request);
            assert_eq!(&plain[..2], &[0x01, 0x02]);

            respond(&cipher, &mut stream);
        });

        port
    }

    #[test]
    fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let log = logging::null();
        match Session::connect(&config(port), &log) {
            Err(Error::Refused(_)) => {}
            other => panic!("Unexpected result {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_resolve_failure() {
        let mut cfg = config(5000);
        cfg.host = "no-such-host.invalid".into();

        let log = logging::null();
        match Session::connect(&cfg, &log) {
            Err(Error::Resolve(_)) => {}
            other => panic!("Unexpected result {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_empty_credentials_fail_before_io() {
        let mut cfg = config(1);
        cfg.username.clear();

        let log = logging::null();
        match Session::connect(&cfg, &log) {
            Err(Error::Config(_)) => {}
            other => panic!("Unexpected result {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_handshake_established() {
        let port = spawn_gateway(|cipher, stream| {
            let mut plain = [0u8; CONNECT_RESPONSE_LEN];
            plain[0] = 0x01;
            for (i, byte) in plain[PUBLIC_KEY_OFFSET..].iter_mut().enumerate() {
                *byte = i as u8;
            }
            stream.write_all(&cipher.encrypt(&plain)).unwrap();
        });

        let log = logging::null();
        let cfg = config(port);
        let mut session = Session::connect(&cfg, &log).unwrap();
        assert_eq!(session.state(), SessionState::TcpOpen);

        session.authenticate(&cfg).unwrap();
        assert_eq!(session.state(), SessionState::Established);

        let (_stream, cipher, state) = session.into_parts();
        assert!(cipher.has_public_key());
        assert_eq!(state, SessionState::Established);
    }

    #[test]
    fn test_handshake_non_secure_offer() {
        let port = spawn_gateway(|cipher, stream| {
            let mut plain = [0u8; CONNECT_RESPONSE_LEN];
            plain[0] = NONSECURE_MARKER[0];
            plain[1] = NONSECURE_MARKER[1];
            stream.write_all(&cipher.encrypt(&plain)).unwrap();
        });

        let log = logging::null();
        let cfg = config(port);
        let mut session = Session::connect(&cfg, &log).unwrap();

        session.authenticate(&cfg).unwrap();
        assert_eq!(session.state(), SessionState::Degraded);

        let (_stream, cipher, _state) = session.into_parts();
        assert!(!cipher.is_secure());
    }

    #[test]
    fn test_handshake_server_nack() {
        let port = spawn_gateway(|_cipher, stream| {
            stream.write_all(&AUTH_NACK).unwrap();
        });

        let log = logging::null();
        let cfg = config(port);
        let mut session = Session::connect(&cfg, &log).unwrap();

        match session.authenticate(&cfg) {
            Err(Error::AuthRejected { reason }) => assert_eq!(reason, "server-nack"),
            other => panic!("Unexpected result {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_handshake_rejected_status() {
        let port = spawn_gateway(|cipher, stream| {
            let mut plain = [0u8; CONNECT_RESPONSE_LEN];
            plain[0] = 0x07;
            stream.write_all(&cipher.encrypt(&plain)).unwrap();
        });

        let log = logging::null();
        let cfg = config(port);
        let mut session = Session::connect(&cfg, &log).unwrap();

        match session.authenticate(&cfg) {
            Err(Error::AuthRejected { reason }) => assert_eq!(reason, "status"),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_handshake_short_reply_is_malformed() {
        let port = spawn_gateway(|cipher, stream| {
            let plain = [0x01u8; 40];
            stream.write_all(&cipher.encrypt(&plain)).unwrap();
        });

        let log = logging::null();
        let cfg = config(port);
        let mut session = Session::connect(&cfg, &log).unwrap();

        match session.authenticate(&cfg) {
            Err(Error::AuthMalformed(_)) => {}
            other => panic!("Unexpected result {:?}", other),
        }
    }
}
