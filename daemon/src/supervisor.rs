use crate::config::{ConnectionPreference, DaemonConfig};
use homelink::logging;
use ipcom::config::ClientConfig;
use ipcom::engine::Engine;
use ipcom::error::Error;
use ipcom::observer::ObserverSet;
use std::thread;
use std::time::Duration;

/// Which configured endpoint the next attempt targets.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EndpointChoice {
    Local,
    Remote,
}

impl EndpointChoice {
    #[inline]
    fn other(self) -> EndpointChoice {
        match self {
            EndpointChoice::Local => EndpointChoice::Remote,
            EndpointChoice::Remote => EndpointChoice::Local,
        }
    }
}

const HEALTH_TICK: Duration = Duration::from_secs(1);

/// Restart delay for the n-th consecutive failure: `base * 2^(n-1)`,
/// clamped to `max`.
pub fn backoff_delay(failures: u32, base: Duration, max: Duration) -> Duration {
    if failures == 0 {
        return Duration::from_secs(0);
    }

    let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::max_value());
    match base.checked_mul(factor) {
        Some(delay) if delay <= max => delay,
        _ => max,
    }
}

/// Delay ahead of the next attempt. In `Both` mode the first failure flips
/// to the alternate endpoint and retries at once; the backoff series only
/// starts when the alternate fails too.
pub fn retry_delay(
    preference: ConnectionPreference,
    failures: u32,
    base: Duration,
    max: Duration,
) -> Duration {
    match preference {
        ConnectionPreference::Both if failures <= 1 => Duration::from_secs(0),
        ConnectionPreference::Both => backoff_delay(failures - 1, base, max),
        _ => backoff_delay(failures, base, max),
    }
}

/// Whether a failure should move the next attempt to the other endpoint.
#[inline]
pub fn should_flip(preference: ConnectionPreference) -> bool {
    preference == ConnectionPreference::Both
}

/// Owns at most one live engine at a time and keeps it alive: restarts
/// with exponential backoff, tears sessions down after a health timeout,
/// and walks between the local and remote endpoints per the configured
/// preference.
pub struct Supervisor {
    config: DaemonConfig,
    endpoint: EndpointChoice,
    failures: u32,
    ever_connected: bool,
    log: logging::Logger,
}

impl Supervisor {
    pub fn new(config: DaemonConfig, log: &logging::Logger) -> Supervisor {
        let endpoint = match config.preference {
            ConnectionPreference::RemoteOnly => EndpointChoice::Remote,
            _ => EndpointChoice::Local,
        };

        Supervisor {
            config,
            endpoint,
            failures: 0,
            ever_connected: false,
            log: log.new(logging::o!("component" => "supervisor")),
        }
    }

    #[inline]
    pub fn endpoint(&self) -> EndpointChoice {
        self.endpoint
    }

    fn client_config(&self) -> ClientConfig {
        let endpoint = match self.endpoint {
            EndpointChoice::Local => &self.config.local,
            EndpointChoice::Remote => &self.config.remote,
        };
        self.config.client_config(endpoint)
    }

    /// Runs sessions until a terminal failure. `observers` is called once
    /// per attempt so every fresh engine gets its own wiring.
    ///
    /// Network failures and health timeouts restart the session; an
    /// authentication rejection before any session ever succeeded is
    /// terminal, as are configuration errors.
    pub fn run<F>(&mut self, mut observers: F) -> Error
    where
        F: FnMut(&ClientConfig) -> ObserverSet,
    {
        loop {
            let client = self.client_config();

            logging::info!(self.log, "starting session";
                           "endpoint" => client.endpoint(),
                           "choice" => ?self.endpoint(),
                           "failures" => self.failures);

            match Engine::start(client.clone(), observers(&client), &self.log) {
                Ok(engine) => {
                    self.failures = 0;
                    self.ever_connected = true;

                    let cause = self.watch_health(&engine);
                    logging::warn!(self.log, "session ended"; "cause" => %cause);
                    engine.stop();
                }
                Err(err) => {
                    let terminal = match &err {
                        Error::AuthRejected { .. } => !self.ever_connected,
                        Error::Config(_) | Error::OutOfRange { .. } => true,
                        _ => false,
                    };

                    if terminal {
                        logging::error!(self.log, "giving up"; "error" => %err);
                        return err;
                    }

                    logging::warn!(self.log, "session attempt failed"; "error" => %err);
                }
            }

            self.next_attempt();
        }
    }

    /// Blocks while the engine looks healthy. Returns the failure cause
    /// once the socket died or the inbound stream went quiet for too long.
    fn watch_health(&self, engine: &Engine) -> Error {
        let window = Duration::from_secs(self.config.connection_timeout_secs);

        loop {
            thread::sleep(HEALTH_TICK);

            if engine.failed() {
                return Error::Disconnected;
            }

            let age = engine.last_inbound_age();
            if age >= window {
                return Error::HealthTimeout(age.as_secs());
            }
        }
    }

    fn next_attempt(&mut self) {
        self.failures += 1;

        if should_flip(self.config.preference) {
            self.endpoint = self.endpoint.other();
        }

        let delay = retry_delay(
            self.config.preference,
            self.failures,
            Duration::from_secs(self.config.restart_base_delay_secs),
            Duration::from_secs(self.config.restart_max_delay_secs),
        );

        logging::info!(self.log, "scheduling restart";
                       "failures" => self.failures,
                       "delay_secs" => delay.as_secs(),
                       "endpoint" => ?self.endpoint);

        if delay > Duration::from_secs(0) {
            thread::sleep(delay);
        }
    }
}
