use crate::config::ClientConfig;
use crate::error::{Error, NetResult};
use crate::net::command;
use crate::net::frame::ReplyKind;
use crate::net::parser::{Inbound, StreamParser};
use crate::net::session::{Session, SessionState};
use crate::observer::{Event, EventKind, Observer, ObserverSet};
use crate::shadow::PendingWrites;
use crate::snapshot::Snapshot;
use homelink::crypto::Cipher;
use homelink::logging;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Heartbeat cadence on the otherwise quiet control path.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
/// Status poll cadence; the gateway streams one snapshot per request.
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(350);
/// Command queue drain cadence.
const COMMAND_QUEUE_INTERVAL: Duration = Duration::from_millis(250);
/// Settle time after a command so the next snapshot reflects it.
const COMMAND_SETTLE: Duration = Duration::from_millis(100);
/// Soft minimum gap between raw TCP sends.
const SEND_GAP_MS: u64 = 200;
/// Read timeout on the receive path. Exists only so cancellation gets
/// observed; a timeout never fails the session.
const READ_TIMEOUT: Duration = Duration::from_millis(500);
const RECV_CHUNK: usize = 8192;

/// Sentinel for "no send has happened yet".
const NEVER: u64 = u64::MAX;

enum Command {
    Write {
        module: u8,
        output: u8,
        value: u8,
        done: Sender<NetResult<()>>,
    },
}

/// Condvar-backed cancellation signal. Sleeping loops wake immediately
/// when it is raised, which keeps shutdown latency at one tick.
struct ShutdownSignal {
    stop: Mutex<bool>,
    cv: Condvar,
}

impl ShutdownSignal {
    fn new() -> ShutdownSignal {
        ShutdownSignal {
            stop: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn raise(&self) {
        let mut stop = self.stop.lock().expect("shutdown lock poisoned");
        *stop = true;
        self.cv.notify_all();
    }

    fn raised(&self) -> bool {
        *self.stop.lock().expect("shutdown lock poisoned")
    }

    /// Sleeps up to `timeout`; returns true when shutdown was raised.
    fn wait(&self, timeout: Duration) -> bool {
        let stop = self.stop.lock().expect("shutdown lock poisoned");
        let (stop, _) = self
            .cv
            .wait_timeout_while(stop, timeout, |raised| !*raised)
            .expect("shutdown lock poisoned");
        *stop
    }
}

/// State the four loops share under the engine lock: the write side of the
/// socket, the cipher, the latest snapshot and the pending-writes table.
/// Hold times stay short, one send or one snapshot install; nothing ever
/// waits for a response under the lock.
struct Link {
    stream: TcpStream,
    cipher: Cipher,
    snapshot: Option<Snapshot>,
    pending: PendingWrites,
}

struct Shared {
    link: Mutex<Link>,
    observers: Mutex<ObserverSet>,
    shutdown: ShutdownSignal,
    /// Excludes the background emitters while a command is in flight.
    processing: AtomicBool,
    /// Set once on the first fatal socket condition.
    failed: AtomicBool,
    started: Instant,
    last_send_ms: AtomicU64,
    last_inbound_ms: AtomicU64,
    degraded: bool,
    config: ClientConfig,
    log: logging::Logger,
}

impl Shared {
    #[inline]
    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    #[inline]
    fn mark_inbound(&self) {
        self.last_inbound_ms.store(self.now_ms(), Ordering::Release);
    }

    /// Marks the engine failed and announces the disconnect exactly once.
    fn fail(&self) {
        if !self.failed.swap(true, Ordering::AcqRel) {
            self.emit(Event::Disconnected);
        }
    }

    fn emit(&self, event: Event) {
        let mut observers = self.observers.lock().expect("observer lock poisoned");
        observers.emit(&event);
    }

    /// Waits out the remainder of the send gap. Runs before the link lock
    /// is taken so nobody sleeps while holding it.
    fn pace(&self) {
        let last = self.last_send_ms.load(Ordering::Acquire);
        if last == NEVER {
            return;
        }

        let elapsed = self.now_ms().saturating_sub(last);
        if elapsed < SEND_GAP_MS {
            thread::sleep(Duration::from_millis(SEND_GAP_MS - elapsed));
        }
    }

    /// Builds and sends one message. The builder runs under the link lock
    /// so the cipher state and the write form one atomic step.
    fn send<F>(&self, build: F) -> NetResult<()>
    where
        F: FnOnce(&Cipher) -> NetResult<Vec<u8>>,
    {
        self.pace();

        let mut link = self.link.lock().expect("engine lock poisoned");
        let bytes = build(&link.cipher)?;
        link.stream.write_all(&bytes)?;
        drop(link);

        self.last_send_ms.store(self.now_ms(), Ordering::Release);
        Ok(())
    }
}

/// The persistent-connection engine: four cooperating loops over one
/// socket.
///
/// * Receive: decrypts and demultiplexes inbound traffic, installs
///   snapshots, dispatches observers.
/// * Keep-alive: a heartbeat frame every 30 s.
/// * Status poll: the raw status request every 350 ms, which is what makes
///   the gateway stream snapshots at all.
/// * Command queue: drains user writes serially, pausing the two emitters
///   while each command settles.
///
/// Observers are dispatched outside the engine lock and must not block;
/// see [`crate::observer::Observer`].
pub struct Engine {
    shared: Arc<Shared>,
    commands: Mutex<Sender<Command>>,
    writers: Vec<JoinHandle<()>>,
    receiver: JoinHandle<()>,
}

impl Engine {
    /// Connects, authenticates and spawns the engine loops.
    pub fn start(
        config: ClientConfig,
        observers: ObserverSet,
        log: &logging::Logger,
    ) -> NetResult<Engine> {
        let mut session = Session::connect(&config, log)?;
        session.authenticate(&config)?;
        Self::from_session(session, config, observers, log)
    }

    /// Wraps an already-authenticated session.
    pub fn from_session(
        session: Session,
        config: ClientConfig,
        observers: ObserverSet,
        log: &logging::Logger,
    ) -> NetResult<Engine> {
        let degraded = session.state() == SessionState::Degraded;
        let (stream, cipher, _) = session.into_parts();

        let reader = stream.try_clone()?;
        reader.set_read_timeout(Some(READ_TIMEOUT))?;

        let log = log.new(logging::o!("component" => "engine"));

        let shared = Arc::new(Shared {
            link: Mutex::new(Link {
                stream,
                cipher,
                snapshot: None,
                pending: PendingWrites::new(),
            }),
            observers: Mutex::new(observers),
            shutdown: ShutdownSignal::new(),
            processing: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            started: Instant::now(),
            last_send_ms: AtomicU64::new(NEVER),
            last_inbound_ms: AtomicU64::new(0),
            degraded,
            config,
            log,
        });

        shared.emit(Event::Connected { degraded });
        logging::info!(shared.log, "engine starting"; "degraded" => degraded);

        let (tx, rx) = mpsc::channel();

        let receiver = spawn_loop("ipcom-receive", {
            let shared = shared.clone();
            move || Self::receive_loop(shared, reader)
        })?;

        let writers = vec![
            spawn_loop("ipcom-keepalive", {
                let shared = shared.clone();
                move || Self::keepalive_loop(shared)
            })?,
            spawn_loop("ipcom-poll", {
                let shared = shared.clone();
                move || Self::status_poll_loop(shared)
            })?,
            spawn_loop("ipcom-commands", {
                let shared = shared.clone();
                move || Self::command_loop(shared, rx)
            })?,
        ];

        Ok(Engine {
            shared,
            commands: Mutex::new(tx),
            writers,
            receiver,
        })
    }

    /// Queues one output write and waits until it has been sent. The
    /// carry-over merge happens at execution time so later writes always
    /// see earlier ones.
    pub fn set_value(&self, module: u8, output: u8, value: u8) -> NetResult<()> {
        if self.failed() || self.shared.shutdown.raised() {
            return Err(Error::Disconnected);
        }

        let (done, result) = mpsc::channel();
        let sender = self
            .commands
            .lock()
            .expect("command sender lock poisoned")
            .clone();

        sender
            .send(Command::Write {
                module,
                output,
                value,
                done,
            })
            .map_err(|_| Error::Disconnected)?;

        match result.recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Disconnected),
        }
    }

    /// Latest accepted snapshot, if any has arrived yet.
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.shared
            .link
            .lock()
            .expect("engine lock poisoned")
            .snapshot
            .clone()
    }

    /// Installs an observer, replacing any previous one for that kind.
    pub fn subscribe(&self, kind: EventKind, observer: Box<dyn Observer>) {
        self.shared
            .observers
            .lock()
            .expect("observer lock poisoned")
            .set(kind, observer);
    }

    pub fn unsubscribe(&self, kind: EventKind) {
        self.shared
            .observers
            .lock()
            .expect("observer lock poisoned")
            .clear(kind);
    }

    /// True when the session authenticated in non-secure mode.
    #[inline]
    pub fn degraded(&self) -> bool {
        self.shared.degraded
    }

    /// True once a fatal socket condition has been observed.
    #[inline]
    pub fn failed(&self) -> bool {
        self.shared.failed.load(Ordering::Acquire)
    }

    /// Time since the last inbound bytes. Drives the supervisor health
    /// check.
    pub fn last_inbound_age(&self) -> Duration {
        let last = self.shared.last_inbound_ms.load(Ordering::Acquire);
        Duration::from_millis(self.shared.now_ms().saturating_sub(last))
    }

    /// Stops all four loops and closes the socket. Queued but unstarted
    /// commands are dropped. The socket is shut down only after the writer
    /// loops have observed cancellation; that is what unblocks the reader.
    pub fn stop(self) {
        logging::info!(self.shared.log, "engine stopping");
        self.shared.shutdown.raise();

        for handle in self.writers {
            drop(handle.join());
        }

        // Best-effort notice; the gateway closes hard anyway.
        drop(self.shared.send(command::disconnect));

        {
            let link = self.shared.link.lock().expect("engine lock poisoned");
            drop(link.stream.shutdown(Shutdown::Both));
        }

        drop(self.receiver.join());

        self.shared.fail();
        logging::info!(self.shared.log, "engine stopped");
    }

    fn receive_loop(shared: Arc<Shared>, mut stream: TcpStream) {
        let mut parser = StreamParser::new(&shared.log);
        let mut chunk = [0u8; RECV_CHUNK];

        loop {
            if shared.shutdown.raised() {
                break;
            }

            match stream.read(&mut chunk) {
                Ok(0) => {
                    if !shared.shutdown.raised() {
                        logging::warn!(shared.log, "connection closed by gateway");
                    }
                    shared.fail();
                    break;
                }
                Ok(count) => {
                    shared.mark_inbound();
                    parser.extend(&chunk[..count]);
                    Self::drain_parser(&shared, &mut parser);
                }
                Err(ref err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut
                        || err.kind() == std::io::ErrorKind::Interrupted =>
                {
                    continue;
                }
                Err(err) => {
                    if !shared.shutdown.raised() {
                        logging::error!(shared.log, "receive failed"; "error" => %err);
                    }
                    shared.fail();
                    break;
                }
            }
        }
    }

    /// Decodes everything the parser can yield. Snapshot installs happen
    /// under the lock; observer dispatch happens after it is released.
    fn drain_parser(shared: &Arc<Shared>, parser: &mut StreamParser) {
        loop {
            let event = {
                let mut link = shared.link.lock().expect("engine lock poisoned");
                let next = parser.next(&link.cipher);

                match next {
                    Some(Inbound::Snapshot(snapshot)) => {
                        link.snapshot = Some(snapshot.clone());
                        // The gateway state is authoritative from here on.
                        link.pending.clear();
                        Some(Event::Snapshot(snapshot))
                    }
                    Some(Inbound::Reply(frame)) => {
                        match frame.kind() {
                            Some(ReplyKind::KeepAlive) => {
                                logging::debug!(shared.log, "keep-alive acknowledged")
                            }
                            Some(ReplyKind::Disconnect) => {
                                logging::info!(shared.log, "gateway disconnect notice")
                            }
                            kind => {
                                logging::debug!(shared.log, "framed reply";
                                                "kind" => ?kind,
                                                "command" => frame.command())
                            }
                        }
                        Some(Event::Frame(frame))
                    }
                    None => None,
                }
            };

            match event {
                Some(event) => shared.emit(event),
                None => break,
            }
        }
    }

    fn keepalive_loop(shared: Arc<Shared>) {
        loop {
            if shared.shutdown.wait(KEEPALIVE_INTERVAL) {
                break;
            }
            if shared.processing.load(Ordering::Acquire) {
                continue;
            }

            match shared.send(command::keep_alive) {
                Ok(()) => logging::debug!(shared.log, "keep-alive sent"),
                Err(err) => {
                    logging::warn!(shared.log, "keep-alive failed"; "error" => %err);
                    shared.fail();
                    break;
                }
            }
        }
    }

    fn status_poll_loop(shared: Arc<Shared>) {
        loop {
            if shared.shutdown.wait(STATUS_POLL_INTERVAL) {
                break;
            }
            if shared.processing.load(Ordering::Acquire) {
                continue;
            }

            if let Err(err) = shared.send(|cipher| Ok(command::status_request(cipher))) {
                logging::warn!(shared.log, "status poll failed"; "error" => %err);
                shared.fail();
                break;
            }
        }
    }

    fn command_loop(shared: Arc<Shared>, queue: Receiver<Command>) {
        loop {
            if shared.shutdown.raised() {
                break;
            }

            let command = match queue.recv_timeout(COMMAND_QUEUE_INTERVAL) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            if shared.shutdown.raised() {
                // Queued but unstarted commands are dropped on shutdown.
                break;
            }

            match command {
                Command::Write {
                    module,
                    output,
                    value,
                    done,
                } => {
                    shared.processing.store(true, Ordering::Release);
                    let outcome = Self::execute_write(&shared, module, output, value);
                    // Give the gateway a moment to reflect the change in
                    // the next snapshot before polls resume.
                    thread::sleep(COMMAND_SETTLE);
                    shared.processing.store(false, Ordering::Release);

                    if let Err(err) = &outcome {
                        logging::warn!(shared.log, "write failed";
                                       "module" => module,
                                       "output" => output,
                                       "error" => %err);
                    }
                    drop(done.send(outcome));
                }
            }
        }
    }

    fn execute_write(shared: &Arc<Shared>, module: u8, output: u8, value: u8) -> NetResult<()> {
        shared.pace();

        let mut link = shared.link.lock().expect("engine lock poisoned");

        let baseline = link.snapshot.clone();
        let row = link.pending.plan(module, output, value, baseline.as_ref())?;
        let bytes = command::set_values(&shared.config, &link.cipher, module, row)?;
        link.stream.write_all(&bytes)?;
        drop(link);

        shared.last_send_ms.store(shared.now_ms(), Ordering::Release);
        logging::debug!(shared.log, "write sent";
                        "module" => module,
                        "output" => output,
                        "value" => value);
        Ok(())
    }
}

fn spawn_loop<F>(name: &str, body: F) -> NetResult<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(Error::from)
}

/// Enforces a minimum spacing between successive command submissions.
/// Hosts that serialize external commands put one of these ahead of
/// [`Engine::set_value`]; the engine's own 200 ms send pacing is separate
/// and always active.
pub struct CommandGate {
    last: Mutex<Option<Instant>>,
    gap: Duration,
}

impl CommandGate {
    pub fn new(gap: Duration) -> CommandGate {
        CommandGate {
            last: Mutex::new(None),
            gap,
        }
    }

    /// Blocks until the gap since the previously admitted command has
    /// passed, then admits this one.
    pub fn admit(&self) {
        let mut last = self.last.lock().expect("command gate poisoned");

        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.gap {
                thread::sleep(self.gap - elapsed);
            }
        }

        *last = Some(Instant::now());
    }
}
