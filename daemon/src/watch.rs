use homelink::logging;
use ipcom::devicemap::{DeviceKind, DeviceMap};
use ipcom::observer::{Event, Observer};
use ipcom::snapshot::Snapshot;
use serde_derive::Serialize;
use std::io::{self, Write};
use std::sync::Arc;

#[derive(Serialize)]
struct DeviceState<'a> {
    device_key: &'a str,
    display_name: &'a str,
    category: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    module: u8,
    output: u8,
    value: u8,
    state: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    brightness: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    relay_role: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    paired_device: Option<&'a str>,
}

#[derive(Serialize)]
struct FullState<'a> {
    timestamp: String,
    host: &'a str,
    devices: Vec<DeviceState<'a>>,
}

#[derive(Serialize)]
struct ChangeRecord<'a> {
    module: u8,
    output: u8,
    old: u8,
    new: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
}

#[derive(Serialize)]
struct ChangeBatch<'a> {
    timestamp: String,
    changes: Vec<ChangeRecord<'a>>,
}

/// Streams line-delimited JSON to the host process: one full-state object
/// when the first snapshot of a session arrives, then one line per
/// detected change batch. Nothing human readable goes on this stream.
pub struct ChangeStream<W: Write + Send> {
    map: Arc<DeviceMap>,
    host: String,
    previous: Option<Snapshot>,
    out: W,
    log: logging::Logger,
}

impl ChangeStream<io::Stdout> {
    pub fn stdout(map: Arc<DeviceMap>, host: String, log: &logging::Logger) -> Self {
        ChangeStream::new(map, host, io::stdout(), log)
    }
}

impl<W: Write + Send> ChangeStream<W> {
    pub fn new(map: Arc<DeviceMap>, host: String, out: W, log: &logging::Logger) -> Self {
        ChangeStream {
            map,
            host,
            previous: None,
            out,
            log: log.new(logging::o!("component" => "watch")),
        }
    }

    fn emit_line(&mut self, line: String) {
        if writeln!(self.out, "{}", line)
            .and_then(|_| self.out.flush())
            .is_err()
        {
            logging::warn!(self.log, "host stream closed, dropping output");
        }
    }

    fn emit_full_state(&mut self, snapshot: &Snapshot) {
        let map = self.map.clone();
        let mut devices = Vec::with_capacity(map.len());

        for (key, category, entry) in map.entries() {
            let value = match snapshot.get(entry.module, entry.output) {
                Ok(value) => value,
                Err(_) => continue,
            };

            let brightness = if entry.kind == DeviceKind::Dimmer {
                Some(entry.percent_from_level(value))
            } else {
                None
            };

            devices.push(DeviceState {
                device_key: key,
                display_name: &entry.name,
                category: category.as_str(),
                kind: entry.kind.as_str(),
                module: entry.module,
                output: entry.output,
                value,
                state: if value > 0 { "on" } else { "off" },
                brightness,
                relay_role: entry.relay_role.map(|role| role.as_str()),
                paired_device: entry.paired_device.as_deref(),
            });
        }

        let full = FullState {
            timestamp: snapshot.timestamp_iso(),
            host: &self.host,
            devices,
        };

        let line = serde_json::to_string(&full).expect("Error serializing full state");
        self.emit_line(line);
    }

    fn emit_changes(&mut self, snapshot: &Snapshot, previous: &Snapshot) {
        let diff = snapshot.diff(previous);
        if diff.is_empty() {
            return;
        }

        let map = self.map.clone();
        let changes: Vec<ChangeRecord> = diff
            .iter()
            .map(|change| {
                let key = map.key_at(change.module, change.output);
                let device = key.and_then(|key| map.get(key));

                ChangeRecord {
                    module: change.module,
                    output: change.output,
                    old: change.old,
                    new: change.new,
                    device_key: key,
                    category: device.map(|(category, _)| category.as_str()),
                    display_name: device.map(|(_, entry)| entry.name.as_str()),
                }
            })
            .collect();

        let batch = ChangeBatch {
            timestamp: snapshot.timestamp_iso(),
            changes,
        };

        let line = serde_json::to_string(&batch).expect("Error serializing change batch");
        self.emit_line(line);
    }
}

impl<W: Write + Send> Observer for ChangeStream<W> {
    fn handle(&mut self, event: &Event) {
        if let Event::Snapshot(snapshot) = event {
            match self.previous.take() {
                None => self.emit_full_state(snapshot),
                Some(previous) => self.emit_changes(snapshot, &previous),
            }
            self.previous = Some(snapshot.clone());
        }
    }
}
