use clap::{App, Arg};
use homelink::logging;
use ipcom::devicemap::DeviceMap;
use ipcom::error::Error;
use ipcom::observer::{EventKind, ObserverSet};
use std::process;
use std::sync::Arc;

mod config;
mod supervisor;
mod watch;

use config::DaemonConfig;
use supervisor::Supervisor;
use watch::ChangeStream;

fn main() {
    process::exit(run());
}

fn run() -> i32 {
    let matches = App::new("IPCom watcher")
        .version("1.0")
        .about("Maintains a persistent IPCom gateway session and streams state changes as line-delimited JSON on stdout.")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .help("Path to the daemon config file")
                .required(true),
        )
        .arg(
            Arg::with_name("devices")
                .long("devices")
                .takes_value(true)
                .help("Override the device map path from the config file"),
        )
        .arg(
            Arg::with_name("debug")
                .long("debug")
                .help("Verbose logging on stderr"),
        )
        .get_matches();

    let log = logging::init(if matches.is_present("debug") {
        "debug"
    } else {
        "info"
    });

    let config_path = matches.value_of("CONFIG_FILE").expect("CONFIG_FILE is required");

    let config = match DaemonConfig::load(config_path) {
        Ok(config) => config,
        Err(err) => {
            logging::error!(log, "invalid configuration"; "path" => config_path, "error" => %err);
            return 2;
        }
    };

    let devices_path = matches
        .value_of("devices")
        .unwrap_or(&config.devices_file)
        .to_string();

    let map = match DeviceMap::load(&devices_path) {
        Ok(map) => Arc::new(map),
        Err(err) => {
            logging::error!(log, "invalid device map"; "path" => devices_path, "error" => %err);
            return 2;
        }
    };

    logging::info!(log, "device map loaded"; "path" => devices_path, "devices" => map.len());

    let mut supervisor = Supervisor::new(config, &log);

    let wire_map = map.clone();
    let wire_log = log.new(logging::o!());
    let err = supervisor.run(move |client| {
        let mut observers = ObserverSet::new();
        observers.set(
            EventKind::Snapshot,
            Box::new(ChangeStream::stdout(
                wire_map.clone(),
                client.host.clone(),
                &wire_log,
            )),
        );
        observers
    });

    logging::error!(log, "watcher terminated"; "error" => %err);

    match err {
        Error::Config(_) => 2,
        _ => 1,
    }
}
