use crate::engine::Engine;
use crate::error::{Error, NetResult};
use crate::snapshot::Snapshot;
use homelink::logging;

/// Address of one output channel.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct OutputAddress {
    pub module: u8,
    pub output: u8,
}

/// The relay pair driving one motorized cover: one output per direction.
/// Driving both at once is electrically forbidden and must never be
/// commanded.
#[derive(Debug, Copy, Clone)]
pub struct CoverRelays {
    pub up: OutputAddress,
    pub down: OutputAddress,
    /// Level written to a relay being driven; 255 on switch modules.
    pub drive_level: u8,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CoverCommand {
    Open,
    Close,
    Stop,
}

/// Motion derivable from the relay pair. The hardware reports no position,
/// so "closed" is unknowable; only the direction of travel is.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CoverMotion {
    Opening,
    Closing,
    Stopped,
}

/// One relay write in a cover plan.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RelayStep {
    pub address: OutputAddress,
    pub level: u8,
}

/// Result of planning a cover command against the observed relay levels.
#[derive(Debug)]
pub struct CoverPlan {
    /// Relay writes, in the order they must be issued.
    pub steps: Vec<RelayStep>,
    /// True when both relays were observed active and the command was
    /// converted into a stop.
    pub forced_stop: bool,
}

/// Outcome reported to the caller once the plan has executed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CoverOutcome {
    pub motion: CoverMotion,
    pub forced_stop: bool,
}

impl CoverRelays {
    /// Current motion as derived from a snapshot.
    pub fn motion(&self, snapshot: &Snapshot) -> NetResult<CoverMotion> {
        let up = snapshot.get(self.up.module, self.up.output)?;
        let down = snapshot.get(self.down.module, self.down.output)?;

        Ok(if up > 0 {
            CoverMotion::Opening
        } else if down > 0 {
            CoverMotion::Closing
        } else {
            CoverMotion::Stopped
        })
    }

    /// Builds the write sequence for `command` given the observed relay
    /// levels. The opposite relay is always released before the target
    /// relay is driven, so the pair never passes through the forbidden
    /// both-active state. Observing that state on the wire converts any
    /// request into a stop.
    pub fn plan(&self, command: CoverCommand, up_level: u8, down_level: u8) -> CoverPlan {
        let up_off = RelayStep {
            address: self.up,
            level: 0,
        };
        let down_off = RelayStep {
            address: self.down,
            level: 0,
        };

        if up_level > 0 && down_level > 0 {
            return CoverPlan {
                steps: vec![up_off, down_off],
                forced_stop: true,
            };
        }

        let steps = match command {
            CoverCommand::Open => {
                let mut steps = Vec::with_capacity(2);
                if down_level > 0 {
                    steps.push(down_off);
                }
                steps.push(RelayStep {
                    address: self.up,
                    level: self.drive_level,
                });
                steps
            }
            CoverCommand::Close => {
                let mut steps = Vec::with_capacity(2);
                if up_level > 0 {
                    steps.push(up_off);
                }
                steps.push(RelayStep {
                    address: self.down,
                    level: self.drive_level,
                });
                steps
            }
            CoverCommand::Stop => vec![up_off, down_off],
        };

        CoverPlan {
            steps,
            forced_stop: false,
        }
    }
}

/// Executes one cover command through the engine queue so the relay writes
/// serialize with all other traffic. A failed step aborts the remainder.
pub fn execute(
    engine: &Engine,
    relays: &CoverRelays,
    command: CoverCommand,
    log: &logging::Logger,
) -> NetResult<CoverOutcome> {
    let snapshot = engine.snapshot().ok_or(Error::NoBaseline)?;
    let up_level = snapshot.get(relays.up.module, relays.up.output)?;
    let down_level = snapshot.get(relays.down.module, relays.down.output)?;

    let plan = relays.plan(command, up_level, down_level);
    if plan.forced_stop {
        logging::warn!(log, "both cover relays active, forcing stop";
                       "up_module" => relays.up.module,
                       "up_output" => relays.up.output,
                       "down_module" => relays.down.module,
                       "down_output" => relays.down.output);
    }

    for step in &plan.steps {
        engine.set_value(step.address.module, step.address.output, step.level)?;
    }

    let motion = if plan.forced_stop {
        CoverMotion::Stopped
    } else {
        match command {
            CoverCommand::Open => CoverMotion::Opening,
            CoverCommand::Close => CoverMotion::Closing,
            CoverCommand::Stop => CoverMotion::Stopped,
        }
    };

    Ok(CoverOutcome {
        motion,
        forced_stop: plan.forced_stop,
    })
}
