use crate::error::{Error, NetResult};
use chrono::{DateTime, Utc};
use homelink::time;

pub const MODULE_COUNT: usize = 16;
pub const OUTPUT_COUNT: usize = 8;

/// Decrypted length of a state message: command id, version, then sixteen
/// consecutive 8-byte module rows.
pub const SNAPSHOT_LEN: usize = 2 + MODULE_COUNT * OUTPUT_COUNT;

const CMD_OUTPUTS: u8 = 0x05;

/// One observed output transition between two snapshots.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Change {
    pub module: u8,
    pub output: u8,
    pub old: u8,
    pub new: u8,
}

/// An instantaneous dump of all 128 output values, fixed at the moment of
/// reception. A new snapshot wholly supersedes the previous one.
///
/// Modules and outputs are 1-based in this API. Values are raw bus bytes;
/// whether a byte means on/off, a PWM level or a percent is a module-kind
/// question this type does not answer.
#[derive(Debug, Clone)]
pub struct Snapshot {
    outputs: [[u8; OUTPUT_COUNT]; MODULE_COUNT],
    received: DateTime<Utc>,
}

impl Snapshot {
    /// Decodes a decrypted 130-byte state message.
    pub fn decode(plain: &[u8], received: DateTime<Utc>) -> NetResult<Snapshot> {
        if plain.len() != SNAPSHOT_LEN {
            return Err(Error::Garbage(plain.len()));
        }
        if plain[0] != CMD_OUTPUTS {
            return Err(Error::Garbage(plain.len()));
        }

        let mut outputs = [[0u8; OUTPUT_COUNT]; MODULE_COUNT];
        for (module, row) in outputs.iter_mut().enumerate() {
            let offset = 2 + module * OUTPUT_COUNT;
            row.copy_from_slice(&plain[offset..offset + OUTPUT_COUNT]);
        }

        Ok(Snapshot { outputs, received })
    }

    /// Builds a snapshot directly from module rows.
    pub fn from_rows(outputs: [[u8; OUTPUT_COUNT]; MODULE_COUNT], received: DateTime<Utc>) -> Snapshot {
        Snapshot { outputs, received }
    }

    #[inline]
    fn index(module: u8, output: u8) -> NetResult<(usize, usize)> {
        if module < 1 || module as usize > MODULE_COUNT {
            return Err(Error::OutOfRange {
                what: "module",
                value: module as i64,
            });
        }
        if output < 1 || output as usize > OUTPUT_COUNT {
            return Err(Error::OutOfRange {
                what: "output",
                value: output as i64,
            });
        }
        Ok((module as usize - 1, output as usize - 1))
    }

    pub fn get(&self, module: u8, output: u8) -> NetResult<u8> {
        let (m, o) = Self::index(module, output)?;
        Ok(self.outputs[m][o])
    }

    pub fn set(&mut self, module: u8, output: u8, value: u8) -> NetResult<()> {
        let (m, o) = Self::index(module, output)?;
        self.outputs[m][o] = value;
        Ok(())
    }

    /// Copy of one module's eight output values.
    pub fn row(&self, module: u8) -> NetResult<[u8; OUTPUT_COUNT]> {
        let (m, _) = Self::index(module, 1)?;
        Ok(self.outputs[m])
    }

    pub fn is_on(&self, module: u8, output: u8) -> NetResult<bool> {
        Ok(self.get(module, output)? > 0)
    }

    /// All transitions from `previous` to this snapshot, in module/output
    /// order.
    pub fn diff(&self, previous: &Snapshot) -> Vec<Change> {
        let mut changes = Vec::new();

        for module in 0..MODULE_COUNT {
            for output in 0..OUTPUT_COUNT {
                let old = previous.outputs[module][output];
                let new = self.outputs[module][output];

                if old != new {
                    changes.push(Change {
                        module: (module + 1) as u8,
                        output: (output + 1) as u8,
                        old,
                        new,
                    });
                }
            }
        }

        changes
    }

    /// Number of outputs currently driven above zero.
    pub fn active_count(&self) -> usize {
        self.outputs
            .iter()
            .flat_map(|row| row.iter())
            .filter(|&&value| value > 0)
            .count()
    }

    #[inline]
    pub fn received(&self) -> DateTime<Utc> {
        self.received
    }

    #[inline]
    pub fn timestamp_iso(&self) -> String {
        time::to_iso(&self.received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_with(matrix: &[(usize, u8)]) -> Snapshot {
        let mut plain = vec![0u8; SNAPSHOT_LEN];
        plain[0] = CMD_OUTPUTS;
        plain[1] = 0x01;
        for &(offset, value) in matrix {
            plain[2 + offset] = value;
        }
        Snapshot::decode(&plain, Utc::now()).unwrap()
    }

    #[test]
    fn test_decode_single_active_output() {
        // Matrix offset 28 is module 4, output 5.
        let snapshot = decode_with(&[(28, 0xFF)]);

        assert_eq!(snapshot.get(4, 5).unwrap(), 255);
        assert_eq!(snapshot.active_count(), 1);

        for module in 1..=MODULE_COUNT as u8 {
            for output in 1..=OUTPUT_COUNT as u8 {
                if (module, output) != (4, 5) {
                    assert_eq!(snapshot.get(module, output).unwrap(), 0);
                }
            }
        }
    }

    #[test]
    fn test_diff_against_all_zero() {
        let zero = decode_with(&[]);
        let snapshot = decode_with(&[(28, 0xFF)]);

        let changes = snapshot.diff(&zero);

        assert_eq!(
            changes,
            vec![Change {
                module: 4,
                output: 5,
                old: 0,
                new: 255
            }]
        );
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let snapshot = decode_with(&[(3, 17), (100, 255)]);
        assert!(snapshot.clone().diff(&snapshot).is_empty());
    }

    #[test]
    fn test_bounds() {
        let snapshot = decode_with(&[]);

        assert!(snapshot.get(0, 1).is_err());
        assert!(snapshot.get(17, 1).is_err());
        assert!(snapshot.get(1, 0).is_err());
        assert!(snapshot.get(1, 9).is_err());

        assert!(snapshot.get(1, 1).is_ok());
        assert!(snapshot.get(16, 8).is_ok());
        assert!(snapshot.row(16).is_ok());
        assert!(snapshot.row(17).is_err());
    }

    #[test]
    fn test_set_and_row() {
        let mut snapshot = decode_with(&[]);
        snapshot.set(3, 2, 99).unwrap();

        let row = snapshot.row(3).unwrap();
        assert_eq!(row, [0, 99, 0, 0, 0, 0, 0, 0]);

        // The row is a copy; mutating it does not touch the snapshot.
        let mut copy = row;
        copy[0] = 1;
        assert_eq!(snapshot.get(3, 1).unwrap(), 0);
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        assert!(Snapshot::decode(&[0u8; 129], Utc::now()).is_err());

        let mut plain = vec![0u8; SNAPSHOT_LEN];
        plain[0] = 0x04;
        assert!(Snapshot::decode(&plain, Utc::now()).is_err());
    }
}
