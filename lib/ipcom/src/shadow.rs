use crate::error::{Error, NetResult};
use crate::snapshot::{Snapshot, MODULE_COUNT, OUTPUT_COUNT};
use hashbrown::HashMap;

/// Client-side cache of the most recent commanded row per module.
///
/// The gateway only accepts full 8-value rows, so a single-output change
/// must carry the other seven values along. Reading those from the last
/// snapshot alone loses writes that the gateway has not reflected yet;
/// this table keeps the commanded rows until a fresh snapshot supersedes
/// them. At most one row per module is ever held.
pub struct PendingWrites {
    rows: HashMap<u8, [u8; OUTPUT_COUNT]>,
}

impl PendingWrites {
    #[inline]
    pub fn new() -> PendingWrites {
        PendingWrites {
            rows: HashMap::new(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[inline]
    pub fn row(&self, module: u8) -> Option<[u8; OUTPUT_COUNT]> {
        self.rows.get(&module).copied()
    }

    /// Applies one output change on top of the in-flight row for that
    /// module, falling back to the baseline snapshot when nothing is in
    /// flight. The merged row is recorded and returned; it is exactly what
    /// must go on the wire.
    pub fn plan(
        &mut self,
        module: u8,
        output: u8,
        value: u8,
        baseline: Option<&Snapshot>,
    ) -> NetResult<[u8; OUTPUT_COUNT]> {
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

        let mut row = match self.rows.get(&module) {
            Some(row) => *row,
            None => match baseline {
                Some(snapshot) => snapshot.row(module)?,
                None => return Err(Error::NoBaseline),
            },
        };

        row[output as usize - 1] = value;
        self.rows.insert(module, row);
        Ok(row)
    }

    /// Dropped wholesale whenever a fresh snapshot is accepted. The
    /// gateway's snapshot is authoritative, whether or not it reflects the
    /// writes yet.
    #[inline]
    pub fn clear(&mut self) {
        self.rows.clear();
    }
}
