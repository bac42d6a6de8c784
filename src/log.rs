//! Command-log contract. Prepare appends every materialized command in
//! order; recovery replays them through `WriteTransaction::inject_command`.
//! The on-disk format belongs to the surrounding log framework, so the
//! implementation here is an ordered in-memory buffer that doubles as the
//! replay source in tests and recovery drills.

use parking_lot::Mutex;

use crate::error::Result;
use crate::tx::command::Command;

pub trait LogSink: Send + Sync {
    fn append_command(&self, identifier: u64, command: &Command) -> Result<()>;
}

/// Ordered in-memory command log, grouped by transaction identifier.
#[derive(Default)]
pub struct CommandLog {
    entries: Mutex<Vec<(u64, Command)>>,
}

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands_for(&self, identifier: u64) -> Vec<Command> {
        self.entries
            .lock()
            .iter()
            .filter(|(id, _)| *id == identifier)
            .map(|(_, command)| command.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl LogSink for CommandLog {
    fn append_command(&self, identifier: u64, command: &Command) -> Result<()> {
        self.entries.lock().push((identifier, command.clone()));
        Ok(())
    }
}
