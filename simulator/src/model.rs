#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Op {
    /// Read through the router; the oracle checks where it landed.
    Select,
    /// Write that changes one row.
    Write,
    /// Write that matches nothing.
    NoopWrite,
    /// Drop the handle and take a fresh one from the shared router.
    Renew,
    ToggleSticky,
    Ping,
    Sleep(u64),
}

/// What the simulator believes about one router handle.
#[derive(Debug, Clone)]
pub(crate) struct TaskState {
    pub(crate) id: usize,
    pub(crate) sticky: bool,
    pub(crate) modified: bool,
}

impl TaskState {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            sticky: true,
            modified: false,
        }
    }

    pub(crate) fn expects_writer(&self) -> bool {
        self.sticky && self.modified
    }

    /// Track the handle state after `op` succeeded.
    pub(crate) fn apply(&mut self, op: &Op) {
        match op {
            Op::Write => self.modified = true,
            Op::Renew => self.modified = false,
            Op::ToggleSticky => self.sticky = !self.sticky,
            Op::Select | Op::NoopWrite | Op::Ping | Op::Sleep(_) => {}
        }
    }
}
