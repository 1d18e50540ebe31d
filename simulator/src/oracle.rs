use std::collections::BTreeMap;

use crate::model::TaskState;

pub(crate) const WRITER: &str = "primary";

pub(crate) struct Oracle;

impl Oracle {
    /// A read must hit the writer exactly when the handle is sticky and modified,
    /// or when there is no reader to serve it.
    pub(crate) fn check_read(task: &TaskState, readers: usize, server: &str) -> Result<(), String> {
        let on_writer = server == WRITER;
        let want_writer = task.expects_writer() || readers == 0;
        match (want_writer, on_writer) {
            (true, false) => Err(format!(
                "task {} is sticky and modified but read from {server}",
                task.id
            )),
            (false, true) => Err(format!(
                "task {} read from the writer without having written (sticky={})",
                task.id, task.sticky
            )),
            _ => Ok(()),
        }
    }

    /// Reads handed out by the rotation never differ by more than one across readers.
    pub(crate) fn check_balance(counts: &BTreeMap<String, usize>) -> Result<(), String> {
        let (Some(min), Some(max)) = (counts.values().min(), counts.values().max()) else {
            return Ok(());
        };
        if max - min > 1 {
            return Err(format!("reader rotation is unbalanced: {counts:?}"));
        }
        Ok(())
    }
}
