use std::collections::BTreeMap;
use std::time::Duration;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use sql_rw_router::memory::{MemoryDriver, SERVER_COLUMN};
use sql_rw_router::{ResultSet, RowValues, RwRouter, SqlRouterError};
use tokio::runtime::Runtime;

use crate::args::SimConfig;
use crate::logging::EventLog;
use crate::model::{Op, TaskState};
use crate::oracle::Oracle;
use crate::scheduler::Scheduler;

const WRITE_ONE: &str = "UPDATE accounts SET balance = balance + 1 WHERE id = 1";
const WRITE_NONE: &str = "UPDATE accounts SET balance = balance + 1 WHERE id = 0";
const SELECT: &str = "SELECT balance FROM accounts WHERE id = 1";

struct Sim {
    driver: MemoryDriver,
    handles: Vec<RwRouter<MemoryDriver>>,
    readers: Vec<String>,
}

pub(crate) fn run(config: SimConfig, rng: &mut ChaCha8Rng) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            tracing::error!("failed to build runtime: {err}");
            std::process::exit(1);
        }
    };
    let mut sim = match runtime.block_on(open(&config)) {
        Ok(sim) => sim,
        Err(err) => {
            tracing::error!("failed to open router: {err}");
            std::process::exit(1);
        }
    };

    let mut tasks: Vec<TaskState> = (0..config.tasks).map(TaskState::new).collect();
    let mut scheduler = Scheduler::new(config.tasks);
    let mut events = EventLog::new(config.first_steps, config.tail_steps);

    let max_steps = config.iterations.unwrap_or(u64::MAX);
    let max_time = config.duration_ms.unwrap_or(u64::MAX);

    let mut step: u64 = 0;
    while step < max_steps && scheduler.clock.now_ms <= max_time {
        let Some(task_id) = scheduler.next_ready(rng) else {
            break;
        };
        let op = next_op(&config, rng);
        let outcome = sim.apply(&runtime, task_id, &op);

        let label = match &outcome {
            Ok(Some(server)) => server.clone(),
            Ok(None) => "-".to_string(),
            Err(err) => format!("Err({err})"),
        };
        events.record(format!(
            "step={step} time={}ms task={task_id} op={op:?} served_by={label}",
            scheduler.clock.now_ms
        ));

        let check = match outcome {
            Ok(Some(server)) => Oracle::check_read(&tasks[task_id], sim.readers.len(), &server),
            Ok(None) => Ok(()),
            Err(err) => Err(format!("task {task_id} {op:?} failed: {err}")),
        };
        if let Err(reason) = check.and_then(|()| Oracle::check_balance(&sim.reader_counts())) {
            events.dump_failure(&reason);
            std::process::exit(1);
        }

        tasks[task_id].apply(&op);
        if let Op::Sleep(ms) = op {
            scheduler.sleep(task_id, ms);
        } else {
            scheduler.mark_ready(task_id);
        }
        scheduler.advance_time(1);
        step += 1;
    }

    if let Err(err) = runtime.block_on(sim.handles[0].close()) {
        tracing::warn!("close failed: {err}");
    }
    tracing::info!(
        "complete: steps={} time={}ms tasks={} readers={} reads={:?}",
        step,
        scheduler.clock.now_ms,
        config.tasks,
        config.readers,
        sim.reader_counts()
    );
}

async fn open(config: &SimConfig) -> Result<Sim, SqlRouterError> {
    let driver = MemoryDriver::new()
        .with_rows_affected(WRITE_ONE, 1)
        .with_rows_affected(WRITE_NONE, 0);
    let descriptors = config.descriptors();
    let router = RwRouter::open(driver.clone(), &descriptors).await?;

    // Readers join in the background; the oracle assumes a settled pool.
    let settled = tokio::time::timeout(Duration::from_secs(5), async {
        while router.pool().size() < descriptors.len() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    if settled.is_err() {
        return Err(SqlRouterError::ConnectionError(
            "readers did not open in time".to_string(),
        ));
    }

    let handles = (0..config.tasks).map(|_| router.new_handle()).collect();
    Ok(Sim {
        driver,
        handles,
        readers: descriptors[1..].to_vec(),
    })
}

impl Sim {
    /// Run `op` on the task's handle. Reads report the server that answered.
    fn apply(
        &mut self,
        runtime: &Runtime,
        task_id: usize,
        op: &Op,
    ) -> Result<Option<String>, SqlRouterError> {
        let handle = &self.handles[task_id];
        match op {
            Op::Select => {
                let set = runtime.block_on(handle.query(SELECT, &[]))?;
                Ok(Some(served_by(&set)?))
            }
            Op::Write => {
                runtime.block_on(handle.execute(WRITE_ONE, &[]))?;
                Ok(None)
            }
            Op::NoopWrite => {
                runtime.block_on(handle.execute(WRITE_NONE, &[]))?;
                Ok(None)
            }
            Op::Renew => {
                // new handles inherit the sticky policy, not the modified flag
                let fresh = handle.new_handle();
                self.handles[task_id] = fresh;
                Ok(None)
            }
            Op::ToggleSticky => {
                handle.set_sticky(!handle.is_sticky());
                Ok(None)
            }
            Op::Ping => {
                runtime.block_on(handle.ping())?;
                Ok(None)
            }
            Op::Sleep(_) => Ok(None),
        }
    }

    fn reader_counts(&self) -> BTreeMap<String, usize> {
        self.readers
            .iter()
            .map(|name| (name.clone(), self.driver.stats(name).queries))
            .collect()
    }
}

fn served_by(set: &ResultSet) -> Result<String, SqlRouterError> {
    set.results
        .first()
        .and_then(|row| row.get(SERVER_COLUMN))
        .and_then(RowValues::as_text)
        .map(str::to_string)
        .ok_or_else(|| SqlRouterError::ExecutionError("answer without a server column".to_string()))
}

fn next_op(config: &SimConfig, rng: &mut ChaCha8Rng) -> Op {
    if rng.random::<f64>() < config.sleep_rate {
        return Op::Sleep(rng.random_range(1..=50));
    }
    let weights = [
        (Op::Write, config.write_rate),
        (Op::NoopWrite, config.noop_write_rate),
        (Op::Renew, config.renew_rate),
        (Op::ToggleSticky, config.toggle_sticky_rate),
        (Op::Ping, config.ping_rate),
    ];
    let reads = (1.0 - weights.iter().map(|(_, w)| w).sum::<f64>()).max(0.0);
    let mut items = weights.to_vec();
    items.push((Op::Select, reads));
    choose_weighted(&items, rng)
}

fn choose_weighted(items: &[(Op, f64)], rng: &mut ChaCha8Rng) -> Op {
    let total: f64 = items.iter().map(|(_, weight)| weight.max(0.0)).sum();
    if total <= f64::EPSILON {
        return Op::Select;
    }
    let mut target = rng.random::<f64>() * total;
    for (op, weight) in items {
        let w = weight.max(0.0);
        if target <= w {
            return op.clone();
        }
        target -= w;
    }
    items.last().map_or(Op::Select, |(op, _)| op.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn choose_weighted_skips_zero_weights() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let items = [(Op::Ping, 0.0), (Op::Write, 1.0)];
        for _ in 0..50 {
            assert_eq!(choose_weighted(&items, &mut rng), Op::Write);
        }
    }
}
