use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Deterministic sql-rw-router simulator")]
pub(crate) struct Args {
    #[arg(long, value_parser = humantime::parse_duration)]
    pub(crate) duration: Option<Duration>,
    #[arg(long)]
    pub(crate) iterations: Option<u64>,
    #[arg(long)]
    pub(crate) seed: Option<u64>,
    /// Number of reader data sources behind the writer.
    #[arg(long, default_value_t = 3)]
    pub(crate) readers: usize,
    /// Number of router handles sharing the pool.
    #[arg(long, default_value_t = 16)]
    pub(crate) tasks: usize,
    #[arg(long, default_value_t = 0.15)]
    pub(crate) write_rate: f64,
    #[arg(long, default_value_t = 0.05)]
    pub(crate) noop_write_rate: f64,
    #[arg(long, default_value_t = 0.03)]
    pub(crate) renew_rate: f64,
    #[arg(long, default_value_t = 0.02)]
    pub(crate) toggle_sticky_rate: f64,
    #[arg(long, default_value_t = 0.01)]
    pub(crate) ping_rate: f64,
    #[arg(long, default_value_t = 0.05)]
    pub(crate) sleep_rate: f64,
    #[arg(long)]
    pub(crate) log: Option<PathBuf>,
    #[arg(long)]
    pub(crate) quick: bool,
    #[arg(long)]
    pub(crate) stress: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SimConfig {
    pub(crate) duration_ms: Option<u64>,
    pub(crate) iterations: Option<u64>,
    pub(crate) seed: u64,
    pub(crate) readers: usize,
    pub(crate) tasks: usize,
    pub(crate) write_rate: f64,
    pub(crate) noop_write_rate: f64,
    pub(crate) renew_rate: f64,
    pub(crate) toggle_sticky_rate: f64,
    pub(crate) ping_rate: f64,
    pub(crate) sleep_rate: f64,
    pub(crate) log: Option<PathBuf>,
    pub(crate) preset: Option<String>,
    pub(crate) first_steps: usize,
    pub(crate) tail_steps: usize,
}

impl SimConfig {
    pub(crate) fn from_args(args: Args) -> Self {
        let mut config = SimConfig {
            duration_ms: args.duration.map(|d| d.as_millis() as u64),
            iterations: args.iterations,
            seed: args.seed.unwrap_or_else(random_seed),
            readers: args.readers,
            tasks: args.tasks.max(1),
            write_rate: clamp_rate(args.write_rate),
            noop_write_rate: clamp_rate(args.noop_write_rate),
            renew_rate: clamp_rate(args.renew_rate),
            toggle_sticky_rate: clamp_rate(args.toggle_sticky_rate),
            ping_rate: clamp_rate(args.ping_rate),
            sleep_rate: clamp_rate(args.sleep_rate),
            log: args.log,
            preset: None,
            first_steps: 30,
            tail_steps: 80,
        };

        if args.quick {
            config.apply_quick();
        }
        if args.stress {
            config.apply_stress();
        }

        config
    }

    /// Descriptors handed to the router: the writer first, then every reader.
    pub(crate) fn descriptors(&self) -> Vec<String> {
        std::iter::once("primary".to_string())
            .chain((0..self.readers).map(|i| format!("replica{i}")))
            .collect()
    }

    fn apply_quick(&mut self) {
        self.preset = Some("quick".to_string());
        self.iterations = Some(10_000);
        self.duration_ms = None;
        self.readers = 2;
        self.tasks = 4;
        self.write_rate = 0.10;
        self.renew_rate = 0.05;
    }

    fn apply_stress(&mut self) {
        self.preset = Some("stress".to_string());
        self.iterations = Some(250_000);
        self.duration_ms = None;
        self.readers = 7;
        self.tasks = 64;
        self.write_rate = 0.25;
        self.noop_write_rate = 0.10;
        self.renew_rate = 0.02;
        self.toggle_sticky_rate = 0.05;
        self.ping_rate = 0.02;
        self.sleep_rate = 0.08;
    }
}

fn clamp_rate(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

fn random_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    now.as_secs() ^ (now.subsec_nanos() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_rate_limits_bounds() {
        assert_eq!(clamp_rate(-1.0), 0.0);
        assert_eq!(clamp_rate(2.0), 1.0);
        assert_eq!(clamp_rate(f64::NAN), 0.0);
        assert_eq!(clamp_rate(0.5), 0.5);
    }

    #[test]
    fn descriptors_start_with_the_writer() {
        let args = Args::parse_from(["simulator", "--readers", "2", "--seed", "7"]);
        let config = SimConfig::from_args(args);
        assert_eq!(config.seed, 7);
        assert_eq!(config.descriptors(), ["primary", "replica0", "replica1"]);
    }
}
