//! Simulate command implementation.
//!
//! Replays a scenario of window resizes against a manual clock. Each
//! window has a client that acknowledges configures after a fixed latency,
//! or never.

use lockstep_core::objects::{Configure, Geometry, Gravity, Margins, Toplevel};
use lockstep_core::{
    Config, ManualClock, ObjectRef, Outcome, SharedConfig, StatsSnapshot, TransactionEvent,
    TransactionId, TransactionManager, TxnError,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

/// Errors from loading or running a scenario.
#[derive(Debug, thiserror::Error)]
pub enum SimulateError {
    /// The scenario file could not be read.
    #[error("failed to read scenario {path}: {source}")]
    Io {
        /// Scenario path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The scenario is not valid JSON or has the wrong shape.
    #[error("invalid scenario: {0}")]
    Parse(#[from] serde_json::Error),

    /// A step refers to a window the scenario does not declare.
    #[error("step at {at_ms}ms resizes unknown window '{window}'")]
    UnknownWindow {
        /// Step time.
        at_ms: u64,
        /// Window id.
        window: String,
    },

    /// The transaction core rejected an operation.
    #[error(transparent)]
    Core(#[from] TxnError),
}

/// A scenario file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Commit timeout; the library default if omitted.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Windows and their clients.
    pub windows: Vec<WindowSpec>,
    /// Resizes, each submitted as one transaction.
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// A window and its client.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowSpec {
    /// Window id.
    pub id: String,
    /// Initial frame geometry.
    pub geometry: Geometry,
    /// Client latency; an unresponsive client if omitted.
    #[serde(default)]
    pub latency_ms: Option<u64>,
    /// Decoration margins.
    #[serde(default)]
    pub margins: Margins,
    /// When the client goes away.
    #[serde(default)]
    pub unmap_at_ms: Option<u64>,
}

/// One transaction.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    /// Submission time.
    pub at_ms: u64,
    /// Windows to resize together.
    pub resize: Vec<Resize>,
}

/// New geometry for one window.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resize {
    /// Window id.
    pub window: String,
    /// Target frame geometry.
    pub geometry: Geometry,
    /// Edges to keep if the client picks another size.
    #[serde(default)]
    pub gravity: Gravity,
}

impl Scenario {
    /// Loads a scenario from a JSON file.
    pub fn load(path: &Path) -> Result<Self, SimulateError> {
        let text = std::fs::read_to_string(path).map_err(|source| SimulateError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Two well-behaved clients, one frozen client, a conflicting resize
    /// and a merge.
    pub fn builtin() -> Self {
        let window = |id: &str, geometry, latency_ms| WindowSpec {
            id: id.to_owned(),
            geometry,
            latency_ms,
            margins: Margins::default(),
            unmap_at_ms: None,
        };
        let resize = |window: &str, geometry| Resize {
            window: window.to_owned(),
            geometry,
            gravity: Gravity::default(),
        };

        Self {
            timeout_ms: Some(100),
            windows: vec![
                window("terminal", Geometry::new(0, 0, 800, 600), Some(8)),
                window("browser", Geometry::new(800, 0, 800, 600), Some(40)),
                window("frozen", Geometry::new(0, 600, 800, 400), None),
            ],
            steps: vec![
                Step {
                    at_ms: 0,
                    resize: vec![
                        resize("terminal", Geometry::new(0, 0, 960, 1080)),
                        resize("browser", Geometry::new(960, 0, 960, 1080)),
                    ],
                },
                Step {
                    at_ms: 20,
                    resize: vec![resize("browser", Geometry::new(960, 0, 960, 540))],
                },
                Step {
                    at_ms: 30,
                    resize: vec![
                        resize("frozen", Geometry::new(0, 540, 960, 540)),
                        resize("terminal", Geometry::new(0, 0, 960, 540)),
                    ],
                },
                Step {
                    at_ms: 35,
                    resize: vec![resize("browser", Geometry::new(960, 540, 960, 540))],
                },
            ],
        }
    }
}

/// What happened to one submitted transaction.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionReport {
    /// Transaction id.
    pub id: TransactionId,
    /// Windows it touched when it was committed (or submitted, if merged).
    pub objects: Vec<String>,
    /// Submission time.
    pub submitted_ms: u64,
    /// Commit time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed_ms: Option<u64>,
    /// Apply time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done_ms: Option<u64>,
    /// How it finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    /// The queued transaction that absorbed it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_into: Option<TransactionId>,
}

/// Final state of one window.
#[derive(Debug, Clone, Serialize)]
pub struct WindowReport {
    /// Window id.
    pub id: String,
    /// Geometry on screen.
    pub geometry: Geometry,
    /// Whether the client is still there.
    pub mapped: bool,
}

/// Simulation result.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Commit timeout used.
    pub timeout_ms: u64,
    /// Simulated time until everything settled.
    pub duration_ms: u64,
    /// Every submitted transaction, by id.
    pub transactions: Vec<TransactionReport>,
    /// Every window.
    pub windows: Vec<WindowReport>,
    /// Manager counters.
    pub stats: StatsSnapshot,
}

struct Window {
    spec: WindowSpec,
    toplevel: Arc<Mutex<Toplevel>>,
    /// Acks the client will send, with their delivery time.
    acks: Vec<(u64, Configure)>,
}

struct Simulation {
    manager: TransactionManager,
    clock: ManualClock,
    events: Receiver<TransactionEvent>,
    windows: Vec<Window>,
    reports: BTreeMap<TransactionId, TransactionReport>,
    now_ms: u64,
}

impl Simulation {
    fn new(scenario: &Scenario, timeout_ms: u64) -> Result<Self, SimulateError> {
        let config = Config::new().transaction_timeout(Duration::from_millis(timeout_ms));
        let clock = ManualClock::new();
        let manager = TransactionManager::with_clock(SharedConfig::new(config)?, clock.clone());
        let events = manager.subscribe();

        let windows = scenario
            .windows
            .iter()
            .map(|spec| {
                let mut toplevel = Toplevel::new(spec.id.as_str(), spec.geometry);
                toplevel.set_margins(spec.margins);
                Window {
                    spec: spec.clone(),
                    toplevel: Arc::new(Mutex::new(toplevel)),
                    acks: Vec::new(),
                }
            })
            .collect();

        Ok(Self {
            manager,
            clock,
            events,
            windows,
            reports: BTreeMap::new(),
            now_ms: 0,
        })
    }

    fn window(&self, id: &str) -> Option<&Window> {
        self.windows.iter().find(|window| window.spec.id == id)
    }

    fn submit(&mut self, step: &Step) -> Result<(), SimulateError> {
        let mut txn = self.manager.begin();
        for resize in &step.resize {
            let window = self.window(&resize.window).ok_or_else(|| SimulateError::UnknownWindow {
                at_ms: step.at_ms,
                window: resize.window.clone(),
            })?;
            {
                let mut toplevel = window.toplevel.lock();
                let pending = toplevel.pending_mut();
                pending.geometry = resize.geometry;
                pending.gravity = resize.gravity;
            }
            let object: ObjectRef = window.toplevel.clone();
            txn.add_object(&object)?;
        }

        let id = txn.id();
        self.reports.insert(
            id,
            TransactionReport {
                id,
                objects: step.resize.iter().map(|r| r.window.clone()).collect(),
                submitted_ms: self.now_ms,
                committed_ms: None,
                done_ms: None,
                outcome: None,
                merged_into: None,
            },
        );
        tracing::info!(txn = %id, at_ms = self.now_ms, "submitting resize");
        self.manager.submit(txn)?;
        self.collect_events();
        Ok(())
    }

    /// Delivers configures and due acks until nothing changes.
    fn exchange(&mut self) {
        loop {
            let now = self.now_ms;
            let mut delivered = false;
            for window in &mut self.windows {
                let configures = window.toplevel.lock().take_configures();
                if let Some(latency) = window.spec.latency_ms {
                    window
                        .acks
                        .extend(configures.into_iter().map(|c| (now + latency, c)));
                }

                let (due, later): (Vec<_>, Vec<_>) =
                    window.acks.drain(..).partition(|(at, _)| *at <= now);
                window.acks = later;
                for (_, configure) in due {
                    window
                        .toplevel
                        .lock()
                        .ack_configure(configure.serial, configure.size);
                    delivered = true;
                }
            }

            self.manager.dispatch();
            self.collect_events();
            if !delivered {
                return;
            }
        }
    }

    fn collect_events(&mut self) {
        let now = self.now_ms;
        for event in self.events.try_iter() {
            let Some(report) = self.reports.get_mut(&event.id()) else {
                continue;
            };
            match event {
                TransactionEvent::Scheduled { .. } => {}
                TransactionEvent::Merged { into, .. } => report.merged_into = Some(into),
                TransactionEvent::Committed { objects, .. } => {
                    report.committed_ms = Some(now);
                    report.objects = objects.iter().map(ToString::to_string).collect();
                }
                TransactionEvent::Done { outcome, .. } => {
                    report.done_ms = Some(now);
                    report.outcome = Some(outcome);
                }
            }
        }
    }

    fn run(mut self, scenario: &Scenario, timeout_ms: u64) -> Result<SimulationReport, SimulateError> {
        let last_input = scenario
            .steps
            .iter()
            .map(|step| step.at_ms)
            .chain(scenario.windows.iter().filter_map(|w| w.unmap_at_ms))
            .max()
            .unwrap_or(0);
        let slowest = scenario
            .windows
            .iter()
            .filter_map(|w| w.latency_ms)
            .max()
            .unwrap_or(0);
        // Each queued transaction waits at most one timeout per predecessor.
        let horizon = last_input
            .saturating_add(timeout_ms.saturating_mul(scenario.steps.len() as u64 + 1))
            .saturating_add(slowest);

        for now in 0..=horizon {
            if now > 0 {
                self.clock.advance(Duration::from_millis(1));
            }
            self.now_ms = now;
            self.manager.dispatch();
            self.collect_events();

            for step in scenario.steps.iter().filter(|step| step.at_ms == now) {
                self.submit(step)?;
            }
            for window in &self.windows {
                if window.spec.unmap_at_ms == Some(now) {
                    tracing::info!(window = %window.spec.id, at_ms = now, "client gone");
                    window.toplevel.lock().unmap();
                }
            }
            self.exchange();

            if now >= last_input && self.manager.is_idle() {
                break;
            }
        }

        if !self.manager.is_idle() {
            tracing::warn!(at_ms = self.now_ms, "simulation stopped with transactions in flight");
        }

        let windows = self
            .windows
            .iter()
            .map(|window| {
                let toplevel = window.toplevel.lock();
                WindowReport {
                    id: window.spec.id.clone(),
                    geometry: toplevel.current().geometry,
                    mapped: toplevel.is_mapped(),
                }
            })
            .collect();

        Ok(SimulationReport {
            timeout_ms,
            duration_ms: self.now_ms,
            transactions: self.reports.into_values().collect(),
            windows,
            stats: self.manager.stats().snapshot(),
        })
    }
}

/// Runs `scenario` to completion.
pub fn simulate(
    scenario: &Scenario,
    timeout_override: Option<u64>,
) -> Result<SimulationReport, SimulateError> {
    for step in &scenario.steps {
        for resize in &step.resize {
            if !scenario.windows.iter().any(|w| w.id == resize.window) {
                return Err(SimulateError::UnknownWindow {
                    at_ms: step.at_ms,
                    window: resize.window.clone(),
                });
            }
        }
    }

    let timeout_ms = timeout_override
        .or(scenario.timeout_ms)
        .unwrap_or(Config::default().transaction_timeout_ms);
    Simulation::new(scenario, timeout_ms)?.run(scenario, timeout_ms)
}

/// Runs the simulate command.
pub fn run(
    scenario: Option<&Path>,
    timeout_ms: Option<u64>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = match scenario {
        Some(path) => Scenario::load(path)?,
        None => Scenario::builtin(),
    };
    let report = simulate(&scenario, timeout_ms)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    Ok(())
}

fn print_text_output(report: &SimulationReport) {
    println!("=== Simulation ===");
    println!("Timeout: {}ms", report.timeout_ms);
    println!("Settled after: {}ms", report.duration_ms);
    println!();

    println!("Transactions:");
    for txn in &report.transactions {
        let status = match (txn.merged_into, txn.outcome) {
            (Some(into), _) => format!("merged into {into}"),
            (None, Some(Outcome::Converged)) => "converged".to_owned(),
            (None, Some(Outcome::TimedOut)) => "timed out".to_owned(),
            (None, None) => "unfinished".to_owned(),
        };
        let timing = match (txn.committed_ms, txn.done_ms) {
            (Some(committed), Some(done)) => {
                format!("committed {committed}ms, applied {done}ms")
            }
            (Some(committed), None) => format!("committed {committed}ms"),
            _ => String::new(),
        };
        println!(
            "  {:<8} [{}] submitted {}ms, {} {}",
            txn.id.to_string(),
            txn.objects.join(", "),
            txn.submitted_ms,
            status,
            timing
        );
    }
    println!();

    println!("Windows:");
    for window in &report.windows {
        let state = if window.mapped { "" } else { " (unmapped)" };
        println!("  {:<12} {}{}", window.id, window.geometry, state);
    }
    println!();

    let stats = &report.stats;
    println!(
        "Stats: {} submitted, {} merged, {} converged, {} timed out, {} stale answers",
        stats.submitted, stats.merged, stats.converged, stats.timed_out, stats.stale_signals
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn report_for(report: &SimulationReport, id: u64) -> &TransactionReport {
        report
            .transactions
            .iter()
            .find(|txn| txn.id == TransactionId::new(id))
            .unwrap()
    }

    #[test]
    fn builtin_scenario_settles() {
        let report = simulate(&Scenario::builtin(), None).unwrap();

        let first = report_for(&report, 1);
        assert_eq!(first.outcome, Some(Outcome::Converged));
        assert_eq!(first.done_ms, Some(40));

        let queued = report_for(&report, 2);
        assert_eq!(queued.committed_ms, Some(40));
        assert_eq!(queued.done_ms, Some(80));
        assert_eq!(queued.outcome, Some(Outcome::Converged));

        let frozen = report_for(&report, 3);
        assert_eq!(frozen.outcome, Some(Outcome::TimedOut));
        assert_eq!(frozen.done_ms, Some(140));

        let merged = report_for(&report, 4);
        assert_eq!(merged.merged_into, Some(TransactionId::new(2)));

        assert_eq!(report.duration_ms, 140);
        let browser = report.windows.iter().find(|w| w.id == "browser").unwrap();
        assert_eq!(browser.geometry, Geometry::new(960, 540, 960, 540));
        assert_eq!(report.stats.timed_out, 1);
    }

    #[test]
    fn scenario_file_with_timeout_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "windows": [{{"id": "slow", "geometry": {{"x": 0, "y": 0, "width": 100, "height": 100}}}}],
                "steps": [{{"at_ms": 5, "resize": [{{"window": "slow", "geometry": {{"x": 0, "y": 0, "width": 200, "height": 100}}}}]}}]
            }}"#
        )
        .unwrap();

        let scenario = Scenario::load(file.path()).unwrap();
        let report = simulate(&scenario, Some(30)).unwrap();

        let txn = report_for(&report, 1);
        assert_eq!(txn.outcome, Some(Outcome::TimedOut));
        assert_eq!(txn.done_ms, Some(35));
        assert_eq!(report.windows[0].geometry.width, 200);
    }

    #[test]
    fn unmapped_client_releases_its_commit() {
        let scenario: Scenario = serde_json::from_str(
            r#"{
                "timeout_ms": 500,
                "windows": [{"id": "gone", "geometry": {"x": 0, "y": 0, "width": 100, "height": 100}, "unmap_at_ms": 10}],
                "steps": [{"at_ms": 0, "resize": [{"window": "gone", "geometry": {"x": 5, "y": 5, "width": 300, "height": 300}}]}]
            }"#,
        )
        .unwrap();
        let report = simulate(&scenario, None).unwrap();

        let txn = report_for(&report, 1);
        assert_eq!(txn.outcome, Some(Outcome::Converged));
        assert_eq!(txn.done_ms, Some(10));
        assert!(!report.windows[0].mapped);
        assert_eq!(report.windows[0].geometry, Geometry::new(5, 5, 100, 100));
    }

    #[test]
    fn unknown_window_is_rejected() {
        let scenario: Scenario = serde_json::from_str(
            r#"{"windows": [], "steps": [{"at_ms": 3, "resize": [{"window": "ghost", "geometry": {"x": 0, "y": 0, "width": 1, "height": 1}}]}]}"#,
        )
        .unwrap();

        let err = simulate(&scenario, None).unwrap_err();
        assert!(matches!(err, SimulateError::UnknownWindow { at_ms: 3, .. }));
    }

    #[test]
    fn oversized_timeout_is_an_error() {
        let err = simulate(&Scenario::builtin(), Some(u64::MAX)).unwrap_err();
        assert!(matches!(
            err,
            SimulateError::Core(TxnError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Scenario::load(Path::new("/nonexistent/scenario.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/scenario.json"));
    }

    #[test]
    fn report_serializes_outcomes() {
        let report = simulate(&Scenario::builtin(), None).unwrap();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains(r#""outcome":"timed_out""#));
        assert!(json.contains(r#""merged_into":2"#));
    }
}
