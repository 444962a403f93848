#![cfg(unix)]

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tempfile::{TempDir, tempdir};

use mutation_harness::adapter::TapCommandAdapter;
use mutation_harness::collector::Collector;
use mutation_harness::config::RunConfig;
use mutation_harness::events::read_event_log;
use mutation_harness::mutant::Mutation;
use mutation_harness::observer::{RunObserver, UnitProgress};
use mutation_harness::orchestrator::{Orchestrator, RunError};
use mutation_harness::outcome::{MutantResult, Verdict};
use mutation_harness::process::ProcessStatus;
use mutation_harness::source::CatalogSource;
use mutation_harness::timer::RunTimer;

const COVERAGE: &str =
    r#"{"files": {"src/calc.rs": {"1": ["calc::adds"], "2": ["calc::subs"], "4": ["calc::muls"]}}}"#;

struct Project {
    dir: TempDir,
    adapter: TapCommandAdapter,
}

impl Project {
    fn spawn_log(&self) -> PathBuf {
        self.dir.path().join("spawns.log")
    }

    fn spawned_lines(&self) -> Vec<String> {
        fs::read_to_string(self.spawn_log())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn config(&self) -> RunConfig {
        RunConfig::default().with_project_dir(self.dir.path())
    }
}

// The fake runner writes coverage in baseline mode and picks its behaviour
// from the mutated snippet otherwise.
fn project(baseline: &str) -> Project {
    let dir = tempdir().expect("tempdir should be created");
    let spawn_log = dir.path().join("spawns.log");
    let script = format!(
        r#"if [ "$MUTATION_HARNESS_MODE" = "baseline" ]; then
  dirname "$MUTATION_HARNESS_COVERAGE" > '{scratch}'
  {baseline}
fi
echo "$MUTATION_HARNESS_LINE" >> '{log}'
case "$MUTATION_HARNESS_MUTATED" in
  kill) echo "not ok 1 - $MUTATION_HARNESS_TESTS"; exit 1 ;;
  escape) echo "ok 1 - $MUTATION_HARNESS_TESTS"; exit 0 ;;
  slow) sleep 0.4; echo "not ok 1"; exit 1 ;;
  hang) echo "ok 1"; exec sleep 5 ;;
  crash) echo "panicked at src/calc.rs" >&2; exit 101 ;;
esac
echo "Bail out! unknown mutation"
exit 1
"#,
        log = spawn_log.display(),
        scratch = dir.path().join("scratch.txt").display(),
    );
    let script_path = dir.path().join("run-tests.sh");
    fs::write(&script_path, script).expect("runner script should be written");

    let adapter = TapCommandAdapter::new("sh", vec![script_path.display().to_string()]);
    Project { dir, adapter }
}

fn passing_baseline() -> String {
    format!(
        "printf '%s' '{COVERAGE}' > \"$MUTATION_HARNESS_COVERAGE\"; echo 'ok 1 - calc::adds'; exit 0"
    )
}

fn mutation(line: u32, behaviour: &str) -> Mutation {
    Mutation::new("src/calc.rs", line, "binary-op", "a + b", behaviour)
}

#[derive(Default)]
struct Recorded {
    done: Vec<(u32, Verdict)>,
    shadows: usize,
    ended: usize,
}

struct Recorder(Rc<RefCell<Recorded>>);

impl RunObserver for Recorder {
    fn on_shadow_mutant(&mut self, _progress: UnitProgress) {
        self.0.borrow_mut().shadows += 1;
    }

    fn on_mutant_done(&mut self, result: &MutantResult, _progress: UnitProgress) {
        self.0
            .borrow_mut()
            .done
            .push((result.mutation.line, result.verdict));
    }

    fn on_end_run(&mut self, _collector: &Collector, _timer: &RunTimer) {
        self.0.borrow_mut().ended += 1;
    }
}

#[test]
fn covered_mutants_run_and_uncovered_ones_are_shadows() {
    let project = project(&passing_baseline());
    let mut source = CatalogSource::from_mutations([
        mutation(1, "kill"),
        mutation(2, "escape"),
        mutation(3, "kill"),
    ]);
    let recorded = Rc::new(RefCell::new(Recorded::default()));
    let mut orchestrator =
        Orchestrator::new(project.config().with_parallelism(2), source.units());
    orchestrator.add_observer(Box::new(Recorder(Rc::clone(&recorded))));

    let report = orchestrator
        .execute(&project.adapter, &mut source)
        .expect("run should succeed");

    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.kills, 1);
    assert_eq!(report.summary.escapes, 1);
    assert_eq!(report.summary.notests, 1);
    assert_eq!(report.summary.covered_score, 50);
    assert!(!report.interrupted);

    let mut spawned = project.spawned_lines();
    spawned.sort();
    assert_eq!(spawned, vec!["1", "2"]);

    let recorded = recorded.borrow();
    assert_eq!(recorded.shadows, 1);
    assert_eq!(recorded.ended, 1);
    assert_eq!(
        orchestrator.collector().escaped()[0].tests,
        vec!["calc::subs".to_string()]
    );
}

#[test]
fn results_follow_batch_order_not_completion_order() {
    let project = project(&passing_baseline());
    let mut source = CatalogSource::from_mutations([mutation(1, "slow"), mutation(2, "kill")]);
    let recorded = Rc::new(RefCell::new(Recorded::default()));
    let mut orchestrator =
        Orchestrator::new(project.config().with_parallelism(2), source.units());
    orchestrator.add_observer(Box::new(Recorder(Rc::clone(&recorded))));

    orchestrator
        .execute(&project.adapter, &mut source)
        .expect("run should succeed");

    assert_eq!(
        recorded.borrow().done,
        vec![(1, Verdict::Kill), (2, Verdict::Kill)]
    );
}

#[test]
fn hung_mutant_times_out_while_failing_one_is_killed() {
    let project = project(&passing_baseline());
    let mut source = CatalogSource::from_mutations([mutation(1, "hang"), mutation(2, "kill")]);
    let mut orchestrator = Orchestrator::new(
        project.config().with_parallelism(2).with_timeout_ms(300),
        source.units(),
    );

    let report = orchestrator
        .execute(&project.adapter, &mut source)
        .expect("run should succeed");

    assert_eq!(report.summary.timeouts, 1);
    assert_eq!(report.summary.kills, 1);
    assert_eq!(orchestrator.collector().timed_out()[0].mutation.line, 1);
}

#[test]
fn error_output_classifies_as_error() {
    let project = project(&passing_baseline());
    let mut source = CatalogSource::from_mutations([mutation(4, "crash")]);
    let mut orchestrator = Orchestrator::new(project.config(), source.units());

    let report = orchestrator
        .execute(&project.adapter, &mut source)
        .expect("run should succeed");

    assert_eq!(report.summary.errors, 1);
    let errored = &orchestrator.collector().errored()[0];
    assert_eq!(errored.exit_code, Some(101));
    assert!(errored.error_output.contains("panicked"));
}

#[test]
fn failing_baseline_aborts_before_any_mutant() {
    let project = project("echo 'not ok 1 - calc::adds'; exit 1");
    let mut source = CatalogSource::from_mutations([mutation(1, "kill")]);
    let recorded = Rc::new(RefCell::new(Recorded::default()));
    let mut orchestrator = Orchestrator::new(project.config(), source.units());
    orchestrator.add_observer(Box::new(Recorder(Rc::clone(&recorded))));

    let err = orchestrator
        .execute(&project.adapter, &mut source)
        .expect_err("baseline should fail");

    let failure = match err {
        RunError::BaselineFailed(failure) => failure,
        other => panic!("expected baseline failure, got {other:?}"),
    };
    assert_eq!(failure.status, ProcessStatus::Failed);
    assert_eq!(failure.exit_code, Some(1));
    assert!(failure.output.contains("not ok 1"));

    assert_eq!(orchestrator.collector().total(), 0);
    assert!(project.spawned_lines().is_empty());
    let recorded = recorded.borrow();
    assert_eq!((recorded.done.len(), recorded.shadows, recorded.ended), (0, 0, 0));
}

#[test]
fn missing_coverage_artifact_is_fatal() {
    let project = project("echo 'ok 1'; exit 0");
    let mut source = CatalogSource::from_mutations([mutation(1, "kill")]);
    let mut orchestrator = Orchestrator::new(project.config(), source.units());

    let err = orchestrator
        .execute(&project.adapter, &mut source)
        .expect_err("missing coverage should fail");
    assert!(matches!(err, RunError::Coverage(_)));
    assert!(project.spawned_lines().is_empty());
}

#[test]
fn cancel_flag_stops_before_the_next_batch() {
    struct CancelAfterFirst(Arc<AtomicBool>);

    impl RunObserver for CancelAfterFirst {
        fn on_mutant_done(&mut self, _result: &MutantResult, _progress: UnitProgress) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    let project = project(&passing_baseline());
    let mut source = CatalogSource::from_mutations([
        mutation(1, "kill"),
        mutation(2, "kill"),
        mutation(4, "kill"),
    ]);
    let cancel = Arc::new(AtomicBool::new(false));
    let recorded = Rc::new(RefCell::new(Recorded::default()));
    let mut orchestrator = Orchestrator::new(project.config(), source.units())
        .with_cancel_flag(Arc::clone(&cancel));
    orchestrator.add_observer(Box::new(CancelAfterFirst(Arc::clone(&cancel))));
    orchestrator.add_observer(Box::new(Recorder(Rc::clone(&recorded))));

    let report = orchestrator
        .execute(&project.adapter, &mut source)
        .expect("cancelled run should still report");

    assert!(report.interrupted);
    assert_eq!(report.summary.total, 1);
    assert_eq!(project.spawned_lines(), vec!["1"]);
    assert_eq!(recorded.borrow().ended, 1);
}

#[test]
fn explicit_coverage_path_is_kept_and_logs_are_written() {
    let project = project(&passing_baseline());
    let coverage_path = project.dir.path().join("coverage.json");
    let log_json = project.dir.path().join("logs.json");
    let log_text = project.dir.path().join("logs.txt");
    let event_log = project.dir.path().join("events.jsonl");
    let mut source = CatalogSource::from_mutations([mutation(1, "kill"), mutation(2, "escape")]);
    let config = project
        .config()
        .with_coverage_path(&coverage_path)
        .with_log_json(&log_json)
        .with_log_text(&log_text)
        .with_event_log(&event_log);
    let mut orchestrator = Orchestrator::new(config, source.units());

    let report = orchestrator
        .execute(&project.adapter, &mut source)
        .expect("run should succeed");

    assert!(coverage_path.exists());

    let json: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(&log_json).expect("json log should be written"),
    )
    .expect("json log should parse");
    assert_eq!(json["summary"]["kills"], 1);
    assert_eq!(json["escaped"][0]["line"], 2);

    let text = fs::read_to_string(&log_text).expect("text log should be written");
    assert!(text.contains("src/calc.rs:2: binary-op"));

    let snapshot = read_event_log(&event_log).expect("event log should replay");
    assert!(snapshot.completed);
    assert_eq!(snapshot.collector.summary(), report.summary);
}

#[test]
fn scratch_coverage_directory_is_removed_after_run() {
    let project = project(&passing_baseline());
    let mut source = CatalogSource::from_mutations([mutation(1, "kill")]);
    let mut orchestrator = Orchestrator::new(project.config(), source.units());

    orchestrator
        .execute(&project.adapter, &mut source)
        .expect("run should succeed");

    let scratch = fs::read_to_string(project.dir.path().join("scratch.txt"))
        .expect("baseline should record its coverage directory");
    let scratch = Path::new(scratch.trim());
    assert_ne!(scratch, project.dir.path());
    assert!(!scratch.exists());
}
