//! Execution driver against the simulated cluster.

mod common;

use std::fs;
use std::path::Path;
use std::time::Duration;

use jobwave_core::config::RunConfig;
use jobwave_core::error::{Error, Result};
use jobwave_core::id::{JobId, NodeId};
use jobwave_exec::simulated::SUCCESS_MARKER;
use jobwave_exec::{
    ExecError, ExecutionSubstrate, FsCommitter, JobControlCompiler, JobScript, JobStatus,
    Launcher, NoopCommitter, SimulatedCluster, Wave, WaveCompiler,
};
use jobwave_planner::{compile, JobGraph};

fn launcher(config: RunConfig) -> Launcher {
    Launcher::new(config).with_poll_interval(Duration::ZERO)
}

fn scratch(name: &str) -> std::path::PathBuf {
    let root = std::env::temp_dir().join(format!("jobwave-{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&root);
    root
}

fn run(
    plan: &jobwave_core::plan::PhysicalPlan,
    cluster: &mut SimulatedCluster,
) -> jobwave_exec::RunOutcome {
    launcher(RunConfig::default())
        .launch_plan(plan, "test", Box::new(NoopCommitter), cluster)
        .unwrap()
}

#[test]
fn chain_runs_in_three_waves_of_one() {
    let mut cluster = SimulatedCluster::new();
    let outcome = run(&common::chain_of_three(), &mut cluster);

    assert!(outcome.succeeded());
    assert_eq!(outcome.waves.len(), 3);
    assert!(outcome.waves.iter().all(|w| w.len() == 1));
    assert_eq!(cluster.submitted_jobs(), 3);
}

#[test]
fn fan_in_runs_in_two_waves() {
    let mut cluster = SimulatedCluster::new();
    let outcome = run(&common::fan_in(), &mut cluster);

    assert!(outcome.succeeded());
    assert_eq!(
        outcome.waves,
        vec![vec![JobId::new(0), JobId::new(1)], vec![JobId::new(2)]]
    );
}

#[test]
fn every_node_is_submitted_once_after_its_predecessors() {
    let plan = common::mixed();
    let graph = compile(&plan, &RunConfig::default()).unwrap();
    let mut cluster = SimulatedCluster::new();
    let outcome = run(&plan, &mut cluster);
    assert!(outcome.succeeded());
    assert_eq!(cluster.submitted_jobs(), graph.len());

    let mut wave_of = vec![usize::MAX; graph.len()];
    for (w, jobs) in cluster.submissions().iter().enumerate() {
        for job in jobs {
            let node = cluster.node_of(*job).unwrap();
            assert_eq!(wave_of[node.index()], usize::MAX, "{node} submitted twice");
            wave_of[node.index()] = w;
        }
    }
    for (from, to) in graph.edges() {
        assert!(wave_of[from.index()] < wave_of[to.index()]);
    }
}

#[test]
fn progress_is_monotonic_and_capped_until_the_end() {
    let mut cluster = SimulatedCluster::new().with_default_script(JobScript {
        ticks: 7,
        ..Default::default()
    });
    let outcome = run(&common::chain_of_three(), &mut cluster);

    let cap = 2.0 / 3.0;
    assert!(!outcome.progress.is_empty());
    for pair in outcome.progress.windows(2) {
        assert!(pair[0] <= pair[1]);
    }
    assert!(outcome.progress.iter().all(|p| *p <= cap + 1e-12));

    let percents: Vec<u32> = outcome
        .lines
        .iter()
        .filter_map(|l| l.strip_suffix("% complete"))
        .filter_map(|p| p.parse().ok())
        .collect();
    for pair in percents.windows(2) {
        assert!(pair[0] < pair[1]);
    }
    assert_eq!(percents.last(), Some(&100));
    assert_eq!(percents.iter().filter(|p| **p == 100).count(), 1);
    assert_eq!(outcome.lines.last().map(String::as_str), Some("Success!"));
}

#[test]
fn success_lists_each_job_once_with_stats() {
    let mut cluster = SimulatedCluster::new();
    let outcome = run(&common::fan_in(), &mut cluster);

    assert!(outcome.failed.is_empty());
    let mut ids: Vec<JobId> = outcome.successful.iter().map(|r| r.job).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
    for record in &outcome.successful {
        assert_eq!(record.status, JobStatus::Succeeded);
        let stats = record.stats.as_ref().unwrap();
        assert_eq!(stats.job, record.job);
    }
    assert_eq!(outcome.summary().jobs, 3);
}

#[test]
fn failure_is_fatal_after_the_wave_finishes() {
    let mut cluster = SimulatedCluster::new()
        .fail_node(NodeId::new(1), "reducer ran out of disk")
        .with_script(
            NodeId::new(0),
            JobScript {
                ticks: 10,
                ..Default::default()
            },
        );
    let outcome = run(&common::fan_in(), &mut cluster);

    assert!(!outcome.succeeded());
    assert_eq!(cluster.submissions().len(), 1);
    // The slow sibling was polled to completion, not killed.
    assert_eq!(cluster.job_status(JobId::new(0)), JobStatus::Succeeded);

    assert_eq!(outcome.failed.len(), 1);
    let failed = &outcome.failed[0];
    assert_eq!(failed.job, JobId::new(1));
    assert_eq!(failed.message.as_deref(), Some("reducer ran out of disk"));
    assert!(failed.stats.is_some());

    assert!(outcome.lines.iter().any(|l| l == "Map reduce job failed"));
    assert!(outcome
        .lines
        .iter()
        .any(|l| l.contains("reducer ran out of disk")));
    assert!(!outcome.lines.iter().any(|l| l == "100% complete"));
}

#[test]
fn fs_commit_moves_every_output_into_place() {
    let root = scratch("launch");
    let config = RunConfig {
        temp_dir: root.join("tmp").display().to_string(),
        ..Default::default()
    };

    let mut plan = jobwave_core::plan::PhysicalPlan::new();
    let l = common::load(&mut plan, "in/events");
    let a = common::group_agg(
        &mut plan,
        l,
        "user",
        jobwave_core::plan::AggregateFunction::Count,
        None,
        "n",
    );
    let out = root.join("out/counts").display().to_string();
    common::store(&mut plan, a, &out);

    let graph = compile(&plan, &config).unwrap();
    let mut compiler = JobControlCompiler::new(config.clone(), Box::new(FsCommitter));
    let mut cluster = SimulatedCluster::new().with_staging_output(true);
    let outcome = launcher(config)
        .launch(&graph, "fs", &mut compiler, &mut cluster)
        .unwrap();

    assert!(outcome.succeeded());
    assert!(Path::new(&out).join(SUCCESS_MARKER).exists());
    assert_eq!(compiler.completed().len(), 1);
    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn same_plan_reruns_after_a_failed_launch() {
    let root = scratch("rerun");
    let config = RunConfig {
        temp_dir: root.join("tmp").display().to_string(),
        ..Default::default()
    };
    let out = root.join("out/chain").display().to_string();
    let plan = common::chain_of_three_into(&out);
    let graph = compile(&plan, &config).unwrap();
    let launcher = launcher(config);

    let mut broken = SimulatedCluster::new()
        .with_staging_output(true)
        .fail_node(NodeId::new(1), "tracker lost");
    let first = launcher
        .launch_plan(&plan, "g", Box::new(FsCommitter), &mut broken)
        .unwrap();
    assert!(!first.succeeded());
    assert_eq!(first.successful.len(), 1);
    // node-0 was committed, then dropped when the run ended.
    assert!(!Path::new(graph.nodes()[0].output.location()).exists());

    let mut healthy = SimulatedCluster::new().with_staging_output(true);
    let second = launcher
        .launch_plan(&plan, "g", Box::new(FsCommitter), &mut healthy)
        .unwrap();
    assert!(second.succeeded());
    assert!(Path::new(&out).join(SUCCESS_MARKER).exists());
    for node in graph.nodes().iter().filter(|n| n.output.is_temporary()) {
        assert!(!Path::new(node.output.location()).exists());
    }
    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn leftover_temporary_output_does_not_block_a_launch() {
    let root = scratch("leftover");
    let config = RunConfig {
        temp_dir: root.join("tmp").display().to_string(),
        ..Default::default()
    };
    let out = root.join("out/chain").display().to_string();
    let plan = common::chain_of_three_into(&out);
    let graph = compile(&plan, &config).unwrap();

    // As if an earlier process died between commit and cleanup.
    let stale = Path::new(graph.nodes()[0].output.location());
    fs::create_dir_all(stale).unwrap();
    fs::write(stale.join("part-0"), b"stale").unwrap();

    let mut cluster = SimulatedCluster::new().with_staging_output(true);
    let outcome = launcher(config)
        .launch_plan(&plan, "g", Box::new(FsCommitter), &mut cluster)
        .unwrap();
    assert!(outcome.succeeded());
    assert!(!stale.exists());
    fs::remove_dir_all(&root).unwrap();
}

/// Delegates to `JobControlCompiler` but cannot materialize its second wave.
struct SecondWaveFails {
    inner: JobControlCompiler,
    calls: usize,
}

impl WaveCompiler for SecondWaveFails {
    fn next_wave(&mut self, graph: &JobGraph, group_id: &str) -> Result<Option<Wave>> {
        self.calls += 1;
        if self.calls == 2 {
            return Err(Error::job_creation(NodeId::new(1), "input location unresolved"));
        }
        self.inner.next_wave(graph, group_id)
    }

    fn commit_results(&mut self, wave: &Wave, succeeded: &[JobId]) -> Result<()> {
        self.inner.commit_results(wave, succeeded)
    }
}

#[test]
fn job_creation_error_in_a_later_wave_submits_nothing_more() {
    let config = RunConfig::default();
    let graph = compile(&common::chain_of_three(), &config).unwrap();
    let mut compiler = SecondWaveFails {
        inner: JobControlCompiler::new(config.clone(), Box::new(NoopCommitter)),
        calls: 0,
    };
    let mut cluster = SimulatedCluster::new();

    let err = launcher(config)
        .launch(&graph, "g", &mut compiler, &mut cluster)
        .unwrap_err();
    assert!(matches!(err, ExecError::Core(Error::JobCreation { .. })));
    assert_eq!(cluster.submissions().len(), 1);
    assert_eq!(cluster.job_status(JobId::new(0)), JobStatus::Succeeded);
}
