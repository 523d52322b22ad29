//! End-to-end pipeline runs: cold/warm caching, fan-out, cycles,
//! soft-fail, chains, hooks, and middleware.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;

use stratus::{
    ConfigFile, FnMethod, MethodRecord, Orchestrator, Params, ParameterSpec, StepStatus, Value,
};

fn load_method(rows: Vec<i64>) -> Arc<FnMethod> {
    Arc::new(FnMethod::new(move |_| {
        Ok(Value::List(rows.iter().copied().map(Value::Int).collect()))
    }))
}

fn sum_method() -> Arc<FnMethod> {
    Arc::new(
        FnMethod::new(|args: Params| {
            let total: i64 = args
                .get("x")
                .and_then(|v| v.as_list())
                .map(|items| items.iter().filter_map(Value::as_int).sum())
                .unwrap_or(0);
            Ok(Value::Int(total))
        })
        .param(ParameterSpec::collection("x")),
    )
}

fn linear_yaml(cache_root: &TempDir) -> String {
    format!(
        r#"
pipeline:
  name: linear
  steps:
    - name: A
      component: datahub
      engine: fs
      method: load
      outputs:
        parameters:
          - rows
    - name: B
      component: data_engine
      engine: cpu
      method: sum
      parameters:
        x: steps.A.outputs.parameters.rows
      outputs:
        parameters:
          - total
  options:
    cache:
      root: {}
"#,
        cache_root.path().display()
    )
}

fn linear_orchestrator() -> Orchestrator {
    let o = Orchestrator::new();
    o.registry()
        .register(MethodRecord::new(
            "datahub",
            "fs",
            "load",
            load_method(vec![1, 2, 3]),
        ))
        .unwrap();
    o.registry()
        .register(MethodRecord::new("data_engine", "cpu", "sum", sum_method()))
        .unwrap();
    o
}

// ----------------------------------------------------------------------
// Scenario 1: linear chain, cold then warm
// ----------------------------------------------------------------------

#[tokio::test]
async fn linear_chain_cold_then_warm() {
    let cache = TempDir::new().unwrap();
    let yaml = linear_yaml(&cache);
    let o = linear_orchestrator();

    let cold = o.run_yaml(&yaml).await.unwrap();
    assert_eq!(cold.overall_status, "completed");
    assert_eq!(cold.executed_steps, vec!["A", "B"]);
    assert_eq!(cold.metrics.cache.cache_hits, 0);
    assert_eq!(cold.metrics.cache.cache_miss, 2);
    assert!(!cold.lineage["A"].cached);
    assert!(!cold.lineage["B"].cached);
    assert!(cold
        .outputs
        .by_reference
        .contains(&"steps.B.outputs.parameters.total".to_string()));

    let warm = o.run_yaml(&yaml).await.unwrap();
    assert_eq!(warm.overall_status, "completed");
    assert!(warm.lineage["A"].cached);
    assert!(warm.lineage["B"].cached);
    assert_eq!(warm.metrics.cache.cache_hits, 2);
    assert_eq!(warm.metrics.cache.cache_hit_rate, Some(1.0));
}

#[tokio::test]
async fn warm_run_survives_process_restart() {
    // A fresh orchestrator over the same cache root must reuse the
    // persisted artifacts.
    let cache = TempDir::new().unwrap();
    let yaml = linear_yaml(&cache);

    linear_orchestrator().run_yaml(&yaml).await.unwrap();

    let second = linear_orchestrator();
    let warm = second.run_yaml(&yaml).await.unwrap();
    assert_eq!(warm.metrics.cache.cache_hits, 2);
    assert_eq!(warm.metrics.cache.cache_hit_rate, Some(1.0));
}

// ----------------------------------------------------------------------
// Scenario 2: fan-out + fan-in
// ----------------------------------------------------------------------

#[tokio::test]
async fn fan_out_fan_in_runs_layers_concurrently() {
    let cache = TempDir::new().unwrap();
    let yaml = format!(
        r#"
pipeline:
  name: diamond
  steps:
    - name: A
      component: comp
      engine: e
      method: seed
      outputs:
        parameters: [out]
    - name: B
      component: comp
      engine: e
      method: branch
      parameters:
        src: steps.A.outputs.parameters.out
      outputs:
        parameters: [out]
    - name: C
      component: comp
      engine: e
      method: branch
      parameters:
        src: steps.A.outputs.parameters.out
      outputs:
        parameters: [out]
    - name: D
      component: comp
      engine: e
      method: join
      parameters:
        left: steps.B.outputs.parameters.out
        right: steps.C.outputs.parameters.out
      outputs:
        parameters: [out]
  orchestration:
    task_runner: concurrent
    max_workers: 2
  options:
    cache:
      root: {}
"#,
        cache.path().display()
    );

    let o = Orchestrator::new();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    o.registry()
        .register(MethodRecord::new(
            "comp",
            "e",
            "seed",
            Arc::new(FnMethod::new(|_| Ok(Value::Int(1)))),
        ))
        .unwrap();

    let in_flight_clone = in_flight.clone();
    let peak_clone = peak.clone();
    o.registry()
        .register(MethodRecord::new(
            "comp",
            "e",
            "branch",
            Arc::new(
                FnMethod::new(move |args: Params| {
                    let now = in_flight_clone.fetch_add(1, Ordering::SeqCst) + 1;
                    peak_clone.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(100));
                    in_flight_clone.fetch_sub(1, Ordering::SeqCst);
                    let src = args.get("src").and_then(Value::as_int).unwrap_or(0);
                    Ok(Value::Int(src + 1))
                })
                .param(ParameterSpec::required("src")),
            ),
        ))
        .unwrap();

    o.registry()
        .register(MethodRecord::new(
            "comp",
            "e",
            "join",
            Arc::new(
                FnMethod::new(|args: Params| {
                    let left = args.get("left").and_then(Value::as_int).unwrap_or(0);
                    let right = args.get("right").and_then(Value::as_int).unwrap_or(0);
                    Ok(Value::Int(left + right))
                })
                .param(ParameterSpec::required("left"))
                .param(ParameterSpec::required("right")),
            ),
        ))
        .unwrap();

    // The plan itself: depth 3, widest layer 2.
    let config = ConfigFile::from_yaml(&yaml).unwrap();
    let steps = stratus::step::parse_steps(&config.pipeline).unwrap();
    let graph = stratus::step::build_graph(&steps, true).unwrap();
    let plan = graph.build_plan().unwrap();
    assert_eq!(plan.depth(), 3);
    assert_eq!(plan.max_parallelism(), 2);

    let result = o.run_yaml(&yaml).await.unwrap();
    assert_eq!(result.overall_status, "completed");
    // D saw both branch outputs: (1+1) + (1+1).
    assert!(result
        .outputs
        .by_reference
        .contains(&"steps.D.outputs.parameters.out".to_string()));
    // B and C overlapped under max_workers=2.
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

// ----------------------------------------------------------------------
// Scenario 3: cycle detection
// ----------------------------------------------------------------------

#[tokio::test]
async fn cycle_is_fatal_and_reports_path() {
    let yaml = r#"
pipeline:
  name: cyclic
  steps:
    - name: A
      component: comp
      engine: e
      method: m
      depends_on: [B]
    - name: B
      component: comp
      engine: e
      method: m
      depends_on: [A]
"#;
    let o = Orchestrator::new();
    let err = o.run_yaml(yaml).await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("cyclic dependency"));
    assert!(message.contains('A'));
    assert!(message.contains('B'));
}

// ----------------------------------------------------------------------
// Scenario 6: soft-fail fan-out
// ----------------------------------------------------------------------

fn soft_fail_yaml(cache: &TempDir, soft_fail: bool) -> String {
    format!(
        r#"
pipeline:
  name: fragile
  steps:
    - name: A
      component: comp
      engine: e
      method: explode
      outputs:
        parameters: [out]
    - name: B
      component: comp
      engine: e
      method: consume
      parameters:
        src: steps.A.outputs.parameters.out
    - name: C
      component: comp
      engine: e
      method: consume
      parameters:
        src: steps.A.outputs.parameters.out
  orchestration:
    soft_fail: {soft_fail}
  options:
    cache:
      root: {root}
"#,
        soft_fail = soft_fail,
        root = cache.path().display()
    )
}

fn fragile_orchestrator() -> Orchestrator {
    let o = Orchestrator::new();
    o.registry()
        .register(MethodRecord::new(
            "comp",
            "e",
            "explode",
            Arc::new(FnMethod::new(|_| Err("upstream data source down".into()))),
        ))
        .unwrap();
    o.registry()
        .register(MethodRecord::new(
            "comp",
            "e",
            "consume",
            Arc::new(FnMethod::new(|_| Ok(Value::Null)).param(ParameterSpec::required("src"))),
        ))
        .unwrap();
    o
}

#[tokio::test]
async fn soft_fail_marks_dependents_skipped() {
    let cache = TempDir::new().unwrap();
    let result = fragile_orchestrator()
        .run_yaml(&soft_fail_yaml(&cache, true))
        .await
        .unwrap();

    assert_eq!(result.overall_status, "completed_with_failures");
    assert_eq!(result.lineage["A"].status, StepStatus::Failed);
    assert_eq!(result.lineage["B"].status, StepStatus::Skipped);
    assert_eq!(result.lineage["C"].status, StepStatus::Skipped);
    assert_eq!(
        result.lineage["B"].skip_reason.as_deref(),
        Some("dependency_failed")
    );

    // Failure snapshot written for the failing step.
    assert!(cache.path().join("failures/A.json").exists());
}

#[tokio::test]
async fn hard_fail_aborts_run() {
    let cache = TempDir::new().unwrap();
    let result = fragile_orchestrator()
        .run_yaml(&soft_fail_yaml(&cache, false))
        .await
        .unwrap();

    assert_eq!(result.overall_status, "failed");
    assert_eq!(result.lineage["A"].status, StepStatus::Failed);
    // Dependents never ran.
    assert!(!result.lineage.contains_key("B") || result.lineage["B"].status == StepStatus::Skipped);
}

// ----------------------------------------------------------------------
// Method chains
// ----------------------------------------------------------------------

#[tokio::test]
async fn method_chain_threads_results() {
    let cache = TempDir::new().unwrap();
    let yaml = format!(
        r#"
pipeline:
  name: chained
  steps:
    - name: pipelineur
      component: comp
      engine: e
      method: [produce, double, double]
      outputs:
        parameters: [out]
  options:
    cache:
      root: {}
"#,
        cache.path().display()
    );

    let o = Orchestrator::new();
    o.registry()
        .register(MethodRecord::new(
            "comp",
            "e",
            "produce",
            Arc::new(FnMethod::new(|_| Ok(Value::Int(5)))),
        ))
        .unwrap();
    o.registry()
        .register(MethodRecord::new(
            "comp",
            "e",
            "double",
            Arc::new(
                FnMethod::new(|args: Params| {
                    let x = args.get("data").and_then(Value::as_int).unwrap_or(0);
                    Ok(Value::Int(x * 2))
                })
                .param(ParameterSpec::required("data")),
            ),
        ))
        .unwrap();

    let result = o.run_yaml(&yaml).await.unwrap();
    assert_eq!(result.overall_status, "completed");
    // 5 -> 10 -> 20 captured under pipelineur__out.
    let warm = o.run_yaml(&yaml).await.unwrap();
    assert_eq!(warm.metrics.cache.cache_hits, 1);
}

// ----------------------------------------------------------------------
// Empty workflow
// ----------------------------------------------------------------------

#[tokio::test]
async fn empty_workflow_completes_with_no_steps() {
    let yaml = r#"
pipeline:
  name: empty
  steps: []
  options:
    cache:
      persist: false
"#;
    let result = Orchestrator::new().run_yaml(yaml).await.unwrap();
    assert_eq!(result.overall_status, "completed");
    assert!(result.executed_steps.is_empty());
    assert_eq!(result.metrics.cache.node_total, 0);
}

// ----------------------------------------------------------------------
// Hooks and middleware over a full run
// ----------------------------------------------------------------------

#[tokio::test]
async fn hooks_fire_through_the_run() {
    let cache = TempDir::new().unwrap();
    let yaml = linear_yaml(&cache);
    let o = linear_orchestrator();

    let events = Arc::new(Mutex::new(Vec::<String>::new()));
    for event in [
        "before_flow",
        "after_flow",
        "before_step",
        "after_step",
        "on_cache_hit",
    ] {
        let log = events.clone();
        o.hooks()
            .register(event, move |e| {
                log.lock().push(format!("{}:{}", e.event, e.subject));
                Ok(())
            })
            .unwrap();
    }

    o.run_yaml(&yaml).await.unwrap();
    {
        let seen = events.lock();
        assert!(seen.contains(&"before_flow:linear".to_string()));
        assert!(seen.contains(&"before_step:A".to_string()));
        assert!(seen.contains(&"after_step:B".to_string()));
        assert!(seen.contains(&"after_flow:linear".to_string()));
        assert!(!seen.iter().any(|e| e.starts_with("on_cache_hit")));
    }

    events.lock().clear();
    o.run_yaml(&yaml).await.unwrap();
    let seen = events.lock();
    assert!(seen.contains(&"on_cache_hit:A".to_string()));
    assert!(seen.contains(&"on_cache_hit:B".to_string()));
}

#[tokio::test]
async fn middleware_sees_every_chain_invocation() {
    let cache = TempDir::new().unwrap();
    let yaml = linear_yaml(&cache);
    let mut o = linear_orchestrator();

    let calls = Arc::new(Mutex::new(Vec::<String>::new()));
    let log = calls.clone();
    o.add_middleware(Arc::new(stratus::FnMiddleware(
        move |component: &str, method: &str, args: Params, next: stratus::Next<'_>| {
            log.lock().push(format!("{component}.{method}"));
            next(args)
        },
    )));

    o.run_yaml(&yaml).await.unwrap();
    let seen = calls.lock();
    assert_eq!(seen.as_slice(), ["datahub.load", "data_engine.sum"]);
}

// ----------------------------------------------------------------------
// Retries
// ----------------------------------------------------------------------

#[tokio::test]
async fn step_retries_execution_errors() {
    let cache = TempDir::new().unwrap();
    let yaml = format!(
        r#"
pipeline:
  name: flaky
  steps:
    - name: F
      component: comp
      engine: e
      method: flaky
      outputs:
        parameters: [out]
      retry_count: 2
      retry_delay: 0
  options:
    cache:
      root: {}
"#,
        cache.path().display()
    );

    let o = Orchestrator::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_clone = attempts.clone();
    o.registry()
        .register(MethodRecord::new(
            "comp",
            "e",
            "flaky",
            Arc::new(FnMethod::new(move |_| {
                if attempts_clone.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("transient".into())
                } else {
                    Ok(Value::Int(1))
                }
            })),
        ))
        .unwrap();

    let result = o.run_yaml(&yaml).await.unwrap();
    assert_eq!(result.overall_status, "completed");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}
