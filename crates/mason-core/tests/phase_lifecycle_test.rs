//! End-to-end phase runs against a scripted Dagger.

use mason_core::plan::StepError;
use mason_core::{
    Event, EventBus, OutputSource, PhaseOutcome, PhaseRequest, PlanRunError, PostRun,
};
use mason_test_utils::{ScriptedExecutor, WorkspaceFixture};

const BRICKS: &str = r#"
kind: GoBinary
moduleRef: golang
metadata:
  name: mason
  labels:
    os: linux
---
kind: Slack
moduleRef: https://github.com/acme/slack.git
metadata:
  name: notify
  postRun: on_failure
"#;

fn fixture() -> WorkspaceFixture {
    WorkspaceFixture::new().with_brick_file("bricks.yaml", BRICKS)
}

fn renderer() -> ScriptedExecutor {
    ScriptedExecutor::new()
        .render_fragment("golang", "test_unit.dagger", "bin=$(go build)\n$bin | test")
        .render_fragment("golang", "lint_vet.dagger", "go vet")
        .render_fragment(
            "github_com_acme_slack",
            "postrun_on_failure_notify.dagger",
            "host | file $log_file_path | contents",
        )
        .render_fragment("github_com_acme_slack", "postrun_on_success_ok.dagger", ".echo ok")
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn failing_main_script_runs_on_failure_post_run() {
    let fixture = fixture();
    let executor = renderer().fail_on("plan_test.dagger");
    let mut mason = fixture.mason(&executor, EventBus::default());
    let workspace = mason.detect_workspaces().unwrap()[0].clone();
    let blueprint = workspace.load_blueprint().unwrap();

    let err = workspace
        .run_phase(&blueprint, &PhaseRequest::all("test"))
        .await
        .unwrap_err();

    assert_eq!(
        executor.script_names(),
        vec![
            "render-plan.dagger",
            "plan_test.dagger",
            "plan_test_postrun_on_failure.dagger"
        ]
    );
    let run_err = err.downcast_ref::<PlanRunError>().expect("plan run error");
    assert!(matches!(run_err, PlanRunError::Main(StepError::Exec(_))));

    let post_run = &executor.calls()[2];
    assert!(post_run.script.contains("# Post run on-failure script for phase test"));
    assert!(post_run.script.contains("log_file_path=$(.echo -n \".mason/.work/"));
    assert!(post_run.script.contains("/dagger_test.log\")"));
    assert!(post_run
        .request
        .stderr_log
        .ends_with("plan/dagger_test_postrun_on_failure.log"));
}

#[tokio::test]
async fn both_failures_are_kept() {
    let fixture = fixture();
    let executor = renderer().fail_on("plan_test");
    let mut mason = fixture.mason(&executor, EventBus::default());
    let workspace = mason.detect_workspaces().unwrap()[0].clone();
    let blueprint = workspace.load_blueprint().unwrap();

    let err = workspace
        .run_phase(&blueprint, &PhaseRequest::all("test"))
        .await
        .unwrap_err();

    let run_err = err.downcast_ref::<PlanRunError>().expect("plan run error");
    assert!(run_err.main_error().is_some());
    assert!(run_err.post_run_error().is_some());
    let message = format!("{err:#}");
    assert!(message.contains("plan_test.dagger"), "{message}");
    assert!(message.contains("plan_test_postrun_on_failure.dagger"), "{message}");
}

#[tokio::test]
async fn phases_run_in_order_and_publish_events() {
    let fixture = fixture();
    let executor = renderer().stdout_for("plan_lint.dagger", "\n  vet ok  \n");
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let mut mason = fixture.mason(&executor, events);
    let workspace = mason.detect_workspaces().unwrap()[0].clone();
    let blueprint = workspace.load_blueprint().unwrap();

    let outcomes = workspace
        .run_phases(
            &blueprint,
            &[PhaseRequest::all("lint"), PhaseRequest::all("package")],
        )
        .await
        .unwrap();

    assert_eq!(outcomes, vec![PhaseOutcome::Applied, PhaseOutcome::Skipped]);
    assert_eq!(
        executor.script_names(),
        vec![
            "render-plan.dagger",
            "plan_lint.dagger",
            "plan_lint_postrun_on_success.dagger",
            "render-plan.dagger",
        ]
    );
    assert_eq!(
        drain(&mut rx),
        vec![
            Event::RenderPlan { phase: "lint".into() },
            Event::ApplyPlan { phase: "lint".into(), post_run: None },
            Event::DaggerOutput {
                source: OutputSource::Apply { phase: "lint".into(), post_run: None },
                output: "vet ok".into(),
            },
            Event::ApplyPlan {
                phase: "lint".into(),
                post_run: Some(PostRun::OnSuccess),
            },
            Event::RenderPlan { phase: "package".into() },
        ]
    );
}

#[tokio::test]
async fn first_failing_phase_stops_the_sequence() {
    let fixture = fixture();
    let executor = renderer().fail_on("plan_lint.dagger");
    let mut mason = fixture.mason(&executor, EventBus::default());
    let workspace = mason.detect_workspaces().unwrap()[0].clone();
    let blueprint = workspace.load_blueprint().unwrap();

    let result = workspace
        .run_phases(
            &blueprint,
            &[PhaseRequest::all("lint"), PhaseRequest::all("test")],
        )
        .await;

    assert!(result.is_err());
    assert!(!executor.script_names().contains(&"plan_test.dagger".to_owned()));
}

#[tokio::test]
async fn render_script_and_dumped_bricks() {
    let fixture = fixture();
    let executor = renderer();
    let mut mason = fixture.mason(&executor, EventBus::default());
    let workspace = mason.detect_workspaces().unwrap()[0].clone();
    let blueprint = workspace.load_blueprint().unwrap();

    workspace
        .run_phase(&blueprint, &PhaseRequest::all("test"))
        .await
        .unwrap();

    let render = &executor.calls()[0];
    let plan_dir = render.request.script_path.parent().unwrap().to_path_buf();
    let plan_root = plan_dir.parent().unwrap();
    assert!(plan_root.starts_with(workspace.work_dir()));
    assert!(render.script.starts_with("#!/usr/bin/env dagger\n\ndirectory |\n"));
    assert!(render.script.contains("with-directory golang $(golang | render-plan .mason/.work/"));
    assert!(render.script.contains(
        "with-directory github_com_acme_slack $(https://github.com/acme/slack.git | render-plan .mason/.work/"
    ));
    assert!(render.script.ends_with(&format!("export {}\n", plan_dir.display())));

    let brick = plan_root.join("blueprint/golang/gobinary_mason.json");
    let json = std::fs::read_to_string(&brick).unwrap();
    assert!(json.contains("\"moduleRef\": \"golang\""), "{json}");
    assert!(plan_dir.join("dagger_test.log").exists());

    mason.clean_work_dirs().unwrap();
    assert!(!workspace.work_dir().exists());
}

#[tokio::test]
async fn selector_keeps_post_run_bricks() {
    struct KindIs(&'static str);

    impl std::fmt::Display for KindIs {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "kind={}", self.0)
        }
    }

    impl mason_core::LabelSelector for KindIs {
        fn matches(&self, labels: &mason_core::Labels) -> bool {
            labels.get("kind").is_some_and(|k| k == self.0)
        }
    }

    let fixture = fixture();
    let executor = renderer();
    let mut mason = fixture.mason(&executor, EventBus::default());
    let workspace = mason.detect_workspaces().unwrap()[0].clone();
    let blueprint = workspace.load_blueprint().unwrap();

    workspace
        .run_phase(&blueprint, &PhaseRequest::new("test", Box::new(KindIs("Docker"))))
        .await
        .unwrap();

    let render = &executor.calls()[0];
    assert!(!render.script.contains("with-directory golang "));
    assert!(render.script.contains("with-directory github_com_acme_slack "));
}
