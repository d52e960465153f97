//! End-to-end pipeline runs against local remotes, a shell script in place
//! of the IG publisher, and `MockForge` for pull requests.

#![cfg(unix)]

mod support;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use igrelease::core::config::{resolve, ConfigLayer, EffectiveConfig};
use igrelease::engine::pr::PrRef;
use igrelease::engine::reconcile::SIZE_THRESHOLD;
use igrelease::engine::runner::StageBounds;
use igrelease::engine::report::{PrTarget, StageOutcome};
use igrelease::engine::{Context, Pipeline, PipelineState, Stage};
use igrelease::forge::mock::{FailOn, MockForge};
use igrelease::forge::ForgeError;
use igrelease::process::ProcessRunner;

use support::{bare_remote, fake_tool, file_url, log_subjects, show};

const PUBREQ: &str = r#"{
  "package-id": "who.smart.x",
  "version": "1.0.0",
  "path": "http://smart.who.int/x/1.0.0",
  "mode": "milestone",
  "status": "release",
  "sequence": "Releases",
  "desc": "Release 1.0.0",
  "first": true
}"#;

const GOOD_BUILD: &str = r#"mkdir -p output/templates
echo '<html>release</html>' > output/index.html
echo 'qa' > output/qa.html
echo 'WARNING: a warning'"#;

/// Handles `-go-publish` by writing the release into `-web` and a new
/// entry into the `-registry` list; any other call is a normal build.
const GO_PUBLISH_STEP: &str = r#"if [ "$1" = "-go-publish" ]; then
  while [ $# -gt 0 ]; do
    case "$1" in
      -web) web="$2"; shift ;;
      -registry) registry="$2"; shift ;;
    esac
    shift
  done
  mkdir -p "$web/my-ig/1.0.0"
  echo '<html>release</html>' > "$web/my-ig/index.html"
  echo '<html>1.0.0</html>' > "$web/my-ig/1.0.0/index.html"
  echo '<feed/>' > "$web/package-feed.xml"
  echo '{"guides":[{"id":"who.smart.x"}]}' > "$registry"
  exit 0
fi"#;

struct Fixture {
    temp: TempDir,
    source: PathBuf,
    webroot: PathBuf,
}

impl Fixture {
    fn new(with_pubreq: bool) -> Self {
        let temp = TempDir::new().unwrap();
        let mut files = vec![("ig.ini", "[IG]\nig = input/x.json\n")];
        if with_pubreq {
            files.push(("publication-request.json", PUBREQ));
        }
        let source = bare_remote(temp.path(), "source", "main", &files);
        let webroot = bare_remote(
            temp.path(),
            "webroot",
            "main",
            &[
                ("templates/page.html", "<html/>"),
                ("other-ig/index.html", "untouched"),
            ],
        );
        Self {
            temp,
            source,
            webroot,
        }
    }

    fn root(&self) -> &Path {
        self.temp.path()
    }

    fn layer(&self, build_script: &str) -> ConfigLayer {
        let tools = self.root().join("tools");
        fs::create_dir_all(&tools).unwrap();
        ConfigLayer {
            work_dir: Some(self.root().join("work")),
            source_repo: Some(file_url(&self.source)),
            webroot_repo: Some(file_url(&self.webroot)),
            ig_folder: Some("my-ig".into()),
            build_tool: Some(fake_tool(&tools, build_script)),
            enable_pr_creation: Some(true),
            sync_attempts: Some(1),
            sync_backoff_ms: Some(10),
            sync_backoff_max_ms: Some(10),
            push_retry_delay_ms: Some(10),
            git_timeout_secs: Some(60),
            build_timeout_secs: Some(60),
            ..Default::default()
        }
    }

    fn pipeline(&self, layer: ConfigLayer, forge: &MockForge) -> Pipeline {
        Pipeline::new(Context {
            config: config(layer),
            credential: None,
            runner: ProcessRunner::default(),
            forges: Arc::new(forge.clone()),
        })
    }
}

fn config(layer: ConfigLayer) -> EffectiveConfig {
    resolve::from_layer(ConfigLayer::builtin().overlay(layer)).unwrap()
}

fn stages(report: &igrelease::engine::RunReport) -> Vec<Stage> {
    report.stages.iter().map(|r| r.stage).collect()
}

#[tokio::test]
async fn milestone_release_publishes_and_opens_a_pr() {
    let fx = Fixture::new(true);
    let forge = MockForge::new();

    let report = fx.pipeline(fx.layer(GOOD_BUILD), &forge).run().await;

    assert_eq!(report.exit_code(), 0, "{}", report.render());
    assert_eq!(report.state, PipelineState::Done);
    assert_eq!(
        stages(&report),
        vec![
            Stage::Sync,
            Stage::Config,
            Stage::Build,
            Stage::Validate,
            Stage::Reconcile,
            Stage::Publish,
            Stage::PullRequests
        ]
    );
    assert_eq!(report.build.unwrap().warnings, 1);

    let commit = report.publish.as_ref().unwrap();
    assert!(commit.created);
    assert_eq!(commit.branch.as_str(), "release/my-ig");
    let branch = "release/my-ig";
    assert_eq!(
        show(&fx.webroot, branch, "my-ig/index.html").as_deref(),
        Some("<html>release</html>\n")
    );
    assert_eq!(
        show(&fx.webroot, branch, "other-ig/index.html").as_deref(),
        Some("untouched")
    );
    assert_eq!(
        log_subjects(&fx.webroot, branch)[0],
        "Publish who.smart.x 1.0.0 to my-ig"
    );

    assert_eq!(report.prs.len(), 1);
    assert_eq!(report.prs[0].target, PrTarget::Webroot);
    let prs = forge.all_prs();
    assert_eq!(prs.len(), 1);
    assert_eq!(prs[0].head, "release/my-ig");
    assert_eq!(prs[0].base, "main");
}

#[tokio::test]
async fn rerun_finds_the_existing_pr() {
    let fx = Fixture::new(true);
    let forge = MockForge::new();

    let first = fx.pipeline(fx.layer(GOOD_BUILD), &forge).run().await;
    assert_eq!(first.exit_code(), 0, "{}", first.render());
    let second = fx.pipeline(fx.layer(GOOD_BUILD), &forge).run().await;
    assert_eq!(second.exit_code(), 0, "{}", second.render());

    assert!(!second.publish.as_ref().unwrap().created);
    assert!(matches!(
        second.prs[0].result,
        Ok(PrRef::Existing(ref pr)) if pr.number == 1
    ));
    assert_eq!(forge.all_prs().len(), 1);
}

#[tokio::test]
async fn pr_failure_keeps_the_publish_and_exits_6() {
    let fx = Fixture::new(true);
    let forge = MockForge::new().fail_on(FailOn::CreatePr(ForgeError::AuthFailed(
        "403 Resource not accessible by integration".into(),
    )));

    let report = fx.pipeline(fx.layer(GOOD_BUILD), &forge).run().await;

    assert_eq!(report.exit_code(), 6);
    assert!(report.succeeded());
    assert_eq!(report.state, PipelineState::Done);
    assert!(report.publish.as_ref().unwrap().created);
    assert!(show(&fx.webroot, "release/my-ig", "my-ig/index.html").is_some());
    let record = report.stages.last().unwrap();
    assert_eq!(record.stage, Stage::PullRequests);
    assert!(matches!(record.outcome, StageOutcome::Failed(_)));
}

#[tokio::test]
async fn empty_output_fails_validation_before_reconcile() {
    let fx = Fixture::new(true);
    let forge = MockForge::new();

    let report = fx
        .pipeline(fx.layer("echo 'nothing written'"), &forge)
        .run()
        .await;

    assert_eq!(report.exit_code(), 4);
    assert_eq!(report.state, PipelineState::Failed(Stage::Validate));
    assert!(!stages(&report).contains(&Stage::Reconcile));
    assert!(report.publish.is_none());
    assert!(show(&fx.webroot, "release/my-ig", "my-ig/index.html").is_none());
    assert!(!report.preserved.is_empty());
    assert!(forge.operations().is_empty());
}

#[tokio::test]
async fn failing_build_exits_4() {
    let fx = Fixture::new(true);
    let report = fx
        .pipeline(fx.layer("echo 'ERROR: broken' >&2\nexit 3"), &MockForge::new())
        .run()
        .await;

    assert_eq!(report.exit_code(), 4);
    assert_eq!(report.state, PipelineState::Failed(Stage::Build));
    assert!(report.failure.as_ref().unwrap().cause.contains("ERROR: broken"));
}

#[tokio::test]
async fn missing_publication_request_is_a_config_failure() {
    let fx = Fixture::new(false);
    let report = fx
        .pipeline(fx.layer(GOOD_BUILD), &MockForge::new())
        .run()
        .await;

    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.state, PipelineState::Failed(Stage::Config));
    assert!(!stages(&report).contains(&Stage::Build));
}

#[tokio::test]
async fn oversized_files_stay_out_of_the_webroot() {
    let fx = Fixture::new(true);
    let script = format!(
        "{GOOD_BUILD}\ntruncate -s {} output/full-ig.zip",
        SIZE_THRESHOLD + 1
    );

    let report = fx
        .pipeline(fx.layer(&script), &MockForge::new())
        .run()
        .await;

    assert_eq!(report.exit_code(), 0, "{}", report.render());
    assert_eq!(report.oversized.len(), 1);
    assert_eq!(report.oversized[0].path, "full-ig.zip");
    let assets = fx.root().join("work").join("release-assets");
    assert!(report.preserved.iter().any(|p| p.starts_with(&assets)));
    assert!(show(&fx.webroot, "release/my-ig", "my-ig/full-ig.zip").is_none());
    assert!(assets.join("full-ig.zip").exists());
}

#[tokio::test]
async fn preview_publishes_to_the_pages_branch() {
    let fx = Fixture::new(false);
    let forge = MockForge::new();
    let layer = ConfigLayer {
        publish_gh_pages: Some(true),
        gh_pages_branch: Some("gh-pages".into()),
        sitepreview_dir: Some("previews/my-ig".into()),
        enable_pr_creation: Some(false),
        ..fx.layer(GOOD_BUILD)
    };

    let report = fx.pipeline(layer, &forge).run().await;

    assert_eq!(report.exit_code(), 0, "{}", report.render());
    assert!(!stages(&report).contains(&Stage::Config));
    assert!(show(&fx.webroot, "gh-pages", "previews/my-ig/index.html").is_some());
    assert!(show(&fx.webroot, "gh-pages", "other-ig/index.html").is_some());
    assert!(matches!(
        report.stages.last().unwrap().outcome,
        StageOutcome::Skipped(_)
    ));
    assert!(forge.operations().is_empty());
}

#[tokio::test]
async fn abort_stops_the_run_with_130() {
    let fx = Fixture::new(true);
    let report = fx
        .pipeline(fx.layer(GOOD_BUILD), &MockForge::new())
        .run_until(async {})
        .await;

    assert_eq!(report.exit_code(), 130);
    assert!(matches!(report.state, PipelineState::Failed(_)));
    assert!(report.publish.is_none());
}

#[tokio::test]
async fn stage_over_its_bound_times_out_with_7() {
    let fx = Fixture::new(true);
    let layer = fx.layer("sleep 3");
    let bounds = StageBounds {
        build: Duration::from_secs(1),
        ..StageBounds::from_config(&config(layer.clone()))
    };

    let report = fx
        .pipeline(layer, &MockForge::new())
        .with_bounds(bounds)
        .run()
        .await;

    assert_eq!(report.exit_code(), 7);
    assert_eq!(report.state, PipelineState::Failed(Stage::Build));
}

#[tokio::test]
async fn go_publish_commits_webroot_and_registry_then_settles() {
    let fx = Fixture::new(true);
    let history = bare_remote(fx.root(), "history", "main", &[("index.html", "history")]);
    let registry = bare_remote(
        fx.root(),
        "registry",
        "master",
        &[("fhir-ig-list.json", "{\"guides\":[]}\n")],
    );
    let forge = MockForge::new();
    let script = format!("{GO_PUBLISH_STEP}\n{GOOD_BUILD}");
    let layer = || ConfigLayer {
        go_publish: Some(true),
        history_repo: Some(file_url(&history)),
        registry_repo: Some(file_url(&registry)),
        registry_branch: Some("master".into()),
        ..fx.layer(&script)
    };

    let first = fx.pipeline(layer(), &forge).run().await;

    assert_eq!(first.exit_code(), 0, "{}", first.render());
    assert!(stages(&first).contains(&Stage::GoPublish));
    assert!(first.render().contains("go-publish"));
    let branch = "release/my-ig";
    assert!(first.publish.as_ref().unwrap().created);
    assert_eq!(
        show(&fx.webroot, branch, "my-ig/1.0.0/index.html").as_deref(),
        Some("<html>1.0.0</html>\n")
    );
    assert_eq!(
        show(&fx.webroot, branch, "package-feed.xml").as_deref(),
        Some("<feed/>\n")
    );
    let registry_commit = first.registry.as_ref().unwrap();
    assert!(registry_commit.created);
    assert_eq!(registry_commit.branch.as_str(), branch);
    assert_eq!(
        show(&registry, branch, "fhir-ig-list.json").as_deref(),
        Some("{\"guides\":[{\"id\":\"who.smart.x\"}]}\n")
    );

    let targets: Vec<PrTarget> = first.prs.iter().map(|p| p.target).collect();
    assert_eq!(targets, vec![PrTarget::Webroot, PrTarget::Registry]);
    let mut prs: Vec<(String, String)> = forge
        .all_prs()
        .into_iter()
        .map(|pr| (pr.head, pr.base))
        .collect();
    prs.sort();
    assert_eq!(
        prs,
        vec![
            (branch.to_string(), "main".to_string()),
            (branch.to_string(), "master".to_string()),
        ]
    );

    let webroot_log = log_subjects(&fx.webroot, branch);
    let registry_log = log_subjects(&registry, branch);
    let second = fx.pipeline(layer(), &forge).run().await;

    assert_eq!(second.exit_code(), 0, "{}", second.render());
    assert!(!second.publish.as_ref().unwrap().created);
    assert!(second.registry.is_none());
    assert_eq!(log_subjects(&fx.webroot, branch), webroot_log);
    assert_eq!(log_subjects(&registry, branch), registry_log);
    assert_eq!(forge.all_prs().len(), 2);
}
