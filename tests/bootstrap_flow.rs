mod common;

use common::{installed, stderr, stdout, Behavior, FakeLauncher, FakeProbe};
use pdf_translate::bootstrap::{BootstrapSettings, Bootstrapper};
use pdf_translate::error::{EngineError, ErrorKind, InstallPhase};
use pdf_translate::probe::InstallLayout;
use pdf_translate::sink::MemorySink;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

type TestBootstrapper = Bootstrapper<Arc<FakeProbe>, Arc<FakeLauncher>>;

fn layout() -> InstallLayout {
    InstallLayout::at("/home/test/.local/bin")
}

fn bootstrapper(names: &[&str], script: Vec<Behavior>) -> (TestBootstrapper, Arc<FakeLauncher>) {
    let state = installed(names);
    let probe = FakeProbe::new(state.clone());
    let launcher = FakeLauncher::new(state, script);
    let b = Bootstrapper::new(probe, launcher.clone(), layout(), BootstrapSettings::default());
    (b, launcher)
}

#[tokio::test]
async fn ready_environment_spawns_nothing() {
    let (b, launcher) = bootstrapper(&["uv", "pdf2zh"], vec![]);
    let sink = MemorySink::default();
    let path = b
        .ensure_ready(&sink, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(path, PathBuf::from("pdf2zh"));
    assert_eq!(launcher.spawns(), 0);
    assert!(!b.is_busy());
}

#[tokio::test]
async fn installs_package_manager_then_tool() {
    let (b, launcher) = bootstrapper(
        &[],
        vec![
            Behavior::Exit {
                code: 0,
                lines: vec![
                    stdout("\u{1b}[1;32mdownloading uv 0.5.1 x86_64-unknown-linux-gnu\u{1b}[0m"),
                    stderr("everything's installed!"),
                ],
                installs: Some("uv"),
            },
            Behavior::installs("pdf2zh"),
        ],
    );
    let sink = MemorySink::default();
    let path = b
        .ensure_ready(&sink, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(path, PathBuf::from("pdf2zh"));
    assert_eq!(launcher.spawns(), 2);

    let pm = launcher.spec(0);
    if cfg!(windows) {
        assert_eq!(pm.program, PathBuf::from("powershell"));
        assert!(pm.args.last().unwrap().contains("install.ps1"));
    } else {
        assert_eq!(pm.program, PathBuf::from("sh"));
        assert_eq!(pm.args[1], "curl -LsSf https://astral.sh/uv/install.sh | sh");
    }

    let tool = launcher.spec(1);
    assert_eq!(tool.program, layout().package_manager());
    assert_eq!(tool.args, vec!["tool", "install", "--python", "3.12", "pdf2zh"]);
    assert_eq!(tool.path_prepend, vec![layout().bin_dir]);

    let messages: Vec<String> = sink.updates().into_iter().map(|u| u.message).collect();
    assert!(messages
        .iter()
        .any(|m| m == "Installing uv: downloading uv 0.5.1 x86_64-unknown-linux-gnu"));
    assert!(messages.iter().all(|m| !m.contains('\u{1b}')));
    assert!(sink
        .transcript
        .lines()
        .contains(&"[STDERR] everything's installed!".to_string()));
    assert_eq!(sink.updates().last().unwrap().percent, 100);
}

#[tokio::test]
async fn installer_messages_are_truncated() {
    let long = "x".repeat(300);
    let (b, _launcher) = bootstrapper(
        &["uv"],
        vec![Behavior::Exit {
            code: 0,
            lines: vec![stdout(&long)],
            installs: Some("pdf2zh"),
        }],
    );
    let sink = MemorySink::default();
    b.ensure_ready(&sink, &CancellationToken::new()).await.unwrap();

    let msg = sink
        .updates()
        .into_iter()
        .map(|u| u.message)
        .find(|m| m.starts_with("Installing pdf2zh: "))
        .unwrap();
    assert_eq!(msg.len(), "Installing pdf2zh: ".len() + 80);
    // the transcript keeps the whole line
    assert!(sink.transcript.lines().contains(&long));
}

#[tokio::test]
async fn present_package_manager_is_not_reinstalled() {
    let (b, launcher) = bootstrapper(&["uv"], vec![Behavior::installs("pdf2zh")]);
    let sink = MemorySink::default();
    b.ensure_ready(&sink, &CancellationToken::new()).await.unwrap();
    assert_eq!(launcher.spawns(), 1);
    assert_eq!(launcher.spec(0).args[0], "tool");
}

#[tokio::test]
async fn package_manager_failure_stops_and_releases_guard() {
    let (b, launcher) = bootstrapper(&[], vec![Behavior::exit(1, vec![])]);
    let sink = MemorySink::default();
    let err = b
        .ensure_ready(&sink, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InstallFailed {
            phase: InstallPhase::PackageManager,
            ..
        }
    ));
    assert_eq!(launcher.spawns(), 1);
    assert!(!b.is_busy());

    // manual retry is possible once the failure has been reported
    let again = b.ensure_ready(&sink, &CancellationToken::new()).await;
    assert!(!matches!(again, Err(EngineError::BootstrapBusy)));
}

#[tokio::test]
async fn spawn_failure_is_an_install_failure() {
    let (b, _launcher) = bootstrapper(&["uv"], vec![Behavior::SpawnError]);
    let sink = MemorySink::default();
    let err = b
        .ensure_ready(&sink, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InstallFailed {
            phase: InstallPhase::Tool,
            ..
        }
    ));
}

#[tokio::test]
async fn successful_install_without_binary_fails_verification() {
    let (b, launcher) = bootstrapper(&["uv"], vec![Behavior::ok()]);
    let sink = MemorySink::default();
    let err = b
        .ensure_ready(&sink, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VerificationFailed);
    assert_eq!(launcher.spawns(), 1);
    assert!(sink
        .transcript
        .lines()
        .iter()
        .any(|l| l == "[ENV] Environment setup failed"));
}

#[tokio::test]
async fn second_bootstrap_is_rejected_while_first_runs() {
    let gate = Arc::new(Notify::new());
    let (b, launcher) = bootstrapper(&["uv"], vec![Behavior::Gate(gate.clone())]);
    let b = Arc::new(b);

    let first = {
        let b = b.clone();
        tokio::spawn(async move {
            let sink = MemorySink::default();
            let res = b.ensure_ready(&sink, &CancellationToken::new()).await;
            (res, sink.updates().len())
        })
    };
    launcher.started.notified().await;
    assert!(b.is_busy());

    let sink = MemorySink::default();
    let second = b.ensure_ready(&sink, &CancellationToken::new()).await;
    assert!(matches!(second, Err(EngineError::BootstrapBusy)));
    assert!(sink.updates().is_empty());
    assert_eq!(launcher.spawns(), 1);

    gate.notify_one();
    let (first_res, first_updates) = first.await.unwrap();
    // the gate installs nothing, so the first run ends in verification
    assert_eq!(first_res.unwrap_err().kind(), ErrorKind::VerificationFailed);
    assert!(first_updates > 0);
    assert!(!b.is_busy());
}

#[tokio::test]
async fn cancellation_during_install_stops_the_sequence() {
    let (b, launcher) = bootstrapper(&[], vec![Behavior::UntilCancelled]);
    let b = Arc::new(b);
    let cancel = CancellationToken::new();

    let task = {
        let b = b.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let sink = MemorySink::default();
            let res = b.ensure_ready(&sink, &cancel).await;
            (res, sink.transcript.lines())
        })
    };
    launcher.started.notified().await;
    cancel.cancel();

    let (res, lines) = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(res.unwrap_err().is_cancelled());
    assert_eq!(launcher.spawns(), 1);
    assert!(lines.iter().any(|l| l == "[ENV] Environment setup cancelled"));
    assert!(!b.is_busy());
}

#[tokio::test]
async fn cancelled_token_prevents_any_install() {
    let (b, launcher) = bootstrapper(&[], vec![]);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let sink = MemorySink::default();
    let err = b.ensure_ready(&sink, &cancel).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(launcher.spawns(), 0);
}

#[tokio::test]
async fn status_reports_each_dependency() {
    let (b, _launcher) = bootstrapper(&["uv"], vec![]);
    let sink = MemorySink::default();
    let status = b.status(&sink).await;
    assert!(status.package_manager_installed);
    assert!(!status.tool_installed);
    assert!(!status.ready);
    assert_eq!(status.tool_path, None);
}
