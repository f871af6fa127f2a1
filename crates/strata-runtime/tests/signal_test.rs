//! Signals sent to the supervisor's own process. Kept in a separate test
//! binary: every supervisor running in the process would forward them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use strata_core::StrataConfig;
use strata_runtime::health::HttpProbe;
use strata_runtime::supervisor::{Exit, Supervisor, SupervisorConfig};
use tempfile::TempDir;

fn supervisor(uploads: &Path, script: &str, grace_secs: u64) -> Supervisor {
    let uploads = uploads.to_string_lossy().into_owned();
    let mut config = SupervisorConfig::from_lookup(&StrataConfig::default(), |key| {
        (key == "UPLOADS").then(|| uploads.clone())
    })
    .unwrap();
    config.server.shutdown_grace_secs = grace_secs;
    Supervisor::new(config).with_command(vec![
        "sh".to_owned(),
        "-c".to_owned(),
        script.to_owned(),
    ])
}

/// Waits for the child to create `marker`, then signals this process.
async fn signal_when_ready(marker: PathBuf, sig: Signal) {
    for _ in 0..500 {
        if marker.exists() {
            kill(Pid::this(), sig).unwrap();
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server never created {}", marker.display());
}

async fn run_and_signal(supervisor: &Supervisor, marker: PathBuf, sig: Signal) -> Exit {
    let (exit, ()) = tokio::join!(
        tokio::time::timeout(
            Duration::from_secs(20),
            supervisor.run::<HttpProbe>(None)
        ),
        signal_when_ready(marker, sig),
    );
    exit.expect("supervisor did not return").unwrap()
}

#[tokio::test]
async fn signals_are_forwarded_to_the_server() {
    let tmp = TempDir::new().unwrap();

    // Killed by the forwarded SIGTERM: a graceful stop.
    let marker = tmp.path().join("term");
    let server = supervisor(tmp.path(), "touch \"$UPLOADS/term\"; exec sleep 30", 10);
    let exit = run_and_signal(&server, marker, Signal::SIGTERM).await;
    assert_eq!(exit, Exit::Graceful);
    assert_eq!(exit.code(), 0);

    // SIGINT handled by the server, which exits cleanly.
    let marker = tmp.path().join("int");
    let server = supervisor(
        tmp.path(),
        "trap 'exit 0' INT; touch \"$UPLOADS/int\"; while true; do sleep 0.1; done",
        10,
    );
    let exit = run_and_signal(&server, marker, Signal::SIGINT).await;
    assert_eq!(exit, Exit::Graceful);

    // A server that ignores SIGTERM is killed once the grace period ends.
    let marker = tmp.path().join("stuck");
    let server = supervisor(
        tmp.path(),
        "trap '' TERM; touch \"$UPLOADS/stuck\"; while true; do sleep 0.1; done",
        1,
    );
    let exit = run_and_signal(&server, marker, Signal::SIGTERM).await;
    assert_eq!(exit, Exit::Server(128 + Signal::SIGKILL as i32));
}
