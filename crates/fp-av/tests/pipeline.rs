//! Commands joined by an OS pipe inside one process group.
//!
//! Uses a shell stand-in for ffmpeg that copies its `-i` source to its last
//! argument, so these run wherever `sh` and `cat` exist.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fp_av::{FfmpegCommand, Input, Output};
use fp_exec::{CloseOnce, ProcessGroup};

const COPY_SCRIPT: &str = r#"#!/bin/sh
src=""
dst=""
while [ $# -gt 0 ]; do
    case "$1" in
        -i) src="$2"; shift 2 ;;
        *) dst="$1"; shift ;;
    esac
done
path() {
    case "$1" in
        pipe:*) echo "/dev/fd/${1#pipe:}" ;;
        *) echo "$1" ;;
    esac
}
exec cat "$(path "$src")" > "$(path "$dst")"
"#;

fn copy_program(dir: &Path) -> Option<PathBuf> {
    if which::which("sh").is_err() || which::which("cat").is_err() {
        eprintln!("Skipping: sh or cat not found");
        return None;
    }
    let path = dir.join("copy-ffmpeg");
    std::fs::write(&path, COPY_SCRIPT).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    Some(path)
}

async fn run_pipeline(downstream_first: bool) {
    let dir = tempfile::tempdir().unwrap();
    let Some(program) = copy_program(dir.path()) else { return };
    let src = dir.path().join("in.txt");
    std::fs::write(&src, "through the pipe").unwrap();

    // A plain pipe: neither end is close-on-exec until wrapped.
    let (read_end, write_end) = nix::unistd::pipe().unwrap();

    let mut upstream = FfmpegCommand::with_program(&program);
    upstream.add_input(Input::path(src.to_string_lossy()));
    upstream.add_output(Output::stream(write_end));

    let received = CloseOnce::new(Vec::new());
    let mut downstream = FfmpegCommand::with_program(&program);
    downstream.add_input(Input::stream(read_end));
    downstream.add_output(Output::writer(received.clone()));

    let (mut group, scope) = ProcessGroup::new();
    upstream.cancel_token(scope.clone());
    downstream.cancel_token(scope.clone());
    if downstream_first {
        group.add(&mut downstream).add(&mut upstream);
    } else {
        group.add(&mut upstream).add(&mut downstream);
    }

    let errors = tokio::time::timeout(Duration::from_secs(10), group.run())
        .await
        .expect("pipeline did not finish");
    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(received.with(|b| b.clone()), b"through the pipe");
}

// One test so no other thread forks while a script is still open for
// writing, which would make exec fail with ETXTBSY.
#[tokio::test(flavor = "multi_thread")]
async fn pipeline_finishes_in_any_registration_order() {
    run_pipeline(false).await;
    run_pipeline(true).await;
}
