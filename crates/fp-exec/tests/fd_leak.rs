//! Resource accounting for `ExtraCommand`: open descriptors and live copy
//! tasks.
//!
//! Kept in its own test binary with a single test so no other test opens or
//! closes descriptors while we count them.

#![cfg(target_os = "linux")]

use fp_exec::{CloseOnce, ExtraCommand, InputStream, OutputStream};

fn open_fds() -> usize {
    std::fs::read_dir("/proc/self/fd").unwrap().count()
}

fn alive_tasks() -> usize {
    tokio::runtime::Handle::current().metrics().num_alive_tasks()
}

#[tokio::test]
async fn no_descriptor_leaks() {
    if which::which("dd").is_err() || which::which("true").is_err() {
        eprintln!("Skipping: dd or true not found");
        return;
    }

    // Warm up the runtime's child reaper so its descriptors are counted in
    // the baseline.
    ExtraCommand::new("true").run().await.unwrap();

    let before = open_fds();
    for _ in 0..3 {
        let out = CloseOnce::new(Vec::new());
        let err = CloseOnce::new(Vec::new());
        let mut cmd = ExtraCommand::new("dd");
        let in_fd = cmd
            .bind_input(InputStream::reader(&b"leak check"[..]))
            .unwrap();
        let out_fd = cmd.bind_output(OutputStream::writer(out.clone())).unwrap();
        cmd.args([format!("if=/dev/fd/{in_fd}"), format!("of=/dev/fd/{out_fd}")])
            .stderr(err.clone());
        cmd.run().await.unwrap();
        assert_eq!(alive_tasks(), 0, "copy tasks still running after wait");
        assert_eq!(out.with(|b| b.clone()), b"leak check");
    }
    assert_eq!(open_fds(), before, "wrapper leaked descriptors after wait");

    let mut failing = ExtraCommand::new("/nonexistent/dd-xyz");
    failing
        .bind_input(InputStream::reader(&b"x"[..]))
        .unwrap();
    failing
        .bind_output(OutputStream::writer(tokio::io::sink()))
        .unwrap();
    assert!(failing.start().is_err());
    drop(failing);
    assert_eq!(alive_tasks(), 0, "copy tasks spawned by a failed start");
    assert_eq!(open_fds(), before, "wrapper leaked descriptors after failed start");
}
