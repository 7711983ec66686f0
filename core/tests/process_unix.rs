//! Real-OS checks for the Unix platform layer.
//!
//! Everything runs in a single test function: the reap sweep calls
//! `waitpid(-1)` and concurrent tests spawning children would steal
//! each other's exits.

#![cfg(unix)]

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use runmate_core::process::unix::UnixPlatform;
use runmate_core::process::{Platform, SpawnSpec, StdioTarget};

fn wait_reaped(platform: &UnixPlatform, pid: i32) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        while let Some(reaped) = platform.reap_next() {
            if reaped == pid {
                return;
            }
        }
        assert!(
            Instant::now() < deadline,
            "child {pid} was not reaped in time"
        );
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn spawn_signal_and_reap() {
    let platform = UnixPlatform;

    // A quick child exits on its own and is collected by the sweep.
    let pid = platform
        .spawn(SpawnSpec::new("true", vec![]))
        .expect("spawn true");
    assert!(pid > 0);
    wait_reaped(&platform, pid);
    assert!(!platform.is_alive(pid));

    // A long-running child answers probes and dies on SIGTERM.
    let pid = platform
        .spawn(SpawnSpec::new("sleep", vec!["30".to_string()]))
        .expect("spawn sleep");
    assert!(platform.is_alive(pid));
    platform
        .send_signal(pid, libc::SIGTERM)
        .expect("signal sleep");
    wait_reaped(&platform, pid);
    assert!(!platform.is_alive(pid));

    // The child's environment and stdout plumbing work end to end.
    let (read_end, write_end) = platform.create_pipe().expect("pipe");
    let pid = platform
        .spawn(
            SpawnSpec::new("sh", vec!["-c".to_string(), "printf %s \"$MARKER\"".to_string()])
                .envs(vec![("MARKER".to_string(), "plumbed".to_string())])
                .stdout(StdioTarget::Fd(write_end)),
        )
        .expect("spawn sh");
    let mut output = String::new();
    std::fs::File::from(read_end)
        .read_to_string(&mut output)
        .expect("read pipe");
    assert_eq!(output, "plumbed");
    wait_reaped(&platform, pid);

    // Pipe endpoints transfer bytes daemon-side too.
    let (read_end, write_end) = platform.create_pipe().expect("pipe");
    let mut writer = std::fs::File::from(write_end);
    writer.write_all(b"ping").expect("write pipe");
    drop(writer);
    let mut buf = String::new();
    std::fs::File::from(read_end)
        .read_to_string(&mut buf)
        .expect("read pipe");
    assert_eq!(buf, "ping");
}
