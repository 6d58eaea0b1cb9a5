use putlat::params::SweepParams;
use putlat::Sample;
use std::fs;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Command, Output};

fn putlat(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_putlat"))
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("Failed to run putlat")
}

fn scratch_file(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("putlat-{}-{}", std::process::id(), name))
}

#[test]
fn loopback_run_reports_every_size_and_exits_zero() {
    let out = putlat(&["--conn", "local", "--steps", "1"]);

    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8(out.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    let sizes: Vec<usize> = SweepParams::default().sizes().collect();
    assert_eq!(lines.len(), sizes.len());
    for (line, size) in lines.iter().zip(sizes) {
        let prefix = format!("Message size: {} bytes, latency: ", size);
        assert!(line.starts_with(&prefix), "Unexpected line {:?}", line);
        assert!(line.ends_with(" ms"), "Unexpected line {:?}", line);
    }
}

#[test]
fn quiet_run_still_dumps_samples() {
    let path = scratch_file("samples.json");
    let out = putlat(&["-q", path.to_str().unwrap()]);

    assert!(out.status.success());
    assert!(out.stdout.is_empty(), "Quiet run printed a report");

    let dump = fs::read_to_string(&path).unwrap();
    let _ = fs::remove_file(&path);
    let samples: Vec<Sample> = dump
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(samples.len(), SweepParams::default().sizes().count());
    assert_eq!(samples[0].msg_size, 8);
}

#[test]
fn failed_setup_exits_one_with_a_diagnostic_even_when_quiet() {
    // a port nobody listens on
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
        .to_string();

    for &conn in ["rdma", "ucx"].iter() {
        let out = putlat(&["-q", "--conn", conn, "--addr", "127.0.0.1", "--port", &port]);

        assert_eq!(out.status.code(), Some(1), "{} run should fail", conn);
        assert!(out.stdout.is_empty());
        let stderr = String::from_utf8(out.stderr).unwrap();
        assert_eq!(stderr.lines().count(), 1, "Expected one diagnostic line: {:?}", stderr);
    }
}
