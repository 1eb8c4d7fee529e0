//! Output validation tests
//!
//! A `bbt serve` child process is started on a free loopback port and the
//! client commands are run against it, checking the plain and JSON output.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use serde_json::Value;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Kills the server process when dropped
struct ServerProcess {
    child: Child,
    url: String,
    _dir: TempDir,
}

impl ServerProcess {
    fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let child = Command::cargo_bin("bbt")
            .unwrap()
            .current_dir(dir.path())
            .env("LOG_LEVEL", "error")
            .args(["--no-color", "serve", "--host", "127.0.0.1", "--port", &port.to_string(), "--workers", "2"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();

        let server = Self { child, url: format!("http://127.0.0.1:{}", port), _dir: dir };
        server.wait_until_ready();
        server
    }

    fn wait_until_ready(&self) {
        let deadline = Instant::now() + Duration::from_secs(10);
        let addr = self.url.trim_start_matches("http://").to_string();
        while std::net::TcpStream::connect(&addr).is_err() {
            assert!(Instant::now() < deadline, "server did not start on {}", addr);
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    fn client_cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("bbt").unwrap();
        cmd.current_dir(self._dir.path()).env("NO_COLOR", "1").env("LOG_LEVEL", "error");
        cmd
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn test_stats_plain_and_json_output() {
    let server = ServerProcess::start();

    server
        .client_cmd()
        .args(["--no-color", "stats", "-s", &server.url])
        .assert()
        .success()
        .stdout(predicate::str::contains("Server Statistics:"))
        .stdout(predicate::str::contains("Active streams: 0"))
        .stdout(predicate::str::contains("0.0 Mbps"));

    let output = server
        .client_cmd()
        .args(["--json", "stats", "-s", &server.url])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: Value = serde_json::from_slice(&output.stdout).unwrap();
    for key in [
        "download_speed_mbps",
        "upload_speed_mbps",
        "download_bytes",
        "upload_bytes",
        "download_elapsed",
        "upload_elapsed",
        "streams_active",
        "timestamp",
    ] {
        assert!(value.get(key).is_some(), "missing {}", key);
    }
    assert_eq!(value["streams_active"], 0);
}

#[test]
fn test_reset_output() {
    let server = ServerProcess::start();

    server
        .client_cmd()
        .args(["--no-color", "reset", "-s", &server.url])
        .assert()
        .success()
        .stdout(predicate::str::contains("SUCCESS: Server statistics reset"));

    let output = server
        .client_cmd()
        .args(["--json", "reset", "-s", &server.url])
        .output()
        .unwrap();
    let value: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["status"], "reset");
}

/// Full default-length run, about 20 seconds
#[test]
fn test_json_run_report() {
    let server = ServerProcess::start();

    let output = server
        .client_cmd()
        .args(["--json", "run", "--quiet", "-s", &server.url])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["server_url"], server.url.as_str());
    assert_eq!(report["baseline_samples"].as_array().unwrap().len(), 12);
    assert_eq!(report["loaded_samples"].as_array().unwrap().len(), 20);
    assert!(report["upload"]["speed_mbps"].as_f64().unwrap() > 0.0);
    assert!(report["download"]["speed_mbps"].as_f64().unwrap() > 0.0);

    let grade = report["analysis"]["grade"].as_str().unwrap();
    assert!(["A+", "A", "B", "C", "D", "F"].contains(&grade));

    // Localhost advisory goes to stderr, never into the JSON on stdout
    assert!(String::from_utf8_lossy(&output.stderr).contains("loopback"));
}
