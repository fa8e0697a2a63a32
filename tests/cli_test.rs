//! Binary-level tests: startup configuration and the MCP stdio handshake

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Stdio};

const ENV_VARS: [&str; 6] = [
    "ASTRBOT_BASE_URL",
    "ASTRBOT_MCP_CONFIG",
    "ASTRBOT_USERNAME",
    "ASTRBOT_PASSWORD",
    "ASTRBOTMCP_DIRECT_MEDIA_MODE",
    "ASTRBOT_MCP_DIRECT_MEDIA_MODE",
];

fn bin() -> Command {
    let mut cmd = Command::cargo_bin("astrbot-mcp").unwrap();
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_version_flag() {
    bin()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_missing_base_url_fails() {
    bin()
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("ASTRBOT_BASE_URL"));
}

#[test]
fn test_config_file_is_validated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("astrbot-mcp.toml");
    std::fs::write(
        &path,
        "base_url = \"http://127.0.0.1:6185\"\ndirect_media_mode = \"carrier-pigeon\"\n",
    )
    .unwrap();

    bin()
        .arg("--config")
        .arg(&path)
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected 'auto'"));
}

// ==================== JSON-RPC Handshake ====================

struct Server {
    child: Child,
    reader: BufReader<std::process::ChildStdout>,
}

impl Server {
    fn spawn() -> Self {
        let path = assert_cmd::cargo::cargo_bin("astrbot-mcp");
        let mut command = std::process::Command::new(path);
        for var in ENV_VARS {
            command.env_remove(var);
        }
        let mut child = command
            .args(["--base-url", "http://127.0.0.1:9"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn server");
        let reader = BufReader::new(child.stdout.take().expect("stdout"));
        Self { child, reader }
    }

    fn send(&mut self, message: serde_json::Value) {
        let stdin = self.child.stdin.as_mut().expect("stdin");
        writeln!(stdin, "{}", message).unwrap();
        stdin.flush().unwrap();
    }

    fn request(&mut self, id: u64, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }));
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        serde_json::from_str(&line).unwrap_or_else(|_| serde_json::json!({ "raw": line }))
    }

    fn initialize(&mut self) -> serde_json::Value {
        let response = self.request(
            1,
            "initialize",
            serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "cli-test", "version": "0.0.0"}
            }),
        );
        self.send(serde_json::json!({"jsonrpc": "2.0", "method": "notifications/initialized"}));
        response
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn test_initialize_and_list_tools() {
    let mut server = Server::spawn();

    let init = server.initialize();
    assert!(init["result"]["capabilities"]["tools"].is_object());
    assert!(init["result"]["capabilities"]["resources"].is_object());

    let tools = server.request(2, "tools/list", serde_json::json!({}));
    let names: Vec<&str> = tools["result"]["tools"]
        .as_array()
        .expect("tool list")
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert_eq!(names.len(), astrbot_mcp::tools::TOOL_NAMES.len());
    for name in astrbot_mcp::tools::TOOL_NAMES {
        assert!(names.contains(&name), "missing tool {}", name);
    }
}

#[test]
fn test_info_resource() {
    let mut server = Server::spawn();
    server.initialize();

    let listed = server.request(2, "resources/list", serde_json::json!({}));
    assert_eq!(listed["result"]["resources"][0]["uri"], "astrbot://info");

    let read = server.request(3, "resources/read", serde_json::json!({"uri": "astrbot://info"}));
    let text = read["result"]["contents"][0]["text"].as_str().expect("text");
    let info: serde_json::Value = serde_json::from_str(text).unwrap();
    assert_eq!(info["name"], "astrbot-mcp");
    assert_eq!(info["type"], "tool-provider");

    let missing = server.request(4, "resources/read", serde_json::json!({"uri": "astrbot://nope"}));
    assert!(missing["error"].is_object());
}
