#![cfg(unix)]

use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde_json::{json, Value};
use sidekick_provider::{Provider, ProviderCatalog};
use sidekick_runtime::RuntimeConfig;
use sidekick_tools::{
    decode_mcp_frame, encode_mcp_frame, serve_mcp_jsonrpc, McpFraming, McpServeReport,
    ToolRuntime,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

const RESPONSE_DEADLINE: Duration = Duration::from_secs(20);

struct Harness {
    _temp: tempfile::TempDir,
    runtime_dir: PathBuf,
    client: McpClient,
    server: JoinHandle<McpServeReport>,
}

impl Harness {
    fn start(codex_script: &str) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let codex = write_fake_cli(temp.path(), "fake-codex", codex_script);
        let runtime_dir = temp.path().join("runtime");
        let mut catalog = ProviderCatalog::default();
        catalog.codex.executable = codex.display().to_string();
        let runtime = Arc::new(ToolRuntime::from_config(
            &RuntimeConfig::for_runtime_dir(&runtime_dir),
            catalog,
            vec![Provider::Codex],
        ));

        let (client_writer, server_reader) = tokio::io::duplex(64 * 1024);
        let (server_writer, client_reader) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(async move {
            let (report, _) = serve_mcp_jsonrpc(server_reader, server_writer, runtime)
                .await
                .expect("serve");
            report
        });
        Self {
            _temp: temp,
            runtime_dir,
            client: McpClient {
                writer: Some(client_writer),
                reader: client_reader,
                buffer: Vec::new(),
            },
            server,
        }
    }

    async fn finish(mut self) -> McpServeReport {
        self.client.writer.take();
        tokio::time::timeout(RESPONSE_DEADLINE, self.server)
            .await
            .expect("server shutdown deadline")
            .expect("server task")
    }
}

struct McpClient {
    writer: Option<DuplexStream>,
    reader: DuplexStream,
    buffer: Vec<u8>,
}

impl McpClient {
    async fn send(&mut self, value: Value) {
        let encoded = encode_mcp_frame(McpFraming::Newline, &value).expect("encode");
        let writer = self.writer.as_mut().expect("client writer open");
        writer.write_all(&encoded).await.expect("write request");
    }

    async fn call_tool(&mut self, id: u64, name: &str, arguments: Value) {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments }
        }))
        .await;
    }

    async fn recv(&mut self) -> Value {
        tokio::time::timeout(RESPONSE_DEADLINE, async {
            loop {
                if let Some((frame, consumed)) =
                    decode_mcp_frame(&self.buffer, false).expect("decode response")
                {
                    self.buffer.drain(..consumed);
                    return frame.value;
                }
                let mut chunk = [0_u8; 4096];
                let read = self.reader.read(&mut chunk).await.expect("read response");
                assert!(read > 0, "server closed before responding");
                self.buffer.extend_from_slice(&chunk[..read]);
            }
        })
        .await
        .expect("response deadline")
    }
}

fn write_fake_cli(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake cli");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

fn tool_text(response: &Value) -> &str {
    response["result"]["content"][0]["text"]
        .as_str()
        .expect("tool text content")
}

fn tool_is_error(response: &Value) -> bool {
    response["result"]["isError"].as_bool().expect("isError flag")
}

async fn start_background_job(client: &mut McpClient, id: u64, prompt: &str) -> Value {
    client
        .call_tool(id, "ask_codex", json!({ "prompt": prompt, "background": true }))
        .await;
    let response = client.recv().await;
    assert_eq!(response["id"], id);
    assert!(!tool_is_error(&response), "{response}");
    serde_json::from_str(tool_text(&response)).expect("spawn metadata json")
}

#[tokio::test]
async fn integration_background_job_round_trip_over_mcp() {
    let mut harness = Harness::start("echo \"answer for: $5\"");
    let metadata = start_background_job(&mut harness.client, 1, "summarize the diff").await;
    assert_eq!(metadata["provider"], "codex");
    assert_eq!(metadata["status"], "spawned");
    let job_id = metadata["jobId"].as_str().expect("job id").to_string();
    assert!(metadata["statusFile"]
        .as_str()
        .expect("status file")
        .starts_with(harness.runtime_dir.to_str().expect("utf8 path")));

    harness
        .client
        .call_tool(2, "wait_for_job", json!({ "job_id": job_id, "timeout_ms": 15_000 }))
        .await;
    let waited = harness.client.recv().await;
    assert!(!tool_is_error(&waited), "{waited}");
    assert_eq!(tool_text(&waited), "answer for: summarize the diff");

    harness
        .client
        .call_tool(3, "list_jobs", json!({ "status_filter": "completed" }))
        .await;
    let listed = harness.client.recv().await;
    let jobs: Value = serde_json::from_str(tool_text(&listed)).expect("list json");
    assert_eq!(jobs.as_array().expect("array").len(), 1);
    assert_eq!(jobs[0]["jobId"], job_id.as_str());
    assert_eq!(jobs[0]["status"], "completed");
    assert!(jobs[0]["completedAt"].is_string());

    let report = harness.finish().await;
    assert_eq!(report.processed_frames, 3);
    assert_eq!(report.error_count, 0);
}

#[tokio::test]
async fn integration_wait_does_not_block_other_requests() {
    let mut harness = Harness::start("sleep 2\necho slow answer");
    let metadata = start_background_job(&mut harness.client, 1, "slow").await;
    let job_id = metadata["jobId"].as_str().expect("job id").to_string();

    harness
        .client
        .call_tool(2, "wait_for_job", json!({ "job_id": job_id }))
        .await;
    harness
        .client
        .send(json!({ "jsonrpc": "2.0", "id": 3, "method": "ping" }))
        .await;

    let first = harness.client.recv().await;
    assert_eq!(first["id"], 3);
    assert_eq!(first["result"], json!({}));

    let second = harness.client.recv().await;
    assert_eq!(second["id"], 2);
    assert_eq!(tool_text(&second), "slow answer");

    harness.finish().await;
}

#[tokio::test]
async fn integration_kill_marks_job_failed_and_wait_reports_it() {
    let mut harness = Harness::start("exec sleep 30");
    let metadata = start_background_job(&mut harness.client, 1, "never finishes").await;
    let job_id = metadata["jobId"].as_str().expect("job id").to_string();

    harness
        .client
        .call_tool(2, "check_job_status", json!({ "job_id": job_id }))
        .await;
    let checked = harness.client.recv().await;
    let status: Value = serde_json::from_str(tool_text(&checked)).expect("status json");
    assert_eq!(status["status"], "running");
    assert!(status["pid"].as_u64().is_some());

    harness
        .client
        .call_tool(3, "kill_job", json!({ "job_id": job_id, "signal": "SIGTERM" }))
        .await;
    let killed = harness.client.recv().await;
    assert!(!tool_is_error(&killed), "{killed}");
    let status: Value = serde_json::from_str(tool_text(&killed)).expect("status json");
    assert_eq!(status["status"], "failed");
    assert_eq!(status["killedByUser"], true);
    assert_eq!(status["error"], "killed by user with SIGTERM");

    harness
        .client
        .call_tool(4, "wait_for_job", json!({ "job_id": job_id, "timeout_ms": 5_000 }))
        .await;
    let waited = harness.client.recv().await;
    assert!(tool_is_error(&waited));
    let status: Value = serde_json::from_str(tool_text(&waited)).expect("status json");
    assert_eq!(status["status"], "failed");
    assert_eq!(status["killedByUser"], true);

    harness.finish().await;
}

#[tokio::test]
async fn integration_background_timeout_is_recorded() {
    let mut harness = Harness::start("exec sleep 30");
    harness
        .client
        .call_tool(
            1,
            "ask_codex",
            json!({ "prompt": "too slow", "background": true, "timeout_ms": 200 }),
        )
        .await;
    let response = harness.client.recv().await;
    let metadata: Value = serde_json::from_str(tool_text(&response)).expect("metadata");
    let job_id = metadata["jobId"].as_str().expect("job id").to_string();

    harness
        .client
        .call_tool(2, "wait_for_job", json!({ "job_id": job_id, "timeout_ms": 10_000 }))
        .await;
    let waited = harness.client.recv().await;
    assert!(tool_is_error(&waited));
    let status: Value = serde_json::from_str(tool_text(&waited)).expect("status json");
    assert_eq!(status["status"], "timeout");
    assert!(status["error"]
        .as_str()
        .expect("error")
        .ends_with("timed out after 200ms"));

    harness.finish().await;
}
