use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;
use tempfile::TempDir;

/// Find a free TCP port by binding to port 0
pub fn find_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind to port 0");
    listener.local_addr().unwrap().port()
}

/// Wait for a TCP port to accept connections
pub async fn wait_for_port(port: u16, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for port {} to be ready", port);
        }
        if tokio::net::TcpStream::connect(format!("127.0.0.1:{}", port))
            .await
            .is_ok()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Get the path to a compiled binary in the target directory
fn cargo_bin(name: &str) -> PathBuf {
    let mut path = std::env::current_exe()
        .expect("Failed to get current exe")
        .parent()
        .expect("No parent")
        .parent()
        .expect("No grandparent")
        .to_path_buf();
    path.push(name);
    if path.exists() {
        return path;
    }

    // Fallback: try target/debug directly
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.pop(); // integration-tests -> workspace root
    path.push("target");
    path.push("debug");
    path.push(name);
    if path.exists() {
        return path;
    }

    panic!(
        "Binary '{}' not found. Run `cargo build --workspace` first.",
        name
    );
}

/// A running control plane with its own database and discovery file location
pub struct TestControl {
    pub port: u16,
    process: Child,
    temp_dir: TempDir,
}

impl TestControl {
    /// Start a control plane on an ephemeral port with an empty database
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        Self::start(temp_dir).await
    }

    /// Start a control plane that finds a local daemon config on first boot
    pub async fn with_local_daemon(key: &str, port: u16) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let daemon_dir = temp_dir.path().join("daemon");
        std::fs::create_dir_all(&daemon_dir).expect("Failed to create daemon dir");
        std::fs::write(
            daemon_dir.join("global.json"),
            serde_json::json!({ "key": key, "port": port }).to_string(),
        )
        .expect("Failed to write discovery file");

        Self::start(temp_dir).await
    }

    async fn start(temp_dir: TempDir) -> Self {
        let port = find_free_port();
        let process = spawn_control(&temp_dir, port);
        wait_for_port(port, Duration::from_secs(10)).await;

        Self {
            port,
            process,
            temp_dir,
        }
    }

    /// Get the control plane API URL
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Restart the control plane (same DB path, new port)
    pub async fn restart(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();

        let port = find_free_port();
        self.process = spawn_control(&self.temp_dir, port);
        wait_for_port(port, Duration::from_secs(10)).await;
        self.port = port;
    }

    pub async fn list_nodes(&self) -> ListNodesResponse {
        reqwest::get(format!("{}/api/nodes", self.url()))
            .await
            .expect("Failed to list nodes")
            .json::<ListNodesResponse>()
            .await
            .expect("Failed to parse response")
    }

    pub async fn count(&self) -> FleetCount {
        reqwest::get(format!("{}/api/nodes/count", self.url()))
            .await
            .expect("Failed to count nodes")
            .json::<FleetCount>()
            .await
            .expect("Failed to parse response")
    }
}

fn spawn_control(temp_dir: &TempDir, port: u16) -> Child {
    let db_path = temp_dir.path().join("control.db");
    let discovery_file = temp_dir.path().join("daemon").join("global.json");

    Command::new(cargo_bin("fleet-control"))
        .args(["--bind", &format!("127.0.0.1:{}", port)])
        .args(["--db-path", db_path.to_str().unwrap()])
        .args(["--discovery-file", discovery_file.to_str().unwrap()])
        .args(["--connect-timeout-secs", "1"])
        .args(["--log-level", "debug"])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .expect("Failed to start control plane")
}

impl Drop for TestControl {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

/// Response types for deserialization
#[derive(Debug, serde::Deserialize)]
pub struct Node {
    pub uuid: String,
    pub ip: String,
    pub port: u16,
    pub api_key: String,
    pub remarks: String,
    pub available: bool,
}

#[derive(Debug, serde::Deserialize)]
pub struct ListNodesResponse {
    pub nodes: Vec<Node>,
}

#[derive(Debug, serde::Deserialize)]
pub struct FleetCount {
    pub total: usize,
    pub available: usize,
}
