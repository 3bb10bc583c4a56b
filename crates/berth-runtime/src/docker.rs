//! [`ContainerRuntime`] backed by the `docker` CLI.
//!
//! Every call spawns the CLI through `tokio::process` with a bounded
//! timeout. Any docker-compatible CLI (for example `podman`) can be used by
//! changing the program name.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::{ContainerRuntime, ExecOutput, InstanceState, LaunchSpec};

/// Docker CLI adapter.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
    timeout: Duration,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker", Duration::from_secs(120))
    }
}

impl DockerCli {
    /// Create an adapter for `program` where every call is bounded by `timeout`.
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    async fn output(&self, args: &[&str]) -> RuntimeResult<Output> {
        let command = format!("{} {}", self.program, args.first().unwrap_or(&""));
        debug!(command = %command, "invoking runtime");

        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(RuntimeError::Timeout {
                command,
                secs: self.timeout.as_secs(),
            }),
        }
    }

    /// Run a command and turn a non-zero exit into an error.
    async fn checked(&self, args: &[&str]) -> RuntimeResult<String> {
        let output = self.output(args).await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let lowered = stderr.to_ascii_lowercase();
        if lowered.contains("no such") || lowered.contains("not found") {
            return Err(RuntimeError::NotFound(stderr));
        }
        if lowered.contains("already in use") || lowered.contains("already allocated") {
            return Err(RuntimeError::Conflict(stderr));
        }
        Err(RuntimeError::CommandFailed {
            command: format!("{} {}", self.program, args.join(" ")),
            code: output.status.code().unwrap_or(-1),
            stderr,
        })
    }
}

// ---------------------------------------------------------------------------
// `docker inspect` document
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectDoc {
    id: String,
    name: String,
    state: InspectState,
    config: InspectConfig,
    network_settings: InspectNetworkSettings,
    #[serde(default)]
    host_config: Option<InspectHostConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    running: bool,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    image: String,
    #[serde(default)]
    env: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetworkSettings {
    #[serde(default)]
    networks: Option<BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHostConfig {
    #[serde(default)]
    port_bindings: Option<BTreeMap<String, Option<Vec<PortBinding>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PortBinding {
    #[serde(default)]
    host_port: String,
}

impl From<InspectDoc> for InstanceState {
    fn from(doc: InspectDoc) -> Self {
        let env = doc
            .config
            .env
            .unwrap_or_default()
            .into_iter()
            .filter_map(|pair| {
                pair.split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect();

        let ports = doc
            .host_config
            .and_then(|hc| hc.port_bindings)
            .unwrap_or_default()
            .into_values()
            .flatten()
            .flatten()
            .filter_map(|binding| binding.host_port.parse::<u16>().ok())
            .collect();

        InstanceState {
            name: doc.name.trim_start_matches('/').to_string(),
            id: doc.id,
            image: doc.config.image,
            running: doc.state.running,
            status: doc.state.status,
            networks: doc
                .network_settings
                .networks
                .unwrap_or_default()
                .into_keys()
                .collect::<BTreeSet<_>>(),
            ports,
            env,
        }
    }
}

fn parse_inspect(json: &str) -> RuntimeResult<Vec<InstanceState>> {
    let docs: Vec<InspectDoc> = serde_json::from_str(json)?;
    Ok(docs.into_iter().map(InstanceState::from).collect())
}

/// Extract image references from `docker load` output.
fn parse_loaded_images(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            line.strip_prefix("Loaded image ID: ")
                .or_else(|| line.strip_prefix("Loaded image: "))
        })
        .map(|image| image.trim().to_string())
        .filter(|image| !image.is_empty())
        .collect()
}

fn split_lines(text: &str) -> impl Iterator<Item = String> + '_ {
    text.lines().map(str::to_string)
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn inspect(&self, name: &str) -> RuntimeResult<Option<InstanceState>> {
        match self.checked(&["inspect", "--type", "container", name]).await {
            Ok(json) => Ok(parse_inspect(&json)?.into_iter().next()),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_instances(&self) -> RuntimeResult<Vec<InstanceState>> {
        let names = self
            .checked(&["ps", "--all", "--format", "{{.Names}}"])
            .await?;
        let names: Vec<&str> = names.lines().filter(|n| !n.trim().is_empty()).collect();
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec!["inspect", "--type", "container"];
        args.extend(names);
        parse_inspect(&self.checked(&args).await?)
    }

    async fn network_exists(&self, network: &str) -> RuntimeResult<bool> {
        match self.checked(&["network", "inspect", network]).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_network(&self, network: &str) -> RuntimeResult<()> {
        match self
            .checked(&["network", "create", "--driver", "bridge", network])
            .await
        {
            Ok(_) => Ok(()),
            Err(RuntimeError::CommandFailed { stderr, .. }) if stderr.contains("already exists") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn load_image(&self, archive: &Path) -> RuntimeResult<Vec<String>> {
        let path = archive.to_string_lossy();
        let stdout = self.checked(&["load", "--input", &path]).await?;
        let images = parse_loaded_images(&stdout);
        if images.is_empty() {
            return Err(RuntimeError::Parse(format!(
                "`load` reported no images: {}",
                stdout.trim()
            )));
        }
        Ok(images)
    }

    async fn image_exists(&self, image: &str) -> RuntimeResult<bool> {
        match self.checked(&["image", "inspect", image]).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn stop(&self, name: &str) -> RuntimeResult<()> {
        self.checked(&["stop", name]).await.map(|_| ())
    }

    async fn remove(&self, name: &str) -> RuntimeResult<()> {
        self.checked(&["rm", "--force", name]).await.map(|_| ())
    }

    async fn start(&self, spec: &LaunchSpec) -> RuntimeResult<String> {
        // Secrets go through an owner-only env file, never the process table.
        let contents = spec.env_file_contents()?;
        let mut env_file = tempfile::NamedTempFile::new()?;
        env_file.write_all(contents.as_bytes())?;
        env_file.flush()?;

        let env_path = env_file.path().to_string_lossy().into_owned();
        let publish = format!("{}:{}", spec.port, spec.port);
        let stdout = self
            .checked(&[
                "run",
                "--detach",
                "--name",
                &spec.name,
                "--network",
                &spec.network,
                "--publish",
                &publish,
                "--restart",
                &spec.restart_policy,
                "--env-file",
                &env_path,
                &spec.image,
            ])
            .await?;

        let id = stdout.trim().to_string();
        if id.is_empty() {
            return Err(RuntimeError::Parse("`run` returned no instance id".to_string()));
        }
        Ok(id)
    }

    async fn exec(&self, name: &str, command: &[String]) -> RuntimeResult<ExecOutput> {
        let mut args = vec!["exec", name];
        args.extend(command.iter().map(String::as_str));
        let output = self.output(&args).await?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        // Exit 125-127 come from the runtime itself, not the command.
        let code = output.status.code().unwrap_or(-1);
        if code == 125 || stderr.to_ascii_lowercase().contains("no such container") {
            return Err(RuntimeError::NotFound(stderr.trim().to_string()));
        }

        Ok(ExecOutput {
            exit_code: code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }

    async fn logs(&self, name: &str, lines: usize) -> RuntimeResult<Vec<String>> {
        let tail = lines.to_string();
        let output = self.output(&["logs", "--tail", &tail, name]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(RuntimeError::NotFound(stderr));
        }

        // The CLI forwards the instance's stderr on its own stderr.
        let mut out: Vec<String> = split_lines(&String::from_utf8_lossy(&output.stdout)).collect();
        out.extend(split_lines(&String::from_utf8_lossy(&output.stderr)));
        let skip = out.len().saturating_sub(lines);
        Ok(out.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSPECT_JSON: &str = r#"[
      {
        "Id": "4f1c2d",
        "Name": "/letzgo-postgres",
        "State": { "Running": true, "Status": "running" },
        "Config": { "Image": "postgres:15", "Env": ["POSTGRES_DB=letzgo", "PATH=/usr/bin"] },
        "NetworkSettings": { "Networks": { "letzgo-network": {} } },
        "HostConfig": { "PortBindings": { "5432/tcp": [ { "HostIp": "", "HostPort": "5432" } ] } }
      }
    ]"#;

    #[test]
    fn test_parse_inspect_document() {
        let states = parse_inspect(INSPECT_JSON).expect("parse");
        assert_eq!(states.len(), 1);
        let state = &states[0];
        assert_eq!(state.name, "letzgo-postgres");
        assert!(state.running);
        assert!(state.networks.contains("letzgo-network"));
        assert!(state.ports.contains(&5432));
        assert_eq!(state.env.get("POSTGRES_DB").map(String::as_str), Some("letzgo"));
    }

    #[test]
    fn test_parse_inspect_tolerates_missing_sections() {
        let json = r#"[{
            "Id": "a", "Name": "/x",
            "State": { "Running": false, "Status": "exited" },
            "Config": { "Image": "x:latest", "Env": null },
            "NetworkSettings": { "Networks": null }
        }]"#;
        let states = parse_inspect(json).expect("parse");
        assert!(!states[0].running);
        assert!(states[0].networks.is_empty());
        assert!(states[0].ports.is_empty());
        assert!(states[0].env.is_empty());
    }

    #[test]
    fn test_parse_loaded_images() {
        let out = "Loaded image: chat-service:latest\nLoaded image ID: sha256:abc\n";
        assert_eq!(
            parse_loaded_images(out),
            vec!["chat-service:latest".to_string(), "sha256:abc".to_string()]
        );
        assert!(parse_loaded_images("nothing here").is_empty());
    }

    #[tokio::test]
    async fn test_missing_program_is_io_error() {
        let cli = DockerCli::new("berth-definitely-not-a-runtime", Duration::from_secs(5));
        let err = cli.inspect("anything").await.expect_err("spawn should fail");
        assert!(matches!(err, RuntimeError::Io(_)));
    }
}
