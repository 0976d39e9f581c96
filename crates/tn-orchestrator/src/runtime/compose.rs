//! Docker compose adapter

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tokio_util::codec::{FramedRead, LinesCodec};

use tn_core::config::RuntimeConfig;
use tn_core::ServiceKind;

use super::{LogOptions, LogStream, Runtime, RuntimeError, RuntimeOp, ServiceStatus, StackHandle};

/// Longest stderr excerpt carried in an error
const STDERR_EXCERPT: usize = 2000;

/// Runtime backed by the `docker` CLI and its compose plugin
#[derive(Debug, Clone)]
pub struct ComposeRuntime {
    config: RuntimeConfig,
}

/// Subset of `docker inspect` `.State`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerState {
    status: String,
    #[serde(default)]
    exit_code: i32,
    #[serde(default)]
    health: Option<ContainerHealth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerHealth {
    status: String,
}

impl ComposeRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    fn compose(&self, stack: &StackHandle) -> Command {
        let (program, prefix) = match self.config.compose_command.split_first() {
            Some((program, prefix)) => (program.as_str(), prefix),
            None => ("docker", &[][..]),
        };
        let mut cmd = Command::new(program);
        cmd.args(prefix)
            .arg("-p")
            .arg(&stack.project)
            .arg("-f")
            .arg(&stack.compose_file)
            .current_dir(&stack.dir);
        cmd
    }

    fn docker(&self) -> Command {
        Command::new(&self.config.docker_binary)
    }

    /// Arguments appended to `docker compose -p .. -f ..` for an operation
    fn compose_args(op: &RuntimeOp) -> Vec<String> {
        match op {
            RuntimeOp::Build { services } => {
                let mut args = vec!["build".to_string()];
                args.extend(names(services));
                args
            }
            RuntimeOp::Up {
                services,
                no_deps,
                force_recreate,
            } => {
                let mut args = vec!["up".to_string(), "-d".to_string()];
                if *no_deps {
                    args.push("--no-deps".to_string());
                }
                if *force_recreate {
                    args.push("--force-recreate".to_string());
                }
                args.extend(names(services));
                args
            }
            RuntimeOp::Stop { services } => {
                let mut args = vec!["stop".to_string()];
                args.extend(names(services));
                args
            }
            RuntimeOp::Down { volumes } => {
                let mut args = vec!["down".to_string(), "--remove-orphans".to_string()];
                if *volumes {
                    args.push("--volumes".to_string());
                }
                args
            }
        }
    }

    fn parse_state(json: &str) -> Result<ServiceStatus, RuntimeError> {
        let state: ContainerState =
            serde_json::from_str(json.trim()).map_err(|e| RuntimeError::Parse(e.to_string()))?;
        Ok(match state.status.as_str() {
            "running" => match state.health.as_ref().map(|h| h.status.as_str()) {
                Some("healthy") => ServiceStatus::Healthy,
                Some("unhealthy") => ServiceStatus::Unhealthy,
                Some(_) => ServiceStatus::Starting,
                None => ServiceStatus::Running,
            },
            "restarting" => ServiceStatus::Starting,
            "created" => ServiceStatus::Created,
            "exited" | "dead" => ServiceStatus::Exited(state.exit_code),
            other => ServiceStatus::Unknown(other.to_string()),
        })
    }
}

fn names(services: &[ServiceKind]) -> Vec<String> {
    services.iter().map(|s| s.name().to_string()).collect()
}

/// Run a command to completion, returning stdout on success
///
/// `label` names the command in logs and errors. The child is killed when
/// the returned future is dropped, so a timed-out operation stops acting.
async fn run(mut cmd: Command, label: String) -> Result<String, RuntimeError> {
    tracing::debug!("Running {}", label);

    let output = cmd
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| RuntimeError::Spawn {
            program: label.clone(),
            source: e,
        })?;

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(RuntimeError::Failed {
        command: label,
        code: output.status.code(),
        stderr: excerpt(stderr.trim()).to_string(),
    })
}

/// Tail of `stderr`; compose prints the actual error last
fn excerpt(stderr: &str) -> &str {
    if stderr.len() <= STDERR_EXCERPT {
        return stderr;
    }
    let mut start = stderr.len() - STDERR_EXCERPT;
    while !stderr.is_char_boundary(start) {
        start += 1;
    }
    &stderr[start..]
}

fn describe(cmd: &Command) -> String {
    let std = cmd.as_std();
    let mut parts = vec![std.get_program().to_string_lossy().into_owned()];
    parts.extend(std.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

#[async_trait]
impl Runtime for ComposeRuntime {
    async fn apply(&self, stack: &StackHandle, op: &RuntimeOp) -> Result<(), RuntimeError> {
        let mut cmd = self.compose(stack);
        cmd.args(Self::compose_args(op));
        let label = describe(&cmd);
        run(cmd, label).await?;
        tracing::info!("{}: {}", stack.project, op);
        Ok(())
    }

    async fn status(
        &self,
        stack: &StackHandle,
        service: ServiceKind,
    ) -> Result<ServiceStatus, RuntimeError> {
        let mut cmd = self.docker();
        cmd.args(["inspect", "--format", "{{json .State}}"])
            .arg(stack.container(service));
        let label = describe(&cmd);
        match run(cmd, label).await {
            Ok(json) => Self::parse_state(&json),
            Err(RuntimeError::Failed { stderr, .. }) if stderr.contains("No such object") => {
                Ok(ServiceStatus::Missing)
            }
            Err(e) => Err(e),
        }
    }

    async fn logs(
        &self,
        stack: &StackHandle,
        service: ServiceKind,
        options: LogOptions,
    ) -> Result<LogStream, RuntimeError> {
        let mut cmd = self.docker();
        cmd.arg("logs");
        if options.follow {
            cmd.arg("--follow");
        }
        if let Some(tail) = options.tail {
            cmd.arg("--tail").arg(tail.to_string());
        }
        cmd.arg(stack.container(service))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the stream drops the child, which ends the reader only
            .kill_on_drop(true);

        let program = describe(&cmd);
        let mut child = cmd.spawn().map_err(|e| RuntimeError::Spawn {
            program: program.clone(),
            source: e,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Parse("log reader has no stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RuntimeError::Parse("log reader has no stderr".to_string()))?;

        // Containers write to both; `docker logs` replays them on its own.
        // The last stderr line explains a failing reader.
        let last_stderr = Arc::new(Mutex::new(String::new()));
        let sink = last_stderr.clone();
        let out = FramedRead::new(stdout, LinesCodec::new());
        let err = FramedRead::new(stderr, LinesCodec::new()).inspect(move |line| {
            if let (Ok(line), Ok(mut last)) = (line, sink.lock()) {
                *last = line.clone();
            }
        });
        let lines = futures::stream::select(out, err)
            .map(|line| line.map_err(|e| RuntimeError::Parse(e.to_string())));

        // Once output ends, a non-zero exit becomes a trailing error
        let exit = futures::stream::once(async move {
            match child.wait().await {
                Ok(status) if status.success() => None,
                Ok(status) => {
                    let stderr = last_stderr
                        .lock()
                        .map(|last| last.clone())
                        .unwrap_or_default();
                    Some(Err(RuntimeError::Failed {
                        command: program,
                        code: status.code(),
                        stderr,
                    }))
                }
                Err(e) => Some(Err(RuntimeError::Spawn { program, source: e })),
            }
        })
        .filter_map(futures::future::ready);

        Ok(lines.chain(exit).boxed())
    }

    async fn exec(
        &self,
        stack: &StackHandle,
        service: ServiceKind,
        argv: &[String],
    ) -> Result<String, RuntimeError> {
        let container = stack.container(service);
        // Arguments may carry credentials; only the program is named
        let label = format!(
            "{} exec {} {}",
            self.config.docker_binary,
            container,
            argv.first().map(|s| s.as_str()).unwrap_or_default()
        );
        let mut cmd = self.docker();
        cmd.arg("exec").arg(&container).args(argv);
        run(cmd, label).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_up_args() {
        let args = ComposeRuntime::compose_args(&RuntimeOp::Up {
            services: vec![ServiceKind::Backend],
            no_deps: true,
            force_recreate: false,
        });
        assert_eq!(args, vec!["up", "-d", "--no-deps", "backend"]);

        let args = ComposeRuntime::compose_args(&RuntimeOp::Up {
            services: vec![ServiceKind::Proxy],
            no_deps: true,
            force_recreate: true,
        });
        assert_eq!(args, vec!["up", "-d", "--no-deps", "--force-recreate", "nginx"]);
    }

    #[test]
    fn test_down_keeps_volumes_unless_asked() {
        assert_eq!(
            ComposeRuntime::compose_args(&RuntimeOp::Down { volumes: false }),
            vec!["down", "--remove-orphans"]
        );
        assert!(ComposeRuntime::compose_args(&RuntimeOp::Down { volumes: true })
            .contains(&"--volumes".to_string()));
    }

    #[test]
    fn test_parse_state_with_health() {
        let json = r#"{"Status":"running","ExitCode":0,"Health":{"Status":"healthy"}}"#;
        assert_eq!(
            ComposeRuntime::parse_state(json).unwrap(),
            ServiceStatus::Healthy
        );
        let json = r#"{"Status":"running","ExitCode":0,"Health":{"Status":"starting"}}"#;
        assert_eq!(
            ComposeRuntime::parse_state(json).unwrap(),
            ServiceStatus::Starting
        );
    }

    #[test]
    fn test_parse_state_without_health() {
        let json = r#"{"Status":"exited","ExitCode":137}"#;
        assert_eq!(
            ComposeRuntime::parse_state(json).unwrap(),
            ServiceStatus::Exited(137)
        );
        let json = r#"{"Status":"running","ExitCode":0,"Health":null}"#;
        assert_eq!(
            ComposeRuntime::parse_state(json).unwrap(),
            ServiceStatus::Running
        );
    }

    #[test]
    fn test_excerpt_keeps_the_end() {
        let long = format!("{}final error", "x".repeat(STDERR_EXCERPT));
        assert!(excerpt(&long).ends_with("final error"));
        assert_eq!(excerpt(&long).len(), STDERR_EXCERPT);
        assert_eq!(excerpt("short"), "short");
    }

    #[test]
    fn test_compose_command_is_configurable() {
        let runtime = ComposeRuntime::new(RuntimeConfig {
            compose_command: vec!["docker-compose".to_string()],
            ..RuntimeConfig::default()
        });
        let stack = StackHandle {
            tenant: tn_core::TenantId::parse("acme").unwrap(),
            project: "tenantry-acme".to_string(),
            dir: "/srv/acme".into(),
            compose_file: "/srv/acme/docker-compose.yml".into(),
        };
        assert_eq!(
            describe(&runtime.compose(&stack)),
            "docker-compose -p tenantry-acme -f /srv/acme/docker-compose.yml"
        );
    }

    fn stack_in(dir: &std::path::Path) -> StackHandle {
        StackHandle {
            tenant: tn_core::TenantId::parse("acme").unwrap(),
            project: "tenantry-acme".to_string(),
            dir: dir.to_path_buf(),
            compose_file: dir.join("docker-compose.yml"),
        }
    }

    #[cfg(unix)]
    fn script(dir: &std::path::Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abandoned_command_is_killed() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("finished");
        let runtime = ComposeRuntime::new(RuntimeConfig {
            compose_command: vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("sleep 1; touch {}", marker.display()),
            ],
            ..RuntimeConfig::default()
        });

        let op = RuntimeOp::Build {
            services: vec![ServiceKind::Backend],
        };
        let stack = stack_in(dir.path());
        let result =
            tokio::time::timeout(Duration::from_millis(100), runtime.apply(&stack, &op)).await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_log_reader_ends_with_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let docker = script(
            dir.path(),
            "docker",
            "echo 'Error response from daemon: No such container: acme_db' >&2\nexit 1",
        );
        let runtime = ComposeRuntime::new(RuntimeConfig {
            docker_binary: docker,
            ..RuntimeConfig::default()
        });

        let items: Vec<Result<String, RuntimeError>> = runtime
            .logs(&stack_in(dir.path()), ServiceKind::Database, LogOptions::default())
            .await
            .unwrap()
            .collect()
            .await;

        match items.last() {
            Some(Err(RuntimeError::Failed { code, stderr, .. })) => {
                assert_eq!(*code, Some(1));
                assert!(stderr.contains("No such container"));
            }
            other => panic!("expected a trailing failure, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_log_reader_yields_only_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let docker = script(dir.path(), "docker", "echo started\necho ready");
        let runtime = ComposeRuntime::new(RuntimeConfig {
            docker_binary: docker,
            ..RuntimeConfig::default()
        });

        let lines: Vec<String> = runtime
            .logs(&stack_in(dir.path()), ServiceKind::Backend, LogOptions::default())
            .await
            .unwrap()
            .map(|line| line.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["started", "ready"]);
    }
}
