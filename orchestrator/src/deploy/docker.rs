//! Docker Compose executor

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::deploy::compose::ComposePlan;
use crate::deploy::executor::Executor;
use crate::deploy::health::HealthVerdict;
use crate::errors::OrchestratorError;

/// Compose project name used for every invocation
pub const PROJECT_NAME: &str = "suite";

/// Renders `docker compose` argument lists
#[derive(Debug, Clone)]
pub struct ComposeCommand {
    project: String,
    project_dir: PathBuf,
    env_files: Vec<PathBuf>,
    fragments: Vec<String>,
}

impl ComposeCommand {
    pub fn new(project: &str, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project: project.to_string(),
            project_dir: project_dir.into(),
            env_files: Vec::new(),
            fragments: Vec::new(),
        }
    }

    /// Add an env file. Missing files are skipped at render time by the caller.
    pub fn env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_files.push(path.into());
        self
    }

    pub fn fragments(mut self, fragments: &[String]) -> Self {
        self.fragments = fragments.to_vec();
        self
    }

    /// Global arguments followed by the subcommand arguments
    pub fn render(&self, subcommand: &[&str]) -> Vec<String> {
        let mut args = vec![
            "compose".to_string(),
            "-p".to_string(),
            self.project.clone(),
            "--project-directory".to_string(),
            self.project_dir.display().to_string(),
        ];
        for env_file in &self.env_files {
            args.push("--env-file".to_string());
            args.push(env_file.display().to_string());
        }
        for fragment in &self.fragments {
            args.push("-f".to_string());
            args.push(self.project_dir.join(fragment).display().to_string());
        }
        args.extend(subcommand.iter().map(|s| s.to_string()));
        args
    }

    /// `up -d` for the plan's services
    pub fn up_args(&self, plan: &ComposePlan) -> Vec<String> {
        let mut sub = vec!["up", "-d"];
        if plan.no_deps {
            sub.push("--no-deps");
        }
        if plan.force_recreate {
            sub.push("--force-recreate");
        }
        sub.extend(plan.services.iter().map(|s| s.as_str()));
        self.render(&sub)
    }

    /// `pull` restricted to the plan's services
    pub fn pull_args(&self, plan: &ComposePlan) -> Vec<String> {
        let mut sub = vec!["pull", "--ignore-buildable"];
        sub.extend(plan.services.iter().map(|s| s.as_str()));
        self.render(&sub)
    }

    pub fn stop_args(&self, plan: &ComposePlan) -> Vec<String> {
        let mut sub = vec!["stop"];
        sub.extend(plan.services.iter().map(|s| s.as_str()));
        self.render(&sub)
    }

    pub fn remove_args(&self, plan: &ComposePlan) -> Vec<String> {
        let mut sub = vec!["rm", "-s", "-f"];
        sub.extend(plan.services.iter().map(|s| s.as_str()));
        self.render(&sub)
    }
}

/// Map `docker inspect` state output (`<status>|<health>`) to a verdict
pub fn parse_inspect_state(output: &str) -> HealthVerdict {
    let (status, health) = output.trim().split_once('|').unwrap_or((output.trim(), ""));
    match health.trim() {
        "healthy" => HealthVerdict::Healthy,
        "unhealthy" => HealthVerdict::Unhealthy,
        "starting" => HealthVerdict::Starting,
        _ => match status.trim() {
            "running" => HealthVerdict::NoHealthcheck,
            "exited" | "dead" => HealthVerdict::Unhealthy,
            _ => HealthVerdict::Starting,
        },
    }
}

/// Executor shelling out to `docker compose`
#[derive(Debug, Clone)]
pub struct DockerComposeExecutor {
    compose_dir: PathBuf,
    env_files: Vec<PathBuf>,
}

impl DockerComposeExecutor {
    pub fn new(compose_dir: impl Into<PathBuf>, env_files: Vec<PathBuf>) -> Self {
        Self {
            compose_dir: compose_dir.into(),
            env_files,
        }
    }

    fn command(&self, fragments: &[String]) -> ComposeCommand {
        let mut cmd = ComposeCommand::new(PROJECT_NAME, &self.compose_dir);
        for env_file in self.env_files.iter().filter(|p| p.exists()) {
            cmd = cmd.env_file(env_file);
        }
        cmd.fragments(fragments)
    }

    async fn run(
        &self,
        label: &str,
        args: Vec<String>,
        plan: Option<&ComposePlan>,
        stdin: Option<Vec<u8>>,
    ) -> Result<Vec<u8>, OrchestratorError> {
        if stdin.is_some() {
            debug!("Running docker {} (with stdin)", label);
        } else {
            debug!("Running docker {}", args.join(" "));
        }

        let mut command = Command::new("docker");
        command
            .args(&args)
            .current_dir(existing_dir(&self.compose_dir))
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(plan) = plan {
            command.envs(&plan.env);
        }

        let output = run_with_input(command, stdin).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchestratorError::Mutation(format!(
                "docker {} failed: {}",
                label,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

/// Spawn `command`, feed it `stdin` and collect its output.
///
/// Input is written from a separate task while stdout and stderr are drained,
/// so a child that talks while reading never blocks on a full pipe.
async fn run_with_input(mut command: Command, stdin: Option<Vec<u8>>) -> Result<Output, OrchestratorError> {
    let mut child = command
        .spawn()
        .map_err(|e| OrchestratorError::Mutation(format!("Failed to run docker: {}", e)))?;

    let writer = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => Some(tokio::spawn(async move {
            pipe.write_all(&input).await?;
            pipe.shutdown().await
        })),
        _ => None,
    };

    let output = child.wait_with_output().await?;
    if let Some(writer) = writer {
        let written = writer
            .await
            .map_err(|e| OrchestratorError::Internal(format!("stdin writer failed: {}", e)))?;
        // A failed child explains itself on stderr; a broken pipe adds nothing
        if output.status.success() {
            written?;
        }
    }
    Ok(output)
}

fn existing_dir(path: &Path) -> &Path {
    if path.is_dir() {
        path
    } else {
        Path::new(".")
    }
}

#[async_trait]
impl Executor for DockerComposeExecutor {
    async fn check_available(&self) -> Result<(), OrchestratorError> {
        let output = Command::new("docker")
            .args(["compose", "version", "--short"])
            .output()
            .await
            .map_err(|e| OrchestratorError::Prerequisite(format!("docker is not installed: {}", e)))?;
        if !output.status.success() {
            return Err(OrchestratorError::Prerequisite(
                "docker compose plugin is not available".to_string(),
            ));
        }

        let daemon = Command::new("docker")
            .args(["info", "--format", "{{.ServerVersion}}"])
            .output()
            .await
            .map_err(|e| OrchestratorError::Prerequisite(format!("docker info failed: {}", e)))?;
        if !daemon.status.success() {
            return Err(OrchestratorError::Prerequisite(
                "docker daemon is not reachable".to_string(),
            ));
        }
        Ok(())
    }

    async fn pull(&self, plan: &ComposePlan) -> Result<(), OrchestratorError> {
        info!("Pulling images for: {}", plan.services.join(", "));
        let args = self.command(&plan.fragments).pull_args(plan);
        self.run("compose pull", args, Some(plan), None).await.map(|_| ())
    }

    async fn up(&self, plan: &ComposePlan) -> Result<(), OrchestratorError> {
        info!("Starting services: {}", plan.services.join(", "));
        let args = self.command(&plan.fragments).up_args(plan);
        self.run("compose up", args, Some(plan), None).await.map(|_| ())
    }

    async fn stop(&self, plan: &ComposePlan) -> Result<(), OrchestratorError> {
        info!("Stopping services: {}", plan.services.join(", "));
        let args = self.command(&plan.fragments).stop_args(plan);
        self.run("compose stop", args, Some(plan), None).await.map(|_| ())
    }

    async fn remove(&self, plan: &ComposePlan) -> Result<(), OrchestratorError> {
        info!("Removing containers: {}", plan.services.join(", "));
        let args = self.command(&plan.fragments).remove_args(plan);
        self.run("compose rm", args, Some(plan), None).await.map(|_| ())
    }

    async fn running_services(&self) -> Result<BTreeSet<String>, OrchestratorError> {
        let args = self
            .command(&[])
            .render(&["ps", "--services", "--status", "running"]);
        let stdout = self.run("compose ps", args, None, None).await?;
        Ok(String::from_utf8_lossy(&stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    async fn health(&self, service: &str) -> Result<HealthVerdict, OrchestratorError> {
        let args = self.command(&[]).render(&["ps", "-a", "-q", service]);
        let stdout = self.run("compose ps", args, None, None).await?;
        let container = String::from_utf8_lossy(&stdout)
            .lines()
            .next()
            .map(|l| l.trim().to_string())
            .unwrap_or_default();
        if container.is_empty() {
            return Ok(HealthVerdict::NotFound);
        }

        let inspect = vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Status}}|{{if .State.Health}}{{.State.Health.Status}}{{end}}".to_string(),
            container,
        ];
        match self.run("inspect", inspect, None, None).await {
            Ok(out) => Ok(parse_inspect_state(&String::from_utf8_lossy(&out))),
            // Container vanished between ps and inspect
            Err(_) => Ok(HealthVerdict::NotFound),
        }
    }

    async fn exec(
        &self,
        service: &str,
        command: &[String],
        stdin: Option<Vec<u8>>,
    ) -> Result<Vec<u8>, OrchestratorError> {
        let mut sub = vec!["exec", "-T", service];
        sub.extend(command.iter().map(|s| s.as_str()));
        let args = self.command(&[]).render(&sub);
        self.run("compose exec", args, None, stdin).await
    }

    async fn logs_tail(&self, lines: usize) -> Result<String, OrchestratorError> {
        let tail = lines.to_string();
        let args = self
            .command(&[])
            .render(&["logs", "--no-color", "--timestamps", "--tail", &tail]);
        let stdout = self.run("compose logs", args, None, None).await?;
        Ok(String::from_utf8_lossy(&stdout).to_string())
    }

    async fn prune_images(&self) -> Result<(), OrchestratorError> {
        let args = vec!["image".to_string(), "prune".to_string(), "-f".to_string()];
        self.run("image prune", args, None, None).await.map(|_| ())
    }
}
