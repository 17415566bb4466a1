//! `taskhive run`: execute a YAML taskfile with the mock executor.
//!
//! The taskfile declares agents and tasks; task dependencies are
//! referenced by name and resolved to ids at submission time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use serde::Deserialize;
use uuid::Uuid;

use crate::application::Coordinator;
use crate::cli::output::table::TableFormatter;
use crate::domain::models::{Agent, Config, Task, TaskKind, TaskPriority};
use crate::infrastructure::executors::MockExecutor;

#[derive(Args)]
pub struct RunArgs {
    /// Path to the YAML taskfile
    #[arg(long, short)]
    pub tasks: PathBuf,
}

#[derive(Debug, Deserialize)]
struct TaskFile {
    #[serde(default)]
    agents: Vec<AgentSpec>,
    tasks: Vec<TaskSpec>,
}

#[derive(Debug, Deserialize)]
struct AgentSpec {
    agent_type: String,
    capabilities: Vec<String>,
    #[serde(default)]
    max_concurrent: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct TaskSpec {
    name: String,
    description: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    max_retries: Option<u32>,
}

fn parse_kind(s: &str) -> TaskKind {
    match s {
        "research" => TaskKind::Research,
        "implementation" => TaskKind::Implementation,
        "analysis" => TaskKind::Analysis,
        other => TaskKind::Custom(other.to_string()),
    }
}

fn build_task(spec: &TaskSpec, deps: &[Uuid], defaults: &Config) -> Result<Task> {
    let mut task = Task::new(&spec.description)
        .with_max_retries(spec.max_retries.unwrap_or(defaults.retry.max_retries));
    if let Some(kind) = &spec.kind {
        task = task.with_kind(parse_kind(kind));
    }
    if let Some(priority) = &spec.priority {
        let parsed = TaskPriority::from_str(priority)
            .ok_or_else(|| anyhow!("Unknown priority '{priority}' in task '{}'", spec.name))?;
        task = task.with_priority(parsed);
    }
    if let Some(timeout_ms) = spec.timeout_ms {
        task = task.with_timeout_ms(timeout_ms);
    }
    for &dep in deps {
        task = task.with_dependency(dep);
    }
    Ok(task)
}

pub async fn execute(args: RunArgs, config: Config, json: bool) -> Result<()> {
    let raw = std::fs::read_to_string(&args.tasks)
        .with_context(|| format!("Failed to read taskfile {}", args.tasks.display()))?;
    let taskfile: TaskFile = serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse taskfile {}", args.tasks.display()))?;
    if taskfile.tasks.is_empty() {
        bail!("Taskfile declares no tasks");
    }

    let coordinator = Arc::new(Coordinator::new(
        config.clone(),
        Arc::new(MockExecutor::new()),
    ));

    if taskfile.agents.is_empty() {
        coordinator
            .spawn_agent(Agent::new(
                "general",
                vec!["general".to_string()],
                config.agents.max_concurrent_default,
            ))
            .await?;
    }
    for spec in &taskfile.agents {
        coordinator
            .spawn_agent(Agent::new(
                &spec.agent_type,
                spec.capabilities.clone(),
                spec.max_concurrent
                    .unwrap_or(config.agents.max_concurrent_default),
            ))
            .await?;
    }

    // Submit in dependency order, resolving names to ids as we go. A pass
    // with no progress means an unknown name or a name-level cycle.
    let mut ids: HashMap<String, Uuid> = HashMap::new();
    let mut remaining: Vec<&TaskSpec> = taskfile.tasks.iter().collect();
    while !remaining.is_empty() {
        let mut next = Vec::new();
        let mut progressed = false;
        for spec in remaining {
            if ids.contains_key(&spec.name) {
                bail!("Duplicate task name '{}'", spec.name);
            }
            let deps: Option<Vec<Uuid>> = spec
                .depends_on
                .iter()
                .map(|name| ids.get(name).copied())
                .collect();
            match deps {
                Some(deps) => {
                    let task = build_task(spec, &deps, &config)?;
                    let id = coordinator
                        .submit_task(task)
                        .await
                        .with_context(|| format!("Failed to submit task '{}'", spec.name))?;
                    ids.insert(spec.name.clone(), id);
                    progressed = true;
                }
                None => next.push(spec),
            }
        }
        if !progressed {
            let names: Vec<&str> = next.iter().map(|s| s.name.as_str()).collect();
            bail!(
                "Unresolvable dependencies (unknown name or cycle) among tasks: {}",
                names.join(", ")
            );
        }
        remaining = next;
    }

    let handles = coordinator.start();
    coordinator.wait_until_idle().await;
    coordinator.shutdown().await;
    futures::future::join_all(handles).await;

    let tasks = coordinator.queue().list_tasks().await;
    let stats = coordinator.stats().await;
    if json {
        let payload = serde_json::json!({
            "tasks": tasks,
            "stats": stats.queue,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        let names: HashMap<Uuid, &str> = ids
            .iter()
            .map(|(name, &id)| (id, name.as_str()))
            .collect();
        let formatter = TableFormatter::new();
        println!("{}", formatter.format_tasks(&tasks, &names));
        println!(
            "\n{} completed, {} failed, {} cancelled",
            stats.queue.completed, stats.queue.failed, stats.queue.cancelled
        );
    }

    if stats.queue.failed > 0 {
        bail!("{} task(s) failed", stats.queue.failed);
    }
    Ok(())
}
