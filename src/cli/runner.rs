//! Wires the engine together for one command line invocation

use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;

use crate::adapter::AdapterRegistry;
use crate::cli::args::{Args, Command};
use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, Result};
use crate::job::JobServiceClient;
use crate::model::{ExecutionStatus, HealthStatus, Policy, Registry, TaskQuery, TriggerType};
use crate::operation::{DefaultScheduler, InMemoryExecutionManager, ReplicationController};
use crate::output::OutputManager;

pub struct Runner {
    args: Args,
    config: ReplicationConfig,
    output: OutputManager,
}

impl Runner {
    pub fn new(args: Args) -> Result<Self> {
        let output = if args.quiet {
            OutputManager::new_quiet()
        } else {
            OutputManager::new(args.verbose)
        };

        let config = load_config(args.config.as_deref())?;
        config.validate()?;

        Ok(Self { args, config, output })
    }

    pub fn output(&self) -> &OutputManager {
        &self.output
    }

    pub async fn run(&self) -> Result<()> {
        match &self.args.command {
            Command::Adapters => self.adapters(),
            Command::Validate { policy } => self.validate(policy),
            Command::Info { registry } => self.info(registry).await,
            Command::Plan { policy } => self.plan(policy).await,
            Command::Run { policy, dry_run } => self.replicate(policy, *dry_run).await,
        }
    }

    fn adapters(&self) -> Result<()> {
        let adapters = AdapterRegistry::with_defaults(&self.config);
        self.output.section("Registered adapters");
        for registry_type in adapters.types() {
            // bare names keep quiet output scriptable
            if self.output.is_quiet() {
                println!("{}", registry_type);
            } else {
                println!("  • {}", registry_type);
            }
        }
        Ok(())
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let policy: Policy = read_json(path)?;
        policy.validate()?;
        self.output
            .success(&format!("policy {} is valid ({} trigger)", policy.name, policy.trigger_type()));
        Ok(())
    }

    async fn info(&self, path: &Path) -> Result<()> {
        let registry: Registry = read_json(path)?;
        let adapter = AdapterRegistry::with_defaults(&self.config).create(&registry)?;

        self.output.step(&format!("querying {} at {}", registry.registry_type, registry.url));
        let info = adapter.info().await?;
        let health = adapter.health_check().await?;

        self.output.registry_info(&info);
        match health {
            HealthStatus::Healthy => self.output.success(&format!("registry {} is {}", registry.name, health)),
            HealthStatus::Unhealthy => self.output.warning(&format!("registry {} is {}", registry.name, health)),
        }
        Ok(())
    }

    async fn plan(&self, path: &Path) -> Result<()> {
        let policy: Policy = read_json(path)?;
        let controller = self.controller()?;

        let items = controller.plan_replication(&policy).await?;
        self.output
            .section(&format!("Policy {}: {} resources to replicate", policy.name, items.len()));
        self.output.schedule_items(&items);
        Ok(())
    }

    async fn replicate(&self, path: &Path, dry_run: bool) -> Result<()> {
        let policy: Policy = read_json(path)?;
        let controller = self.controller()?;

        self.output.section(&format!("Replicating policy {}", policy.name));
        if dry_run {
            self.output.info("Dry run mode - no job will be submitted");
        }

        let execution_id = controller
            .start_replication(&policy, None, TriggerType::Manual, dry_run)
            .await?;
        let execution = controller
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| ReplicationError::NotFound(format!("execution {}", execution_id)))?;
        let tasks = controller.list_tasks(&TaskQuery::for_execution(execution_id)).await?;

        self.output.execution(&execution);
        self.output.tasks(&tasks);

        if execution.status == ExecutionStatus::Failed {
            return Err(ReplicationError::Submission(execution.status_text));
        }
        self.output
            .success(&format!("Finished in {}", self.output.elapsed_time()));
        Ok(())
    }

    fn controller(&self) -> Result<ReplicationController> {
        let runner = Arc::new(JobServiceClient::from_config(&self.config)?);
        let scheduler = Arc::new(DefaultScheduler::new(runner, &self.config.core_url));
        Ok(ReplicationController::new(
            self.config.clone(),
            Arc::new(AdapterRegistry::with_defaults(&self.config)),
            Arc::new(InMemoryExecutionManager::new()),
            scheduler,
        ))
    }
}

/// Environment first, then the file's non-default values on top
pub fn load_config(path: Option<&Path>) -> Result<ReplicationConfig> {
    let config = ReplicationConfig::from_env();
    match path {
        Some(path) => Ok(config.merge(&ReplicationConfig::from_file(path)?)),
        None => Ok(config),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ReplicationError::Io(format!("cannot read {}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| ReplicationError::Parse(format!("invalid JSON in {}: {}", path.display(), e)))
}
