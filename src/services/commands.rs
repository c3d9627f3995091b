use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::time::sleep;
use uuid::Uuid;

use crate::db;
use crate::errors::EngineError;
use crate::execution::tick_runner::TickContext;
use crate::models::{Task, TaskDraft, TaskMode, TaskStatus};
use crate::scheduler::Scheduler;
use crate::services::notifier::{Notification, Notifier};

/// Inbound command channel.
pub const COMMANDS_CHANNEL: &str = "tasks:incoming";

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Wire format of an inbound command.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandEnvelope {
    action: String,
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    target_address: Option<String>,
    #[serde(default)]
    profile_url: Option<String>,
    #[serde(default)]
    operator_wallet: Option<String>,
    #[serde(default)]
    private_key: Option<String>,
    #[serde(default)]
    fixed_amount: Option<Decimal>,
    #[serde(default)]
    initial_finance: Option<Decimal>,
}

/// Command surface over the task registry: validates input, mutates the
/// store, keeps the schedule in sync and emits notifications.
pub struct TaskService {
    ctx: Arc<TickContext>,
    scheduler: Arc<Scheduler>,
    notifier: Notifier,
}

impl TaskService {
    pub fn new(ctx: Arc<TickContext>, scheduler: Arc<Scheduler>, notifier: Notifier) -> Self {
        Self {
            ctx,
            scheduler,
            notifier,
        }
    }

    /// Register a new task and start ticking it.
    ///
    /// Live tasks snapshot the operator's on-chain quote balance as their
    /// starting finance, and must hold at least 3× the per-BUY notional.
    pub async fn add_task(&self, cmd: AddTaskCommand) -> Result<Task, EngineError> {
        let mode = match cmd.mode.as_str() {
            "mock" => TaskMode::Mock {
                initial_finance: cmd.initial_finance.unwrap_or(Decimal::ZERO),
            },
            "live" => {
                let operator_wallet = cmd
                    .operator_wallet
                    .ok_or_else(|| EngineError::Validation("live task needs operatorWallet".into()))?;
                let private_key = cmd
                    .private_key
                    .ok_or_else(|| EngineError::Validation("live task needs privateKey".into()))?;

                let operator_addr = operator_wallet.parse().map_err(|_| {
                    EngineError::Validation(format!("bad operator wallet {operator_wallet}"))
                })?;
                let balance = self
                    .ctx
                    .balances
                    .quote_balance(operator_addr)
                    .await
                    .map_err(|e| EngineError::Transient(e.to_string()))?;

                if balance < cmd.fixed_amount * Decimal::from(3) {
                    return Err(EngineError::Validation(format!(
                        "balance {balance} below 3x fixed amount {}",
                        cmd.fixed_amount
                    )));
                }

                TaskMode::Live {
                    operator_wallet,
                    private_key,
                    initial_finance: balance,
                }
            }
            other => {
                return Err(EngineError::Validation(format!("unsupported mode {other}")));
            }
        };

        let task = self
            .ctx
            .tasks
            .create(TaskDraft {
                mode,
                target_address: cmd.target_address,
                profile_url: cmd.profile_url,
                fixed_amount: cmd.fixed_amount,
            })
            .await?;

        self.scheduler.schedule(task.id).await;
        self.notifier
            .publish(&Notification::task_created(task.id))
            .await;

        tracing::info!(
            task_id = %task.id,
            mode = %task.mode,
            target = %task.target_address,
            "Task created"
        );
        Ok(task)
    }

    pub async fn stop_task(&self, id: Uuid) -> Result<Task, EngineError> {
        let task = self.ctx.tasks.set_status(id, TaskStatus::Stopped).await?;
        self.scheduler.unschedule(id).await;
        self.notifier.publish(&Notification::task_stopped(id)).await;

        tracing::info!(task_id = %id, "Task stopped");
        Ok(task)
    }

    pub async fn restart_task(&self, id: Uuid) -> Result<Task, EngineError> {
        let task = self.ctx.tasks.set_status(id, TaskStatus::Running).await?;
        self.scheduler.schedule(id).await;
        self.notifier
            .publish(&Notification::task_restarted(id))
            .await;

        tracing::info!(task_id = %id, "Task restarted");
        Ok(task)
    }

    /// Remove one task — or every task — together with all owned rows.
    pub async fn remove_task(&self, id: Option<Uuid>) -> Result<usize, EngineError> {
        let removed = match id {
            Some(id) => {
                self.scheduler.unschedule(id).await;
                let Some(task) = self.ctx.tasks.remove(id).await? else {
                    return Err(EngineError::TaskNotFound(id));
                };
                db::purge_task(&self.ctx.pool, task.id).await?;
                self.ctx.forget_task(task.id).await;
                self.notifier
                    .publish(&Notification::task_removed(Some(id)))
                    .await;
                1
            }
            None => {
                let tasks = self.ctx.tasks.remove_all().await?;
                for task in &tasks {
                    self.scheduler.unschedule(task.id).await;
                    db::purge_task(&self.ctx.pool, task.id).await?;
                    self.ctx.forget_task(task.id).await;
                }
                self.notifier
                    .publish(&Notification::task_removed(None))
                    .await;
                tasks.len()
            }
        };

        tracing::info!(removed, "Task removal complete");
        Ok(removed)
    }

    async fn handle_payload(&self, payload: &str) {
        let envelope: CommandEnvelope = match serde_json::from_str(payload) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected malformed command payload");
                self.notifier
                    .publish(&Notification::task_error(None, format!("bad JSON: {e}")))
                    .await;
                return;
            }
        };

        let action = envelope.action.clone();
        if let Err(e) = self.dispatch(envelope).await {
            tracing::warn!(action, error = %e, "Command rejected");
            self.notifier
                .publish(&Notification::task_error(None, e.to_string()))
                .await;
        }
    }

    async fn dispatch(&self, envelope: CommandEnvelope) -> Result<(), EngineError> {
        match envelope.action.as_str() {
            "add" => {
                let cmd = AddTaskCommand::try_from(envelope)?;
                self.add_task(cmd).await?;
            }
            "stop" => {
                self.stop_task(parse_task_id(&envelope)?).await?;
            }
            "restart" => {
                self.restart_task(parse_task_id(&envelope)?).await?;
            }
            "remove" => {
                match envelope.task_id.as_deref() {
                    Some("all") | None => self.remove_task(None).await?,
                    Some(_) => self.remove_task(Some(parse_task_id(&envelope)?)).await?,
                };
            }
            other => {
                return Err(EngineError::Validation(format!(
                    "unsupported action {other}"
                )));
            }
        }
        Ok(())
    }
}

/// Validated `add` command.
#[derive(Debug, Clone)]
pub struct AddTaskCommand {
    pub mode: String,
    pub target_address: String,
    pub profile_url: Option<String>,
    pub operator_wallet: Option<String>,
    pub private_key: Option<String>,
    pub fixed_amount: Decimal,
    pub initial_finance: Option<Decimal>,
}

impl TryFrom<CommandEnvelope> for AddTaskCommand {
    type Error = EngineError;

    fn try_from(env: CommandEnvelope) -> Result<Self, Self::Error> {
        Ok(Self {
            mode: env
                .mode
                .ok_or_else(|| EngineError::Validation("add needs mode".into()))?,
            target_address: env
                .target_address
                .ok_or_else(|| EngineError::Validation("add needs targetAddress".into()))?,
            profile_url: env.profile_url,
            operator_wallet: env.operator_wallet,
            private_key: env.private_key,
            fixed_amount: env
                .fixed_amount
                .ok_or_else(|| EngineError::Validation("add needs fixedAmount".into()))?,
            initial_finance: env.initial_finance,
        })
    }
}

fn parse_task_id(env: &CommandEnvelope) -> Result<Uuid, EngineError> {
    let raw = env
        .task_id
        .as_deref()
        .ok_or_else(|| EngineError::Validation("missing taskId".into()))?;
    raw.parse()
        .map_err(|_| EngineError::Validation(format!("bad taskId {raw}")))
}

/// Consume inbound commands from the shared channel, reconnecting forever.
pub async fn run_command_listener(service: Arc<TaskService>, client: redis::Client) {
    loop {
        match listen_once(&service, &client).await {
            Ok(()) => tracing::info!("Command subscription closed"),
            Err(e) => tracing::error!(error = %e, "Command listener error, reconnecting"),
        }
        sleep(RECONNECT_DELAY).await;
    }
}

async fn listen_once(
    service: &TaskService,
    client: &redis::Client,
) -> Result<(), redis::RedisError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(COMMANDS_CHANNEL).await?;
    tracing::info!(channel = COMMANDS_CHANNEL, "Command listener subscribed");

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read command payload");
                continue;
            }
        };

        service.handle_payload(&payload).await;
    }

    Ok(())
}
