//! Executor thread hosting collector, decode and KPI tasks.

use embassy_executor::{Executor, SendSpawner, SpawnToken};
use std::sync::mpsc;
use std::sync::{Mutex, OnceLock};
use std::thread;

use crate::common::lock;

use super::EngineError;

static SHARED: OnceLock<Runtime> = OnceLock::new();
static SHARED_START: Mutex<()> = Mutex::new(());

/// Handle to a running embassy executor on its own OS thread.
///
/// The executor is leaked and runs for the rest of the process, so one
/// runtime is meant to host every engine: see [`Runtime::shared`]. Tasks end
/// on their own when their engine shuts down.
pub struct Runtime {
    spawner: SendSpawner,
}

impl Runtime {
    /// Start the executor thread and wait for its spawner.
    pub fn start(name: &str) -> Result<Self, EngineError> {
        let (spawner_tx, spawner_rx) = mpsc::channel();

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let executor: &'static mut Executor = Box::leak(Box::new(Executor::new()));
                executor.run(|spawner| {
                    let _ = spawner_tx.send(spawner.make_send());
                });
            })
            .map_err(|e| EngineError::Runtime(format!("failed to spawn executor thread: {}", e)))?;

        let spawner = spawner_rx
            .recv()
            .map_err(|_| EngineError::Runtime("executor thread exited before start".to_string()))?;
        log::debug!("Executor thread '{}' running", name);

        Ok(Self { spawner })
    }

    /// The process-wide runtime, started on first use.
    pub fn shared() -> Result<&'static Runtime, EngineError> {
        if let Some(runtime) = SHARED.get() {
            return Ok(runtime);
        }
        let _starting = lock(&SHARED_START);
        if let Some(runtime) = SHARED.get() {
            return Ok(runtime);
        }
        let runtime = Runtime::start("embassy-executor")?;
        Ok(SHARED.get_or_init(|| runtime))
    }

    /// Spawn a task created by an `#[embassy_executor::task]` function.
    ///
    /// # Returns
    ///
    /// `Err(EngineError::Spawn)` when the task's pool has no free slot.
    pub fn spawn<S: Send>(&self, task: &str, token: SpawnToken<S>) -> Result<(), EngineError> {
        self.spawner
            .spawn(token)
            .map_err(|e| EngineError::Spawn(format!("{}: {:?}", task, e)))
    }
}
