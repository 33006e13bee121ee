use conveyor_config::shared::BatcherConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, info, warn};

use crate::batch::policy::BatchPolicy;
use crate::bail;
use crate::concurrency::shutdown::{ShutdownSignal, ShutdownState};
use crate::error::{ConveyorError, ConveyorResult, ErrorKind};
use crate::input::Input;
use crate::metrics::register_metrics;
use crate::stage::StageState;
use crate::stage::batching::BatchingLoop;
use crate::transaction::{TransactionRx, create_transaction_channel};
use crate::workers::base::{Worker, WorkerHandle};

/// Default name used to label a stage's logs and metrics.
pub const DEFAULT_STAGE_NAME: &str = "batcher";

/// Worker wrapping an [`Input`] with a batching stage.
///
/// Starting the worker takes the transaction stream of the wrapped input and spawns the stage's
/// control loop. The returned [`Batcher`] is itself an [`Input`] producing batches.
///
/// ```rust,no_run
/// use conveyor::input::Input;
/// use conveyor::input::memory::MemoryInput;
/// use conveyor::workers::base::Worker;
/// use conveyor::workers::batcher::BatcherWorker;
/// use conveyor_config::shared::{BatchPolicyConfig, BatcherConfig};
///
/// # async fn example() -> conveyor::error::ConveyorResult<()> {
/// let (input, handle) = MemoryInput::new(16);
/// let config = BatcherConfig::with_batch(BatchPolicyConfig::with_count(3));
///
/// let mut batcher = BatcherWorker::new(config, input).start().await?;
/// let mut batches = batcher.take_transactions().expect("stream is taken once");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct BatcherWorker<I> {
    name: String,
    config: BatcherConfig,
    input: I,
    policy: Option<BatchPolicy>,
}

impl<I> BatcherWorker<I>
where
    I: Input,
{
    /// Creates a worker whose policy is built from `config.batch`.
    pub fn new(config: BatcherConfig, input: I) -> Self {
        Self {
            name: DEFAULT_STAGE_NAME.to_string(),
            config,
            input,
            policy: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Uses `policy` instead of building one from the configuration, e.g. to attach a check or
    /// processors.
    pub fn with_policy(mut self, policy: BatchPolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

impl<I> Worker<Batcher<I>, StageState> for BatcherWorker<I>
where
    I: Input,
{
    type Error = ConveyorError;

    async fn start(mut self) -> ConveyorResult<Batcher<I>> {
        info!(stage = %self.name, "starting batching stage");

        register_metrics();

        self.config.validate()?;

        let policy = match self.policy {
            Some(policy) => policy,
            None => BatchPolicy::new(self.config.batch.clone())?,
        };

        let Some(transactions) = self.input.take_transactions() else {
            bail!(
                ErrorKind::InputAlreadyTaken,
                "Transaction stream of the wrapped input was already taken"
            );
        };

        let (output_tx, output_rx) = create_transaction_channel(self.config.output_buffer);
        let (state_tx, state_rx) = watch::channel(StageState::Running);
        let shutdown = ShutdownSignal::new();
        let input = Arc::new(self.input);

        let batching_loop = BatchingLoop::new(
            self.name.clone(),
            input.clone(),
            policy,
            transactions,
            output_tx,
            shutdown.clone(),
            state_tx,
            self.config.maximum_shutdown_wait(),
        );

        let stage_span = tracing::info_span!("batcher", stage = %self.name);
        let handle = tokio::spawn(batching_loop.run().instrument(stage_span.or_current()));

        Ok(Batcher {
            name: self.name,
            input,
            shutdown,
            transactions: Some(output_rx),
            state_rx,
            forced_close_margin: self.config.forced_close_margin(),
            handle: Some(handle),
        })
    }
}

/// A running batching stage.
///
/// Batches are read through [`Input::take_transactions`]. Each of them must be acknowledged:
/// the result is forwarded to every upstream transaction that contributed to it.
#[derive(Debug)]
pub struct Batcher<I> {
    name: String,
    input: Arc<I>,
    shutdown: ShutdownSignal,
    transactions: Option<TransactionRx>,
    state_rx: watch::Receiver<StageState>,
    forced_close_margin: Duration,
    handle: Option<JoinHandle<ConveyorResult<()>>>,
}

impl<I> Batcher<I>
where
    I: Input,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requests a forced close: every blocking wait of the stage gives up immediately and
    /// unresolved batches are abandoned.
    pub fn close_now(&self) {
        self.shutdown.close_now();
    }

    /// Returns the state of the stage's shutdown signal.
    pub fn shutdown_state(&self) -> ShutdownState {
        self.shutdown.state()
    }

    /// Subscribes to stage state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<StageState> {
        self.state_rx.clone()
    }

    /// Returns the input wrapped by this stage.
    pub fn input(&self) -> &I {
        &self.input
    }
}

impl<I> Input for Batcher<I>
where
    I: Input,
{
    fn connected(&self) -> bool {
        self.input.connected()
    }

    fn take_transactions(&mut self) -> Option<TransactionRx> {
        self.transactions.take()
    }

    fn close_async(&self) {
        self.shutdown.close_at_leisure();
    }

    /// Waits for the stage to close, forcing closure `forced_close_margin` before `timeout`.
    async fn wait_for_close(&self, timeout: Duration) -> ConveyorResult<()> {
        let shutdown = self.shutdown.clone();
        let escalate_after = timeout.saturating_sub(self.forced_close_margin);

        tokio::spawn(async move {
            tokio::select! {
                biased;

                _ = shutdown.closed() => {}
                _ = tokio::time::sleep(escalate_after) => {
                    warn!(?timeout, "stage is still closing, forcing close");
                    shutdown.close_now();
                }
            }
        });

        if tokio::time::timeout(timeout, self.shutdown.closed())
            .await
            .is_err()
        {
            bail!(
                ErrorKind::ShutdownTimeout,
                "Batching stage did not close in time",
                format!("waited for {timeout:?}")
            );
        }

        Ok(())
    }
}

impl<I> WorkerHandle<StageState> for Batcher<I>
where
    I: Input,
{
    fn state(&self) -> StageState {
        *self.state_rx.borrow()
    }

    async fn wait(mut self) -> ConveyorResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle.await??;

        Ok(())
    }
}
