use crate::{
    Error,
    Result,
    ValidationError,
    catalog::{
        Category,
        IngredientCatalog,
    },
    display::format_hash,
    error::CallFailure,
    identifier::Identifier,
    ledger::{
        CallHash,
        CallOutcome,
        PizzaLedger,
    },
    options::{
        BlockSelection,
        OptionSet,
        OptionSetAggregator,
    },
    order::{
        ComposedOrder,
        compose_order,
    },
    round::{
        Clock,
        Countdown,
        PendingKind,
        RoundPhase,
        RoundSnapshot,
        RoundStateMachine,
        SystemClock,
    },
    submission::SubmissionCoordinator,
};
use alloy::primitives::U256;
use std::{
    sync::{
        Arc,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
    time::Duration,
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time,
};
use tracing::{
    debug,
    error,
    info,
    warn,
};

const MAX_ERRORS: usize = 50;

/// Reconciles local selection state with the round mirrored from the ledger.
pub struct GameClient<L, C = SystemClock> {
    ledger: Arc<L>,
    clock: C,
    catalog: IngredientCatalog,
    random_window: Option<u64>,
    machine: RoundStateMachine,
    coordinator: SubmissionCoordinator,
    options: Option<OptionSet>,
    order: ComposedOrder,
    status: String,
    errors: Vec<String>,
}

impl<L: PizzaLedger, C: Clock> GameClient<L, C> {
    pub fn new(ledger: Arc<L>, clock: C, catalog: IngredientCatalog) -> Self {
        Self {
            ledger,
            clock,
            catalog,
            random_window: None,
            machine: RoundStateMachine::new(),
            coordinator: SubmissionCoordinator::new(),
            options: None,
            order: ComposedOrder::default(),
            status: String::from("Not loaded"),
            errors: Vec::new(),
        }
    }

    /// Discovery mode picks its blocks at random from the last `window + 1`.
    pub fn with_random_blocks(mut self, window: Option<u64>) -> Self {
        self.random_window = window;
        self
    }

    pub fn ledger(&self) -> Arc<L> {
        self.ledger.clone()
    }

    pub fn catalog(&self) -> &IngredientCatalog {
        &self.catalog
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn phase(&self) -> RoundPhase {
        self.machine.phase(self.clock.now())
    }

    pub fn countdown(&self) -> Countdown {
        self.machine.countdown(self.clock.now())
    }

    pub fn round(&self) -> Option<&RoundSnapshot> {
        self.machine.snapshot()
    }

    pub fn round_id(&self) -> U256 {
        self.machine.round_id()
    }

    pub fn machine(&self) -> &RoundStateMachine {
        &self.machine
    }

    pub fn coordinator(&self) -> &SubmissionCoordinator {
        &self.coordinator
    }

    pub fn options(&self) -> Option<&OptionSet> {
        self.options.as_ref()
    }

    pub fn order(&self) -> &ComposedOrder {
        &self.order
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn select(&mut self, identifier: Identifier, category: Category) {
        self.coordinator.select(identifier, category);
    }

    pub fn reset_selection(&mut self) {
        self.coordinator.reset();
    }

    /// One batch of reads, applied all at once. Returns `true` on a round
    /// transition. On failure nothing is applied.
    pub async fn refresh(&mut self) -> Result<bool> {
        match self.load().await {
            Ok((snapshot, options)) => Ok(self.apply(snapshot, options)),
            Err(e) => {
                self.status = String::from("Refresh failed");
                self.push_errors(vec![format!("refresh: {}", e.human_message())]);
                Err(e)
            }
        }
    }

    async fn load(&self) -> Result<(RoundSnapshot, OptionSet)> {
        let snapshot = RoundSnapshot::fetch(&*self.ledger).await?;
        let options = if snapshot.exists() {
            OptionSetAggregator::new(&self.catalog)
                .from_round(&*self.ledger, snapshot.round_id, &snapshot.lengths)
                .await?
        } else {
            self.discover().await?
        };
        Ok((snapshot, options))
    }

    fn block_selection(&self) -> BlockSelection {
        match self.random_window {
            Some(window) => BlockSelection::random(window, &mut rand::rng()),
            None => BlockSelection::recent(),
        }
    }

    async fn discover(&self) -> Result<OptionSet> {
        let selection = self.block_selection();
        OptionSetAggregator::new(&self.catalog)
            .discover(&*self.ledger, selection)
            .await
    }

    fn apply(&mut self, snapshot: RoundSnapshot, options: OptionSet) -> bool {
        let order = compose_order(&self.catalog, Some(&snapshot));
        let own_build = snapshot.has_own_build();
        let round_id = snapshot.round_id;
        let transition = self.machine.apply_snapshot(snapshot);
        if transition {
            info!(%round_id, "round transition, clearing selection");
            self.coordinator.clear_all();
        }
        if own_build {
            self.coordinator.mark_awaiting_finalize();
        }
        self.options = Some(options);
        self.order = order;
        self.status = self.status_line();
        transition
    }

    pub fn status_line(&self) -> String {
        let phase = self.phase();
        let selected = self
            .coordinator
            .selection()
            .iter()
            .filter(|(_, s)| s.is_some())
            .count();
        match phase {
            RoundPhase::NoRound => format!("No round | {selected}/3 selected"),
            RoundPhase::RoundActive => format!(
                "Round #{} active | {} left | {selected}/3 selected",
                self.round_id(),
                self.countdown()
            ),
            other => format!("Round #{} {other}", self.round_id()),
        }
    }

    /// Publishes the current discovery blocks as a new round.
    pub async fn start_round(&mut self) -> Result<CallHash> {
        let result = self.try_start_round().await;
        self.sent(PendingKind::StartRound, result)
    }

    async fn try_start_round(&self) -> Result<CallHash> {
        self.machine
            .check(PendingKind::StartRound, self.clock.now())?;
        let fresh;
        let options = match &self.options {
            Some(options) if options.is_discovery() => options,
            _ => {
                fresh = self.discover().await?;
                &fresh
            }
        };
        let args = options.for_create_round()?;
        self.ledger.create_round(args).await
    }

    pub async fn submit_build(&mut self) -> Result<CallHash> {
        let result = self.try_submit_build().await;
        self.sent(PendingKind::Build, result)
    }

    async fn try_submit_build(&mut self) -> Result<CallHash> {
        let now = self.clock.now();
        self.machine.check(PendingKind::Build, now)?;
        let phase = self.machine.phase(now);
        let options = self
            .options
            .as_ref()
            .ok_or(ValidationError::OptionsNotLoaded)?;
        self.coordinator
            .submit(&*self.ledger, phase, options)
            .await
    }

    pub async fn finalize_round(&mut self) -> Result<CallHash> {
        let result = match self.machine.check(PendingKind::Finalize, self.clock.now()) {
            Ok(()) => self.ledger.finalize_round().await,
            Err(e) => Err(e.into()),
        };
        self.sent(PendingKind::Finalize, result)
    }

    fn sent(&mut self, kind: PendingKind, result: Result<CallHash>) -> Result<CallHash> {
        match result {
            Ok(hash) => {
                info!(action = kind.action(), %hash, "call submitted");
                self.machine.begin_call(kind, hash);
                self.status = format!("{} sent: {}", kind.action(), format_hash(hash));
                Ok(hash)
            }
            Err(e) => {
                if !e.is_validation() {
                    warn!(action = kind.action(), error = %e, "call failed");
                }
                self.status = format!("{} failed", kind.action());
                self.push_errors(vec![format!("{}: {}", kind.action(), e.human_message())]);
                Err(e)
            }
        }
    }

    /// Reacts to the receipt of an outstanding call. A confirmed call triggers
    /// a full refresh; anything else leaves the phase as it was.
    pub async fn on_receipt(
        &mut self,
        hash: CallHash,
        outcome: Result<CallOutcome>,
    ) -> Result<bool> {
        let Some(call) = self.machine.finish_call(hash) else {
            debug!(%hash, "receipt for a call that is no longer tracked");
            return Ok(false);
        };
        let action = call.kind.action();
        let failure = match outcome {
            Ok(CallOutcome::Confirmed) => {
                info!(action, %hash, "call confirmed");
                if call.kind == PendingKind::Build {
                    self.coordinator.on_confirmed(hash);
                }
                self.status = format!("{action} confirmed");
                return self.refresh().await;
            }
            Ok(CallOutcome::Reverted) => Error::CallRejected(CallFailure::new(format!(
                "{action} reverted: {}",
                format_hash(hash)
            ))),
            Err(e) => e,
        };
        warn!(action, %hash, error = %failure, "call did not go through");
        if call.kind == PendingKind::Build {
            self.coordinator.on_failed(hash, failure.human_message());
        }
        self.status = format!("{action} failed");
        self.push_errors(vec![format!("{action}: {}", failure.human_message())]);
        Err(failure)
    }

    fn push_errors(&mut self, mut items: Vec<String>) {
        if items.is_empty() {
            return;
        }
        for item in &items {
            error!("{}", item);
        }
        self.errors.append(&mut items);
        if self.errors.len() > MAX_ERRORS {
            let drain = self.errors.len() - MAX_ERRORS;
            self.errors.drain(0..drain);
        }
    }
}

#[derive(Debug)]
pub enum ViewEvent {
    Tick,
    Receipt {
        hash: CallHash,
        outcome: Result<CallOutcome>,
    },
}

/// Shared flag telling background tasks whether their view still exists.
#[derive(Clone, Debug)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn kill(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A [`GameClient`] with its countdown ticker and receipt watchers.
///
/// The tasks live exactly as long as the view; dropping it aborts them.
pub struct RoundView<L: PizzaLedger, C: Clock = SystemClock> {
    client: GameClient<L, C>,
    events_tx: mpsc::Sender<ViewEvent>,
    events_rx: mpsc::Receiver<ViewEvent>,
    ticker: JoinHandle<()>,
    watchers: Vec<JoinHandle<()>>,
    liveness: Liveness,
    receipt_timeout: Duration,
}

impl<L: PizzaLedger, C: Clock> RoundView<L, C> {
    /// Must be called inside a tokio runtime.
    pub fn open(client: GameClient<L, C>, tick: Duration, receipt_timeout: Duration) -> Self {
        let (events_tx, events_rx) = mpsc::channel(16);
        let liveness = Liveness::new();
        let ticker = {
            let tx = events_tx.clone();
            let liveness = liveness.clone();
            tokio::spawn(async move {
                let mut interval = time::interval(tick);
                interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    if !liveness.is_alive() || tx.send(ViewEvent::Tick).await.is_err() {
                        break;
                    }
                }
            })
        };
        Self {
            client,
            events_tx,
            events_rx,
            ticker,
            watchers: Vec::new(),
            liveness,
            receipt_timeout,
        }
    }

    pub fn client(&self) -> &GameClient<L, C> {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut GameClient<L, C> {
        &mut self.client
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    pub async fn start_round(&mut self) -> Result<CallHash> {
        let hash = self.client.start_round().await?;
        self.watch(hash);
        Ok(hash)
    }

    pub async fn submit_build(&mut self) -> Result<CallHash> {
        let hash = self.client.submit_build().await?;
        self.watch(hash);
        Ok(hash)
    }

    pub async fn finalize_round(&mut self) -> Result<CallHash> {
        let hash = self.client.finalize_round().await?;
        self.watch(hash);
        Ok(hash)
    }

    fn watch(&mut self, hash: CallHash) {
        self.watchers.retain(|handle| !handle.is_finished());
        let ledger = self.client.ledger();
        let tx = self.events_tx.clone();
        let liveness = self.liveness.clone();
        let timeout = self.receipt_timeout;
        self.watchers.push(tokio::spawn(async move {
            let outcome = match time::timeout(timeout, ledger.wait_for_receipt(hash)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::CallRejected(CallFailure::new(format!(
                    "no receipt for {} after {}s",
                    format_hash(hash),
                    timeout.as_secs()
                )))),
            };
            if liveness.is_alive() {
                let _ = tx.send(ViewEvent::Receipt { hash, outcome }).await;
            } else {
                debug!(%hash, "dropping receipt for a closed view");
            }
        }));
    }

    pub async fn next_event(&mut self) -> Option<ViewEvent> {
        self.events_rx.recv().await
    }

    /// Applies one event. Returns `true` when it led to a round transition.
    pub async fn handle(&mut self, event: ViewEvent) -> Result<bool> {
        if !self.liveness.is_alive() {
            return Ok(false);
        }
        match event {
            ViewEvent::Tick => Ok(false),
            ViewEvent::Receipt { hash, outcome } => self.client.on_receipt(hash, outcome).await,
        }
    }
}

impl<L: PizzaLedger, C: Clock> Drop for RoundView<L, C> {
    fn drop(&mut self) {
        self.liveness.kill();
        self.ticker.abort();
        for watcher in &self.watchers {
            watcher.abort();
        }
    }
}
