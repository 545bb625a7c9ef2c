use crate::{
    Error,
    Result,
    catalog::{
        Category,
        PerCategory,
    },
    error::CallFailure,
    identifier::Identifier,
    ledger::{
        Block,
        BlockRef,
        BlockSource,
        BuildArgs,
        CallHash,
        CallOutcome,
        CreateRoundArgs,
        LastWinner,
        RoundOption,
        RoundReader,
        RoundWriter,
        Transaction,
    },
    options::{
        CandidateOption,
        OptionSet,
        OptionSource,
    },
    resolver::resolve_index,
    round::{
        Clock,
        RoundSnapshot,
    },
};
use alloy::primitives::{
    Address,
    B256,
    Bytes,
    U256,
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        atomic::{
            AtomicU64,
            Ordering,
        },
    },
};
use tokio::sync::watch;

pub const START_TIME: u64 = 1_700_000_000;
pub const ROUND_DURATION: u64 = 120;

/// A transaction whose hash and selector are derived from `n`.
pub fn tx(n: u8) -> Transaction {
    let mut hash = [0u8; 32];
    hash[0] = 0xaa;
    hash[31] = n;
    Transaction {
        hash: Identifier::new(hash),
        gas: Some(21_000),
        gas_price: None,
        max_priority_fee_per_gas: None,
        input: Bytes::from(vec![0, 0, 0, n]),
        from: Address::repeat_byte(0x01),
        to: Some(Address::repeat_byte(0x02)),
    }
}

pub fn block_with(number: u64, base_fee: Option<u64>, txs: Vec<Transaction>) -> Block {
    Block {
        number,
        hash: B256::left_padding_from(&number.to_be_bytes()),
        timestamp: START_TIME + number,
        base_fee_per_gas: base_fee,
        transactions: txs,
    }
}

pub fn snapshot(round_id: U256, deadline: u64) -> RoundSnapshot {
    let lengths = if round_id.is_zero() {
        PerCategory::default()
    } else {
        PerCategory::new(1, 1, 1)
    };
    RoundSnapshot {
        round_id,
        deadline,
        start_time: deadline.saturating_sub(ROUND_DURATION),
        lengths,
        ..RoundSnapshot::default()
    }
}

pub fn option_set(
    sauce: impl IntoIterator<Item = Identifier>,
    cheese: impl IntoIterator<Item = Identifier>,
    topping: impl IntoIterator<Item = Identifier>,
) -> OptionSet {
    let to_options = |ids: Vec<Identifier>| {
        ids.into_iter()
            .map(|identifier| CandidateOption {
                identifier,
                fee: Some(U256::ZERO),
                ingredient: None,
            })
            .collect::<Vec<_>>()
    };
    OptionSet::new(
        OptionSource::Round {
            round_id: U256::from(1u64),
        },
        PerCategory::new(
            to_options(sauce.into_iter().collect()),
            to_options(cheese.into_iter().collect()),
            to_options(topping.into_iter().collect()),
        ),
    )
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(now)),
        }
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(START_TIME)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerCall {
    CreateRound(CreateRoundArgs),
    BuildOrder(BuildArgs),
    FinalizeRound,
}

#[derive(Clone, Debug, Default)]
struct FakeContract {
    round_id: U256,
    deadline: u64,
    start_time: u64,
    order: PerCategory<u8>,
    options: PerCategory<Vec<RoundOption>>,
    round_fee: U256,
    last_winner: LastWinner,
    last_finalized_round_id: U256,
    owner: Address,
    own_build_round: U256,
    own_build: Option<BuildArgs>,
}

impl FakeContract {
    fn lengths(&self) -> PerCategory<u64> {
        PerCategory::from_fn(|category| self.options[category].len() as u64)
    }

    fn apply(&mut self, call: &LedgerCall, signer: Address, now: u64) -> bool {
        match call {
            LedgerCall::CreateRound(args) => {
                if !self.round_id.is_zero() && now < self.deadline {
                    return false;
                }
                let catalog_len = PerCategory::new(8usize, 4, 8);
                self.options = PerCategory::from_fn(|category| {
                    args.hashes[category]
                        .iter()
                        .zip(&args.fees[category])
                        .map(|(identifier, fee)| RoundOption {
                            identifier: *identifier,
                            fee: *fee,
                        })
                        .collect()
                });
                self.order = PerCategory::from_fn(|category| {
                    self.options[category]
                        .first()
                        .and_then(|o| resolve_index(&o.identifier, catalog_len[category]))
                        .and_then(|i| u8::try_from(i).ok())
                        .unwrap_or(0)
                });
                self.round_fee = Category::ALL
                    .iter()
                    .flat_map(|c| self.options[*c].iter().map(|o| o.fee))
                    .fold(U256::ZERO, |acc, fee| acc.saturating_add(fee));
                self.round_id = self.last_finalized_round_id.max(self.round_id) + U256::from(1u64);
                self.start_time = now;
                self.deadline = now + ROUND_DURATION;
                self.own_build = None;
                true
            }
            LedgerCall::BuildOrder(args) => {
                if self.round_id.is_zero() || now >= self.deadline {
                    return false;
                }
                self.own_build_round = self.round_id;
                self.own_build = Some(*args);
                true
            }
            LedgerCall::FinalizeRound => {
                if self.round_id.is_zero() {
                    return false;
                }
                self.last_winner = match self.own_build {
                    Some(_) => LastWinner {
                        winner: signer,
                        time_taken: U256::from(now.saturating_sub(self.start_time)),
                        total_fee: self.round_fee,
                    },
                    None => LastWinner::default(),
                };
                self.last_finalized_round_id = self.round_id;
                self.round_id = U256::ZERO;
                self.deadline = 0;
                self.start_time = 0;
                self.order = PerCategory::default();
                self.options = PerCategory::default();
                self.round_fee = U256::ZERO;
                self.own_build = None;
                true
            }
        }
    }
}

#[derive(Debug)]
struct FakeState {
    chain_id: u64,
    signer: Option<Address>,
    blocks: Vec<Block>,
    block_requests: Vec<BlockRef>,
    contract: FakeContract,
    calls: Vec<LedgerCall>,
    in_flight: HashMap<CallHash, LedgerCall>,
    reject_next: Option<String>,
    revert_next: bool,
    read_failure: Option<String>,
    nonce: u64,
}

/// In-memory stand-in for the node and the pizzeria contract.
///
/// Write calls are applied when their receipt is awaited, the way a mined
/// transaction would be.
#[derive(Clone, Debug)]
pub struct FakeLedger {
    state: Arc<Mutex<FakeState>>,
    clock: ManualClock,
    receipts_open: Arc<watch::Sender<bool>>,
}

impl Default for FakeLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::with_clock(ManualClock::default())
    }

    pub fn with_clock(clock: ManualClock) -> Self {
        let signer = Address::repeat_byte(0x11);
        let state = FakeState {
            chain_id: 10143,
            signer: Some(signer),
            blocks: Vec::new(),
            block_requests: Vec::new(),
            contract: FakeContract {
                owner: signer,
                ..FakeContract::default()
            },
            calls: Vec::new(),
            in_flight: HashMap::new(),
            reject_next: None,
            revert_next: false,
            read_failure: None,
            nonce: 0,
        };
        let (receipts_open, _) = watch::channel(true);
        Self {
            state: Arc::new(Mutex::new(state)),
            clock,
            receipts_open: Arc::new(receipts_open),
        }
    }

    pub fn clock(&self) -> ManualClock {
        self.clock.clone()
    }

    pub fn signer(&self) -> Option<Address> {
        self.state.lock().unwrap().signer
    }

    pub fn without_signer(self) -> Self {
        self.state.lock().unwrap().signer = None;
        self
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.state.lock().unwrap().chain_id = chain_id;
    }

    pub fn push_block(&self, block: Block) {
        self.state.lock().unwrap().blocks.push(block);
    }

    pub fn block_requests(&self) -> Vec<BlockRef> {
        self.state.lock().unwrap().block_requests.clone()
    }

    pub fn set_round(&self, round_id: U256, deadline: u64, order: PerCategory<u8>) {
        let mut state = self.state.lock().unwrap();
        state.contract.round_id = round_id;
        state.contract.deadline = deadline;
        state.contract.start_time = deadline.saturating_sub(ROUND_DURATION);
        state.contract.order = order;
    }

    pub fn set_round_options(&self, options: PerCategory<Vec<RoundOption>>) {
        self.state.lock().unwrap().contract.options = options;
    }

    pub fn calls(&self) -> Vec<LedgerCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// The next write call fails before reaching the chain.
    pub fn reject_next_call(&self, message: &str) {
        self.state.lock().unwrap().reject_next = Some(message.to_owned());
    }

    /// The next receipt reports a revert.
    pub fn revert_next_receipt(&self) {
        self.state.lock().unwrap().revert_next = true;
    }

    /// Every read fails with `NetworkUnavailable` while set.
    pub fn fail_reads(&self, message: Option<&str>) {
        self.state.lock().unwrap().read_failure = message.map(str::to_owned);
    }

    /// Receipts are withheld until [`FakeLedger::release_receipts`].
    pub fn hold_receipts(&self) {
        self.receipts_open.send_replace(false);
    }

    pub fn release_receipts(&self) {
        self.receipts_open.send_replace(true);
    }

    fn read<T>(&self, f: impl FnOnce(&FakeState) -> T) -> Result<T> {
        let state = self.state.lock().unwrap();
        if let Some(message) = &state.read_failure {
            return Err(Error::NetworkUnavailable(message.clone()));
        }
        Ok(f(&state))
    }

    fn send(&self, call: LedgerCall) -> Result<CallHash> {
        let mut state = self.state.lock().unwrap();
        if state.signer.is_none() {
            return Err(Error::NetworkUnavailable(String::from("no signer configured")));
        }
        if let Some(message) = state.reject_next.take() {
            return Err(Error::CallRejected(CallFailure::new(message)));
        }
        state.nonce += 1;
        let hash = B256::left_padding_from(&state.nonce.to_be_bytes());
        state.calls.push(call.clone());
        state.in_flight.insert(hash, call);
        Ok(hash)
    }
}

impl BlockSource for FakeLedger {
    async fn block(&self, at: BlockRef, full: bool) -> Result<Block> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.read_failure {
            return Err(Error::NetworkUnavailable(message.clone()));
        }
        state.block_requests.push(at);
        let found = match at {
            BlockRef::Latest => state.blocks.iter().max_by_key(|b| b.number),
            BlockRef::Number(n) => state.blocks.iter().find(|b| b.number == n),
        };
        let mut block = found
            .cloned()
            .ok_or_else(|| Error::NetworkUnavailable(format!("block {at} not found")))?;
        if !full {
            block.transactions.clear();
        }
        Ok(block)
    }
}

impl RoundReader for FakeLedger {
    async fn chain_id(&self) -> Result<u64> {
        self.read(|s| s.chain_id)
    }

    async fn current_round_id(&self) -> Result<U256> {
        self.read(|s| s.contract.round_id)
    }

    async fn current_round_order(&self) -> Result<PerCategory<u8>> {
        self.read(|s| s.contract.order)
    }

    async fn round_deadline(&self) -> Result<u64> {
        self.read(|s| s.contract.deadline)
    }

    async fn round_start_time(&self) -> Result<u64> {
        self.read(|s| s.contract.start_time)
    }

    async fn current_round_fee(&self) -> Result<U256> {
        self.read(|s| s.contract.round_fee)
    }

    async fn option_lengths(&self) -> Result<PerCategory<u64>> {
        self.read(|s| s.contract.lengths())
    }

    async fn round_option(&self, category: Category, index: u64) -> Result<RoundOption> {
        let option = self.read(|s| {
            usize::try_from(index)
                .ok()
                .and_then(|i| s.contract.options[category].get(i).copied())
        })?;
        option.ok_or_else(|| {
            Error::CallRejected(CallFailure::new(format!(
                "execution reverted: {category} index {index} out of bounds"
            )))
        })
    }

    async fn last_winner(&self) -> Result<LastWinner> {
        self.read(|s| s.contract.last_winner)
    }

    async fn last_finalized_round_id(&self) -> Result<U256> {
        self.read(|s| s.contract.last_finalized_round_id)
    }

    async fn owner(&self) -> Result<Address> {
        self.read(|s| s.contract.owner)
    }

    async fn own_build_round(&self) -> Result<Option<U256>> {
        self.read(|s| s.signer.map(|_| s.contract.own_build_round))
    }
}

impl RoundWriter for FakeLedger {
    async fn create_round(&self, args: CreateRoundArgs) -> Result<CallHash> {
        self.send(LedgerCall::CreateRound(args))
    }

    async fn build_order(&self, args: BuildArgs) -> Result<CallHash> {
        self.send(LedgerCall::BuildOrder(args))
    }

    async fn finalize_round(&self) -> Result<CallHash> {
        self.send(LedgerCall::FinalizeRound)
    }

    async fn wait_for_receipt(&self, hash: CallHash) -> Result<CallOutcome> {
        let mut open = self.receipts_open.subscribe();
        // the sender lives in `self`, so this only fails if it was dropped
        let _ = open.wait_for(|open| *open).await;
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        let call = state.in_flight.remove(&hash).ok_or_else(|| {
            Error::CallRejected(CallFailure::new(format!("unknown transaction {hash}")))
        })?;
        if std::mem::take(&mut state.revert_next) {
            return Ok(CallOutcome::Reverted);
        }
        let signer = state.signer.unwrap_or_default();
        if state.contract.apply(&call, signer, now) {
            Ok(CallOutcome::Confirmed)
        } else {
            Ok(CallOutcome::Reverted)
        }
    }
}
