use crate::{
    Error,
    Result,
    catalog::{
        Category,
        PerCategory,
    },
    identifier::Identifier,
};
use alloy::primitives::{
    Address,
    B256,
    Bytes,
    U256,
};
use std::{
    fmt,
    future::Future,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlockRef {
    Latest,
    Number(u64),
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockRef::Latest => f.write_str("latest"),
            BlockRef::Number(n) => write!(f, "#{n}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub hash: Identifier,
    /// Gas limit.
    pub gas: Option<u64>,
    pub gas_price: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub input: Bytes,
    pub from: Address,
    pub to: Option<Address>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
    pub base_fee_per_gas: Option<u64>,
    /// Empty unless the block was fetched with full transactions.
    pub transactions: Vec<Transaction>,
}

/// A published `(hash, fee)` pair of the current round.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RoundOption {
    pub identifier: Identifier,
    pub fee: U256,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LastWinner {
    pub winner: Address,
    pub time_taken: U256,
    pub total_fee: U256,
}

/// Arguments of `buildOrder`, already in the contract's parameter order:
/// topping, sauce, cheese.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BuildArgs {
    pub topping: Identifier,
    pub sauce: Identifier,
    pub cheese: Identifier,
}

impl BuildArgs {
    pub fn from_selection(selection: &PerCategory<Identifier>) -> Self {
        Self {
            topping: selection.topping,
            sauce: selection.sauce,
            cheese: selection.cheese,
        }
    }
}

/// Arguments of `createCustomerOrder`. Hashes and fees of one category have
/// the same length.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateRoundArgs {
    pub hashes: PerCategory<Vec<Identifier>>,
    pub fees: PerCategory<Vec<U256>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CallOutcome {
    Confirmed,
    Reverted,
}

/// Identifier of a submitted write-call.
pub type CallHash = B256;

pub trait BlockSource: Send + Sync {
    fn block(
        &self,
        at: BlockRef,
        full: bool,
    ) -> impl Future<Output = Result<Block>> + Send;
}

/// Read side of the `MonadPizzeria` contract.
pub trait RoundReader: Send + Sync {
    fn chain_id(&self) -> impl Future<Output = Result<u64>> + Send;
    fn current_round_id(&self) -> impl Future<Output = Result<U256>> + Send;
    /// Hidden order as catalog indices.
    fn current_round_order(&self) -> impl Future<Output = Result<PerCategory<u8>>> + Send;
    fn round_deadline(&self) -> impl Future<Output = Result<u64>> + Send;
    fn round_start_time(&self) -> impl Future<Output = Result<u64>> + Send;
    fn current_round_fee(&self) -> impl Future<Output = Result<U256>> + Send;
    fn option_lengths(&self) -> impl Future<Output = Result<PerCategory<u64>>> + Send;
    fn round_option(
        &self,
        category: Category,
        index: u64,
    ) -> impl Future<Output = Result<RoundOption>> + Send;
    fn last_winner(&self) -> impl Future<Output = Result<LastWinner>> + Send;
    fn last_finalized_round_id(&self) -> impl Future<Output = Result<U256>> + Send;
    fn owner(&self) -> impl Future<Output = Result<Address>> + Send;
    /// Round the signer last built in; `None` without a signer.
    fn own_build_round(&self) -> impl Future<Output = Result<Option<U256>>> + Send;
}

/// Write side of the contract plus confirmation tracking.
pub trait RoundWriter: Send + Sync {
    fn create_round(
        &self,
        args: CreateRoundArgs,
    ) -> impl Future<Output = Result<CallHash>> + Send;
    fn build_order(&self, args: BuildArgs) -> impl Future<Output = Result<CallHash>> + Send;
    fn finalize_round(&self) -> impl Future<Output = Result<CallHash>> + Send;
    /// Resolves once the call has a receipt.
    fn wait_for_receipt(
        &self,
        hash: CallHash,
    ) -> impl Future<Output = Result<CallOutcome>> + Send;
}

pub trait PizzaLedger: BlockSource + RoundReader + RoundWriter + 'static {}

impl<T> PizzaLedger for T where T: BlockSource + RoundReader + RoundWriter + 'static {}

/// Fails with `WrongNetwork` unless `reader` is on chain `expected`.
pub async fn verify_network<R: RoundReader>(reader: &R, expected: u64) -> Result<()> {
    let actual = reader.chain_id().await?;
    if actual != expected {
        return Err(Error::WrongNetwork { expected, actual });
    }
    Ok(())
}
