//! `MonadPizzeria` over JSON-RPC.

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
        verify_network,
    },
};
use alloy::{
    consensus::Transaction as TxFields,
    eips::BlockNumberOrTag,
    network::{
        EthereumWallet,
        TransactionResponse,
    },
    primitives::{
        Address,
        B256,
        U256,
    },
    providers::{
        DynProvider,
        Provider,
        ProviderBuilder,
    },
    rpc::types,
    signers::local::PrivateKeySigner,
    sol,
    transports::http::reqwest::Url,
};
use std::time::Duration;
use tokio::time;
use tracing::{
    debug,
    info,
    warn,
};

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    interface IMonadPizzeria {
        struct PizzaOrder {
            uint8 topping;
            uint8 sauce;
            uint8 cheese;
        }

        function buildOrder(bytes32 toppingTxnHash, bytes32 sauceTxnHash, bytes32 cheeseTxnHash) external;
        function createCustomerOrder(
            bytes32[] toppingTxnHashes,
            uint256[] toppingFees,
            bytes32[] sauceTxnHashes,
            uint256[] sauceFees,
            bytes32[] cheeseTxnHashes,
            uint256[] cheeseFees
        ) external returns (PizzaOrder order);
        function finalizeRound() external returns (address winner, uint256 timeTaken, uint256 winnerTotalFee);

        function currentRoundId() external view returns (uint256);
        function currentRoundOrder() external view returns (uint8 topping, uint8 sauce, uint8 cheese);
        function roundDeadline() external view returns (uint256);
        function roundStartTime() external view returns (uint256);
        function currentRoundFee() external view returns (uint256);
        function getRoundOptionLengths() external view returns (uint256 toppingLen, uint256 sauceLen, uint256 cheeseLen);
        function currentRoundSauceHashes(uint256 index) external view returns (bytes32);
        function currentRoundCheeseHashes(uint256 index) external view returns (bytes32);
        function currentRoundToppingHashes(uint256 index) external view returns (bytes32);
        function currentRoundSauceFees(uint256 index) external view returns (uint256);
        function currentRoundCheeseFees(uint256 index) external view returns (uint256);
        function currentRoundToppingFees(uint256 index) external view returns (uint256);
        function lastWinner() external view returns (address);
        function lastWinnerTimeTaken() external view returns (uint256);
        function lastWinnerTotalFee() external view returns (uint256);
        function lastFinalizedRoundId() external view returns (uint256);
        function owner() external view returns (address);
        function playerBuildRound(address player) external view returns (uint256);

        function hashToSauce(bytes32 txnHash) external pure returns (uint8);
        function hashToCheese(bytes32 txnHash) external pure returns (uint8);
        function hashToTopping(bytes32 txnHash) external pure returns (uint8);
    }
}

type Pizzeria = IMonadPizzeria::IMonadPizzeriaInstance<DynProvider>;

#[derive(Clone, Debug)]
pub struct EvmSettings {
    pub rpc_url: String,
    pub chain_id: u64,
    pub contract: Option<Address>,
    pub signer: Option<PrivateKeySigner>,
    pub receipt_poll: Duration,
    pub receipt_timeout: Duration,
}

pub struct EvmLedger {
    provider: DynProvider,
    contract: Option<Pizzeria>,
    signer: Option<Address>,
    receipt_poll: Duration,
    receipt_timeout: Duration,
}

impl EvmLedger {
    /// Connects and checks the chain id before anything else is read.
    pub async fn connect(settings: &EvmSettings) -> Result<Self> {
        let url: Url = settings
            .rpc_url
            .parse()
            .map_err(|e| Error::Config(format!("invalid rpc url {}: {e}", settings.rpc_url)))?;
        let signer = settings.signer.as_ref().map(|s| s.address());
        let provider = match &settings.signer {
            Some(signer) => ProviderBuilder::new()
                .wallet(EthereumWallet::from(signer.clone()))
                .connect_http(url)
                .erased(),
            None => ProviderBuilder::new().connect_http(url).erased(),
        };
        let contract = settings
            .contract
            .map(|address| IMonadPizzeria::new(address, provider.clone()));
        let ledger = Self {
            provider,
            contract,
            signer,
            receipt_poll: settings.receipt_poll,
            receipt_timeout: settings.receipt_timeout,
        };
        verify_network(&ledger, settings.chain_id).await?;
        info!(rpc = %settings.rpc_url, chain_id = settings.chain_id, signer = ?signer, "connected");
        Ok(ledger)
    }

    pub fn signer(&self) -> Option<Address> {
        self.signer
    }

    fn contract(&self) -> Result<&Pizzeria> {
        self.contract.as_ref().ok_or_else(|| {
            Error::NetworkUnavailable(String::from("no contract address configured"))
        })
    }

    fn writer(&self) -> Result<&Pizzeria> {
        if self.signer.is_none() {
            return Err(Error::NetworkUnavailable(String::from(
                "no signer configured, pass --private-key or --wallet",
            )));
        }
        self.contract()
    }

    /// The contract's own resolution of `identifier`, for cross-checking.
    pub async fn contract_index(&self, category: Category, identifier: Identifier) -> Result<u8> {
        let contract = self.contract()?;
        let hash = identifier.as_b256();
        let index = match category {
            Category::Sauce => contract.hashToSauce(hash).call().await,
            Category::Cheese => contract.hashToCheese(hash).call().await,
            Category::Topping => contract.hashToTopping(hash).call().await,
        };
        index.map_err(read_failed("hashTo"))
    }

    async fn poll_receipt(&self, hash: CallHash) -> CallOutcome {
        loop {
            match self.provider.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    return if receipt.status() {
                        CallOutcome::Confirmed
                    } else {
                        CallOutcome::Reverted
                    };
                }
                Ok(None) => debug!(%hash, "no receipt yet"),
                Err(e) => warn!(%hash, error = %e, "receipt poll failed"),
            }
            time::sleep(self.receipt_poll).await;
        }
    }
}

fn read_failed(what: &'static str) -> impl FnOnce(alloy::contract::Error) -> Error {
    move |e| Error::NetworkUnavailable(format!("{what}: {e}"))
}

fn call_failure(err: &alloy::contract::Error) -> CallFailure {
    let failure = CallFailure::from_error(err);
    match err {
        alloy::contract::Error::TransportError(rpc) => match rpc.as_error_resp() {
            Some(payload) => failure.with_short(payload.message.to_string()),
            None => failure,
        },
        _ => failure,
    }
}

fn rejected(action: &'static str) -> impl FnOnce(alloy::contract::Error) -> Error {
    move |e| {
        let failure = call_failure(&e);
        warn!(action, error = %failure, "call rejected");
        Error::CallRejected(failure)
    }
}

fn to_u64(value: U256, what: &str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| Error::NetworkUnavailable(format!("{what} out of range: {value}")))
}

fn to_hashes(ids: &[Identifier]) -> Vec<B256> {
    ids.iter().map(Identifier::as_b256).collect()
}

fn to_transaction(tx: &types::Transaction) -> Transaction {
    Transaction {
        hash: Identifier::from(TransactionResponse::tx_hash(tx)),
        gas: Some(TxFields::gas_limit(tx)),
        // mined dynamic-fee transactions only carry the effective price
        gas_price: TxFields::gas_price(tx).or(tx.effective_gas_price),
        max_priority_fee_per_gas: TxFields::max_priority_fee_per_gas(tx),
        input: TxFields::input(tx).clone(),
        from: TransactionResponse::from(tx),
        to: TxFields::to(tx),
    }
}

fn to_block(block: &types::Block) -> Block {
    let header = &block.header;
    Block {
        number: header.inner.number,
        hash: header.hash,
        timestamp: header.inner.timestamp,
        base_fee_per_gas: header.inner.base_fee_per_gas,
        transactions: block.transactions.txns().map(to_transaction).collect(),
    }
}

impl BlockSource for EvmLedger {
    async fn block(&self, at: BlockRef, full: bool) -> Result<Block> {
        let tag = match at {
            BlockRef::Latest => BlockNumberOrTag::Latest,
            BlockRef::Number(n) => BlockNumberOrTag::Number(n),
        };
        let request = self.provider.get_block_by_number(tag);
        let request = if full { request.full() } else { request };
        let block = request
            .await
            .map_err(|e| Error::NetworkUnavailable(format!("block {at}: {e}")))?
            .ok_or_else(|| Error::NetworkUnavailable(format!("block {at} not found")))?;
        Ok(to_block(&block))
    }
}

impl RoundReader for EvmLedger {
    async fn chain_id(&self) -> Result<u64> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| Error::NetworkUnavailable(e.to_string()))
    }

    async fn current_round_id(&self) -> Result<U256> {
        self.contract()?
            .currentRoundId()
            .call()
            .await
            .map_err(read_failed("currentRoundId"))
    }

    async fn current_round_order(&self) -> Result<PerCategory<u8>> {
        let order = self
            .contract()?
            .currentRoundOrder()
            .call()
            .await
            .map_err(read_failed("currentRoundOrder"))?;
        Ok(PerCategory::new(order.sauce, order.cheese, order.topping))
    }

    async fn round_deadline(&self) -> Result<u64> {
        let deadline = self
            .contract()?
            .roundDeadline()
            .call()
            .await
            .map_err(read_failed("roundDeadline"))?;
        to_u64(deadline, "roundDeadline")
    }

    async fn round_start_time(&self) -> Result<u64> {
        let start = self
            .contract()?
            .roundStartTime()
            .call()
            .await
            .map_err(read_failed("roundStartTime"))?;
        to_u64(start, "roundStartTime")
    }

    async fn current_round_fee(&self) -> Result<U256> {
        self.contract()?
            .currentRoundFee()
            .call()
            .await
            .map_err(read_failed("currentRoundFee"))
    }

    async fn option_lengths(&self) -> Result<PerCategory<u64>> {
        let lengths = self
            .contract()?
            .getRoundOptionLengths()
            .call()
            .await
            .map_err(read_failed("getRoundOptionLengths"))?;
        Ok(PerCategory::new(
            to_u64(lengths.sauceLen, "sauceLen")?,
            to_u64(lengths.cheeseLen, "cheeseLen")?,
            to_u64(lengths.toppingLen, "toppingLen")?,
        ))
    }

    async fn round_option(&self, category: Category, index: u64) -> Result<RoundOption> {
        let contract = self.contract()?;
        let i = U256::from(index);
        let (hash, fee) = match category {
            Category::Sauce => (
                contract.currentRoundSauceHashes(i).call().await,
                contract.currentRoundSauceFees(i).call().await,
            ),
            Category::Cheese => (
                contract.currentRoundCheeseHashes(i).call().await,
                contract.currentRoundCheeseFees(i).call().await,
            ),
            Category::Topping => (
                contract.currentRoundToppingHashes(i).call().await,
                contract.currentRoundToppingFees(i).call().await,
            ),
        };
        Ok(RoundOption {
            identifier: Identifier::from(hash.map_err(read_failed("option hash"))?),
            fee: fee.map_err(read_failed("option fee"))?,
        })
    }

    async fn last_winner(&self) -> Result<LastWinner> {
        let contract = self.contract()?;
        let winner = contract
            .lastWinner()
            .call()
            .await
            .map_err(read_failed("lastWinner"))?;
        let time_taken = contract
            .lastWinnerTimeTaken()
            .call()
            .await
            .map_err(read_failed("lastWinnerTimeTaken"))?;
        let total_fee = contract
            .lastWinnerTotalFee()
            .call()
            .await
            .map_err(read_failed("lastWinnerTotalFee"))?;
        Ok(LastWinner {
            winner,
            time_taken,
            total_fee,
        })
    }

    async fn last_finalized_round_id(&self) -> Result<U256> {
        self.contract()?
            .lastFinalizedRoundId()
            .call()
            .await
            .map_err(read_failed("lastFinalizedRoundId"))
    }

    async fn owner(&self) -> Result<Address> {
        self.contract()?
            .owner()
            .call()
            .await
            .map_err(read_failed("owner"))
    }

    async fn own_build_round(&self) -> Result<Option<U256>> {
        let Some(signer) = self.signer else {
            return Ok(None);
        };
        let round = self
            .contract()?
            .playerBuildRound(signer)
            .call()
            .await
            .map_err(read_failed("playerBuildRound"))?;
        Ok(Some(round))
    }
}

impl RoundWriter for EvmLedger {
    async fn create_round(&self, args: CreateRoundArgs) -> Result<CallHash> {
        let pending = self
            .writer()?
            .createCustomerOrder(
                to_hashes(&args.hashes.topping),
                args.fees.topping,
                to_hashes(&args.hashes.sauce),
                args.fees.sauce,
                to_hashes(&args.hashes.cheese),
                args.fees.cheese,
            )
            .send()
            .await
            .map_err(rejected("createCustomerOrder"))?;
        Ok(*pending.tx_hash())
    }

    async fn build_order(&self, args: BuildArgs) -> Result<CallHash> {
        let pending = self
            .writer()?
            .buildOrder(
                args.topping.as_b256(),
                args.sauce.as_b256(),
                args.cheese.as_b256(),
            )
            .send()
            .await
            .map_err(rejected("buildOrder"))?;
        Ok(*pending.tx_hash())
    }

    async fn finalize_round(&self) -> Result<CallHash> {
        let pending = self
            .writer()?
            .finalizeRound()
            .send()
            .await
            .map_err(rejected("finalizeRound"))?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(&self, hash: CallHash) -> Result<CallOutcome> {
        time::timeout(self.receipt_timeout, self.poll_receipt(hash))
            .await
            .map_err(|_| {
                Error::CallRejected(CallFailure::new(format!(
                    "no receipt for {hash} after {}s",
                    self.receipt_timeout.as_secs()
                )))
            })
    }
}
