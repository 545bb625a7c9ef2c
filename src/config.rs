use crate::{
    Error,
    Result,
    catalog::IngredientCatalog,
    evm::EvmSettings,
    identifier::Identifier,
    wallets::{
        find_keystore,
        resolve_keystore_dir,
        signer_from_hex,
        unlock_keystore,
    },
};
use alloy::{
    primitives::Address,
    signers::local::PrivateKeySigner,
};
use clap::{
    ArgGroup,
    Parser,
    Subcommand,
};
use std::{
    path::PathBuf,
    time::Duration,
};

pub const DEFAULT_RPC_URL: &str = "https://rpc.testnet.monad.xyz";
pub const MONAD_TESTNET_CHAIN_ID: u64 = 10143;

#[derive(Parser, Debug)]
#[command(
    name = "pizza-forge",
    about = "Play MonadPizzeria rounds from the terminal",
    version,
    group(ArgGroup::new("key").args(["private_key", "wallet"]))
)]
pub struct Cli {
    /// JSON-RPC endpoint
    #[arg(long, env = "PIZZA_RPC_URL", default_value = DEFAULT_RPC_URL)]
    pub rpc_url: String,

    /// Chain id the endpoint must report
    #[arg(long, default_value_t = MONAD_TESTNET_CHAIN_ID)]
    pub chain_id: u64,

    /// MonadPizzeria contract address
    #[arg(long, env = "PIZZA_CONTRACT_ADDRESS")]
    pub contract: Option<Address>,

    /// Hex private key used to sign write calls
    #[arg(long, env = "PIZZA_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Name of an encrypted JSON keystore
    #[arg(long)]
    pub wallet: Option<String>,

    /// Keystore directory (defaults to ~/.foundry/keystores)
    #[arg(long)]
    pub wallet_dir: Option<String>,

    /// JSON ingredient catalog replacing the built-in one
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Draw discovery blocks at random from the last N+1 blocks
    #[arg(long, value_name = "WINDOW")]
    pub random_blocks: Option<u64>,

    /// Receipt polling interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub receipt_poll_ms: u64,

    /// Give up waiting for a receipt after this many seconds
    #[arg(long, default_value_t = 120)]
    pub receipt_timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show a block with per-transaction fees
    Block {
        /// Block number, or `latest`
        #[arg(default_value = "latest")]
        at: String,
    },
    /// Show the current round, its options and the last winner
    Round,
    /// Publish the latest discovery blocks as a new round
    StartRound,
    /// Submit a build for the current round
    Build {
        #[arg(long)]
        sauce: Identifier,
        #[arg(long)]
        cheese: Identifier,
        #[arg(long)]
        topping: Identifier,
    },
    /// Settle the current round
    Finalize,
    /// Follow the round countdown until ctrl-c or the next round
    Watch,
}

impl Cli {
    pub fn receipt_poll(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_ms.max(1))
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn load_catalog(&self) -> Result<IngredientCatalog> {
        match &self.catalog {
            Some(path) => IngredientCatalog::load(path),
            None => Ok(IngredientCatalog::default()),
        }
    }

    /// Only unlocks a keystore when one is named.
    pub fn signer(&self) -> Result<Option<PrivateKeySigner>> {
        if let Some(key) = &self.private_key {
            return signer_from_hex(key).map(Some);
        }
        match &self.wallet {
            Some(name) => {
                let dir = resolve_keystore_dir(self.wallet_dir.as_deref())?;
                let entry = find_keystore(&dir, name)?;
                unlock_keystore(&entry).map(Some)
            }
            None => Ok(None),
        }
    }

    pub fn evm_settings(&self, signer: Option<PrivateKeySigner>) -> EvmSettings {
        EvmSettings {
            rpc_url: self.rpc_url.clone(),
            chain_id: self.chain_id,
            contract: self.contract,
            signer,
            receipt_poll: self.receipt_poll(),
            receipt_timeout: self.receipt_timeout(),
        }
    }
}

/// `latest` or a block number.
pub fn parse_block_ref(raw: &str) -> Result<crate::ledger::BlockRef> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("latest") {
        return Ok(crate::ledger::BlockRef::Latest);
    }
    raw.parse::<u64>()
        .map(crate::ledger::BlockRef::Number)
        .map_err(|_| Error::Config(format!("'{raw}' is neither a block number nor 'latest'")))
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::ledger::BlockRef;

    #[test]
    fn parse__applies_defaults() {
        // when
        let cli = Cli::try_parse_from(["pizza-forge", "round"]).unwrap();

        // then
        assert_eq!(cli.chain_id, MONAD_TESTNET_CHAIN_ID);
        assert_eq!(cli.receipt_poll(), Duration::from_secs(1));
        assert_eq!(cli.receipt_timeout(), Duration::from_secs(120));
        assert_eq!(cli.command, Command::Round);
        assert!(cli.random_blocks.is_none());
    }

    #[test]
    fn parse__build_takes_short_hex_identifiers() {
        let cli = Cli::try_parse_from([
            "pizza-forge",
            "build",
            "--sauce",
            "0x9",
            "--cheese",
            "0xa",
            "--topping",
            "0xb",
        ])
        .unwrap();

        let Command::Build { sauce, .. } = cli.command else {
            panic!("expected build");
        };
        assert_eq!(sauce, "9".parse::<Identifier>().unwrap());
    }

    #[test]
    fn parse__private_key_and_wallet_conflict() {
        let result = Cli::try_parse_from([
            "pizza-forge",
            "--private-key",
            "0x01",
            "--wallet",
            "player",
            "finalize",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn signer__is_absent_without_key_material() {
        let cli = Cli::try_parse_from(["pizza-forge", "round"]).unwrap();
        if cli.private_key.is_some() {
            return;
        }
        assert!(cli.signer().unwrap().is_none());
    }

    #[test]
    fn signer__rejects_malformed_private_key() {
        // an empty key is rejected when resolved, not when parsed
        let cli = Cli::try_parse_from(["pizza-forge", "--private-key", "", "round"]).unwrap();
        assert!(cli.signer().is_err());
    }

    #[test]
    fn parse_block_ref__accepts_latest_and_numbers() {
        assert_eq!(parse_block_ref("latest").unwrap(), BlockRef::Latest);
        assert_eq!(parse_block_ref(" 42 ").unwrap(), BlockRef::Number(42));
        assert!(parse_block_ref("tip").is_err());
    }
}
