use clap::Parser;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use pizza_forge::{
    catalog::Category,
    client::{
        GameClient,
        RoundView,
        ViewEvent,
    },
    config::{
        Cli,
        Command,
        parse_block_ref,
    },
    display::{
        block_url,
        format_address,
        format_hash,
        method_id,
        tx_url,
    },
    evm::EvmLedger,
    fee::{
        compute_fee,
        format_display_amount,
    },
    identifier::Identifier,
    ledger::{
        BlockSource,
        CallHash,
        RoundWriter,
    },
    options::OptionSet,
    resolver::resolve_index,
    round::SystemClock,
};
use std::{
    path::Path,
    sync::{
        Arc,
        OnceLock,
    },
    time::Duration,
};
use tracing::{
    info,
    warn,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{
        RollingFileAppender,
        Rotation,
    },
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Refresh the round every this many countdown ticks while watching.
const WATCH_REFRESH_TICKS: u64 = 10;

type Client = GameClient<EvmLedger, SystemClock>;

const LOG_DIR: &str = "logs";

/// Opens the daily log file under `dir`, creating the directory first.
///
/// `rolling::daily` panics when the first file cannot be created, so the
/// fallible builder is used instead.
fn file_appender(dir: &Path) -> Result<RollingFileAppender> {
    std::fs::create_dir_all(dir)
        .wrap_err_with(|| format!("could not create log directory {}", dir.display()))?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("pizza-forge")
        .filename_suffix("log")
        .build(dir)
        .wrap_err_with(|| format!("could not open log file in {}", dir.display()))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match file_appender(Path::new(LOG_DIR)) {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = LOG_GUARD.set(guard);
            let _ = fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init();
        }
        Err(err) => {
            eprintln!("warning: file logging disabled: {err:#}");
            let _ = fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();
    let cli = Cli::parse();
    info!(command = ?cli.command, "starting pizza-forge");

    let catalog = cli.load_catalog().wrap_err("loading ingredient catalog")?;
    let signer = cli.signer().wrap_err("resolving signer")?;
    let ledger = EvmLedger::connect(&cli.evm_settings(signer))
        .await
        .wrap_err_with(|| format!("connecting to {}", cli.rpc_url))?;

    if let Command::Block { at } = &cli.command {
        return show_block(&ledger, at).await;
    }

    let receipt_timeout = cli.receipt_timeout();
    let client = GameClient::new(Arc::new(ledger), SystemClock, catalog)
        .with_random_blocks(cli.random_blocks);
    match cli.command {
        Command::Round => show_round(client).await,
        Command::StartRound => start_round(client).await,
        Command::Build {
            sauce,
            cheese,
            topping,
        } => build(client, [sauce, cheese, topping]).await,
        Command::Finalize => finalize(client).await,
        Command::Watch => watch(client, receipt_timeout).await,
        Command::Block { .. } => Ok(()),
    }
}

async fn show_block(ledger: &EvmLedger, at: &str) -> Result<()> {
    let at = parse_block_ref(at)?;
    let block = ledger.block(at, true).await?;
    println!(
        "Block #{} {} ({} txs)",
        block.number,
        format_hash(block.hash),
        block.transactions.len()
    );
    println!("  {}", block_url(block.hash));
    match block.base_fee_per_gas {
        Some(base) => println!("  base fee: {base} wei"),
        None => println!("  base fee: n/a"),
    }
    for tx in &block.transactions {
        let to = tx
            .to
            .map(format_address)
            .unwrap_or_else(|| String::from("contract creation"));
        println!(
            "  {}  {:<10}  {} -> {}  {}",
            format_hash(tx.hash),
            method_id(&tx.input),
            format_address(tx.from),
            to,
            format_display_amount(compute_fee(tx, &block)),
        );
    }
    Ok(())
}

fn print_options(options: &OptionSet) {
    for category in Category::ALL {
        println!("  {category}:");
        let candidates = options.candidates(category);
        if candidates.is_empty() {
            println!("    (none)");
        }
        for candidate in candidates {
            let label = candidate
                .ingredient
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| String::from("?"));
            println!(
                "    {:<18} {}  {}",
                label,
                format_hash(candidate.identifier),
                format_display_amount(candidate.fee),
            );
        }
    }
}

async fn show_round(mut client: Client) -> Result<()> {
    client.refresh().await?;
    println!("{}", client.status_line());
    if let Some(round) = client.round().filter(|round| round.exists()) {
        println!("  phase: {} ({} left)", client.phase(), client.countdown());
        println!("  fee: {}", format_display_amount(Some(round.round_fee)));
        let order = client.order();
        for (category, ingredient) in order.iter() {
            let label = ingredient
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| String::from("unknown"));
            println!("  wanted {category}: {label}");
        }
    }
    if let Some(options) = client.options() {
        println!("Options:");
        print_options(options);
        cross_check(&client, options).await;
    }
    if let Some(round) = client.round() {
        let winner = round.last_winner;
        if !winner.winner.is_zero() {
            println!(
                "Last winner: {} in {}s, {}",
                format_address(winner.winner),
                winner.time_taken,
                format_display_amount(Some(winner.total_fee)),
            );
        }
    }
    Ok(())
}

/// Compares local option resolution with the contract's.
async fn cross_check(client: &Client, options: &OptionSet) {
    let ledger = client.ledger();
    for category in Category::ALL {
        let len = client.catalog().len(category);
        for candidate in options.candidates(category) {
            let Some(local) = resolve_index(&candidate.identifier, len) else {
                continue;
            };
            match ledger.contract_index(category, candidate.identifier).await {
                Ok(remote) if usize::from(remote) == local => {}
                Ok(remote) => warn!(
                    %category,
                    identifier = %candidate.identifier,
                    local,
                    remote,
                    "catalog disagrees with contract"
                ),
                Err(e) => {
                    warn!(error = %e, "skipping contract cross-check");
                    return;
                }
            }
        }
    }
}

async fn confirm(client: &mut Client, hash: CallHash) -> Result<()> {
    println!("sent {}", tx_url(hash));
    let outcome = client.ledger().wait_for_receipt(hash).await;
    client.on_receipt(hash, outcome).await?;
    println!("{}", client.status_line());
    Ok(())
}

async fn start_round(mut client: Client) -> Result<()> {
    client.refresh().await?;
    if let Some(options) = client.options() {
        println!("Publishing options:");
        print_options(options);
    }
    let hash = client.start_round().await?;
    confirm(&mut client, hash).await
}

async fn build(mut client: Client, picks: [Identifier; 3]) -> Result<()> {
    client.refresh().await?;
    for (category, identifier) in Category::ALL.into_iter().zip(picks) {
        client.select(identifier, category);
    }
    let hash = client.submit_build().await?;
    confirm(&mut client, hash).await?;
    if let Some(error) = &client.coordinator().state().last_error {
        return Err(eyre!("build failed: {error}"));
    }
    Ok(())
}

async fn finalize(mut client: Client) -> Result<()> {
    client.refresh().await?;
    let hash = client.finalize_round().await?;
    confirm(&mut client, hash).await
}

async fn watch(mut client: Client, receipt_timeout: Duration) -> Result<()> {
    client.refresh().await?;
    println!("{}", client.status_line());
    let mut view = RoundView::open(client, Duration::from_secs(1), receipt_timeout);
    let mut ticks = 0u64;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            event = view.next_event() => {
                let Some(event) = event else {
                    break;
                };
                let is_tick = matches!(event, ViewEvent::Tick);
                if view.handle(event).await.unwrap_or(false) {
                    println!("round changed: {}", view.client().status_line());
                    break;
                }
                if !is_tick {
                    continue;
                }
                ticks += 1;
                if ticks % WATCH_REFRESH_TICKS == 0 {
                    match view.client_mut().refresh().await {
                        Ok(true) => {
                            println!("round changed: {}", view.client().status_line());
                            break;
                        }
                        Ok(false) => {}
                        Err(e) => warn!(error = %e, "refresh failed while watching"),
                    }
                }
                println!("{}", view.client().status_line());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pizza-forge-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn file_appender__blocked_directory_is_an_error() {
        // given
        let root = scratch_dir("blocked");
        let blocked = root.join("logs");
        std::fs::write(&blocked, b"not a directory").unwrap();

        // when
        let result = file_appender(&blocked);

        // then
        assert!(result.is_err());
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn file_appender__creates_missing_directory() {
        // given
        let root = scratch_dir("fresh");
        let dir = root.join("nested").join("logs");

        // when
        let result = file_appender(&dir);

        // then
        assert!(result.is_ok());
        assert!(dir.is_dir());
        drop(result);
        std::fs::remove_dir_all(&root).unwrap();
    }
}
