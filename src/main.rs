// src/main.rs
use std::time::Duration;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use ethers::types::{Bytes, U256};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use paymaster_flows::actions;
use paymaster_flows::config::AddressBook;
use paymaster_flows::encoder::parse_address;
use paymaster_flows::submitter::SubmitOptions;
use paymaster_flows::{FlowConfig, SponsorshipFlow, SponsorshipRequest, WrappedCall, ZkSyncNetwork};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(long, env = "ZKSYNC_RPC_URL", default_value = "http://localhost:3050")]
    rpc_url: String,

    /// Seconds to wait for the transaction to become final
    #[clap(long, default_value_t = 120)]
    timeout_secs: u64,

    #[clap(long, default_value_t = 500)]
    poll_interval_ms: u64,

    /// Extra gas limit headroom, in percent of the estimate
    #[clap(long, default_value_t = 0)]
    gas_limit_buffer: u64,

    /// Run even if the sender already holds ETH
    #[clap(long)]
    allow_funded_wallet: bool,

    /// Print the flow report as JSON
    #[clap(long)]
    json: bool,

    #[clap(short, long)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mint ERC-20 tokens, gas paid through the ApprovalBased flow
    Erc20 {
        #[clap(long, default_value_t = 5)]
        amount: u64,

        #[clap(long, default_value_t = 1)]
        minimal_allowance: u64,
    },
    /// Mint an ERC-721 token, gas paid through the General flow
    Erc721 {
        #[clap(long, default_value = "Time Stone")]
        name: String,
    },
    /// Call `loop()` on the test contract through the General flow
    Loop,
    /// Arbitrary call through the General flow
    Call {
        #[clap(long)]
        to: String,

        #[clap(long, default_value = "0x")]
        data: String,

        /// Wei sent along with the call
        #[clap(long, default_value_t = 0)]
        value: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let book = AddressBook::from_env()?;
    let paymaster = book.require_paymaster()?;
    let network = ZkSyncNetwork::connect(&args.rpc_url, book.sender_wallet()?).await?;

    let mut config = FlowConfig::new(network.address());
    config.submit = SubmitOptions {
        timeout: Duration::from_secs(args.timeout_secs),
        poll_interval: Duration::from_millis(args.poll_interval_ms),
    };
    config.require_empty_wallet = !args.allow_funded_wallet;
    config.gas_limit_buffer = args.gas_limit_buffer;

    let sender = network.address();
    let (request, call, config) = match args.command {
        Command::Erc20 {
            amount,
            minimal_allowance,
        } => {
            let token = book.require_erc20_token()?;
            (
                SponsorshipRequest::approval_based(paymaster, token, U256::from(minimal_allowance)),
                actions::erc20_mint(token, sender, U256::from(amount)),
                config.track_token(token),
            )
        }
        Command::Erc721 { name } => {
            let collection = book.require_erc721_token()?;
            (
                SponsorshipRequest::general(paymaster),
                actions::erc721_mint(collection, sender, &name),
                config.track_token(collection),
            )
        }
        Command::Loop => (
            SponsorshipRequest::general(paymaster),
            actions::run_loop(book.require_loop_contract()?),
            config,
        ),
        Command::Call { to, data, value } => {
            let data: Bytes = hex::decode(data.trim_start_matches("0x"))?.into();
            (
                SponsorshipRequest::general(paymaster),
                WrappedCall {
                    to: parse_address(&to)?,
                    data,
                    value: U256::from(value),
                },
                config,
            )
        }
    };

    info!("Empty wallet's address: {:?}", sender);
    let report = SponsorshipFlow::new(&network, config)
        .run(&request, call)
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        info!(
            "Sponsored {} call settled in {:?}: paymaster paid {} wei (quoted at most {})",
            report.mode,
            report.receipt.tx_hash,
            report.receipt.fee_charged(),
            report.quote.max_fee
        );
    }

    Ok(())
}
