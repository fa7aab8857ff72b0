mod account;
mod bundler;
mod config;
mod encoding;
mod hash;
mod nonce;
mod rpc;
mod signer;
mod types;

use account::{AddressSource, TraceResolver};
use anyhow::{anyhow, Context, Result};
use bundler::{BundlerClient, Submission};
use clap::{Args, Parser, Subcommand};
use config::{load_deployment, parse_addr, rpc_timeout, Deployment, Overrides};
use encoding::{fmt_address, fmt_h256, parse_h256, parse_u256};
use ethers::prelude::*;
use nonce::{NonceRequest, NonceResolver, OnChainAccount, OnChainEntryPoint};
use rpc::JsonRpcClient;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use types::{GasSettings, UserOperation};

// In --json mode stdout carries a single JSON object; human-readable lines go to stderr.
macro_rules! outln {
    ($machine_mode:expr, $($arg:tt)*) => {{
        if $machine_mode {
            eprintln!($($arg)*);
        } else {
            println!($($arg)*);
        }
    }};
}

#[derive(Parser, Debug)]
#[command(name = "aa-userop", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build, sign and submit a UserOperation calling `execute(target, value, data)`.
    Send(SendArgs),

    /// Deploy a smart account via the factory and discover its address.
    Deploy(DeployArgs),

    /// Resolve the account created by an existing transaction.
    Resolve(ResolveArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Deployment artifact (chainId, rpc, entryPoint, factory, bundler).
    #[arg(long, env = "AA_USEROP_DEPLOYMENT", default_value = "deployments/local.json")]
    deployment: PathBuf,

    /// Override the chain RPC URL (otherwise uses deployment JSON).
    #[arg(long, env = "AA_USEROP_RPC_URL")]
    rpc: Option<String>,

    /// Override the EntryPoint address.
    #[arg(long, env = "AA_USEROP_ENTRYPOINT")]
    entrypoint: Option<String>,

    /// Override the SimpleAccountFactory address.
    #[arg(long, env = "AA_USEROP_FACTORY")]
    factory: Option<String>,

    /// Owner private key (signs UserOperations and deployment transactions).
    #[arg(long, env = "AA_USEROP_OWNER_PRIVATE_KEY", hide_env_values = true)]
    owner_private_key: Option<String>,

    /// Timeout for every RPC request, in seconds.
    #[arg(long, env = "AA_USEROP_RPC_TIMEOUT_SECONDS", default_value_t = 30)]
    rpc_timeout_seconds: u64,

    /// Print a single JSON object to stdout. All other output goes to stderr.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct SendArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Bundler RPC URL (must support eth_sendUserOperation).
    #[arg(long, env = "AA_USEROP_BUNDLER_URL")]
    bundler: Option<String>,

    /// Smart account (sender) address.
    #[arg(long, env = "AA_USEROP_ACCOUNT")]
    account: String,

    /// Call target.
    #[arg(long)]
    target: String,

    /// Wei sent with the call (decimal or 0x-hex).
    #[arg(long, default_value = "0")]
    value: String,

    /// Inner call data (0x-hex).
    #[arg(long, default_value = "0x")]
    data: String,

    /// Nonce key (partition label).
    #[arg(long, default_value = "0")]
    nonce_key: String,

    /// Slots to skip past the account's current counter, for operations
    /// prepared before an earlier one has landed.
    #[arg(long, default_value_t = 0)]
    nonce_increment: u64,

    #[arg(long)]
    call_gas_limit: Option<String>,

    #[arg(long)]
    verification_gas_limit: Option<String>,

    #[arg(long)]
    pre_verification_gas: Option<String>,

    #[arg(long)]
    max_fee_per_gas: Option<String>,

    #[arg(long)]
    max_priority_fee_per_gas: Option<String>,

    /// Do not send the UserOperation; only build + sign it.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct DeployArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Account owner. Defaults to the address of the owner private key.
    #[arg(long)]
    owner: Option<String>,

    /// CREATE2 salt (decimal or 0x-hex).
    #[arg(long, default_value = "0")]
    salt: String,

    /// keccak256 of the account's creation code. When set, the CREATE2 address is
    /// computed locally instead of asking the factory.
    #[arg(long)]
    init_code_hash: Option<String>,
}

#[derive(Args, Debug)]
struct ResolveArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Hash of the account creation transaction.
    #[arg(long)]
    tx_hash: String,

    /// Owner passed to createAccount (enables the factory getAddress cross-check).
    #[arg(long)]
    owner: Option<String>,

    /// Salt passed to createAccount.
    #[arg(long)]
    salt: Option<String>,

    /// keccak256 of the account's creation code (enables the CREATE2 cross-check).
    #[arg(long)]
    init_code_hash: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // Always write logs to stderr so stdout can be used for script-friendly outputs.
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Send(args) => cmd_send(args).await,
        Command::Deploy(args) => cmd_deploy(args).await,
        Command::Resolve(args) => cmd_resolve(args).await,
    }
}

fn load(common: &CommonArgs, bundler: Option<String>) -> Result<Deployment> {
    load_deployment(
        &common.deployment,
        Overrides {
            rpc: common.rpc.clone(),
            entry_point: common.entrypoint.clone(),
            factory: common.factory.clone(),
            bundler,
        },
    )
}

async fn connect(dep: &Deployment, timeout: Duration) -> Result<Provider<Http>> {
    let url: reqwest::Url = dep
        .rpc_url
        .parse()
        .with_context(|| format!("invalid RPC URL {}", dep.rpc_url))?;
    let http = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")?;
    let provider = Provider::new(Http::new_with_client(url, http)).interval(Duration::from_millis(350));

    let chain_id = provider.get_chainid().await?.as_u64();
    if chain_id != dep.chain_id {
        return Err(anyhow!(
            "chainId mismatch: deployment has {}, RPC returned {}",
            dep.chain_id,
            chain_id
        ));
    }
    Ok(provider)
}

fn load_owner(common: &CommonArgs, chain_id: u64) -> Result<LocalWallet> {
    let owner_pk = common.owner_private_key.as_deref().ok_or_else(|| {
        anyhow!("missing AA_USEROP_OWNER_PRIVATE_KEY (or --owner-private-key)")
    })?;
    Ok(signer::wallet_from_private_key(owner_pk, chain_id)?)
}

fn gas_settings(args: &SendArgs) -> Result<GasSettings> {
    let mut gas = GasSettings::default();
    let fields = [
        (&args.call_gas_limit, &mut gas.call_gas_limit, "--call-gas-limit"),
        (&args.verification_gas_limit, &mut gas.verification_gas_limit, "--verification-gas-limit"),
        (&args.pre_verification_gas, &mut gas.pre_verification_gas, "--pre-verification-gas"),
        (&args.max_fee_per_gas, &mut gas.max_fee_per_gas, "--max-fee-per-gas"),
        (&args.max_priority_fee_per_gas, &mut gas.max_priority_fee_per_gas, "--max-priority-fee-per-gas"),
    ];
    for (arg, slot, flag) in fields {
        if let Some(v) = arg {
            *slot = parse_u256(v).with_context(|| format!("invalid {flag}: {v}"))?;
        }
    }
    Ok(gas)
}

async fn cmd_send(args: SendArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let dep = load(&args.common, args.bundler.clone())?;
    let timeout = rpc_timeout(args.common.rpc_timeout_seconds);

    let provider = connect(&dep, timeout).await?;
    let wallet = load_owner(&args.common, dep.chain_id)?;
    let client = Arc::new(SignerMiddleware::new(provider, wallet.clone()));

    let account = parse_addr(&args.account).context("invalid --account address")?;
    let target = parse_addr(&args.target).context("invalid --target address")?;
    let value = parse_u256(&args.value).with_context(|| format!("invalid --value: {}", args.value))?;
    let data: Bytes = args
        .data
        .parse()
        .map_err(|e| anyhow!("invalid --data: {e}"))?;
    let key = parse_u256(&args.nonce_key).context("invalid --nonce-key")?;
    let gas = gas_settings(&args)?;

    let call_data = account::execute_calldata(client.clone(), account, target, value, data)?;

    let resolver = NonceResolver::new(
        OnChainAccount::new(client.clone()),
        OnChainEntryPoint::new(client.clone(), dep.entry_point),
    );
    let nonce = resolver
        .resolve(&NonceRequest {
            sender: account,
            key,
            increment: U256::from(args.nonce_increment),
        })
        .await
        .context("nonce resolution failed")?;

    let op = UserOperation::new(account, nonce, call_data, &gas);
    let signed = signer::sign_user_operation(op, &wallet, dep.entry_point, dep.chain_id)
        .await
        .context("failed to sign user operation")?;

    let recovered = signed.recover_signer().context("failed to recover signer")?;
    if recovered != wallet.address() {
        return Err(anyhow!(
            "signature recovers to {}, expected owner {}",
            fmt_address(recovered),
            fmt_address(wallet.address())
        ));
    }

    outln!(
        machine_mode,
        "UserOperation:\n{}",
        serde_json::to_string_pretty(&encoding::user_op_to_json(signed.op()))?
    );
    outln!(machine_mode, "userOpHash (local): {}", fmt_h256(signed.hash()));

    if args.dry_run {
        if machine_mode {
            let out = serde_json::json!({
                "userOp": encoding::user_op_to_json(signed.op()),
                "userOpHash": fmt_h256(signed.hash()),
                "status": "dry-run",
            });
            println!("{}", out);
        }
        outln!(machine_mode, "\n--dry-run set: not sending user operation.");
        return Ok(());
    }

    let bundler_url = dep
        .bundler_url
        .clone()
        .ok_or_else(|| anyhow!("missing --bundler (or AA_USEROP_BUNDLER_URL, or deployment.bundler)"))?;
    let bundler = BundlerClient::new(bundler_url, timeout)?;

    let submission = bundler.send_user_operation(&signed, dep.entry_point).await;

    if machine_mode {
        let out = serde_json::json!({
            "userOpHash": fmt_h256(signed.hash()),
            "status": match &submission {
                Submission::Accepted(_) => "accepted",
                Submission::Rejected(_) => "rejected",
                Submission::Failed(_) => "failed",
            },
            "response": submission.body(),
        });
        println!("{}", out);
    }

    if submission.is_accepted() {
        let hash = submission.user_op_hash().unwrap_or_else(|| signed.hash());
        outln!(machine_mode, "\nuserOpHash: {}", fmt_h256(hash));
        return Ok(());
    }
    if submission.is_nonce_collision() {
        return Err(anyhow!(
            "nonce collision (sender {}, nonce {}): resolve again with a different --nonce-increment. bundler said: {}",
            fmt_address(account),
            encoding::fmt_u256(signed.op().nonce),
            submission.rpc_error().cloned().unwrap_or_default()
        ));
    }
    match submission {
        Submission::Failed(e) => Err(anyhow::Error::new(e).context("bundler submission failed")),
        other => Err(anyhow!(
            "bundler rejected user operation: {}",
            other.rpc_error().cloned().unwrap_or_default()
        )),
    }
}

async fn cmd_deploy(args: DeployArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let dep = load(&args.common, None)?;
    let timeout = rpc_timeout(args.common.rpc_timeout_seconds);

    let provider = connect(&dep, timeout).await?;
    let wallet = load_owner(&args.common, dep.chain_id)?;
    let client = Arc::new(SignerMiddleware::new(provider, wallet.clone()));

    let owner = match args.owner.as_deref() {
        Some(o) => parse_addr(o).context("invalid --owner address")?,
        None => wallet.address(),
    };
    let salt = parse_u256(&args.salt).with_context(|| format!("invalid --salt: {}", args.salt))?;
    let init_code_hash = args
        .init_code_hash
        .as_deref()
        .map(parse_h256)
        .transpose()
        .context("invalid --init-code-hash")?;

    outln!(
        machine_mode,
        "createAccount(owner={}, salt={}) on factory {}",
        fmt_address(owner),
        salt,
        fmt_address(dep.factory)
    );
    let receipt = account::create_account(client.clone(), dep.factory, owner, salt).await?;

    let tracer = TraceResolver::new(JsonRpcClient::new(dep.rpc_url.clone(), timeout)?);
    let traced = tracer.resolve_created_address(receipt.transaction_hash).await;

    let derived = derive_address(client, dep.factory, Some(owner), Some(salt), init_code_hash)
        .await?
        .ok_or_else(|| anyhow!("no derivation inputs"))?;
    let resolved = account::reconcile(traced, derived)?;

    report(machine_mode, receipt.transaction_hash, resolved);
    Ok(())
}

async fn cmd_resolve(args: ResolveArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let dep = load(&args.common, None)?;
    let timeout = rpc_timeout(args.common.rpc_timeout_seconds);

    let tx_hash = parse_h256(&args.tx_hash).context("invalid --tx-hash")?;
    let owner = args
        .owner
        .as_deref()
        .map(parse_addr)
        .transpose()
        .context("invalid --owner address")?;
    let salt = args
        .salt
        .as_deref()
        .map(parse_u256)
        .transpose()
        .context("invalid --salt")?;
    let init_code_hash = args
        .init_code_hash
        .as_deref()
        .map(parse_h256)
        .transpose()
        .context("invalid --init-code-hash")?;

    let tracer = TraceResolver::new(JsonRpcClient::new(dep.rpc_url.clone(), timeout)?);
    let traced = tracer.resolve_created_address(tx_hash).await;

    let resolved = if owner.is_none() && init_code_hash.is_none() {
        account::ResolvedAddress {
            address: traced.context("trace resolution failed; pass --owner/--salt or --init-code-hash to derive the address instead")?,
            source: AddressSource::Trace,
        }
    } else {
        let provider = Arc::new(connect(&dep, timeout).await?);
        let derived = derive_address(provider, dep.factory, owner, salt, init_code_hash)
            .await?
            .ok_or_else(|| anyhow!("--salt is required to derive the account address"))?;
        account::reconcile(traced, derived)?
    };

    report(machine_mode, tx_hash, resolved);
    Ok(())
}

/// Deterministic address from CREATE2 inputs when the init code hash is known,
/// otherwise from the factory's `getAddress` view.
async fn derive_address<M: Middleware + 'static>(
    client: Arc<M>,
    factory: Address,
    owner: Option<Address>,
    salt: Option<U256>,
    init_code_hash: Option<H256>,
) -> Result<Option<Address>> {
    let Some(salt) = salt else {
        return Ok(None);
    };
    if let Some(hash) = init_code_hash {
        return Ok(Some(account::create2_address(factory, salt, hash)));
    }
    match owner {
        Some(owner) => Ok(Some(
            account::factory_address(client, factory, owner, salt).await?,
        )),
        None => Ok(None),
    }
}

fn report(machine_mode: bool, tx_hash: H256, resolved: account::ResolvedAddress) {
    let source = match resolved.source {
        AddressSource::Trace => "trace",
        AddressSource::Derived => "derived",
    };
    if machine_mode {
        let out = serde_json::json!({
            "txHash": fmt_h256(tx_hash),
            "smartAccount": fmt_address(resolved.address),
            "source": source,
        });
        println!("{}", out);
    }
    outln!(machine_mode, "txHash:         {}", fmt_h256(tx_hash));
    outln!(machine_mode, "smartAccount:   {}", fmt_address(resolved.address));
    outln!(machine_mode, "resolvedFrom:   {}", source);
}
