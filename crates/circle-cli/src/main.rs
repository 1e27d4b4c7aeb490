//! Circle demo driver.
//!
//! Runs a full exchange between two simulated devices, Alice and Bob. Every
//! bundle, public key and message crosses between them as JSON, the way the
//! backend relays it.
//!
//! # Usage
//!
//! ```bash
//! # Group circle, both devices in memory
//! circle group --message "hello circle"
//!
//! # Sponsor chat, Alice's sessions persisted on disk
//! circle --db alice.redb sponsor --message "hi"
//! ```

use std::path::{Path, PathBuf};

use circle_core::{
    GroupMessage, GroupProtocolCoordinator, MemoryStorage, PairwiseSessionManager, PeerPublicKeys,
    ProtocolConfig, ProtocolError, RedbStorage, SenderKeyBundle, SponsorMessage, Storage,
    StorageError, SystemEnv, WireError,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const GROUP_ID: &str = "circle-demo";
const SPONSORSHIP_ID: &str = "sponsorship-demo";

/// Circle messaging demo
#[derive(Parser, Debug)]
#[command(name = "circle")]
#[command(about = "Encrypted group and sponsor messaging between two simulated devices")]
#[command(version)]
struct Args {
    /// Persist Alice's sessions in this redb file instead of memory
    #[arg(long)]
    db: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Largest forward jump a mirrored group chain performs
    #[arg(long, default_value_t = ProtocolConfig::default().max_skip)]
    max_skip: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a group circle and exchange one message each way
    Group {
        /// Text Alice sends to the circle
        #[arg(short, long, default_value = "hello circle")]
        message: String,
    },
    /// Pair a sponsor chat and exchange one message each way
    Sponsor {
        /// Text Alice sends to Bob
        #[arg(short, long, default_value = "hi")]
        message: String,
    },
}

/// Demo failures.
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// Protocol operation failed
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Relay payload could not be decoded
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Database could not be opened
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = ProtocolConfig { max_skip: args.max_skip, ..ProtocolConfig::default() };

    match args.db {
        Some(path) => run_on_disk(&path, config, args.command).await,
        None => {
            tracing::info!("Using in-memory store");
            run(MemoryStorage::new(), config, args.command).await
        },
    }
}

async fn run_on_disk(
    path: &Path,
    config: ProtocolConfig,
    command: Command,
) -> Result<(), CliError> {
    let storage = RedbStorage::open(path)?;
    tracing::info!("Using redb store at {}", path.display());
    run(storage, config, command).await
}

async fn run<S: Storage>(
    alice_storage: S,
    config: ProtocolConfig,
    command: Command,
) -> Result<(), CliError> {
    match command {
        Command::Group { message } => group_demo(alice_storage, config, &message).await,
        Command::Sponsor { message } => sponsor_demo(alice_storage, &message).await,
    }
}

async fn group_demo<S: Storage>(
    alice_storage: S,
    config: ProtocolConfig,
    text: &str,
) -> Result<(), CliError> {
    let alice = GroupProtocolCoordinator::new(alice_storage, SystemEnv::new(), config);
    let bob = GroupProtocolCoordinator::new(MemoryStorage::new(), SystemEnv::new(), config);

    let identity = alice.initialize().await?.public_bundle();
    tracing::info!(
        registration_id = identity.registration_id,
        signed_pre_key_valid = identity.verify_signed_pre_key(),
        "Alice identity ready"
    );
    bob.initialize().await?;

    let alice_bundle = alice.create_group(GROUP_ID, "alice").await?.to_json();
    let bob_bundle = bob.create_group(GROUP_ID, "bob").await?.to_json();
    alice.add_group_member(GROUP_ID, &SenderKeyBundle::from_json(&bob_bundle)?).await?;
    bob.add_group_member(GROUP_ID, &SenderKeyBundle::from_json(&alice_bundle)?).await?;
    let members = alice.members(GROUP_ID).await;
    tracing::info!(group_id = GROUP_ID, ?members, "Bundles exchanged");

    let sent = alice.send_group_message(GROUP_ID, text).await?;
    tracing::info!(
        key_index = sent.key_index,
        "Alice sent {} payload bytes",
        sent.encrypted_payload.len()
    );

    let relayed = GroupMessage::from_json(&sent.to_json())?;
    let received = bob.receive_group_message(GROUP_ID, &relayed).await?;
    tracing::info!("Bob read: {received}");

    let reply = bob.send_group_message(GROUP_ID, &format!("ack: {received}")).await?;
    let relayed = GroupMessage::from_json(&reply.to_json())?;
    let received = alice.receive_group_message(GROUP_ID, &relayed).await?;
    tracing::info!("Alice read: {received}");

    Ok(())
}

async fn sponsor_demo<S: Storage>(alice_storage: S, text: &str) -> Result<(), CliError> {
    let alice = PairwiseSessionManager::new(alice_storage, SystemEnv::new());
    let bob = PairwiseSessionManager::new(MemoryStorage::new(), SystemEnv::new());

    let alice_keys = alice.create_session(SPONSORSHIP_ID, "alice", "bob").await?.to_json();
    let bob_keys = bob.create_session(SPONSORSHIP_ID, "bob", "alice").await?.to_json();
    alice.set_other_public_key(SPONSORSHIP_ID, &PeerPublicKeys::from_json(&bob_keys)?).await?;
    bob.set_other_public_key(SPONSORSHIP_ID, &PeerPublicKeys::from_json(&alice_keys)?).await?;
    tracing::info!(sponsorship_id = SPONSORSHIP_ID, "Key exchange complete");

    let sent = alice.encrypt_message(SPONSORSHIP_ID, text).await?;
    let relayed = SponsorMessage::from_json(&sent.to_json())?;
    let received = bob.decrypt_message(SPONSORSHIP_ID, &relayed).await?;
    tracing::info!("Bob read: {received}");

    let reply = bob.encrypt_message(SPONSORSHIP_ID, &format!("ack: {received}")).await?;
    let relayed = SponsorMessage::from_json(&reply.to_json())?;
    let received = alice.decrypt_message(SPONSORSHIP_ID, &relayed).await?;
    tracing::info!("Alice read: {received}");

    Ok(())
}
