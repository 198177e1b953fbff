use {
    anyhow::{Context, Error, anyhow, bail, ensure},
    arguments::Arguments,
    async_trait::async_trait,
    auth::{AcceptAll, Authorizer},
    banning::{BanTable, BanningOptions},
    block_template::{BlockTemplate, Payee},
    clap::Parser,
    coinbase::{CoinbaseBuilder, Recipient, RewardKind},
    connection::{Connection, ConnectionContext, JobNotification},
    daemon::{DaemonOptions, DaemonSet, RpcError, rpc_error_code},
    extranonces::{ExtranonceCounter, SubscriptionIds},
    futures::{sink::SinkExt, stream::StreamExt},
    job::Job,
    jobs::Jobs,
    manager::{JobManager, PoolContext, ShareSubmission, TemplateOutcome},
    options::Options,
    p2p::{P2pOptions, Peer},
    pool::Pool,
    primitive_types::{U256, U512},
    rand::RngCore,
    serde::{
        Deserialize, Deserializer, Serialize, Serializer,
        de,
        ser::{SerializeMap, SerializeSeq},
    },
    serde_json::{Value, json},
    serde_with::{DeserializeFromStr, SerializeDisplay},
    session::Session,
    settings::Settings,
    sha2::{Digest, Sha256},
    share::Share,
    snafu::Snafu,
    std::{
        collections::{BTreeMap, HashMap, HashSet},
        fmt, fs, io,
        net::{IpAddr, SocketAddr},
        ops::{BitAnd, BitOr, BitXor, Not},
        path::{Path, PathBuf},
        process,
        str::FromStr,
        sync::{
            Arc, LazyLock, Mutex, RwLock,
            atomic::{AtomicU32, AtomicU64, Ordering},
        },
        time::{Duration, Instant, SystemTime, UNIX_EPOCH},
    },
    stratum::{
        Authorize, Configure, Extranonce, Id, JobId, MerkleNode, Message, Nbits, Nonce, Notify,
        Ntime, PrevHash, SetDifficulty, StratumError, Submit, Subscribe, SubscribeResult,
        SuggestDifficulty, Version,
    },
    subcommand::Subcommand,
    tokio::{
        io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
        net::TcpListener,
        runtime::Runtime,
        sync::{mpsc, watch},
        time::{MissedTickBehavior, interval, sleep},
    },
    tokio_util::{
        codec::{FramedRead, FramedWrite, LinesCodec},
        sync::CancellationToken,
    },
    tracing::{debug, error, info, warn},
    tracing_appender::non_blocking,
    tracing_subscriber::EnvFilter,
    uint256::DIFF1,
    vardiff::{Vardiff, VardiffOptions},
};

mod arguments;
mod auth;
pub mod banning;
pub mod block_template;
mod cashaddr;
pub mod codec;
pub mod coinbase;
mod connection;
pub mod daemon;
pub mod extranonces;
pub mod job;
mod jobs;
pub mod manager;
mod options;
pub mod p2p;
mod pool;
mod session;
pub mod settings;
pub mod share;
mod signal;
pub mod stratum;
mod subcommand;
pub mod uint256;
pub mod vardiff;

pub const USER_AGENT: &str = "lode/0.1.0";

pub const POOL_SIGNATURE: &str = "/lode/";
pub const EXTRANONCE1_SIZE: usize = 4;
pub const EXTRANONCE2_SIZE: usize = 4;
pub const EXTRANONCE_PLACEHOLDER_SIZE: usize = EXTRANONCE1_SIZE + EXTRANONCE2_SIZE;
/// Bytes a connection may buffer without a newline before it is treated as a
/// flood and torn down.
pub const MAX_REQUEST_SIZE: usize = 10_240;
pub const DEFAULT_VERSION_MASK: u32 = 0x3FFF_E000;
/// SHA-256 pools weight shares 1:1 against diff-1.
pub const SHARE_MULTIPLIER: u64 = 1;

type Result<T = (), E = Error> = std::result::Result<T, E>;

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

pub fn main() {
    let (writer, _guard) = non_blocking(io::stderr());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(writer)
        .init();

    let arguments = Arguments::parse();

    Runtime::new()
        .expect("failed to create tokio runtime")
        .block_on(async {
            let cancel = signal::setup_signal_handler();

            if let Err(err) = arguments.run(cancel).await {
                error!("error: {err:#}");
                process::exit(1);
            }
        });
}
