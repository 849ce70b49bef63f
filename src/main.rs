use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use log::{debug, error, info, warn};
use serde::Deserialize;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId};
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use uuid::Uuid;

mod callback_handlers;
mod file_ops;
mod flows;
mod helpers;
mod integrations;
mod message_handlers;
mod session;
mod storage;
mod transitions;
mod transport;

use callback_handlers::*;
use file_ops::*;
use flows::*;
use helpers::*;
use integrations::*;
use message_handlers::*;
use session::*;
use storage::*;
use transitions::*;
use transport::*;

const CAPTION_LIMIT: usize = 900;
const ERROR_TAIL_CHARS: usize = 3500;
const MAX_FILENAME_CHARS: usize = 180;
const DEFAULT_STORAGE_DIR: &str = "./storage";
const DEFAULT_MAX_FILE_MB: u64 = 1900;
const DEFAULT_MAX_TEXT_LEN: usize = 200_000;
const DEFAULT_RETENTION_HOURS: u64 = 24;
const DEFAULT_WORKERS: usize = 4;
const RESTRICTED_MERGE_CAP: usize = 10;
const RESTRICTED_IMAGE_CAP: usize = 20;

#[derive(Parser, Debug)]
struct Args {
    /// Optional TOML file. Environment variables override its values.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    token: Option<String>,
    storage_dir: Option<PathBuf>,
    max_file_mb: Option<u64>,
    max_text_len: Option<usize>,
    restricted_mode: Option<bool>,
    retention_hours: Option<u64>,
    workers: Option<usize>,
    merge_cap: Option<usize>,
    image_cap: Option<usize>,
}

#[derive(Debug, Clone)]
struct Config {
    token: String,
    storage_dir: PathBuf,
    max_file_mb: u64,
    max_text_len: usize,
    restricted_mode: bool,
    retention_hours: u64,
    workers: usize,
    merge_cap: Option<usize>,
    image_cap: Option<usize>,
}

impl Config {
    fn limits(&self) -> Limits {
        Limits {
            max_document_bytes: self.max_file_mb.saturating_mul(1024 * 1024),
            max_text_chars: self.max_text_len,
            merge_cap: self.merge_cap,
            image_cap: self.image_cap,
            restricted: self.restricted_mode,
        }
    }

    fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(60 * 60))
    }
}

/// Input policy the state machine checks before any background work starts.
#[derive(Debug, Clone)]
struct Limits {
    max_document_bytes: u64,
    max_text_chars: usize,
    merge_cap: Option<usize>,
    image_cap: Option<usize>,
    restricted: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Menu {
    #[default]
    Main,
    File,
    Download,
    Proxy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Service {
    Youtube,
    GoogleDrive,
    Mega,
    PixelDrain,
    Unrecognized,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LinkTarget {
    Auto,
    Fixed(Service),
}

/// The in-progress flow. Each variant carries exactly the data its next step needs.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Action {
    ZipWaitFile,
    UnzipWaitZip,
    RenameWaitFile,
    RenameWaitNewName { source: PathBuf },
    TextToPdfWaitText,
    ImagesCollect { images: Vec<PathBuf> },
    MergeCollect { pdfs: Vec<PathBuf> },
    ProxyWaitValue,
    AwaitLink(LinkTarget),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Session {
    menu: Menu,
    action: Option<Action>,
    proxy: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FileTask {
    Zip,
    Unzip,
    Rename,
    TextToPdf,
    ImagesToPdf,
    MergePdfs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ProxyCommand {
    Set,
    Clear,
    Show,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Control {
    Done,
    Clear,
    Cancel,
}

/// A parsed `<category>:<action>` callback token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Button {
    Menu(Menu),
    File(FileTask),
    Link(LinkTarget),
    Proxy(ProxyCommand),
    Merge(Control),
    Images(Control),
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct DocumentMeta {
    file_id: String,
    name: Option<String>,
    size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Event {
    Restart,
    Button(Button),
    Text(String),
    Document(DocumentMeta),
    Fetched(PathBuf),
    FetchFailed(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Keyboard {
    Main,
    File,
    Download,
    Proxy,
    MergeControls,
    ImageControls,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Reply {
    text: String,
    keyboard: Option<Keyboard>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Job {
    Zip { source: PathBuf },
    Unzip { archive: PathBuf },
    Rename { source: PathBuf, new_name: String },
    TextToPdf { text: String },
    ImagesToPdf { images: Vec<PathBuf> },
    MergePdfs { pdfs: Vec<PathBuf> },
    Retrieve { service: Service, url: String, proxy: Option<String> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Effect {
    Nothing,
    Reply(Reply),
    ShowMenu(Menu),
    Restart,
    Fetch(DocumentMeta),
    Run(Job),
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Transition {
    next: Session,
    effect: Effect,
}

/// Conditions raised inside jobs that are reported to the user as-is.
#[derive(Debug, thiserror::Error)]
enum FlowError {
    #[error("Rename session expired. Try again.")]
    SessionExpired,
    #[error("That file is not a valid ZIP.")]
    NotZip,
    #[error("New filename is empty.")]
    EmptyName,
    #[error("No images provided.")]
    NoImages,
    #[error("No PDFs provided.")]
    NoPdfs,
    #[error("Operation finished but {0} is missing.")]
    MissingOutput(String),
    #[error("{0}")]
    InvalidLink(&'static str),
    #[error("Playlists are disabled in restricted mode. Send a single video link.")]
    PlaylistBlocked,
    #[error("File too large. Limit = {limit}")]
    TooLarge { limit: String },
}

#[derive(Clone, Debug)]
struct FlowContext {
    user_id: u64,
    chat_id: ChatId,
    origin: Option<MessageId>,
}

struct AppState {
    config: Config,
    limits: Limits,
    sessions: SessionStore,
    workers: Workers,
}

impl AppState {
    fn new(config: Config) -> Self {
        AppState {
            limits: config.limits(),
            sessions: SessionStore::default(),
            workers: Workers::new(config.workers),
            config,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    fs::create_dir_all(&config.storage_dir)
        .with_context(|| format!("create storage dir {}", config.storage_dir.display()))?;

    let removed = sweep(&config.storage_dir, config.retention());
    info!(
        "startup sweep removed {} user area(s) from {}",
        removed,
        config.storage_dir.display()
    );

    let state = Arc::new(AppState::new(config.clone()));
    let bot = Bot::new(config.token.clone());

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
