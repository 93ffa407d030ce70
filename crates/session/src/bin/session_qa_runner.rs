use std::env;
use std::sync::Arc;

use snafu::{OptionExt, ResultExt, Snafu};

use murmur::{
    ChatSession, HISTORY_STORE_KEY, OptionsStore, SessionError, Snapshot, SnapshotMode,
    SnapshotPersister,
};
use murmur_core::{ChatEvent, ConversationKey, Role, ServerConversationId};
use murmur_storage::{KeyValueStore, MemoryStore, SqliteStore};
use murmur_transport::ChannelTransport;

#[derive(Debug, Clone)]
struct RunnerArgs {
    scenario: Scenario,
    db_path: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    HelloStream,
    Promotion,
    CancelMidStream,
    TransportFailure,
    DeleteActive,
    DraftGc,
    OptionsStoreRoundtrip,
    PersistenceRoundtrip,
    SqlitePersistence,
    All,
}

impl Scenario {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "hello_stream" => Some(Self::HelloStream),
            "promotion" => Some(Self::Promotion),
            "cancel_mid_stream" => Some(Self::CancelMidStream),
            "transport_failure" => Some(Self::TransportFailure),
            "delete_active" => Some(Self::DeleteActive),
            "draft_gc" => Some(Self::DraftGc),
            "options_store_roundtrip" => Some(Self::OptionsStoreRoundtrip),
            "persistence_roundtrip" => Some(Self::PersistenceRoundtrip),
            "sqlite_persistence" => Some(Self::SqlitePersistence),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::HelloStream => "hello_stream",
            Self::Promotion => "promotion",
            Self::CancelMidStream => "cancel_mid_stream",
            Self::TransportFailure => "transport_failure",
            Self::DeleteActive => "delete_active",
            Self::DraftGc => "draft_gc",
            Self::OptionsStoreRoundtrip => "options_store_roundtrip",
            Self::PersistenceRoundtrip => "persistence_roundtrip",
            Self::SqlitePersistence => "sqlite_persistence",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("missing required --scenario argument"))]
    MissingScenario { stage: &'static str },
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown scenario '{raw}'"))]
    UnknownScenario { stage: &'static str, raw: String },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("missing required --db argument for scenario '{scenario}'"))]
    MissingDbPath {
        stage: &'static str,
        scenario: &'static str,
    },
    #[snafu(display("session operation failed: {source}"))]
    Session {
        stage: &'static str,
        source: SessionError,
    },
    #[snafu(display("storage operation failed: {source}"))]
    Storage {
        stage: &'static str,
        source: murmur_storage::StorageError,
    },
    #[snafu(display("scenario '{scenario}' failed: {reason}"))]
    ScenarioFailed {
        stage: &'static str,
        scenario: &'static str,
        reason: String,
    },
}

type RunnerResult<T> = Result<T, RunnerError>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(error) = run().await {
        println!("runner_ok=false");
        eprintln!("runner_error={error}");
        std::process::exit(1);
    }
}

async fn run() -> RunnerResult<()> {
    let args = parse_args(env::args().skip(1))?;
    println!("scenario={}", args.scenario.name());

    match args.scenario {
        Scenario::HelloStream => run_hello_stream().await,
        Scenario::Promotion => run_promotion().await,
        Scenario::CancelMidStream => run_cancel_mid_stream().await,
        Scenario::TransportFailure => run_transport_failure().await,
        Scenario::DeleteActive => run_delete_active().await,
        Scenario::DraftGc => run_draft_gc().await,
        Scenario::OptionsStoreRoundtrip => run_options_store_roundtrip().await,
        Scenario::PersistenceRoundtrip => run_persistence_roundtrip().await,
        Scenario::SqlitePersistence => {
            run_sqlite_persistence(require_db_path(&args, "sqlite_persistence")?).await
        }
        Scenario::All => run_all().await,
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> RunnerResult<RunnerArgs> {
    let mut scenario = None;
    let mut db_path = None;
    let mut pending = args.into_iter();

    while let Some(argument) = pending.next() {
        match argument.as_str() {
            "--scenario" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-scenario-value",
                    arg: "--scenario",
                })?;
                let parsed = Scenario::parse(&value).context(UnknownScenarioSnafu {
                    stage: "parse-args-scenario",
                    raw: value,
                })?;
                scenario = Some(parsed);
            }
            "--db" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-db-value",
                    arg: "--db",
                })?;
                db_path = Some(value);
            }
            _ => {
                return UnknownArgumentSnafu {
                    stage: "parse-args",
                    raw: argument,
                }
                .fail();
            }
        }
    }

    Ok(RunnerArgs {
        scenario: scenario.context(MissingScenarioSnafu {
            stage: "parse-args-scenario-required",
        })?,
        db_path,
    })
}

fn require_db_path<'a>(args: &'a RunnerArgs, scenario: &'static str) -> RunnerResult<&'a str> {
    args.db_path.as_deref().context(MissingDbPathSnafu {
        stage: "require-db-path",
        scenario,
    })
}

fn check(scenario: &'static str, condition: bool, reason: &str) -> RunnerResult<()> {
    if condition {
        Ok(())
    } else {
        ScenarioFailedSnafu {
            stage: "check",
            scenario,
            reason: reason.to_string(),
        }
        .fail()
    }
}

fn assistant_content(session: &ChatSession, key: &ConversationKey) -> String {
    session
        .conversation(key)
        .and_then(|conversation| {
            conversation
                .history
                .values()
                .rev()
                .find(|message| message.role == Role::Assistant)
                .map(|message| message.content.clone())
        })
        .unwrap_or_default()
}

async fn run_all() -> RunnerResult<()> {
    run_hello_stream().await?;
    run_promotion().await?;
    run_cancel_mid_stream().await?;
    run_transport_failure().await?;
    run_delete_active().await?;
    run_draft_gc().await?;
    run_options_store_roundtrip().await?;
    run_persistence_roundtrip().await?;
    println!("all_passed=true");
    Ok(())
}

async fn run_hello_stream() -> RunnerResult<()> {
    let transport = ChannelTransport::new();
    let mut session = ChatSession::new(Arc::new(transport.clone()));

    session
        .send_message("Hello")
        .context(SessionSnafu { stage: "send" })?;
    let key = session.current_key().clone();

    let stream = transport.last_stream().expect("stream opened");
    stream.send(ChatEvent::Text("Hi".to_string()));
    stream.send(ChatEvent::Text(" there".to_string()));
    stream.close();
    session
        .run_until_idle()
        .await
        .context(SessionSnafu { stage: "drain" })?;

    let content = assistant_content(&session, &key);
    println!("assistant_content={content}");
    check("hello_stream", content == "Hi there", "content mismatch")?;
    check(
        "hello_stream",
        !session.conversation(&key).expect("conversation").is_loading,
        "loading flag still set",
    )?;
    println!("runner_ok=true");
    Ok(())
}

async fn run_promotion() -> RunnerResult<()> {
    let transport = ChannelTransport::new();
    let mut session = ChatSession::new(Arc::new(transport.clone()));
    let temp_key = session.current_key().clone();

    session
        .send_message("persist me")
        .context(SessionSnafu { stage: "send" })?;
    let stream = transport.last_stream().expect("stream opened");
    stream.send(ChatEvent::ConversationId(ServerConversationId::from("conv-qa")));
    stream.send(ChatEvent::Text("done".to_string()));
    stream.close();
    session
        .run_until_idle()
        .await
        .context(SessionSnafu { stage: "drain" })?;

    let promoted = ConversationKey::Persisted(ServerConversationId::from("conv-qa"));
    println!("temp_gone={}", session.conversation(&temp_key).is_none());
    println!("promoted_active={}", session.current_key() == &promoted);
    check(
        "promotion",
        session.conversation(&temp_key).is_none() && session.current_key() == &promoted,
        "store was not re-keyed",
    )?;
    println!("runner_ok=true");
    Ok(())
}

async fn run_cancel_mid_stream() -> RunnerResult<()> {
    let transport = ChannelTransport::new();
    let mut session = ChatSession::new(Arc::new(transport.clone()));

    session
        .send_message("never mind")
        .context(SessionSnafu { stage: "send" })?;
    let key = session.current_key().clone();

    let stream = transport.last_stream().expect("stream opened");
    stream.send(ChatEvent::Text("partial".to_string()));
    session
        .pump_one()
        .await
        .context(SessionSnafu { stage: "pump" })?;

    session.stop_answering();
    let loading_cleared = !session.conversation(&key).expect("conversation").is_loading;
    stream.close();
    session
        .run_until_idle()
        .await
        .context(SessionSnafu { stage: "drain" })?;

    let content = assistant_content(&session, &key);
    println!("loading_cleared={loading_cleared}");
    println!("partial_content={content}");
    check("cancel_mid_stream", loading_cleared, "loading not cleared synchronously")?;
    check(
        "cancel_mid_stream",
        content == "partial",
        "partial content was not preserved",
    )?;
    println!("runner_ok=true");
    Ok(())
}

async fn run_transport_failure() -> RunnerResult<()> {
    let transport = ChannelTransport::new();
    let mut session = ChatSession::new(Arc::new(transport.clone()));

    session
        .send_message("doomed")
        .context(SessionSnafu { stage: "send" })?;
    let key = session.current_key().clone();

    let stream = transport.last_stream().expect("stream opened");
    stream.fail("connection reset");
    session
        .run_until_idle()
        .await
        .context(SessionSnafu { stage: "drain" })?;

    let error_set = session
        .conversation(&key)
        .and_then(|conversation| {
            conversation
                .history
                .values()
                .find(|message| message.role == Role::Assistant)
                .and_then(|message| message.error.clone())
        })
        .is_some();
    println!("error_set={error_set}");
    check("transport_failure", error_set, "no error landed on the placeholder")?;
    println!("runner_ok=true");
    Ok(())
}

async fn run_delete_active() -> RunnerResult<()> {
    let transport = ChannelTransport::new();
    let mut session = ChatSession::new(Arc::new(transport.clone()));

    session
        .send_message("about to vanish")
        .context(SessionSnafu { stage: "send" })?;
    let doomed = session.current_key().clone();

    let outcome = session
        .delete_conversation(&doomed)
        .context(SessionSnafu { stage: "delete" })?;

    println!("deleted_absent={}", session.conversation(&doomed).is_none());
    println!("replacement_created={}", outcome.replacement.is_some());
    check(
        "delete_active",
        session.conversation(&doomed).is_none()
            && outcome.replacement.as_ref() == Some(session.current_key()),
        "store still references the deleted conversation",
    )?;
    println!("runner_ok=true");
    Ok(())
}

async fn run_draft_gc() -> RunnerResult<()> {
    let transport = ChannelTransport::new();
    let mut session = ChatSession::new(Arc::new(transport));

    session.new_conversation();
    session.new_conversation();

    println!("conversation_count={}", session.store().len());
    check(
        "draft_gc",
        session.store().len() == 1,
        "abandoned drafts were not collected",
    )?;
    println!("runner_ok=true");
    Ok(())
}

async fn run_options_store_roundtrip() -> RunnerResult<()> {
    let config_path = std::env::temp_dir()
        .join(format!("murmur-qa-{}", std::process::id()))
        .join("options.json");
    let options_store = OptionsStore::new(config_path.clone());

    let mut options = murmur_core::ChatOptions::default();
    options.model = Some("qa-model".to_string());
    options_store
        .update(options)
        .map_err(|error| RunnerError::ScenarioFailed {
            stage: "options-update",
            scenario: "options_store_roundtrip",
            reason: error.to_string(),
        })?;

    let reloaded = OptionsStore::new(config_path.clone());
    let persisted_model = reloaded.options().model.clone();
    println!("persisted_model={}", persisted_model.as_deref().unwrap_or(""));

    let transport = ChannelTransport::new();
    let mut session = ChatSession::new(Arc::new(transport.clone()));
    session.set_default_options((*reloaded.options()).clone());
    session
        .send_message("with stored options")
        .context(SessionSnafu { stage: "send" })?;

    let stream = transport.last_stream().expect("stream opened");
    let request_model = stream
        .request()
        .context
        .options
        .as_ref()
        .and_then(|options| options.model.clone());
    println!("request_model={}", request_model.as_deref().unwrap_or(""));
    check(
        "options_store_roundtrip",
        request_model.as_deref() == Some("qa-model"),
        "stored options did not reach the outgoing request",
    )?;

    let _ = std::fs::remove_file(config_path);
    println!("runner_ok=true");
    Ok(())
}

async fn run_persistence_roundtrip() -> RunnerResult<()> {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    persistence_roundtrip_over("persistence_roundtrip", store).await?;
    println!("runner_ok=true");
    Ok(())
}

async fn run_sqlite_persistence(db_path: &str) -> RunnerResult<()> {
    let store = SqliteStore::open(db_path)
        .await
        .context(StorageSnafu { stage: "sqlite-open" })?;
    persistence_roundtrip_over("sqlite_persistence", Arc::new(store)).await?;
    println!("runner_ok=true");
    Ok(())
}

async fn persistence_roundtrip_over(
    scenario: &'static str,
    store: Arc<dyn KeyValueStore>,
) -> RunnerResult<()> {
    let transport = ChannelTransport::new();
    let mut session = ChatSession::initialize(
        Arc::new(transport.clone()),
        SnapshotPersister::new(store.clone(), SnapshotMode::Conversations),
    )
    .await
    .context(SessionSnafu { stage: "initialize" })?;

    session
        .send_message("remember this")
        .context(SessionSnafu { stage: "send" })?;
    let key = session.current_key().clone();
    let stream = transport.last_stream().expect("stream opened");
    stream.send(ChatEvent::Text("stored answer".to_string()));
    stream.close();
    session
        .run_until_idle()
        .await
        .context(SessionSnafu { stage: "drain" })?;
    session
        .flush_persistence()
        .await
        .context(SessionSnafu { stage: "flush" })?;
    drop(session);

    let raw = store
        .get(HISTORY_STORE_KEY)
        .await
        .context(StorageSnafu { stage: "read-back" })?;
    let written = raw
        .as_deref()
        .map(|payload| serde_json::from_str::<Snapshot>(payload).is_ok())
        .unwrap_or(false);
    println!("snapshot_written={written}");
    check(scenario, written, "no decodable snapshot was written")?;

    let restored = ChatSession::initialize(
        Arc::new(transport),
        SnapshotPersister::new(store, SnapshotMode::Conversations),
    )
    .await
    .context(SessionSnafu { stage: "restore" })?;

    let content = assistant_content(&restored, &key);
    println!("restored_content={content}");
    check(scenario, content == "stored answer", "restored content mismatch")?;
    check(
        scenario,
        restored.current_key() == &key,
        "active pointer was not restored",
    )?;
    Ok(())
}
