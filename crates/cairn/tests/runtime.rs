//! Runtime wiring: config to stores to instrumented engines and reactors.

use cairn::config::Config;
use cairn::engine::from_fn;
use cairn::reactor::{procedure_fn, ProcedureContext};
use cairn::store::{StoreError, TypeRegistry};
use cairn::types::{Command, Event};
use cairn::{inspect, Runtime, RuntimeError};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Msg {
    text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Greeted {
    to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
enum AppEvent {
    Msg(Msg),
    Greeted(Greeted),
}

impl Event for AppEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Msg(_) => "Msg",
            Self::Greeted(_) => "Greeted",
        }
    }
}

impl From<Msg> for AppEvent {
    fn from(m: Msg) -> Self {
        Self::Msg(m)
    }
}

#[derive(Debug)]
struct Say(String);

impl Command for Say {
    fn command_type(&self) -> &'static str {
        "Say"
    }
}

fn config_in(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.store.path = dir.path().join("data").to_string_lossy().into_owned();
    config.lineage.path = dir.path().join("lineage.db").to_string_lossy().into_owned();
    config
}

#[test]
fn instrumented_engine_persists_lineage() {
    let dir = TempDir::new().expect("tmp");
    let runtime = Runtime::open(&config_in(&dir)).expect("open runtime");

    let mut engine = runtime.instrumented_engine::<AppEvent>();
    engine
        .subscribe(
            from_fn("greet", "Msg", |out, ev: &AppEvent| {
                let AppEvent::Msg(msg) = ev else {
                    anyhow::bail!("unexpected event {ev:?}");
                };
                out.emit(AppEvent::Greeted(Greeted {
                    to: msg.text.clone(),
                }))?;
                Ok(())
            })
            .with_outputs(&["Greeted"]),
        )
        .expect("subscribe");
    engine.topology().validate().expect("acyclic");

    let root = engine
        .emit(AppEvent::Msg(Msg {
            text: "Hello, world!".to_string(),
        }))
        .expect("emit");
    let report = engine.run();
    assert_eq!(report.steps, 2);
    assert!(report.crashes.is_empty());

    let derived = runtime
        .lineage()
        .entities_derived_from(root.as_str())
        .expect("derived");
    assert_eq!(derived.len(), 1);
    assert_eq!(derived[0].entity_type, "Greeted");
    assert_eq!(derived[0].data, r#"{"to":"Hello, world!"}"#);
}

#[test]
fn reactor_appends_to_the_configured_store() {
    let dir = TempDir::new().expect("tmp");
    let runtime = Runtime::open(&config_in(&dir)).expect("open runtime");
    let (mut reactor, _lineage) = runtime.into_reactor::<Say, AppEvent, ()>(());

    reactor
        .register_procedure(
            procedure_fn(
                "SayProcedure",
                "Say",
                |ctx: &mut ProcedureContext<'_, AppEvent, ()>, cmd: &Say| {
                    ctx.emit(AppEvent::Msg(Msg { text: cmd.0.clone() }))?;
                    Ok(())
                },
            )
            .with_outputs(&["Msg"]),
        )
        .expect("register");

    reactor.submit(Say("hi".to_string())).expect("submit");
    reactor.submit(Say("hi".to_string())).expect("submit");
    let report = reactor.run().expect("run");
    assert_eq!(report.events, 2);
    assert_eq!(report.duplicates, 1);

    let registry = TypeRegistry::<AppEvent>::new().with::<Msg>("Msg");
    let entries = reactor.store().read_all(&registry).expect("read");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].event_hash, entries[1].event_hash);
}

#[test]
fn second_runtime_on_same_store_is_locked_out() {
    let dir = TempDir::new().expect("tmp");
    let config = config_in(&dir);
    let first = Runtime::open(&config).expect("open runtime");

    let err = Runtime::open(&config)
        .err()
        .expect("store already has a writer");
    assert!(matches!(err, RuntimeError::Store(StoreError::Locked(_))));

    drop(first);
    Runtime::open(&config).expect("lock released with the first runtime");
}

#[test]
fn inspection_creates_nothing() {
    let dir = TempDir::new().expect("tmp");
    let config = config_in(&dir);

    let inspection = inspect(&config).expect("inspect empty setup");
    assert!(inspection.is_healthy());
    assert_eq!(inspection.store.rows, 0);
    assert!(inspection.lineage.is_none());
    assert!(!dir.path().join("lineage.db").exists());
    assert!(!dir.path().join("data").exists());
}

#[test]
fn inspection_counts_existing_lineage_next_to_a_live_writer() {
    let dir = TempDir::new().expect("tmp");
    let config = config_in(&dir);
    let runtime = Runtime::open(&config).expect("open runtime");

    let mut engine = runtime.instrumented_engine::<AppEvent>();
    engine
        .emit(AppEvent::Msg(Msg {
            text: "counted".to_string(),
        }))
        .expect("emit");
    engine.run();

    let inspection = inspect(&config).expect("inspect while the writer holds the lock");
    assert!(inspection.is_healthy());
    let counts = inspection.lineage.expect("lineage database exists");
    assert_eq!(counts.entities, 1);
    assert!(dir.path().join("data").join("chain.lock").exists());
}
