//! A small todo application driven through the reactor.

use std::cell::RefCell;
use std::fs;
use std::rc::Rc;

use cairn_reactor::{
    policy_fn, procedure_fn, Mutation, MutationOutcome, PolicyContext, ProcedureContext, Query,
    Reactor, ReactorError,
};
use cairn_store::{EventStore, StoreError};
use cairn_types::{CanonicalEvent, Command, Event, ValidationError};
use serde::Serialize;
use tempfile::TempDir;

// ── Domain ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum TodoCommand {
    AddTodo { text: String },
    CompleteTodo { todo_id: String },
    Archive,
}

impl Command for TodoCommand {
    fn command_type(&self) -> &'static str {
        match self {
            Self::AddTodo { .. } => "AddTodo",
            Self::CompleteTodo { .. } => "CompleteTodo",
            Self::Archive => "Archive",
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if let Self::AddTodo { text } = self {
            if text.trim().is_empty() {
                return Err(ValidationError::rejected("AddTodo", "text cannot be empty"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
enum TodoEvent {
    TodoAdded {
        todo_id: String,
        text: String,
        urgent: bool,
    },
    TodoCompleted {
        todo_id: String,
    },
}

impl Event for TodoEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::TodoAdded { .. } => "TodoAdded",
            Self::TodoCompleted { .. } => "TodoCompleted",
        }
    }
}

struct Deps {
    log: Rc<RefCell<Vec<String>>>,
    is_urgent: Query<String, bool>,
    notify: Mutation<String>,
}

fn deps(fail_notify: bool) -> Deps {
    let log = Rc::new(RefCell::new(Vec::new()));
    let notify_log = log.clone();
    Deps {
        log: log.clone(),
        is_urgent: Query::new(|text: String| text.ends_with('!')),
        notify: Mutation::new(move |message: String| {
            if fail_notify {
                return MutationOutcome::failed("mail server unreachable");
            }
            notify_log.borrow_mut().push(format!("notify:{message}"));
            MutationOutcome::ok()
        }),
    }
}

type TodoReactor = Reactor<TodoCommand, TodoEvent, Deps>;

fn todo_reactor(dir: &TempDir, deps: Deps) -> TodoReactor {
    let store = EventStore::open(dir.path()).expect("open store");
    let mut reactor = Reactor::new(store, deps);

    reactor
        .register_procedure(
            procedure_fn(
                "AddTodoProcedure",
                "AddTodo",
                |ctx: &mut ProcedureContext<'_, TodoEvent, Deps>, command: &TodoCommand| {
                    let TodoCommand::AddTodo { text } = command else {
                        anyhow::bail!("unexpected command {command:?}");
                    };
                    ctx.deps().log.borrow_mut().push(format!("add:{text}"));
                    let urgent = ctx.deps().is_urgent.run(text.clone());
                    ctx.emit(TodoEvent::TodoAdded {
                        todo_id: text.to_lowercase().replace(' ', "-"),
                        text: text.clone(),
                        urgent,
                    })?;
                    Ok(())
                },
            )
            .with_outputs(&["TodoAdded"]),
        )
        .expect("register AddTodo");

    reactor
        .register_procedure(
            procedure_fn(
                "CompleteTodoProcedure",
                "CompleteTodo",
                |ctx: &mut ProcedureContext<'_, TodoEvent, Deps>, command: &TodoCommand| {
                    if let TodoCommand::CompleteTodo { todo_id } = command {
                        ctx.deps().log.borrow_mut().push(format!("complete:{todo_id}"));
                        ctx.emit(TodoEvent::TodoCompleted {
                            todo_id: todo_id.clone(),
                        })?;
                    }
                    Ok(())
                },
            )
            .with_outputs(&["TodoCompleted"]),
        )
        .expect("register CompleteTodo");

    reactor
        .register_policy(
            policy_fn(
                "AutoCompleteChores",
                "TodoAdded",
                |ctx: &mut PolicyContext<'_, TodoCommand, Deps>, event: &TodoEvent| {
                    if let TodoEvent::TodoAdded { todo_id, text, .. } = event {
                        ctx.deps().log.borrow_mut().push(format!("policy:{todo_id}"));
                        if text.starts_with("chore") {
                            ctx.submit(TodoCommand::CompleteTodo {
                                todo_id: todo_id.clone(),
                            })?;
                        }
                    }
                    Ok(())
                },
            )
            .with_outputs(&["CompleteTodo"]),
        )
        .expect("register AutoCompleteChores");

    reactor
        .register_policy(policy_fn(
            "NotifyOnCompletion",
            "TodoCompleted",
            |ctx: &mut PolicyContext<'_, TodoCommand, Deps>, event: &TodoEvent| {
                if let TodoEvent::TodoCompleted { todo_id } = event {
                    ctx.deps().notify.apply(todo_id.clone()).into_result()?;
                }
                Ok(())
            },
        ))
        .expect("register NotifyOnCompletion");

    reactor
}

fn chain_types(reactor: &TodoReactor) -> Vec<String> {
    reactor
        .store()
        .read_chain()
        .expect("read chain")
        .into_iter()
        .map(|row| row.event_type)
        .collect()
}

fn add(text: &str) -> TodoCommand {
    TodoCommand::AddTodo {
        text: text.to_string(),
    }
}

// ── Scenarios ────────────────────────────────────────────────────────

#[test]
fn duplicate_events_are_chained_but_react_once() {
    let dir = TempDir::new().expect("tmp");
    let mut reactor = todo_reactor(&dir, deps(false));
    let added = TodoEvent::TodoAdded {
        todo_id: "buy-milk".to_string(),
        text: "buy milk".to_string(),
        urgent: false,
    };

    reactor.emit(added.clone()).expect("emit");
    reactor.emit(added).expect("emit");
    let report = reactor.run().expect("run");

    assert_eq!(report.events, 2);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.policy_runs, 1);
    assert_eq!(*reactor.deps().log.borrow(), vec!["policy:buy-milk"]);
    assert_eq!(chain_types(&reactor), vec!["TodoAdded", "TodoAdded"]);
}

#[test]
fn duplicate_commands_persist_twice_and_react_once() {
    let dir = TempDir::new().expect("tmp");
    let mut reactor = todo_reactor(&dir, deps(false));

    reactor.submit(add("water plants")).expect("submit");
    reactor.submit(add("water plants")).expect("submit");
    let report = reactor.run().expect("run");

    assert_eq!(report.procedure_runs, 2);
    assert_eq!(report.policy_runs, 1);
    assert_eq!(
        *reactor.deps().log.borrow(),
        vec!["add:water plants", "add:water plants", "policy:water-plants"]
    );
}

#[test]
fn commands_drain_before_events() {
    let dir = TempDir::new().expect("tmp");
    let mut reactor = todo_reactor(&dir, deps(false));

    reactor.submit(add("chore dishes")).expect("submit");
    reactor.submit(add("call mom!")).expect("submit");
    let report = reactor.run().expect("run");

    assert_eq!(
        *reactor.deps().log.borrow(),
        vec![
            "add:chore dishes",
            "add:call mom!",
            "policy:chore-dishes",
            "policy:call-mom!",
            "complete:chore-dishes",
            "notify:chore-dishes",
        ]
    );
    assert_eq!(report.commands, 3);
    assert_eq!(report.events, 3);
    assert_eq!(report.duplicates, 0);
    assert!(report.crashes.is_empty());
    assert_eq!(
        chain_types(&reactor),
        vec!["TodoAdded", "TodoAdded", "TodoCompleted"]
    );
}

#[test]
fn queries_feed_emitted_events() {
    let dir = TempDir::new().expect("tmp");
    let mut reactor = todo_reactor(&dir, deps(false));
    reactor.submit(add("pay rent!")).expect("submit");
    reactor.run().expect("run");

    let store = EventStore::open_read_only(dir.path());
    let rows = store.read_chain().expect("chain");
    let blob = std::fs::read_to_string(store.blob_path(&rows[0].event_hash)).expect("blob");
    assert_eq!(blob, r#"{"text":"pay rent!","todo_id":"pay-rent!","urgent":true}"#);
}

#[test]
fn failed_mutation_is_contained() {
    let dir = TempDir::new().expect("tmp");
    let mut reactor = todo_reactor(&dir, deps(true));

    reactor.submit(add("chore laundry")).expect("submit");
    let report = reactor.run().expect("run completes despite the crash");

    assert_eq!(report.crashes.len(), 1);
    assert_eq!(report.crashes[0].handler, "NotifyOnCompletion");
    assert_eq!(report.crashes[0].input_type, "TodoCompleted");
    assert_eq!(report.crashes[0].crash.message, "mail server unreachable");
    assert_eq!(reactor.pending_commands(), 0);
    assert_eq!(reactor.pending_events(), 0);
}

#[test]
fn unhandled_commands_are_dropped() {
    let dir = TempDir::new().expect("tmp");
    let mut reactor = todo_reactor(&dir, deps(false));

    reactor.submit(TodoCommand::Archive).expect("submit");
    let report = reactor.run().expect("run");
    assert_eq!(report.commands, 1);
    assert_eq!(report.unhandled_commands, 1);
    assert!(chain_types(&reactor).is_empty());
}

#[test]
fn invalid_commands_are_rejected_at_submit() {
    let dir = TempDir::new().expect("tmp");
    let mut reactor = todo_reactor(&dir, deps(false));

    let err = reactor.submit(add("   ")).expect_err("blank text");
    assert!(matches!(err, ValidationError::Rejected { .. }));
    assert_eq!(reactor.pending_commands(), 0);
}

#[test]
fn store_failure_keeps_the_event_queued() {
    let dir = TempDir::new().expect("tmp");
    let read_only = EventStore::open_read_only(dir.path());
    let mut reactor: TodoReactor = Reactor::new(read_only, deps(false));

    reactor
        .emit(TodoEvent::TodoCompleted {
            todo_id: "x".to_string(),
        })
        .expect("emit");
    let err = reactor.run().expect_err("store is read-only");
    assert!(matches!(err, ReactorError::Store(StoreError::ReadOnly(_))));
    assert_eq!(reactor.pending_events(), 1);
}

#[test]
fn topology_covers_both_phases() {
    let dir = TempDir::new().expect("tmp");
    let mut reactor = todo_reactor(&dir, deps(false));

    let topology = reactor.topology();
    assert_eq!(topology.handler_count(), 4);
    assert_eq!(topology.validate(), Ok(()));

    reactor
        .register_policy(
            policy_fn(
                "ReAdd",
                "TodoCompleted",
                |_: &mut PolicyContext<'_, TodoCommand, Deps>, _: &TodoEvent| Ok(()),
            )
            .with_outputs(&["AddTodo"]),
        )
        .expect("register");
    assert!(reactor.topology().validate().is_err());
}

#[test]
fn leftover_blob_from_a_crash_still_reaches_policies() {
    let dir = TempDir::new().expect("tmp");
    let completed = TodoEvent::TodoCompleted {
        todo_id: "pay-rent".to_string(),
    };
    let canonical = CanonicalEvent::of(&completed).expect("canonical");
    let blob = EventStore::open_read_only(dir.path()).blob_path(canonical.hash());
    fs::create_dir_all(blob.parent().expect("shard")).expect("shard dir");
    fs::write(&blob, canonical.json()).expect("blob without chain row");

    let deps = deps(false);
    let log = deps.log.clone();
    let mut reactor = todo_reactor(&dir, deps);
    reactor.emit(completed).expect("emit");
    let report = reactor.run().expect("run");

    assert_eq!(report.events, 1);
    assert_eq!(report.duplicates, 0);
    assert_eq!(report.policy_runs, 1);
    assert_eq!(*log.borrow(), vec!["notify:pay-rent"]);
    assert_eq!(chain_types(&reactor), vec!["TodoCompleted"]);
}
