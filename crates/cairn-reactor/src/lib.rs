//! Command/event reactor loop.
//!
//! Applications model intent as commands and outcomes as events. A
//! [`Procedure`] handles a command and emits events; a [`Policy`] reacts to
//! an event and submits commands. The [`Reactor`] alternates between the two
//! queues until both are empty, appending every event to an
//! [`cairn_store::EventStore`] before any policy sees it.
//!
//! Because the store is content-addressed, an event observed twice is
//! chained twice but its policies run once: ingestion is at-least-once and
//! policy side effects are at-most-once.
//!
//! # Usage
//!
//! ```rust,ignore
//! let store = EventStore::open("data")?;
//! let mut reactor = Reactor::new(store, deps);
//! reactor.register_procedure(procedure_fn("AddTodo", "AddTodo", add_todo).with_outputs(&["TodoAdded"]))?;
//! reactor.register_policy(policy_fn("NotifyOnAdd", "TodoAdded", notify))?;
//! reactor.topology().validate()?;
//!
//! reactor.submit(TodoCommand::AddTodo(AddTodo { text: "water plants".into() }))?;
//! let report = reactor.run()?;
//! ```

mod deps;
mod error;
mod handler;
mod reactor;

pub use deps::{Mutation, MutationOutcome, Query};
pub use error::ReactorError;
pub use handler::{
    policy_fn, procedure_fn, FnPolicy, FnProcedure, Policy, PolicyContext, Procedure,
    ProcedureContext,
};
pub use reactor::{HandlerCrash, Reactor, ReactorReport};
