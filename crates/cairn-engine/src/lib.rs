//! Single-threaded event dispatch with lineage instrumentation.
//!
//! An [`Engine`] owns a FIFO queue of events and a registry of
//! [`Listener`]s keyed by event type. Each [`Engine::run_next`] step pops one
//! event, runs every listener subscribed to its type in registration order,
//! and appends whatever they emit to the tail of the queue. Listener errors
//! and panics are contained per listener and recorded as [`Crash`]es.
//!
//! # Instrumentation
//!
//! An engine may own a second `Engine<LineageEvent>`. Every step reports
//! what it did as [`LineageEvent`]s (entities, activities, and the used /
//! generated-by / derived-from edges between them), and the instrumentation
//! engine is drained to completion before the step returns. Listeners on the
//! instrumentation engine decide where those facts go; `cairn-lineage`
//! persists them to SQLite.
//!
//! # Usage
//!
//! ```rust,ignore
//! use cairn_engine::{from_fn, Engine};
//!
//! let mut engine = Engine::new().with_instrumentation(lineage_engine);
//! engine.subscribe(from_fn("greet", "Msg", |out, msg: &AppEvent| {
//!     out.emit(AppEvent::Greeted(Greeted { to: msg.text().into() }))?;
//!     Ok(())
//! }).with_outputs(&["Greeted"]))?;
//!
//! engine.topology().validate()?;
//! engine.emit(AppEvent::Msg(Msg { text: "Hello, world!".into() }))?;
//! let report = engine.run();
//! ```

mod engine;
mod lineage;
mod listener;
mod queue;
mod topology;

pub use engine::{Engine, ListenerCrash, QueuePolicy, RunReport, StepReport};
pub use lineage::LineageEvent;
pub use listener::{contain, from_fn, Crash, FnListener, Frame, Listener};
pub use queue::{Envelope, EventQueue};
pub use topology::{Topology, TopologyError};
