//! Procedures (command handlers), policies (event handlers), and the
//! contexts they run in.

use std::collections::VecDeque;
use std::marker::PhantomData;

use cairn_types::{validate_type_name, CanonicalEvent, Command, Event, ValidationError};

/// Handles one command type and emits events.
pub trait Procedure<C, E, D> {
    fn name(&self) -> &str;

    /// The command type this procedure handles.
    fn input_type(&self) -> &'static str;

    /// Event types `run` may emit. Only used for topology checks.
    fn output_types(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// # Errors
    ///
    /// Errors and panics are contained by the reactor and reported as
    /// crashes. Events emitted before the failure stay queued.
    fn run(&mut self, ctx: &mut ProcedureContext<'_, E, D>, command: &C) -> anyhow::Result<()>;
}

/// Reacts to one event type and submits commands.
///
/// Policies only see the first observation of an event; duplicates are
/// chained but never delivered.
pub trait Policy<C, E, D> {
    fn name(&self) -> &str;

    /// The event type this policy reacts to.
    fn input_type(&self) -> &'static str;

    /// Command types `run` may submit. Only used for topology checks.
    fn output_types(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// # Errors
    ///
    /// Errors and panics are contained by the reactor and reported as
    /// crashes. Commands submitted before the failure stay queued.
    fn run(&mut self, ctx: &mut PolicyContext<'_, C, D>, event: &E) -> anyhow::Result<()>;
}

/// What a procedure can do: emit events and read through `deps`.
pub struct ProcedureContext<'a, E, D> {
    events: &'a mut VecDeque<E>,
    deps: &'a D,
    emitted: usize,
}

impl<'a, E: Event, D> ProcedureContext<'a, E, D> {
    pub(crate) fn new(events: &'a mut VecDeque<E>, deps: &'a D) -> Self {
        Self {
            events,
            deps,
            emitted: 0,
        }
    }

    /// Queues an event for persistence and policy dispatch.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the event is malformed; nothing is
    /// queued in that case.
    pub fn emit(&mut self, event: E) -> Result<(), ValidationError> {
        CanonicalEvent::of(&event)?;
        self.events.push_back(event);
        self.emitted += 1;
        Ok(())
    }

    pub fn deps(&self) -> &D {
        self.deps
    }

    pub(crate) fn emitted(&self) -> usize {
        self.emitted
    }
}

/// What a policy can do: submit commands and act through `deps`.
pub struct PolicyContext<'a, C, D> {
    commands: &'a mut VecDeque<C>,
    deps: &'a D,
    submitted: usize,
}

impl<'a, C: Command, D> PolicyContext<'a, C, D> {
    pub(crate) fn new(commands: &'a mut VecDeque<C>, deps: &'a D) -> Self {
        Self {
            commands,
            deps,
            submitted: 0,
        }
    }

    /// Queues a command for the next command phase.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the command is malformed; nothing is
    /// queued in that case.
    pub fn submit(&mut self, command: C) -> Result<(), ValidationError> {
        check_command(&command)?;
        self.commands.push_back(command);
        self.submitted += 1;
        Ok(())
    }

    pub fn deps(&self) -> &D {
        self.deps
    }

    pub(crate) fn submitted(&self) -> usize {
        self.submitted
    }
}

pub(crate) fn check_command<C: Command>(command: &C) -> Result<(), ValidationError> {
    validate_type_name(command.command_type())?;
    command.validate()
}

// ── Closure adapters ─────────────────────────────────────────────────

/// A procedure built from a closure.
pub struct FnProcedure<C, E, D, F> {
    name: String,
    input_type: &'static str,
    outputs: Vec<&'static str>,
    f: F,
    _types: PhantomData<fn(&C, &E, &D)>,
}

/// Wraps a closure as a [`Procedure`].
pub fn procedure_fn<C, E, D, F>(
    name: impl Into<String>,
    input_type: &'static str,
    f: F,
) -> FnProcedure<C, E, D, F>
where
    F: FnMut(&mut ProcedureContext<'_, E, D>, &C) -> anyhow::Result<()>,
{
    FnProcedure {
        name: name.into(),
        input_type,
        outputs: Vec::new(),
        f,
        _types: PhantomData,
    }
}

impl<C, E, D, F> FnProcedure<C, E, D, F> {
    /// Declares the event types the closure may emit.
    pub fn with_outputs(mut self, outputs: &[&'static str]) -> Self {
        self.outputs = outputs.to_vec();
        self
    }
}

impl<C, E, D, F> Procedure<C, E, D> for FnProcedure<C, E, D, F>
where
    F: FnMut(&mut ProcedureContext<'_, E, D>, &C) -> anyhow::Result<()>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn input_type(&self) -> &'static str {
        self.input_type
    }

    fn output_types(&self) -> Vec<&'static str> {
        self.outputs.clone()
    }

    fn run(&mut self, ctx: &mut ProcedureContext<'_, E, D>, command: &C) -> anyhow::Result<()> {
        (self.f)(ctx, command)
    }
}

/// A policy built from a closure.
pub struct FnPolicy<C, E, D, F> {
    name: String,
    input_type: &'static str,
    outputs: Vec<&'static str>,
    f: F,
    _types: PhantomData<fn(&C, &E, &D)>,
}

/// Wraps a closure as a [`Policy`].
pub fn policy_fn<C, E, D, F>(
    name: impl Into<String>,
    input_type: &'static str,
    f: F,
) -> FnPolicy<C, E, D, F>
where
    F: FnMut(&mut PolicyContext<'_, C, D>, &E) -> anyhow::Result<()>,
{
    FnPolicy {
        name: name.into(),
        input_type,
        outputs: Vec::new(),
        f,
        _types: PhantomData,
    }
}

impl<C, E, D, F> FnPolicy<C, E, D, F> {
    /// Declares the command types the closure may submit.
    pub fn with_outputs(mut self, outputs: &[&'static str]) -> Self {
        self.outputs = outputs.to_vec();
        self
    }
}

impl<C, E, D, F> Policy<C, E, D> for FnPolicy<C, E, D, F>
where
    F: FnMut(&mut PolicyContext<'_, C, D>, &E) -> anyhow::Result<()>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn input_type(&self) -> &'static str {
        self.input_type
    }

    fn output_types(&self) -> Vec<&'static str> {
        self.outputs.clone()
    }

    fn run(&mut self, ctx: &mut PolicyContext<'_, C, D>, event: &E) -> anyhow::Result<()> {
        (self.f)(ctx, event)
    }
}
