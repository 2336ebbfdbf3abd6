//! The two-phase command/event loop.

use std::collections::{HashMap, VecDeque};

use cairn_engine::{contain, Crash, Topology};
use cairn_store::EventStore;
use cairn_types::{validate_type_name, CanonicalEvent, Command, Event, ValidationError};

use crate::error::ReactorError;
use crate::handler::{check_command, Policy, PolicyContext, Procedure, ProcedureContext};

/// A contained procedure or policy failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerCrash {
    pub handler: String,
    /// The command or event type being handled.
    pub input_type: &'static str,
    pub crash: Crash,
}

/// Totals for one [`Reactor::run`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactorReport {
    /// Commands taken off the command queue.
    pub commands: usize,
    /// Commands with no registered procedure.
    pub unhandled_commands: usize,
    /// Events appended to the store.
    pub events: usize,
    /// Appended events whose blob already existed.
    pub duplicates: usize,
    pub procedure_runs: usize,
    pub policy_runs: usize,
    pub crashes: Vec<HandlerCrash>,
}

/// Single-threaded command/event reactor over an [`EventStore`].
///
/// ```text
/// while commands or events are pending:
///     drain commands -> procedures -> events
///     drain events   -> store.append -> policies (first observation only) -> commands
/// ```
///
/// `D` is the application's dependency value (usually a struct of
/// [`crate::Query`] and [`crate::Mutation`] callbacks), shared read-only with
/// every procedure and policy.
pub struct Reactor<C, E, D> {
    commands: VecDeque<C>,
    events: VecDeque<E>,
    procedures: HashMap<&'static str, Vec<Box<dyn Procedure<C, E, D>>>>,
    policies: HashMap<&'static str, Vec<Box<dyn Policy<C, E, D>>>>,
    store: EventStore,
    deps: D,
}

impl<C: Command, E: Event, D> Reactor<C, E, D> {
    pub fn new(store: EventStore, deps: D) -> Self {
        Self {
            commands: VecDeque::new(),
            events: VecDeque::new(),
            procedures: HashMap::new(),
            policies: HashMap::new(),
            store,
            deps,
        }
    }

    /// Registers a procedure for its command type. Procedures for the same
    /// type run in registration order.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the input type name is invalid.
    pub fn register_procedure<P>(&mut self, procedure: P) -> Result<(), ValidationError>
    where
        P: Procedure<C, E, D> + 'static,
    {
        let input_type = procedure.input_type();
        validate_type_name(input_type)?;
        tracing::debug!(procedure = procedure.name(), command_type = input_type, "registering procedure");
        self.procedures
            .entry(input_type)
            .or_default()
            .push(Box::new(procedure));
        Ok(())
    }

    /// Registers a policy for its event type. Policies for the same type run
    /// in registration order.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the input type name is invalid.
    pub fn register_policy<P>(&mut self, policy: P) -> Result<(), ValidationError>
    where
        P: Policy<C, E, D> + 'static,
    {
        let input_type = policy.input_type();
        validate_type_name(input_type)?;
        tracing::debug!(policy = policy.name(), event_type = input_type, "registering policy");
        self.policies
            .entry(input_type)
            .or_default()
            .push(Box::new(policy));
        Ok(())
    }

    /// Queues an external command.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the command is malformed.
    pub fn submit(&mut self, command: C) -> Result<(), ValidationError> {
        check_command(&command)?;
        self.commands.push_back(command);
        Ok(())
    }

    /// Queues an external event. It is persisted and dispatched like any
    /// event a procedure emits.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the event is malformed.
    pub fn emit(&mut self, event: E) -> Result<(), ValidationError> {
        CanonicalEvent::of(&event)?;
        self.events.push_back(event);
        Ok(())
    }

    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn deps(&self) -> &D {
        &self.deps
    }

    /// Releases the store (and its writer lock) and the dependencies.
    pub fn into_parts(self) -> (EventStore, D) {
        (self.store, self.deps)
    }

    /// The command -> procedure -> event -> policy -> command graph.
    pub fn topology(&self) -> Topology {
        let mut topology = Topology::new();
        let mut commands: Vec<&&'static str> = self.procedures.keys().collect();
        commands.sort();
        for command_type in commands {
            for procedure in &self.procedures[*command_type] {
                topology.add_handler(procedure.name(), *command_type, procedure.output_types());
            }
        }
        let mut events: Vec<&&'static str> = self.policies.keys().collect();
        events.sort();
        for event_type in events {
            for policy in &self.policies[*event_type] {
                topology.add_handler(policy.name(), *event_type, policy.output_types());
            }
        }
        topology
    }

    /// Runs until both queues are empty.
    ///
    /// # Errors
    ///
    /// Returns `ReactorError::Store` if an event cannot be persisted. That
    /// event stays at the head of the event queue, so calling `run` again
    /// retries it.
    pub fn run(&mut self) -> Result<ReactorReport, ReactorError> {
        let mut report = ReactorReport::default();
        while !self.commands.is_empty() || !self.events.is_empty() {
            self.drain_commands(&mut report);
            self.drain_events(&mut report)?;
        }
        tracing::info!(
            commands = report.commands,
            events = report.events,
            duplicates = report.duplicates,
            crashes = report.crashes.len(),
            "reactor drained"
        );
        Ok(report)
    }

    fn drain_commands(&mut self, report: &mut ReactorReport) {
        while let Some(command) = self.commands.pop_front() {
            report.commands += 1;
            let command_type = command.command_type();

            let Some(procedures) = self.procedures.get_mut(command_type) else {
                tracing::warn!(command_type, "no procedure registered; dropping command");
                report.unhandled_commands += 1;
                continue;
            };

            for procedure in procedures.iter_mut() {
                let mut ctx = ProcedureContext::new(&mut self.events, &self.deps);
                let outcome = contain(|| procedure.run(&mut ctx, &command));
                report.procedure_runs += 1;
                tracing::debug!(
                    procedure = procedure.name(),
                    command_type,
                    emitted = ctx.emitted(),
                    "procedure ran"
                );
                if let Err(crash) = outcome {
                    tracing::warn!(
                        procedure = procedure.name(),
                        command_type,
                        error = %crash.message,
                        "procedure crashed"
                    );
                    report.crashes.push(HandlerCrash {
                        handler: procedure.name().to_string(),
                        input_type: command_type,
                        crash,
                    });
                }
            }
        }
    }

    fn drain_events(&mut self, report: &mut ReactorReport) -> Result<(), ReactorError> {
        while let Some(event) = self.events.pop_front() {
            let record = match self.store.append(&event) {
                Ok(record) => record,
                Err(e) => {
                    self.events.push_front(event);
                    return Err(e.into());
                }
            };
            report.events += 1;

            if record.is_duplicate {
                report.duplicates += 1;
                tracing::debug!(
                    event_type = %record.event_type,
                    event_hash = %record.event_hash,
                    "duplicate event chained; policies skipped"
                );
                continue;
            }

            let event_type = event.event_type();
            let Some(policies) = self.policies.get_mut(event_type) else {
                continue;
            };

            for policy in policies.iter_mut() {
                let mut ctx = PolicyContext::new(&mut self.commands, &self.deps);
                let outcome = contain(|| policy.run(&mut ctx, &event));
                report.policy_runs += 1;
                tracing::debug!(
                    policy = policy.name(),
                    event_type,
                    submitted = ctx.submitted(),
                    "policy ran"
                );
                if let Err(crash) = outcome {
                    tracing::warn!(
                        policy = policy.name(),
                        event_type,
                        error = %crash.message,
                        "policy crashed"
                    );
                    report.crashes.push(HandlerCrash {
                        handler: policy.name().to_string(),
                        input_type: event_type,
                        crash,
                    });
                }
            }
        }
        Ok(())
    }
}
