//! The listener contract and the failure boundary around it.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};

use cairn_types::Event;
use serde::{Deserialize, Serialize};

use crate::queue::EventQueue;

/// A capability subscribed to exactly one event type.
///
/// `run` consumes one event and may emit any number of new events into
/// `out`, an output queue private to this invocation. Errors and panics are
/// contained by the engine and recorded as crashes.
pub trait Listener<E: Event> {
    /// Activity type recorded in the lineage graph.
    fn name(&self) -> &str;

    /// The event type this listener consumes.
    fn input_type(&self) -> &'static str;

    /// Event types `run` may emit. Only used for static topology checks.
    fn output_types(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Handles one event.
    ///
    /// # Errors
    ///
    /// Any error is caught by the engine, recorded as a crash of this
    /// activity, and does not stop other listeners.
    fn run(&mut self, out: &mut EventQueue<E>, event: &E) -> anyhow::Result<()>;
}

/// A listener built from a closure.
pub struct FnListener<E, F> {
    name: String,
    input_type: &'static str,
    outputs: Vec<&'static str>,
    f: F,
    _event: PhantomData<fn(&E)>,
}

/// Wraps a closure as a [`Listener`].
pub fn from_fn<E, F>(name: impl Into<String>, input_type: &'static str, f: F) -> FnListener<E, F>
where
    E: Event,
    F: FnMut(&mut EventQueue<E>, &E) -> anyhow::Result<()>,
{
    FnListener {
        name: name.into(),
        input_type,
        outputs: Vec::new(),
        f,
        _event: PhantomData,
    }
}

impl<E, F> FnListener<E, F> {
    /// Declares the event types the closure may emit.
    pub fn with_outputs(mut self, outputs: &[&'static str]) -> Self {
        self.outputs = outputs.to_vec();
        self
    }
}

impl<E, F> Listener<E> for FnListener<E, F>
where
    E: Event,
    F: FnMut(&mut EventQueue<E>, &E) -> anyhow::Result<()>,
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

    fn run(&mut self, out: &mut EventQueue<E>, event: &E) -> anyhow::Result<()> {
        (self.f)(out, event)
    }
}

/// One entry of a crash record.
///
/// The cause chain comes first, outermost at depth 0, followed by the stack
/// frames of the error's backtrace when one was captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub depth: usize,
    pub description: String,
}

/// A structured record of a failed activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crash {
    pub message: String,
    pub frames: Vec<Frame>,
}

impl Crash {
    pub fn from_error(err: &anyhow::Error) -> Self {
        let mut frames: Vec<Frame> = err
            .chain()
            .enumerate()
            .map(|(depth, cause)| Frame {
                depth,
                description: cause.to_string(),
            })
            .collect();
        frames.extend(backtrace_frames(err.backtrace(), frames.len()));
        Self {
            message: err.to_string(),
            frames,
        }
    }

    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "listener panicked".to_string()
        };
        Self {
            frames: vec![Frame {
                depth: 0,
                description: format!("panic: {message}"),
            }],
            message,
        }
    }
}

/// Stack frames of a captured backtrace, numbered from `first_depth`.
///
/// Each frame is its symbol, followed by ` at <file:line>` when the location
/// is known. Returns nothing for disabled or unsupported backtraces.
fn backtrace_frames(backtrace: &Backtrace, first_depth: usize) -> Vec<Frame> {
    if backtrace.status() != BacktraceStatus::Captured {
        return Vec::new();
    }

    let rendered = backtrace.to_string();
    let mut descriptions: Vec<String> = Vec::new();
    for line in rendered.lines().map(str::trim) {
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(symbol) = descriptions.last_mut() {
                symbol.push_str(" at ");
                symbol.push_str(location);
            }
        } else if let Some((index, symbol)) = line.split_once(": ") {
            if index.chars().all(|c| c.is_ascii_digit()) {
                descriptions.push(symbol.to_string());
            }
        }
    }

    descriptions
        .into_iter()
        .enumerate()
        .map(|(offset, description)| Frame {
            depth: first_depth + offset,
            description,
        })
        .collect()
}

/// Runs `f`, converting both `Err` and panics into a [`Crash`].
pub fn contain<F>(f: F) -> Result<(), Crash>
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(Crash::from_error(&err)),
        Err(payload) => Err(Crash::from_panic(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn error_chain_becomes_frames() {
        let crash = contain(|| {
            Err(anyhow::anyhow!("disk unplugged")).context("hashing /data/a.bin")
        })
        .expect_err("closure fails");

        assert_eq!(crash.message, "hashing /data/a.bin");
        assert_eq!(
            crash.frames[..2],
            [
                Frame {
                    depth: 0,
                    description: "hashing /data/a.bin".to_string()
                },
                Frame {
                    depth: 1,
                    description: "disk unplugged".to_string()
                },
            ]
        );
    }

    #[test]
    fn captured_backtrace_frames_follow_the_cause_chain() {
        let frames = backtrace_frames(&Backtrace::force_capture(), 2);
        assert!(!frames.is_empty(), "a forced capture has frames");
        for (offset, frame) in frames.iter().enumerate() {
            assert_eq!(frame.depth, 2 + offset);
            assert!(!frame.description.is_empty());
            assert!(!frame.description.starts_with("at "));
        }
    }

    #[test]
    fn disabled_backtraces_add_no_frames() {
        assert!(backtrace_frames(&Backtrace::disabled(), 0).is_empty());
    }

    #[test]
    fn error_frames_include_backtrace_when_captured() {
        let err = anyhow::anyhow!("disk unplugged").context("hashing /data/a.bin");
        let crash = Crash::from_error(&err);
        assert_eq!(crash.frames[0].description, "hashing /data/a.bin");
        assert_eq!(crash.frames[1].description, "disk unplugged");
        let captured = err.backtrace().status() == BacktraceStatus::Captured;
        assert_eq!(crash.frames.len() > 2, captured);
    }

    #[test]
    fn panics_are_contained() {
        let crash = contain(|| panic!("index out of range")).expect_err("closure panics");
        assert_eq!(crash.message, "index out of range");
        assert_eq!(crash.frames.len(), 1);

        let formatted = contain(|| panic!("bad value {}", 42)).expect_err("closure panics");
        assert_eq!(formatted.message, "bad value 42");
    }

    #[test]
    fn success_passes_through() {
        assert_eq!(contain(|| Ok(())), Ok(()));
    }

    #[test]
    fn crash_serializes_as_structured_json() {
        let crash = Crash {
            message: "boom".to_string(),
            frames: vec![Frame {
                depth: 0,
                description: "boom".to_string(),
            }],
        };
        let json = serde_json::to_value(&crash).expect("serialize crash");
        assert_eq!(json["frames"][0]["description"], "boom");
    }
}
