//! Read and write callbacks handed to procedures and policies.
//!
//! Applications collect these in their own dependency struct and pass it to
//! [`crate::Reactor::new`]; every context exposes it via `deps()`.

/// A read: typed input to typed output.
pub struct Query<I, O> {
    f: Box<dyn Fn(I) -> O>,
}

impl<I, O> Query<I, O> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(I) -> O + 'static,
    {
        Self { f: Box::new(f) }
    }

    pub fn run(&self, input: I) -> O {
        (self.f)(input)
    }
}

/// Result of a [`Mutation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl MutationOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }

    /// Converts a failed outcome into an error so a policy can use `?`.
    ///
    /// # Errors
    ///
    /// Returns the outcome's message when `success` is false.
    pub fn into_result(self) -> anyhow::Result<()> {
        if self.success {
            return Ok(());
        }
        Err(anyhow::anyhow!(self
            .error
            .unwrap_or_else(|| "mutation failed".to_string())))
    }
}

/// A side effect: typed input to a success flag and optional message.
pub struct Mutation<I> {
    f: Box<dyn Fn(I) -> MutationOutcome>,
}

impl<I> Mutation<I> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(I) -> MutationOutcome + 'static,
    {
        Self { f: Box::new(f) }
    }

    pub fn apply(&self, input: I) -> MutationOutcome {
        (self.f)(input)
    }
}
