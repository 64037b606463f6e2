//! The `Expert` and `ExpertRegistry` traits -- the worker seam of the core.
//!
//! The engine never talks to a concrete worker; it talks to an
//! [`ExpertRegistry`]. The registry hides where workers live (in-process,
//! subprocess, remote) behind `execute`, which streams events through a
//! callback until the call returns.

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::event::EventFn;

use super::ExpertInfo;

/// A single expert worker.
///
/// Implementors produce streaming events through `on_event` (event type plus
/// string payload) and signal completion by returning. The final answer text
/// is carried in `content`/`answer`-typed events, not the return value.
///
/// # Object Safety
///
/// The trait is object-safe so workers can be stored as `Box<dyn Expert>`
/// in [`super::StaticExpertRegistry`].
#[async_trait]
pub trait Expert: Send + Sync {
    /// Descriptor for this expert (name, capabilities, triggers).
    fn info(&self) -> ExpertInfo;

    /// Execute one task input.
    ///
    /// `on_event` may be invoked many times before the call returns; events
    /// are forwarded to the caller's callback in emission order. `cancel`
    /// is the cooperative cancellation signal; implementors should abort
    /// promptly when it fires and return an error carrying
    /// [`crate::error::Cancelled`].
    async fn execute(
        &self,
        cancel: CancellationToken,
        input: &str,
        on_event: EventFn,
    ) -> Result<()>;
}

/// The registry interface the orchestration core consumes.
///
/// [`super::StaticExpertRegistry`] is the in-process implementation; hosts
/// with out-of-process workers implement this trait themselves.
#[async_trait]
pub trait ExpertRegistry: Send + Sync {
    /// Names of all registered experts.
    fn list(&self) -> Vec<String>;

    /// Human-readable description for one expert, if registered.
    fn describe(&self, name: &str) -> Option<String>;

    /// Full descriptor for one expert, if registered.
    fn get_config(&self, name: &str) -> Option<ExpertInfo>;

    /// Execute `input` against the named expert, streaming events through
    /// `on_event`.
    ///
    /// Returns an error if the expert is unknown or the execution fails.
    async fn execute(
        &self,
        cancel: CancellationToken,
        name: &str,
        input: &str,
        on_event: EventFn,
    ) -> Result<()>;
}

// Compile-time assertion: both traits must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Expert, _: &dyn ExpertRegistry) {}
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// A trivial expert that does nothing, used only to prove the trait can
    /// be implemented and used as `dyn Expert`.
    struct NoopExpert;

    #[async_trait]
    impl Expert for NoopExpert {
        fn info(&self) -> ExpertInfo {
            ExpertInfo::named("noop")
        }

        async fn execute(
            &self,
            _cancel: CancellationToken,
            _input: &str,
            _on_event: EventFn,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn expert_is_object_safe() {
        let expert: Box<dyn Expert> = Box::new(NoopExpert);
        assert_eq!(expert.info().name, "noop");
    }

    #[tokio::test]
    async fn noop_expert_executes() {
        let expert = NoopExpert;
        let on_event: EventFn = Arc::new(|_, _| {});
        expert
            .execute(CancellationToken::new(), "hello", on_event)
            .await
            .unwrap();
    }
}
