//! Rate-limited remote code evaluation.
//!
//! [`Evaluator`] checks the rate limiter, forwards the snippet to an
//! [`EvalBackend`] and renders the reply. [`EvalCommand`] exposes it as the
//! `/eval` slash command, with a "Run again" button on each result.

pub mod backend;
pub mod render;

pub use backend::{EvalBackend, EvalResult, HttpBackend};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::{Clock, format_relative};
use crate::component_ids::ComponentIds;
use crate::interaction::{
    CommandSpec, Control, InteractionEvent, InteractionHandler, Reply, ReplySink, Requester, Tone,
};
use crate::rate_limit::{KeyedRateLimiter, RateLimiter};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("evaluation request failed with HTTP {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("could not reach evaluation service: {0}")]
    ConnectionFailed(String),

    #[error("unreadable evaluation reply: {0}")]
    BadReply(String),

    #[error("cannot build evaluation URL: {0}")]
    InvalidUrl(String),
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

/// Admission scope for evaluations.
#[derive(Debug)]
pub enum EvalLimiter {
    /// One window shared by everyone.
    Global(RateLimiter),
    /// One window per user; anonymous requests share a window.
    PerUser(KeyedRateLimiter),
}

impl EvalLimiter {
    /// `Err(next_allowed)` when the requester is over the limit.
    fn admit(
        &self,
        requester: &Requester,
        now: DateTime<Utc>,
    ) -> Result<(), DateTime<Utc>> {
        match self {
            EvalLimiter::Global(limiter) => {
                if limiter.allow(now) {
                    Ok(())
                } else {
                    Err(limiter.next_allowed(now))
                }
            }
            EvalLimiter::PerUser(limiter) => {
                let key = requester.user_id().unwrap_or("");
                if limiter.allow(key, now) {
                    Ok(())
                } else {
                    Err(limiter.next_allowed(key, now))
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalOutcome {
    Rendered(Reply),
    RateLimited(Reply),
}

impl EvalOutcome {
    pub fn into_reply(self) -> Reply {
        match self {
            EvalOutcome::Rendered(reply) | EvalOutcome::RateLimited(reply) => reply,
        }
    }
}

pub struct Evaluator {
    backend: Arc<dyn EvalBackend>,
    limiter: EvalLimiter,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl Evaluator {
    pub fn new(backend: Arc<dyn EvalBackend>, limiter: EvalLimiter, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            limiter,
            clock,
        }
    }

    /// Evaluate `code` and build the reply.
    ///
    /// Known requesters evaluate in their own persistent session; anonymous
    /// ones get a single-use session. Backend failures are returned for the
    /// caller to word; a rate-limit hit is an ordinary reply.
    pub fn evaluate_and_respond(
        &self,
        requester: &Requester,
        code: &str,
        show_code: bool,
        startup_script: bool,
    ) -> Result<EvalOutcome, EvalError> {
        let now = self.clock.now();
        if let Err(next) = self.limiter.admit(requester, now) {
            debug!(?requester, %next, "evaluation rate-limited");
            let reply = Reply {
                author: render::author_line(requester),
                text: format!(
                    "You are currently rate-limited. Please try again {}.",
                    format_relative(next, now)
                ),
                tone: Tone::Error,
                ..Reply::default()
            };
            return Ok(EvalOutcome::RateLimited(reply));
        }

        let result = match requester {
            Requester::Anonymous => self.backend.eval_once(code, startup_script)?,
            Requester::Known(user) => self.backend.eval_session(code, user, startup_script)?,
        };
        let shown = show_code.then_some(code);
        Ok(EvalOutcome::Rendered(render::render(requester, shown, &result)))
    }
}

// ── /eval command ─────────────────────────────────────────────────────────────

pub const RERUN_LABEL: &str = "Run again";
pub const NOT_OWNER_TEXT: &str = "Only the person who ran this snippet can run it again.";
pub const MISSING_CODE_TEXT: &str = "Please provide some code to evaluate.";

/// `/eval code:<snippet>`.
pub struct EvalCommand {
    spec: CommandSpec,
    ids: ComponentIds,
    evaluator: Arc<Evaluator>,
    startup_script: bool,
}

impl EvalCommand {
    pub const NAME: &'static str = "eval";

    /// `ids` must be bound to this command's prefix, `"s-eval"`.
    pub fn new(ids: ComponentIds, evaluator: Arc<Evaluator>, startup_script: bool) -> Self {
        Self {
            spec: CommandSpec::slash(Self::NAME, "Evaluate a code snippet"),
            ids,
            evaluator,
            startup_script,
        }
    }

    pub fn prefix() -> String {
        CommandSpec::slash(Self::NAME, "").prefix()
    }

    fn run(&self, requester: &Requester, code: &str, reply: &dyn ReplySink) {
        let outcome = match self
            .evaluator
            .evaluate_and_respond(requester, code, true, self.startup_script)
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "evaluation failed");
                reply.present(Reply::text(failure_text(&e)).with_tone(Tone::Error));
                return;
            }
        };

        let mut out = match outcome {
            EvalOutcome::RateLimited(limited) => {
                reply.present(limited);
                return;
            }
            EvalOutcome::Rendered(rendered) => rendered,
        };

        if let Requester::Known(user) = requester {
            match self.ids.mint(&[user.as_str(), code]) {
                Ok(token) => out = out.with_control(Control::button(token, RERUN_LABEL)),
                // Still worth showing the result, just without the button.
                Err(e) => warn!(error = %e, "could not mint rerun button"),
            }
        }
        reply.present(out);
    }
}

fn failure_text(err: &EvalError) -> String {
    match err {
        EvalError::ConnectionFailed(_) => {
            "The evaluation service is unreachable right now, please try again later.".to_string()
        }
        EvalError::RequestFailed { status, .. } => {
            format!("The evaluation service refused the request (HTTP {status}).")
        }
        EvalError::BadReply(_) => "The evaluation service sent a reply that could not be read.".to_string(),
        EvalError::InvalidUrl(_) => "This snippet could not be sent to the evaluation service.".to_string(),
    }
}

impl InteractionHandler for EvalCommand {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn on_slash_command(&self, event: &InteractionEvent, reply: &dyn ReplySink) {
        let Some(code) = event.option("code").filter(|c| !c.trim().is_empty()) else {
            reply.present(Reply::ephemeral(MISSING_CODE_TEXT).with_tone(Tone::Error));
            return;
        };
        self.run(&event.requester(), code, reply);
    }

    fn on_button_click(&self, event: &InteractionEvent, args: &[String], reply: &dyn ReplySink) {
        let [owner, code] = args else {
            warn!(args = args.len(), "rerun button with unexpected arguments");
            return;
        };
        if event.user.as_deref() != Some(owner.as_str()) {
            info!(owner = %owner, "rerun refused for non-owner");
            reply.present(Reply::ephemeral(NOT_OWNER_TEXT).with_tone(Tone::Error));
            return;
        }
        self.run(&Requester::Known(owner.clone()), code, reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;
    use std::sync::Mutex;

    use chrono::TimeDelta;

    use crate::clock::ManualClock;
    use crate::component_ids::{ComponentIdGenerator, GeneratorConfig, MemoryStore};
    use crate::eval::backend::{SnippetStatus, SnippetType};

    #[derive(Default)]
    struct FakeBackend {
        calls: Mutex<Vec<(String, Option<String>)>>,
        fail: bool,
    }

    impl FakeBackend {
        fn reply(code: &str) -> EvalResult {
            EvalResult {
                status: SnippetStatus::Valid,
                kind: SnippetType::Addition,
                id: "1".into(),
                source: code.into(),
                result: Some("2".into()),
                exception: None,
                stdout_overflow: false,
                stdout: String::new(),
                errors: vec![],
            }
        }
    }

    impl EvalBackend for FakeBackend {
        fn eval_once(&self, code: &str, _startup_script: bool) -> Result<EvalResult, EvalError> {
            self.calls.lock().unwrap().push((code.into(), None));
            if self.fail {
                return Err(EvalError::ConnectionFailed("refused".into()));
            }
            Ok(Self::reply(code))
        }

        fn eval_session(
            &self,
            code: &str,
            session_id: &str,
            _startup_script: bool,
        ) -> Result<EvalResult, EvalError> {
            self.calls
                .lock()
                .unwrap()
                .push((code.into(), Some(session_id.into())));
            if self.fail {
                return Err(EvalError::RequestFailed {
                    status: 503,
                    body: String::new(),
                });
            }
            Ok(Self::reply(code))
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<Reply>>);

    impl ReplySink for Collect {
        fn present(&self, reply: Reply) {
            self.0.lock().unwrap().push(reply);
        }
    }

    fn cap(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn evaluator(
        backend: Arc<FakeBackend>,
        limiter: EvalLimiter,
    ) -> (Arc<ManualClock>, Evaluator) {
        let clock = Arc::new(ManualClock::at_epoch());
        (clock.clone(), Evaluator::new(backend, limiter, clock))
    }

    fn command(backend: Arc<FakeBackend>) -> (Arc<ComponentIdGenerator>, EvalCommand) {
        let clock = Arc::new(ManualClock::at_epoch());
        let generator = Arc::new(
            ComponentIdGenerator::new(
                Arc::new(MemoryStore::new(TimeDelta::days(1))),
                clock.clone(),
                GeneratorConfig::default(),
            )
            .unwrap(),
        );
        let limiter = EvalLimiter::Global(RateLimiter::new(TimeDelta::seconds(10), cap(10)));
        let evaluator = Arc::new(Evaluator::new(backend, limiter, clock));
        let ids = ComponentIds::new(generator.clone(), EvalCommand::prefix());
        (generator, EvalCommand::new(ids, evaluator, true))
    }

    #[test]
    fn known_user_evaluates_in_session_anonymous_once() {
        let backend = Arc::new(FakeBackend::default());
        let limiter = EvalLimiter::Global(RateLimiter::new(TimeDelta::seconds(5), cap(5)));
        let (_clock, ev) = evaluator(backend.clone(), limiter);

        ev.evaluate_and_respond(&Requester::Known("u1".into()), "1 + 1", true, true)
            .unwrap();
        ev.evaluate_and_respond(&Requester::Anonymous, "2 + 2", false, true)
            .unwrap();

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls[0], ("1 + 1".to_string(), Some("u1".to_string())));
        assert_eq!(calls[1], ("2 + 2".to_string(), None));
    }

    #[test]
    fn rate_limited_request_skips_backend_and_names_next_slot() {
        let backend = Arc::new(FakeBackend::default());
        let limiter = EvalLimiter::Global(RateLimiter::new(TimeDelta::seconds(5), cap(2)));
        let (clock, ev) = evaluator(backend.clone(), limiter);
        let alice = Requester::Known("alice".into());

        assert!(matches!(
            ev.evaluate_and_respond(&alice, "1", false, false).unwrap(),
            EvalOutcome::Rendered(_)
        ));
        clock.advance(TimeDelta::seconds(1));
        ev.evaluate_and_respond(&alice, "2", false, false).unwrap();
        clock.advance(TimeDelta::seconds(1));

        let EvalOutcome::RateLimited(reply) = ev.evaluate_and_respond(&alice, "3", false, false).unwrap()
        else {
            panic!("third request should be rate-limited");
        };
        assert_eq!(
            reply.text,
            "You are currently rate-limited. Please try again in 3 seconds."
        );
        assert_eq!(reply.author.as_deref(), Some("alice's result"));
        assert_eq!(backend.calls.lock().unwrap().len(), 2);

        clock.advance(TimeDelta::seconds(3));
        assert!(matches!(
            ev.evaluate_and_respond(&alice, "4", false, false).unwrap(),
            EvalOutcome::Rendered(_)
        ));
    }

    #[test]
    fn per_user_limiter_isolates_users() {
        let backend = Arc::new(FakeBackend::default());
        let limiter = EvalLimiter::PerUser(KeyedRateLimiter::new(TimeDelta::seconds(5), cap(1)));
        let (_clock, ev) = evaluator(backend, limiter);
        let a = Requester::Known("a".into());
        let b = Requester::Known("b".into());

        ev.evaluate_and_respond(&a, "1", false, false).unwrap();
        assert!(matches!(
            ev.evaluate_and_respond(&a, "1", false, false).unwrap(),
            EvalOutcome::RateLimited(_)
        ));
        assert!(matches!(
            ev.evaluate_and_respond(&b, "1", false, false).unwrap(),
            EvalOutcome::Rendered(_)
        ));
    }

    #[test]
    fn slash_command_attaches_rerun_button_minted_with_owner_and_code() {
        let (generator, cmd) = command(Arc::new(FakeBackend::default()));
        let sink = Collect::default();
        let event = InteractionEvent::slash("eval", Some("u1"), serde_json::json!({"code": "1 + 1"}));

        cmd.on_slash_command(&event, &sink);

        let replies = sink.0.lock().unwrap();
        assert_eq!(replies.len(), 1);
        let control = &replies[0].controls[0];
        assert_eq!(control.label, RERUN_LABEL);
        let id = generator.resolve(&control.id).unwrap();
        assert_eq!(id.handler_prefix, "s-eval");
        assert_eq!(id.args, vec!["u1".to_string(), "1 + 1".to_string()]);
    }

    #[test]
    fn missing_code_gets_ephemeral_hint() {
        let backend = Arc::new(FakeBackend::default());
        let (_g, cmd) = command(backend.clone());
        let sink = Collect::default();
        cmd.on_slash_command(&InteractionEvent::slash("eval", Some("u1"), serde_json::json!({})), &sink);
        let replies = sink.0.lock().unwrap();
        assert_eq!(replies[0].text, MISSING_CODE_TEXT);
        assert!(replies[0].ephemeral);
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn rerun_by_owner_evaluates_again_and_others_are_refused() {
        let backend = Arc::new(FakeBackend::default());
        let (_g, cmd) = command(backend.clone());
        let args = vec!["u1".to_string(), "1 + 1".to_string()];

        let sink = Collect::default();
        cmd.on_button_click(&InteractionEvent::button("t", Some("u2")), &args, &sink);
        assert_eq!(sink.0.lock().unwrap()[0].text, NOT_OWNER_TEXT);
        assert!(backend.calls.lock().unwrap().is_empty());

        let sink = Collect::default();
        cmd.on_button_click(&InteractionEvent::button("t", Some("u1")), &args, &sink);
        assert_eq!(backend.calls.lock().unwrap().len(), 1);
        assert_eq!(sink.0.lock().unwrap()[0].controls.len(), 1);
    }

    #[test]
    fn backend_failure_is_worded_for_the_user() {
        let backend = Arc::new(FakeBackend {
            fail: true,
            ..FakeBackend::default()
        });
        let (_g, cmd) = command(backend);
        let sink = Collect::default();
        let event = InteractionEvent::slash("eval", Some("u1"), serde_json::json!({"code": "1"}));
        cmd.on_slash_command(&event, &sink);
        let replies = sink.0.lock().unwrap();
        assert_eq!(replies[0].tone, Tone::Error);
        assert!(replies[0].text.contains("HTTP 503"));
        assert!(replies[0].controls.is_empty());
    }
}
