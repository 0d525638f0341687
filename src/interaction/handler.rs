//! The handler capability set.

use super::{EventKind, InteractionEvent, ReplySink};

/// How a command is invoked on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractorKind {
    Slash,
    UserContext,
    MessageContext,
}

impl InteractorKind {
    pub fn tag(self) -> &'static str {
        match self {
            InteractorKind::Slash => "s",
            InteractorKind::UserContext => "u",
            InteractorKind::MessageContext => "m",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Visibility {
    #[default]
    Guild,
    Global,
}

/// Describes a handler's command. The routing prefix is derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: String,
    pub kind: InteractorKind,
    pub visibility: Visibility,
    pub description: String,
}

impl CommandSpec {
    pub fn slash(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: InteractorKind::Slash,
            visibility: Visibility::Guild,
            description: description.into(),
        }
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Registry key: `"<kind-tag>-<name>"`, e.g. `"s-eval"`.
    pub fn prefix(&self) -> String {
        prefix_for(self.kind, &self.name)
    }
}

pub fn prefix_for(kind: InteractorKind, name: &str) -> String {
    format!("{}-{}", kind.tag(), name)
}

/// A routable handler.
///
/// Every hook defaults to a no-op, so a handler implements only the
/// interactions it cares about. Hooks run on the blocking pool and may do
/// blocking I/O.
pub trait InteractionHandler: Send + Sync {
    fn spec(&self) -> &CommandSpec;

    fn on_slash_command(&self, event: &InteractionEvent, reply: &dyn ReplySink) {
        let _ = (event, reply);
    }

    /// `args` are the arguments the control was minted with.
    fn on_button_click(&self, event: &InteractionEvent, args: &[String], reply: &dyn ReplySink) {
        let _ = (event, args, reply);
    }

    fn on_selection_menu(&self, event: &InteractionEvent, args: &[String], reply: &dyn ReplySink) {
        let _ = (event, args, reply);
    }
}

/// Which hook an event kind lands on, for logging.
pub(crate) fn hook_name(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Slash => "on_slash_command",
        EventKind::Button => "on_button_click",
        EventKind::Menu => "on_selection_menu",
    }
}
