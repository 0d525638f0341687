//! Interaction events, replies and their routing.
//!
//! Channels turn platform input into [`InteractionEvent`]s; the
//! [`Dispatcher`](dispatcher::Dispatcher) routes each one to the handler that
//! owns it and the handler answers through a [`ReplySink`].

pub mod dispatcher;
pub mod handler;
pub mod registry;

pub use dispatcher::{DispatchCounts, DispatchOutcome, Dispatcher, Envelope, RunOptions};
pub use handler::{CommandSpec, InteractionHandler, InteractorKind, Visibility};
pub use registry::{HandlerRegistry, RegistryError};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Slash,
    Button,
    Menu,
}

/// Who triggered an interaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Requester {
    Anonymous,
    Known(String),
}

impl Requester {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Requester::Anonymous => None,
            Requester::Known(id) => Some(id),
        }
    }
}

/// One inbound interaction as delivered by a channel.
///
/// `component_id` is set for button and menu events; `command` for slash
/// commands. `payload` carries the remaining platform data: slash command
/// options, or `{"values": [...]}` for menu selections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl InteractionEvent {
    pub fn slash(command: impl Into<String>, user: Option<&str>, options: Value) -> Self {
        Self {
            kind: EventKind::Slash,
            component_id: None,
            command: Some(command.into()),
            user: user.map(str::to_string),
            payload: options,
        }
    }

    pub fn button(component_id: impl Into<String>, user: Option<&str>) -> Self {
        Self {
            kind: EventKind::Button,
            component_id: Some(component_id.into()),
            command: None,
            user: user.map(str::to_string),
            payload: Value::Null,
        }
    }

    pub fn menu(component_id: impl Into<String>, user: Option<&str>, values: &[&str]) -> Self {
        Self {
            kind: EventKind::Menu,
            component_id: Some(component_id.into()),
            command: None,
            user: user.map(str::to_string),
            payload: serde_json::json!({ "values": values }),
        }
    }

    pub fn requester(&self) -> Requester {
        match &self.user {
            Some(id) => Requester::Known(id.clone()),
            None => Requester::Anonymous,
        }
    }

    /// String-valued slash command option.
    pub fn option(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }

    /// Values picked in a selection menu.
    pub fn selected_values(&self) -> Vec<String> {
        self.payload
            .get("values")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Neutral,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    Button,
    Menu,
}

/// An interactive control attached to a reply. `id` is a minted wire token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub kind: ControlKind,
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Control {
    pub fn button(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind: ControlKind::Button,
            id: id.into(),
            label: label.into(),
            options: Vec::new(),
        }
    }

    pub fn menu(id: impl Into<String>, label: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            kind: ControlKind::Menu,
            id: id.into(),
            label: label.into(),
            options,
        }
    }
}

/// Outbound message. Rendering into the platform's embed format is the
/// channel's job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub text: String,
    #[serde(default)]
    pub tone: Tone,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub controls: Vec<Control>,
    /// Visible only to the user who triggered the interaction.
    #[serde(default)]
    pub ephemeral: bool,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn ephemeral(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ephemeral: true,
            ..Self::default()
        }
    }

    pub fn with_tone(mut self, tone: Tone) -> Self {
        self.tone = tone;
        self
    }

    pub fn with_control(mut self, control: Control) -> Self {
        self.controls.push(control);
        self
    }
}

/// Where a handler's replies go. Implemented by each channel.
pub trait ReplySink: Send + Sync {
    fn present(&self, reply: Reply);
}
