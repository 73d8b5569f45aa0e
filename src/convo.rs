use crate::action::{Action, CallId, SafetyCheck};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
    OutputText { text: String },
}

impl ContentPart {
    pub fn text(&self) -> &str {
        match self {
            ContentPart::InputText { text } | ContentPart::OutputText { text } => text,
        }
    }
}

/// Payload of a computer call result: a fresh observation, or the error that
/// stood in for one when the backend could not perform the action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallOutput {
    InputImage {
        /// data-URL encoded PNG.
        image_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_url: Option<String>,
    },
    Error {
        message: String,
    },
}

impl CallOutput {
    pub fn screenshot(png_b64: &str, current_url: Option<String>) -> Self {
        CallOutput::InputImage {
            image_url: format!("data:image/png;base64,{}", png_b64),
            current_url,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CallOutput::Error { .. })
    }
}

/// One record in the Conversation State. The serde shape is the wire shape:
/// a `type` tag over message / computer_call / computer_call_output /
/// function_call / function_call_output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Item {
    Message {
        role: Role,
        content: Vec<ContentPart>,
    },
    ComputerCall {
        call_id: CallId,
        action: Action,
        #[serde(default)]
        pending_safety_checks: Vec<SafetyCheck>,
    },
    ComputerCallOutput {
        call_id: CallId,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        acknowledged_safety_checks: Vec<SafetyCheck>,
        output: CallOutput,
    },
    FunctionCall {
        call_id: CallId,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: CallId,
        output: String,
    },
}

impl Item {
    pub fn user(text: impl Into<String>) -> Self {
        Item::Message {
            role: Role::User,
            content: vec![ContentPart::InputText { text: text.into() }],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Item::Message {
            role: Role::Assistant,
            content: vec![ContentPart::OutputText { text: text.into() }],
        }
    }

    /// Concatenated message text, if this item is a message.
    pub fn message_text(&self) -> Option<String> {
        match self {
            Item::Message { content, .. } => {
                Some(content.iter().map(ContentPart::text).collect::<Vec<_>>().join(""))
            }
            _ => None,
        }
    }

    /// True for items that request work and therefore keep the turn open.
    pub fn is_call(&self) -> bool {
        matches!(self, Item::ComputerCall { .. } | Item::FunctionCall { .. })
    }
}

/// The ordered Conversation State. Append-only during a turn; owned by the
/// turn orchestrator while it runs. Ordering is the causal order of
/// issuance: a call's result always precedes the next model request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    items: Vec<Item>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opening(task: impl Into<String>) -> Self {
        let mut t = Self::new();
        t.push(Item::user(task));
        t
    }

    pub fn push(&mut self, item: Item) {
        self.items.push(item);
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = Item>) {
        self.items.extend(items);
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn last(&self) -> Option<&Item> {
        self.items.last()
    }

    /// Last assistant message text, scanning from the tail.
    pub fn last_assistant_message(&self) -> Option<String> {
        self.items.iter().rev().find_map(|i| match i {
            Item::Message {
                role: Role::Assistant,
                ..
            } => i.message_text(),
            _ => None,
        })
    }
}
