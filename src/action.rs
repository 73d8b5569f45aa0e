use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier correlating a model-issued call with its result. Assigned by
/// the model service; opaque to this crate.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub String);

impl CallId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        CallId(s.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Wheel,
    Back,
    Forward,
}

impl Default for MouseButton {
    fn default() -> Self {
        MouseButton::Left
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

fn default_wait_ms() -> u64 {
    1000
}

/// One structured instruction issued by the model for execution against an
/// execution surface. Immutable once issued; consumed exactly once.
///
/// The serde shape matches the wire action objects: a `type` tag plus the
/// variant's parameters (`{"type":"click","x":24,"y":150,"button":"left"}`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Click {
        x: i64,
        y: i64,
        #[serde(default)]
        button: MouseButton,
    },
    DoubleClick {
        x: i64,
        y: i64,
    },
    Scroll {
        x: i64,
        y: i64,
        #[serde(default)]
        scroll_x: i64,
        #[serde(default)]
        scroll_y: i64,
    },
    Type {
        text: String,
    },
    Keypress {
        keys: Vec<String>,
    },
    Move {
        x: i64,
        y: i64,
    },
    Drag {
        path: Vec<Point>,
    },
    Wait {
        #[serde(default = "default_wait_ms")]
        ms: u64,
    },
    Screenshot,
    /// Navigation helper: load a URL. Browser surfaces only.
    Goto {
        url: String,
    },
    /// Navigation helper: one step back in history. Browser surfaces only.
    Back,
}

impl Action {
    /// Stable name of the variant, used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Click { .. } => "click",
            Action::DoubleClick { .. } => "double_click",
            Action::Scroll { .. } => "scroll",
            Action::Type { .. } => "type",
            Action::Keypress { .. } => "keypress",
            Action::Move { .. } => "move",
            Action::Drag { .. } => "drag",
            Action::Wait { .. } => "wait",
            Action::Screenshot => "screenshot",
            Action::Goto { .. } => "goto",
            Action::Back => "back",
        }
    }
}

/// A safety check the model attached to a pending call. Carried verbatim
/// from the wire; acknowledged checks are echoed back with the call output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SafetyCheck {
    pub id: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl SafetyCheck {
    pub fn new(id: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_wire_click() {
        let a: Action =
            serde_json::from_value(json!({"type": "click", "x": 24, "y": 150})).unwrap();
        assert_eq!(
            a,
            Action::Click {
                x: 24,
                y: 150,
                button: MouseButton::Left
            }
        );
    }

    #[test]
    fn decodes_wire_scroll_and_drag() {
        let a: Action = serde_json::from_value(
            json!({"type": "scroll", "x": 100, "y": 200, "scroll_x": 0, "scroll_y": -120}),
        )
        .unwrap();
        assert_eq!(
            a,
            Action::Scroll {
                x: 100,
                y: 200,
                scroll_x: 0,
                scroll_y: -120
            }
        );

        let a: Action = serde_json::from_value(
            json!({"type": "drag", "path": [{"x": 1, "y": 2}, {"x": 3, "y": 4}]}),
        )
        .unwrap();
        assert_eq!(
            a,
            Action::Drag {
                path: vec![Point { x: 1, y: 2 }, Point { x: 3, y: 4 }]
            }
        );
    }

    #[test]
    fn wait_defaults_to_one_second() {
        let a: Action = serde_json::from_value(json!({"type": "wait"})).unwrap();
        assert_eq!(a, Action::Wait { ms: 1000 });
    }

    #[test]
    fn keypress_carries_key_list() {
        let a: Action =
            serde_json::from_value(json!({"type": "keypress", "keys": ["CTRL", "C"]})).unwrap();
        assert_eq!(
            a,
            Action::Keypress {
                keys: vec!["CTRL".into(), "C".into()]
            }
        );
    }

    #[test]
    fn round_trips_tagged_encoding() {
        let a = Action::Goto {
            url: "https://example.com".into(),
        };
        let v = serde_json::to_value(&a).unwrap();
        assert_eq!(v["type"], "goto");
        assert_eq!(serde_json::from_value::<Action>(v).unwrap(), a);
    }
}
