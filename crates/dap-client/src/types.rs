//! Data model handed to front ends.
//! - Thread/StackFrame/Scope/Variable/EvaluateResponse/CompletionItem
//! - Generation + VariableRef: generation-scoped handles
//! - from_json: normalization of raw protocol objects

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ProtocolError;
use crate::protocol;

/// Sentinel file name for frames without a source path.
pub const UNKNOWN_FILE: &str = "??";

/// Client-side epoch; one per stop. `Generation::NONE` is never live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(pub(crate) u64);

impl Generation {
    pub const NONE: Generation = Generation(0);

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A `variablesReference` together with the generation that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariableRef {
    pub reference: i64,
    pub generation: Generation,
}

impl VariableRef {
    #[must_use]
    pub fn new(reference: i64, generation: Generation) -> Self {
        Self {
            reference,
            generation,
        }
    }

    /// `None` when the adapter reported no children.
    #[must_use]
    pub fn expandable(reference: i64, generation: Generation) -> Option<Self> {
        (reference > 0).then_some(Self::new(reference, generation))
    }
}

fn parse<'de, T: Deserialize<'de>>(what: &'static str, json: &'de Value) -> Result<T, ProtocolError> {
    T::deserialize(json).map_err(|err| ProtocolError::invalid_body(what, &err))
}

/// A debuggee thread plus session-owned selection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    pub id: i64,
    pub name: String,
    pub stopped: bool,
    pub selected: bool,
    pub expanded: bool,
}

impl Thread {
    #[must_use]
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            stopped: false,
            selected: false,
            expanded: false,
        }
    }

    pub fn from_json(json: &Value) -> Result<Self, ProtocolError> {
        let raw: protocol::Thread = parse("thread", json)?;
        Ok(Self::new(raw.id, raw.name))
    }
}

/// How a front end should render a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StackFramePresentation {
    #[default]
    Normal,
    Label,
    Subtle,
}

impl StackFramePresentation {
    /// Unknown or missing hints render as `Normal`.
    #[must_use]
    pub fn from_hint(hint: Option<&str>) -> Self {
        match hint {
            Some("label") => Self::Label,
            Some("subtle") => Self::Subtle,
            _ => Self::Normal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub id: i64,
    pub file: String,
    pub name: String,
    pub line: i64,
    /// The frame has no resolvable source path.
    pub internal: bool,
    pub presentation: StackFramePresentation,
}

impl StackFrame {
    pub fn from_json(json: &Value) -> Result<Self, ProtocolError> {
        let raw: protocol::StackFrame = parse("stack frame", json)?;
        let path = raw
            .source
            .as_ref()
            .and_then(|source| source.path.as_deref())
            .filter(|path| !path.is_empty());
        let (file, internal) = match path {
            Some(path) => (path.to_string(), false),
            None => (UNKNOWN_FILE.to_string(), true),
        };
        Ok(Self {
            id: raw.id,
            file,
            name: raw.name,
            line: raw.line.unwrap_or(0),
            internal,
            presentation: StackFramePresentation::from_hint(raw.presentation_hint.as_deref()),
        })
    }
}

/// A named variable container of one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub name: String,
    pub variables_reference: i64,
    pub expensive: bool,
    pub generation: Generation,
}

impl Scope {
    pub fn from_json(json: &Value, generation: Generation) -> Result<Self, ProtocolError> {
        let raw: protocol::Scope = parse("scope", json)?;
        Ok(Self {
            name: raw.name,
            variables_reference: raw.variables_reference,
            expensive: raw.expensive,
            generation,
        })
    }

    #[must_use]
    pub fn children(&self) -> Option<VariableRef> {
        VariableRef::expandable(self.variables_reference, self.generation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub value: String,
    pub variables_reference: i64,
    /// Reference of the container this variable was listed in; 0 for roots.
    pub container_variables_reference: i64,
    pub generation: Generation,
}

impl Variable {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        variables_reference: i64,
        container: Option<VariableRef>,
        generation: Generation,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            variables_reference,
            container_variables_reference: container.map_or(0, |container| container.reference),
            generation,
        }
    }

    /// Parse one entry of a `variables` response listed under `container`.
    pub fn from_json(json: &Value, container: VariableRef) -> Result<Self, ProtocolError> {
        let raw: protocol::Variable = parse("variable", json)?;
        Ok(Self::new(
            raw.name,
            raw.value,
            raw.variables_reference,
            Some(container),
            container.generation,
        ))
    }

    /// Unnamed root node presenting an evaluation result.
    #[must_use]
    pub fn from_evaluate(response: &EvaluateResponse) -> Self {
        Self::new(
            "",
            response.result.clone(),
            response.variables_reference,
            None,
            response.generation,
        )
    }

    #[must_use]
    pub fn children(&self) -> Option<VariableRef> {
        VariableRef::expandable(self.variables_reference, self.generation)
    }

    #[must_use]
    pub fn container(&self) -> Option<VariableRef> {
        VariableRef::expandable(self.container_variables_reference, self.generation)
    }
}

/// Transient result of an `evaluate` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluateResponse {
    pub result: String,
    pub variables_reference: i64,
    pub generation: Generation,
}

impl EvaluateResponse {
    pub fn from_json(json: &Value, generation: Generation) -> Result<Self, ProtocolError> {
        let raw: protocol::EvaluateResponseBody = parse("evaluate response", json)?;
        Ok(Self {
            result: raw.result,
            variables_reference: raw.variables_reference,
            generation,
        })
    }

    #[must_use]
    pub fn children(&self) -> Option<VariableRef> {
        VariableRef::expandable(self.variables_reference, self.generation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionItem {
    pub label: String,
    /// Text to insert; `None` means insert the label.
    pub text: Option<String>,
}

impl CompletionItem {
    pub fn from_json(json: &Value) -> Result<Self, ProtocolError> {
        let raw: protocol::CompletionItem = parse("completion item", json)?;
        Ok(Self {
            label: raw.label,
            text: raw.text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_without_source_is_internal_label() {
        let frame = StackFrame::from_json(&json!({
            "id": 1,
            "name": "foo",
            "presentationHint": "label"
        }))
        .expect("frame");
        assert_eq!(frame.presentation, StackFramePresentation::Label);
        assert!(frame.internal);
        assert_eq!(frame.file, "??");
        assert_eq!(frame.line, 0);
    }

    #[test]
    fn frame_with_source_path() {
        let frame = StackFrame::from_json(&json!({
            "id": 2,
            "name": "bar",
            "source": {"path": "/a/b.py"},
            "line": 10
        }))
        .expect("frame");
        assert!(!frame.internal);
        assert_eq!(frame.file, "/a/b.py");
        assert_eq!(frame.line, 10);
        assert_eq!(frame.presentation, StackFramePresentation::Normal);
    }

    #[test]
    fn frame_with_pathless_source_is_internal() {
        let frame = StackFrame::from_json(&json!({
            "id": 3,
            "name": "native",
            "source": {"name": "libc.so", "sourceReference": 7},
            "line": 4,
            "presentationHint": "deemphasize"
        }))
        .expect("frame");
        assert!(frame.internal);
        assert_eq!(frame.file, UNKNOWN_FILE);
        assert_eq!(frame.presentation, StackFramePresentation::Normal);
    }

    #[test]
    fn frame_missing_id_is_protocol_error() {
        let err = StackFrame::from_json(&json!({"name": "x"})).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidBody { .. }));
    }

    #[test]
    fn completion_text_defaults_to_none() {
        let item = CompletionItem::from_json(&json!({"label": "x"})).expect("item");
        assert_eq!(item.label, "x");
        assert_eq!(item.text, None);
    }

    #[test]
    fn variable_keeps_container_reference() {
        let container = VariableRef::new(10, Generation(3));
        let variable = Variable::from_json(
            &json!({"name": "point", "value": "Point", "variablesReference": 20}),
            container,
        )
        .expect("variable");
        assert_eq!(variable.container_variables_reference, 10);
        assert_eq!(variable.container(), Some(container));
        assert_eq!(variable.children(), Some(VariableRef::new(20, Generation(3))));

        let leaf = Variable::from_json(&json!({"name": "n", "value": "1"}), container)
            .expect("leaf");
        assert_eq!(leaf.variables_reference, 0);
        assert_eq!(leaf.children(), None);
    }

    #[test]
    fn evaluate_result_becomes_unnamed_root() {
        let response = EvaluateResponse::from_json(
            &json!({"result": "[1, 2]", "variablesReference": 5}),
            Generation(2),
        )
        .expect("evaluate");
        let root = Variable::from_evaluate(&response);
        assert_eq!(root.name, "");
        assert_eq!(root.value, "[1, 2]");
        assert_eq!(root.container_variables_reference, 0);
        assert_eq!(root.children(), Some(VariableRef::new(5, Generation(2))));
    }

    #[test]
    fn scope_children_follow_reference() {
        let scope = Scope::from_json(
            &json!({"name": "Registers", "variablesReference": 0, "expensive": false}),
            Generation(1),
        )
        .expect("scope");
        assert_eq!(scope.children(), None);
    }
}
