//! Method-call sites.
//!
//! A call site carries the receiver expression exactly as written; the
//! type tracker fills in `receiver_type` afterwards. Plain function calls
//! have no receiver and are kept for call-graph edges.

use serde::{Deserialize, Serialize};

/// A call site extracted from one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMethodCall {
    /// Enclosing function or method name, or `<module>` at top level.
    pub caller: String,
    /// The method or function being called, without qualification.
    pub method_name: String,
    /// Receiver expression (`self`, `client`, `a.b`). `None` for plain
    /// function calls.
    pub receiver: Option<String>,
    pub line: u32,
    pub column: u32,
}

impl NewMethodCall {
    pub fn new(caller: impl Into<String>, method_name: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            caller: caller.into(),
            method_name: method_name.into(),
            receiver: None,
            line,
            column,
        }
    }

    pub fn with_receiver(mut self, receiver: impl Into<String>) -> Self {
        self.receiver = Some(receiver.into());
        self
    }

    /// `self.validate()` and friends.
    #[inline]
    pub fn is_self_call(&self) -> bool {
        matches!(self.receiver.as_deref(), Some("self") | Some("this"))
    }

    /// Plain call with no receiver.
    #[inline]
    pub fn is_function_call(&self) -> bool {
        self.receiver.is_none()
    }

    /// Display form: `receiver.method` or bare `method`.
    pub fn qualified_name(&self) -> String {
        match &self.receiver {
            Some(receiver) => format!("{receiver}.{}", self.method_name),
            None => self.method_name.clone(),
        }
    }
}
