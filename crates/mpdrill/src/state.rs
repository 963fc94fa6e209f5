//! Per-run connection state and script variable bindings.
//!
//! A test script names runtime-generated values (connection keys) with
//! symbolic variables. The parser enqueues each name as it is read, in
//! script order; the handshake engine later binds generated or captured
//! keys to those names and consumes the queue front-to-back while
//! filling in option fields.

use std::collections::{HashMap, VecDeque};

use crate::error::{Error, Result};

/// A value bound to a script variable name.
///
/// Only keys are produced today; the tag leaves room for other value
/// kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptValue {
    /// A 64-bit MPTCP connection key.
    Key(u64),
}

/// Connection-wide MPTCP state for one test run.
///
/// The two connection keys are shared by every subflow of the
/// connection, in both connection-establishing directions.
#[derive(Debug, Default)]
pub struct ConnectionState {
    local_key: Option<u64>,
    remote_key: Option<u64>,
    pending_variables: VecDeque<String>,
    bindings: HashMap<String, ScriptValue>,
}

impl ConnectionState {
    /// Create empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// The connection key chosen on the test tool's side, if established.
    pub fn local_key(&self) -> Option<u64> {
        self.local_key
    }

    /// The live peer's connection key, if captured.
    pub fn remote_key(&self) -> Option<u64> {
        self.remote_key
    }

    /// Record the connection key generated on the test tool's side.
    ///
    /// Set through the MP_CAPABLE flow; a retransmitted opening SYN
    /// replaces it together with its binding.
    pub fn set_local_key(&mut self, key: u64) {
        self.local_key = Some(key);
    }

    /// Record the connection key captured from the live peer.
    pub fn set_remote_key(&mut self, key: u64) {
        self.remote_key = Some(key);
    }

    pub(crate) fn require_local_key(&self) -> Result<u64> {
        self.local_key
            .ok_or(Error::MissingConnectionKey { side: "local" })
    }

    pub(crate) fn require_remote_key(&self) -> Result<u64> {
        self.remote_key
            .ok_or(Error::MissingConnectionKey { side: "remote" })
    }

    /// Append a script variable name awaiting a generated value.
    ///
    /// Names must be enqueued in the order the script references them; a
    /// name is expected at most once in the queue until it is dequeued.
    pub fn enqueue_variable(&mut self, name: impl Into<String>) {
        self.pending_variables.push_back(name.into());
    }

    /// Pop the front pending variable name.
    pub fn next_pending_variable_name(&mut self) -> Result<String> {
        self.pending_variables.pop_front().ok_or(Error::QueueEmpty)
    }

    /// Read the front pending variable name without consuming it.
    ///
    /// Used when the front name is to be bound but not yet consumed,
    /// e.g. while capturing the remote key.
    pub fn peek_pending_variable_name(&self) -> Result<&str> {
        self.pending_variables
            .front()
            .map(String::as_str)
            .ok_or(Error::QueueEmpty)
    }

    /// Number of names still waiting for a value.
    pub fn pending_count(&self) -> usize {
        self.pending_variables.len()
    }

    /// Bind a value to a script variable name, storing an owned copy.
    pub fn bind_variable(&mut self, name: impl Into<String>, value: ScriptValue) {
        self.bindings.insert(name.into(), value);
    }

    /// Look up a previously bound variable.
    pub fn lookup_variable(&self, name: &str) -> Option<&ScriptValue> {
        self.bindings.get(name)
    }

    /// Pop the next pending variable name and resolve it to a key.
    ///
    /// Fails with [`Error::QueueEmpty`] when nothing is pending and
    /// [`Error::VariableUnbound`] when the name has no key bound; either
    /// way the current option cannot be populated.
    pub fn next_key_value(&mut self) -> Result<u64> {
        let name = self.next_pending_variable_name()?;
        match self.bindings.get(&name) {
            Some(&ScriptValue::Key(key)) => Ok(key),
            _ => Err(Error::VariableUnbound { name }),
        }
    }
}
