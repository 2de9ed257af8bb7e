//! Component-call metadata.
//!
//! The compiler's only side effect: each component invocation appends a
//! summary (file, line, attribute names, slot names) into a shared
//! registry so a later validation pass can check component signatures.
//! When the registry has been closed for writing, the append is skipped
//! silently.

use std::sync::Mutex;

/// One recorded component invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentCall {
    pub file: String,
    pub line: u32,
    pub component: String,
    pub attrs: Vec<String>,
    pub slots: Vec<String>,
}

#[derive(Debug)]
enum Sink {
    Open(Vec<ComponentCall>),
    Closed,
}

/// Append-only registry of component calls, shared across compilations.
#[derive(Debug)]
pub struct CallRegistry {
    sink: Mutex<Sink>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self {
            sink: Mutex::new(Sink::Open(Vec::new())),
        }
    }

    /// Record a call. A closed registry ignores the append.
    pub fn record(&self, call: ComponentCall) {
        if let Ok(mut sink) = self.sink.lock() {
            if let Sink::Open(calls) = &mut *sink {
                calls.push(call);
            }
        }
    }

    /// Close the registry and take everything recorded so far.
    pub fn close(&self) -> Vec<ComponentCall> {
        match self.sink.lock() {
            Ok(mut sink) => match std::mem::replace(&mut *sink, Sink::Closed) {
                Sink::Open(calls) => calls,
                Sink::Closed => Vec::new(),
            },
            Err(_) => Vec::new(),
        }
    }
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::new()
    }
}
