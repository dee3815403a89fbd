//! Reactive state for the todo dashboard

use leptos::*;
use std::cell::Cell;
use std::rc::Rc;

/// A todo record as returned by the API.
///
/// The id is opaque to this client; some backends serialize numeric ids,
/// so deserialization accepts either form and carries it as a string.
#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
pub struct Todo {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    pub text: String,
    pub completed: bool,
}

fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Num(i64),
        Str(String),
    }

    Ok(match IdRepr::deserialize(deserializer)? {
        IdRepr::Num(n) => n.to_string(),
        IdRepr::Str(s) => s,
    })
}

/// Orders list refreshes issued from overlapping actions.
///
/// Every fetch takes a ticket at issue time; its response may be applied
/// only while no newer ticket has been issued. A stale response from an
/// earlier refresh is dropped instead of clobbering newer state, so the
/// rendered list always converges to the most recently requested fetch.
#[derive(Clone, Default)]
pub struct RefreshSequencer {
    issued: Rc<Cell<u64>>,
}

impl RefreshSequencer {
    /// Take a ticket for a refresh that is about to be issued.
    pub fn begin(&self) -> u64 {
        let ticket = self.issued.get() + 1;
        self.issued.set(ticket);
        ticket
    }

    /// Whether the given ticket is still the newest one issued.
    pub fn is_current(&self, ticket: u64) -> bool {
        self.issued.get() == ticket
    }
}

/// Trimmed todo text, or None when the input is blank. Blank input must
/// not produce a request.
pub fn prepare_text(raw: &str) -> Option<String> {
    let text = raw.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Application state shared by all components
#[derive(Clone)]
pub struct AppState {
    /// The todo list as last fetched from the server
    pub todos: RwSignal<Vec<Todo>>,
    /// Sequencer for list refreshes
    pub refresh: RefreshSequencer,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            todos: create_rw_signal(Vec::new()),
            refresh: RefreshSequencer::default(),
        }
    }
}
