//! Command dispatch for inbound payloads.

use std::collections::HashMap;

/// A registered payload parser.
///
/// Invoked with the raw payload bytes of a validated frame. The parser
/// decodes the payload and relays the result (success or decode failure)
/// on the subscriber it was bound to at registration. On success it
/// returns the number of payload bytes consumed so the caller can warn
/// about trailing garbage; on decode failure it returns `None`.
pub type PayloadParser = Box<dyn Fn(&[u8]) -> Option<usize> + Send + Sync>;

/// Outcome of dispatching a payload by command name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadResult {
    /// A parser was dispatched. `unused` counts payload bytes the parser
    /// left behind after a successful decode; trailing bytes are a soft
    /// warning, not an error.
    Loaded { unused: usize },
    /// No parser is registered for the command.
    Unloaded,
}

/// Dispatch table mapping a wire command name to its payload parser.
///
/// The table is fixed at construction; the channel registers one parser
/// per supported message variant, each bound to that variant's
/// subscriber.
#[derive(Default)]
pub struct StreamLoader {
    parsers: HashMap<&'static str, PayloadParser>,
}

impl StreamLoader {
    pub fn new() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// Register a parser for `command`.
    pub fn add(&mut self, command: &'static str, parser: PayloadParser) {
        self.parsers.insert(command, parser);
    }

    /// Dispatch `payload` to the parser registered for `command`.
    pub fn load(&self, command: &str, payload: &[u8]) -> LoadResult {
        match self.parsers.get(command) {
            Some(parser) => match parser(payload) {
                Some(consumed) => LoadResult::Loaded {
                    unused: payload.len().saturating_sub(consumed),
                },
                None => LoadResult::Loaded { unused: 0 },
            },
            None => LoadResult::Unloaded,
        }
    }
}
