//! Static resolution of logical endpoint names to transport addresses.

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};

use crate::decoder::{FrameDecoder, JsonFrameDecoder, PassthroughDecoder};

/// Framing an endpoint's stream requires.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Framing {
    /// Chunks carry whole messages.
    #[default]
    Passthrough,
    /// Chunks carry JSON values that may be fragmented.
    Json,
}

impl Framing {
    /// Build the decoder for this framing with the given buffer limit.
    #[must_use]
    pub fn decoder(self, max_buffer: usize) -> Box<dyn FrameDecoder> {
        match self {
            Self::Passthrough => Box::new(PassthroughDecoder),
            Self::Json => Box::new(JsonFrameDecoder::new(max_buffer)),
        }
    }
}

/// Address and framing registered for an endpoint name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointEntry {
    /// Transport address.
    pub address: SocketAddr,
    /// Stream framing.
    pub framing: Framing,
}

impl EndpointEntry {
    /// Entry for a loopback port.
    #[must_use]
    pub const fn local(port: u16, framing: Framing) -> Self {
        Self {
            address: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port),
            framing,
        }
    }
}

/// Entry used for names missing from the table: `127.0.0.1:3000`,
/// passthrough framing.
pub const FALLBACK_ENTRY: EndpointEntry = EndpointEntry::local(3000, Framing::Passthrough);

/// Resolved, immutable identity of one upstream endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    name: String,
    address: SocketAddr,
    framing: Framing,
}

impl Endpoint {
    /// Create an endpoint directly, bypassing table lookup.
    #[must_use]
    pub fn new(name: impl Into<String>, address: SocketAddr, framing: Framing) -> Self {
        Self {
            name: name.into(),
            address,
            framing,
        }
    }

    /// Logical name.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Transport address.
    #[must_use]
    pub const fn address(&self) -> SocketAddr { self.address }

    /// Stream framing.
    #[must_use]
    pub const fn framing(&self) -> Framing { self.framing }
}

/// Lookup table from endpoint name to [`EndpointEntry`].
///
/// Unknown names resolve to the table's fallback entry, which defaults to
/// [`FALLBACK_ENTRY`].
///
/// # Examples
///
/// ```
/// use relink::endpoint::{EndpointTable, Framing};
///
/// let table = EndpointTable::default();
/// let mysql = table.resolve("mysql-mcp-server");
/// assert_eq!(mysql.address().port(), 3306);
/// assert_eq!(mysql.framing(), Framing::Json);
///
/// let unknown = table.resolve("does-not-exist");
/// assert_eq!(unknown.address().port(), 3000);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointTable {
    entries: HashMap<String, EndpointEntry>,
    fallback: EndpointEntry,
}

impl EndpointTable {
    /// Create an empty table resolving everything to [`FALLBACK_ENTRY`].
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            fallback: FALLBACK_ENTRY,
        }
    }

    /// Register `entry` under `name`, replacing any previous entry.
    #[must_use]
    pub fn with_entry(mut self, name: impl Into<String>, entry: EndpointEntry) -> Self {
        self.entries.insert(name.into(), entry);
        self
    }

    /// Replace the entry used for unknown names.
    #[must_use]
    pub fn with_fallback(mut self, entry: EndpointEntry) -> Self {
        self.fallback = entry;
        self
    }

    /// Look up the entry for `name` without falling back.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&EndpointEntry> { self.entries.get(name) }

    /// Resolve `name` to an [`Endpoint`], using the fallback when unknown.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Endpoint {
        let entry = self.get(name).copied().unwrap_or_else(|| {
            tracing::debug!(endpoint = name, fallback = %self.fallback.address, "unknown endpoint");
            self.fallback
        });
        Endpoint::new(name, entry.address, entry.framing)
    }
}

impl Default for EndpointTable {
    fn default() -> Self {
        Self::empty()
            .with_entry("fetch", EndpointEntry::local(3000, Framing::Passthrough))
            .with_entry("mysql-mcp-server", EndpointEntry::local(3306, Framing::Json))
    }
}
