//! Plaintext content records (never persisted in clear)

use std::fmt;

use serde::{Deserialize, Serialize};

/// A name + address pair
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Contact {
    pub name: Option<String>,
    pub address: String,
}

impl Contact {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }

    pub fn with_name(name: impl Into<String>, address: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            name: (!name.is_empty()).then_some(name),
            address: address.into(),
        }
    }

    /// Name if present, otherwise the address
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} <{}>", name, self.address),
            None => f.write_str(&self.address),
        }
    }
}

/// Searchable plaintext of one message
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContentRecord {
    pub subject: String,
    pub sender: Contact,
    #[serde(default)]
    pub to: Vec<Contact>,
    #[serde(default)]
    pub cc: Vec<Contact>,
    #[serde(default)]
    pub bcc: Vec<Contact>,
    /// Body with MIME and HTML structure stripped
    #[serde(default)]
    pub body: String,
}

impl ContentRecord {
    /// All recipients in to, cc, bcc order
    pub fn recipients(&self) -> impl Iterator<Item = &Contact> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }

    /// Approximate in-memory footprint, used for cache accounting
    pub fn approximate_size(&self) -> usize {
        let contact = |c: &Contact| c.address.len() + c.name.as_ref().map_or(0, String::len) + 16;
        self.subject.len()
            + self.body.len()
            + contact(&self.sender)
            + self.recipients().map(contact).sum::<usize>()
            + std::mem::size_of::<Self>()
    }
}
