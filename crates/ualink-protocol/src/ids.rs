//! Identifiers for addressable entities: [`NodeId`] and [`AttributeId`].
//!
//! A node id names one entity in a server's address space. An attribute id
//! names one property of that entity (its value, data type, display name and
//! so on). The attribute cache keys its entries by the pair of the two.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// NodeId
// ---------------------------------------------------------------------------

/// The identifier part of a [`NodeId`].
///
/// OPC UA defines four identifier kinds. GUIDs are carried in their
/// canonical textual form; opaque identifiers are raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Identifier {
    Numeric(u32),
    String(String),
    Guid(String),
    Opaque(Vec<u8>),
}

/// Uniquely identifies a node within a server.
///
/// The textual form follows the usual OPC UA notation:
///
/// ```rust
/// use ualink_protocol::NodeId;
///
/// let node: NodeId = "ns=2;s=Boiler.Temperature".parse().unwrap();
/// assert_eq!(node, NodeId::string(2, "Boiler.Temperature"));
/// assert_eq!(node.to_string(), "ns=2;s=Boiler.Temperature");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index. Namespace 0 is reserved for the OPC UA standard.
    pub namespace: u16,
    /// The identifier within the namespace.
    pub identifier: Identifier,
}

impl NodeId {
    /// The null node id (`ns=0;i=0`). Used as the authentication token of
    /// requests sent before a session exists.
    pub const NULL: NodeId = NodeId {
        namespace: 0,
        identifier: Identifier::Numeric(0),
    };

    /// Creates a numeric node id.
    pub fn numeric(namespace: u16, id: u32) -> Self {
        Self {
            namespace,
            identifier: Identifier::Numeric(id),
        }
    }

    /// Creates a string node id.
    pub fn string(namespace: u16, id: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: Identifier::String(id.into()),
        }
    }

    /// Creates a GUID node id from its textual form.
    pub fn guid(namespace: u16, id: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: Identifier::Guid(id.into()),
        }
    }

    /// Creates an opaque (byte string) node id.
    pub fn opaque(namespace: u16, id: impl Into<Vec<u8>>) -> Self {
        Self {
            namespace,
            identifier: Identifier::Opaque(id.into()),
        }
    }

    /// Returns `true` for the null node id.
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace != 0 {
            write!(f, "ns={};", self.namespace)?;
        }
        match &self.identifier {
            Identifier::Numeric(id) => write!(f, "i={id}"),
            Identifier::String(id) => write!(f, "s={id}"),
            Identifier::Guid(id) => write!(f, "g={id}"),
            Identifier::Opaque(bytes) => {
                write!(f, "b=")?;
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for NodeId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidMessage(format!("invalid node id: {s}"));

        let (namespace, rest) = match s.strip_prefix("ns=") {
            Some(tail) => {
                let (ns, rest) = tail.split_once(';').ok_or_else(invalid)?;
                (ns.parse::<u16>().map_err(|_| invalid())?, rest)
            }
            None => (0, s),
        };

        let (kind, value) = rest.split_once('=').ok_or_else(invalid)?;
        let identifier = match kind {
            "i" => Identifier::Numeric(value.parse().map_err(|_| invalid())?),
            "s" => Identifier::String(value.to_string()),
            "g" => Identifier::Guid(value.to_string()),
            "b" => {
                if value.len() % 2 != 0 {
                    return Err(invalid());
                }
                let bytes = (0..value.len())
                    .step_by(2)
                    .map(|i| u8::from_str_radix(&value[i..i + 2], 16))
                    .collect::<Result<Vec<u8>, _>>()
                    .map_err(|_| invalid())?;
                Identifier::Opaque(bytes)
            }
            _ => return Err(invalid()),
        };

        Ok(Self {
            namespace,
            identifier,
        })
    }
}

// ---------------------------------------------------------------------------
// AttributeId
// ---------------------------------------------------------------------------

/// The attributes a node may expose, with their numeric wire ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttributeId {
    NodeId = 1,
    NodeClass = 2,
    BrowseName = 3,
    DisplayName = 4,
    Description = 5,
    WriteMask = 6,
    UserWriteMask = 7,
    IsAbstract = 8,
    Symmetric = 9,
    InverseName = 10,
    ContainsNoLoops = 11,
    EventNotifier = 12,
    Value = 13,
    DataType = 14,
    ValueRank = 15,
    ArrayDimensions = 16,
    AccessLevel = 17,
    UserAccessLevel = 18,
    MinimumSamplingInterval = 19,
    Historizing = 20,
    Executable = 21,
    UserExecutable = 22,
}

impl AttributeId {
    /// Every attribute, in wire-id order.
    pub const ALL: [AttributeId; 22] = [
        Self::NodeId,
        Self::NodeClass,
        Self::BrowseName,
        Self::DisplayName,
        Self::Description,
        Self::WriteMask,
        Self::UserWriteMask,
        Self::IsAbstract,
        Self::Symmetric,
        Self::InverseName,
        Self::ContainsNoLoops,
        Self::EventNotifier,
        Self::Value,
        Self::DataType,
        Self::ValueRank,
        Self::ArrayDimensions,
        Self::AccessLevel,
        Self::UserAccessLevel,
        Self::MinimumSamplingInterval,
        Self::Historizing,
        Self::Executable,
        Self::UserExecutable,
    ];

    /// The numeric id used on the wire.
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Looks an attribute up by its numeric wire id.
    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.id() == id)
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
