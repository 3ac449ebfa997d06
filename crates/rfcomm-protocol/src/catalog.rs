//! Command descriptors and the static catalog they live in.

use crate::constants::OPCODE_NONE;
use crate::error::ProtocolError;

/// How many bytes a command's response is expected to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePolicy {
    /// No response is ever awaited. Completion is driven by the write
    /// confirmation alone.
    None,
    /// The response is complete once exactly this many bytes arrived.
    /// `Exact(0)` behaves like [`ResponsePolicy::None`].
    Exact(usize),
    /// Any non-empty buffer is a complete response.
    ///
    /// This cannot tell a partial first chunk from a complete message and is
    /// only safe when the transport delivers the whole response at once.
    Variable,
}

impl ResponsePolicy {
    /// Whether the command waits for response bytes at all.
    pub const fn requires_response(&self) -> bool {
        !matches!(self, ResponsePolicy::None | ResponsePolicy::Exact(0))
    }

    /// Expected response length, `None` for variable-length responses.
    pub const fn expected_len(&self) -> Option<usize> {
        match self {
            ResponsePolicy::None => Some(0),
            ResponsePolicy::Exact(n) => Some(*n),
            ResponsePolicy::Variable => None,
        }
    }
}

/// Static definition of one command.
#[derive(Debug, PartialEq, Eq)]
pub struct CommandDescriptor {
    /// Human-readable name, used in logs and metric labels.
    pub name: &'static str,
    /// First byte of every request for this command.
    pub opcode: u8,
    /// Response length policy.
    pub policy: ResponsePolicy,
}

impl CommandDescriptor {
    /// Create a descriptor.
    pub const fn new(name: &'static str, opcode: u8, policy: ResponsePolicy) -> Self {
        CommandDescriptor {
            name,
            opcode,
            policy,
        }
    }

    /// Whether this is the idle sentinel.
    pub const fn is_idle(&self) -> bool {
        self.opcode == OPCODE_NONE
    }
}

impl std::fmt::Display for CommandDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// Descriptor held by the engine while no command is active.
pub static IDLE: CommandDescriptor = CommandDescriptor::new("NONE", OPCODE_NONE, ResponsePolicy::None);

/// A fixed vocabulary of command descriptors.
#[derive(Debug, Clone, Copy)]
pub struct Catalog {
    descriptors: &'static [&'static CommandDescriptor],
}

impl Catalog {
    /// Wrap a static descriptor table.
    pub const fn new(descriptors: &'static [&'static CommandDescriptor]) -> Self {
        Catalog { descriptors }
    }

    /// Find the descriptor for an opcode.
    pub fn lookup(&self, opcode: u8) -> Option<&'static CommandDescriptor> {
        self.descriptors.iter().copied().find(|d| d.opcode == opcode)
    }

    /// Iterate over all descriptors in table order.
    pub fn iter(&self) -> impl Iterator<Item = &'static CommandDescriptor> {
        self.descriptors.iter().copied()
    }

    /// Number of descriptors.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Check that opcodes are unique and the reserved opcode is unused.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        for (i, descriptor) in self.descriptors.iter().enumerate() {
            if descriptor.opcode == OPCODE_NONE {
                return Err(ProtocolError::ReservedOpcode(descriptor.opcode));
            }
            if self.descriptors[..i]
                .iter()
                .any(|d| d.opcode == descriptor.opcode)
            {
                return Err(ProtocolError::DuplicateOpcode(descriptor.opcode));
            }
        }
        Ok(())
    }
}
