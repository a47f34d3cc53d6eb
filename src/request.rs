//! Proof request records.
use std::fmt;

/// Zero sentinel meaning "this condition is unconstrained".
pub const UNCONSTRAINED: [u8; 32] = [0u8; 32];

/// Index byte meaning "do not evaluate this condition".
pub const UNCHECKED_INDEX: u8 = 0xff;

/// Caller-chosen request identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for RequestId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// An opaque principal: a requester, a canceller, or a consumer handle.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(String);

impl Identity {
    /// Wrap any string-like handle.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The handle as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle of a request. Cancelled is terminal.
///
/// The discriminants are the persisted values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestState {
    /// Open for proofs.
    Active = 1,
    /// Cancelled by the requester or consumer.
    Cancelled = 2,
}

impl RequestState {
    /// Persisted form.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of [`as_u8`](Self::as_u8).
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Active),
            2 => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// A stored subscription: "tell `consumer` when a transaction matching
/// these conditions is confirmed `required_confs` deep".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofRequest {
    /// Caller-chosen identifier.
    pub id: RequestId,
    /// keccak256 of the 36-byte outpoint, or [`UNCONSTRAINED`].
    pub spends_hash: [u8; 32],
    /// keccak256 of the length-prefixed output script, or [`UNCONSTRAINED`].
    pub pays_hash: [u8; 32],
    /// Exact output value in satoshis. 0 leaves the value unchecked.
    pub pays_value: u64,
    /// Who gets notified.
    pub consumer: Identity,
    /// Who registered the request.
    pub requester: Identity,
    /// Confirmations a proof's header needs below the best header.
    pub required_confs: u8,
    /// Earliest acceptable confirming-header timestamp. 0 disables it.
    pub not_before: u32,
    /// Lifecycle state.
    pub state: RequestState,
}

impl ProofRequest {
    /// Whether proofs are still accepted.
    pub fn is_active(&self) -> bool {
        self.state == RequestState::Active
    }

    /// Whether a spends condition was given.
    pub fn has_spends(&self) -> bool {
        self.spends_hash != UNCONSTRAINED
    }

    /// Whether a pays condition was given.
    pub fn has_pays(&self) -> bool {
        self.pays_hash != UNCONSTRAINED
    }
}

/// Caller input to register a new request.
#[derive(Clone, Debug)]
pub struct NewRequest {
    /// Caller-chosen identifier; must be unused.
    pub id: RequestId,
    /// Empty, or a 36-byte outpoint (txid || output index LE).
    pub spends: Vec<u8>,
    /// Empty, or a length-prefixed standard output script.
    pub pays: Vec<u8>,
    /// Exact value of the paying output in satoshis; 0 leaves it unchecked.
    pub pays_value: u64,
    /// Who gets notified.
    pub consumer: Identity,
    /// Confirmations a proof's header needs below the best header.
    pub required_confs: u8,
    /// Earliest acceptable confirming-header time; 0 disables it.
    pub not_before: u32,
}

/// Which input and output of a proven transaction a request is checked
/// against. [`UNCHECKED_INDEX`] skips the matching condition.
///
/// Packed as two bytes, input index first and output index second. This
/// is the relay's wire order and the reverse of an "(output, input)"
/// reading: `0xff00` skips the spends check and matches `pays` against
/// output 0, while `0x00ff` matches `spends` against input 0 and skips
/// `pays`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestIndices {
    /// Index into vin checked against `spends`.
    pub input: u8,
    /// Index into vout checked against `pays`.
    pub output: u8,
}

impl RequestIndices {
    /// Indices from their unpacked parts.
    pub fn new(input: u8, output: u8) -> Self {
        Self { input, output }
    }

    /// Unpack `[input, output]`.
    pub fn from_bytes(b: [u8; 2]) -> Self {
        Self::new(b[0], b[1])
    }

    /// Pack as `[input, output]`.
    pub fn to_bytes(self) -> [u8; 2] {
        [self.input, self.output]
    }

    /// Whether the spends condition is evaluated.
    pub fn checks_input(self) -> bool {
        self.input != UNCHECKED_INDEX
    }

    /// Whether the pays condition is evaluated.
    pub fn checks_output(self) -> bool {
        self.output != UNCHECKED_INDEX
    }
}

impl From<u16> for RequestIndices {
    fn from(v: u16) -> Self {
        Self::from_bytes(v.to_be_bytes())
    }
}
