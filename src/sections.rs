use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The decoded parts of a verified token, as handed to the verify callback.
///
/// All four fields are always present. When the verifier only returns the
/// claims, `header` is empty and `signature`/`input` are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sections {
    pub header: Map<String, Value>,
    pub payload: Value,
    pub signature: String,
    /// The token exactly as it was extracted from the request.
    pub input: String,
}

/// What a verifier hands back on success.
#[derive(Debug, Clone, PartialEq)]
pub enum RawVerified {
    /// Header, payload, signature and input.
    Complete(Sections),
    /// Only the claims.
    Payload(Value),
}

impl Sections {
    /// Builds the four-field shape from verifier output.
    ///
    /// `None` means verification never ran and yields the all-empty value.
    /// Normalizing a complete value returns it unchanged.
    pub fn normalize(raw: Option<RawVerified>) -> Self {
        match raw {
            None => Self::empty(),
            Some(RawVerified::Complete(sections)) => sections,
            Some(RawVerified::Payload(payload)) => Self {
                payload,
                ..Self::empty()
            },
        }
    }

    pub fn empty() -> Self {
        Self {
            header: Map::new(),
            payload: Value::String(String::new()),
            signature: String::new(),
            input: String::new(),
        }
    }

    /// Deserializes the payload into a typed claims struct.
    pub fn claims<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Shortcut for the `sub` claim when it is a string.
    pub fn subject(&self) -> Option<&str> {
        self.payload.get("sub").and_then(Value::as_str)
    }
}

impl From<RawVerified> for Sections {
    fn from(raw: RawVerified) -> Self {
        Self::normalize(Some(raw))
    }
}
