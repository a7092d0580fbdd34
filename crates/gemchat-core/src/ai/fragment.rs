use std::fmt;

/// One incremental piece of a streamed reply.
///
/// `text` is the extractable text payload, if the chunk had one. `raw` is the
/// chunk as received and is what the fragment displays as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    text: Option<String>,
    raw: String,
}

impl Fragment {
    /// Build a fragment that carries a text payload.
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            raw: text.clone(),
            text: Some(text),
        }
    }

    /// Build a fragment with no text payload, only its textual representation.
    pub fn opaque(raw: impl Into<String>) -> Self {
        Self {
            text: None,
            raw: raw.into(),
        }
    }

    pub fn new(text: Option<String>, raw: String) -> Self {
        Self { text, raw }
    }

    pub fn payload(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Append this fragment to an accumulating reply, falling back to the raw
    /// representation when there is no text payload.
    pub fn append_to(&self, reply: &mut String) {
        match &self.text {
            Some(text) => reply.push_str(text),
            None => reply.push_str(&self.raw),
        }
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
