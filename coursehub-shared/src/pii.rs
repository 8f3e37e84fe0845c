use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

const SHORT_VALUE_LEN: usize = 4;

/// Wraps student contact details so that `{:?}` and `{}` in log macros never
/// print the raw value. Serialization still emits the real value because API
/// responses and notification payloads need it.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Masked<T>(pub T);

impl<T: AsRef<str>> Masked<T> {
    /// Keeps the last two characters visible, e.g. `*******42`. Values of
    /// four characters or fewer are hidden entirely.
    pub fn redacted(&self) -> String {
        let raw = self.0.as_ref();
        let len = raw.chars().count();
        if len <= SHORT_VALUE_LEN {
            return "*".repeat(SHORT_VALUE_LEN);
        }
        let visible: String = raw.chars().skip(len - 2).collect();
        format!("{}{}", "*".repeat(len - 2), visible)
    }

    pub fn is_blank(&self) -> bool {
        self.0.as_ref().trim().is_empty()
    }

    pub fn expose(&self) -> &str {
        self.0.as_ref()
    }
}

impl<T: AsRef<str>> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Masked({})", self.redacted())
    }
}

impl<T: AsRef<str>> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<T> Masked<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl From<&str> for Masked<String> {
    fn from(value: &str) -> Self {
        Masked(value.to_string())
    }
}
