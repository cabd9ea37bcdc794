//! Three-state field for partial updates.

use serde::{Deserialize, Deserializer};

/// A field in an update request.
///
/// When deserialized with `#[serde(default)]`, an absent field is `Keep`,
/// an explicit `null` is `Clear`, and any value is `Set`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Patch<T> {
    #[default]
    Keep,
    Clear,
    Set(T),
}

impl<T> Patch<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }

    pub fn as_set(&self) -> Option<&T> {
        match self {
            Patch::Set(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_set(self) -> Option<T> {
        match self {
            Patch::Set(value) => Some(value),
            _ => None,
        }
    }

    /// Whether the field holds a value once applied on top of `current`.
    pub fn present_after(&self, current: bool) -> bool {
        match self {
            Patch::Keep => current,
            Patch::Clear => false,
            Patch::Set(_) => true,
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Patch::Set(v),
            None => Patch::Clear,
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<T>::deserialize(deserializer)?.into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Form {
        #[serde(default)]
        code: Patch<String>,
    }

    #[test]
    fn absent_null_and_value() {
        let absent: Form = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.code, Patch::Keep);

        let null: Form = serde_json::from_str(r#"{"code":null}"#).unwrap();
        assert_eq!(null.code, Patch::Clear);

        let set: Form = serde_json::from_str(r#"{"code":"x=1"}"#).unwrap();
        assert_eq!(set.code, Patch::Set("x=1".to_string()));
    }

    #[test]
    fn present_after() {
        assert!(Patch::<()>::Keep.present_after(true));
        assert!(!Patch::<()>::Keep.present_after(false));
        assert!(!Patch::<()>::Clear.present_after(true));
        assert!(Patch::Set(()).present_after(false));
    }
}
