use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// An attribute value held in a flow instance's data scope
///
/// A thin wrapper around a JSON value. Attribute tables, change entries
/// and flow-definition defaults all carry this type, so one serialization
/// format covers the whole state tree.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct AttrValue {
    value: serde_json::Value,
}

impl AttrValue {
    /// Wrap a JSON value
    #[inline]
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// The null attribute value
    #[inline]
    pub fn null() -> Self {
        Self {
            value: serde_json::Value::Null,
        }
    }

    /// Borrow the inner JSON value
    #[inline]
    pub fn as_value(&self) -> &serde_json::Value {
        &self.value
    }

    /// Take ownership of the inner JSON value
    #[inline]
    pub fn into_value(self) -> serde_json::Value {
        self.value
    }

    /// Whether the value is JSON null
    #[inline]
    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// View the value as a string, if it is one
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    /// View the value as an integer, if it is one
    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        self.value.as_i64()
    }

    /// View the value as a float, if it is numeric
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }

    /// View the value as a boolean, if it is one
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_bool()
    }

    /// Deserialize the value into a concrete type
    pub fn to<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_value(self.value.clone())
    }

    /// Build an attribute value from any serializable type
    pub fn from_serializable<T>(value: &T) -> Result<Self, serde_json::Error>
    where
        T: Serialize,
    {
        Ok(Self::new(serde_json::to_value(value)?))
    }
}

impl From<serde_json::Value> for AttrValue {
    fn from(value: serde_json::Value) -> Self {
        Self::new(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::new(serde_json::Value::String(value.to_string()))
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::new(serde_json::Value::from(value))
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::new(serde_json::Value::Bool(value))
    }
}
