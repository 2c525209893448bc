// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::message::Message;

type Map = serde_json::Map<String, serde_json::Value>;

const TYPE_FIELD: &str = "@type";

/// `Any` contains an arbitrary serialized message along with a URL that
/// describes the type of the serialized message.
///
/// Long-running operations carry their response and metadata as `Any`
/// payloads; the application unpacks them into the types named by the call
/// descriptor.
///
/// # JSON
///
/// The JSON representation of an `Any` value uses the regular
/// representation of the embedded message, with an additional field `@type`
/// which contains the type URL. Example:
///
/// ```norust
///     {
///       "@type": "type.googleapis.com/library.v1.Book",
///       "name": "shelves/1/books/2",
///       "title": "The Rust Programming Language"
///     }
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct Any(Map);

/// Indicates a problem trying to use an [Any].
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum AnyError {
    /// Problem serializing an object into an [Any].
    #[error("cannot serialize object into an Any, source={0}")]
    Serialization(#[source] BoxedError),

    /// Problem deserializing an object from an [Any].
    #[error("cannot deserialize from an Any, source={0}")]
    Deserialization(#[source] BoxedError),

    /// Mismatched type, the [Any] does not contain the desired type.
    #[error("expected type mismatch in Any deserialization, has={has}, want={want}")]
    TypeMismatch {
        /// The type URL contained in the `Any`.
        has: String,
        /// The type URL the caller requested.
        want: String,
    },
}

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

impl AnyError {
    pub(crate) fn ser<T: Into<BoxedError>>(v: T) -> Self {
        Self::Serialization(v.into())
    }

    pub(crate) fn deser<T: Into<BoxedError>>(v: T) -> Self {
        Self::Deserialization(v.into())
    }

    fn mismatch(has: &str, want: &str) -> Self {
        Self::TypeMismatch {
            has: has.into(),
            want: want.into(),
        }
    }
}

type Error = AnyError;

impl Any {
    /// Returns the type URL of the contained message, if any.
    ///
    /// # Example
    /// ```
    /// # use gax::any::Any;
    /// let any = Any::from_json(serde_json::json!({
    ///     "@type": "type.googleapis.com/library.v1.Book",
    ///     "title": "Moby Dick"
    /// }))?;
    /// assert_eq!(any.type_url(), Some("type.googleapis.com/library.v1.Book"));
    /// # Ok::<(), gax::any::AnyError>(())
    /// ```
    pub fn type_url(&self) -> Option<&str> {
        self.0.get(TYPE_FIELD).and_then(serde_json::Value::as_str)
    }

    /// Creates a new [Any] from any [Message].
    ///
    /// # Example
    /// ```
    /// # use gax::any::Any;
    /// # use gax::message::Empty;
    /// let any = Any::from_msg(&Empty::default())?;
    /// assert_eq!(any.type_url(), Some("type.googleapis.com/google.protobuf.Empty"));
    /// # Ok::<(), gax::any::AnyError>(())
    /// ```
    pub fn from_msg<T>(message: &T) -> Result<Self, Error>
    where
        T: Message,
    {
        let value = serde_json::to_value(message).map_err(Error::ser)?;
        let mut map = match value {
            serde_json::Value::Object(map) => map,
            v => {
                // Messages that do not serialize as objects are wrapped in a
                // `value` field.
                let mut map = Map::new();
                map.insert("value".to_string(), v);
                map
            }
        };
        map.insert(
            TYPE_FIELD.to_string(),
            serde_json::Value::String(T::typename().to_string()),
        );
        Ok(Any(map))
    }

    /// Creates a new [Any] from its JSON representation.
    ///
    /// The object must contain a string `@type` field.
    pub fn from_json(value: serde_json::Value) -> Result<Self, Error> {
        match value {
            serde_json::Value::Object(map)
                if map.get(TYPE_FIELD).is_some_and(serde_json::Value::is_string) =>
            {
                Ok(Any(map))
            }
            serde_json::Value::Object(_) => Err(Error::deser(
                "@type field is missing or is not a string",
            )),
            _ => Err(Error::deser("an Any must be a JSON object")),
        }
    }

    /// Extracts (if possible) a `T` value from the [Any].
    ///
    /// Returns [AnyError::TypeMismatch] if the type URL is not the one
    /// expected by `T`.
    ///
    /// # Example
    /// ```
    /// # use gax::any::{Any, AnyError};
    /// # use gax::message::Empty;
    /// let any = Any::from_msg(&Empty::default())?;
    /// let got = any.to_msg::<serde_json::Value>();
    /// assert!(matches!(got, Err(AnyError::TypeMismatch { .. })));
    /// # Ok::<(), AnyError>(())
    /// ```
    pub fn to_msg<T>(&self) -> Result<T, Error>
    where
        T: Message,
    {
        let has = self
            .type_url()
            .ok_or_else(|| Error::deser("@type field is missing or is not a string"))?;
        if has != T::typename() {
            return Err(Error::mismatch(has, T::typename()));
        }
        let mut map = self.0.clone();
        map.remove(TYPE_FIELD);
        let value = match map.remove("value") {
            Some(v) if map.is_empty() => v,
            Some(v) => {
                map.insert("value".to_string(), v);
                serde_json::Value::Object(map)
            }
            None => serde_json::Value::Object(map),
        };
        serde_json::from_value::<T>(value).map_err(Error::deser)
    }
}

/// Implement [`serde`](::serde) serialization for [Any].
impl serde::ser::Serialize for Any {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        self.0.serialize(serializer)
    }
}

/// Implement [`serde`](::serde) deserialization for [Any].
impl<'de> serde::de::Deserialize<'de> for Any {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Map::deserialize(deserializer)?;
        Ok(Any(value))
    }
}
