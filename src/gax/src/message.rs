// Copyright 2025 Google LLC
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

/// A trait that must be implemented by all messages.
///
/// Messages sent to and received from services may be wrapped in
/// [Any][crate::any::Any]. `Any` uses a `@type` field to encode the type
/// name and then validates extraction and insertion against this type.
///
/// # Example
/// ```
/// # use gax::message::Message;
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct CreateBookMetadata { progress: i32 }
/// impl Message for CreateBookMetadata {
///     fn typename() -> &'static str {
///         "type.googleapis.com/library.v1.CreateBookMetadata"
///     }
/// }
/// ```
pub trait Message: serde::ser::Serialize + serde::de::DeserializeOwned {
    /// The typename of this message, including the `type.googleapis.com/`
    /// prefix.
    fn typename() -> &'static str;
}

impl Message for serde_json::Value {
    fn typename() -> &'static str {
        "type.googleapis.com/google.protobuf.Value"
    }
}

/// The message used when an operation (or method) has no response payload.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[non_exhaustive]
pub struct Empty {}

impl Message for Empty {
    fn typename() -> &'static str {
        "type.googleapis.com/google.protobuf.Empty"
    }
}

/// Removes `null` members from a JSON request, recursively.
///
/// Fields that are not set must be omitted from the request, services may
/// reject explicit `null` values.
///
/// # Example
/// ```
/// # use gax::message::strip_nulls;
/// let mut value = serde_json::json!({"a": null, "b": {"c": null, "d": 1}, "e": [null, {"f": null}]});
/// strip_nulls(&mut value);
/// assert_eq!(value, serde_json::json!({"b": {"d": 1}, "e": [null, {}]}));
/// ```
pub fn strip_nulls(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(strip_nulls);
        }
        serde_json::Value::Array(list) => list.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strip_nulls_keeps_scalars() {
        let mut value = json!({"name": "projects/p", "pageSize": 0, "filter": null, "flag": false});
        strip_nulls(&mut value);
        assert_eq!(value, json!({"name": "projects/p", "pageSize": 0, "flag": false}));

        let mut value = json!(null);
        strip_nulls(&mut value);
        assert_eq!(value, json!(null));
    }

    #[test]
    fn empty_typename() {
        assert_eq!(Empty::typename(), "type.googleapis.com/google.protobuf.Empty");
        let got = serde_json::to_value(Empty::default()).unwrap();
        assert_eq!(got, json!({}));
    }
}
