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

use http::HeaderValue;
use http::header::HeaderName;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// The telemetry header.
pub const X_GOOG_API_CLIENT: HeaderName = HeaderName::from_static("x-goog-api-client");

/// The routing header.
pub const X_GOOG_REQUEST_PARAMS: HeaderName = HeaderName::from_static("x-goog-request-params");

pub const GAPIC: &str = "gapic";
pub const GCCL: &str = "gccl";

const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Generated libraries create one static instance of this struct and use it
/// to initialize the `x-goog-api-client` header value.
#[derive(Clone, Debug, PartialEq)]
pub struct XGoogApiClient {
    pub library_type: &'static str,
    pub version: &'static str,
}

impl XGoogApiClient {
    /// Format the struct as needed for the `x-goog-api-client` header.
    pub fn header_value(&self) -> String {
        format!(
            "gl-rust gax/{PKG_VERSION} {}/{}",
            self.library_type, self.version
        )
    }
}

// Unreserved characters (RFC 3986) are left as-is.
const ROUTING_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Formats the `x-goog-request-params` value.
///
/// Returns `None` if there are no parameters.
///
/// # Example
/// ```
/// # use gax::api_header::request_params;
/// let params = [("name".to_string(), "projects/p/secrets/s".to_string())];
/// let value = request_params(&params).expect("non-empty parameters");
/// assert_eq!(value.to_str().ok(), Some("name=projects%2Fp%2Fsecrets%2Fs"));
/// ```
pub fn request_params(params: &[(String, String)]) -> Option<HeaderValue> {
    if params.is_empty() {
        return None;
    }
    let value = params
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, ROUTING_ENCODE_SET),
                utf8_percent_encode(v, ROUTING_ENCODE_SET)
            )
        })
        .collect::<Vec<_>>()
        .join("&");
    // Percent-encoded strings are always valid header values.
    HeaderValue::from_str(&value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_case::test_case;

    fn breakdown(formatted: &str) -> HashMap<String, String> {
        formatted
            .split(" ")
            .filter_map(|v| v.find('/').map(|i| v.split_at(i)))
            .map(|(k, v)| (k, &v[1..]))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn format_header() {
        let header = XGoogApiClient {
            version: "1.2.3",
            library_type: GAPIC,
        };
        let value = header.header_value();
        assert!(value.starts_with("gl-rust "), "{value}");
        let fields = breakdown(value.as_str());

        let got = fields.get(GAPIC).map(String::as_str);
        assert_eq!(got, Some("1.2.3"));

        let got = fields.get("gax").map(String::as_str);
        assert_eq!(got, Some(PKG_VERSION));

        assert!(HeaderValue::from_str(&value).is_ok(), "{value}");
    }

    #[test_case(&[], None)]
    #[test_case(&[("name", "projects/p")], Some("name=projects%2Fp"))]
    #[test_case(&[("name", "a b"), ("location", "us-central1")], Some("name=a%20b&location=us-central1"))]
    #[test_case(&[("id", "x&y=z")], Some("id=x%26y%3Dz"))]
    #[test_case(&[("id", "café")], Some("id=caf%C3%A9"))]
    fn routing(params: &[(&str, &str)], want: Option<&str>) {
        let params = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<Vec<_>>();
        let got = request_params(&params);
        assert_eq!(got.as_ref().and_then(|v| v.to_str().ok()), want);
    }
}
