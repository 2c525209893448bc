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

//! Lazy sequences over list methods.
//!
//! List methods, as defined by [AIP-4233], return one page of results and a
//! token to fetch the next page. A [PagedEnumerable] hides the tokens: it
//! fetches pages on demand, as the application consumes the items.
//!
//! [AIP-4233]: https://google.aip.dev/client-libraries/4233

use crate::Result;
use crate::executor::{AttemptContext, CallExecutor};
use crate::options::RequestOptions;
use crate::response::Response;
use futures::stream::unfold;
use futures::{Stream, StreamExt};
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A list request that accepts a page token.
pub trait PageableRequest: Clone {
    /// Sets the token returned by the previous page.
    fn set_page_token(&mut self, token: String);
}

/// A list response: a page of items plus the token for the next page.
pub trait PageableResponse {
    type PageItem;

    /// The items in this page, in the order returned by the service.
    fn items(&self) -> &[Self::PageItem];

    /// The token to fetch the next page, empty if this is the last page.
    fn next_page_token(&self) -> String;
}

/// One list response and the request that fetched it.
#[derive(Clone, Debug)]
pub struct Page<Req, Resp> {
    request: Req,
    response: Resp,
}

impl<Req, Resp> Page<Req, Resp>
where
    Resp: PageableResponse,
{
    /// The request used to fetch this page.
    pub fn request(&self) -> &Req {
        &self.request
    }

    /// The raw response, including any fields other than the items.
    pub fn response(&self) -> &Resp {
        &self.response
    }

    pub fn into_response(self) -> Resp {
        self.response
    }

    pub fn items(&self) -> &[Resp::PageItem] {
        self.response.items()
    }

    pub fn next_page_token(&self) -> String {
        self.response.next_page_token()
    }
}

type BoxedFetch<Req, Resp> = Box<dyn Fn(Req) -> Pin<Box<dyn Future<Output = Result<Resp>>>>>;

/// A forward-only sequence of the items returned by a list method.
///
/// The first page is fetched on the first call to [next_item][Self::next_item]
/// or [next_page][Self::next_page]. Each following page is fetched only when
/// the items in the current page are exhausted, using the token from the
/// previous response. The sequence ends when the service returns an empty
/// token.
///
/// Pages are never fetched twice, and the enumerable cannot be rewound.
/// Create a new one, from the original request, to restart the iteration.
///
/// If fetching a page fails the error is returned and the sequence ends.
/// Items already returned remain valid.
///
/// # Example
/// ```
/// # use gax::paginator::{PagedEnumerable, PageableRequest, PageableResponse};
/// #[derive(Clone, Default)]
/// struct ListBooks { page_token: String }
/// impl PageableRequest for ListBooks {
///     fn set_page_token(&mut self, token: String) { self.page_token = token; }
/// }
/// struct ListBooksResponse { books: Vec<String>, next_page_token: String }
/// impl PageableResponse for ListBooksResponse {
///     type PageItem = String;
///     fn items(&self) -> &[String] { &self.books }
///     fn next_page_token(&self) -> String { self.next_page_token.clone() }
/// }
///
/// # tokio_test::block_on(async {
/// let mut books = PagedEnumerable::new(ListBooks::default(), |request: ListBooks| async move {
///     let response = match request.page_token.as_str() {
///         "" => ListBooksResponse { books: vec!["a".into(), "b".into()], next_page_token: "p2".into() },
///         _ => ListBooksResponse { books: vec!["c".into()], next_page_token: String::new() },
///     };
///     Ok(response)
/// });
/// let mut names = Vec::new();
/// while let Some(book) = books.next_item().await {
///     names.push(book?);
/// }
/// assert_eq!(names, ["a", "b", "c"]);
/// # gax::Result::<()>::Ok(()) });
/// ```
pub struct PagedEnumerable<Req, Resp> {
    fetch: BoxedFetch<Req, Resp>,
    next_request: Option<Req>,
    current: Option<Page<Req, Resp>>,
    consumed: usize,
}

impl<Req, Resp> PagedEnumerable<Req, Resp>
where
    Req: PageableRequest + 'static,
    Resp: PageableResponse + 'static,
{
    /// Creates an enumerable from the first request and a function to fetch
    /// one page.
    ///
    /// Any page token in `request` is used for the first page.
    pub fn new<F, Fut>(request: Req, fetch: F) -> Self
    where
        F: Fn(Req) -> Fut + 'static,
        Fut: Future<Output = Result<Resp>> + 'static,
    {
        let fetch: BoxedFetch<Req, Resp> = Box::new(move |r| Box::pin(fetch(r)));
        Self {
            fetch,
            next_request: Some(request),
            current: None,
            consumed: 0,
        }
    }

    /// Creates an enumerable that fetches each page with `executor`.
    ///
    /// Each page is a separate call, with its own retry loop and time budget.
    pub fn from_executor<F, Fut>(
        executor: Arc<CallExecutor>,
        request: Req,
        options: RequestOptions,
        transport: F,
    ) -> Self
    where
        Req: Send + Sync,
        F: Fn(Req, AttemptContext) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<Response<Resp>>> + Send + 'static,
    {
        let fetch = move |request: Req| {
            let executor = executor.clone();
            let options = options.clone();
            let transport = transport.clone();
            async move { executor.execute(request, options, transport).await }
        };
        Self::new(request, fetch)
    }

    /// Returns the next item, fetching a new page if needed.
    ///
    /// Returns `None` once all the items are consumed, or after an error.
    pub async fn next_item(&mut self) -> Option<Result<Resp::PageItem>>
    where
        Resp::PageItem: Clone,
    {
        loop {
            if let Some(item) = self
                .current
                .as_ref()
                .and_then(|p| p.items().get(self.consumed))
            {
                self.consumed += 1;
                return Some(Ok(item.clone()));
            }
            // Empty pages with a non-empty token are skipped.
            if let Err(e) = self.fetch_next().await? {
                return Some(Err(e));
            }
        }
    }

    /// Fetches the next page.
    ///
    /// Any unconsumed items in the current page are skipped. Returns `None`
    /// when the service reported no more pages, or after an error.
    pub async fn next_page(&mut self) -> Option<Result<&Page<Req, Resp>>> {
        match self.fetch_next().await? {
            Err(e) => Some(Err(e)),
            Ok(()) => self.current.as_ref().map(Ok),
        }
    }

    /// The most recently fetched page, `None` before the first fetch.
    pub fn current_page(&self) -> Option<&Page<Req, Resp>> {
        self.current.as_ref()
    }

    /// Returns true if no more pages will be fetched.
    pub fn is_finished(&self) -> bool {
        self.next_request.is_none()
    }

    /// Converts the enumerable into a [Stream] of items.
    pub fn into_stream(self) -> ItemStream<Resp::PageItem>
    where
        Resp::PageItem: Clone + 'static,
    {
        let stream = unfold(self, |mut items| async move {
            let item = items.next_item().await?;
            Some((item, items))
        });
        ItemStream {
            stream: Box::pin(stream),
        }
    }

    /// Converts the enumerable into a [Stream] of responses.
    ///
    /// Pages already fetched are not returned again.
    pub fn into_page_stream(self) -> PageStream<Resp> {
        let stream = unfold(self, |mut pages| async move {
            let page = match pages.fetch_next().await? {
                Err(e) => Err(e),
                Ok(()) => pages
                    .current
                    .take()
                    .map(Page::into_response)
                    .ok_or_else(|| crate::error::Error::other("missing page after fetch")),
            };
            Some((page, pages))
        });
        PageStream {
            stream: Box::pin(stream),
        }
    }

    async fn fetch_next(&mut self) -> Option<Result<()>> {
        let request = self.next_request.take()?;
        tracing::debug!("fetching page");
        let response = match (self.fetch)(request.clone()).await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("page fetch failed: {e}");
                return Some(Err(e));
            }
        };
        let token = response.next_page_token();
        if !token.is_empty() {
            let mut next = request.clone();
            next.set_page_token(token);
            self.next_request = Some(next);
        }
        self.current = Some(Page { request, response });
        self.consumed = 0;
        Some(Ok(()))
    }
}

impl<Req, Resp> std::fmt::Debug for PagedEnumerable<Req, Resp>
where
    Req: std::fmt::Debug,
    Resp: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedEnumerable")
            .field("next_request", &self.next_request)
            .field("current", &self.current)
            .field("consumed", &self.consumed)
            .finish_non_exhaustive()
    }
}

/// The items of a [PagedEnumerable] as a [futures::Stream].
#[pin_project]
pub struct ItemStream<T> {
    #[pin]
    stream: Pin<Box<dyn Stream<Item = Result<T>>>>,
}

impl<T> ItemStream<T> {
    /// Returns the next item.
    pub fn next(&mut self) -> futures::stream::Next<'_, Self> {
        StreamExt::next(self)
    }
}

impl<T> Stream for ItemStream<T> {
    type Item = Result<T>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.project().stream.poll_next(cx)
    }
}

/// The pages of a [PagedEnumerable] as a [futures::Stream].
#[pin_project]
pub struct PageStream<T> {
    #[pin]
    stream: Pin<Box<dyn Stream<Item = Result<T>>>>,
}

impl<T> PageStream<T> {
    /// Returns the next page.
    pub fn next(&mut self) -> futures::stream::Next<'_, Self> {
        StreamExt::next(self)
    }
}

impl<T> Stream for PageStream<T> {
    type Item = Result<T>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.project().stream.poll_next(cx)
    }
}

/// Paginate list methods represented as JSON objects.
///
/// The field names come from the method's
/// [PageDescriptor][crate::descriptor::PageDescriptor].
pub mod json {
    use super::*;
    use crate::descriptor::PageDescriptor;
    use crate::error::Error;
    use crate::message::strip_nulls;
    use serde_json::{Map, Value};

    /// A JSON list request.
    #[derive(Clone, Debug)]
    pub struct JsonRequest {
        body: Value,
        fields: Arc<PageDescriptor>,
    }

    impl JsonRequest {
        /// Creates a request, dropping any `null` members.
        ///
        /// A `null` body is treated as an empty object. Any other body that
        /// is not an object is rejected, as there would be no place to put
        /// the page token.
        pub fn new(mut body: Value, fields: Arc<PageDescriptor>) -> Result<Self> {
            if body.is_null() {
                body = Value::Object(Map::new());
            }
            if !body.is_object() {
                return Err(Error::ser(format!(
                    "a list request must be a JSON object, got {body}"
                )));
            }
            strip_nulls(&mut body);
            Ok(Self { body, fields })
        }

        /// Sets the maximum number of items per page.
        pub fn set_page_size(mut self, v: i32) -> Self {
            if let Some(map) = self.body.as_object_mut() {
                map.insert(self.fields.request_page_size_field.clone(), v.into());
            }
            self
        }

        pub fn body(&self) -> &Value {
            &self.body
        }

        pub fn into_body(self) -> Value {
            self.body
        }
    }

    impl PageableRequest for JsonRequest {
        fn set_page_token(&mut self, token: String) {
            if let Some(map) = self.body.as_object_mut() {
                map.insert(self.fields.request_page_token_field.clone(), token.into());
            }
        }
    }

    /// A JSON list response.
    #[derive(Clone, Debug)]
    pub struct JsonResponse {
        body: Value,
        fields: Arc<PageDescriptor>,
    }

    impl JsonResponse {
        /// Wraps a list response, checking the type of the page fields.
        ///
        /// Missing or `null` fields are treated as an empty page and an empty
        /// token. Fields of any other type are a deserialization error.
        pub fn new(body: Value, fields: Arc<PageDescriptor>) -> Result<Self> {
            let Some(map) = body.as_object() else {
                return Err(Error::deser(format!(
                    "a list response must be a JSON object, got {body}"
                )));
            };
            match map.get(&fields.response_items_field) {
                None | Some(Value::Null) | Some(Value::Array(_)) => {}
                Some(v) => {
                    return Err(Error::deser(format!(
                        "expected an array in `{}`, got {v}",
                        fields.response_items_field
                    )));
                }
            }
            match map.get(&fields.response_page_token_field) {
                None | Some(Value::Null) | Some(Value::String(_)) => {}
                Some(v) => {
                    return Err(Error::deser(format!(
                        "expected a string in `{}`, got {v}",
                        fields.response_page_token_field
                    )));
                }
            }
            Ok(Self { body, fields })
        }

        /// The full response, useful to query fields such as `total_size`.
        pub fn body(&self) -> &Value {
            &self.body
        }
    }

    impl PageableResponse for JsonResponse {
        type PageItem = Value;

        fn items(&self) -> &[Value] {
            self.body
                .get(&self.fields.response_items_field)
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default()
        }

        fn next_page_token(&self) -> String {
            self.body
                .get(&self.fields.response_page_token_field)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        }
    }

    /// Creates an enumerable for a JSON list method.
    ///
    /// Fails if the executor's method has no page descriptor, or if the
    /// request is not a JSON object.
    pub fn paginate<F, Fut>(
        executor: Arc<CallExecutor>,
        request: Value,
        options: RequestOptions,
        transport: F,
    ) -> Result<PagedEnumerable<JsonRequest, JsonResponse>>
    where
        F: Fn(Value, AttemptContext) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<Response<Value>>> + Send + 'static,
    {
        let fields = executor
            .descriptor()
            .page()
            .cloned()
            .map(Arc::new)
            .ok_or_else(|| {
                Error::other(format!(
                    "{} is not a paginated method",
                    executor.descriptor().name()
                ))
            })?;
        let request = JsonRequest::new(request, fields.clone())?;
        let fetch = move |request: JsonRequest| {
            let executor = executor.clone();
            let options = options.clone();
            let transport = transport.clone();
            let fields = fields.clone();
            async move {
                let body = executor
                    .execute(request.into_body(), options, transport)
                    .await?;
                JsonResponse::new(body, fields)
            }
        };
        Ok(PagedEnumerable::new(request, fetch))
    }
}
