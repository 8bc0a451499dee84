//! Batch many structurally-identical GraphQL queries into single aliased
//! requests and page through each sub-query's results independently.
//!
//! The caller supplies a query template with `{field}` placeholders (plus a
//! reserved `{after}` slot for the pagination cursor), one parameter set per
//! desired sub-query, and a transport function; [`multi_query()`] renders the
//! sub-queries under stable aliases (`Q0`, `Q1`, …), groups them into batches,
//! and keeps re-sending each batch, minus the aliases that ran out of pages,
//! until everything is drained, yielding one `data` payload per round.
//!
//! ```no_run
//! use gqlmulti::{Client, ParamSet, DEFAULT_BATCH_SIZE};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::with_token("https://api.github.com/graphql", "hunter2")?;
//!     let template = r#"repository(owner: "{owner}", name: "{name}") {{
//!         collaborators(first: 100{after}) {{
//!             nodes {{ login }}
//!             pageInfo {{ hasNextPage endCursor }}
//!         }}
//!     }}"#;
//!     let repos = [("jd", "foo"), ("jd", "bar")].map(|(owner, name)| {
//!         ParamSet::from([("owner".into(), owner.into()), ("name".into(), name.into())])
//!     });
//!     for round in client.multi_query(
//!         template,
//!         repos,
//!         Some(vec!["collaborators".into(), "pageInfo".into()]),
//!         DEFAULT_BATCH_SIZE,
//!     )? {
//!         let data = round?;
//!         println!("{data:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! The pagination driver itself never touches the network; see
//! [`QueryMachine`] for pumping it against a suspending transport.
mod multi;
mod template;
mod types;
pub use crate::multi::*;
pub use crate::template::*;
pub use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroUsize;
use thiserror::Error;
use ureq::{
    http::{
        header::{HeaderValue, InvalidHeaderValue},
        Request,
    },
    middleware::MiddlewareNext,
    Agent, SendBody,
};

static USER_AGENT: &str = concat!(
    env!("CARGO_PKG_NAME"),
    "/",
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("CARGO_PKG_REPOSITORY"),
    ")",
);

/// Blocking HTTP transport for a GraphQL endpoint, usable as the send
/// function behind [`multi_query()`]
#[derive(Clone, Debug)]
pub struct Client {
    inner: Agent,
    url: String,
}

impl Client {
    pub fn new(url: &str) -> Client {
        Client::build(url.to_owned(), None)
    }

    /// Like [`Client::new()`], but every request carries
    /// `Authorization: Bearer <token>`
    pub fn with_token(url: &str, token: &str) -> Result<Client, BuildClientError> {
        let auth = HeaderValue::from_str(&format!("Bearer {token}"))?;
        Ok(Client::build(url.to_owned(), Some(auth)))
    }

    fn build(url: String, auth: Option<HeaderValue>) -> Client {
        let mut config = Agent::config_builder()
            .https_only(true)
            .user_agent(USER_AGENT);
        if let Some(auth) = auth {
            config = config.middleware(
                move |mut req: Request<SendBody<'_>>, next: MiddlewareNext<'_>| {
                    let _ = req.headers_mut().insert("Authorization", auth.clone());
                    next.handle(req)
                },
            );
        }
        Client {
            inner: config.build().into(),
            url,
        }
    }

    /// Sends one composite document and returns the decoded response.
    ///
    /// GraphQL-level errors reported by the server are surfaced as
    /// [`QueryError::GraphQL`].
    pub fn send(&self, document: &str) -> Result<Response, QueryError> {
        let bytes = self
            .inner
            .post(&self.url)
            .send_json(DocumentPayload {
                query: document.to_owned(),
            })
            .map_err(|e| QueryError::Http(Box::new(e)))?
            .into_body()
            .read_to_vec()
            .map_err(|e| QueryError::Read(Box::new(e)))?;
        serde_json::from_slice::<RawResponse>(&bytes)?
            .into_response()
            .map_err(Into::into)
    }

    /// [`multi_query()`] with this client as the transport
    pub fn multi_query<I>(
        &self,
        template: &str,
        parameter_sets: I,
        pageinfo_path: Option<Vec<String>>,
        max_batch_size: NonZeroUsize,
    ) -> Result<
        QueryResults<MultiQuery, impl FnMut(&str) -> Result<Response, QueryError>, QueryError>,
        BuildError,
    >
    where
        I: IntoIterator<Item = ParamSet>,
    {
        multi_query(
            template,
            parameter_sets,
            |document| self.send(document),
            pageinfo_path,
            max_batch_size,
        )
    }
}

/// Iterator that pumps a [`QueryMachine`] against a transport function.
///
/// Each round sends the machine's next document and yields the machine's
/// output for it.  The first transport or pagination error is yielded after
/// any output the machine produced for that round, and the iterator then
/// fuses; dropping the iterator early issues no further requests.
#[allow(missing_debug_implementations)]
pub struct QueryResults<Q: QueryMachine, S, E> {
    machine: Q,
    send: S,
    document: Option<String>,
    yielding: VecDeque<Q::Output>,
    failed: Option<MultiQueryError<E>>,
    done: bool,
}

impl<Q: QueryMachine, S, E> QueryResults<Q, S, E> {
    pub fn new(machine: Q, send: S) -> Self {
        QueryResults {
            machine,
            send,
            document: None,
            yielding: VecDeque::new(),
            failed: None,
            done: false,
        }
    }
}

impl<Q, S, E> Iterator for QueryResults<Q, S, E>
where
    Q: QueryMachine,
    S: FnMut(&str) -> Result<Response, E>,
{
    type Item = Result<Q::Output, MultiQueryError<E>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(value) = self.yielding.pop_front() {
                return Some(Ok(value));
            } else if let Some(e) = self.failed.take() {
                self.done = true;
                return Some(Err(e));
            } else if self.done {
                return None;
            } else if let Some(document) = self.document.take() {
                match (self.send)(&document) {
                    Ok(response) => {
                        if let Err(e) = self.machine.handle_response(response) {
                            self.failed = Some(MultiQueryError::Pagination(e));
                        }
                    }
                    Err(e) => self.failed = Some(MultiQueryError::Transport(e)),
                }
                self.yielding.extend(self.machine.get_output());
            } else if let Some(document) = self.machine.get_next_query() {
                self.document = Some(document);
            } else {
                self.done = true;
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildClientError {
    #[error("invalid authorization token")]
    Auth(#[from] InvalidHeaderValue),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("failed to perform GraphQL request")]
    Http(#[source] Box<ureq::Error>),
    #[error("failed to read GraphQL response")]
    Read(#[source] Box<ureq::Error>),
    #[error("failed to deserialize GraphQL response")]
    Json(#[from] serde_json::Error),
    #[error("GraphQL server returned error response")]
    GraphQL(#[from] GqlError),
}

/// Error yielded through a [`QueryResults`] stream: either whatever the
/// transport raised, propagated untouched, or a pagination failure from the
/// machine
#[derive(Debug, Error)]
pub enum MultiQueryError<E> {
    #[error("failed to send composite document")]
    Transport(#[source] E),
    #[error(transparent)]
    Pagination(#[from] PaginationError),
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
struct DocumentPayload {
    query: String,
}

#[derive(Clone, Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    data: Option<JsonMap>,
    #[serde(default)]
    errors: GqlError,
}

impl RawResponse {
    fn into_response(self) -> Result<Response, GqlError> {
        if self.errors.is_empty() {
            Ok(Response { data: self.data })
        } else {
            Err(self.errors)
        }
    }
}

/// The `errors` list of a GraphQL response
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct GqlError(Vec<GqlInnerError>);

impl GqlError {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for GqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Query errored:")?;
        let mut first = true;
        for e in &self.0 {
            if !std::mem::take(&mut first) {
                writeln!(f, "---")?;
            }
            if let Some(ref t) = e.err_type {
                writeln!(f, "    Type: {t}")?;
            }
            writeln!(f, "    Message: {}", e.message)?;
            if let Some(ref p) = e.path {
                writeln!(f, "    Path: {p:?}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for GqlError {}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
struct GqlInnerError {
    #[serde(default, rename = "type")]
    err_type: Option<String>,
    message: String,
    #[serde(default)]
    path: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    #[test]
    fn raw_response_with_data() {
        let raw = serde_json::from_str::<RawResponse>(
            r#"{"data": {"Q0": {"name": "foo"}, "Q1": {"name": "bar"}}}"#,
        )
        .unwrap();
        let response = raw.into_response().unwrap();
        let data = response.data.unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data["Q0"], serde_json::json!({"name": "foo"}));
    }

    #[test]
    fn raw_response_without_data() {
        let raw = serde_json::from_str::<RawResponse>("{}").unwrap();
        let response = raw.into_response().unwrap();
        assert_eq!(response, Response { data: None });
    }

    #[test]
    fn raw_response_with_errors() {
        let raw = serde_json::from_str::<RawResponse>(
            r#"{
                "data": null,
                "errors": [
                    {
                        "type": "NOT_FOUND",
                        "message": "Could not resolve to a Repository",
                        "path": ["Q1"]
                    }
                ]
            }"#,
        )
        .unwrap();
        let e = assert_matches!(raw.into_response(), Err(e) => e);
        assert_eq!(
            e.to_string(),
            concat!(
                "Query errored:\n",
                "    Type: NOT_FOUND\n",
                "    Message: Could not resolve to a Repository\n",
                "    Path: [\"Q1\"]\n",
            )
        );
    }
}
