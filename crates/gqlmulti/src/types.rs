use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// One set of values for a template's named placeholders
pub type ParamSet = HashMap<String, String>;

/// An opaque position token inside a paginated result set
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pagination bookkeeping located at the configured key path inside each
/// alias's result
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub end_cursor: Option<Cursor>,
    pub has_next_page: bool,
}

/// A GraphQL response as seen by the pagination driver.
///
/// A transport function reduces whatever it receives from the server to this:
/// the `data` mapping from alias to per-query result, or `None` when the
/// server sent no data.  An absent (or empty) `data` payload is the normal
/// end-of-data signal for the batch in flight, not an error.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct Response {
    #[serde(default)]
    pub data: Option<JsonMap>,
}
