use crate::template::{Rendered, Template, TemplateError};
use crate::types::{JsonMap, PageInfo, ParamSet, Response};
use crate::QueryResults;
use serde::Deserialize;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use thiserror::Error;

#[allow(unsafe_code)]
// SAFETY: 100 != 0
pub const DEFAULT_BATCH_SIZE: NonZeroUsize = unsafe { NonZeroUsize::new_unchecked(100) };

/// A query state machine that produces request documents and digests their
/// responses without performing any I/O itself.
///
/// [`QueryResults`] pumps a machine against a blocking transport closure.  A
/// caller whose transport suspends instead drives the same machine by hand:
/// call [`get_next_query()`][QueryMachine::get_next_query], await the send,
/// feed the reply to [`handle_response()`][QueryMachine::handle_response],
/// drain [`get_output()`][QueryMachine::get_output], and repeat until no
/// document is left.  All bookkeeping is synchronous; the machine is the sole
/// owner of its state.
pub trait QueryMachine {
    type Output;

    /// Returns the document to send for the next round, or `None` once
    /// everything is drained.  Calling this again before feeding a response
    /// returns the same round's document.
    fn get_next_query(&mut self) -> Option<String>;

    /// Digests the response to the most recently issued document.
    ///
    /// After an error the machine is spent; discard it.
    fn handle_response(&mut self, response: Response) -> Result<(), PaginationError>;

    /// Drains whatever the machine has produced so far
    fn get_output(&mut self) -> Vec<Self::Output>;
}

/// Drives many renditions of one template through batched, aliased,
/// cursor-paginated rounds.
///
/// Each parameter set becomes an aliased sub-query (`Q0`, `Q1`, …, in input
/// order; an alias sticks to its sub-query for the whole run).  Aliases are
/// partitioned into batches of at most `max_batch_size`, and batches are
/// processed strictly one after another: a batch's aliases are re-sent, each
/// with its latest cursor spliced into the `{after}` slot, until every one
/// of them reports no further page, then the next batch starts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MultiQuery {
    pending: VecDeque<Vec<SubQuery>>,
    current: Vec<SubQuery>,
    pageinfo_path: Option<Vec<String>>,
    results: Vec<JsonMap>,
}

impl MultiQuery {
    /// Renders one sub-query per parameter set and partitions them into
    /// batches.
    ///
    /// Fails before anything is sent if `pageinfo_path` is given but
    /// `template` has no `{after}` slot, or if a parameter set lacks a field
    /// the template names.
    pub fn new<I>(
        template: &Template,
        parameter_sets: I,
        pageinfo_path: Option<Vec<String>>,
        max_batch_size: NonZeroUsize,
    ) -> Result<MultiQuery, BuildError>
    where
        I: IntoIterator<Item = ParamSet>,
    {
        if pageinfo_path.is_some() && !template.has_cursor_slot() {
            return Err(BuildError::NoCursorSlot);
        }
        let subqueries = render_subqueries(template, parameter_sets)?;
        Ok(MultiQuery {
            pending: into_batches(subqueries, max_batch_size),
            current: Vec::new(),
            pageinfo_path,
            results: Vec::new(),
        })
    }

    /// Retires finished aliases and splices fresh cursors into the rest.
    ///
    /// The next active set is built as a new collection rather than by
    /// deleting from the old one mid-iteration.  An alias the response does
    /// not mention is treated as exhausted.
    fn advance(
        current: &mut Vec<SubQuery>,
        path: &[String],
        data: &JsonMap,
    ) -> Result<(), PaginationError> {
        let mut active = Vec::with_capacity(current.len());
        for mut sub in std::mem::take(current) {
            let Some(result) = data.get(&sub.alias) else {
                continue;
            };
            let info = locate_pageinfo(result, path)?;
            if info.has_next_page {
                if let Some(ref cursor) = info.end_cursor {
                    sub.cursor = format!(" after: \"{cursor}\" ");
                }
                active.push(sub);
            }
        }
        *current = active;
        Ok(())
    }
}

impl QueryMachine for MultiQuery {
    type Output = JsonMap;

    fn get_next_query(&mut self) -> Option<String> {
        if self.current.is_empty() {
            self.current = self.pending.pop_front()?;
        }
        Some(compose(self.current.iter().map(|sub| {
            (sub.alias.as_str(), sub.rendered.with_cursor(&sub.cursor))
        })))
    }

    fn handle_response(&mut self, response: Response) -> Result<(), PaginationError> {
        let Some(data) = response.data.filter(|data| !data.is_empty()) else {
            // The server's way of saying the batch has nothing more; the
            // remaining aliases are dropped without a word.
            self.current.clear();
            return Ok(());
        };
        let advanced = if let Some(path) = self.pageinfo_path.as_deref() {
            Self::advance(&mut self.current, path, &data)
        } else {
            // Single-page mode: one round per batch.
            self.current.clear();
            Ok(())
        };
        // The round's payload is delivered even when cursor extraction just
        // failed; everything yielded before the error stays valid.
        self.results.push(data);
        advanced
    }

    fn get_output(&mut self) -> Vec<JsonMap> {
        self.results.drain(..).collect()
    }
}

/// One aliased sub-query together with the cursor fragment to splice into its
/// pagination slot on the next round
#[derive(Clone, Debug, Eq, PartialEq)]
struct SubQuery {
    alias: String,
    rendered: Rendered,
    cursor: String,
}

fn render_subqueries<I>(
    template: &Template,
    parameter_sets: I,
) -> Result<Vec<SubQuery>, TemplateError>
where
    I: IntoIterator<Item = ParamSet>,
{
    parameter_sets
        .into_iter()
        .enumerate()
        .map(|(i, params)| {
            Ok(SubQuery {
                alias: format!("Q{i}"),
                rendered: template.render(&params)?,
                cursor: String::new(),
            })
        })
        .collect()
}

fn into_batches(subqueries: Vec<SubQuery>, max_batch_size: NonZeroUsize) -> VecDeque<Vec<SubQuery>> {
    let mut batches = VecDeque::with_capacity(subqueries.len().div_ceil(max_batch_size.get()));
    let mut iter = subqueries.into_iter();
    loop {
        let batch = iter
            .by_ref()
            .take(max_batch_size.get())
            .collect::<Vec<_>>();
        if batch.is_empty() {
            break;
        }
        batches.push_back(batch);
    }
    batches
}

/// Wraps prefixed sub-queries into one composite document
fn compose<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    let mut document = String::from("{\n");
    let mut first = true;
    for (alias, text) in parts {
        if !std::mem::take(&mut first) {
            document.push('\n');
        }
        document.push_str(alias);
        document.push_str(": ");
        document.push_str(&text);
    }
    document.push_str("\n}");
    document
}

fn locate_pageinfo(
    result: &serde_json::Value,
    path: &[String],
) -> Result<PageInfo, PaginationError> {
    let mut value = result;
    for key in path {
        value = value
            .get(key)
            .ok_or_else(|| PaginationError::MissingKey(key.clone()))?;
    }
    PageInfo::deserialize(value).map_err(PaginationError::PageInfo)
}

/// Builds the composite documents for `parameter_sets` without sending
/// anything: one document per batch, each sub-query rendered single-page
/// (empty cursor slot).
pub fn build_multi_query<I>(
    template: &str,
    parameter_sets: I,
    max_batch_size: NonZeroUsize,
) -> Result<Vec<String>, BuildError>
where
    I: IntoIterator<Item = ParamSet>,
{
    let template = Template::parse(template)?;
    let subqueries = render_subqueries(&template, parameter_sets)?;
    Ok(into_batches(subqueries, max_batch_size)
        .into_iter()
        .map(|batch| {
            compose(
                batch
                    .iter()
                    .map(|sub| (sub.alias.as_str(), sub.rendered.with_cursor(""))),
            )
        })
        .collect())
}

/// Renders `template` once per parameter set and drives the whole collection
/// through batched pagination rounds, sending each round's composite document
/// through `send_fn`.
///
/// The returned iterator yields one `data` payload per round, keyed by alias,
/// as soon as the round's response arrives; dropping it early stops all
/// further requests.  With `pageinfo_path = None` every batch is sent exactly
/// once; otherwise the path names the keys leading to each alias's
/// [`PageInfo`] object, and aliases are re-sent with their `endCursor`
/// spliced into the `{after}` slot until `hasNextPage` goes false.
pub fn multi_query<I, S, E>(
    template: &str,
    parameter_sets: I,
    send_fn: S,
    pageinfo_path: Option<Vec<String>>,
    max_batch_size: NonZeroUsize,
) -> Result<QueryResults<MultiQuery, S, E>, BuildError>
where
    I: IntoIterator<Item = ParamSet>,
    S: FnMut(&str) -> Result<Response, E>,
{
    let template = Template::parse(template)?;
    let machine = MultiQuery::new(&template, parameter_sets, pageinfo_path, max_batch_size)?;
    Ok(QueryResults::new(machine, send_fn))
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no {{after}} placeholder found in query template")]
    NoCursorSlot,
    #[error(transparent)]
    Template(#[from] TemplateError),
}

#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("unable to find pagination key {0:?} in response")]
    MissingKey(String),
    #[error("malformed pagination info in response")]
    PageInfo(#[source] serde_json::Error),
}
