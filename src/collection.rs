//! Collection traversal and eventual-consistency polling
//!
//! Servers are free to apply side effects asynchronously, so assertions
//! about collection contents poll a bounded number of times before failing.

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use serde_json::Value;

use crate::client::ActorClient;
use crate::config::PollingConfig;
use crate::error::{HarnessError, Result};
use crate::metrics::POLL_ATTEMPTS_TOTAL;
use crate::vocab::get_id;

/// Keys that can hold collection members; both are read regardless of type
const ITEM_KEYS: [&str; 2] = ["items", "orderedItems"];

/// One fetched collection or collection page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionPage {
    pub uri: String,
    /// Member URIs in document order; members without an id are skipped
    pub items: Vec<String>,
    pub first: Option<String>,
    pub next: Option<String>,
}

impl CollectionPage {
    pub fn from_document(uri: &str, document: &Value) -> Self {
        let items = ITEM_KEYS
            .iter()
            .filter_map(|key| document.get(*key))
            .flat_map(|members| match members {
                Value::Array(members) => members.iter().collect::<Vec<_>>(),
                member => vec![member],
            })
            .filter_map(get_id)
            .map(str::to_string)
            .collect();

        Self {
            uri: uri.to_string(),
            items,
            first: document.get("first").and_then(get_id).map(str::to_string),
            next: document.get("next").and_then(get_id).map(str::to_string),
        }
    }
}

/// Lazy depth-first walk over a collection and its pages
///
/// A page's items come before those of its `first` chain, which come before
/// its `next` chain. Each URI is fetched at most once. A fetch error ends
/// the walk after being yielded.
pub struct CollectionPages<'a> {
    client: &'a dyn ActorClient,
    pending: Vec<String>,
    visited: HashSet<String>,
}

impl Iterator for CollectionPages<'_> {
    type Item = Result<CollectionPage>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let uri = self.pending.pop()?;
            if !self.visited.insert(uri.clone()) {
                tracing::debug!(%uri, "Skipping already visited collection page");
                continue;
            }

            let document = match self.client.get_json(&uri) {
                Ok(document) => document,
                Err(error) => {
                    self.pending.clear();
                    return Some(Err(error));
                }
            };
            let page = CollectionPage::from_document(&uri, &document);

            // Stack: push `next` first so the `first` chain is walked before it
            if let Some(next) = &page.next {
                self.pending.push(next.clone());
            }
            if let Some(first) = &page.first {
                self.pending.push(first.clone());
            }
            return Some(Ok(page));
        }
    }
}

/// Pages reachable from `uri`
pub fn collection_pages<'a>(client: &'a dyn ActorClient, uri: &str) -> CollectionPages<'a> {
    CollectionPages {
        client,
        pending: vec![uri.to_string()],
        visited: HashSet::new(),
    }
}

/// Member URIs of a collection, following `first` and `next` links
///
/// Stops fetching once `max_count` URIs have been collected.
pub fn collect_item_uris(
    client: &dyn ActorClient,
    uri: &str,
    max_count: Option<usize>,
) -> Result<Vec<String>> {
    let mut uris = Vec::new();
    for page in collection_pages(client, uri) {
        uris.extend(page?.items);
        if let Some(max_count) = max_count {
            if uris.len() >= max_count {
                uris.truncate(max_count);
                break;
            }
        }
    }
    Ok(uris)
}

/// Result of a bounded poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    /// Member URIs from the last fetch
    pub uris: Vec<String>,
    pub attempts: u32,
    pub satisfied: bool,
}

/// Re-reads a collection until a predicate holds or tries run out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventualConsistencyPoller {
    pub tries: u32,
    pub period: Duration,
}

impl Default for EventualConsistencyPoller {
    fn default() -> Self {
        Self {
            tries: 5,
            period: Duration::from_secs(1),
        }
    }
}

impl EventualConsistencyPoller {
    pub fn new(tries: u32, period: Duration) -> Self {
        Self { tries, period }
    }

    pub fn from_config(config: &PollingConfig) -> Self {
        Self::new(config.tries, config.period())
    }

    /// Poll until `predicate` accepts the member URIs
    ///
    /// Sleeps `period` between attempts (not after the last one). When the
    /// predicate never holds, the last fetch is returned with
    /// `satisfied = false`. Fetch errors end the poll immediately.
    pub fn poll_until<F>(&self, client: &dyn ActorClient, uri: &str, predicate: F) -> Result<PollOutcome>
    where
        F: Fn(&[String]) -> bool,
    {
        let tries = self.tries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let uris = collect_item_uris(client, uri, None)?;
            let satisfied = predicate(&uris);
            tracing::debug!(%uri, attempt, satisfied, items = uris.len(), "Polled collection");

            if satisfied || attempt >= tries {
                let outcome = if satisfied { "satisfied" } else { "exhausted" };
                POLL_ATTEMPTS_TOTAL.with_label_values(&[outcome]).inc();
                return Ok(PollOutcome {
                    uris,
                    attempts: attempt,
                    satisfied,
                });
            }
            POLL_ATTEMPTS_TOTAL.with_label_values(&["retry"]).inc();
            thread::sleep(self.period);
        }
    }

    /// Poll until `item` is a member of the collection
    ///
    /// # Errors
    /// `NotObserved` if the item never shows up
    pub fn assert_eventually_contains(
        &self,
        client: &dyn ActorClient,
        uri: &str,
        item: &str,
    ) -> Result<Vec<String>> {
        let outcome = self.poll_until(client, uri, |uris| uris.iter().any(|u| u == item))?;
        if outcome.satisfied {
            Ok(outcome.uris)
        } else {
            Err(HarnessError::NotObserved {
                what: format!("{} in collection {}", item, uri),
                attempts: outcome.attempts,
            })
        }
    }

    /// Poll until `item` is no longer a member of the collection
    pub fn assert_eventually_absent(
        &self,
        client: &dyn ActorClient,
        uri: &str,
        item: &str,
    ) -> Result<Vec<String>> {
        let outcome = self.poll_until(client, uri, |uris| !uris.iter().any(|u| u == item))?;
        if outcome.satisfied {
            Ok(outcome.uris)
        } else {
            Err(HarnessError::NotObserved {
                what: format!("{} removed from collection {}", item, uri),
                attempts: outcome.attempts,
            })
        }
    }
}
