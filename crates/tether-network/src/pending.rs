use std::collections::HashMap;

use tether_future::Resolver;
use tether_protocol::RequestToken;

/// Requests sent on one connection that are still waiting for a response.
///
/// Once [`close`](Self::close)d the table refuses new entries, so a request
/// racing with a connection drop is either drained by the close or never
/// registered at all.
pub(crate) struct PendingRequests {
    requests: HashMap<RequestToken, Resolver<String>>,
    open: bool,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            requests: HashMap::new(),
            open: true,
        }
    }

    /// Registers a resolver under `id`. Hands the resolver back if the
    /// table is closed.
    pub fn register(
        &mut self,
        id: RequestToken,
        resolver: Resolver<String>,
    ) -> Result<(), Resolver<String>> {
        if !self.open {
            return Err(resolver);
        }
        self.requests.insert(id, resolver);
        Ok(())
    }

    /// Removes the entry for `id`, handing back its resolver.
    pub fn take(&mut self, id: &RequestToken) -> Option<Resolver<String>> {
        self.requests.remove(id)
    }

    /// Closes the table and drains everything still waiting.
    pub fn close(&mut self) -> Vec<Resolver<String>> {
        self.open = false;
        self.requests.drain().map(|(_, resolver)| resolver).collect()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }
}
