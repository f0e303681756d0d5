//! Named remote methods on top of `syncRequest`.
//!
//! A remote call is an ordinary sync request whose extra fields name a
//! method and carry its arguments:
//!
//! ```text
//! {"state": "<board>", "method": "get_move", "args": {"mark": "X"}}
//! ```
//!
//! [`RemoteTable`] maps method names to typed async handlers;
//! [`RemoteResponder`] plugs a table into a [`SyncClient`](crate::SyncClient).

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::client::SyncResponder;
use crate::error::SyncError;
use crate::payload::SyncEvent;

/// Extra field naming the method a remote call targets.
pub const METHOD_FIELD: &str = "method";
/// Extra field carrying a remote call's arguments.
pub const ARGS_FIELD: &str = "args";

type Handler = Box<dyn Fn(Value) -> BoxFuture<'static, Result<Value, SyncError>> + Send + Sync>;
type StateHook = Box<dyn Fn(&str) + Send + Sync>;

/// The extra fields of a remote call to `method`.
pub fn call_fields(method: &str, args: Value) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert(METHOD_FIELD.to_string(), Value::String(method.to_string()));
    fields.insert(ARGS_FIELD.to_string(), args);
    fields
}

/// Method name → handler.
#[derive(Default)]
pub struct RemoteTable {
    methods: HashMap<String, Handler>,
}

impl fmt::Debug for RemoteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTable")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RemoteTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `name`. Arguments are decoded from the call's `args` field
    /// (`null` when absent, so `()` works for argument-less methods) and
    /// the result is encoded as the reply.
    pub fn register<A, T, F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        T: Serialize + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.methods.insert(
            name.to_string(),
            Box::new(move |args: Value| {
                let handler = Arc::clone(&handler);
                async move {
                    let args: A = serde_json::from_value(args)?;
                    let result = (*handler)(args).await?;
                    Ok(serde_json::to_value(result)?)
                }
                .boxed()
            }),
        );
        self
    }

    /// Whether a method called `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// The registered method names, in no particular order.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Runs the call described by `event`'s extra fields and returns the
    /// JSON-encoded result.
    pub async fn dispatch(&self, event: &SyncEvent) -> Result<String, SyncError> {
        let method = event
            .field(METHOD_FIELD)
            .and_then(Value::as_str)
            .ok_or(SyncError::MissingMethod)?;
        let handler = self
            .methods
            .get(method)
            .ok_or_else(|| SyncError::UnknownMethod(method.to_string()))?;
        let args = event.field(ARGS_FIELD).cloned().unwrap_or(Value::Null);

        let result = handler(args).await?;
        Ok(serde_json::to_string(&result)?)
    }
}

/// A [`SyncResponder`] that answers requests from a [`RemoteTable`].
pub struct RemoteResponder {
    table: RemoteTable,
    on_state: Option<StateHook>,
}

impl RemoteResponder {
    /// Answers requests from `table`, with no state hook.
    pub fn new(table: RemoteTable) -> Self {
        Self {
            table,
            on_state: None,
        }
    }

    /// Runs `hook` with every state the server pushes, before any method
    /// sees the request.
    pub fn on_state(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_state = Some(Box::new(hook));
        self
    }

    /// The table requests are dispatched to.
    pub fn table(&self) -> &RemoteTable {
        &self.table
    }
}

impl SyncResponder for RemoteResponder {
    async fn on_update_state(&self, event: &SyncEvent) -> Result<(), SyncError> {
        if let Some(hook) = &self.on_state {
            hook(&event.state);
        }
        Ok(())
    }

    async fn on_request(&self, event: &SyncEvent) -> Result<String, SyncError> {
        self.table.dispatch(event).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Add {
        a: i64,
        b: i64,
    }

    fn table() -> RemoteTable {
        RemoteTable::new()
            .register("add", |args: Add| async move { Ok(args.a + args.b) })
            .register("ping", |_: ()| async { Ok("pong") })
    }

    fn call(method: &str, args: Value) -> SyncEvent {
        SyncEvent::with_fields("S", call_fields(method, args))
    }

    #[tokio::test]
    async fn test_dispatch_decodes_args_and_encodes_result() {
        let reply = table().dispatch(&call("add", json!({"a": 2, "b": 3}))).await;
        assert_eq!(reply.unwrap(), "5");
    }

    #[tokio::test]
    async fn test_dispatch_without_args_passes_null() {
        let event = SyncEvent::with_fields(
            "S",
            Map::from_iter([(METHOD_FIELD.to_string(), json!("ping"))]),
        );
        let reply = table().dispatch(&event).await;
        assert_eq!(reply.unwrap(), r#""pong""#);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_method_fails() {
        let reply = table().dispatch(&call("sub", Value::Null)).await;
        assert!(matches!(reply, Err(SyncError::UnknownMethod(name)) if name == "sub"));
    }

    #[tokio::test]
    async fn test_dispatch_missing_method_fails() {
        let reply = table().dispatch(&SyncEvent::new("S")).await;
        assert!(matches!(reply, Err(SyncError::MissingMethod)));
    }

    #[tokio::test]
    async fn test_dispatch_bad_args_fails() {
        let reply = table().dispatch(&call("add", json!({"a": "two"}))).await;
        assert!(matches!(reply, Err(SyncError::InvalidPayload(_))));
    }

    #[tokio::test]
    async fn test_responder_runs_state_hook_first() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let responder = RemoteResponder::new(table())
            .on_state(move |state: &str| log.lock().unwrap().push(state.to_string()));

        let event = call("ping", Value::Null);
        responder.on_update_state(&event).await.unwrap();
        let reply = responder.on_request(&event).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["S".to_string()]);
        assert_eq!(reply, r#""pong""#);
    }
}
