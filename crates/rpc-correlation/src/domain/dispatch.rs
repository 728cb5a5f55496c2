//! Typed commands and the action -> handler table used by consumers.

use crate::error::{ConfigError, DispatchError};
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_types::ContentType;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, error};

/// A request type with a fixed action name and reply type.
pub trait RpcCommand: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Action name carried in the request headers.
    const ACTION: &'static str;

    type Reply: Serialize + DeserializeOwned + Send + Sync + 'static;
}

/// Handles one command type.
#[async_trait]
pub trait CommandHandler<C: RpcCommand>: Send + Sync + 'static {
    async fn handle(&self, command: C) -> anyhow::Result<C::Reply>;
}

/// Adapter turning an async closure into a [`CommandHandler`].
pub struct FnHandler<F>(F);

/// Wrap `f` as a handler.
pub fn handler_fn<F>(f: F) -> FnHandler<F> {
    FnHandler(f)
}

#[async_trait]
impl<C, F, Fut> CommandHandler<C> for FnHandler<F>
where
    C: RpcCommand,
    F: Fn(C) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<C::Reply>> + Send + 'static,
{
    async fn handle(&self, command: C) -> anyhow::Result<C::Reply> {
        (self.0)(command).await
    }
}

/// Handler with the command type erased to bytes in, bytes out.
#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    async fn invoke(&self, content_type: ContentType, payload: Bytes)
        -> Result<Bytes, DispatchError>;
}

struct TypedHandler<C, H> {
    handler: Arc<H>,
    _command: PhantomData<fn(C)>,
}

#[async_trait]
impl<C, H> ErasedHandler for TypedHandler<C, H>
where
    C: RpcCommand,
    H: CommandHandler<C>,
{
    async fn invoke(
        &self,
        content_type: ContentType,
        payload: Bytes,
    ) -> Result<Bytes, DispatchError> {
        let action = C::ACTION;
        let command: C =
            content_type
                .decode(&payload)
                .map_err(|source| DispatchError::Deserialization {
                    action: action.to_string(),
                    source,
                })?;

        // Run on its own task so a panic comes back as a JoinError.
        let handler = Arc::clone(&self.handler);
        let outcome = tokio::spawn(async move { handler.handle(command).await }).await;

        let reply = match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                debug!(action, error = %err, "Handler returned an error");
                return Err(DispatchError::HandlerFailed {
                    action: action.to_string(),
                    message: format!("{err:#}"),
                });
            }
            Err(join) if join.is_panic() => {
                error!(action, "Handler panicked");
                return Err(DispatchError::HandlerPanicked {
                    action: action.to_string(),
                });
            }
            Err(_) => {
                return Err(DispatchError::HandlerFailed {
                    action: action.to_string(),
                    message: "handler task was aborted".to_string(),
                });
            }
        };

        content_type
            .encode(&reply)
            .map_err(|source| DispatchError::Serialization {
                action: action.to_string(),
                source,
            })
    }
}

/// Immutable action -> handler table.
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: HashMap<String, Arc<dyn ErasedHandler>>,
}

impl DispatchTable {
    pub fn builder() -> DispatchTableBuilder {
        DispatchTableBuilder::default()
    }

    pub fn contains(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Route a request body to its handler and encode the result.
    pub async fn dispatch(
        &self,
        action: Option<&str>,
        content_type: ContentType,
        payload: Bytes,
    ) -> Result<Bytes, DispatchError> {
        let action = action.ok_or(DispatchError::MissingAction)?;
        let handler = self
            .handlers
            .get(action)
            .ok_or_else(|| DispatchError::HandlerNotFound {
                action: action.to_string(),
            })?;
        handler.invoke(content_type, payload).await
    }
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut actions: Vec<_> = self.actions().collect();
        actions.sort_unstable();
        f.debug_struct("DispatchTable")
            .field("actions", &actions)
            .finish()
    }
}

/// Builder for [`DispatchTable`].
#[derive(Default)]
pub struct DispatchTableBuilder {
    handlers: HashMap<String, Arc<dyn ErasedHandler>>,
    duplicate: Option<String>,
}

impl DispatchTableBuilder {
    /// Register `handler` for `C::ACTION`.
    #[must_use]
    pub fn handler<C, H>(mut self, handler: H) -> Self
    where
        C: RpcCommand,
        H: CommandHandler<C>,
    {
        let erased: Arc<dyn ErasedHandler> = Arc::new(TypedHandler::<C, H> {
            handler: Arc::new(handler),
            _command: PhantomData,
        });
        if self
            .handlers
            .insert(C::ACTION.to_string(), erased)
            .is_some()
            && self.duplicate.is_none()
        {
            self.duplicate = Some(C::ACTION.to_string());
        }
        self
    }

    /// Register an async closure for `C::ACTION`.
    #[must_use]
    pub fn handle<C, F, Fut>(self, f: F) -> Self
    where
        C: RpcCommand,
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<C::Reply>> + Send + 'static,
    {
        self.handler::<C, _>(handler_fn(f))
    }

    pub fn build(self) -> Result<DispatchTable, ConfigError> {
        if let Some(action) = self.duplicate {
            return Err(ConfigError::DuplicateHandler(action));
        }
        Ok(DispatchTable {
            handlers: self.handlers,
        })
    }
}
