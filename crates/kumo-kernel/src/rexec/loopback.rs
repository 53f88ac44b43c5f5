//! In-process channel straight into a [`Dispatcher`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{Dispatcher, RemoteError, RemoteExec};

/// Sends commands to a dispatcher in the same process.
///
/// Payloads still go through a JSON round trip so both sides see exactly
/// what a real channel would carry.
#[derive(Debug, Clone)]
pub struct LoopbackExec {
    dispatcher: Arc<Dispatcher>,
}

impl LoopbackExec {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl RemoteExec for LoopbackExec {
    async fn exec(&self, command: &str, options: Value) -> Result<Value, RemoteError> {
        let options: Value = serde_json::from_str(&options.to_string())
            .map_err(|e| RemoteError::transport(e.to_string()))?;
        let reply = self.dispatcher.dispatch(command, options).await?;
        serde_json::from_str(&reply.to_string()).map_err(|e| RemoteError::transport(e.to_string()))
    }
}
