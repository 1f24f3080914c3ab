//! Host process queries and raw sends.

use std::time::Duration;

use crate::bridge::protocol::{Envelope, Payload};
use crate::bridge::value::Value;
use crate::invoke::{Channel, Invoke, InvokeError, InvokeOptions};

pub const GET_PROCESS_INFO: &str = "getProcessInfo";

const PROCESS_INFO_TIMEOUT: Duration = Duration::from_secs(5);

/// Host process details, best-effort: any failure yields `None`.
pub async fn process_info(invoker: &dyn Invoke) -> Option<Payload> {
    let options = InvokeOptions::new().with_timeout(PROCESS_INFO_TIMEOUT);
    match invoker.invoke(GET_PROCESS_INFO, vec![], options).await {
        Ok(info) => Some(info),
        Err(e) => {
            tracing::debug!(error = %e, "Process info unavailable");
            None
        }
    }
}

/// Send a raw command payload over the one-shot channel.
pub async fn send_raw(
    invoker: &dyn Invoke,
    cmd: &str,
    payload: Value,
) -> Result<Payload, InvokeError> {
    invoker
        .exchange(Envelope::send(cmd, payload), Channel::OneShot)
        .await
}

/// Announce `data` to the host over the persistent channel.
pub async fn broadcast(invoker: &dyn Invoke, data: Payload) -> Result<Payload, InvokeError> {
    invoker
        .exchange(Envelope::broadcast(data), Channel::Persistent)
        .await
}
