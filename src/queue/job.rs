//! Inbound job message and delivery plumbing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::oneshot;

/// A job as it arrives from the queue.
///
/// Fields stay raw strings here; the executor validates them. Missing fields
/// deserialize as empty strings so they surface as validation errors rather
/// than parse errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Job {
    pub operation_id: String,
    pub chain_type: String,
    pub operation_type: String,
    pub from_address: String,
    pub to_address: String,
    pub payload: Map<String, Value>,
    pub idempotency_key: String,
}

/// What the transport should do with a delivery once the worker is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Processed; delete the message.
    Completed,
    /// A copy is in the dead-letter sink; delete the message.
    DeadLettered,
    /// Leave the message for redelivery.
    Released,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Completed => "completed",
            DeliveryOutcome::DeadLettered => "dead_lettered",
            DeliveryOutcome::Released => "released",
        }
    }
}

/// One message handed to the worker pool.
#[derive(Debug)]
pub struct Delivery {
    pub body: String,
    /// Receives the outcome when the transport needs to ack.
    pub ack: Option<oneshot::Sender<DeliveryOutcome>>,
}

impl Delivery {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ack: None,
        }
    }

    /// Delivery plus the receiver its outcome will be reported on.
    pub fn with_ack(body: impl Into<String>) -> (Self, oneshot::Receiver<DeliveryOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                body: body.into(),
                ack: Some(tx),
            },
            rx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_parses_wire_format() {
        let body = r#"{
            "operation_id": "6f1c1b5e-8a3d-4c1e-9b4f-2d7e8a9c0b1d",
            "chain_type": "POLYGON",
            "operation_type": "GET_BALANCE",
            "from_address": "0x1111111111111111111111111111111111111111",
            "to_address": "0x2222222222222222222222222222222222222222",
            "payload": {"note": "x"},
            "idempotency_key": "0b1d6f1c-8a3d-4c1e-9b4f-2d7e8a9c1b5e"
        }"#;
        let job: Job = serde_json::from_str(body).unwrap();
        assert_eq!(job.chain_type, "POLYGON");
        assert_eq!(job.payload.get("note"), Some(&Value::from("x")));
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let job: Job = serde_json::from_str(r#"{"chain_type": "BSC"}"#).unwrap();
        assert_eq!(job.operation_id, "");
        assert!(job.payload.is_empty());
    }

    #[test]
    fn test_ack_channel() {
        let (delivery, mut rx) = Delivery::with_ack("{}");
        delivery.ack.unwrap().send(DeliveryOutcome::Released).unwrap();
        assert_eq!(rx.try_recv().unwrap(), DeliveryOutcome::Released);
    }
}
