use async_trait::async_trait;
use core_types::{ClientId, IdempotencyToken, InstrumentId, OrderAck, OrderStatus, OrderTicket};
use rust_decimal::Decimal;
use std::time::Duration;
use uuid::Uuid;

pub mod error;
pub mod paper;
pub mod types;

// Re-export public types
pub use error::{Error, Result};
pub use paper::PaperGateway;
pub use types::{GatewaySettings, PaperSettings};

/// The universal interface to an order execution venue.
///
/// A gateway takes a validated `OrderTicket` and submits it to a target,
/// which could be a live broker or the paper venue. Submissions carry a
/// client-assigned idempotency token: resubmitting the same token must never
/// create a second live order for the same intended action.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// The name of the gateway (e.g., "PaperGateway").
    fn name(&self) -> &'static str;

    /// Submits an order and waits for the venue's acknowledgment.
    async fn submit(&self, client: &ClientId, ticket: &OrderTicket) -> Result<OrderAck>;

    /// Actively cancels a previously submitted order.
    async fn cancel(&self, client: &ClientId, order_id: &str) -> Result<OrderStatus>;

    /// The venue's record of open quantity for a pair, signed (positive =
    /// long). This is the source of truth during restart reconciliation.
    async fn open_quantity(&self, client: &ClientId, instrument: &InstrumentId)
    -> Result<Decimal>;

    /// Informs the gateway of the latest traded price. Venues that price
    /// market orders locally (the paper venue) use it as the fill reference;
    /// live gateways ignore it.
    fn note_tick(&self, _instrument: &InstrumentId, _price: Decimal) {}
}

/// Mints a fresh idempotency token for one intended order action.
pub fn new_token() -> IdempotencyToken {
    IdempotencyToken(Uuid::new_v4().to_string())
}

/// Submits a ticket with bounded retries.
///
/// Every attempt reuses the ticket's idempotency token, so a timed-out
/// submission that actually reached the venue is recognized there instead of
/// doubling up. A rejection is returned immediately (the signal has to be
/// re-evaluated, not the order re-sent); timeouts and transient gateway
/// failures are retried with a linear backoff up to
/// `settings.max_attempts`, after which `Error::Timeout` reports the token
/// and attempt count so the position can be marked stuck.
pub async fn submit_with_retry(
    gateway: &dyn OrderGateway,
    client: &ClientId,
    ticket: &OrderTicket,
    settings: &GatewaySettings,
) -> Result<OrderAck> {
    let ack_timeout = Duration::from_millis(settings.ack_timeout_ms);
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match tokio::time::timeout(ack_timeout, gateway.submit(client, ticket)).await {
            Ok(Ok(ack)) => return Ok(ack),
            Ok(Err(err @ Error::Rejected { .. })) => return Err(err),
            Ok(Err(err)) => {
                if attempt >= settings.max_attempts {
                    return Err(err);
                }
                tracing::warn!(
                    client = %client,
                    token = %ticket.token,
                    attempt,
                    error = %err,
                    "Order submission failed. Retrying with the same token."
                );
            }
            Err(_elapsed) => {
                if attempt >= settings.max_attempts {
                    return Err(Error::Timeout {
                        token: ticket.token.clone(),
                        attempts: attempt,
                    });
                }
                tracing::warn!(
                    client = %client,
                    token = %ticket.token,
                    attempt,
                    "Order acknowledgment timed out. Retrying with the same token."
                );
            }
        }
        tokio::time::sleep(Duration::from_millis(settings.backoff_ms * attempt as u64)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::Side;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ticket() -> OrderTicket {
        OrderTicket {
            instrument: InstrumentId("NSE:ACME".into()),
            side: Side::Long,
            quantity: dec!(10),
            price: None,
            token: new_token(),
        }
    }

    fn settings() -> GatewaySettings {
        GatewaySettings {
            ack_timeout_ms: 20,
            max_attempts: 3,
            backoff_ms: 1,
        }
    }

    /// Fails with a transient error for the first `failures` submissions.
    struct FlakyGateway {
        calls: AtomicU32,
        failures: u32,
    }

    #[async_trait]
    impl OrderGateway for FlakyGateway {
        fn name(&self) -> &'static str {
            "FlakyGateway"
        }

        async fn submit(&self, _client: &ClientId, ticket: &OrderTicket) -> Result<OrderAck> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(Error::GatewayUnavailable("connection reset".into()));
            }
            Ok(OrderAck {
                order_id: format!("order-{}", ticket.token),
                status: OrderStatus::Filled,
                filled_quantity: ticket.quantity,
                fill_price: Some(dec!(100)),
            })
        }

        async fn cancel(&self, _client: &ClientId, _order_id: &str) -> Result<OrderStatus> {
            Ok(OrderStatus::Failed)
        }

        async fn open_quantity(
            &self,
            _client: &ClientId,
            _instrument: &InstrumentId,
        ) -> Result<Decimal> {
            Ok(Decimal::ZERO)
        }
    }

    struct SilentGateway;

    #[async_trait]
    impl OrderGateway for SilentGateway {
        fn name(&self) -> &'static str {
            "SilentGateway"
        }

        async fn submit(&self, _client: &ClientId, _ticket: &OrderTicket) -> Result<OrderAck> {
            // Never acknowledges.
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!()
        }

        async fn cancel(&self, _client: &ClientId, _order_id: &str) -> Result<OrderStatus> {
            Ok(OrderStatus::Failed)
        }

        async fn open_quantity(
            &self,
            _client: &ClientId,
            _instrument: &InstrumentId,
        ) -> Result<Decimal> {
            Ok(Decimal::ZERO)
        }
    }

    struct RejectingGateway {
        calls: AtomicU32,
    }

    #[async_trait]
    impl OrderGateway for RejectingGateway {
        fn name(&self) -> &'static str {
            "RejectingGateway"
        }

        async fn submit(&self, _client: &ClientId, _ticket: &OrderTicket) -> Result<OrderAck> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Rejected {
                reason: "margin exceeded".into(),
            })
        }

        async fn cancel(&self, _client: &ClientId, _order_id: &str) -> Result<OrderStatus> {
            Ok(OrderStatus::Failed)
        }

        async fn open_quantity(
            &self,
            _client: &ClientId,
            _instrument: &InstrumentId,
        ) -> Result<Decimal> {
            Ok(Decimal::ZERO)
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_with_same_token() {
        let gateway = FlakyGateway {
            calls: AtomicU32::new(0),
            failures: 2,
        };
        let client = ClientId("c1".into());
        let t = ticket();
        let ack = submit_with_retry(&gateway, &client, &t, &settings())
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 3);
        // The ack is tied to the original token: same intended action.
        assert_eq!(ack.order_id, format!("order-{}", t.token));
    }

    #[tokio::test]
    async fn gives_up_after_bounded_timeouts() {
        let gateway = SilentGateway;
        let client = ClientId("c1".into());
        let t = ticket();
        match submit_with_retry(&gateway, &client, &t, &settings()).await {
            Err(Error::Timeout { token, attempts }) => {
                assert_eq!(token, t.token);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let gateway = RejectingGateway {
            calls: AtomicU32::new(0),
        };
        let client = ClientId("c1".into());
        match submit_with_retry(&gateway, &client, &ticket(), &settings()).await {
            Err(Error::Rejected { .. }) => {}
            other => panic!("expected Rejected, got {:?}", other),
        }
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    }
}
