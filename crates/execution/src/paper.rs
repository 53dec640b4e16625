use crate::types::PaperSettings;
use crate::{Error, OrderGateway, Result};
use async_trait::async_trait;
use core_types::{
    ClientId, IdempotencyToken, InstrumentId, OrderAck, OrderStatus, OrderTicket, Side,
};
use num_traits::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// A paper execution venue.
///
/// Fills market orders instantly at the last quoted price (worsened by the
/// configured slippage), keeps a signed open-quantity book per pair, and
/// deduplicates idempotency tokens: a resubmitted token returns the original
/// acknowledgment instead of creating a second live order.
pub struct PaperGateway {
    settings: PaperSettings,
    book: Mutex<PaperBook>,
    order_seq: AtomicU64,
}

#[derive(Default)]
struct PaperBook {
    quotes: HashMap<InstrumentId, Decimal>,
    acks_by_token: HashMap<IdempotencyToken, OrderAck>,
    open_qty: HashMap<(ClientId, InstrumentId), Decimal>,
}

impl PaperGateway {
    pub fn new(settings: PaperSettings) -> Self {
        Self {
            settings,
            book: Mutex::new(PaperBook::default()),
            order_seq: AtomicU64::new(1),
        }
    }

    /// Updates the venue's view of an instrument's price. The engine calls
    /// this on every tick so market orders have a fill reference.
    pub fn set_quote(&self, instrument: &InstrumentId, price: Decimal) {
        let mut book = self.book.lock().expect("paper book lock poisoned");
        book.quotes.insert(instrument.clone(), price);
    }

    fn fill_price(&self, side: Side, reference: Decimal) -> Decimal {
        let slippage =
            Decimal::from_f64(self.settings.slippage_pct).unwrap_or(Decimal::ZERO)
                / Decimal::ONE_HUNDRED;
        match side {
            // Slippage always makes the price worse for the order side.
            Side::Long => reference * (Decimal::ONE + slippage),
            Side::Short => reference * (Decimal::ONE - slippage),
        }
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    fn name(&self) -> &'static str {
        "PaperGateway"
    }

    async fn submit(&self, client: &ClientId, ticket: &OrderTicket) -> Result<OrderAck> {
        let mut book = self.book.lock().expect("paper book lock poisoned");

        // Idempotency: a token we have already acknowledged is the same
        // intended action, not a new order.
        if let Some(ack) = book.acks_by_token.get(&ticket.token) {
            tracing::debug!(
                client = %client,
                token = %ticket.token,
                "Duplicate submission for known token. Returning original ack."
            );
            return Ok(ack.clone());
        }

        let reference = match ticket.price {
            Some(limit) => limit,
            None => match book.quotes.get(&ticket.instrument) {
                Some(quote) => *quote,
                None => {
                    return Err(Error::Rejected {
                        reason: format!("no quote for {}", ticket.instrument),
                    });
                }
            },
        };
        if ticket.quantity <= Decimal::ZERO {
            return Err(Error::Rejected {
                reason: "non-positive quantity".to_string(),
            });
        }

        let price = self.fill_price(ticket.side, reference);
        let signed = match ticket.side {
            Side::Long => ticket.quantity,
            Side::Short => -ticket.quantity,
        };
        let key = (client.clone(), ticket.instrument.clone());
        *book.open_qty.entry(key).or_insert(Decimal::ZERO) += signed;

        let ack = OrderAck {
            order_id: format!("paper-{}", self.order_seq.fetch_add(1, Ordering::SeqCst)),
            status: OrderStatus::Filled,
            filled_quantity: ticket.quantity,
            fill_price: Some(price),
        };
        book.acks_by_token.insert(ticket.token.clone(), ack.clone());

        tracing::info!(
            client = %client,
            instrument = %ticket.instrument,
            side = ?ticket.side,
            quantity = %ticket.quantity,
            price = %price,
            order_id = %ack.order_id,
            "Paper order filled."
        );
        Ok(ack)
    }

    async fn cancel(&self, client: &ClientId, order_id: &str) -> Result<OrderStatus> {
        let book = self.book.lock().expect("paper book lock poisoned");
        // Paper fills are instantaneous, so a cancel always arrives late;
        // report the terminal status the way a venue would.
        let known = book
            .acks_by_token
            .values()
            .any(|ack| ack.order_id == order_id);
        if known {
            tracing::debug!(client = %client, order_id, "Cancel after fill; no-op.");
            Ok(OrderStatus::Filled)
        } else {
            Err(Error::UnknownOrder(order_id.to_string()))
        }
    }

    async fn open_quantity(
        &self,
        client: &ClientId,
        instrument: &InstrumentId,
    ) -> Result<Decimal> {
        let book = self.book.lock().expect("paper book lock poisoned");
        Ok(book
            .open_qty
            .get(&(client.clone(), instrument.clone()))
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    fn note_tick(&self, instrument: &InstrumentId, price: Decimal) {
        self.set_quote(instrument, price);
    }
}
