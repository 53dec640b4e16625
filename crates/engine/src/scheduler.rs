use crate::EngineHandle;
use app_config::SessionSettings;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveTime, Utc};
use tracing::info;

/// Fires the end-of-day square-off at the configured exchange-local time.
///
/// The scheduler sleeps until the next boundary, orders the flatten through
/// the engine handle, then arms itself for the following day, so the
/// square-off fires exactly once per trading day even if ticks keep coming.
pub struct SquareOffScheduler {
    session: SessionSettings,
    handle: EngineHandle,
}

impl SquareOffScheduler {
    pub fn new(session: SessionSettings, handle: EngineHandle) -> Self {
        Self { session, handle }
    }

    pub async fn run(self) {
        loop {
            let now = Utc::now();
            let at = next_square_off(
                now,
                self.session.square_off_time,
                self.session.exchange_utc_offset_minutes,
            );
            info!(%at, "Square-off armed.");
            let wait = (at - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            self.handle.square_off();
        }
    }
}

/// The next UTC instant at which the exchange-local clock reads
/// `square_off_time`.
pub(crate) fn next_square_off(
    now: DateTime<Utc>,
    square_off_time: NaiveTime,
    offset_minutes: i32,
) -> DateTime<Utc> {
    let offset =
        FixedOffset::east_opt(offset_minutes * 60).expect("offset validated at config load");
    let local_now = now.with_timezone(&offset);
    let mut candidate = local_now
        .date_naive()
        .and_time(square_off_time)
        .and_local_timezone(offset)
        .single()
        .expect("fixed offsets map local times uniquely");
    if candidate <= local_now {
        candidate += ChronoDuration::days(1);
    }
    candidate.with_timezone(&Utc)
}
