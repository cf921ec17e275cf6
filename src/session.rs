// =============================================================================
// Session Scheduler (§4.1)
// =============================================================================
//
// Single long-running control loop owning the top-level phase state
// machine: DARK -> PREP -> OPEN -> COOLDOWN -> DARK. Scan and position
// ticks are two independent, coalesced cadences that only fire while
// the phase is OPEN.
// =============================================================================

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::events::{Event, EventKind, EventSink};
use crate::types::Phase;

/// Shared, read-mostly phase state (§5 "SessionState owner: SessionLoop,
/// readers are brief").
pub struct SessionState {
    phase: RwLock<Phase>,
    entered_at: RwLock<DateTime<Utc>>,
    timezone: Tz,
}

impl SessionState {
    pub fn new(timezone_name: &str) -> Self {
        let timezone = Tz::from_str(timezone_name).unwrap_or(chrono_tz::America::New_York);
        Self { phase: RwLock::new(Phase::Dark), entered_at: RwLock::new(Utc::now()), timezone }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.read()
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// `SessionState.phase` is monotone-per-day only in the sense that
    /// the scheduler never skips backward within one day's cycle; the
    /// DARK->PREP->OPEN->COOLDOWN->DARK wheel legitimately wraps every
    /// 24h, so this sets unconditionally and relies on the scheduler's
    /// own transition table to never call it out of order.
    fn set_phase(&self, new_phase: Phase) {
        *self.phase.write() = new_phase;
        *self.entered_at.write() = Utc::now();
    }
}

/// Scan-tick and position-tick consumers implement these; kept as
/// traits so `session.rs` has no dependency on the signal engine or
/// executor directly.
#[async_trait]
pub trait ScanTicker: Send + Sync {
    async fn scan_tick(&self);
}

#[async_trait]
pub trait PositionTicker: Send + Sync {
    async fn position_tick(&self);
}

/// Observed NYSE holidays are computed, not hard-coded per year, so the
/// scheduler keeps working indefinitely without a data file.
pub fn is_market_holiday(date: NaiveDate) -> bool {
    let year = date.year();
    let fixed = [
        observed(NaiveDate::from_ymd_opt(year, 1, 1).unwrap()),
        nth_weekday(year, 1, Weekday::Mon, 3),  // MLK Day
        nth_weekday(year, 2, Weekday::Mon, 3),  // Washington's Birthday
        good_friday(year),
        last_weekday(year, 5, Weekday::Mon),    // Memorial Day
        observed(NaiveDate::from_ymd_opt(year, 6, 19).unwrap()),
        observed(NaiveDate::from_ymd_opt(year, 7, 4).unwrap()),
        nth_weekday(year, 9, Weekday::Mon, 1),  // Labor Day
        nth_weekday(year, 11, Weekday::Thu, 4), // Thanksgiving
        observed(NaiveDate::from_ymd_opt(year, 12, 25).unwrap()),
    ];
    fixed.contains(&date)
}

/// Saturday -> preceding Friday, Sunday -> following Monday.
fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date.pred_opt().unwrap(),
        Weekday::Sun => date.succ_opt().unwrap(),
        _ => date,
    }
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u32) -> NaiveDate {
    let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
    let offset = (7 + weekday.num_days_from_monday() as i64 - first.weekday().num_days_from_monday() as i64) % 7;
    first + chrono::Duration::days(offset + 7 * (n as i64 - 1))
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> NaiveDate {
    let next_month_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1).unwrap()
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1).unwrap()
    };
    let last_day = next_month_first.pred_opt().unwrap();
    let back = (7 + last_day.weekday().num_days_from_monday() as i64 - weekday.num_days_from_monday() as i64) % 7;
    last_day - chrono::Duration::days(back)
}

/// Meeus/Jones/Butcher Gregorian Easter algorithm, then Good Friday is
/// two days prior.
fn good_friday(year: i32) -> NaiveDate {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    let easter = NaiveDate::from_ymd_opt(year, month as u32, day as u32).unwrap();
    easter - chrono::Duration::days(2)
}

fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !is_market_holiday(date)
}

/// Determines the phase that should be active at `now` (in exchange
/// local time), per §4.1's enter/exit table.
fn phase_for(now: DateTime<Tz>) -> Phase {
    let date = now.date_naive();
    let time = now.time();

    if !is_business_day(date) {
        return Phase::Dark;
    }

    let prep_start = NaiveTime::from_hms_opt(4, 0, 0).unwrap();
    let open_start = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
    let cooldown_start = NaiveTime::from_hms_opt(16, 0, 0).unwrap();
    let dark_start = NaiveTime::from_hms_opt(20, 0, 0).unwrap();

    if time >= dark_start || time < prep_start {
        Phase::Dark
    } else if time < open_start {
        Phase::Prep
    } else if time < cooldown_start {
        Phase::Open
    } else {
        Phase::Cooldown
    }
}

pub struct SessionConfig {
    pub scan_interval_sec: u64,
    pub position_tick_sec: u64,
}

/// Drives phase transitions and coalesced tick cadences forever. Meant
/// to be spawned once at startup; a panic inside a tick handler is
/// caught at this boundary and logged, never aborting the loop (§4.1
/// failure semantics).
pub struct SessionScheduler<S: ScanTicker, P: PositionTicker> {
    state: Arc<SessionState>,
    scan_ticker: Arc<S>,
    position_ticker: Arc<P>,
    events: EventSink,
    config: SessionConfig,
    scan_in_flight: Arc<AtomicBool>,
    position_in_flight: Arc<AtomicBool>,
}

impl<S: ScanTicker + 'static, P: PositionTicker + 'static> SessionScheduler<S, P> {
    pub fn new(
        state: Arc<SessionState>,
        scan_ticker: Arc<S>,
        position_ticker: Arc<P>,
        events: EventSink,
        config: SessionConfig,
    ) -> Self {
        Self {
            state,
            scan_ticker,
            position_ticker,
            events,
            config,
            scan_in_flight: Arc::new(AtomicBool::new(false)),
            position_in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut loop_tick = tokio::time::interval(std::time::Duration::from_secs(1));
        let mut last_scan = tokio::time::Instant::now();
        let mut last_position = tokio::time::Instant::now();
        let mut last_heartbeat = tokio::time::Instant::now();

        loop {
            loop_tick.tick().await;
            let now_local = Utc::now().with_timezone(&self.state.timezone());
            let target = phase_for(now_local);
            let current = self.state.phase();

            if target != current {
                self.transition(current, target).await;
            }

            match self.state.phase() {
                Phase::Dark => {
                    let heartbeat_interval = if is_business_day(now_local.date_naive()) {
                        std::time::Duration::from_secs(60)
                    } else {
                        std::time::Duration::from_secs(3600)
                    };
                    if last_heartbeat.elapsed() >= heartbeat_interval {
                        info!(phase = "DARK", "heartbeat");
                        last_heartbeat = tokio::time::Instant::now();
                    }
                }
                Phase::Open => {
                    if last_scan.elapsed() >= std::time::Duration::from_secs(self.config.scan_interval_sec) {
                        last_scan = tokio::time::Instant::now();
                        self.fire_scan_tick();
                    }
                    if last_position.elapsed() >= std::time::Duration::from_secs(self.config.position_tick_sec) {
                        last_position = tokio::time::Instant::now();
                        self.fire_position_tick();
                    }
                }
                Phase::Prep | Phase::Cooldown => {}
            }
        }
    }

    async fn transition(&self, from: Phase, to: Phase) {
        info!(from = %from, to = %to, "phase transition");
        self.state.set_phase(to);
        self.events.emit(Event::new(
            EventKind::PhaseChanged,
            serde_json::json!({"from": from.to_string(), "to": to.to_string()}),
        ));
        if to == Phase::Cooldown {
            self.events.emit(Event::new(EventKind::EndOfDaySummary, serde_json::json!({})));
        }
    }

    /// Coalesced: if the previous scan tick is still running, this one
    /// is dropped rather than queued (§4.1 ticking discipline).
    fn fire_scan_tick(&self) {
        if self.scan_in_flight.swap(true, Ordering::AcqRel) {
            warn!("scan tick coalesced: previous tick still in flight");
            return;
        }
        tokio::spawn(spawn_scan(self.scan_ticker.clone(), self.scan_in_flight.clone()));
    }

    fn fire_position_tick(&self) {
        if self.position_in_flight.swap(true, Ordering::AcqRel) {
            warn!("position tick coalesced: previous tick still in flight");
            return;
        }
        tokio::spawn(spawn_position(self.position_ticker.clone(), self.position_in_flight.clone()));
    }
}

async fn spawn_scan<S: ScanTicker + 'static>(ticker: Arc<S>, flag: Arc<AtomicBool>) {
    ticker.scan_tick().await;
    flag.store(false, Ordering::Release);
}

async fn spawn_position<P: PositionTicker + 'static>(ticker: Arc<P>, flag: Arc<AtomicBool>) {
    ticker.position_tick().await;
    flag.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Tz> {
        New_York.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn phase_table_on_a_regular_business_day() {
        // 2026-07-27 is a Monday, not a holiday.
        assert_eq!(phase_for(at(2026, 7, 27, 3, 0)), Phase::Dark);
        assert_eq!(phase_for(at(2026, 7, 27, 4, 0)), Phase::Prep);
        assert_eq!(phase_for(at(2026, 7, 27, 9, 29)), Phase::Prep);
        assert_eq!(phase_for(at(2026, 7, 27, 9, 30)), Phase::Open);
        assert_eq!(phase_for(at(2026, 7, 27, 15, 59)), Phase::Open);
        assert_eq!(phase_for(at(2026, 7, 27, 16, 0)), Phase::Cooldown);
        assert_eq!(phase_for(at(2026, 7, 27, 20, 0)), Phase::Dark);
    }

    #[test]
    fn weekend_stays_dark_all_day() {
        // 2026-08-01 is a Saturday.
        assert_eq!(phase_for(at(2026, 8, 1, 10, 0)), Phase::Dark);
    }

    #[test]
    fn independence_day_is_a_holiday() {
        assert!(is_market_holiday(NaiveDate::from_ymd_opt(2026, 7, 3).unwrap()));
    }

    #[test]
    fn good_friday_2026_matches_known_date() {
        assert_eq!(good_friday(2026), NaiveDate::from_ymd_opt(2026, 4, 3).unwrap());
    }

    #[test]
    fn thanksgiving_is_the_fourth_thursday() {
        assert_eq!(nth_weekday(2026, 11, Weekday::Thu, 4), NaiveDate::from_ymd_opt(2026, 11, 26).unwrap());
    }
}
