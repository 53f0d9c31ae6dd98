// Rebalance gate - decides whether the portfolio is reconstituted at the
// current timestep.

use chrono::{Datelike, NaiveDate};

use crate::config::RebalanceFrequency;

/// True when a rebalance is due at `current` given the last one.
///
/// `last == None` is the pre-first-rebalance state; the engine forces the
/// first rebalance separately once required history is available, so this
/// returns true and lets the history check gate it.
pub fn should_rebalance(
    frequency: RebalanceFrequency,
    current: NaiveDate,
    last: Option<NaiveDate>,
) -> bool {
    let last = match last {
        Some(d) => d,
        None => return true,
    };

    match frequency {
        RebalanceFrequency::Daily => true,
        // Plain date arithmetic: an ISO-week comparison would see week 52
        // vs week 1 at a year boundary and miss the due rebalance.
        RebalanceFrequency::Weekly => (current - last).num_days() >= 7,
        RebalanceFrequency::Monthly => (current.year(), current.month()) != (last.year(), last.month()),
        RebalanceFrequency::Quarterly => {
            (current.year(), quarter(current)) != (last.year(), quarter(last))
        }
        RebalanceFrequency::Yearly => current.year() != last.year(),
        RebalanceFrequency::Every(days) => (current - last).num_days() >= days as i64,
    }
}

fn quarter(date: NaiveDate) -> u32 {
    (date.month() - 1) / 3 + 1
}
