//! Month-over-month change classification
//!
//! Compares normalized daily costs of adjacent months. A change is flagged
//! when `|relative_change| > sensitivity` (strictly), or when a service had
//! no cost in the previous month and has some now.

use crate::services::Aggregator;
use crate::types::{BillingPeriod, ChangeFlag, MonthlyAggregate, RelativeChange};
use rust_decimal::Decimal;

/// Relative change from `old` to `new`
pub fn relative_change(old: Decimal, new: Decimal) -> RelativeChange {
    if old.is_zero() {
        if new.is_zero() {
            RelativeChange::Ratio(Decimal::ZERO)
        } else {
            RelativeChange::NewService
        }
    } else {
        RelativeChange::Ratio((new - old) / old.abs())
    }
}

/// Relative change of normalized daily cost between two months.
///
/// Costs are cross-multiplied by the other month's day count instead of
/// divided by their own, which keeps the ratio exact.
pub fn normalized_change(
    old_cost: Decimal,
    old_period: &BillingPeriod,
    new_cost: Decimal,
    new_period: &BillingPeriod,
) -> RelativeChange {
    relative_change(
        old_cost * Decimal::from(new_period.days()),
        new_cost * Decimal::from(old_period.days()),
    )
}

/// Whether a change is large enough to highlight
pub fn exceeds(change: RelativeChange, sensitivity: Decimal) -> bool {
    match change {
        RelativeChange::NewService => true,
        RelativeChange::Ratio(r) => r.abs() > sensitivity,
    }
}

/// One `ChangeFlag` per (service, adjacent month pair), in month then service order
pub fn classify(aggregates: &[MonthlyAggregate], sensitivity: Decimal) -> Vec<ChangeFlag> {
    let services = Aggregator::services(aggregates);
    let mut flags = Vec::new();

    for pair in aggregates.windows(2) {
        let (from, to) = (&pair[0], &pair[1]);
        for service in &services {
            let change = normalized_change(
                from.cost_of(service),
                &from.period,
                to.cost_of(service),
                &to.period,
            );
            flags.push(ChangeFlag {
                service_name: service.clone(),
                from_period: from.period,
                to_period: to.period,
                relative_change: change,
                exceeds_threshold: exceeds(change, sensitivity),
            });
        }
    }

    flags
}

/// Month-over-month changes of the total normalized daily cost
pub fn classify_totals(
    aggregates: &[MonthlyAggregate],
    sensitivity: Decimal,
    label: &str,
) -> Vec<ChangeFlag> {
    aggregates
        .windows(2)
        .map(|pair| {
            let change = normalized_change(
                pair[0].total_cost,
                &pair[0].period,
                pair[1].total_cost,
                &pair[1].period,
            );
            ChangeFlag {
                service_name: label.to_string(),
                from_period: pair[0].period,
                to_period: pair[1].period,
                relative_change: change,
                exceeds_threshold: exceeds(change, sensitivity),
            }
        })
        .collect()
}
