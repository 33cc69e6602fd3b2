//! Billing types for the monthly cost report

use chrono::{Datelike, Months, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A calendar month, `end` exclusive (Cost Explorer convention)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BillingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BillingPeriod {
    /// The calendar month containing `date`
    pub fn month_of(date: NaiveDate) -> Option<Self> {
        let start = date.with_day(1)?;
        let end = start.checked_add_months(Months::new(1))?;
        Some(Self { start, end })
    }

    /// Number of calendar days covered by the period
    pub fn days(&self) -> i64 {
        self.end.signed_duration_since(self.start).num_days()
    }

    /// Column label used in the report (`YYYY-MM-DD` of the first day)
    pub fn label(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Contiguous run of calendar months, oldest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillingWindow {
    pub periods: Vec<BillingPeriod>,
}

impl BillingWindow {
    /// The `months` full calendar months immediately preceding the month of `today`.
    ///
    /// Returns `None` only when the date arithmetic leaves chrono's range.
    pub fn preceding(today: NaiveDate, months: u32) -> Option<Self> {
        let current_month = today.with_day(1)?;
        let mut periods = Vec::with_capacity(months as usize);
        for back in (1..=months).rev() {
            let start = current_month.checked_sub_months(Months::new(back))?;
            periods.push(BillingPeriod::month_of(start)?);
        }
        Some(Self { periods })
    }

    /// First day of the oldest month
    pub fn start(&self) -> Option<NaiveDate> {
        self.periods.first().map(|p| p.start)
    }

    /// Exclusive end of the newest month
    pub fn end(&self) -> Option<NaiveDate> {
        self.periods.last().map(|p| p.end)
    }
}

/// One (service, month) leaf fact from the Cost Explorer response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceCostEntry {
    pub service_name: String,
    pub period: BillingPeriod,
    pub unblended_cost: Decimal,
    pub currency: String,
}

/// Per-month totals across all services
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyAggregate {
    pub period: BillingPeriod,
    pub total_cost: Decimal,
    pub normalized_daily_cost: Decimal,
    pub per_service: BTreeMap<String, Decimal>,
}

impl MonthlyAggregate {
    /// Build an aggregate from per-service costs, deriving the total and
    /// the normalized daily cost at full precision.
    pub fn from_services(period: BillingPeriod, per_service: BTreeMap<String, Decimal>) -> Self {
        let total_cost: Decimal = per_service.values().copied().sum();
        let normalized_daily_cost = per_day(total_cost, &period);
        Self {
            period,
            total_cost,
            normalized_daily_cost,
            per_service,
        }
    }

    /// Unblended cost of one service, zero when it had no usage this month
    pub fn cost_of(&self, service: &str) -> Decimal {
        self.per_service
            .get(service)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Normalized daily cost of one service
    pub fn normalized(&self, service: &str) -> Decimal {
        per_day(self.cost_of(service), &self.period)
    }
}

/// `cost / days in period`
pub fn per_day(cost: Decimal, period: &BillingPeriod) -> Decimal {
    cost.checked_div(Decimal::from(period.days()))
        .unwrap_or(Decimal::ZERO)
}

/// Month-over-month relative change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelativeChange {
    /// `(new - old) / |old|`
    Ratio(Decimal),
    /// Previous month was zero and this month is not
    NewService,
}

impl fmt::Display for RelativeChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelativeChange::Ratio(r) => {
                let pct = r * Decimal::ONE_HUNDRED;
                let sign = if pct.is_sign_positive() { "+" } else { "-" };
                write!(f, "{}{:.1}%", sign, pct.abs())
            }
            RelativeChange::NewService => write!(f, "new"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeDirection {
    Increase,
    Decrease,
}

/// Comparison of one service between two adjacent months
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeFlag {
    pub service_name: String,
    pub from_period: BillingPeriod,
    pub to_period: BillingPeriod,
    pub relative_change: RelativeChange,
    pub exceeds_threshold: bool,
}

impl ChangeFlag {
    pub fn direction(&self) -> ChangeDirection {
        match self.relative_change {
            RelativeChange::NewService => ChangeDirection::Increase,
            RelativeChange::Ratio(r) if r.is_sign_negative() && !r.is_zero() => {
                ChangeDirection::Decrease
            }
            RelativeChange::Ratio(_) => ChangeDirection::Increase,
        }
    }
}

/// Identity of the credentials the report was generated with
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallerIdentity {
    pub account_id: String,
    pub arn: String,
}

impl CallerIdentity {
    /// Last `:`-separated segment of the ARN (e.g. `user/alice`)
    pub fn user_id(&self) -> &str {
        self.arn.rsplit(':').next().unwrap_or(&self.arn)
    }
}
