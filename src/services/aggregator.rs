//! Aggregator service for monthly cost statistics

use crate::services::cost_explorer::{ResultByTime, UNBLENDED_COST};
use crate::types::{
    BillingPeriod, BillingWindow, MonthlyAggregate, ReportError, Result, ServiceCostEntry,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use tracing::warn;

/// Aggregator for computing monthly cost statistics
pub struct Aggregator;

impl Aggregator {
    /// Flatten Cost Explorer results into one entry per (service, month)
    pub fn entries(results: &[ResultByTime]) -> Result<Vec<ServiceCostEntry>> {
        let mut entries = Vec::new();

        for result in results {
            let period = BillingPeriod {
                start: parse_date(&result.time_period.start)?,
                end: parse_date(&result.time_period.end)?,
            };
            if result.estimated {
                warn!(%period, "Costs for this month are still estimated");
            }

            for group in &result.groups {
                let service_name = group.keys.first().ok_or_else(|| {
                    ReportError::Api(format!("group without service key in {}", period))
                })?;
                let metric = group.metrics.get(UNBLENDED_COST).ok_or_else(|| {
                    ReportError::Api(format!(
                        "missing {} for '{}' in {}",
                        UNBLENDED_COST, service_name, period
                    ))
                })?;
                let unblended_cost = Decimal::from_str(metric.amount.trim()).map_err(|e| {
                    ReportError::Api(format!(
                        "invalid amount '{}' for '{}': {}",
                        metric.amount, service_name, e
                    ))
                })?;

                entries.push(ServiceCostEntry {
                    service_name: service_name.clone(),
                    period,
                    unblended_cost,
                    currency: metric.unit.clone(),
                });
            }
        }

        Ok(entries)
    }

    /// One aggregate per window month (oldest first); months without data are all zero
    pub fn monthly(entries: &[ServiceCostEntry], window: &BillingWindow) -> Vec<MonthlyAggregate> {
        let mut by_period: BTreeMap<BillingPeriod, BTreeMap<String, Decimal>> = window
            .periods
            .iter()
            .map(|p| (*p, BTreeMap::new()))
            .collect();

        for entry in entries {
            match by_period.get_mut(&entry.period) {
                Some(services) => {
                    *services
                        .entry(entry.service_name.clone())
                        .or_insert(Decimal::ZERO) += entry.unblended_cost;
                }
                None => warn!(
                    period = %entry.period,
                    service = %entry.service_name,
                    "Ignoring cost outside the report window"
                ),
            }
        }

        // BTreeMap keys sort oldest first
        by_period
            .into_iter()
            .map(|(period, services)| MonthlyAggregate::from_services(period, services))
            .collect()
    }

    /// Billing currency of the entries, `None` when there are none
    pub fn currency(entries: &[ServiceCostEntry]) -> Option<String> {
        let units: BTreeSet<&str> = entries.iter().map(|e| e.currency.as_str()).collect();
        if units.len() > 1 {
            warn!(?units, "Report mixes several currencies");
        }
        entries.first().map(|e| e.currency.clone())
    }

    /// Every service seen in any month
    pub fn services(aggregates: &[MonthlyAggregate]) -> BTreeSet<String> {
        aggregates
            .iter()
            .flat_map(|a| a.per_service.keys().cloned())
            .collect()
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| ReportError::Api(format!("invalid date '{}': {}", raw, e)))
}
