//! Aggregates over conversion records
//!
//! All money is summed as [`Decimal`]. Missing amounts and quantities count
//! as zero. Rankings use a stable sort, so ties keep first-seen order.

use chrono::{DateTime, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::ConversionNode;

/// Label for conversions without a sub id
pub const NO_SUB_ID: &str = "No SubID";

/// Rows kept by the top-N helpers in [`ReportSummary`]
pub const TOP_N: usize = 10;

/// Headline numbers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTotals {
    /// Sum of `totalCommission`
    pub total_commission: Decimal,
    /// Conversion records
    pub conversions: usize,
    /// Orders across all conversions
    pub orders: usize,
    /// Item lines across all orders
    pub items: usize,
}

/// Commission earned on one purchase date (UTC)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyCommission {
    /// Purchase date
    pub date: NaiveDate,
    /// Commission for that date
    pub commission: Decimal,
}

/// One item, or all lines of one item name
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSummary {
    /// Item name
    pub item_name: String,
    /// Shop name
    pub shop_name: Option<String>,
    /// Commission
    pub commission: Decimal,
    /// Quantity sold
    pub qty: i64,
    /// Unit price
    pub price: Option<Decimal>,
    /// Channel type
    pub channel_type: Option<String>,
}

/// Performance of one sub id
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubIdStats {
    /// Sub id
    pub sub_id: String,
    /// Item commission attributed to the sub id
    pub commission: Decimal,
    /// Orders attributed to the sub id
    pub orders: usize,
    /// Quantity attributed to the sub id
    pub items: i64,
}

/// Everything the report view shows
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    /// Headline numbers
    pub totals: ReportTotals,
    /// Commission per day, oldest first
    pub daily: Vec<DailyCommission>,
    /// Best item lines by commission
    pub top_by_commission: Vec<ItemSummary>,
    /// Best item names by quantity
    pub top_by_quantity: Vec<ItemSummary>,
    /// Best sub ids by commission
    pub top_sub_ids_by_commission: Vec<SubIdStats>,
    /// Best sub ids by orders
    pub top_sub_ids_by_orders: Vec<SubIdStats>,
}

/// Compute the full summary
pub fn summarize(nodes: &[ConversionNode]) -> ReportSummary {
    let sub_ids = sub_id_stats(nodes);
    ReportSummary {
        totals: totals(nodes),
        daily: daily_commission(nodes),
        top_by_commission: top_items_by_commission(nodes, TOP_N),
        top_by_quantity: top_items_by_quantity(nodes, TOP_N),
        top_sub_ids_by_commission: top_sub_ids_by_commission(&sub_ids, TOP_N),
        top_sub_ids_by_orders: top_sub_ids_by_orders(&sub_ids, TOP_N),
    }
}

/// Headline numbers
pub fn totals(nodes: &[ConversionNode]) -> ReportTotals {
    nodes.iter().fold(ReportTotals::default(), |mut acc, node| {
        acc.total_commission += node.total_commission.unwrap_or_default();
        acc.conversions += 1;
        acc.orders += node.orders.len();
        acc.items += node.orders.iter().map(|o| o.items.len()).sum::<usize>();
        acc
    })
}

/// Commission per purchase date; records without a purchase time are skipped
pub fn daily_commission(nodes: &[ConversionNode]) -> Vec<DailyCommission> {
    let mut by_day: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();

    for node in nodes {
        let Some(date) = node
            .purchase_time
            .and_then(|t| DateTime::from_timestamp(t, 0))
            .map(|t| t.date_naive())
        else {
            continue;
        };
        *by_day.entry(date).or_default() += node.total_commission.unwrap_or_default();
    }

    by_day
        .into_iter()
        .map(|(date, commission)| DailyCommission { date, commission })
        .collect()
}

fn item_lines(nodes: &[ConversionNode]) -> impl Iterator<Item = ItemSummary> + '_ {
    nodes
        .iter()
        .flat_map(|n| n.orders.iter())
        .flat_map(|o| o.items.iter())
        .map(|item| ItemSummary {
            item_name: item.item_name.clone().unwrap_or_default(),
            shop_name: item.shop_name.clone(),
            commission: item.item_total_commission.unwrap_or_default(),
            qty: item.qty.unwrap_or_default(),
            price: item.item_price,
            channel_type: item.channel_type.clone(),
        })
}

/// Top `n` individual item lines by commission
pub fn top_items_by_commission(nodes: &[ConversionNode], n: usize) -> Vec<ItemSummary> {
    let mut items: Vec<ItemSummary> = item_lines(nodes).collect();
    items.sort_by(|a, b| b.commission.cmp(&a.commission));
    items.truncate(n);
    items
}

/// Top `n` item names by total quantity; lines with the same name are merged
pub fn top_items_by_quantity(nodes: &[ConversionNode], n: usize) -> Vec<ItemSummary> {
    let mut order: Vec<String> = Vec::new();
    let mut merged: HashMap<String, ItemSummary> = HashMap::new();

    for line in item_lines(nodes) {
        match merged.get_mut(&line.item_name) {
            Some(existing) => {
                existing.qty += line.qty;
                existing.commission += line.commission;
            }
            None => {
                order.push(line.item_name.clone());
                merged.insert(line.item_name.clone(), line);
            }
        }
    }

    let mut items: Vec<ItemSummary> = order
        .into_iter()
        .filter_map(|name| merged.remove(&name))
        .collect();
    items.sort_by(|a, b| b.qty.cmp(&a.qty));
    items.truncate(n);
    items
}

/// Split a dash-separated `utmContent` into sub ids
pub fn split_sub_ids(utm_content: Option<&str>) -> Vec<String> {
    let ids: Vec<String> = utm_content
        .unwrap_or_default()
        .split('-')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if ids.is_empty() {
        vec![NO_SUB_ID.to_string()]
    } else {
        ids
    }
}

/// Per sub id totals in first-seen order
///
/// Each conversion's full commission, orders and quantity are credited to
/// every sub id it carries.
pub fn sub_id_stats(nodes: &[ConversionNode]) -> Vec<SubIdStats> {
    let mut stats: Vec<SubIdStats> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for node in nodes {
        let commission: Decimal = node
            .orders
            .iter()
            .flat_map(|o| o.items.iter())
            .map(|i| i.item_total_commission.unwrap_or_default())
            .sum();
        let items: i64 = node
            .orders
            .iter()
            .flat_map(|o| o.items.iter())
            .map(|i| i.qty.unwrap_or_default())
            .sum();
        let orders = node.orders.len();

        for sub_id in split_sub_ids(node.utm_content.as_deref()) {
            let slot = *index.entry(sub_id.clone()).or_insert_with(|| {
                stats.push(SubIdStats {
                    sub_id,
                    commission: Decimal::ZERO,
                    orders: 0,
                    items: 0,
                });
                stats.len() - 1
            });
            let entry = &mut stats[slot];
            entry.commission += commission;
            entry.orders += orders;
            entry.items += items;
        }
    }

    stats
}

/// Top `n` sub ids by commission
pub fn top_sub_ids_by_commission(stats: &[SubIdStats], n: usize) -> Vec<SubIdStats> {
    let mut ranked = stats.to_vec();
    ranked.sort_by(|a, b| b.commission.cmp(&a.commission));
    ranked.truncate(n);
    ranked
}

/// Top `n` sub ids by orders
pub fn top_sub_ids_by_orders(stats: &[SubIdStats], n: usize) -> Vec<SubIdStats> {
    let mut ranked = stats.to_vec();
    ranked.sort_by(|a, b| b.orders.cmp(&a.orders));
    ranked.truncate(n);
    ranked
}
