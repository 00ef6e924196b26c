// =============================================================================
// CSV Export — opportunity history as a downloadable report
// =============================================================================
//
// Spec §6 names two routes with fixed headers; both are hand-rendered with
// `write!` rather than pulling in the `csv` crate, matching the corpus's
// "no abstraction beyond what the row shape needs" texture — every field is
// already a plain number or a pair/exchange string with no embedded commas
// or quotes to escape.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
};
use chrono::{TimeZone, Utc};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::opportunities::{ArbitrageOpportunity, TriangularOpportunity};

fn iso8601(ts_ms: i64) -> String {
    Utc.timestamp_millis_opt(ts_ms)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

#[derive(Deserialize, Default)]
pub struct OpportunityFilter {
    hours: Option<f64>,
    min_profit: Option<f64>,
    pair: Option<String>,
}

impl OpportunityFilter {
    fn cutoff_ms(&self) -> Option<i64> {
        self.hours.map(|h| Utc::now().timestamp_millis() - (h * 3_600_000.0) as i64)
    }
}

fn keep_simple(opp: &ArbitrageOpportunity, filter: &OpportunityFilter, cutoff: Option<i64>) -> bool {
    if let Some(cutoff) = cutoff {
        if opp.ts < cutoff {
            return false;
        }
    }
    if let Some(min_profit) = filter.min_profit {
        if opp.profit_pct < min_profit {
            return false;
        }
    }
    if let Some(pair) = &filter.pair {
        if &opp.pair != pair {
            return false;
        }
    }
    true
}

/// `GET /api/export/opportunities/csv?hours=&min_profit=&pair=`
pub async fn opportunities_csv(State(state): State<Arc<AppState>>, Query(filter): Query<OpportunityFilter>) -> impl IntoResponse {
    let cutoff = filter.cutoff_ms();
    let mut body = String::from("timestamp,pair,buy_exchange,sell_exchange,buy_price,sell_price,profit_percent\n");
    for opp in state.history.simple_cross() {
        if !keep_simple(&opp, &filter, cutoff) {
            continue;
        }
        body.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            iso8601(opp.ts),
            opp.pair,
            opp.buy_exchange,
            opp.sell_exchange,
            opp.buy_price,
            opp.sell_price,
            opp.profit_pct,
        ));
    }
    csv_response(body)
}

fn keep_triangular(opp: &TriangularOpportunity, filter: &OpportunityFilter, cutoff: Option<i64>) -> bool {
    if let Some(cutoff) = cutoff {
        if opp.ts < cutoff {
            return false;
        }
    }
    if let Some(min_profit) = filter.min_profit {
        if opp.profit_pct < min_profit {
            return false;
        }
    }
    true
}

/// `GET /api/export/triangular/csv?hours=&min_profit=` — analogous to the
/// plain opportunity export, one row per cycle detected.
pub async fn triangular_csv(State(state): State<Arc<AppState>>, Query(filter): Query<OpportunityFilter>) -> impl IntoResponse {
    let cutoff = filter.cutoff_ms();
    let mut body = String::from("timestamp,exchange,base_currency,start_amount,end_amount,profit_percent\n");
    for opp in state.history.triangular() {
        if !keep_triangular(&opp, &filter, cutoff) {
            continue;
        }
        body.push_str(&format!(
            "{},{},{},{},{},{}\n",
            iso8601(opp.ts),
            opp.exchange,
            opp.base_currency,
            opp.start_amount,
            opp.end_amount,
            opp.profit_pct,
        ));
    }
    csv_response(body)
}

fn csv_response(body: String) -> impl IntoResponse {
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/csv")], body)
}
