use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::db::activity_repo::{self, NewActivity};
use crate::errors::EngineError;
use crate::models::{Side, Task};
use crate::polymarket::types::ApiActivity;
use crate::polymarket::DataClient;

#[derive(Debug, Default, Clone, Copy)]
pub struct IngestStats {
    pub fetched: usize,
    pub inserted: usize,
    pub pre_closed_duplicates: usize,
    pub out_of_window: usize,
    pub already_seen: usize,
    pub malformed: usize,
}

/// Pull the target's recent activity and persist what is new.
///
/// Rows are processed in the order the venue returned them. Each insert is
/// independent — a failure partway through leaves earlier inserts in place
/// and bubbles so the next tick retries the remainder.
pub async fn ingest_activities(
    pool: &PgPool,
    data: &DataClient,
    task: &Task,
    window_sec: i64,
) -> Result<IngestStats, EngineError> {
    let now = Utc::now();
    let start_unix = now.timestamp() - window_sec;

    let rows = data
        .get_activity(&task.target_address, start_unix)
        .await
        .map_err(|e| EngineError::Transient(e.to_string()))?;

    let mut stats = IngestStats {
        fetched: rows.len(),
        ..Default::default()
    };

    // BUY condition ids seen earlier in this response window (whether newly
    // inserted or already persisted). A repeat BUY for one of these markets
    // is pre-closed: the reconciler would otherwise see entries it cannot
    // match. SELLs always fire individually to track progressive exits.
    let mut window_buy_conditions: HashSet<String> = HashSet::new();

    for api in &rows {
        let Some(parsed) = parse_activity(task, api) else {
            stats.malformed += 1;
            continue;
        };
        let (new, side) = parsed;

        if new.timestamp < now - chrono::Duration::seconds(window_sec) {
            stats.out_of_window += 1;
            continue;
        }

        if activity_repo::exists(pool, task.id, &new.tx_hash).await? {
            if side == Side::Buy {
                window_buy_conditions.insert(new.condition_id.clone());
            }
            stats.already_seen += 1;
            continue;
        }

        if side == Side::Buy && window_buy_conditions.contains(&new.condition_id) {
            activity_repo::insert_duplicate(pool, &new).await?;
            stats.pre_closed_duplicates += 1;
            continue;
        }

        activity_repo::insert(pool, &new).await?;
        stats.inserted += 1;
        if side == Side::Buy {
            window_buy_conditions.insert(new.condition_id.clone());
        }
    }

    if stats.inserted > 0 {
        counter!("activities_ingested_total").increment(stats.inserted as u64);
        tracing::info!(
            task_id = %task.id,
            inserted = stats.inserted,
            pre_closed = stats.pre_closed_duplicates,
            "Ingested new activities"
        );
    }

    Ok(stats)
}

/// Map a wire activity onto an insertable row. Rows missing the essentials
/// (hash, market, token, side, timestamp) are dropped.
fn parse_activity(task: &Task, api: &ApiActivity) -> Option<(NewActivity, Side)> {
    let tx_hash = api.transaction_hash.clone()?;
    let condition_id = api.condition_id.clone()?;
    let asset = api.asset.clone()?;
    let side = api.effective_side()?;
    let timestamp = parse_timestamp(api.timestamp?)?;

    let size = api.size.unwrap_or(Decimal::ZERO);
    let price = api.price.unwrap_or(Decimal::ZERO);
    let notional = api.usdc_size.unwrap_or_else(|| size * price);

    Some((
        NewActivity {
            task_id: task.id,
            tx_hash,
            condition_id,
            asset,
            side: side.as_str().to_string(),
            size,
            notional,
            price,
            outcome_index: api.outcome_index.unwrap_or(0),
            title: api.title.clone(),
            slug: api.slug.clone(),
            outcome: api.outcome.clone(),
            timestamp,
        },
        side,
    ))
}

fn parse_timestamp(unix: i64) -> Option<DateTime<Utc>> {
    // Some venue endpoints report milliseconds.
    if unix > 1_000_000_000_000 {
        Utc.timestamp_millis_opt(unix).single()
    } else {
        Utc.timestamp_opt(unix, 0).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_accept_seconds_and_milliseconds() {
        let secs = parse_timestamp(1_700_000_000).unwrap();
        let millis = parse_timestamp(1_700_000_000_000).unwrap();
        assert_eq!(secs, millis);
    }

    #[test]
    fn malformed_rows_are_dropped() {
        let task = crate::models::Task {
            id: uuid::Uuid::new_v4(),
            mode: crate::models::TaskMode::Mock {
                initial_finance: Decimal::ZERO,
            },
            target_address: "0xtarget".into(),
            profile_url: None,
            fixed_amount: Decimal::ONE_HUNDRED,
            current_balance: Decimal::ZERO,
            status: crate::models::TaskStatus::Running,
            created_at: Utc::now(),
        };

        let missing_hash: ApiActivity = serde_json::from_str(
            r#"{"timestamp":1700000000,"conditionId":"0xc1","asset":"1","type":"TRADE","side":"BUY"}"#,
        )
        .unwrap();
        assert!(parse_activity(&task, &missing_hash).is_none());

        let unknown_side: ApiActivity = serde_json::from_str(
            r#"{"transactionHash":"0x1","timestamp":1700000000,"conditionId":"0xc1",
                "asset":"1","type":"TRADE","side":"MERGE"}"#,
        )
        .unwrap();
        assert!(parse_activity(&task, &unknown_side).is_none());

        let redeem: ApiActivity = serde_json::from_str(
            r#"{"transactionHash":"0x1","timestamp":1700000000,"conditionId":"0xc1",
                "asset":"1","type":"REDEEM","size":"200"}"#,
        )
        .unwrap();
        let (row, side) = parse_activity(&task, &redeem).unwrap();
        assert_eq!(side, Side::Redeem);
        assert_eq!(row.side, "REDEEM");
    }
}
