//! Point-in-time transition report.
//!
//! Prints, one JSON object per line, the items that entered a state since a
//! cutoff. Reads `AccessConfig` from the usual `ASSETDESK_*` variables plus:
//!
//! - `ASSETDESK_BEARER_TOKEN` (required)
//! - `ASSETDESK_SITE_HOST`, `ASSETDESK_SITE_PATH`, `ASSETDESK_LIST` (required)
//! - `ASSETDESK_STATE_FIELD` (default: `Status`)
//!
//! Usage:
//!   assetdesk-transitions <state> <cutoff>
//!
//! `<cutoff>` is an RFC 3339 timestamp or a number of hours back, e.g. `24h`.

use std::sync::Arc;

use assetdesk_core::{
    AccessConfig, AssetdeskError, AssetdeskResult, BearerToken, ConfigError, FieldMap, Timestamp,
};
use assetdesk_graph::{
    acquire_credential, telemetry, AggregatingSink, AssetListClient, CallContext, ListLocation,
    StaticCredential,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

#[tokio::main]
async fn main() -> AssetdeskResult<()> {
    telemetry::init_tracing()?;

    let mut args = std::env::args().skip(1);
    let (Some(state), Some(cutoff)) = (args.next(), args.next()) else {
        eprintln!("usage: assetdesk-transitions <state> <cutoff>");
        std::process::exit(2);
    };
    let cutoff = parse_cutoff(&cutoff, Utc::now())?;

    let config = AccessConfig::from_env();
    let location = ListLocation::new(
        required("ASSETDESK_SITE_HOST")?,
        required("ASSETDESK_SITE_PATH")?,
        required("ASSETDESK_LIST")?,
    );
    let state_field =
        std::env::var("ASSETDESK_STATE_FIELD").unwrap_or_else(|_| "Status".to_string());

    let exchange = StaticCredential::new(BearerToken::new(required("ASSETDESK_BEARER_TOKEN")?));
    let credential = acquire_credential(&exchange, "", &[], config.credential_timeout).await?;

    let client = AssetListClient::with_reqwest(config, FieldMap::new())?;
    let sink = Arc::new(AggregatingSink::new());
    let ctx = CallContext::new("report_transitions").with_sink(sink.clone());

    let items = client
        .transitioned_since(&ctx, &credential, &location, &state_field, &state, cutoff)
        .await?;

    for entry in items.iter() {
        let line = json!({
            "id": entry.item.id(),
            "transitioned_at": entry.transitioned_at,
            "last_modified_at": entry.item.last_modified_at(),
        });
        println!("{}", line);
    }

    let snapshot = sink.snapshot();
    tracing::info!(
        results = items.len(),
        calls = snapshot.calls,
        retries = snapshot.retries,
        failures = snapshot.failures,
        mean_elapsed_ms = u64::try_from(snapshot.mean_elapsed().as_millis()).unwrap_or(u64::MAX),
        "Transition report finished"
    );
    Ok(())
}

fn required(key: &str) -> AssetdeskResult<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| {
            ConfigError::MissingRequired {
                field: key.to_string(),
            }
            .into()
        })
}

fn parse_cutoff(raw: &str, now: Timestamp) -> AssetdeskResult<Timestamp> {
    if let Some(hours) = raw.strip_suffix('h') {
        if let Some(back) = hours.parse::<i64>().ok().and_then(Duration::try_hours) {
            return now.checked_sub_signed(back).ok_or_else(|| {
                ConfigError::InvalidValue {
                    field: "cutoff".to_string(),
                    value: raw.to_string(),
                    reason: "out of range".to_string(),
                }
                .into()
            });
        }
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| -> AssetdeskError {
            ConfigError::InvalidValue {
                field: "cutoff".to_string(),
                value: raw.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
}
