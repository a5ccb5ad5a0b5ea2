//! Fetch command - read vehicle data resources

use cdapi_client::{ConnectedDriveClient, ResourceKind};
use serde_json::Value;
use tracing::debug;

use crate::output::{format_value, kv_rows, OutputContext, ResourceRow};

/// Resources read when none are named
pub const DEFAULT_RESOURCES: [ResourceKind; 2] =
    [ResourceKind::DynamicStatus, ResourceKind::VehicleList];

/// Fetch each resource on its own and report the results.
///
/// A failing resource does not stop the others. Returns the number of
/// resources that failed.
pub async fn fetch(
    client: &ConnectedDriveClient,
    kinds: &[ResourceKind],
    printall: bool,
    ctx: &OutputContext,
) -> usize {
    let mut rows = Vec::with_capacity(kinds.len());
    let mut failures = 0;

    for &kind in kinds {
        debug!("fetching {}", kind);
        match fetch_one(client, kind).await {
            Ok(value) => {
                if printall {
                    dump(kind, &value, ctx);
                }
                rows.push(ResourceRow {
                    resource: kind.to_string(),
                    status: "ok".to_string(),
                    detail: describe(&value),
                });
            }
            Err(e) => {
                failures += 1;
                ctx.error(&format!("Failed to fetch {}: {}", kind, e));
                rows.push(ResourceRow {
                    resource: kind.to_string(),
                    status: "error".to_string(),
                    detail: e.to_string(),
                });
            }
        }
    }

    ctx.print(&rows);
    failures
}

async fn fetch_one(client: &ConnectedDriveClient, kind: ResourceKind) -> cdapi_client::Result<Value> {
    match kind {
        ResourceKind::DynamicStatus => client.vehicle_status().await.map(Value::Object),
        ResourceKind::ServicePartner => client.service_partner().await.map(Value::Object),
        ResourceKind::VehicleList => client.vehicles().await.map(Value::Array),
        other => client.fetch(other, None).await,
    }
}

/// Print every key/value pair of a fetched resource
fn dump(kind: ResourceKind, value: &Value, ctx: &OutputContext) {
    ctx.heading(&format!("--- {} ---", kind));
    match value {
        Value::Object(map) => ctx.print(&kv_rows(map)),
        Value::Array(items) => {
            let noun = if kind == ResourceKind::VehicleList { "Car" } else { "Entry" };
            for (i, item) in items.iter().enumerate() {
                ctx.heading(&format!("{} {} of {}", noun, i + 1, items.len()));
                match item {
                    Value::Object(map) => ctx.print(&kv_rows(map)),
                    other => ctx.info(&format_value(other)),
                }
            }
        }
        other => ctx.info(&format_value(other)),
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Object(map) => format!("{} values", map.len()),
        Value::Array(items) => format!("{} entries", items.len()),
        other => format_value(other),
    }
}
