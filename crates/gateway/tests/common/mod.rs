//! Shared fixtures for gateway integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use advisor_gateway::{
    AuthScheme, Credentials, EndpointTemplate, Gateway, GatewayConfig, GatewayError,
    HttpTransport, ManualClock, MemoryStore, ProviderCategory, ProviderConfig, ProviderRequest,
    ProviderResponse, Quota,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

#[derive(Debug, Clone)]
struct Route {
    status: u16,
    body: Value,
    delay: Duration,
}

/// HTTP transport answering from a table of routes keyed by URL (query ignored).
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, url: &str, status: u16, body: Value) {
        self.route_delayed(url, status, body, Duration::ZERO);
    }

    pub fn route_delayed(&self, url: &str, status: u16, body: Value, delay: Duration) {
        self.routes.lock().unwrap().insert(
            url.to_string(),
            Route {
                status,
                body,
                delay,
            },
        );
    }

    /// Number of requests that reached the network for URLs starting with `prefix`.
    pub fn calls_to(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|url| url.starts_with(prefix))
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: ProviderRequest) -> Result<ProviderResponse, GatewayError> {
        let url = request
            .url
            .split('?')
            .next()
            .unwrap_or_default()
            .to_string();
        self.calls.lock().unwrap().push(url.clone());
        let route = self.routes.lock().unwrap().get(&url).cloned();
        let Some(route) = route else {
            return Ok(ProviderResponse {
                status: 404,
                body: json!({ "message": "no route" }),
            });
        };
        if !route.delay.is_zero() {
            tokio::time::sleep(route.delay).await;
        }
        Ok(ProviderResponse {
            status: route.status,
            body: route.body,
        })
    }
}

pub fn base_url(id: &str) -> String {
    format!("https://{}.test", id)
}

/// A banking provider with `accounts` and `transactions` sync operations and
/// a `status` probe.
pub fn bank(id: &str, quota: Quota, cache_accounts: bool) -> ProviderConfig {
    let mut operations = BTreeMap::new();
    let accounts = EndpointTemplate::get("/accounts");
    operations.insert(
        "accounts".to_string(),
        if cache_accounts {
            accounts.cached(5)
        } else {
            accounts
        },
    );
    operations.insert(
        "transactions".to_string(),
        EndpointTemplate::get("/transactions"),
    );
    operations.insert("status".to_string(), EndpointTemplate::get("/status"));

    ProviderConfig {
        id: id.to_string(),
        name: format!("{} bank", id),
        category: ProviderCategory::Banking,
        base_url: base_url(id),
        version: "v1".to_string(),
        auth: AuthScheme::Bearer,
        quota,
        operations,
        probe_operation: Some("status".to_string()),
        sync_operations: vec!["accounts".to_string(), "transactions".to_string()],
    }
}

/// Healthy default routes for a bank: one account and one transaction.
pub fn serve_bank(transport: &ScriptedTransport, id: &str) {
    let base = base_url(id);
    transport.route(&format!("{}/status", base), 200, json!({ "status": "ok" }));
    transport.route(
        &format!("{}/accounts", base),
        200,
        json!([{ "id": "acc-1", "name": "Checking", "balance": "100.00", "currency": "EUR" }]),
    );
    transport.route(
        &format!("{}/transactions", base),
        200,
        json!([{ "id": "t-1", "accountId": "acc-1", "amount": "-20.00", "currency": "EUR" }]),
    );
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
    ))
}

pub fn gateway(
    config: GatewayConfig,
    transport: Arc<ScriptedTransport>,
    clock: Arc<ManualClock>,
) -> Gateway {
    Gateway::builder(config)
        .transport(transport)
        .clock(clock)
        .store(Arc::new(MemoryStore::new()))
        .build()
        .unwrap()
}

pub async fn activate(gateway: &Gateway, id: &str) {
    gateway
        .activate(id, Credentials::new("client", "secret"))
        .await
        .unwrap();
}
