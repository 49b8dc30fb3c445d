//! End-to-end behavior of the gateway against scripted providers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use advisor_gateway::{
    Credentials, ExecuteOptions, GatewayConfig, GatewayError, HealthStatus, Params, Quota,
    WebhookEvent, WebhookEventType,
};
use chrono::Utc;
use rust_decimal_macros::dec;
use serde_json::json;
use tokio::time::Instant;

use common::{activate, bank, base_url, clock, gateway, serve_bank, ScriptedTransport};

#[tokio::test]
async fn deactivated_provider_is_never_called() {
    let transport = ScriptedTransport::new();
    serve_bank(&transport, "demo-bank");
    let gw = gateway(
        GatewayConfig::with_providers(vec![bank("demo-bank", Quota::default(), false)]),
        transport.clone(),
        clock(),
    );
    activate(&gw, "demo-bank").await;
    gw.deactivate("demo-bank").unwrap();
    let before = transport.total_calls();

    let err = gw
        .execute("demo-bank", "accounts", &Params::new(), None)
        .await
        .unwrap_err();

    assert_eq!(err, GatewayError::ProviderInactive("demo-bank".to_string()));
    assert_eq!(transport.total_calls(), before);
}

#[tokio::test]
async fn cacheable_operation_hits_network_once() {
    let transport = ScriptedTransport::new();
    serve_bank(&transport, "demo-bank");
    let gw = gateway(
        GatewayConfig::with_providers(vec![bank("demo-bank", Quota::default(), true)]),
        transport.clone(),
        clock(),
    );
    activate(&gw, "demo-bank").await;

    let mut params = Params::new();
    params.insert("from".to_string(), json!("2024-01-01"));
    params.insert("currency".to_string(), json!("EUR"));
    let first = gw
        .execute("demo-bank", "accounts", &params, None)
        .await
        .unwrap();

    // Same logical params, built in a different order
    let mut reordered = Params::new();
    reordered.insert("currency".to_string(), json!("EUR"));
    reordered.insert("from".to_string(), json!("2024-01-01"));
    let second = gw
        .execute("demo-bank", "accounts", &reordered, None)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(transport.calls_to("https://demo-bank.test/accounts"), 1);

    let latest = &gw.get_history(Some("demo-bank"), 1)[0];
    assert!(latest.cached);
    assert_eq!(latest.latency_ms, 0);
}

#[tokio::test]
async fn third_call_in_a_minute_is_rate_limited() {
    let transport = ScriptedTransport::new();
    serve_bank(&transport, "demo-bank");
    let clock = clock();
    let quota = Quota {
        requests_per_minute: 2,
        requests_per_day: 1_000,
        burst_limit: 2,
    };
    let gw = gateway(
        GatewayConfig::with_providers(vec![bank("demo-bank", quota, false)]),
        transport.clone(),
        clock.clone(),
    );
    activate(&gw, "demo-bank").await;
    // The activation probe counted against the previous minute
    clock.advance(chrono::Duration::minutes(1));

    let empty = Params::new();
    assert!(gw.execute("demo-bank", "accounts", &empty, None).await.is_ok());
    assert!(gw.execute("demo-bank", "accounts", &empty, None).await.is_ok());
    let err = gw
        .execute("demo-bank", "accounts", &empty, None)
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::RateLimited { .. }));
    assert_eq!(transport.calls_to("https://demo-bank.test/accounts"), 2);

    // The next wall-clock minute opens a fresh window
    clock.advance(chrono::Duration::minutes(1));
    assert!(gw.execute("demo-bank", "accounts", &empty, None).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn in_flight_calls_cannot_overrun_the_minute_ceiling() {
    let transport = ScriptedTransport::new();
    serve_bank(&transport, "demo-bank");
    let clock = clock();
    let quota = Quota {
        requests_per_minute: 2,
        requests_per_day: 1_000,
        burst_limit: 2,
    };
    let gw = Arc::new(gateway(
        GatewayConfig::with_providers(vec![bank("demo-bank", quota, false)]),
        transport.clone(),
        clock.clone(),
    ));
    activate(&gw, "demo-bank").await;
    clock.advance(chrono::Duration::minutes(1));
    transport.route_delayed(
        &format!("{}/accounts", base_url("demo-bank")),
        200,
        json!([]),
        Duration::from_millis(200),
    );

    // All five are in flight before the first response comes back
    let calls: Vec<_> = (0..5)
        .map(|_| {
            let gw = Arc::clone(&gw);
            tokio::spawn(async move {
                gw.execute("demo-bank", "accounts", &Params::new(), None)
                    .await
            })
        })
        .collect();
    let mut granted = 0;
    let mut refused = 0;
    for call in calls {
        match call.await.unwrap() {
            Ok(_) => granted += 1,
            Err(GatewayError::RateLimited { .. }) => refused += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(granted, 2);
    assert_eq!(refused, 3);
    assert_eq!(transport.calls_to("https://demo-bank.test/accounts"), 2);
}

#[tokio::test]
async fn sync_survives_one_failing_provider() {
    let transport = ScriptedTransport::new();
    for id in ["alpha", "bravo", "charlie"] {
        serve_bank(&transport, id);
    }
    let gw = gateway(
        GatewayConfig::with_providers(vec![
            bank("alpha", Quota::default(), false),
            bank("bravo", Quota::default(), false),
            bank("charlie", Quota::default(), false),
        ]),
        transport.clone(),
        clock(),
    );
    for id in ["alpha", "bravo", "charlie"] {
        activate(&gw, id).await;
    }
    transport.route(
        &format!("{}/accounts", base_url("bravo")),
        500,
        json!({ "message": "backend down" }),
    );

    let result = gw.sync_all("client-42", None, false).await.unwrap();

    assert!(result.success);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].provider_id, "bravo");
    assert_eq!(result.errors[0].kind, "upstream_error");
    let ids: Vec<_> = result.accounts.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["alpha:acc-1", "charlie:acc-1"]);
    assert_eq!(result.totals.balances_by_currency["EUR"], dec!(200.00));
    assert_eq!(result.providers.iter().filter(|p| p.success).count(), 2);
}

#[tokio::test]
async fn fully_failed_sync_lists_every_provider() {
    let transport = ScriptedTransport::new();
    let gw = gateway(
        GatewayConfig::with_providers(vec![
            bank("alpha", Quota::default(), false),
            bank("bravo", Quota::default(), false),
        ]),
        transport,
        clock(),
    );

    let selection = vec!["alpha".to_string(), "bravo".to_string()];
    let result = gw
        .sync_all("client-42", Some(&selection), false)
        .await
        .unwrap();

    assert!(!result.success);
    let failed: Vec<_> = result.errors.iter().map(|e| e.provider_id.as_str()).collect();
    assert_eq!(failed, vec!["alpha", "bravo"]);
    assert!(result.errors.iter().all(|e| e.kind == "provider_inactive"));
}

#[tokio::test(start_paused = true)]
async fn slow_provider_bounds_sync_by_timeout() {
    let transport = ScriptedTransport::new();
    serve_bank(&transport, "fast");
    serve_bank(&transport, "slow");
    let gw = gateway(
        GatewayConfig::with_providers(vec![
            bank("fast", Quota::default(), false),
            bank("slow", Quota::default(), false),
        ]),
        transport.clone(),
        clock(),
    );
    activate(&gw, "fast").await;
    activate(&gw, "slow").await;

    transport.route_delayed(
        &format!("{}/accounts", base_url("fast")),
        200,
        json!([{ "id": "acc-1", "balance": 10, "currency": "USD" }]),
        Duration::from_millis(200),
    );
    transport.route_delayed(
        &format!("{}/accounts", base_url("slow")),
        200,
        json!([]),
        Duration::from_secs(120),
    );

    let started = Instant::now();
    let result = gw.sync_all("client-42", None, false).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(30));
    assert!(elapsed < Duration::from_secs(31));
    assert!(result.success);
    assert_eq!(result.accounts.len(), 1);
    assert_eq!(result.accounts[0].id, "fast:acc-1");
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].provider_id, "slow");
    assert_eq!(result.errors[0].kind, "timeout");
}

#[tokio::test]
async fn failed_activation_probe_keeps_provider_inactive() {
    let transport = ScriptedTransport::new();
    transport.route(
        &format!("{}/status", base_url("demo-bank")),
        401,
        json!({ "error": "invalid_client" }),
    );
    let gw = gateway(
        GatewayConfig::with_providers(vec![bank("demo-bank", Quota::default(), false)]),
        transport,
        clock(),
    );

    let err = gw
        .activate("demo-bank", Credentials::new("client", "wrong"))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Activation { .. }));
    assert!(!gw.is_active("demo-bank").unwrap());
    let health = gw
        .get_health()
        .into_iter()
        .find(|h| h.provider_id == "demo-bank")
        .unwrap();
    assert_eq!(health.status, HealthStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn concurrent_sync_of_same_subject_is_rejected_unless_forced() {
    let transport = ScriptedTransport::new();
    serve_bank(&transport, "demo-bank");
    let gw = Arc::new(gateway(
        GatewayConfig::with_providers(vec![bank("demo-bank", Quota::default(), false)]),
        transport.clone(),
        clock(),
    ));
    activate(&gw, "demo-bank").await;
    transport.route_delayed(
        &format!("{}/accounts", base_url("demo-bank")),
        200,
        json!([]),
        Duration::from_secs(5),
    );

    let running = {
        let gw = Arc::clone(&gw);
        tokio::spawn(async move { gw.sync_all("client-42", None, false).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;

    let err = gw.sync_all("client-42", None, false).await.unwrap_err();
    assert_eq!(err, GatewayError::SyncInProgress("client-42".to_string()));

    // Other subjects are unaffected, and force bypasses the guard
    assert!(gw.sync_all("client-7", None, false).await.is_ok());
    assert!(gw.sync_all("client-42", None, true).await.is_ok());

    assert!(running.await.unwrap().is_ok());
    // The lease is released on completion
    assert!(gw.sync_all("client-42", None, false).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn replayed_webhook_does_not_duplicate_consolidated_data() {
    let transport = ScriptedTransport::new();
    serve_bank(&transport, "demo-bank");
    let gw = gateway(
        GatewayConfig::with_providers(vec![bank("demo-bank", Quota::default(), false)]),
        transport.clone(),
        clock(),
    );
    activate(&gw, "demo-bank").await;
    gw.sync_all("client-42", None, false).await.unwrap();
    let before = gw.consolidated("client-42").unwrap();
    assert_eq!(before.entities.transactions.len(), 1);

    // The provider books a new transaction and notifies us, twice
    transport.route(
        &format!("{}/transactions", base_url("demo-bank")),
        200,
        json!([
            { "id": "t-1", "accountId": "acc-1", "amount": "-20.00", "currency": "EUR" },
            { "id": "t-2", "accountId": "acc-1", "amount": "-5.00", "currency": "EUR" }
        ]),
    );
    let event = WebhookEvent {
        event_type: WebhookEventType::NewTransaction,
        provider: "demo-bank".to_string(),
        subject_id: Some("client-42".to_string()),
        timestamp: Utc::now(),
        payload: json!({ "transactionId": "t-2" }),
    };
    gw.start();
    gw.on_webhook(event.clone()).unwrap();
    gw.on_webhook(event).unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;

    let after = gw.consolidated("client-42").unwrap();
    let ids: Vec<_> = after
        .entities
        .transactions
        .iter()
        .map(|t| t.id.as_str())
        .collect();
    assert_eq!(ids, vec!["demo-bank:t-1", "demo-bank:t-2"]);
    assert_eq!(after.totals.account_count, 1);
    assert_eq!(after.totals.balances_by_currency["EUR"], dec!(100.00));
    // The second event was coalesced into the pending resync
    assert_eq!(transport.calls_to("https://demo-bank.test/transactions"), 2);
    assert!(gw.dead_letters().is_empty());

    gw.stop().await;
}

#[tokio::test(start_paused = true)]
async fn unprocessable_webhook_is_dead_lettered() {
    let transport = ScriptedTransport::new();
    let gw = gateway(GatewayConfig::default(), transport, clock());
    gw.start();

    gw.on_webhook(WebhookEvent {
        event_type: WebhookEventType::BalanceChange,
        provider: "unknown-bank".to_string(),
        subject_id: Some("client-42".to_string()),
        timestamp: Utc::now(),
        payload: json!({}),
    })
    .unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;

    let dead = gw.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 5);
    assert!(dead[0].last_error.contains("unknown-bank"));
    assert_eq!(gw.webhook_queue_len(), 0);
    gw.stop().await;
}

#[tokio::test(start_paused = true)]
async fn connection_error_webhook_degrades_health_without_deactivating() {
    let transport = ScriptedTransport::new();
    serve_bank(&transport, "demo-bank");
    let gw = gateway(
        GatewayConfig::with_providers(vec![bank("demo-bank", Quota::default(), false)]),
        transport,
        clock(),
    );
    activate(&gw, "demo-bank").await;
    gw.start();

    gw.on_webhook(WebhookEvent {
        event_type: WebhookEventType::ConnectionError,
        provider: "demo-bank".to_string(),
        subject_id: None,
        timestamp: Utc::now(),
        payload: json!({ "message": "consent expired" }),
    })
    .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let health = &gw.get_health()[0];
    assert_eq!(health.status, HealthStatus::Error);
    assert_eq!(health.message.as_deref(), Some("consent expired"));
    assert!(gw.is_active("demo-bank").unwrap());
    gw.stop().await;
}

#[tokio::test(start_paused = true)]
async fn health_monitor_probes_active_providers() {
    let transport = ScriptedTransport::new();
    serve_bank(&transport, "demo-bank");
    let config = GatewayConfig {
        health_check_interval: Duration::from_secs(60),
        ..GatewayConfig::with_providers(vec![bank("demo-bank", Quota::default(), false)])
    };
    let gw = gateway(config, transport.clone(), clock());
    activate(&gw, "demo-bank").await;
    gw.start();

    transport.route(
        &format!("{}/status", base_url("demo-bank")),
        503,
        json!({ "message": "maintenance" }),
    );
    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(gw.get_health()[0].status, HealthStatus::Error);
    // Probe failures never deactivate
    assert!(gw.is_active("demo-bank").unwrap());
    assert_eq!(transport.calls_to("https://demo-bank.test/status"), 2);
    gw.stop().await;
}

#[tokio::test]
async fn test_connection_reports_latency_and_failure() {
    let transport = ScriptedTransport::new();
    serve_bank(&transport, "demo-bank");
    let gw = gateway(
        GatewayConfig::with_providers(vec![bank("demo-bank", Quota::default(), false)]),
        transport.clone(),
        clock(),
    );
    gw.activate("demo-bank", Credentials::new("client", "secret"))
        .await
        .unwrap();

    let ok = gw.test_connection("demo-bank").await.unwrap();
    assert!(ok.success);
    assert!(ok.latency_ms.is_some());

    transport.route(&format!("{}/status", base_url("demo-bank")), 404, json!({}));
    let failed = gw.test_connection("demo-bank").await.unwrap();
    assert!(!failed.success);
    assert!(failed.message.contains("404"));

    assert!(matches!(
        gw.test_connection("nope").await,
        Err(GatewayError::UnknownProvider(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn timeout_is_retried_then_surfaced() {
    let transport = ScriptedTransport::new();
    serve_bank(&transport, "demo-bank");
    let gw = gateway(
        GatewayConfig::with_providers(vec![bank("demo-bank", Quota::default(), false)]),
        transport.clone(),
        clock(),
    );
    activate(&gw, "demo-bank").await;
    transport.route_delayed(
        &format!("{}/accounts", base_url("demo-bank")),
        200,
        json!([]),
        Duration::from_secs(10),
    );

    let options = ExecuteOptions::default()
        .with_timeout(Duration::from_secs(1))
        .with_max_retries(1);
    let err = gw
        .execute("demo-bank", "accounts", &Params::new(), Some(options))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Timeout { .. }));
    assert_eq!(transport.calls_to("https://demo-bank.test/accounts"), 2);
    let history = gw.get_history(Some("demo-bank"), 2);
    assert!(history
        .iter()
        .all(|r| r.status == advisor_gateway::RequestStatus::Timeout));
    assert_eq!(gw.get_health()[0].status, HealthStatus::Warning);
}
