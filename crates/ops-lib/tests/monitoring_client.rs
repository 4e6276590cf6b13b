//! Monitoring client against a mock Prometheus/Alertmanager

use mockito::{Matcher, Server};
use ops_lib::monitoring::{AlertSource, MonitoringClient};
use ops_lib::Error;

#[tokio::test]
async fn test_query_decodes_vector() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v1/query")
        .match_query(Matcher::UrlEncoded(
            "query".into(),
            r#"up{job="checkout"}"#.into(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"status":"success","data":{"resultType":"vector","result":[
                {"metric":{"__name__":"up","job":"checkout","instance":"10.0.0.1:8080"},"value":[1709287200.123,"1"]},
                {"metric":{"__name__":"up","job":"checkout","instance":"10.0.0.2:8080"},"value":[1709287200.123,"0"]}
            ]}}"#,
        )
        .create_async()
        .await;

    let client = MonitoringClient::new(Some(&server.url()), None).unwrap();
    let result = client.query(r#"up{job="checkout"}"#).await.unwrap();

    mock.assert_async().await;
    assert_eq!(result.result_type, "vector");
    assert_eq!(result.series.len(), 2);
    assert_eq!(result.series[1].value(), Some("0"));
    assert_eq!(result.series[1].metric["instance"], "10.0.0.2:8080");
}

#[tokio::test]
async fn test_query_error_status_is_reported() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/api/v1/query")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"status":"error","errorType":"bad_data","error":"parse error at char 4"}"#)
        .create_async()
        .await;

    let client = MonitoringClient::new(Some(&server.url()), None).unwrap();
    let err = client.query("up{").await.unwrap_err();

    assert!(matches!(err, Error::Monitoring(_)));
    assert!(err.to_string().contains("parse error"));
}

#[tokio::test]
async fn test_non_200_is_an_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/api/v1/query")
        .match_query(Matcher::Any)
        .with_status(503)
        .with_body("service unavailable")
        .create_async()
        .await;

    let client = MonitoringClient::new(Some(&server.url()), None).unwrap();
    let err = client.query("up").await.unwrap_err();
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn test_list_metrics_filters_by_job() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v1/label/__name__/values")
        .match_query(Matcher::UrlEncoded(
            "match[]".into(),
            r#"{job="checkout"}"#.into(),
        ))
        .with_status(200)
        .with_body(r#"{"status":"success","data":["http_requests_total","process_cpu_seconds_total","up"]}"#)
        .create_async()
        .await;

    let client = MonitoringClient::new(Some(&server.url()), None).unwrap();
    let names = client.list_metrics("checkout").await.unwrap();

    mock.assert_async().await;
    assert_eq!(names.len(), 3);
    assert!(names.contains(&"up".to_string()));
}

#[tokio::test]
async fn test_active_alerts_from_alertmanager() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v2/alerts")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"[{
                "labels": {"alertname": "HighErrorRate", "service": "checkout", "severity": "critical"},
                "annotations": {"summary": "5xx above 5%", "description": "checkout is failing requests"},
                "startsAt": "2024-03-01T10:00:00.000Z",
                "endsAt": "2024-03-01T10:05:00.000Z",
                "status": {"state": "active", "silencedBy": [], "inhibitedBy": []}
            }]"#,
        )
        .create_async()
        .await;

    let client = MonitoringClient::new(None, Some(&format!("{}/", server.url()))).unwrap();
    let alerts = AlertSource::active_alerts(&client).await.unwrap();

    mock.assert_async().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].name(), "HighErrorRate");
    assert_eq!(alerts[0].severity(), Some("critical"));
    assert_eq!(alerts[0].annotation("summary"), Some("5xx above 5%"));
}

#[tokio::test]
async fn test_unconfigured_backend_is_config_error() {
    let client = MonitoringClient::new(Some("http://prometheus:9090"), None).unwrap();
    let err = client.active_alerts().await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

fn vector(samples: &[(&str, &str)]) -> String {
    let result: Vec<String> = samples
        .iter()
        .map(|(pod, value)| {
            format!(r#"{{"metric":{{"pod":"{pod}","namespace":"shop"}},"value":[1709287200,"{value}"]}}"#)
        })
        .collect();
    format!(
        r#"{{"status":"success","data":{{"resultType":"vector","result":[{}]}}}}"#,
        result.join(",")
    )
}

async fn mock_query(server: &mut mockito::ServerGuard, patterns: &[&str], body: String) -> mockito::Mock {
    let matchers = patterns
        .iter()
        .map(|p| Matcher::Regex(p.to_string()))
        .collect();
    server
        .mock("GET", "/api/v1/query")
        .match_query(Matcher::AllOf(matchers))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body)
        .create_async()
        .await
}

#[tokio::test]
async fn test_dashboard_collects_pod_usage_and_job_alerts() {
    let mut prometheus = Server::new_async().await;
    let pods = prometheus
        .mock("GET", "/api/v1/query")
        .match_query(Matcher::UrlEncoded(
            "query".into(),
            r#"up{job="checkout", namespace="shop"}"#.into(),
        ))
        .with_status(200)
        .with_body(vector(&[("checkout-a", "1"), ("checkout-b", "1")]))
        .create_async()
        .await;
    let _cpu = mock_query(
        &mut prometheus,
        &["container_cpu_usage_seconds_total"],
        vector(&[("checkout-a", "0.5"), ("checkout-b", "1.2")]),
    )
    .await;
    let _cpu_limit = mock_query(
        &mut prometheus,
        &["kube_pod_container_resource_limits", "cpu"],
        vector(&[("checkout-a", "1"), ("checkout-b", "2")]),
    )
    .await;
    let _memory = mock_query(
        &mut prometheus,
        &["container_memory_working_set_bytes"],
        vector(&[("checkout-a", "1073741824")]),
    )
    .await;
    let _memory_limit = mock_query(
        &mut prometheus,
        &["kube_pod_container_resource_limits", "memory"],
        vector(&[("checkout-a", "2147483648")]),
    )
    .await;
    let _restarts = mock_query(
        &mut prometheus,
        &["kube_pod_container_status_restarts_total"],
        vector(&[("checkout-b", "5")]),
    )
    .await;
    let _ready = mock_query(
        &mut prometheus,
        &["kube_pod_status_ready"],
        vector(&[("checkout-a", "1"), ("checkout-b", "0")]),
    )
    .await;
    let _oom = mock_query(
        &mut prometheus,
        &["kube_pod_container_status_last_terminated_reason"],
        vector(&[("checkout-b", "1")]),
    )
    .await;

    let mut alertmanager = Server::new_async().await;
    let _alerts = alertmanager
        .mock("GET", "/api/v2/alerts")
        .with_status(200)
        .with_body(
            r#"[
                {"labels": {"alertname": "HighCPU", "job": "checkout", "namespace": "shop"}, "annotations": {}, "status": {"state": "active"}},
                {"labels": {"alertname": "HighCPU", "job": "checkout", "namespace": "staging"}, "annotations": {}, "status": {"state": "active"}},
                {"labels": {"alertname": "Down", "job": "search"}, "annotations": {}, "status": {"state": "active"}}
            ]"#,
        )
        .create_async()
        .await;

    let client = MonitoringClient::new(Some(&prometheus.url()), Some(&alertmanager.url())).unwrap();
    let dashboard = client.dashboard("checkout", Some("shop")).await.unwrap();

    pods.assert_async().await;
    assert_eq!(dashboard.job, "checkout");
    assert_eq!(dashboard.alerts.len(), 1);
    assert_eq!(dashboard.alerts[0].name(), "HighCPU");

    let names: Vec<&str> = dashboard.pods.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["checkout-a", "checkout-b"]);

    let a = &dashboard.pods[0];
    assert_eq!(a.cpu_usage_cores, 0.5);
    assert_eq!(a.cpu_limit_cores, 1.0);
    assert_eq!(a.memory_usage_bytes, 1073741824.0);
    assert_eq!(a.memory_limit_bytes, 2147483648.0);
    assert_eq!(a.restarts, 0);
    assert!(a.ready);
    assert!(!a.oom_killed);
    // no phase mock: that query fails and is skipped
    assert_eq!(a.phase, None);

    let b = &dashboard.pods[1];
    assert_eq!(b.cpu_usage_cores, 1.2);
    assert_eq!(b.cpu_limit_cores, 2.0);
    assert_eq!(b.memory_usage_bytes, 0.0);
    assert_eq!(b.restarts, 5);
    assert!(!b.ready);
    assert!(b.oom_killed);
}

#[tokio::test]
async fn test_dashboard_without_pods_skips_usage_queries() {
    let mut prometheus = Server::new_async().await;
    let up = prometheus
        .mock("GET", "/api/v1/query")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#)
        .expect(1)
        .create_async()
        .await;

    let client = MonitoringClient::new(Some(&prometheus.url()), None).unwrap();
    let dashboard = client.dashboard("checkout", None).await.unwrap();

    up.assert_async().await;
    assert!(dashboard.pods.is_empty());
    assert!(dashboard.alerts.is_empty());
}

#[tokio::test]
async fn test_dashboard_without_alertmanager_still_reports_pods() {
    let mut prometheus = Server::new_async().await;
    let _up = prometheus
        .mock("GET", "/api/v1/query")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(vector(&[("checkout-a", "1")]))
        .create_async()
        .await;

    let client = MonitoringClient::new(Some(&prometheus.url()), None).unwrap();
    let dashboard = client.dashboard("checkout", None).await.unwrap();

    assert!(dashboard.alerts.is_empty());
    assert_eq!(dashboard.pods.len(), 1);
    assert_eq!(dashboard.pods[0].name, "checkout-a");
}

#[tokio::test]
async fn test_dashboard_fails_when_pods_cannot_be_listed() {
    let mut prometheus = Server::new_async().await;
    let _up = prometheus
        .mock("GET", "/api/v1/query")
        .match_query(Matcher::Any)
        .with_status(503)
        .create_async()
        .await;

    let client = MonitoringClient::new(Some(&prometheus.url()), None).unwrap();
    let err = client.dashboard("checkout", None).await.unwrap_err();
    assert!(matches!(err, Error::Monitoring(_)));
}
