//! Resolves an endpoint template and params into a concrete request.

use serde_json::{Map, Value};

use crate::errors::{GatewayError, Result};
use crate::models::{AuthHeaders, EndpointTemplate, Params, ProviderConfig};
use crate::transport::{ProviderRequest, RequestBody};

fn param_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitutes `{name}` placeholders in `path`.
///
/// Returns the resolved path and the params that were not consumed.
pub(crate) fn substitute_path(
    provider_id: &str,
    path: &str,
    params: &Params,
) -> Result<(String, Params)> {
    let mut remaining = params.clone();
    let mut resolved = String::with_capacity(path.len());
    let mut rest = path;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}').map(|i| open + i) else {
            return Err(GatewayError::Config(format!(
                "Unterminated placeholder in path '{}' for provider {}",
                path, provider_id
            )));
        };
        resolved.push_str(&rest[..open]);
        let name = &rest[open + 1..close];
        let value = remaining.remove(name).ok_or_else(|| {
            GatewayError::Config(format!(
                "Missing path parameter '{}' for provider {}",
                name, provider_id
            ))
        })?;
        resolved.push_str(&urlencoding::encode(&param_text(&value)));
        rest = &rest[close + 1..];
    }
    resolved.push_str(rest);

    Ok((resolved, remaining))
}

fn join_url(base_url: &str, path: &str) -> String {
    if path.is_empty() || path == "/" {
        return base_url.trim_end_matches('/').to_string() + "/";
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

pub(crate) fn build_request(
    provider: &ProviderConfig,
    template: &EndpointTemplate,
    params: &Params,
    auth: &AuthHeaders,
) -> Result<ProviderRequest> {
    let (path, remaining) = substitute_path(&provider.id, &template.path, params)?;
    let mut url = join_url(&provider.base_url, &path);

    let body = if template.method.has_body() {
        if remaining.is_empty() {
            RequestBody::None
        } else {
            RequestBody::Json(Value::Object(remaining.into_iter().collect::<Map<_, _>>()))
        }
    } else {
        if !remaining.is_empty() {
            let query = remaining
                .iter()
                .map(|(name, value)| {
                    format!(
                        "{}={}",
                        urlencoding::encode(name),
                        urlencoding::encode(&param_text(value))
                    )
                })
                .collect::<Vec<_>>()
                .join("&");
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&query);
        }
        RequestBody::None
    };

    Ok(ProviderRequest {
        provider_id: provider.id.clone(),
        method: template.method,
        url,
        headers: auth
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
        body,
    })
}

/// Best-effort human message out of an error body.
pub(crate) fn upstream_message(body: &Value) -> Option<String> {
    match body {
        Value::Object(map) => ["message", "error_description", "error", "detail"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string),
        Value::String(text) if !text.is_empty() => Some(text.chars().take(200).collect()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthScheme, HttpMethod, ProviderCategory, Quota};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn provider() -> ProviderConfig {
        ProviderConfig {
            id: "demo-bank".to_string(),
            name: "Demo Bank".to_string(),
            category: ProviderCategory::Banking,
            base_url: "https://bank.test/api/".to_string(),
            version: "v1".to_string(),
            auth: AuthScheme::Bearer,
            quota: Quota::default(),
            operations: BTreeMap::new(),
            probe_operation: None,
            sync_operations: Vec::new(),
        }
    }

    fn params(pairs: &[(&str, Value)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_placeholders_are_encoded_and_consumed() {
        let (path, rest) = substitute_path(
            "demo-bank",
            "/accounts/{accountId}/transactions",
            &params(&[("accountId", json!("a b/1")), ("from", json!("2024-01-01"))]),
        )
        .unwrap();
        assert_eq!(path, "/accounts/a%20b%2F1/transactions");
        assert_eq!(rest.len(), 1);
        assert!(rest.contains_key("from"));
    }

    #[test]
    fn test_missing_placeholder_is_an_error() {
        let err = substitute_path("demo-bank", "/accounts/{id}", &Params::new()).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn test_get_puts_leftovers_in_query() {
        let mut auth = AuthHeaders::new();
        auth.insert("Authorization", "Bearer t");
        let request = build_request(
            &provider(),
            &EndpointTemplate::get("/quotes/{symbol}"),
            &params(&[("symbol", json!("AAPL")), ("limit", json!(5))]),
            &auth,
        )
        .unwrap();
        assert_eq!(request.url, "https://bank.test/api/quotes/AAPL?limit=5");
        assert_eq!(request.body, RequestBody::None);
        assert_eq!(request.headers[0].0, "Authorization");
    }

    #[test]
    fn test_post_puts_leftovers_in_body() {
        let mut template = EndpointTemplate::get("/transfers");
        template.method = HttpMethod::Post;
        let request = build_request(
            &provider(),
            &template,
            &params(&[("amount", json!(10))]),
            &AuthHeaders::new(),
        )
        .unwrap();
        assert_eq!(request.url, "https://bank.test/api/transfers");
        assert_eq!(request.body, RequestBody::Json(json!({"amount": 10})));
    }

    #[test]
    fn test_upstream_message() {
        assert_eq!(
            upstream_message(&json!({"message": "bad"})),
            Some("bad".to_string())
        );
        assert_eq!(upstream_message(&Value::Null), None);
    }
}
