//! Generic HTTP request node.
//!
//! `url`, `method`, `headers` and `body` are templated against the merged
//! input. Headers may be an object or a JSON string; a string body is sent
//! as JSON when it parses, verbatim otherwise. Credentials found in the
//! input are attached based on the target host.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, info};

use queue::Payload;

use crate::template::{config_str, render, substitute, substitute_value};
use crate::{NodeContext, NodeError, NodeHandler};

pub struct HttpRequestHandler {
    client: reqwest::Client,
}

impl HttpRequestHandler {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Request body after templating.
#[derive(Debug, Clone, PartialEq)]
enum Body {
    Json(Value),
    Text(String),
}

type Headers = Vec<(String, String)>;

fn has_header(headers: &Headers, name: &str) -> bool {
    headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
}

fn header_value<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn parse_headers(raw: Option<&Value>, input: &Payload) -> Result<Headers, NodeError> {
    let map = match raw {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(s)) => {
            let rendered = substitute(s, input);
            if rendered.trim().is_empty() {
                return Ok(Vec::new());
            }
            match serde_json::from_str::<Value>(&rendered) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => return Err(NodeError::Fatal(format!("Invalid headers format: {rendered}"))),
            }
        }
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Ok(Vec::new()),
    };

    Ok(map
        .iter()
        .map(|(k, v)| (substitute(k, input), substitute(&render(v), input)))
        .collect())
}

fn parse_body(raw: Option<&Value>, input: &Payload) -> Option<Body> {
    match raw {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            let rendered = substitute(s, input);
            if rendered.trim().is_empty() {
                return None;
            }
            Some(match serde_json::from_str::<Value>(&rendered) {
                Ok(v) => Body::Json(v),
                Err(_) => Body::Text(rendered),
            })
        }
        Some(other) => Some(Body::Json(substitute_value(other, input))),
    }
}

fn non_blank<'a>(input: &'a Payload, key: &str) -> Option<&'a str> {
    input
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn flag(config: &Value, key: &str) -> bool {
    config.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn bearer(token: &str) -> (String, String) {
    (AUTHORIZATION.as_str().to_string(), format!("Bearer {token}"))
}

/// Headers to add for credentials carried in the input.
///
/// Google hosts (or `useGoogleAuth`) take `googleAccessToken`, falling back
/// to an explicit `X-Google-Access-Token` header, and stop there. GitHub
/// hosts (or `useGithubAuth`) take `githubAccessToken` then `github_token`.
/// Otherwise an `api_key` goes out as `X-API-Key` (or a bearer token with
/// `useApiKeyAsBearer`), and a templated `authorization` field is sent as
/// the raw `Authorization` header.
fn auth_headers(url: &str, input: &Payload, config: &Value, explicit: &Headers) -> Headers {
    let mut extra = Vec::new();

    if url.contains("googleapis.com") || url.contains("google.com/api") || flag(config, "useGoogleAuth") {
        let token = non_blank(input, "googleAccessToken")
            .or_else(|| header_value(explicit, "X-Google-Access-Token").filter(|t| !t.trim().is_empty()));
        match token {
            Some(t) => extra.push(bearer(t)),
            None => debug!(url = %url, "No Google access token available"),
        }
        return extra;
    }

    if url.contains("api.github.com") || url.contains("github.com/api") || flag(config, "useGithubAuth") {
        if let Some(t) = non_blank(input, "githubAccessToken").or_else(|| non_blank(input, "github_token")) {
            extra.push(bearer(t));
            return extra;
        }
    }

    if let Some(key) = non_blank(input, "api_key") {
        if flag(config, "useApiKeyAsBearer") {
            extra.push(bearer(key));
        } else {
            extra.push(("X-API-Key".into(), key.to_string()));
        }
    }

    if let Some(raw) = config.get("authorization").and_then(Value::as_str).filter(|s| !s.trim().is_empty()) {
        extra.push((AUTHORIZATION.as_str().to_string(), substitute(raw, input)));
    }

    extra
}

/// `OK`, `NOT_FOUND`, ...
fn status_text(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(|r| r.to_uppercase().replace([' ', '-'], "_"))
        .unwrap_or_else(|| "UNKNOWN".into())
}

fn response_output(input: &Payload, status: StatusCode, headers: &HeaderMap, body: String) -> Payload {
    let mut output = input.clone();
    output.insert("http_status_code".into(), Value::from(status.as_u16()));
    output.insert("http_status_text".into(), Value::String(status_text(status)));
    output.insert(
        "http_response_headers".into(),
        Value::Object(
            headers
                .iter()
                .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or_default().to_string())))
                .collect(),
        ),
    );
    output.insert("http_request_successful".into(), Value::Bool(status.is_success()));
    output.insert("executed_at".into(), Value::String(super::timestamp()));

    if !body.trim().is_empty() {
        if let Ok(parsed) = serde_json::from_str::<Value>(&body) {
            if let Value::Object(fields) = &parsed {
                for (k, v) in fields {
                    output.insert(format!("response_{k}"), v.clone());
                }
            }
            output.insert("http_response_json".into(), parsed);
        }
    }
    output.insert("http_response_body".into(), Value::String(body));
    output
}

#[async_trait]
impl NodeHandler for HttpRequestHandler {
    fn node_types(&self) -> &'static [&'static str] {
        &["httpRequest"]
    }

    async fn execute(&self, config: &Value, input: &Payload, ctx: &NodeContext) -> Result<Payload, NodeError> {
        let url = config_str(config, "url", input)
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| NodeError::Fatal("URL is required for HTTP request".into()))?;
        let method = config_str(config, "method", input)
            .unwrap_or_else(|| "GET".into())
            .to_uppercase();
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| NodeError::Fatal(format!("invalid HTTP method: {method}")))?;

        let mut headers = parse_headers(config.get("headers"), input)?;
        let auth = auth_headers(&url, input, config, &headers);
        headers.extend(auth);
        let body = parse_body(config.get("body"), input);

        let mut request = self.client.request(method.clone(), &url);
        for (k, v) in &headers {
            request = request.header(k.as_str(), v.as_str());
        }
        match body {
            Some(Body::Json(v)) => request = request.json(&v),
            Some(Body::Text(t)) => {
                if !has_header(&headers, CONTENT_TYPE.as_str()) {
                    request = request.header(CONTENT_TYPE, "application/json");
                }
                request = request.body(t);
            }
            None => {}
        }

        let response = request.send().await.map_err(NodeError::from_http)?;
        let status = response.status();
        let response_headers = response.headers().clone();
        let text = response.text().await.map_err(NodeError::from_http)?;
        if !status.is_success() {
            return Err(super::status_error("HTTP request", status, &text));
        }

        info!(node_id = %ctx.node_id, method = %method, url = %url, status = status.as_u16(), "HTTP request completed");
        Ok(response_output(input, status, &response_headers, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue::messages::into_payload;
    use serde_json::json;

    fn auth_for(url: &str, input: Value, config: Value) -> Headers {
        auth_headers(url, &into_payload(input), &config, &Vec::new())
    }

    #[test]
    fn google_hosts_get_the_google_token_only() {
        let h = auth_for(
            "https://www.googleapis.com/drive/v3/files",
            json!({ "googleAccessToken": "g-tok", "api_key": "k" }),
            json!({}),
        );
        assert_eq!(h, vec![("authorization".into(), "Bearer g-tok".into())]);
    }

    #[test]
    fn google_token_can_come_from_an_explicit_header() {
        let explicit = vec![("X-Google-Access-Token".to_string(), "hdr".to_string())];
        let h = auth_headers("https://example.com", &Payload::new(), &json!({ "useGoogleAuth": true }), &explicit);
        assert_eq!(h, vec![("authorization".into(), "Bearer hdr".into())]);
    }

    #[test]
    fn github_falls_back_to_generic_token() {
        let h = auth_for("https://api.github.com/user", json!({ "github_token": "gh" }), json!({}));
        assert_eq!(h, vec![("authorization".into(), "Bearer gh".into())]);
    }

    #[test]
    fn api_key_and_custom_authorization() {
        let h = auth_for(
            "https://example.com",
            json!({ "api_key": "k1", "user": "bob" }),
            json!({ "authorization": "Basic {{user}}" }),
        );
        assert_eq!(
            h,
            vec![
                ("X-API-Key".into(), "k1".into()),
                ("authorization".into(), "Basic bob".into()),
            ]
        );

        let bearer = auth_for("https://example.com", json!({ "api_key": "k1" }), json!({ "useApiKeyAsBearer": true }));
        assert_eq!(bearer, vec![("authorization".into(), "Bearer k1".into())]);
    }

    #[test]
    fn headers_accept_objects_and_json_strings() {
        let input = into_payload(json!({ "tenant": "acme" }));
        let from_obj = parse_headers(Some(&json!({ "X-Tenant": "{{tenant}}", "X-Retry": 3 })), &input).unwrap();
        assert!(from_obj.contains(&("X-Tenant".into(), "acme".into())));
        assert!(from_obj.contains(&("X-Retry".into(), "3".into())));

        let from_str = parse_headers(Some(&json!(r#"{"X-Tenant":"{{tenant}}"}"#)), &input).unwrap();
        assert_eq!(from_str, vec![("X-Tenant".into(), "acme".into())]);

        assert!(parse_headers(Some(&json!("not json")), &input).is_err());
    }

    #[test]
    fn string_bodies_parse_as_json_when_possible() {
        let input = into_payload(json!({ "id": 7 }));
        assert_eq!(parse_body(Some(&json!(r#"{"id": {{id}}}"#)), &input), Some(Body::Json(json!({ "id": 7 }))));
        assert_eq!(parse_body(Some(&json!("id={{id}}")), &input), Some(Body::Text("id=7".into())));
        assert_eq!(parse_body(Some(&json!({ "n": "{{id}}" })), &input), Some(Body::Json(json!({ "n": 7 }))));
        assert_eq!(parse_body(Some(&json!("  ")), &input), None);
    }

    #[test]
    fn response_fields_are_flattened() {
        let input = into_payload(json!({ "seed": 1 }));
        let out = response_output(&input, StatusCode::OK, &HeaderMap::new(), r#"{"id":"abc","n":2}"#.into());
        assert_eq!(out["seed"], 1);
        assert_eq!(out["http_status_code"], 200);
        assert_eq!(out["http_status_text"], "OK");
        assert_eq!(out["response_id"], "abc");
        assert_eq!(out["http_response_json"]["n"], 2);
        assert_eq!(out["http_request_successful"], true);
    }

    #[test]
    fn status_text_matches_constant_names() {
        assert_eq!(status_text(StatusCode::NOT_FOUND), "NOT_FOUND");
        assert_eq!(status_text(StatusCode::NON_AUTHORITATIVE_INFORMATION), "NON_AUTHORITATIVE_INFORMATION");
    }
}
