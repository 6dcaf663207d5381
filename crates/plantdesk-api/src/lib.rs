// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use plantdesk_app::{PendingWrite, Record, RecordId};
use reqwest::StatusCode;
use reqwest::blocking::Client as HttpClient;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use url::Url;

/// Auxiliary listing merged into the primary one by foreign key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSpec {
    pub url: String,
    /// Field on the primary object holding the reference.
    pub foreign_key: String,
    /// Field on the auxiliary object it must equal.
    pub key: String,
    /// `(target field, dotted path into the auxiliary object)`.
    pub fields: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub listing_url: String,
    pub update_url: String,
    pub join: Option<JoinSpec>,
}

#[derive(Debug, Clone)]
pub struct Client {
    endpoints: Endpoints,
    timeout: Duration,
    http: HttpClient,
}

impl Client {
    pub fn new(endpoints: Endpoints, timeout: Duration) -> Result<Self> {
        check_url("api.listing_url", &endpoints.listing_url)?;
        check_url("api.update_url", &endpoints.update_url)?;
        if let Some(join) = &endpoints.join {
            check_url("api.join.url", &join.url)?;
            if join.foreign_key.trim().is_empty() || join.key.trim().is_empty() {
                bail!("api.join needs both foreign_key and key");
            }
        }

        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("build HTTP client")?;

        Ok(Self {
            endpoints,
            timeout,
            http,
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch the listing (and the join listing, if configured) and turn it
    /// into records keyed by `id_field`.
    pub fn fetch_records(&self, id_field: &str) -> Result<Vec<Record>> {
        let started = Instant::now();
        let mut primary = expect_objects(
            self.get_json(&self.endpoints.listing_url)?,
            &self.endpoints.listing_url,
        )?;

        if let Some(join) = &self.endpoints.join {
            let auxiliary = expect_objects(self.get_json(&join.url)?, &join.url)?;
            join_objects(&mut primary, &auxiliary, join);
        }

        let records = records_from_objects(primary, id_field)?;
        tracing::info!(
            count = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "listing loaded"
        );
        Ok(records)
    }

    pub fn submit_update(&self, write: &PendingWrite) -> Result<()> {
        let url = &self.endpoints.update_url;
        let body = update_body(write);
        tracing::debug!(id = %write.id, %url, "posting update");

        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .map_err(|error| connection_error(url, self.timeout, error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(clean_error_response(status, &body));
        }
        Ok(())
    }

    fn get_json(&self, url: &str) -> Result<Value> {
        tracing::debug!(%url, "fetching listing");
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|error| connection_error(url, self.timeout, error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(clean_error_response(status, &body));
        }

        response
            .json()
            .with_context(|| format!("decode listing from {url}"))
    }
}

fn check_url(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{name} must not be empty");
    }
    let parsed = Url::parse(value).with_context(|| format!("{name} {value:?} is not a URL"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => bail!("{name} must use http or https, got {other:?}"),
    }
}

fn expect_objects(value: Value, url: &str) -> Result<Vec<Map<String, Value>>> {
    let Value::Array(items) = value else {
        bail!("listing from {url} is not a JSON array");
    };
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(object) => Ok(object),
            _ => Err(anyhow!("listing from {url}: element {index} is not an object")),
        })
        .collect()
}

/// Copy mapped auxiliary fields into each primary object. The first
/// auxiliary object whose `key` equals the primary's `foreign_key` wins; with
/// no match the mapped fields are removed so they read as unset.
pub fn join_objects(
    primary: &mut [Map<String, Value>],
    auxiliary: &[Map<String, Value>],
    join: &JoinSpec,
) {
    for object in primary.iter_mut() {
        let matched = object.get(&join.foreign_key).and_then(|reference| {
            auxiliary
                .iter()
                .find(|candidate| candidate.get(&join.key) == Some(reference))
        });

        for (target, path) in &join.fields {
            let value = matched.and_then(|candidate| lookup_path(candidate, path)).cloned();
            match value {
                Some(value) => {
                    object.insert(target.clone(), value);
                }
                None => {
                    object.remove(target);
                }
            }
        }
    }
}

/// Walk a dotted path like `address.city`.
pub fn lookup_path<'a>(object: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = object.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Text for a scalar JSON value; `None` for null, arrays and objects.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

pub fn records_from_json(value: Value, id_field: &str) -> Result<Vec<Record>> {
    records_from_objects(expect_objects(value, "response")?, id_field)
}

fn records_from_objects(objects: Vec<Map<String, Value>>, id_field: &str) -> Result<Vec<Record>> {
    objects
        .into_iter()
        .enumerate()
        .map(|(index, object)| {
            let id = object
                .get(id_field)
                .ok_or_else(|| anyhow!("record {index} has no {id_field:?} field"))
                .and_then(|value| record_id(value, id_field, index))?;
            let fields: BTreeMap<String, String> = object
                .iter()
                .filter_map(|(key, value)| scalar_text(value).map(|text| (key.clone(), text)))
                .collect();
            Ok(Record::new(id, fields))
        })
        .collect()
}

fn record_id(value: &Value, id_field: &str, index: usize) -> Result<RecordId> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .map(RecordId::Number)
            .ok_or_else(|| anyhow!("record {index}: {id_field} {number} is not an integer")),
        Value::String(text) if !text.is_empty() => Ok(RecordId::Text(text.clone())),
        _ => bail!("record {index}: {id_field} must be a non-empty string or an integer"),
    }
}

/// `{<id field>: id, <write field>: value-or-null, ...}`. The id keeps the JSON
/// type it was fetched with.
pub fn update_body(write: &PendingWrite) -> Value {
    let mut body = Map::new();
    let id = match &write.id {
        RecordId::Number(value) => Value::from(*value),
        RecordId::Text(value) => Value::from(value.as_str()),
    };
    body.insert(write.id_field.clone(), id);
    for (field, value) in &write.values {
        let value = value
            .as_ref()
            .map_or(Value::Null, |text| Value::from(text.as_str()));
        body.insert(field.clone(), value);
    }
    Value::Object(body)
}

fn connection_error(url: &str, timeout: Duration, error: reqwest::Error) -> anyhow::Error {
    if error.is_timeout() {
        return anyhow!("request to {url} timed out after {}ms", timeout.as_millis());
    }
    anyhow!("cannot reach {url} -- check the api URLs in your config ({error})")
}

fn clean_error_response(status: StatusCode, body: &str) -> anyhow::Error {
    if let Ok(parsed) = serde_json::from_str::<ErrorEnvelope>(body)
        && let Some(message) = parsed.message.or(parsed.error)
        && !message.is_empty()
    {
        return anyhow!("server error ({}): {}", status.as_u16(), message);
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() && trimmed.len() < 100 && !trimmed.contains('{') {
        return anyhow!("server error ({}): {}", status.as_u16(), trimmed);
    }

    anyhow!("server error ({})", status.as_u16())
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    message: Option<String>,
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{
        JoinSpec, clean_error_response, join_objects, lookup_path, records_from_json,
        scalar_text, update_body,
    };
    use anyhow::Result;
    use plantdesk_app::{PendingWrite, RecordId, WriteOrigin};
    use reqwest::StatusCode;
    use serde_json::{Map, Value, json};

    fn objects(value: Value) -> Vec<Map<String, Value>> {
        value
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|item| item.as_object().cloned())
            .collect()
    }

    #[test]
    fn update_body_keeps_id_type_and_nulls_unset_fields() {
        let write = PendingWrite {
            id: RecordId::from(2),
            id_field: "id".to_owned(),
            values: vec![
                ("name".to_owned(), Some("B2".to_owned())),
                ("email".to_owned(), None),
            ],
            origin: WriteOrigin::Row,
        };
        assert_eq!(
            update_body(&write),
            json!({"id": 2, "name": "B2", "email": null})
        );

        let write = PendingWrite {
            id: RecordId::from("T-1001"),
            id_field: "MACHINESN".to_owned(),
            values: vec![("CRM_UNIT_ID".to_owned(), Some("U-1".to_owned()))],
            origin: WriteOrigin::Row,
        };
        assert_eq!(
            update_body(&write),
            json!({"MACHINESN": "T-1001", "CRM_UNIT_ID": "U-1"})
        );
    }

    #[test]
    fn records_stringify_scalars_and_skip_nested_values() -> Result<()> {
        let records = records_from_json(
            json!([{"id": 7, "name": "G", "active": true, "note": null, "tags": ["a"]}]),
            "id",
        )?;
        let record = &records[0];
        assert_eq!(record.id, RecordId::from(7));
        assert_eq!(record.value("id"), Some("7"));
        assert_eq!(record.value("active"), Some("true"));
        assert_eq!(record.value("note"), None);
        assert_eq!(record.value("tags"), None);
        Ok(())
    }

    #[test]
    fn records_reject_missing_or_unusable_ids() {
        let error = records_from_json(json!([{"name": "A"}]), "id").expect_err("no id");
        assert!(error.to_string().contains("no \"id\" field"));

        let error = records_from_json(json!([{"id": 1.5}]), "id").expect_err("float id");
        assert!(error.to_string().contains("not an integer"));

        let error = records_from_json(json!({"id": 1}), "id").expect_err("not an array");
        assert!(error.to_string().contains("not a JSON array"));

        let error = records_from_json(json!([1, 2]), "id").expect_err("not objects");
        assert!(error.to_string().contains("element 0 is not an object"));
    }

    #[test]
    fn join_copies_dotted_paths_and_unsets_fields_without_match() {
        let mut posts = objects(json!([
            {"id": 1, "userId": 1, "city": "stale"},
            {"id": 2, "userId": 9, "city": "stale"},
            {"id": 3, "userId": "1"}
        ]));
        let users = objects(json!([
            {"id": 1, "username": "Bret", "address": {"city": "Gwenborough"}},
            {"id": 1, "username": "Shadowed"}
        ]));
        let join = JoinSpec {
            url: "http://localhost/users".to_owned(),
            foreign_key: "userId".to_owned(),
            key: "id".to_owned(),
            fields: vec![
                ("username".to_owned(), "username".to_owned()),
                ("city".to_owned(), "address.city".to_owned()),
            ],
        };

        join_objects(&mut posts, &users, &join);
        assert_eq!(posts[0].get("username"), Some(&json!("Bret")));
        assert_eq!(posts[0].get("city"), Some(&json!("Gwenborough")));
        assert_eq!(posts[1].get("username"), None);
        assert_eq!(posts[1].get("city"), None);
        assert_eq!(posts[2].get("username"), None);
    }

    #[test]
    fn lookup_path_walks_nested_objects() {
        let object = objects(json!([{"address": {"geo": {"lat": "-37.3"}}}])).remove(0);
        assert_eq!(lookup_path(&object, "address.geo.lat"), Some(&json!("-37.3")));
        assert_eq!(lookup_path(&object, "address.zip"), None);
        assert_eq!(lookup_path(&object, "address.geo.lat.deeper"), None);
    }

    #[test]
    fn scalar_text_covers_each_json_kind() {
        assert_eq!(scalar_text(&json!("x")), Some("x".to_owned()));
        assert_eq!(scalar_text(&json!(12)), Some("12".to_owned()));
        assert_eq!(scalar_text(&json!(false)), Some("false".to_owned()));
        assert_eq!(scalar_text(&json!(null)), None);
        assert_eq!(scalar_text(&json!({})), None);
    }

    #[test]
    fn error_responses_are_cleaned() {
        let error = clean_error_response(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert_eq!(error.to_string(), "server error (500): boom");

        let error = clean_error_response(StatusCode::BAD_REQUEST, r#"{"message":"bad id"}"#);
        assert_eq!(error.to_string(), "server error (400): bad id");

        let error = clean_error_response(StatusCode::BAD_GATEWAY, &"<html>".repeat(40));
        assert_eq!(error.to_string(), "server error (502)");
    }
}
