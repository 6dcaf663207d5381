// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow};
use plantdesk_app::{ColumnSpec, Record, RecordId, TableConfig};
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tiny_http::{Header, Response, Server};

pub const NAMES_JSON: &str = r#"[{"id":1,"name":"A"},{"id":2,"name":"B"}]"#;

pub const PLANTS_JSON: &str = r#"[
  {"MACHINESN":"T-1001","FRAME":"7FA","PLANTADDRESS1":"1-1 Minato","PLANTNAME":"Kawasaki","UNITNAME":"GT1","CRM_PLANT_ID":"P-10","CRM_UNIT_ID":"U-100"},
  {"MACHINESN":"T-1002","FRAME":"9HA","PLANTADDRESS1":"2-4 Senboku","PLANTNAME":"Sakai","UNITNAME":"GT2","CRM_PLANT_ID":null,"CRM_UNIT_ID":"U-200"},
  {"MACHINESN":"T-1003","FRAME":"7FA","PLANTADDRESS1":"3-9 Shikama","PLANTNAME":"Himeji","UNITNAME":"ST1"}
]"#;

pub const POSTS_JSON: &str = r#"[
  {"userId":1,"id":1,"title":"sunt aut facere","body":"quia et suscipit","status":"新規"},
  {"userId":2,"id":2,"title":"qui est esse","body":"est rerum tempore","status":"変更"},
  {"userId":9,"id":3,"title":"ea molestias","body":"et iusto sed","status":"変更"}
]"#;

pub const USERS_JSON: &str = r#"[
  {"id":1,"username":"Bret","email":"Sincere@april.biz","phone":"1-770-736-8031","address":{"city":"Gwenborough"}},
  {"id":2,"username":"Antonette","email":"Shanna@melissa.tv","phone":"010-692-6593","address":{"city":"Wisokyburgh"}}
]"#;

/// Table with a read-only numeric `id` and one searchable, editable `name`.
pub fn name_table_config() -> TableConfig {
    TableConfig {
        title: "names".to_owned(),
        columns: vec![
            ColumnSpec::new("id", "ID", 1),
            ColumnSpec::new("name", "Name", 2).searchable().editable(),
        ],
        ..TableConfig::default()
    }
}

pub fn name_record(id: i64, name: &str) -> Record {
    Record::new(RecordId::from(id), BTreeMap::new())
        .with_field("id", &id.to_string())
        .with_field("name", name)
}

pub fn two_records() -> Vec<Record> {
    vec![name_record(1, "A"), name_record(2, "B")]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub method: String,
    pub path: String,
    pub status: u16,
    pub body: String,
    pub delay: Duration,
}

impl Route {
    pub fn get(path: &str, status: u16, body: &str) -> Self {
        Self::new("GET", path, status, body)
    }

    pub fn post(path: &str, status: u16, body: &str) -> Self {
        Self::new("POST", path, status, body)
    }

    fn new(method: &str, path: &str, status: u16, body: &str) -> Self {
        Self {
            method: method.to_owned(),
            path: path.to_owned(),
            status,
            body: body.to_owned(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub content_type: Option<String>,
    pub body: String,
}

/// A listing/update backend on an ephemeral local port. Unknown routes get a
/// 404. Requests are recorded in arrival order.
pub struct MockBackend {
    base_url: String,
    server: Arc<Server>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: Option<JoinHandle<()>>,
}

impl MockBackend {
    pub fn start(routes: Vec<Route>) -> Result<Self> {
        let server = Server::http("127.0.0.1:0")
            .map_err(|error| anyhow!("start mock server: {error}"))?;
        let base_url = format!("http://{}", server.server_addr());
        let server = Arc::new(server);
        let requests = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let server = Arc::clone(&server);
            let requests = Arc::clone(&requests);
            thread::spawn(move || serve(&server, &routes, &requests))
        };

        Ok(Self {
            base_url,
            server,
            requests,
            handle: Some(handle),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn posted_json(&self) -> Result<Vec<serde_json::Value>> {
        self.requests()
            .into_iter()
            .filter(|request| request.method == "POST")
            .map(|request| {
                serde_json::from_str(&request.body)
                    .with_context(|| format!("decode posted body {:?}", request.body))
            })
            .collect()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve(server: &Server, routes: &[Route], requests: &Mutex<Vec<RecordedRequest>>) {
    for mut request in server.incoming_requests() {
        let method = request.method().to_string();
        let path = request.url().to_owned();
        let content_type = request
            .headers()
            .iter()
            .find(|header| header.field.equiv("Content-Type"))
            .map(|header| header.value.as_str().to_owned());
        let mut body = String::new();
        let _ = request.as_reader().read_to_string(&mut body);

        if let Ok(mut recorded) = requests.lock() {
            recorded.push(RecordedRequest {
                method: method.clone(),
                path: path.clone(),
                content_type,
                body,
            });
        }

        let route = routes
            .iter()
            .find(|route| route.method == method && route.path == path)
            .cloned();
        thread::spawn(move || {
            let (status, body, delay) = match route {
                Some(route) => (route.status, route.body, route.delay),
                None => (404, "not found".to_owned(), Duration::ZERO),
            };
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            let mut response = Response::from_string(body).with_status_code(status);
            if let Ok(header) = Header::from_bytes("Content-Type", "application/json") {
                response = response.with_header(header);
            }
            let _ = request.respond(response);
        });
    }
}
