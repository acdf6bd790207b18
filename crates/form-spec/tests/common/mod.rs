#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use form_spec::{FormDefinition, HttpRequest, HttpResponse, HttpTransport, TransportError};

pub fn fixture(name: &str) -> &'static str {
    match name {
        "signup_form" => include_str!("../fixtures/signup_form.json"),
        "webhook_form" => include_str!("../fixtures/webhook_form.json"),
        "routing_form" => include_str!("../fixtures/routing_form.json"),
        "checked_form" => include_str!("../fixtures/checked_form.json"),
        _ => panic!("unknown fixture {}", name),
    }
}

pub fn load_form(name: &str) -> FormDefinition {
    serde_json::from_str(fixture(name)).expect("deserialize form fixture")
}

/// Answers requests from a queue and records what was sent.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_json(&self, status: u16, body: Value) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(HttpResponse::json(status, &body)));
    }

    pub fn push(&self, response: Result<HttpResponse, TransportError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Request("no scripted response".into())))
    }
}
