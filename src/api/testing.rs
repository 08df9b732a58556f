//! In-memory transport for exercising the protocol without a coordinator

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::transport::{ApiRequest, ApiResponse, Transport};
use crate::error::ApiError;

/// Replays scripted replies in order and records every request it sees
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<ApiResponse, ApiError>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, status: u16, body: serde_json::Value) {
        self.push(Ok(ApiResponse {
            status,
            body: body.to_string().into_bytes(),
        }));
    }

    pub fn reply_empty(&self, status: u16) {
        self.push(Ok(ApiResponse {
            status,
            body: Vec::new(),
        }));
    }

    pub fn fail_connect(&self) {
        self.push(Err(ApiError::Connect("connection refused".into())));
    }

    pub fn fail_request(&self) {
        self.push(Err(ApiError::Request("builder error".into())));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn push(&self, reply: Result<ApiResponse, ApiError>) {
        self.replies.lock().unwrap().push_back(reply);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Request("no scripted reply".into())))
    }
}
