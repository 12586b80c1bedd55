//! The small, framework-agnostic shape the engine needs from an inbound
//! request and an executed handler's response. The axum adapter is the only
//! place that knows how to build these from real `http` types.

/// What the engine needs to extract an idempotency key and, when the
/// oversell guard is enabled, the resource/quantity pair.
#[derive(Debug, Clone, Default)]
pub struct IdempotentRequest {
    /// The raw header value, if present.
    pub header_key: Option<String>,
    /// A same-named JSON body field, used as a fallback for POST requests
    /// when the header is absent.
    pub body_key: Option<String>,
    pub resource_id: Option<String>,
    pub quantity: Option<u64>,
}

impl IdempotentRequest {
    pub fn key(&self) -> Option<&str> {
        self.header_key
            .as_deref()
            .or(self.body_key.as_deref())
    }
}

/// The captured shape of whatever the downstream handler produced, and of a
/// replayed response read back from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl CapturedResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>, headers: Vec<(String, String)>) -> Self {
        Self {
            status,
            body: body.into(),
            headers,
        }
    }

    pub fn json_error(status: u16, message: &str) -> Self {
        let body = serde_json::json!({ "error": message }).to_string().into_bytes();
        Self {
            status,
            body,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
        }
    }
}
