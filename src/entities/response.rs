use serde_json::Value;

/// Response envelope handed back to the hosting HTTP layer: a status
/// code, a JSON body rendered pretty-printed, an optional location
/// pointer for creations, and an optional total-count header value.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Value,
    pub location: Option<String>,
    pub count: Option<u64>,
}

impl Response {
    #[must_use]
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body, location: None, count: None }
    }

    #[must_use]
    pub fn with_location(mut self, location: String) -> Self {
        self.location = Some(location);
        self
    }

    #[must_use]
    pub fn with_count(mut self, count: Option<u64>) -> Self {
        self.count = count;
        self
    }

    /// The body as pretty-printed JSON, ready for the wire.
    #[must_use]
    pub fn body_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.body).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pretty_body_is_indented() {
        let r = Response::new(200, json!({"a": 1}));
        assert_eq!(r.body_pretty(), "{\n  \"a\": 1\n}");
    }

    #[test]
    fn location_and_count_are_carried() {
        let r = Response::new(201, json!({}))
            .with_location("v1/entities/e1?type=Thing".into())
            .with_count(Some(3));
        assert_eq!(r.location.as_deref(), Some("v1/entities/e1?type=Thing"));
        assert_eq!(r.count, Some(3));
    }
}
