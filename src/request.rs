use std::collections::HashMap;

/// The parts of an incoming request that tokens can be extracted from.
///
/// Every sub-object is optional; extractors treat a missing sub-object the
/// same as a missing field. Header names are stored lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthRequest {
    pub headers: Option<HashMap<String, String>>,
    pub query: Option<HashMap<String, String>>,
    pub body: Option<HashMap<String, String>>,
    pub cookies: Option<HashMap<String, String>>,
}

/// Selects one sub-object of an [`AuthRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestField {
    Headers,
    Query,
    Body,
    Cookies,
}

impl AuthRequest {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(name.to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn body_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.body
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// Replaces the body fields, e.g. with a decoded form or JSON object.
    #[must_use]
    pub fn with_body(mut self, body: HashMap<String, String>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn field(&self, field: RequestField) -> Option<&HashMap<String, String>> {
        match field {
            RequestField::Headers => self.headers.as_ref(),
            RequestField::Query => self.query.as_ref(),
            RequestField::Body => self.body.as_ref(),
            RequestField::Cookies => self.cookies.as_ref(),
        }
    }

    /// Looks up `name` in the selected sub-object.
    pub fn get(&self, field: RequestField, name: &str) -> Option<&str> {
        let values = self.field(field)?;
        let value = match field {
            RequestField::Headers => values.get(&name.to_ascii_lowercase()),
            _ => values.get(name),
        };
        value.map(String::as_str)
    }
}
