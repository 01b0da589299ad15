use hyper::StatusCode;

/// Response body: fully buffered bytes or a streamed hyper body whose
/// chunks are forwarded verbatim.
#[derive(Debug)]
pub enum ResponseBody {
    Full(Vec<u8>),
    Stream(hyper::Body),
}

impl Default for ResponseBody {
    fn default() -> Self {
        ResponseBody::Full(Vec::new())
    }
}

/// Outgoing response committed by the routing engine.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: ResponseBody::default(),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body("Not Found".as_bytes().to_vec())
    }

    pub fn bad_request(message: Option<&str>) -> Self {
        let body = message.unwrap_or("Bad Request");
        Self::new(StatusCode::BAD_REQUEST)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(body.as_bytes().to_vec())
    }

    pub fn method_not_allowed(allow: &str) -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED).with_header("Allow", allow)
    }

    pub fn internal_error() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body("Internal Server Error".as_bytes().to_vec())
    }

    pub fn bad_gateway(message: Option<&str>) -> Self {
        let body = message.unwrap_or("Bad Gateway");
        Self::new(StatusCode::BAD_GATEWAY)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(body.as_bytes().to_vec())
    }

    /// 3xx with `Location`; 308 additionally carries a `Refresh` hint for
    /// clients that do not replay non-GET methods.
    pub fn redirect(location: &str, status: u16) -> Self {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::FOUND);
        let mut response = Self::new(status).with_header("Location", location);
        if status == StatusCode::PERMANENT_REDIRECT {
            response = response.with_header("Refresh", &format!("0;url={}", location));
        }
        response
    }

    pub fn html(content: impl Into<String>) -> Self {
        Self::ok()
            .with_header("Content-Type", "text/html; charset=utf-8")
            .with_body(content.into().into_bytes())
    }

    pub fn json_body(content: String) -> Self {
        Self::ok()
            .with_header("Content-Type", "application/json")
            .with_body(content.into_bytes())
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::ok()
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(content.into().into_bytes())
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// First header value, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = ResponseBody::Full(body);
        self
    }

    pub fn with_stream(mut self, body: hyper::Body) -> Self {
        self.body = ResponseBody::Stream(body);
        self
    }

    /// Buffered body bytes; empty for streamed bodies.
    pub fn body_bytes(&self) -> &[u8] {
        match &self.body {
            ResponseBody::Full(bytes) => bytes,
            ResponseBody::Stream(_) => &[],
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.body, ResponseBody::Stream(_))
    }

    pub fn into_hyper(self) -> hyper::Response<hyper::Body> {
        let mut builder = hyper::Response::builder().status(self.status);

        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }

        let body = match self.body {
            ResponseBody::Full(bytes) => hyper::Body::from(bytes),
            ResponseBody::Stream(stream) => stream,
        };

        builder
            .body(body)
            .unwrap_or_else(|_| hyper::Response::new(hyper::Body::empty()))
    }
}
