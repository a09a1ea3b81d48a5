use spin_sdk::http::Response;

/// What a handler produces. Turned into a Spin response once the session
/// has been written back.
#[derive(Debug)]
pub enum Reply {
    Page { status: u16, html: String },
    Redirect(String),
    Asset { content_type: String, body: Vec<u8> },
}

impl Reply {
    pub fn page(html: String) -> Self {
        Reply::Page { status: 200, html }
    }

    pub fn page_with_status(status: u16, html: String) -> Self {
        Reply::Page { status, html }
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        Reply::Redirect(location.into())
    }

    pub fn status(&self) -> u16 {
        match self {
            Reply::Page { status, .. } => *status,
            Reply::Redirect(_) => 303,
            Reply::Asset { .. } => 200,
        }
    }

    pub fn into_response(self, set_cookie: Option<String>) -> Response {
        let mut builder = Response::builder();
        if let Some(cookie) = set_cookie {
            builder.header("set-cookie", cookie);
        }

        match self {
            Reply::Page { status, html } => builder
                .status(status)
                .header("content-type", "text/html; charset=utf-8")
                .body(html.into_bytes())
                .build(),
            Reply::Redirect(location) => builder
                .status(303)
                .header("location", location)
                .body(Vec::new())
                .build(),
            Reply::Asset { content_type, body } => builder
                .status(200)
                .header("content-type", content_type)
                .body(body)
                .build(),
        }
    }
}
