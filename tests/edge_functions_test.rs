//! End-to-end edge-function scenarios through the full routing engine.

mod common;

use common::*;
use edgekit::prelude::*;

const NO_ROUTES: &str = "{}";

fn edge<F>(f: F) -> Arc<dyn EdgeFunction>
where
    F: Fn(&EdgeRequest, &mut EdgeResponse) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(FnEdge(f))
}

#[tokio::test]
async fn test_chained_rewrite_sequence() {
    let app = build_app(
        NO_ROUTES,
        Arc::new(FakePages::new()),
        FakeStatic::new(),
        vec![
            (
                "/rewrite-me-to-about-with-chained-sequence",
                edge(|_req, res| res.rewrite("/about-with-chained-sequence")),
            ),
            (
                "/about-with-chained-sequence",
                edge(|_req, res| res.send_text("this is a chained response")),
            ),
        ],
        |_| {},
    );

    let response = app
        .handle(&Request::new("GET", "/rewrite-me-to-about-with-chained-sequence"))
        .await
        .unwrap();
    let (status, headers, body) = read_body(response).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"this is a chained response");
    assert_eq!(header(&headers, "x-nextjs-functions"), Some("2"));
}

#[tokio::test]
async fn test_ab_bucket_cookie() {
    let app = build_app(
        NO_ROUTES,
        Arc::new(
            FakePages::new()
                .with_page("/home/a", "Welcome Page A")
                .with_page("/home/b", "Welcome Page B"),
        ),
        FakeStatic::new(),
        vec![(
            "/home",
            edge(|req, res| {
                let bucket = match req.cookie("bucket") {
                    Some(existing) => existing.to_string(),
                    None => {
                        let chosen = if rand::random::<bool>() { "a" } else { "b" };
                        res.cookie("bucket", &json!(chosen), &CookieOptions::default())?;
                        chosen.to_string()
                    }
                };
                res.rewrite(&format!("/home/{}", bucket))
            }),
        )],
        |_| {},
    );

    let response = app.handle(&Request::new("GET", "/home")).await.unwrap();
    let (status, headers, body) = read_body(response).await;
    assert_eq!(status, 200);

    let cookies = header_all(&headers, "set-cookie");
    assert_eq!(cookies.len(), 1, "exactly one Set-Cookie expected");
    let cookie = cookies[0];
    assert!(
        cookie.starts_with("bucket=a; Path=/") || cookie.starts_with("bucket=b; Path=/"),
        "got {}",
        cookie
    );

    let expected: &[u8] = if cookie.starts_with("bucket=a") {
        b"Welcome Page A"
    } else {
        b"Welcome Page B"
    };
    assert_eq!(body, expected);

    // Sentinels never reach the client
    assert!(header(&headers, "x-nextjs-rewrite").is_none());
}

#[tokio::test]
async fn test_returning_visitor_keeps_bucket() {
    let app = build_app(
        NO_ROUTES,
        Arc::new(
            FakePages::new()
                .with_page("/home/a", "Welcome Page A")
                .with_page("/home/b", "Welcome Page B"),
        ),
        FakeStatic::new(),
        vec![(
            "/home",
            edge(|req, res| {
                let bucket = match req.cookie("bucket") {
                    Some(existing) => existing.to_string(),
                    None => {
                        res.cookie("bucket", &json!("a"), &CookieOptions::default())?;
                        "a".to_string()
                    }
                };
                res.rewrite(&format!("/home/{}", bucket))
            }),
        )],
        |_| {},
    );

    let request = Request::new("GET", "/home").with_header("Cookie", "bucket=b");
    let (status, headers, body) = read_body(app.handle(&request).await.unwrap()).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"Welcome Page B");
    assert!(header_all(&headers, "set-cookie").is_empty());
}

#[tokio::test]
async fn test_redirect_suppresses_later_body() {
    let app = build_app(
        NO_ROUTES,
        Arc::new(FakePages::new()),
        FakeStatic::new(),
        vec![(
            "/redirect-body",
            edge(|_req, res| {
                res.redirect("https://google.com")?;
                // Second effect after the terminal transition: the
                // redirect stands, nothing reaches the wire.
                res.send(&json!("whoops!"))
            }),
        )],
        |_| {},
    );

    let response = app
        .handle(&Request::new("GET", "/redirect-body"))
        .await
        .unwrap();
    let (status, headers, body) = read_body(response).await;
    assert_eq!(status, 302);
    assert_eq!(header(&headers, "Location"), Some("https://google.com"));
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_dynamic_url_interface() {
    let app = build_app(
        NO_ROUTES,
        Arc::new(FakePages::new().with_page("/dynamic/[id]", "dynamic page")),
        FakeStatic::new(),
        vec![(
            "/dynamic/[id]",
            edge(|req, res| {
                res.set_header("req-url-path", &req.url.pathname)?;
                res.set_header("req-url-params", &serde_json::to_string(&req.url.params)?)?;
                res.set_header("req-url-page", req.url.page.as_deref().unwrap_or(""))?;
                res.next()
            }),
        )],
        |_| {},
    );

    let response = app
        .handle(&Request::new("GET", "/dynamic/abc123"))
        .await
        .unwrap();
    let (status, headers, body) = read_body(response).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"dynamic page");
    assert_eq!(header(&headers, "req-url-path"), Some("/dynamic/abc123"));
    assert_eq!(header(&headers, "req-url-params"), Some(r#"{"id":"abc123"}"#));
    assert_eq!(header(&headers, "req-url-page"), Some("/dynamic/[id]"));
}

#[tokio::test]
async fn test_infinite_rewrite_loop_is_500() {
    let app = build_app(
        NO_ROUTES,
        Arc::new(FakePages::new()),
        FakeStatic::new(),
        vec![
            ("/loop-a", edge(|_req, res| res.rewrite("/loop-b"))),
            ("/loop-b", edge(|_req, res| res.rewrite("/loop-a"))),
        ],
        |_| {},
    );

    let response = app.handle(&Request::new("GET", "/loop-a")).await.unwrap();
    let (status, _, body) = read_body(response).await;
    assert_eq!(status, 500);
    // No partial body from any of the five invocations
    assert_eq!(body, b"Internal Server Error");
}

#[tokio::test]
async fn test_streamed_edge_response() {
    let app = build_app(
        NO_ROUTES,
        Arc::new(FakePages::new()),
        FakeStatic::new(),
        vec![(
            "/streamed",
            edge(|_req, res| {
                res.status(200)?;
                res.write("hello ")?;
                res.write("streamed ")?;
                res.end_with("world")
            }),
        )],
        |_| {},
    );

    let response = app.handle(&Request::new("GET", "/streamed")).await.unwrap();
    assert!(response.is_streaming());
    let (status, _, body) = read_body(response).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"hello streamed world");
}

#[tokio::test]
async fn test_edge_headers_survive_yield_to_page() {
    let app = build_app(
        NO_ROUTES,
        Arc::new(FakePages::new().with_page("/instrumented", "page body")),
        FakeStatic::new(),
        vec![(
            "/instrumented",
            edge(|_req, res| {
                res.set_header("x-edge-saw-you", "yes")?;
                res.next()
            }),
        )],
        |_| {},
    );

    let response = app
        .handle(&Request::new("GET", "/instrumented"))
        .await
        .unwrap();
    let (status, headers, body) = read_body(response).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"page body");
    assert_eq!(header(&headers, "x-edge-saw-you"), Some("yes"));
    assert!(header(&headers, "x-nextjs-next").is_none());
}

#[tokio::test]
async fn test_preflight_short_circuits_with_headers() {
    let app = build_app(
        NO_ROUTES,
        Arc::new(FakePages::new().with_page("/home/a", "Welcome Page A")),
        FakeStatic::new(),
        vec![(
            "/home",
            edge(|_req, res| {
                res.cookie("bucket", &json!("a"), &CookieOptions::default())?;
                res.rewrite("/home/a")
            }),
        )],
        |_| {},
    );

    let request = Request::new("OPTIONS", "/home").with_header("x-nextjs-preflight", "1");
    let (status, headers, body) = read_body(app.handle(&request).await.unwrap()).await;
    assert_eq!(status, 200);
    assert!(body.is_empty());
    assert_eq!(header_all(&headers, "set-cookie").len(), 1);
}

#[tokio::test]
async fn test_edge_status_is_respected_for_data() {
    let app = build_app(
        NO_ROUTES,
        Arc::new(FakePages::new()),
        FakeStatic::new(),
        vec![(
            "/teapot",
            edge(|_req, res| {
                res.status(418)?;
                res.send_text("short and stout")
            }),
        )],
        |_| {},
    );

    let response = app.handle(&Request::new("GET", "/teapot")).await.unwrap();
    let (status, _, body) = read_body(response).await;
    assert_eq!(status, 418);
    assert_eq!(body, b"short and stout");
}

#[tokio::test]
async fn test_ambient_base64_encodes_cookie_value() {
    let app = build_app(
        NO_ROUTES,
        Arc::new(FakePages::new()),
        FakeStatic::new(),
        vec![(
            "/signed",
            edge(|req, res| {
                let env = edgekit::edge::ambient();
                let token = env.base64_encode(req.url.pathname.as_bytes());
                res.cookie("token", &json!(token), &CookieOptions::default())?;
                res.send_text("signed")
            }),
        )],
        |_| {},
    );

    let response = app.handle(&Request::new("GET", "/signed")).await.unwrap();
    let (status, headers, body) = read_body(response).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"signed");

    let cookie = header(&headers, "set-cookie").unwrap();
    // base64("/signed"), percent-encoded for the cookie value
    assert!(
        cookie.starts_with("token=L3NpZ25lZA%3D%3D; Path=/"),
        "got {}",
        cookie
    );
}

#[tokio::test]
async fn test_edge_function_error_is_500() {
    let app = build_app(
        NO_ROUTES,
        Arc::new(FakePages::new()),
        FakeStatic::new(),
        vec![(
            "/explodes",
            edge(|_req, _res| Err(Error::Internal("edge function blew up".to_string()))),
        )],
        |_| {},
    );

    let response = app.handle(&Request::new("GET", "/explodes")).await.unwrap();
    let (status, _, _) = read_body(response).await;
    assert_eq!(status, 500);
}
