use std::sync::Arc;

use actix_web::dev::ServiceResponse;
use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App};
use regex::Regex;

use social::core::store::MemoryStore;
use social::server::{handle_all, shared_store};

macro_rules! app {
    () => {
        test::init_service(
            App::new()
                .app_data(shared_store(Arc::new(MemoryStore::new())))
                .default_service(web::route().to(handle_all)),
        )
        .await
    };
}

macro_rules! call {
    ($app:expr, $req:expr) => {
        test::call_service(&$app, $req.to_request()).await
    };
}

fn form(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn get(path: &str, cookie: Option<&str>) -> test::TestRequest {
    let mut req = test::TestRequest::get().uri(path);
    if let Some(cookie) = cookie {
        req = req.insert_header((header::COOKIE, cookie.to_string()));
    }
    req
}

fn post(path: &str, fields: &[(&str, &str)], cookie: Option<&str>) -> test::TestRequest {
    let mut req = test::TestRequest::post()
        .uri(path)
        .insert_header((header::CONTENT_TYPE, "application/x-www-form-urlencoded"))
        .set_payload(form(fields));
    if let Some(cookie) = cookie {
        req = req.insert_header((header::COOKIE, cookie.to_string()));
    }
    req
}

fn location<B>(resp: &ServiceResponse<B>) -> String {
    resp.headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn session_cookie<B>(resp: &ServiceResponse<B>) -> Option<String> {
    resp.headers()
        .get(header::SET_COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .next()
        .map(str::to_string)
        .filter(|c| c != "session=")
}

async fn body_text(resp: ServiceResponse) -> String {
    String::from_utf8_lossy(&test::read_body(resp).await).into_owned()
}

fn registration<'a>(username: &'a str, email: &'a str) -> [(&'a str, &'a str); 4] {
    [
        ("username", username),
        ("email", email),
        ("password", "secret1"),
        ("confirm_password", "secret1"),
    ]
}

#[actix_web::test]
async fn test_full_user_flow() {
    let app = app!();

    // 1. Register
    let resp = call!(app, post("/register", &registration("flow", "flow@example.com"), None));
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/login");

    // 2. Login
    let resp = call!(app, post("/login", &[("username", "flow"), ("password", "secret1")], None));
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/");
    let cookie = session_cookie(&resp).expect("session cookie missing after login");
    let cookie = Some(cookie.as_str());

    // 3. Create post
    let resp = call!(
        app,
        post("/post/new", &[("title", "Hello board"), ("content", "Test post from integration test!")], cookie)
    );
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);

    let home = body_text(call!(app, get("/", cookie))).await;
    assert!(home.contains("Your post has been created!"));
    assert!(home.contains("Hello board"));
    let post_id = Regex::new(r#"href="/post/([0-9a-f-]{36})""#)
        .unwrap()
        .captures(&home)
        .map(|c| c[1].to_string())
        .expect("post link on home page");

    // 4. Comment and like
    let resp = call!(app, post(&format!("/post/{}/comment", post_id), &[("content", "Nice one")], cookie));
    assert_eq!(location(&resp), "/");
    let resp = call!(app, post(&format!("/post/{}/like", post_id), &[], cookie));
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);

    let page = body_text(call!(app, get(&format!("/post/{}", post_id), None))).await;
    assert!(page.contains("Nice one"));
    assert!(page.contains("1 like"));

    // 5. Edit post
    let resp = call!(
        app,
        post(&format!("/post/{}/edit", post_id), &[("title", "Updated title"), ("content", "Updated content")], cookie)
    );
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let page = body_text(call!(app, get(&format!("/post/{}", post_id), None))).await;
    assert!(page.contains("Updated title"));
    assert!(page.contains("(edited"));

    // 6. Delete post
    let resp = call!(app, post(&format!("/post/{}/delete", post_id), &[], cookie));
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let resp = call!(app, get(&format!("/post/{}", post_id), None));
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // 7. Logout
    let resp = call!(app, get("/logout", cookie));
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let resp = call!(app, get("/profile", cookie));
    assert_eq!(location(&resp), "/login");
}

#[actix_web::test]
async fn test_post_content_validation() {
    let app = app!();
    call!(app, post("/register", &registration("val", "val@example.com"), None));
    let resp = call!(app, post("/login", &[("username", "val"), ("password", "secret1")], None));
    let cookie = session_cookie(&resp).expect("session cookie missing after login");

    let resp = call!(app, post("/post/new", &[("title", ""), ("content", "body")], Some(&cookie)));
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let page = body_text(resp).await;
    assert!(page.contains("This field is required."));
    assert!(page.contains(">body</textarea>"));

    let long_title = "a".repeat(101);
    let resp = call!(app, post("/post/new", &[("title", &long_title), ("content", "body")], Some(&cookie)));
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_login_invalid_credentials() {
    let app = app!();

    let resp = call!(app, post("/login", &[("username", "nonexistent_user"), ("password", "wrongpass")], None));
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(session_cookie(&resp).is_none());
    assert!(body_text(resp).await.contains("Login failed. Check your username and password."));
}

#[actix_web::test]
async fn test_create_post_requires_auth() {
    let app = app!();

    let resp = call!(app, post("/post/new", &[("title", "t"), ("content", "c")], None));
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/login");

    let home = body_text(call!(app, get("/", None))).await;
    assert!(home.contains("No posts yet."));
}

#[actix_web::test]
async fn test_register_rejects_duplicates_and_bad_input() {
    let app = app!();

    let resp = call!(app, post("/register", &registration("dup", "dup@example.com"), None));
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);

    let resp = call!(app, post("/register", &registration("other", "DUP@example.com"), None));
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(resp).await.contains("That email is already registered."));

    let resp = call!(
        app,
        post(
            "/register",
            &[("username", "x"), ("email", "nope"), ("password", "123"), ("confirm_password", "321")],
            None,
        )
    );
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let page = body_text(resp).await;
    assert!(page.contains("Invalid email address."));
    assert!(page.contains("Field must be equal to password."));
}

#[actix_web::test]
async fn test_stylesheet_served() {
    let app = app!();

    let resp = call!(app, get("/static/style.css", None));
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("text/css")
    );
}
