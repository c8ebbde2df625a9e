//! A small si service: JSON endpoints, a form, cookies and an event stream.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -X POST http://localhost:3000/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl -d 'q=rust&q=http' http://localhost:3000/search
//!   curl -i http://localhost:3000/login
//!   curl -N http://localhost:3000/events?count=5

use std::time::Duration;

use serde::{Deserialize, Serialize};
use si::middleware::{self, Logger, Terminal};
use si::{Context, Cookie, Router, SameSite, Server};

#[derive(Debug, Deserialize, Serialize)]
struct User {
    #[serde(default)]
    id: i64,
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), si::Error> {
    tracing_subscriber::fmt::init();

    let api = Router::new()
        .get("/users/{id}", get_user)
        .post("/users", create_user)
        .delete("/users/{id}", delete_user);

    let app = Router::new()
        .middleware(Logger::new(Terminal::detect()))
        .middleware(middleware::request_id())
        .middleware(middleware::clean_path())
        .post("/search", search)
        .get("/login", login)
        .get("/events", events)
        .get("/old", |mut ctx: Context| async move {
            let _ = ctx.redirect("/users/1", 301).await;
        })
        .mount("/", api);

    app.print_routes();

    Server::bind("0.0.0.0:3000")
        .shutdown_timeout(Duration::from_secs(10))
        .serve(app)
        .await
}

// GET /users/{id}
async fn get_user(mut ctx: Context) {
    let id = ctx.param_int("id");
    if id <= 0 {
        let _ = ctx.not_found().await;
        return;
    }
    let _ = ctx.sj(&User { id, name: "alice".into() }).await;
}

// POST /users
async fn create_user(mut ctx: Context) {
    if !ctx.is_json() {
        let _ = ctx.send_error_json("expected application/json", 415).await;
        return;
    }
    match ctx.json_body::<User>().await {
        Ok(mut user) => {
            user.id = 99;
            ctx.write_header("location", "/users/99");
            let _ = ctx.send_json(Some(&user), 201).await;
        }
        Err(e) => {
            let _ = ctx.send_error_json(&e.to_string(), 400).await;
        }
    }
}

// DELETE /users/{id}
async fn delete_user(mut ctx: Context) {
    let _ = ctx.no_content().await;
}

// POST /search, form-encoded or multipart
async fn search(mut ctx: Context) {
    let form = match ctx.form_data().await {
        Ok(form) => form,
        Err(e) => {
            let _ = ctx.send_error_json(&e.to_string(), 400).await;
            return;
        }
    };
    let terms = form.get("q").cloned().unwrap_or_default();
    let _ = ctx.sj(&serde_json::json!({ "terms": terms })).await;
}

// GET /login
async fn login(mut ctx: Context) {
    let session = Cookie::new("session", "demo")
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(3600);
    ctx.set_cookie(&session);
    let _ = ctx.send_html("<p>signed in</p>", 0).await;
}

// GET /events?count=N
async fn events(mut ctx: Context) {
    let count = ctx.query_int_default("count", 10);
    let res = ctx
        .sse(|mut sse| async move {
            sse.retry(2_000).await?;
            for n in 1..=count {
                if sse.is_closed() {
                    break;
                }
                sse.id(&n.to_string()).await?;
                sse.json("tick", &serde_json::json!({ "n": n })).await?;
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            sse.event("done", "bye").await
        })
        .await;
    if let Ok(Err(e)) = res {
        tracing::debug!("event stream ended early: {e}");
    }
}
