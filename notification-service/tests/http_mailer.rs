use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use notification_service::{HttpMailer, MailError, Mailer};
use serde_json::Value;

type Inbox = Arc<Mutex<Vec<Value>>>;

async fn accept(State(inbox): State<Inbox>, Json(message): Json<Value>) -> StatusCode {
    inbox.lock().unwrap().push(message);
    StatusCode::ACCEPTED
}

async fn refuse() -> (StatusCode, &'static str) {
    (StatusCode::SERVICE_UNAVAILABLE, "relay overloaded")
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/send")
}

#[tokio::test]
async fn posts_message_to_relay() {
    let inbox = Inbox::default();
    let url = serve(Router::new().route("/send", post(accept)).with_state(inbox.clone())).await;
    let mailer = HttpMailer::new(url, "shop@example.com".to_string(), Duration::from_secs(2)).unwrap();

    mailer
        .send_email("buyer@example.com", "Оплата заказа 1 успешна", "body")
        .await
        .unwrap();

    let received = inbox.lock().unwrap().clone();
    assert_eq!(
        received,
        vec![serde_json::json!({
            "from": "shop@example.com",
            "to": "buyer@example.com",
            "subject": "Оплата заказа 1 успешна",
            "body": "body",
        })]
    );
}

#[tokio::test]
async fn relay_error_status_is_reported() {
    let url = serve(Router::new().route("/send", post(refuse))).await;
    let mailer = HttpMailer::new(url, "shop@example.com".to_string(), Duration::from_secs(2)).unwrap();

    let err = mailer.send_email("a@b.c", "s", "b").await.unwrap_err();
    match err {
        MailError::Rejected { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message, "relay overloaded");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn unreachable_relay_is_a_transport_error() {
    // Bind then drop to get a port nobody listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mailer = HttpMailer::new(
        format!("http://{addr}/send"),
        "shop@example.com".to_string(),
        Duration::from_secs(2),
    )
    .unwrap();
    assert!(matches!(
        mailer.send_email("a@b.c", "s", "b").await,
        Err(MailError::Transport(_))
    ));
}
