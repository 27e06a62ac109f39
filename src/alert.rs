//! Operator alerts. Sending an alert never fails from the caller's side.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Local;
use tracing::{error, warn};

const PUSHOVER_ENDPOINT: &str = "https://api.pushover.net/1/messages.json";

pub trait AlertHook: Send + Sync {
    fn notify(&self, message: &str);
}

/// Writes alerts to the log only.
pub struct LogAlert;

impl AlertHook for LogAlert {
    fn notify(&self, message: &str) {
        warn!("ALERT: {}", message);
    }
}

/// Forwards each distinct message once until `reset` is called.
pub struct DedupAlert {
    inner: Arc<dyn AlertHook>,
    seen: Mutex<HashSet<String>>,
}

impl DedupAlert {
    pub fn new(inner: Arc<dyn AlertHook>) -> Self {
        DedupAlert {
            inner,
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn reset(&self) {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl AlertHook for DedupAlert {
    fn notify(&self, message: &str) {
        let first = self
            .seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(message.to_string());
        if first {
            self.inner.notify(message);
        }
    }
}

/// Pushover push notifications to every configured user key.
pub struct PushoverNotifier {
    client: reqwest::Client,
    endpoint: String,
    title: String,
    token: String,
    user_keys: Vec<String>,
    priority: i32,
}

impl PushoverNotifier {
    pub fn new(title: impl Into<String>, token: impl Into<String>, user_keys: Vec<String>) -> Self {
        PushoverNotifier {
            client: reqwest::Client::new(),
            endpoint: PUSHOVER_ENDPOINT.to_string(),
            title: title.into(),
            token: token.into(),
            user_keys,
            priority: 2,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sends to every key and returns once each post has completed. Used where
    /// the runtime may end right after, e.g. on shutdown.
    pub async fn notify_and_wait(&self, message: &str) {
        for user_key in &self.user_keys {
            post(&self.client, &self.endpoint, &self.form(user_key, message)).await;
        }
    }

    fn form(&self, user_key: &str, message: &str) -> Vec<(&'static str, String)> {
        vec![
            ("token", self.token.clone()),
            ("user", user_key.to_string()),
            (
                "message",
                format!("{} {}", Local::now().format("%Y-%m-%d %H:%M:%S"), message),
            ),
            ("title", self.title.clone()),
            ("priority", self.priority.to_string()),
            ("retry", "1800".to_string()),
            ("expire", "3600".to_string()),
        ]
    }
}

impl AlertHook for PushoverNotifier {
    fn notify(&self, message: &str) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No runtime to send pushover alert: {}", message);
                return;
            }
        };
        for user_key in &self.user_keys {
            let client = self.client.clone();
            let endpoint = self.endpoint.clone();
            let form = self.form(user_key, message);
            handle.spawn(async move { post(&client, &endpoint, &form).await });
        }
    }
}

async fn post(client: &reqwest::Client, endpoint: &str, form: &[(&'static str, String)]) {
    let result = client
        .post(endpoint)
        .form(form)
        .send()
        .await
        .and_then(|response| response.error_for_status());
    if let Err(e) = result {
        error!("Pushover notifications not working: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl AlertHook for Recorder {
        fn notify(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn test_dedup_forwards_each_cause_once() {
        let recorder = Arc::new(Recorder::default());
        let dedup = DedupAlert::new(recorder.clone());
        dedup.notify("refused");
        dedup.notify("refused");
        dedup.notify("timeout");
        assert_eq!(*recorder.0.lock().unwrap(), vec!["refused", "timeout"]);

        dedup.reset();
        dedup.notify("refused");
        assert_eq!(recorder.0.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_pushover_form_fields() {
        let notifier = PushoverNotifier::new("cdc-gateway", "app-token", vec!["u1".to_string()]);
        let form = notifier.form("u1", "Connection lost");
        let field = |name: &str| {
            form.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.clone())
                .unwrap()
        };
        assert_eq!(field("priority"), "2");
        assert_eq!(field("retry"), "1800");
        assert_eq!(field("expire"), "3600");
        assert!(field("message").ends_with(" Connection lost"));
    }

    #[test]
    fn test_pushover_without_runtime_does_not_panic() {
        let notifier = PushoverNotifier::new("cdc-gateway", "app-token", vec!["u1".to_string()]);
        notifier.notify("no runtime here");
    }

    #[tokio::test]
    async fn test_notify_and_wait_returns_after_delivery() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/1/messages.json", listener.local_addr().unwrap());
        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            seen_tx
                .send(String::from_utf8_lossy(&buf[..n]).into_owned())
                .unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
        });

        let notifier = PushoverNotifier::new("cdc-gateway", "app-token", vec!["u1".to_string()])
            .with_endpoint(endpoint);
        notifier.notify_and_wait("Bye bye!").await;

        let request = seen_rx.try_recv().unwrap();
        assert!(request.starts_with("POST /1/messages.json"));
    }
}
