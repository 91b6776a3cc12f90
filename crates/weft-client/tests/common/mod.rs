//! Shared fixture: an in-memory page driver and a session harness.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

use weft_bridge::testing::FakePage;
use weft_bridge::{BindingCall, Navigation, PageContext, PageError};
use weft_client::{Client, MessengerPage, NoAuth, NoopCache};
use weft_types::{ClientConfig, Event};

/// In-memory [`MessengerPage`] over the bridge testkit's fake page.
///
/// Tests simulate store mutations by invoking exposed callbacks through
/// [`call`](FakeDriver::call), and navigations through
/// [`navigate_to`](FakeDriver::navigate_to).
pub struct FakeDriver {
    pub page: FakePage,
    binding_tx: mpsc::UnboundedSender<BindingCall>,
    binding_rx: Mutex<Option<mpsc::UnboundedReceiver<BindingCall>>>,
    nav_tx: broadcast::Sender<Navigation>,
    navigate_calls: Mutex<Vec<(String, String)>>,
    served: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        let (binding_tx, binding_rx) = mpsc::unbounded_channel();
        let (nav_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            page: FakePage::new(),
            binding_tx,
            binding_rx: Mutex::new(Some(binding_rx)),
            nav_tx,
            navigate_calls: Mutex::new(Vec::new()),
            served: Mutex::new(Vec::new()),
        })
    }

    /// Simulate the page invoking an exposed callback. `args` is the JSON
    /// argument array the page-side dispatcher would pass.
    pub fn call(&self, name: &str, args: Value) {
        let _ = self.binding_tx.send(BindingCall {
            name: name.to_string(),
            payload: args.to_string(),
        });
    }

    /// Simulate a main-frame navigation.
    pub fn navigate_to(&self, url: &str) {
        let _ = self.nav_tx.send(Navigation {
            url: url.to_string(),
        });
    }

    pub fn navigate_calls(&self) -> Vec<(String, String)> {
        self.navigate_calls.lock().unwrap().clone()
    }

    pub fn served_documents(&self) -> Vec<(String, Option<String>)> {
        self.served.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageContext for FakeDriver {
    async fn evaluate(&self, script: &str) -> Result<Value, PageError> {
        self.page.evaluate(script).await
    }

    async fn add_preload_script(&self, source: &str) -> Result<(), PageError> {
        self.page.add_preload_script(source).await
    }

    async fn add_binding(&self, name: &str) -> Result<(), PageError> {
        self.page.add_binding(name).await
    }

    async fn remove_binding(&self, name: &str) -> Result<(), PageError> {
        self.page.remove_binding(name).await
    }

    fn is_closed(&self) -> bool {
        self.page.is_closed()
    }

    async fn close(&self) -> Result<(), PageError> {
        self.page.close().await
    }
}

#[async_trait]
impl MessengerPage for FakeDriver {
    async fn navigate(&self, url: &str, referer: &str) -> Result<(), PageError> {
        self.navigate_calls
            .lock()
            .unwrap()
            .push((url.to_string(), referer.to_string()));
        Ok(())
    }

    async fn set_user_agent(&self, _user_agent: &str) -> Result<(), PageError> {
        Ok(())
    }

    fn navigations(&self) -> broadcast::Receiver<Navigation> {
        self.nav_tx.subscribe()
    }

    fn take_binding_calls(&self) -> Option<mpsc::UnboundedReceiver<BindingCall>> {
        self.binding_rx.lock().unwrap().take()
    }

    async fn serve_document(&self, url: &str, body: Option<String>) -> Result<(), PageError> {
        self.served.lock().unwrap().push((url.to_string(), body));
        Ok(())
    }
}

/// One initialized session against a fake page.
pub struct Harness {
    pub driver: Arc<FakeDriver>,
    pub client: Arc<Client<FakeDriver>>,
    pub events: mpsc::UnboundedReceiver<Event>,
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        client_id: "test".to_string(),
        auth_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

/// Teach the fake page the responses a healthy, authenticated page gives.
pub fn prime_healthy_page(driver: &FakeDriver) {
    driver
        .page
        .respond_with("window.Debug && window.Debug.VERSION", json!(true));
    // No credential required: the launching wait resolves to a paired state.
    driver.page.respond_with("state === 'UNPAIRED'", json!(false));
    driver
        .page
        .respond_with("!!window.Store && !!window.Store.Msg", json!(true));
    driver.page.respond_with(
        "window.Store.Conn.serialize",
        json!({
            "pushname": "tester",
            "wid": { "_serialized": "me@c.us", "user": "me", "server": "c.us" },
            "platform": "web",
        }),
    );
}

/// Build and initialize a session; the page needs no credential.
pub async fn initialized(config: ClientConfig) -> Harness {
    let driver = FakeDriver::new();
    prime_healthy_page(&driver);
    let client = Client::new(
        config,
        Box::new(NoAuth),
        Arc::clone(&driver),
        Box::new(NoopCache),
    );
    let events = client.events().expect("first take of the event stream");
    client.initialize().await.expect("initialize");
    Harness {
        driver,
        client,
        events,
    }
}

/// Build a session and drive it through sync to `ready`.
pub async fn ready(config: ClientConfig) -> Harness {
    let mut harness = initialized(config).await;
    harness.driver.call("onAppStateHasSyncedEvent", json!([]));
    let authenticated = expect_event(&mut harness.events, "authenticated").await;
    assert_eq!(authenticated.name(), "authenticated");
    let ready = expect_event(&mut harness.events, "ready").await;
    assert_eq!(ready.name(), "ready");
    harness
}

/// Receive events until one with `name` arrives. Panics after two seconds.
pub async fn expect_event(events: &mut mpsc::UnboundedReceiver<Event>, name: &str) -> Event {
    let deadline = Duration::from_secs(2);
    tokio::time::timeout(deadline, async {
        loop {
            let event = events.recv().await.expect("event stream ended");
            if event.name() == name {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no `{name}` event within {deadline:?}"))
}

/// Drain whatever is immediately available.
pub fn drain_now(events: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Assert no event named `name` shows up within a short window.
pub async fn expect_quiet(events: &mut mpsc::UnboundedReceiver<Event>, name: &str) {
    let window = Duration::from_millis(200);
    let result = tokio::time::timeout(window, async {
        loop {
            if let Some(event) = events.recv().await {
                if event.name() == name {
                    return event;
                }
            } else {
                std::future::pending::<()>().await;
            }
        }
    })
    .await;
    if let Ok(event) = result {
        panic!("unexpected `{}` event: {event:?}", name);
    }
}

/// Poll until `condition` holds. Panics after two seconds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

/// A message fixture as the page-side serializer would produce it.
pub fn message_fixture(id: &str, from_me: bool) -> Value {
    json!({
        "id": {
            "id": id,
            "fromMe": from_me,
            "remote": { "_serialized": "123@c.us" },
            "_serialized": format!("{from_me}_123@c.us_{id}"),
        },
        "type": "chat",
        "body": "hello",
        "t": 1700000000,
        "isNewMsg": true,
    })
}

/// A group-notification (`gp2`) message fixture.
pub fn gp2_fixture(id: &str, subtype: &str) -> Value {
    json!({
        "id": {
            "id": id,
            "fromMe": false,
            "remote": { "_serialized": "group@g.us" },
            "_serialized": format!("false_group@g.us_{id}"),
        },
        "type": "gp2",
        "subtype": subtype,
        "author": "admin@c.us",
        "body": "",
        "t": 1700000001,
        "recipients": ["alice@c.us"],
        "isNewMsg": true,
    })
}

/// A chat fixture.
pub fn chat_fixture(id: &str) -> Value {
    json!({
        "id": { "_serialized": id, "user": "123", "server": "c.us" },
        "name": "Chat",
        "isGroup": false,
        "unreadCount": 1,
    })
}
