use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rf_device_server::{
    commands,
    controllers::{Controller, Loopback},
    devices::DeviceManager,
    events::EventBus,
    handlers,
    models::AppState,
    storage::{DeviceRecord, MemoryStore},
};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, Message},
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(max_connections: usize) -> (SocketAddr, Arc<DeviceManager>) {
    let mut lamp = DeviceRecord::new(1);
    lamp.protocol = "arctech".into();
    lamp.model = "selflearning-switch".into();
    lamp.parameters.insert("house".into(), "42".into());
    lamp.parameters.insert("unit".into(), "1".into());

    let controllers: Vec<Arc<dyn Controller>> = vec![Arc::new(Loopback::new(1, 0))];
    let manager = Arc::new(DeviceManager::new(
        Arc::new(MemoryStore::new(vec![lamp])),
        controllers,
        Arc::new(EventBus::new()),
        None,
    ));
    manager.load().await.unwrap();

    let state = AppState::new(Arc::clone(&manager), max_connections);
    let app = handlers::router(Arc::new(state));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, manager)
}

async fn connect(addr: SocketAddr) -> Result<Client, WsError> {
    connect_async(format!("ws://{addr}/ws/client"))
        .await
        .map(|(client, _)| client)
}

async fn send(client: &mut Client, message: Value) {
    client
        .send(Message::Text(message.to_string().into()))
        .await
        .unwrap();
}

async fn next_event(client: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("no event within two seconds")
            .unwrap()
            .unwrap();
        if msg.is_text() {
            return serde_json::from_str(msg.to_text().unwrap()).unwrap();
        }
    }
}

#[tokio::test]
async fn actions_and_state_changes_reach_the_client() {
    let (addr, manager) = serve(4).await;
    let mut client = connect(addr).await.unwrap();

    send(&mut client, json!({"type": "action", "device_id": 999, "method": "turnon"})).await;
    let event = next_event(&mut client).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["device_id"], 999);
    assert_eq!(event["code"], -3);

    send(&mut client, json!({"type": "action", "device_id": 1, "method": "launch"})).await;
    let event = next_event(&mut client).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["code"], -4);

    send(&mut client, json!({"type": "action", "device_id": 1, "method": "turnon"})).await;
    let event = next_event(&mut client).await;
    assert_eq!(event["type"], "state_changed");
    assert_eq!(event["device_id"], 1);
    assert_eq!(event["method"], "turnon");
    assert_eq!(event["state_value"], 255);

    // Actions from other surfaces are broadcast as well.
    assert_eq!(commands::turn_off(&manager, 1).await, 0);
    let event = next_event(&mut client).await;
    assert_eq!(event["type"], "state_changed");
    assert_eq!(event["state_value"], 0);
}

#[tokio::test]
async fn malformed_messages_get_an_error_reply() {
    let (addr, _) = serve(4).await;
    let mut client = connect(addr).await.unwrap();

    client.send(Message::Text("{not json".into())).await.unwrap();
    let event = next_event(&mut client).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["device_id"], Value::Null);
    assert_eq!(event["code"], -99);
}

#[tokio::test]
async fn clients_beyond_the_limit_are_refused() {
    let (addr, _) = serve(1).await;
    let mut first = connect(addr).await.unwrap();

    // A reply proves the first client is registered.
    send(&mut first, json!({"type": "action", "device_id": 5, "method": "bell"})).await;
    assert_eq!(next_event(&mut first).await["code"], -3);

    match connect(addr).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 503),
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("second client was accepted"),
    }
}
