use std::net::Ipv4Addr;
use std::time::Duration;

use axum::{Router, routing::get as route_get};

use futures_util::{SinkExt, StreamExt};

use reqwest::{Client, Method, StatusCode, header};

use serde_json::{Value as JsonValue, json};

use serial_test::serial;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use tokio_util::sync::CancellationToken;

use webthing::{
    ActionHandler, ActionMetadata, DataSchema, Event, JsonType, Property, Thing, ThingGroup, Value,
};

use crate::error::Result;
use crate::server::Server;

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct Running {
    address: String,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

impl Running {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.address)
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.unwrap().unwrap();
    }
}

fn lamp() -> Thing {
    let thing = Thing::builder("urn:dev:ops:my-lamp-1234", "My Lamp")
        .semantic_type("OnOffSwitch")
        .semantic_type("Light")
        .description("A web connected lamp")
        .build();

    let _ = thing.add_property(Property::new(
        "on",
        Value::new(true),
        DataSchema::of_type(JsonType::Boolean)
            .semantic_type("OnOffProperty")
            .title("On/Off"),
    ));
    let _ = thing.add_property(Property::new(
        "brightness",
        Value::new(50),
        DataSchema::of_type(JsonType::Integer)
            .semantic_type("BrightnessProperty")
            .minimum(0)
            .maximum(100)
            .unit("percent"),
    ));

    thing.add_available_action(
        "fade",
        ActionMetadata::new().title("Fade").input(
            DataSchema::of_type(JsonType::Object)
                .required_property(
                    "brightness",
                    DataSchema::of_type(JsonType::Integer).minimum(0).maximum(100),
                )
                .required_property(
                    "duration",
                    DataSchema::of_type(JsonType::Integer).minimum(1),
                ),
        ),
        ActionHandler::new(|context| async move {
            let duration = context
                .input_member("duration")
                .and_then(JsonValue::as_u64)
                .unwrap_or_default();
            tokio::time::sleep(Duration::from_millis(duration)).await;

            let brightness = context
                .input_member("brightness")
                .cloned()
                .unwrap_or_default();
            let Some(thing) = context.thing() else {
                return Ok(());
            };
            thing
                .set_property("brightness", brightness)
                .map(|_| thing.add_event(Event::with_data("overheated", 102)))
        }),
    );

    thing.add_available_event(
        "overheated",
        DataSchema::of_type(JsonType::Number).unit("degree celsius"),
    );

    thing
}

async fn start(server: Server) -> Running {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let address = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(server.without_discovery().serve(listener, shutdown.clone()));

    Running {
        address,
        shutdown,
        handle,
    }
}

async fn get(client: &Client, url: &str) -> (StatusCode, JsonValue) {
    let response = client.get(url).send().await.unwrap();
    let status = response.status();
    (status, response.json().await.unwrap_or(JsonValue::Null))
}

async fn connect(running: &Running, path: &str) -> Socket {
    let (socket, _) = connect_async(format!("ws://{}{path}", running.address))
        .await
        .unwrap();
    socket
}

async fn send(socket: &mut Socket, message: JsonValue) {
    socket
        .send(Message::Text(message.to_string().into()))
        .await
        .unwrap();
}

async fn receive(socket: &mut Socket) -> JsonValue {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn thing_description() {
    let running = start(Server::new(ThingGroup::single(lamp()))).await;
    let client = Client::new();

    let response = client.get(running.url("/")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );

    let description: JsonValue = response.json().await.unwrap();
    assert_eq!(description["id"], json!("urn:dev:ops:my-lamp-1234"));
    assert_eq!(description["@type"], json!(["OnOffSwitch", "Light"]));
    assert_eq!(description["base"], json!(running.url("/")));
    assert_eq!(description["security"], json!("nosec_sc"));
    assert_eq!(
        description["properties"]["brightness"]["links"],
        json!([{"rel": "property", "href": "/properties/brightness"}])
    );
    assert_eq!(
        description["links"][3],
        json!({"rel": "alternate", "href": format!("ws://{}/", running.address)})
    );

    running.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn property_routes() {
    let running = start(Server::new(ThingGroup::single(lamp()))).await;
    let client = Client::new();

    assert_eq!(
        get(&client, &running.url("/properties")).await,
        (StatusCode::OK, json!({"on": true, "brightness": 50}))
    );
    assert_eq!(
        get(&client, &running.url("/properties/brightness")).await,
        (StatusCode::OK, json!({"brightness": 50}))
    );
    assert_eq!(
        get(&client, &running.url("/properties/color")).await.0,
        StatusCode::NOT_FOUND
    );

    let response = client
        .put(running.url("/properties/brightness"))
        .json(&json!({"brightness": 75}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.json::<JsonValue>().await.unwrap(),
        json!({"brightness": 75})
    );

    // Out of range.
    let response = client
        .put(running.url("/properties/brightness"))
        .json(&json!({"brightness": 150}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Member not matching the path.
    let response = client
        .put(running.url("/properties/brightness"))
        .json(&json!({"on": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .put(running.url("/properties/brightness"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .put(running.url("/properties/color"))
        .json(&json!({"color": "red"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    assert_eq!(
        get(&client, &running.url("/properties/brightness")).await.1,
        json!({"brightness": 75})
    );

    // A trailing slash addresses the same resource.
    assert_eq!(
        get(&client, &running.url("/properties/")).await,
        (StatusCode::OK, json!({"on": true, "brightness": 75}))
    );
    assert_eq!(
        get(&client, &running.url("/properties/on/")).await,
        (StatusCode::OK, json!({"on": true}))
    );
    assert_eq!(
        get(&client, &running.url("/actions/")).await,
        (StatusCode::OK, json!([]))
    );
    assert_eq!(
        get(&client, &running.url("/events/")).await,
        (StatusCode::OK, json!([]))
    );

    running.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn action_routes() {
    let thing = lamp();
    let running = start(Server::new(ThingGroup::single(thing.clone()))).await;
    let client = Client::new();

    let response = client
        .post(running.url("/actions"))
        .json(&json!({"fade": {"input": {"brightness": 10, "duration": 20}}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: JsonValue = response.json().await.unwrap();
    let href = created["fade"]["href"].as_str().unwrap().to_owned();
    assert!(href.starts_with("/actions/fade/"));

    let mut completed = false;
    for _ in 0..200 {
        let (status, action) = get(&client, &running.url(&href)).await;
        assert_eq!(status, StatusCode::OK);
        if action["fade"]["status"] == json!("completed") {
            assert!(action["fade"]["timeCompleted"].is_string());
            completed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(completed);
    assert_eq!(thing.get_property("brightness"), Some(json!(10)));

    let (status, actions) = get(&client, &running.url("/actions/fade")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(actions.as_array().map(Vec::len), Some(1));

    let (status, events) = get(&client, &running.url("/events/overheated")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(events[0]["overheated"]["data"], json!(102));

    let response = client.delete(running.url(&href)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = client.delete(running.url(&href)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Invalid input.
    let response = client
        .post(running.url("/actions/fade"))
        .json(&json!({"fade": {"input": {"brightness": 10}}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Body not matching the path.
    let response = client
        .post(running.url("/actions/fade"))
        .json(&json!({"toggle": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .post(running.url("/actions"))
        .json(&json!({"toggle": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    assert_eq!(
        get(&client, &running.url("/events/melted")).await.0,
        StatusCode::NOT_FOUND
    );

    running.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn host_validation_and_preflight() {
    let running = start(Server::new(ThingGroup::single(lamp())).hostname("MyLamp.com")).await;
    let client = Client::new();

    let response = client
        .get(running.url("/properties"))
        .header(header::HOST, "evil.com")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let port = running.address.rsplit(':').next().unwrap_or_default().to_owned();
    let response = client
        .get(running.url("/properties"))
        .header(header::HOST, format!("mylamp.com:{port}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .request(Method::OPTIONS, running.url("/properties/on"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS],
        "GET, HEAD, PUT, POST, DELETE"
    );

    running.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn websocket_subscriber() {
    let thing = lamp();
    let running = start(Server::new(ThingGroup::single(thing.clone()))).await;
    let mut socket = connect(&running, "/").await;

    send(
        &mut socket,
        json!({"messageType": "setProperty", "data": {"brightness": 30}}),
    )
    .await;
    assert_eq!(
        receive(&mut socket).await,
        json!({"messageType": "propertyStatus", "data": {"brightness": 30}})
    );

    send(
        &mut socket,
        json!({"messageType": "setProperty", "data": {"brightness": 300}}),
    )
    .await;
    let error = receive(&mut socket).await;
    assert_eq!(error["messageType"], json!("error"));
    assert_eq!(error["data"]["status"], json!("400 Bad Request"));

    send(
        &mut socket,
        json!({"messageType": "addEventSubscription", "data": {"overheated": {}}}),
    )
    .await;
    send(
        &mut socket,
        json!({
            "messageType": "requestAction",
            "data": {"fade": {"input": {"brightness": 90, "duration": 10}}},
        }),
    )
    .await;

    let statuses: Vec<JsonValue> = [
        receive(&mut socket).await,
        receive(&mut socket).await,
        receive(&mut socket).await,
        receive(&mut socket).await,
        receive(&mut socket).await,
    ]
    .into_iter()
    .map(|message| {
        let kind = message["messageType"].clone();
        match kind.as_str() {
            Some("actionStatus") => message["data"]["fade"]["status"].clone(),
            _ => kind,
        }
    })
    .collect();
    assert_eq!(
        statuses,
        [
            json!("pending"),
            json!("running"),
            json!("propertyStatus"),
            json!("event"),
            json!("completed"),
        ]
    );

    send(&mut socket, json!({"messageType": "reboot", "data": {}})).await;
    assert_eq!(
        receive(&mut socket).await["data"]["message"],
        json!("Unknown messageType: reboot")
    );

    // Changes made elsewhere reach the connection too.
    let _ = thing
        .find_property("on")
        .unwrap()
        .value()
        .notify_of_external_update(false);
    assert_eq!(
        receive(&mut socket).await,
        json!({"messageType": "propertyStatus", "data": {"on": false}})
    );

    socket.close(None).await.unwrap();
    for _ in 0..200 {
        if thing.subscriber_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(thing.subscriber_count(), 0);

    running.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn multiple_things() {
    let sensor = Thing::new("urn:dev:ops:my-humidity-sensor-1234", "My Humidity Sensor");
    let _ = sensor.add_property(Property::new(
        "level",
        Value::new(0.0),
        DataSchema::of_type(JsonType::Number).read_only(),
    ));
    let group = ThingGroup::multiple(vec![lamp(), sensor], "LightAndTempDevice");

    let running = start(Server::new(group).base_path("/things")).await;
    let client = Client::new();

    let (status, things) = get(&client, &running.url("/things")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(things[0]["href"], json!("/things/0"));
    assert_eq!(things[1]["href"], json!("/things/1"));
    assert_eq!(
        things[1]["properties"]["level"]["links"],
        json!([{"rel": "property", "href": "/things/1/properties/level"}])
    );

    assert_eq!(
        get(&client, &running.url("/things/1/properties")).await,
        (StatusCode::OK, json!({"level": 0.0}))
    );
    assert_eq!(
        get(&client, &running.url("/things/1/properties/")).await,
        (StatusCode::OK, json!({"level": 0.0}))
    );
    assert_eq!(
        get(&client, &running.url("/things/0/")).await.1["id"],
        json!("urn:dev:ops:my-lamp-1234")
    );
    assert_eq!(
        get(&client, &running.url("/things/")).await.1[1]["href"],
        json!("/things/1")
    );
    assert_eq!(
        get(&client, &running.url("/things/2/properties")).await.0,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        get(&client, &running.url("/things/lamp")).await.0,
        StatusCode::NOT_FOUND
    );

    let response = client
        .put(running.url("/things/1/properties/level"))
        .json(&json!({"level": 42.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut socket = connect(&running, "/things/0").await;
    send(
        &mut socket,
        json!({"messageType": "setProperty", "data": {"on": false}}),
    )
    .await;
    assert_eq!(
        receive(&mut socket).await,
        json!({"messageType": "propertyStatus", "data": {"on": false}})
    );
    drop(socket);

    running.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn additional_routes() {
    let routes = Router::new()
        .route("/health", route_get(|| async { "ok" }))
        .route("/properties", route_get(|| async { "overridden" }));
    let running = start(Server::new(ThingGroup::single(lamp())).routes(routes)).await;
    let client = Client::new();

    for path in ["/health", "/health/"] {
        let response = client.get(running.url(path)).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "ok");
    }

    let response = client.get(running.url("/properties")).send().await.unwrap();
    assert_eq!(response.text().await.unwrap(), "overridden");

    // Everything else still reaches the Thing.
    assert_eq!(
        get(&client, &running.url("/properties/on")).await,
        (StatusCode::OK, json!({"on": true}))
    );
    assert_eq!(
        get(&client, &running.url("/")).await.1["id"],
        json!("urn:dev:ops:my-lamp-1234")
    );

    running.stop().await;
}
