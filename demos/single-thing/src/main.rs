//! A dimmable lamp served as a single Web Thing.

use std::time::Duration;

use clap::Parser;

use serde_json::Value as JsonValue;

use tracing::info;

use webthing::{
    ActionHandler, ActionMetadata, DataSchema, Event, JsonType, Property, Thing, ThingGroup, Value,
};

use webthing_os::{Server, ServiceConfig};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server port.
    #[arg(short, long, default_value_t = 8888)]
    port: u16,

    /// Hostname the lamp is reachable at, besides its local addresses.
    #[arg(long)]
    hostname: Option<String>,

    /// Do not advertise the lamp on the local network.
    #[arg(long)]
    no_discovery: bool,
}

fn lamp() -> Thing {
    let thing = Thing::builder("urn:dev:ops:my-lamp-1234", "My Lamp")
        .semantic_type("OnOffSwitch")
        .semantic_type("Light")
        .description("A web connected lamp")
        .build();

    // The forwarder is where a real lamp would drive its hardware.
    let _ = thing.add_property(Property::new(
        "on",
        Value::with_forwarder(true, |value| {
            let state = if value.as_bool() == Some(true) { "on" } else { "off" };
            info!("Turning the lamp {state}");
            Ok(())
        }),
        DataSchema::of_type(JsonType::Boolean)
            .semantic_type("OnOffProperty")
            .title("On/Off")
            .description("Whether the lamp is turned on"),
    ));
    let _ = thing.add_property(Property::new(
        "brightness",
        Value::new(50),
        DataSchema::of_type(JsonType::Integer)
            .semantic_type("BrightnessProperty")
            .title("Brightness")
            .description("The level of light from 0-100")
            .minimum(0)
            .maximum(100)
            .unit("percent"),
    ));

    thing.add_available_action(
        "fade",
        ActionMetadata::new()
            .title("Fade")
            .description("Fade the lamp to a given level")
            .input(
                DataSchema::of_type(JsonType::Object)
                    .required_property(
                        "brightness",
                        DataSchema::of_type(JsonType::Integer)
                            .minimum(0)
                            .maximum(100)
                            .unit("percent"),
                    )
                    .required_property(
                        "duration",
                        DataSchema::of_type(JsonType::Integer)
                            .minimum(1)
                            .unit("milliseconds"),
                    ),
            ),
        ActionHandler::new(|context| async move {
            let duration = context
                .input_member("duration")
                .and_then(JsonValue::as_u64)
                .unwrap_or_default();

            tokio::select! {
                () = context.cancelled() => return Ok(()),
                () = tokio::time::sleep(Duration::from_millis(duration)) => {}
            }

            let Some(thing) = context.thing() else {
                return Ok(());
            };
            let brightness = context
                .input_member("brightness")
                .cloned()
                .unwrap_or_default();
            let _ = thing.set_property("brightness", brightness)?;
            thing.add_event(Event::with_data("overheated", 102));
            Ok(())
        }),
    );

    thing.add_available_event(
        "overheated",
        DataSchema::of_type(JsonType::Number)
            .description("The lamp has exceeded its safe operating temperature")
            .unit("degree celsius"),
    );

    thing
}

#[tokio::main]
async fn main() -> Result<(), webthing_os::error::Error> {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();

    let mut server = Server::new(ThingGroup::single(lamp())).port(cli.port);
    if let Some(hostname) = cli.hostname {
        server = server.hostname(hostname);
    }
    server = if cli.no_discovery {
        server.without_discovery()
    } else {
        server.service(ServiceConfig::new().property("model", "dimmable-lamp"))
    };

    server.run().await
}
