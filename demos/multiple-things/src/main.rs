//! A lamp and a humidity sensor served by one server.

use std::time::Duration;

use clap::Parser;

use serde_json::Value as JsonValue;

use tracing::{info, warn};

use webthing::{
    ActionHandler, ActionMetadata, DataSchema, Event, JsonType, Property, Thing, ThingGroup, Value,
};

use webthing_os::Server;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server port.
    #[arg(short, long, default_value_t = 8888)]
    port: u16,

    /// Path the Things are served under.
    #[arg(long, default_value = "")]
    base_path: String,

    /// Seconds between two humidity readings.
    #[arg(long, default_value_t = 3)]
    interval: u64,
}

fn lamp() -> Thing {
    let thing = Thing::builder("urn:dev:ops:my-lamp-1234", "My Lamp")
        .semantic_type("OnOffSwitch")
        .semantic_type("Light")
        .description("A web connected lamp")
        .event_retention(16)
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
            .title("Brightness")
            .minimum(0)
            .maximum(100)
            .unit("percent"),
    ));

    // Switching a relay is blocking input/output.
    thing.add_available_action(
        "toggle",
        ActionMetadata::new().title("Toggle"),
        ActionHandler::blocking(|context| {
            let Some(thing) = context.thing() else {
                return Ok(());
            };
            let on = thing
                .get_property("on")
                .and_then(|on| on.as_bool())
                .unwrap_or_default();
            std::thread::sleep(Duration::from_millis(100));
            let _ = thing.set_property("on", !on)?;
            Ok(())
        }),
    );

    thing.add_available_action(
        "fade",
        ActionMetadata::new().title("Fade").input(
            DataSchema::of_type(JsonType::Object)
                .required_property(
                    "brightness",
                    DataSchema::of_type(JsonType::Integer).minimum(0).maximum(100),
                )
                .required_property("duration", DataSchema::of_type(JsonType::Integer).minimum(1)),
        ),
        ActionHandler::new(|context| async move {
            let duration = context
                .input_member("duration")
                .and_then(JsonValue::as_u64)
                .unwrap_or_default();
            tokio::time::sleep(Duration::from_millis(duration)).await;

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
        DataSchema::of_type(JsonType::Number).unit("degree celsius"),
    );

    thing
}

fn humidity_sensor() -> Thing {
    let thing = Thing::builder("urn:dev:ops:my-humidity-sensor-1234", "My Humidity Sensor")
        .semantic_type("MultiLevelSensor")
        .description("A web connected humidity sensor")
        .build();

    let _ = thing.add_property(Property::new(
        "level",
        Value::new(0.0),
        DataSchema::of_type(JsonType::Number)
            .semantic_type("LevelProperty")
            .title("Humidity")
            .description("The current humidity in %")
            .minimum(0)
            .maximum(100)
            .unit("percent")
            .read_only(),
    ));

    thing
}

// Simulates a sensor reading drifting around 50%.
fn read_humidity(step: u64) -> f64 {
    let drift = (step * 37 % 200) as f64 / 10.0;
    (40.0 + drift).min(100.0)
}

#[tokio::main]
async fn main() -> Result<(), webthing_os::error::Error> {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();

    let sensor = humidity_sensor();
    let level = sensor.find_property("level");
    let interval = Duration::from_secs(cli.interval.max(1));
    let _ = tokio::spawn(async move {
        let Some(level) = level else {
            warn!("The humidity sensor has no `level` property");
            return;
        };
        let mut step = 0;
        loop {
            tokio::time::sleep(interval).await;
            step += 1;
            let reading = read_humidity(step);
            info!("Humidity reading: {reading}%");
            let _ = level.value().notify_of_external_update(reading);
        }
    });

    Server::new(ThingGroup::multiple(
        vec![lamp(), sensor],
        "LightAndHumidityDevice",
    ))
    .port(cli.port)
    .base_path(&cli.base_path)
    .run()
    .await
}
