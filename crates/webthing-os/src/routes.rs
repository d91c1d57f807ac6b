use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{FromRequestParts, Json, RawPathParams, Request, State, ws::WebSocketUpgrade},
    http::{
        HeaderMap, HeaderValue, Method, StatusCode,
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN, HOST, UPGRADE,
        },
        request::Parts,
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};

use hashbrown::HashSet;

use serde_json::{Map, Value as JsonValue};

use tokio_util::sync::CancellationToken;

use tracing::debug;

use webthing::description::ThingDescription;
use webthing::{Link, Thing, ThingGroup};

use crate::responses::error::ErrorResponse;
use crate::websocket;

const THING_ID: &str = "thing_id";
const PROPERTY_NAME: &str = "property_name";
const ACTION_NAME: &str = "action_name";
const ACTION_ID: &str = "action_id";
const EVENT_NAME: &str = "event_name";

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) group: Arc<ThingGroup>,
    pub(crate) hosts: Arc<HashSet<String>>,
    pub(crate) subscriber_capacity: usize,
    pub(crate) shutdown: CancellationToken,
}

// The Thing a request is addressed to, together with the path parameters.
struct Target {
    thing: Thing,
    params: Vec<(String, String)>,
}

impl Target {
    fn param(&self, name: &str) -> &str {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .unwrap_or_default()
    }
}

impl FromRequestParts<AppState> for Target {
    type Rejection = ErrorResponse;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Routes without parameters have nothing to extract.
        let params: Vec<(String, String)> = RawPathParams::from_request_parts(parts, state)
            .await
            .map(|raw| {
                raw.iter()
                    .map(|(key, value)| (key.to_owned(), value.to_owned()))
                    .collect()
            })
            .unwrap_or_default();

        let thing = match &*state.group {
            ThingGroup::Single(thing) => thing.clone(),
            ThingGroup::Multiple { things, .. } => params
                .iter()
                .find(|(key, _)| key == THING_ID)
                .and_then(|(_, index)| index.parse::<usize>().ok())
                .and_then(|index| things.get(index))
                .cloned()
                .ok_or_else(|| ErrorResponse::not_found("No such Thing"))?,
        };

        Ok(Self { thing, params })
    }
}

fn request_host(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(HOST)
        .and_then(|host| host.to_str().ok())
        .or_else(|| parts.uri.authority().map(|authority| authority.as_str()))
        .map(str::to_lowercase)
}

fn describe(thing: &Thing, host: &str) -> ThingDescription {
    let href = thing.href();
    thing
        .as_thing_description()
        .link(Link::new("alternate", format!("ws://{host}{href}")))
        .base(format!("http://{host}{href}"))
        .no_security()
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(UPGRADE)
        .and_then(|upgrade| upgrade.to_str().ok())
        .is_some_and(|upgrade| upgrade.eq_ignore_ascii_case("websocket"))
}

fn parse_body(body: &Bytes) -> Result<Map<String, JsonValue>, ErrorResponse> {
    match serde_json::from_slice(body) {
        Ok(JsonValue::Object(body)) => Ok(body),
        Ok(_) => Err(ErrorResponse::bad_request("The body must be a JSON object")),
        Err(e) => Err(ErrorResponse::bad_request(&format!("Invalid JSON body: {e}"))),
    }
}

fn single_member(body: Map<String, JsonValue>) -> Result<(String, JsonValue), ErrorResponse> {
    let mut members = body.into_iter();
    match (members.next(), members.next()) {
        (Some(member), None) => Ok(member),
        _ => Err(ErrorResponse::bad_request(
            "The body must contain exactly one action",
        )),
    }
}

fn action_input(params: &JsonValue) -> Option<JsonValue> {
    params.get("input").cloned()
}

async fn thing_root(State(state): State<AppState>, target: Target, request: Request) -> Response {
    let (mut parts, _body) = request.into_parts();

    if is_websocket_upgrade(&parts.headers) {
        return match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
            Ok(upgrade) => {
                let thing = target.thing;
                upgrade.on_upgrade(move |socket| {
                    websocket::serve(socket, thing, state.subscriber_capacity, state.shutdown)
                })
            }
            Err(rejection) => rejection.into_response(),
        };
    }

    let host = request_host(&parts).unwrap_or_default();
    Json(describe(&target.thing, &host)).into_response()
}

async fn things_root(State(state): State<AppState>, request: Request) -> Json<Vec<ThingDescription>> {
    let (parts, _body) = request.into_parts();
    let host = request_host(&parts).unwrap_or_default();

    Json(
        state
            .group
            .things()
            .iter()
            .map(|thing| describe(thing, &host).href(thing.href()))
            .collect(),
    )
}

async fn properties(target: Target) -> Json<Map<String, JsonValue>> {
    Json(target.thing.get_properties())
}

async fn property(target: Target) -> Result<Json<JsonValue>, ErrorResponse> {
    let name = target.param(PROPERTY_NAME);
    let value = target
        .thing
        .get_property(name)
        .ok_or_else(|| ErrorResponse::not_found(&format!("No property named `{name}`")))?;

    let mut body = Map::new();
    let _ = body.insert(name.to_owned(), value);
    Ok(Json(JsonValue::Object(body)))
}

async fn set_property(target: Target, body: Bytes) -> Result<Json<JsonValue>, ErrorResponse> {
    let name = target.param(PROPERTY_NAME);
    let mut body = parse_body(&body)?;
    let value = body
        .remove(name)
        .ok_or_else(|| ErrorResponse::bad_request(&format!("Missing the `{name}` member")))?;

    let _ = target.thing.set_property(name, value)?;
    debug!("Property `{name}` set through the API");

    property(target).await
}

async fn actions(target: Target) -> Json<Vec<JsonValue>> {
    Json(target.thing.action_descriptions(None))
}

async fn request_action(
    target: Target,
    body: Bytes,
) -> Result<(StatusCode, Json<JsonValue>), ErrorResponse> {
    let (name, params) = single_member(parse_body(&body)?)?;
    let action = target
        .thing
        .request_action(&name, action_input(&params), None)?;
    Ok((StatusCode::CREATED, Json(action.as_description())))
}

async fn actions_by_name(target: Target) -> Result<Json<Vec<JsonValue>>, ErrorResponse> {
    let name = target.param(ACTION_NAME);
    if !target.thing.has_available_action(name) {
        return Err(ErrorResponse::not_found(&format!("No action named `{name}`")));
    }
    Ok(Json(target.thing.action_descriptions(Some(name))))
}

async fn request_named_action(
    target: Target,
    body: Bytes,
) -> Result<(StatusCode, Json<JsonValue>), ErrorResponse> {
    let expected = target.param(ACTION_NAME);
    let (name, params) = single_member(parse_body(&body)?)?;
    if name != expected {
        return Err(ErrorResponse::bad_request(&format!(
            "The body requests `{name}` instead of `{expected}`"
        )));
    }

    let action = target
        .thing
        .request_action(&name, action_input(&params), None)?;
    Ok((StatusCode::CREATED, Json(action.as_description())))
}

async fn action(target: Target) -> Result<Json<JsonValue>, ErrorResponse> {
    let action = target
        .thing
        .get_action(target.param(ACTION_NAME), target.param(ACTION_ID))?;
    Ok(Json(action.as_description()))
}

async fn remove_action(target: Target) -> Result<StatusCode, ErrorResponse> {
    let _ = target
        .thing
        .remove_action(target.param(ACTION_NAME), target.param(ACTION_ID))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn events(target: Target) -> Json<Vec<JsonValue>> {
    Json(target.thing.event_descriptions(None))
}

async fn events_by_name(target: Target) -> Result<Json<Vec<JsonValue>>, ErrorResponse> {
    let name = target.param(EVENT_NAME);
    if !target.thing.has_available_event(name) {
        return Err(ErrorResponse::not_found(&format!("No event named `{name}`")));
    }
    Ok(Json(target.thing.event_descriptions(Some(name))))
}

fn with_cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    let _ = headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    let _ = headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Origin, X-Requested-With, Content-Type, Accept"),
    );
    let _ = headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, HEAD, PUT, POST, DELETE"),
    );
    response
}

// Rejects unknown `Host` headers, answers preflight requests and adds the
// `CORS` headers to every response.
async fn guard(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();

    let allowed = request_host(&parts).is_some_and(|host| state.hosts.contains(&host));
    if !allowed {
        debug!("Rejected a request with `Host` {:?}", parts.headers.get(HOST));
        return with_cors(ErrorResponse::forbidden("Host not allowed").into_response());
    }

    if parts.method == Method::OPTIONS {
        return with_cors(StatusCode::NO_CONTENT.into_response());
    }

    with_cors(next.run(Request::from_parts(parts, body)).await)
}

fn thing_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(thing_root))
        .route("/properties", get(properties))
        .route(
            &format!("/properties/{{{PROPERTY_NAME}}}"),
            get(property).put(set_property),
        )
        .route("/actions", get(actions).post(request_action))
        .route(
            &format!("/actions/{{{ACTION_NAME}}}"),
            get(actions_by_name).post(request_named_action),
        )
        .route(
            &format!("/actions/{{{ACTION_NAME}}}/{{{ACTION_ID}}}"),
            get(action).delete(remove_action),
        )
        .route("/events", get(events))
        .route(&format!("/events/{{{EVENT_NAME}}}"), get(events_by_name))
}

/// Builds the router serving all Things of the state, under `base_path`.
pub(crate) fn router(state: AppState, base_path: &str) -> Router {
    let routes = if state.group.is_multiple() {
        Router::new()
            .route("/", get(things_root))
            .nest(&format!("/{{{THING_ID}}}"), thing_routes())
    } else {
        thing_routes()
    };

    let routes = if base_path.is_empty() {
        routes
    } else {
        Router::new().nest(base_path, routes)
    };

    routes
        .layer(middleware::from_fn_with_state(state.clone(), guard))
        .with_state(state)
}
