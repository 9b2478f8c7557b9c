//! Shared fixtures for receiver scenario tests.

use jetta_check_fixtures::{
    ADD_ACTION, AddCarRequest, ApiContext, HarnessConfig, JETTA_RECEIVER_PATH, RESULT_ADDED,
    RESULT_NO_CONTENT, ReceiverResponse, default_schemas_root,
};
use jetta_check_rest::{RequestOptions, Response};
use serde_json::{Value, json};
use tokio::runtime::Runtime;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate, Respond};

/// Stand-in for the receiver implementing its documented contract.
#[allow(dead_code)]
struct ReceiverContract;

impl Respond for ReceiverContract {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Ok(body) = request.body_json::<AddCarRequest>() else {
            return ResponseTemplate::new(400).set_body_json(json!({"result": "Bad Request"}));
        };
        if body.action != ADD_ACTION {
            return ResponseTemplate::new(400).set_body_json(json!({"result": "Bad Request"}));
        }
        if body.car.make.is_empty() || body.car.model.is_empty() {
            return ResponseTemplate::new(204);
        }

        ResponseTemplate::new(200).set_body_json(ReceiverResponse {
            result: RESULT_ADDED.to_string(),
            car: Some(body.car),
        })
    }
}

/// Running stub receiver. Keep it alive for the duration of the test.
#[allow(dead_code)]
pub struct StubReceiver {
    _runtime: Runtime,
    server: MockServer,
}

#[allow(dead_code)]
impl StubReceiver {
    /// Starts a stub receiver on an ephemeral port.
    pub fn start() -> Self {
        let runtime = Runtime::new().expect("tokio runtime should start");
        let server = runtime.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path(JETTA_RECEIVER_PATH))
                .respond_with(ReceiverContract)
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path(JETTA_RECEIVER_PATH))
                .respond_with(ResponseTemplate::new(405).set_body_string(
                    "<!doctype html><title>405 Method Not Allowed</title>",
                ))
                .mount(&server)
                .await;
            server
        });

        Self {
            _runtime: runtime,
            server,
        }
    }

    /// Fresh per-test context pointed at this stub.
    pub fn context(&self) -> ApiContext {
        let config = HarnessConfig::new(&self.server.uri(), default_schemas_root())
            .expect("stub uri should be a valid base url");
        ApiContext::new(config).expect("api context should build")
    }
}

/// Receiver URL for `context`.
#[allow(dead_code)]
pub fn receiver_url(context: &ApiContext) -> String {
    context
        .config
        .jetta_receiver_url()
        .expect("receiver url should join")
}

/// POSTs an add request for `make`/`model`.
#[allow(dead_code)]
pub fn post_add(context: &ApiContext, make: &str, model: &str) -> Response {
    let options = RequestOptions::new()
        .json_body(&AddCarRequest::add(make, model))
        .expect("request body should serialize")
        .log_request(true)
        .log_response(true);
    context
        .rest
        .post(&receiver_url(context), None, options)
        .expect("receiver should be reachable")
}

/// `result` field of the response, panicking with the raw body when absent.
#[allow(dead_code)]
pub fn result_field(response: &Response) -> &str {
    response
        .json_at("/result")
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("response has no `result`: {:?}", response.body))
}

/// Asserts the empty-fields outcome.
///
/// HTTP forbids a payload on 204, so most servers and transports drop it; the
/// `result` text is checked only when a body made it through.
#[allow(dead_code)]
pub fn assert_no_content(response: &Response) {
    assert_eq!(
        response.status_code, 204,
        "The response status code is not 204, actual {}",
        response.status_code
    );
    if response.json.is_some() {
        assert_eq!(result_field(response), RESULT_NO_CONTENT);
    }
}
