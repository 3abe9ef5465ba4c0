//! Behavioural tests for stage and scene dispatch.

use std::cell::RefCell;
use std::sync::Arc;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::{Value, json};

use super::support::{FIXTURE_NOTES, FailingEngine, TestServer, settle, strip_quotes};

struct DispatchWorld {
    server: Option<TestServer>,
    stage: Option<Value>,
    reply: Option<Value>,
    ack: Option<String>,
    report: Option<Value>,
}

impl DispatchWorld {
    fn server(&self) -> &TestServer {
        self.server.as_ref().expect("server started")
    }

    fn stage(&self) -> Value {
        self.stage.clone().expect("stage created")
    }

    fn send(&mut self, raw: &str) {
        self.reply = self.server().send(raw);
    }

    fn call(&mut self, method: &str, params: Value) {
        self.reply = Some(self.server().call(method, params));
    }

    fn reply(&self) -> &Value {
        self.reply.as_ref().expect("a response was written")
    }

    fn result(&self) -> &Value {
        let reply = self.reply();
        assert!(reply.get("error").is_none(), "request failed: {reply}");
        &reply["result"]
    }

    fn error(&self) -> &Value {
        let reply = self.reply();
        assert!(reply.get("result").is_none(), "request succeeded: {reply}");
        &reply["error"]
    }

    fn ok(&self, method: &str, params: Value) -> Value {
        self.server().ok(method, params)
    }
}

#[fixture]
fn world() -> RefCell<DispatchWorld> {
    RefCell::new(DispatchWorld {
        server: None,
        stage: None,
        reply: None,
        ack: None,
        report: None,
    })
}

#[given("a control server")]
fn given_control_server(world: &RefCell<DispatchWorld>) {
    world.borrow_mut().server = Some(TestServer::start());
}

#[given("a control server whose document engine fails")]
fn given_failing_engine(world: &RefCell<DispatchWorld>) {
    world.borrow_mut().server = Some(TestServer::with_engine(Arc::new(FailingEngine)));
}

#[given("an in-memory stage")]
fn given_in_memory_stage(world: &RefCell<DispatchWorld>) {
    let stage = world.borrow().ok("usd/create_stage", json!({}))["stage_id"].clone();
    world.borrow_mut().stage = Some(stage);
}

#[given(r#"a stage saved to "{file}" with prim "{path}""#)]
fn given_saved_stage(world: &RefCell<DispatchWorld>, file: String, path: String) {
    let file = world.borrow().server().path(strip_quotes(&file));
    let stage = {
        let world = world.borrow();
        let stage = world.ok("usd/create_stage", json!({"file_path": file}))["stage_id"].clone();
        world.ok(
            "usd/create_prim",
            json!({"stage_id": stage, "prim_path": strip_quotes(&path)}),
        );
        world.ok("usd/save_stage", json!({"stage_id": stage}));
        stage
    };
    world.borrow_mut().stage = Some(stage);
}

#[when("the client initializes")]
fn when_initializes(world: &RefCell<DispatchWorld>) {
    world.borrow_mut().call("initialize", json!({}));
}

#[when(r#"an initialized request with text id "{id}" is sent"#)]
fn when_text_id(world: &RefCell<DispatchWorld>, id: String) {
    let message = json!({"jsonrpc": "2.0", "id": strip_quotes(&id), "method": "initialized"});
    world.borrow_mut().send(&message.to_string());
}

#[when("an initialized request with numeric id {id} is sent")]
fn when_numeric_id(world: &RefCell<DispatchWorld>, id: u64) {
    let message = json!({"jsonrpc": "2.0", "id": id, "method": "initialized"});
    world.borrow_mut().send(&message.to_string());
}

#[when("a create_stage notification is sent")]
fn when_create_notification(world: &RefCell<DispatchWorld>) {
    world
        .borrow_mut()
        .send(r#"{"jsonrpc":"2.0","method":"usd/create_stage"}"#);
}

#[when("a notification for an unknown method is sent")]
fn when_unknown_notification(world: &RefCell<DispatchWorld>) {
    world.borrow_mut().send(r#"{"method":"no/such_method"}"#);
}

#[when("a close_stage notification names a missing stage")]
fn when_failing_notification(world: &RefCell<DispatchWorld>) {
    world
        .borrow_mut()
        .send(r#"{"method":"usd/close_stage","stage_id":99}"#);
}

#[when("a message with neither method nor id is sent")]
fn when_bare_message(world: &RefCell<DispatchWorld>) {
    world.borrow_mut().send(r#"{"jsonrpc":"2.0"}"#);
}

#[when("a message that is not JSON is sent")]
fn when_not_json(world: &RefCell<DispatchWorld>) {
    world.borrow_mut().send("{not json");
}

#[when("a JSON array is sent")]
fn when_json_array(world: &RefCell<DispatchWorld>) {
    world.borrow_mut().send("[1, 2, 3]");
}

#[when("a request with id {id} and no method is sent")]
fn when_no_method(world: &RefCell<DispatchWorld>, id: u64) {
    world
        .borrow_mut()
        .send(&json!({"jsonrpc": "2.0", "id": id}).to_string());
}

#[when(r#"the "{method}" method is called"#)]
fn when_method_called(world: &RefCell<DispatchWorld>, method: String) {
    world.borrow_mut().call(strip_quotes(&method), json!({}));
}

#[when(r#"prim "{path}" is created"#)]
fn when_prim_created(world: &RefCell<DispatchWorld>, path: String) {
    let stage = world.borrow().stage();
    world.borrow_mut().call(
        "usd/create_prim",
        json!({"stage_id": stage, "prim_path": strip_quotes(&path), "prim_type": "Mesh"}),
    );
}

#[when(r#"prim "{path}" is created with top-level parameters"#)]
fn when_prim_created_flat(world: &RefCell<DispatchWorld>, path: String) {
    let stage = world.borrow().stage();
    let message = json!({
        "jsonrpc": "2.0", "id": 2, "method": "usd/create_prim",
        "stage_id": stage, "prim_path": strip_quotes(&path),
    });
    world.borrow_mut().send(&message.to_string());
}

#[when(r#"attribute "{name}" of "{path}" is set to "{value}""#)]
fn when_attribute_set(world: &RefCell<DispatchWorld>, name: String, path: String, value: String) {
    let stage = world.borrow().stage();
    world.borrow_mut().call(
        "usd/set_attribute",
        json!({"stage_id": stage, "prim_path": strip_quotes(&path), "attr_name": strip_quotes(&name),
               "value_type": "string", "value": strip_quotes(&value)}),
    );
}

#[when(r#"prim "{path}" is moved to x {x}"#)]
fn when_prim_moved(world: &RefCell<DispatchWorld>, path: String, x: f64) {
    let stage = world.borrow().stage();
    world.borrow_mut().call(
        "usd/set_transform",
        json!({"stage_id": stage, "prim_path": strip_quotes(&path), "tx": x}),
    );
    let world = world.borrow();
    assert_eq!(world.result()["tx"], x);
    assert_eq!(world.result()["sx"], 1.0);
}

#[when("the stage is closed")]
fn when_stage_closed(world: &RefCell<DispatchWorld>) {
    let stage = world.borrow().stage();
    world.borrow_mut().call("usd/close_stage", json!({"stage_id": stage}));
}

#[when("the stage is unloaded")]
fn when_stage_unloaded(world: &RefCell<DispatchWorld>) {
    let stage = world.borrow().stage();
    world.borrow_mut().call("usd/unload_stage", json!({"stage_id": stage}));
}

#[when(r#""{file}" is registered at generation {generation}"#)]
fn when_registered(world: &RefCell<DispatchWorld>, file: String, generation: u64) {
    let file = world.borrow().server().path(strip_quotes(&file));
    world.borrow_mut().call(
        "usd/register_stage",
        json!({"file_path": file, "generation": generation}),
    );
    let stage = world.borrow().result()["stage_id"].clone();
    world.borrow_mut().stage = Some(stage);
}

#[when(r#"the scene tree under "{path}" is queried to depth {depth}"#)]
fn when_tree_queried(world: &RefCell<DispatchWorld>, path: String, depth: u64) {
    let ack = world.borrow().ok(
        "scene/query_scene_tree",
        json!({"path": strip_quotes(&path), "depth": depth}),
    );
    assert_eq!(ack["status"], "pending");
    world.borrow_mut().ack = Some(ack["ack"].as_str().expect("ack token").to_owned());
}

#[when("the query is polled until it settles")]
fn when_query_settles(world: &RefCell<DispatchWorld>) {
    let report = {
        let world = world.borrow();
        settle(world.server(), world.ack.as_deref().expect("query started"))
    };
    world.borrow_mut().report = Some(report);
}

#[when("an unknown ack token is polled")]
fn when_unknown_ack(world: &RefCell<DispatchWorld>) {
    world
        .borrow_mut()
        .call("scene/dtack", json!({"ack": "ack-unknown"}));
}

#[then(r#"the server describes itself as "{name}""#)]
fn then_server_name(world: &RefCell<DispatchWorld>, name: String) {
    let world = world.borrow();
    let result = world.result();
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert_eq!(result["serverInfo"]["name"], strip_quotes(&name));
    assert_eq!(result["_meta"]["hostVersion"], "test host 1.0");
}

fn tool_names(world: &DispatchWorld) -> Vec<String> {
    world.result()["capabilities"]["tools"]["tools"]
        .as_array()
        .expect("tool list")
        .iter()
        .filter_map(|tool| tool["name"].as_str().map(str::to_owned))
        .collect()
}

#[then(r#"the tool list includes "{method}""#)]
fn then_tool_listed(world: &RefCell<DispatchWorld>, method: String) {
    let names = tool_names(&world.borrow());
    assert!(names.iter().any(|name| name == strip_quotes(&method)), "tools: {names:?}");
}

#[then(r#"the tool list omits "{method}""#)]
fn then_tool_omitted(world: &RefCell<DispatchWorld>, method: String) {
    let names = tool_names(&world.borrow());
    assert!(!names.iter().any(|name| name == strip_quotes(&method)), "tools: {names:?}");
}

#[then("the result carries the operator notes")]
fn then_notes(world: &RefCell<DispatchWorld>) {
    assert_eq!(world.borrow().result()["_meta"]["notes"], FIXTURE_NOTES);
}

#[then(r#"the response id is the text "{id}""#)]
fn then_text_id(world: &RefCell<DispatchWorld>, id: String) {
    let world = world.borrow();
    assert_eq!(world.reply()["id"], strip_quotes(&id));
    assert_eq!(world.reply()["jsonrpc"], "2.0");
}

#[then("the response id is the number {id}")]
fn then_numeric_id(world: &RefCell<DispatchWorld>, id: u64) {
    assert_eq!(world.borrow().reply()["id"], id);
}

#[then("the response id is null")]
fn then_null_id(world: &RefCell<DispatchWorld>) {
    assert!(world.borrow().reply()["id"].is_null());
}

#[then("no response is written")]
fn then_no_response(world: &RefCell<DispatchWorld>) {
    let world = world.borrow();
    assert!(world.reply.is_none(), "unexpected response: {:?}", world.reply);
}

#[then("the server lists {count} stages")]
fn then_stage_count(world: &RefCell<DispatchWorld>, count: u64) {
    assert_eq!(world.borrow().ok("usd/list_stages", json!({}))["count"], count);
}

#[then("the error code is {code}")]
fn then_error_code(world: &RefCell<DispatchWorld>, code: i64) {
    assert_eq!(world.borrow().error()["code"], code);
}

#[then(r#"the error message mentions "{text}""#)]
fn then_error_mentions(world: &RefCell<DispatchWorld>, text: String) {
    let world = world.borrow();
    let message = world.error()["message"].as_str().expect("message");
    assert!(message.contains(strip_quotes(&text)), "message: {message}");
}

#[then(r#"the error message is "{text}""#)]
fn then_error_message(world: &RefCell<DispatchWorld>, text: String) {
    assert_eq!(world.borrow().error()["message"], strip_quotes(&text));
}

#[then("the stage generation is {generation}")]
fn then_generation(world: &RefCell<DispatchWorld>, generation: u64) {
    let world = world.borrow();
    let reported = world.ok("usd/query_generation", json!({"stage_id": world.stage()}));
    assert_eq!(reported["generation"], generation);
}

#[then(r#"attribute "{name}" of "{path}" reads "{value}""#)]
fn then_attribute(world: &RefCell<DispatchWorld>, name: String, path: String, value: String) {
    let world = world.borrow();
    let attribute = world.ok(
        "usd/get_attribute",
        json!({"stage_id": world.stage(), "prim_path": strip_quotes(&path),
               "attr_name": strip_quotes(&name)}),
    );
    assert_eq!(attribute["value"], strip_quotes(&value));
    assert_eq!(attribute["value_type"], "string");
}

#[then(r#"the stage lists prim "{path}""#)]
fn then_lists_prim(world: &RefCell<DispatchWorld>, path: String) {
    let world = world.borrow();
    let prims = world.ok("usd/list_prims", json!({"stage_id": world.stage()}));
    let listed = prims["prims"].as_array().expect("prim list");
    assert!(listed.contains(&json!(strip_quotes(&path))), "prims: {listed:?}");
}

#[then("the stage holds {count} prims")]
fn then_prim_count(world: &RefCell<DispatchWorld>, count: u64) {
    let world = world.borrow();
    let prims = world.ok("usd/list_prims", json!({"stage_id": world.stage()}));
    assert_eq!(prims["count"], count);
}

#[then(r#"the exported stage mentions "{path}""#)]
fn then_export_mentions(world: &RefCell<DispatchWorld>, path: String) {
    let world = world.borrow();
    let exported = world.ok("usd/export_stage", json!({"stage_id": world.stage()}));
    assert!(exported["text"].as_str().expect("text").contains(strip_quotes(&path)));
}

#[then(r#"the created prim has type "{prim_type}""#)]
fn then_prim_type(world: &RefCell<DispatchWorld>, prim_type: String) {
    assert_eq!(world.borrow().result()["prim_type"], strip_quotes(&prim_type));
}

#[then(r#"listing the stage's prims fails with "{text}""#)]
fn then_listing_fails(world: &RefCell<DispatchWorld>, text: String) {
    let world = world.borrow();
    let error = world
        .server()
        .err("usd/list_prims", json!({"stage_id": world.stage()}));
    assert_eq!(error["code"], -32000);
    assert!(error["message"].as_str().expect("message").contains(strip_quotes(&text)));
}

#[then("closing the stage again fails")]
fn then_close_again_fails(world: &RefCell<DispatchWorld>) {
    let world = world.borrow();
    let error = world
        .server()
        .err("usd/close_stage", json!({"stage_id": world.stage()}));
    assert_eq!(error["code"], -32000);
}

#[then("the stage is listed as not loaded")]
fn then_listed_unloaded(world: &RefCell<DispatchWorld>) {
    let listed = world.borrow().ok("usd/list_stages", json!({}));
    assert_eq!(listed["stages"][0]["loaded"], false);
}

#[then("the registered stage is not loaded")]
fn then_registered_unloaded(world: &RefCell<DispatchWorld>) {
    assert_eq!(world.borrow().result()["loaded"], false);
}

#[then(r#"the published events are "{names}""#)]
fn then_events(world: &RefCell<DispatchWorld>, names: String) {
    let world = world.borrow();
    let expected: Vec<&str> = strip_quotes(&names).split(", ").collect();
    assert_eq!(world.server().events().names(), expected);
    let changed = world
        .server()
        .events()
        .last("stage_changed")
        .expect("stage_changed event");
    assert_eq!(changed.payload["generation"], 1);
}

#[then("the query completed with {count} children")]
fn then_query_children(world: &RefCell<DispatchWorld>, count: usize) {
    let world = world.borrow();
    let report = world.report.as_ref().expect("query settled");
    assert_eq!(report["status"], "complete");
    assert_eq!(report["cancel"], "not_requested");
    let children = report["result"]["children"].as_array().expect("children");
    assert_eq!(children.len(), count);
}

#[then(r#"the first child is "{path}""#)]
fn then_first_child(world: &RefCell<DispatchWorld>, path: String) {
    let world = world.borrow();
    let report = world.report.as_ref().expect("query settled");
    assert_eq!(report["result"]["children"][0]["path"], strip_quotes(&path));
}

#[then("polling the query again fails")]
fn then_poll_again_fails(world: &RefCell<DispatchWorld>) {
    let world = world.borrow();
    let error = world
        .server()
        .err("scene/dtack", json!({"ack": world.ack.as_deref().expect("query started")}));
    assert_eq!(error["code"], -32000);
}

#[then("the query settled as an error")]
fn then_query_failed(world: &RefCell<DispatchWorld>) {
    let world = world.borrow();
    let report = world.report.as_ref().expect("query settled");
    assert_eq!(report["status"], "error");
    assert!(report.get("result").is_none());
}

#[scenario(
    path = "tests/features/stage_dispatch.feature",
    name = "Initialize describes the server and its tools"
)]
fn initialize_describes_server(world: RefCell<DispatchWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/stage_dispatch.feature",
    name = "Responses echo the request id"
)]
fn responses_echo_ids(world: RefCell<DispatchWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/stage_dispatch.feature",
    name = "Notifications run without a reply"
)]
fn notifications_run_silently(world: RefCell<DispatchWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/stage_dispatch.feature",
    name = "Failing notifications stay silent"
)]
fn failing_notifications_stay_silent(world: RefCell<DispatchWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/stage_dispatch.feature",
    name = "Malformed messages get parse errors with a null id"
)]
fn malformed_messages(world: RefCell<DispatchWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/stage_dispatch.feature",
    name = "A request without a method is a parse error"
)]
fn missing_method(world: RefCell<DispatchWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/stage_dispatch.feature",
    name = "Unknown methods are named in the error"
)]
fn unknown_methods(world: RefCell<DispatchWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/stage_dispatch.feature",
    name = "Authoring a stage bumps its generation"
)]
fn authoring_bumps_generation(world: RefCell<DispatchWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/stage_dispatch.feature",
    name = "Parameters may sit at the top level of the message"
)]
fn top_level_parameters(world: RefCell<DispatchWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/stage_dispatch.feature",
    name = "Closed stages are not found"
)]
fn closed_stages(world: RefCell<DispatchWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/stage_dispatch.feature",
    name = "Saved stages reload after an unload"
)]
fn unload_and_reload(world: RefCell<DispatchWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/stage_dispatch.feature",
    name = "Registered stages load lazily"
)]
fn lazy_registration(world: RefCell<DispatchWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/stage_dispatch.feature",
    name = "Engine failures do not leak details"
)]
fn engine_failures(world: RefCell<DispatchWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/stage_dispatch.feature",
    name = "Mutations publish events"
)]
fn mutations_publish_events(world: RefCell<DispatchWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/stage_dispatch.feature",
    name = "Scene tree queries settle through dtack"
)]
fn scene_queries_settle(world: RefCell<DispatchWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/stage_dispatch.feature",
    name = "Failed scene queries settle as errors"
)]
fn failed_scene_queries(world: RefCell<DispatchWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/stage_dispatch.feature",
    name = "Unknown ack tokens are operation failures"
)]
fn unknown_ack_tokens(world: RefCell<DispatchWorld>) {
    drop(world);
}
