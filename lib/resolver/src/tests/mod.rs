use std::sync::{atomic::Ordering, Arc};
use std::time::Duration;

use bytes::Bytes;
use hive_router_resolver_config::ResolverConfig;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    connector::DataSource,
    context::{Context, RenameTypeName},
    error::ResolveError,
    fetch::batch::EntityBatchFactory,
    plan::{
        fetch::{BatchFetch, Fetch, ProcessResponseConfig, SingleFetch},
        node::{
            Array, DeferMarker, Field, FieldExport, FieldSet, Node, Null, Object, StringNode,
        },
        response::{
            GraphQLResponse, GraphQLStreamingResponse, GraphQLSubscription, Plan,
            SubscriptionTrigger,
        },
    },
    postprocess,
    resolve::Resolver,
    template::{renderer::VariableRenderer, variable::Variable, InputTemplate},
};


use sources::{
    Cents, EventSource, FailingSource, FailingSubscription, MapSource, PanickingHook,
    RecordingHook, StaticSource,
};

fn text(bytes: Bytes) -> String {
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn object(fields: Vec<Field>) -> Object {
    Object::new(vec![FieldSet::new(fields)])
}

async fn resolve(resolver: &Resolver, ctx: &Context, node: Node, data: &'static str) -> String {
    let response = GraphQLResponse::new(node);
    let output = resolver
        .resolve_graphql_response(ctx, &response, Some(Bytes::from_static(data.as_bytes())))
        .await
        .unwrap();
    text(output)
}

async fn resolve_static(node: Node, data: &'static str) -> String {
    resolve(&Resolver::default(), &Context::new(), node, data).await
}

fn graphql_fetch(buffer_id: usize, input: &'static str, source: Arc<dyn DataSource>) -> Fetch {
    Fetch::Single(
        SingleFetch::new(buffer_id, InputTemplate::static_input(input), source)
            .with_process_response_config(ProcessResponseConfig::graphql()),
    )
}

/// `{"id":<id>}` rendered from the object in scope.
fn by_id_input() -> InputTemplate {
    InputTemplate::static_input(r#"{"id":"#)
        .push_variable(Variable::object(&["id"], VariableRenderer::Json))
        .push_static("}")
}

#[tokio::test]
async fn nullable_missing_value_is_null() {
    let root = object(vec![Field::new("name", Node::string(&["name"]).nullable())]).into_node();
    assert_eq!(resolve_static(root, "{}").await, r#"{"data":{"name":null}}"#);
}

#[tokio::test]
async fn missing_value_nulls_the_nearest_nullable_parent() {
    let user = object(vec![
        Field::new("name", Node::string(&["name"])).at(3, 5),
        Field::new("id", Node::integer(&["id"])),
    ])
    .with_path(&["user"])
    .nullable()
    .into_node();
    let root = object(vec![
        Field::new("user", user),
        Field::new("version", Node::string(&["version"])),
    ])
    .into_node();

    insta::assert_snapshot!(
        resolve_static(root, r#"{"user":{"id":1},"version":"1.0"}"#).await,
        @r#"{"errors":[{"message":"unable to resolve","locations":[{"line":3,"column":5}],"path":["user","name"]}],"data":{"user":null,"version":"1.0"}}"#
    );
}

#[tokio::test]
async fn non_nullable_root_nulls_data() {
    let root = object(vec![Field::new("name", Node::string(&["name"]))]).into_node();
    assert_eq!(
        resolve_static(root, "{}").await,
        r#"{"errors":[{"message":"unable to resolve","path":["name"]}],"data":null}"#
    );
}

#[tokio::test]
async fn null_item_nulls_a_nullable_list() {
    let ids = Array::new(&["ids"], Node::integer(&[])).nullable().into_node();
    let root = object(vec![Field::new("ids", ids)]).into_node();
    assert_eq!(
        resolve_static(root, r#"{"ids":[1,null,3]}"#).await,
        r#"{"errors":[{"message":"unable to resolve","path":["ids",1]}],"data":{"ids":null}}"#
    );
}

#[tokio::test]
async fn empty_lists_stay_lists_and_missing_lists_are_null() {
    let root = object(vec![
        Field::new("ids", Array::new(&["ids"], Node::integer(&[])).into_node()),
        Field::new(
            "tags",
            Array::new(&["tags"], Node::string(&[])).nullable().into_node(),
        ),
    ])
    .into_node();
    assert_eq!(
        resolve_static(root.clone(), r#"{"ids":[],"tags":"oops"}"#).await,
        r#"{"data":{"ids":[],"tags":null}}"#
    );
    assert_eq!(
        resolve_static(root, r#"{"tags":[]}"#).await,
        r#"{"errors":[{"message":"unable to resolve","path":["ids"]}],"data":null}"#
    );
}

#[tokio::test]
async fn scalars_are_checked_against_their_type() {
    let root = object(vec![
        Field::new("s", Node::string(&["s"])),
        Field::new("b", Node::boolean(&["b"])),
        Field::new("i", Node::integer(&["i"])),
        Field::new("f", Node::float(&["f"])),
        Field::new("big", Node::big_int(&["big"])),
        Field::new("whole", Node::integer(&["whole"])),
        Field::new("wrong", Node::integer(&["wrong"]).nullable()),
        Field::new("empty", Node::EmptyArray),
    ])
    .into_node();

    insta::assert_snapshot!(
        resolve_static(
            root,
            r#"{"s":"a\"b","b":true,"i":-5,"f":1.5,"big":"123456789012345678901","whole":2.0,"wrong":"x"}"#
        )
        .await,
        @r#"{"data":{"s":"a\"b","b":true,"i":-5,"f":1.5,"big":"123456789012345678901","whole":2,"wrong":null,"empty":[]}}"#
    );
}

#[tokio::test]
async fn resolving_twice_is_identical() {
    let root = object(vec![
        Field::new("a", Node::string(&["a"])),
        Field::new("b", Array::new(&["b"], Node::integer(&[])).into_node()),
    ])
    .into_node();
    let resolver = Resolver::default();
    let ctx = Context::new();
    let data = r#"{"a":"x","b":[1,2,3]}"#;

    let first = resolve(&resolver, &ctx, root.clone(), data).await;
    let second = resolve(&resolver, &ctx, root, data).await;
    assert_eq!(first, second);
    assert_eq!(first, r#"{"data":{"a":"x","b":[1,2,3]}}"#);
}

fn friends(asynchronous: bool) -> Node {
    let mut friends = Array::new(
        &["friends"],
        object(vec![
            Field::new("id", Node::integer(&["id"])),
            Field::new("name", Node::string(&["name"])),
        ])
        .into_node(),
    );
    friends.resolve_asynchronously = asynchronous;
    object(vec![Field::new("friends", friends.into_node())]).into_node()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn asynchronous_arrays_keep_item_order() {
    let data = r#"{"friends":[{"id":1,"name":"Alex"},{"id":2,"name":"Patric"}]}"#;
    let concurrent = resolve_static(friends(true), data).await;
    let sequential = resolve_static(friends(false), data).await;

    assert_eq!(
        concurrent,
        r#"{"data":{"friends":[{"id":1,"name":"Alex"},{"id":2,"name":"Patric"}]}}"#
    );
    assert_eq!(concurrent, sequential);
}

#[tokio::test]
async fn type_conditions_select_field_sets() {
    let pet = Object::new(vec![
        FieldSet::new(vec![Field::new("name", Node::string(&["name"]))]),
        FieldSet::new(vec![Field::new("woof", Node::string(&["woof"]))]).on_type_names(&["Dog"]),
        FieldSet::new(vec![Field::new("meow", Node::string(&["meow"]))]).on_type_names(&["Cat"]),
    ])
    .into_node();
    let root = object(vec![Field::new(
        "pets",
        Array::new(&["pets"], pet).into_node(),
    )])
    .into_node();

    assert_eq!(
        resolve_static(
            root,
            r#"{"pets":[{"__typename":"Dog","name":"Rex","woof":"yes"},{"__typename":"Cat","name":"Tom","meow":"no"}]}"#
        )
        .await,
        r#"{"data":{"pets":[{"name":"Rex","woof":"yes"},{"name":"Tom","meow":"no"}]}}"#
    );
}

#[tokio::test]
async fn unmatched_type_condition_nulls_a_nullable_object() {
    let dog = Object::new(vec![FieldSet::new(vec![Field::new(
        "name",
        Node::string(&["name"]),
    )])
    .on_type_names(&["Dog"])])
    .with_path(&["pet"])
    .nullable()
    .into_node();
    let root = object(vec![Field::new("pet", dog)]).into_node();

    assert_eq!(
        resolve_static(root, r#"{"pet":{"__typename":"Cat","name":"Mietzie"}}"#).await,
        r#"{"data":{"pet":null}}"#
    );
}

#[tokio::test]
async fn skipped_list_items_are_left_out() {
    let dog = Object::new(vec![FieldSet::new(vec![Field::new(
        "woof",
        Node::string(&["woof"]),
    )])
    .on_type_names(&["Dog"])])
    .into_node();
    let root = object(vec![Field::new(
        "pets",
        Array::new(&["pets"], dog).into_node(),
    )])
    .into_node();

    assert_eq!(
        resolve_static(
            root,
            r#"{"pets":[{"__typename":"Dog","woof":"yes"},{"__typename":"Cat"}]}"#
        )
        .await,
        r#"{"data":{"pets":[{"woof":"yes"}]}}"#
    );
}

#[tokio::test]
async fn type_names_are_renamed() {
    let root = object(vec![Field::new(
        "__typename",
        Node::String(StringNode {
            path: vec!["__typename".to_string()],
            is_type_name: true,
            ..Default::default()
        }),
    )])
    .into_node();
    let ctx = Context::new().with_rename_type_names(vec![RenameTypeName {
        from: "Dog_v1".to_string(),
        to: "Dog".to_string(),
    }]);

    assert_eq!(
        resolve(&Resolver::default(), &ctx, root, r#"{"__typename":"Dog_v1"}"#).await,
        r#"{"data":{"__typename":"Dog"}}"#
    );
}

#[tokio::test]
async fn skip_and_include_directives_omit_fields() {
    let ctx = Context::new()
        .with_variables(br#"{"skip":true,"include":false}"#)
        .unwrap();
    let hidden = object(vec![
        Field::new("a", Node::string(&["a"])).skip_if("skip"),
        Field::new("b", Node::string(&["b"])).include_if("include"),
    ])
    .with_path(&["hidden"])
    .into_node();
    let root = object(vec![
        Field::new("a", Node::string(&["a"])).skip_if("skip"),
        Field::new("b", Node::string(&["b"])).include_if("include"),
        Field::new("c", Node::string(&["c"])).include_if("missing"),
        Field::new("d", Node::string(&["d"])),
        Field::new("hidden", hidden),
    ])
    .into_node();

    assert_eq!(
        resolve(
            &Resolver::default(),
            &ctx,
            root,
            r#"{"a":"1","b":"2","c":"3","d":"4","hidden":{"a":"1","b":"2"}}"#
        )
        .await,
        r#"{"data":{"d":"4","hidden":{}}}"#
    );
}

#[tokio::test]
async fn json_strings_are_unescaped() {
    let payload = Object {
        path: vec!["payload".to_string()],
        unescape_response_json: true,
        ..object(vec![Field::new("a", Node::integer(&["a"]))])
    }
    .into_node();
    let raw = Node::String(StringNode {
        path: vec!["raw".to_string()],
        unescape_response_json: true,
        ..Default::default()
    });
    let root = object(vec![Field::new("payload", payload), Field::new("raw", raw)]).into_node();

    assert_eq!(
        resolve_static(root, r#"{"payload":"{\"a\":1}","raw":"[1,2]"}"#).await,
        r#"{"data":{"payload":{"a":1},"raw":[1,2]}}"#
    );
}

#[tokio::test]
async fn fetched_buffers_feed_field_sets() {
    let source = StaticSource::new(r#"{"data":{"me":{"name":"Ada"}}}"#);
    let me = object(vec![Field::new("name", Node::string(&["name"]))])
        .with_path(&["me"])
        .into_node();
    let root = Object::new(vec![FieldSet::new(vec![Field::new("me", me)]).with_buffer(0)])
        .with_fetch(graphql_fetch(0, r#"{"query":"{me{name}}"}"#, source.clone()))
        .into_node();

    let output = Resolver::default()
        .resolve_graphql_response(&Context::new(), &GraphQLResponse::new(root), None)
        .await
        .unwrap();

    assert_eq!(text(output), r#"{"data":{"me":{"name":"Ada"}}}"#);
    assert_eq!(source.calls(), 1);
    assert_eq!(source.inputs(), vec![r#"{"query":"{me{name}}"}"#.to_string()]);
}

fn users_plan(root_source: Arc<dyn DataSource>, user_fetch: Fetch, asynchronous: bool) -> Node {
    let user = Object::new(vec![
        FieldSet::new(vec![Field::new("name", Node::string(&["name"]))]).with_buffer(1),
    ])
    .with_fetch(user_fetch)
    .nullable();
    let mut users = Array::new(&["users"], user.into_node());
    users.resolve_asynchronously = asynchronous;

    Object::new(vec![
        FieldSet::new(vec![Field::new("users", users.into_node())]).with_buffer(0),
    ])
    .with_fetch(graphql_fetch(0, "{}", root_source))
    .into_node()
}

const USERS: &str = r#"{"data":{"users":[{"id":"1"},{"id":"1"},{"id":"2"}]}}"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn loader_fetches_each_distinct_input_once() {
    for asynchronous in [false, true] {
        let users = StaticSource::new(USERS);
        let names = MapSource::new(&[
            (r#"{"id":"1"}"#, r#"{"data":{"name":"Ann"}}"#),
            (r#"{"id":"2"}"#, r#"{"data":{"name":"Bob"}}"#),
        ]);
        let user_fetch = Fetch::Single(
            SingleFetch::new(1, by_id_input(), names.clone())
                .with_process_response_config(ProcessResponseConfig::graphql()),
        );
        let root = users_plan(users.clone(), user_fetch, asynchronous);

        let output = Resolver::default()
            .resolve_graphql_response(&Context::new(), &GraphQLResponse::new(root), None)
            .await
            .unwrap();

        assert_eq!(
            text(output),
            r#"{"data":{"users":[{"name":"Ann"},{"name":"Ann"},{"name":"Bob"}]}}"#
        );
        assert_eq!(users.calls(), 1);
        assert_eq!(names.calls(), 2);
    }
}

#[tokio::test]
async fn without_loader_every_object_fetches() {
    let users = StaticSource::new(USERS);
    let names = MapSource::new(&[
        (r#"{"id":"1"}"#, r#"{"data":{"name":"Ann"}}"#),
        (r#"{"id":"2"}"#, r#"{"data":{"name":"Bob"}}"#),
    ]);
    let user_fetch = Fetch::Single(
        SingleFetch::new(1, by_id_input(), names.clone())
            .with_process_response_config(ProcessResponseConfig::graphql()),
    );
    let root = users_plan(users, user_fetch, false);

    let mut config = ResolverConfig::default();
    config.data_loader.enabled = false;
    let output = Resolver::new(config)
        .resolve_graphql_response(&Context::new(), &GraphQLResponse::new(root), None)
        .await
        .unwrap();

    assert_eq!(
        text(output),
        r#"{"data":{"users":[{"name":"Ann"},{"name":"Ann"},{"name":"Bob"}]}}"#
    );
    assert_eq!(names.calls(), 3);
}

fn names() -> Arc<MapSource> {
    MapSource::new(&[
        (r#"{"id":"1"}"#, r#"{"data":{"name":"Ann"}}"#),
        (r#"{"id":"2"}"#, r#"{"data":{"name":"Bob"}}"#),
        (r#"{"id":"3"}"#, r#"{"data":{"name":"Cid"}}"#),
    ])
}

fn name_fetch(source: Arc<dyn DataSource>) -> Fetch {
    Fetch::Single(
        SingleFetch::new(1, by_id_input(), source)
            .with_process_response_config(ProcessResponseConfig::graphql()),
    )
}

/// An object at `path` reading `name` from its own fetch on buffer 1.
fn named(path: &str, fetch: Fetch) -> Node {
    Object::new(vec![
        FieldSet::new(vec![Field::new("name", Node::string(&["name"]))]).with_buffer(1),
    ])
    .with_path(&[path])
    .with_fetch(fetch)
    .into_node()
}

#[tokio::test]
async fn sibling_fetches_sharing_a_buffer_id_keep_their_own_data() {
    let a = StaticSource::new(r#"{"data":{"name":"A"}}"#);
    let b = StaticSource::new(r#"{"data":{"name":"B"}}"#);
    let root = object(vec![
        Field::new("a", named("a", graphql_fetch(1, "{}", a.clone()))),
        Field::new("b", named("b", graphql_fetch(1, "{}", b.clone()))),
    ])
    .into_node();

    assert_eq!(
        resolve_static(root, r#"{"a":{},"b":{}}"#).await,
        r#"{"data":{"a":{"name":"A"},"b":{"name":"B"}}}"#
    );
    assert_eq!((a.calls(), b.calls()), (1, 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn buffer_id_reused_at_another_level_is_loaded_separately() {
    let root_source =
        StaticSource::new(r#"{"data":{"me":{"id":"2"},"users":[{"id":"1"},{"id":"3"}]}}"#);
    let names = names();
    let users = Array::new(&["users"], named_item(name_fetch(names.clone())))
        .asynchronous()
        .into_node();
    let root = Object::new(vec![FieldSet::new(vec![
        Field::new("me", named("me", name_fetch(names.clone()))),
        Field::new("users", users),
    ])
    .with_buffer(0)])
    .with_fetch(graphql_fetch(0, "{}", root_source))
    .into_node();

    assert_eq!(
        resolve_static(root, "{}").await,
        r#"{"data":{"me":{"name":"Bob"},"users":[{"name":"Ann"},{"name":"Cid"}]}}"#
    );
    assert_eq!(names.calls(), 3);
}

/// A list item reading `name` from its own fetch on buffer 1.
fn named_item(fetch: Fetch) -> Node {
    Object::new(vec![
        FieldSet::new(vec![Field::new("name", Node::string(&["name"]))]).with_buffer(1),
    ])
    .with_fetch(fetch)
    .into_node()
}

#[tokio::test]
async fn fetches_below_unescaped_json_bypass_the_loader() {
    let names = names();
    let json = Object {
        path: vec!["json".to_string()],
        unescape_response_json: true,
        ..object(vec![Field::new("user", named("user", name_fetch(names.clone())))])
    }
    .into_node();
    let root = object(vec![Field::new("json", json)]).into_node();

    assert_eq!(
        resolve_static(root, r#"{"json":"{\"user\":{\"id\":\"1\"}}"}"#).await,
        r#"{"data":{"json":{"user":{"name":"Ann"}}}}"#
    );
    assert_eq!(names.calls(), 1);
}

#[tokio::test]
async fn failing_parallel_member_only_nulls_its_own_fields() {
    let root = Object::new(vec![
        FieldSet::new(vec![Field::new("a", Node::string(&["a"]))]).with_buffer(1),
        FieldSet::new(vec![Field::new("b", Node::string(&["b"]).nullable())]).with_buffer(2),
    ])
    .with_fetch(Fetch::Parallel(vec![
        graphql_fetch(1, "{}", StaticSource::new(r#"{"data":{"a":"A"}}"#)),
        graphql_fetch(2, "{}", Arc::new(FailingSource("boom"))),
    ]))
    .into_node();

    insta::assert_snapshot!(
        resolve_static(root, "{}").await,
        @r#"{"errors":[{"message":"failed to load from data source: boom","extensions":{"code":"DOWNSTREAM_SERVICE_ERROR"}}],"data":{"a":"A","b":null}}"#
    );
}

#[tokio::test]
async fn exported_fields_feed_later_fetches() {
    let source = StaticSource::new(r#"{"data":{"name":"Bob"}}"#);
    let input = InputTemplate::static_input(r#"{"id":"#)
        .push_variable(Variable::context(&["userId"], VariableRenderer::Json))
        .push_static(r#","n":"#)
        .push_variable(Variable::context(&["count"], VariableRenderer::Json))
        .push_static("}");
    let user = Object::new(vec![
        FieldSet::new(vec![Field::new("name", Node::string(&["name"]))]).with_buffer(1),
    ])
    .with_fetch(Fetch::Single(
        SingleFetch::new(1, input, source.clone())
            .with_process_response_config(ProcessResponseConfig::graphql()),
    ))
    .into_node();
    let me = object(vec![
        Field::new(
            "id",
            Node::string(&["id"]).exported(FieldExport::new(&["userId"])),
        ),
        Field::new(
            "count",
            Node::integer(&["count"]).exported(FieldExport::new(&["count"]).as_string()),
        ),
    ])
    .with_path(&["me"])
    .into_node();
    let root = object(vec![Field::new("me", me), Field::new("user", user)]).into_node();

    let ctx = Context::new().with_variables(br#"{"userId":"1"}"#).unwrap();
    assert_eq!(
        resolve(&Resolver::default(), &ctx, root, r#"{"me":{"id":"2","count":3}}"#).await,
        r#"{"data":{"me":{"id":"2","count":3},"user":{"name":"Bob"}}}"#
    );
    assert_eq!(source.inputs(), vec![r#"{"id":"2","n":"3"}"#.to_string()]);
}

#[tokio::test]
async fn custom_nodes_render_through_their_resolver() {
    let cents = Arc::new(Cents);
    let item = object(vec![Field::new("price", Node::custom(&["price"], cents.clone()))])
        .with_path(&["item"])
        .nullable()
        .into_node();
    let root = object(vec![
        Field::new("price", Node::custom(&["price"], cents.clone())),
        Field::new("discount", Node::custom(&["discount"], cents).nullable()),
        Field::new("item", item),
    ])
    .into_node();

    insta::assert_snapshot!(
        resolve_static(root, r#"{"price":1250,"item":{"price":"abc"}}"#).await,
        @r#"{"errors":[{"message":"failed to resolve value via custom resolver: not an amount","path":["item","price"]}],"data":{"price":"12.50","discount":null,"item":null}}"#
    );
}

fn entity_fetch(source: Arc<dyn DataSource>) -> Fetch {
    Fetch::Batch(BatchFetch {
        fetch: SingleFetch::new(1, by_id_input(), source)
            .with_process_response_config(ProcessResponseConfig::entities()),
        batch_factory: Arc::new(EntityBatchFactory::new(
            r#"{"representations":["#,
            "]}",
        )),
    })
}

#[tokio::test]
async fn batch_fetch_makes_one_call() {
    let entities = StaticSource::new(r#"{"data":{"_entities":[{"name":"Ann"},{"name":"Bob"}]}}"#);
    let root = users_plan(StaticSource::new(USERS), entity_fetch(entities.clone()), true);

    let output = Resolver::default()
        .resolve_graphql_response(&Context::new(), &GraphQLResponse::new(root), None)
        .await
        .unwrap();

    assert_eq!(
        text(output),
        r#"{"data":{"users":[{"name":"Ann"},{"name":"Ann"},{"name":"Bob"}]}}"#
    );
    assert_eq!(entities.calls(), 1);
    assert_eq!(
        entities.inputs(),
        vec![r#"{"representations":[{"id":"1"},{"id":"2"}]}"#.to_string()]
    );
}

#[tokio::test]
async fn batch_without_loader_sends_one_item_per_object() {
    let entities = StaticSource::new(r#"{"data":{"_entities":[{"name":"Ann"}]}}"#);
    let root = users_plan(StaticSource::new(USERS), entity_fetch(entities.clone()), false);

    let mut config = ResolverConfig::default();
    config.data_loader.enabled = false;
    let output = Resolver::new(config)
        .resolve_graphql_response(&Context::new(), &GraphQLResponse::new(root), None)
        .await
        .unwrap();

    assert_eq!(
        text(output),
        r#"{"data":{"users":[{"name":"Ann"},{"name":"Ann"},{"name":"Ann"}]}}"#
    );
    assert_eq!(entities.calls(), 3);
    assert_eq!(
        entities.inputs()[2],
        r#"{"representations":[{"id":"2"}]}"#.to_string()
    );
}

#[tokio::test]
async fn batch_with_wrong_cardinality_fails_every_item() {
    let entities = StaticSource::new(r#"{"data":{"_entities":[{"name":"Ann"}]}}"#);
    let root = users_plan(StaticSource::new(USERS), entity_fetch(entities), false);

    let output = Resolver::default()
        .resolve_graphql_response(&Context::new(), &GraphQLResponse::new(root), None)
        .await
        .unwrap();
    let output: serde_json::Value = serde_json::from_slice(&output).unwrap();

    assert_eq!(
        output["data"],
        serde_json::json!({"users": [null, null, null]})
    );
    let errors = output["errors"].as_array().unwrap();
    let cardinality = errors
        .iter()
        .filter(|e| {
            e["message"]
                .as_str()
                .unwrap()
                .contains("batched response returned 1 items, expected 2")
        })
        .count();
    assert_eq!(cardinality, 3);
    assert!(errors
        .iter()
        .any(|e| e["path"] == serde_json::json!(["users", 2, "name"])));
}

#[tokio::test]
async fn data_source_failures_become_errors() {
    let me = object(vec![Field::new("name", Node::string(&["name"]))])
        .with_path(&["me"])
        .nullable()
        .into_node();
    let root = Object::new(vec![FieldSet::new(vec![Field::new("me", me)]).with_buffer(0)])
        .with_fetch(graphql_fetch(0, "{}", Arc::new(FailingSource("boom"))))
        .into_node();

    let hook = Arc::new(RecordingHook::default());
    let ctx = Context::new().with_after_fetch_hook(hook.clone());

    insta::assert_snapshot!(
        resolve(&Resolver::default(), &ctx, root, "{}").await,
        @r#"{"errors":[{"message":"failed to load from data source: boom","extensions":{"code":"DOWNSTREAM_SERVICE_ERROR"}}],"data":{"me":null}}"#
    );
    assert_eq!(hook.errors.load(Ordering::SeqCst), 1);
    assert!(hook.after.lock().unwrap().is_empty());
}

#[tokio::test]
async fn graphql_errors_are_forwarded() {
    let me = object(vec![Field::new("name", Node::string(&["name"]))])
        .with_path(&["me"])
        .nullable()
        .into_node();
    let source = StaticSource::new(r#"{"errors":[{"message":"denied"}],"data":{"me":null}}"#);
    let root = Object::new(vec![FieldSet::new(vec![Field::new("me", me)]).with_buffer(0)])
        .with_fetch(graphql_fetch(0, "{}", source))
        .into_node();

    assert_eq!(
        resolve_static(root, "{}").await,
        r#"{"errors":[{"message":"denied"}],"data":{"me":null}}"#
    );
}

#[tokio::test]
async fn unknown_buffer_aborts_resolution() {
    let root = Object::new(vec![
        FieldSet::new(vec![Field::new("a", Node::string(&["a"]))]).with_buffer(5),
    ])
    .with_fetch(graphql_fetch(0, "{}", StaticSource::new(r#"{"data":{}}"#)))
    .into_node();

    let error = Resolver::default()
        .resolve_graphql_response(&Context::new(), &GraphQLResponse::new(root), None)
        .await
        .unwrap_err();
    assert!(matches!(error, ResolveError::UnknownBuffer(5)));
    assert_eq!(
        text(error.to_graphql_bytes()),
        r#"{"errors":[{"message":"field set references buffer 5 but no fetch produced it","extensions":{"code":"UNKNOWN_BUFFER"}}],"data":null}"#
    );
}

#[tokio::test]
async fn null_object_variable_skips_the_call() {
    let source = StaticSource::new(r#"{"data":{"name":"Ann"}}"#);
    let user = Object::new(vec![FieldSet::new(vec![Field::new(
        "name",
        Node::string(&["name"]).nullable(),
    )])
    .with_buffer(0)])
    .with_fetch(Fetch::Single(
        SingleFetch::new(0, by_id_input(), source.clone())
            .with_process_response_config(ProcessResponseConfig::graphql())
            .with_null_on_variable_null(),
    ))
    .into_node();

    assert_eq!(resolve_static(user, r#"{}"#).await, r#"{"data":{"name":null}}"#);
    assert_eq!(source.calls(), 0);
}

fn slow_plan(source: Arc<dyn DataSource>) -> Node {
    let me = object(vec![Field::new("name", Node::string(&["name"]))])
        .with_path(&["me"])
        .nullable()
        .into_node();
    Object::new(vec![FieldSet::new(vec![Field::new("me", me)]).with_buffer(0)])
        .with_fetch(graphql_fetch(0, "{}", source))
        .into_node()
}

#[tokio::test]
async fn fetches_time_out() {
    let source = StaticSource::delayed(r#"{"data":{"me":{"name":"Ada"}}}"#, Duration::from_millis(500));
    let mut config = ResolverConfig::default();
    config.fetch_timeout = Some(Duration::from_millis(20));

    let output = resolve(
        &Resolver::new(config),
        &Context::new(),
        slow_plan(source),
        "{}",
    )
    .await;

    assert_eq!(
        output,
        r#"{"errors":[{"message":"failed to load from data source: timed out after 20ms","extensions":{"code":"DOWNSTREAM_SERVICE_ERROR"}}],"data":{"me":null}}"#
    );
}

#[tokio::test]
async fn canceling_the_request_stops_pending_fetches() {
    let source = StaticSource::delayed(r#"{"data":{"me":{"name":"Ada"}}}"#, Duration::from_secs(5));
    let token = CancellationToken::new();
    let ctx = Context::new().with_cancellation_token(token.clone());
    let canceler = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
    };

    let resolver = Resolver::default();

    let (output, _) = tokio::join!(resolve(&resolver, &ctx, slow_plan(source), "{}"), canceler);
    assert_eq!(
        output,
        r#"{"errors":[{"message":"failed to load from data source: request was canceled","extensions":{"code":"DOWNSTREAM_SERVICE_ERROR"}}],"data":{"me":null}}"#
    );

    let error = resolver
        .resolve_graphql_response(&ctx, &GraphQLResponse::new(Node::EmptyObject), None)
        .await
        .unwrap_err();
    assert!(matches!(error, ResolveError::Canceled));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn identical_calls_in_flight_are_shared() {
    let source = StaticSource::delayed(r#"{"data":{"me":{"name":"Ada"}}}"#, Duration::from_millis(50));
    let resolver = Resolver::default();
    let hook = Arc::new(RecordingHook::default());
    let first_ctx = Context::new().with_after_fetch_hook(hook.clone());
    let second_ctx = Context::new().with_after_fetch_hook(hook.clone());

    let (first, second) = tokio::join!(
        resolve(&resolver, &first_ctx, slow_plan(source.clone()), "{}"),
        resolve(&resolver, &second_ctx, slow_plan(source.clone()), "{}"),
    );

    assert_eq!(first, r#"{"data":{"me":{"name":"Ada"}}}"#);
    assert_eq!(first, second);
    assert_eq!(source.calls(), 1);
    let mut shared: Vec<bool> = hook.after.lock().unwrap().iter().map(|(_, s)| *s).collect();
    shared.sort();
    assert_eq!(shared, vec![false, true]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_flight_can_be_disabled() {
    let source = StaticSource::delayed(r#"{"data":{"me":{"name":"Ada"}}}"#, Duration::from_millis(50));
    let mut config = ResolverConfig::default();
    config.dedupe.enabled = false;
    let resolver = Resolver::new(config);
    let ctx = Context::new();

    tokio::join!(
        resolve(&resolver, &ctx, slow_plan(source.clone()), "{}"),
        resolve(&resolver, &ctx, slow_plan(source.clone()), "{}"),
    );
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn hooks_see_the_fetch_path_and_panics_are_contained() {
    let source = StaticSource::new(USERS);
    let names = MapSource::new(&[
        (r#"{"id":"1"}"#, r#"{"data":{"name":"Ann"}}"#),
        (r#"{"id":"2"}"#, r#"{"data":{"name":"Bob"}}"#),
    ]);
    let user_fetch = Fetch::Single(
        SingleFetch::new(1, by_id_input(), names)
            .with_process_response_config(ProcessResponseConfig::graphql())
            .without_data_loader(),
    );
    let hook = Arc::new(RecordingHook::default());
    let ctx = Context::new().with_before_fetch_hook(hook.clone());
    let output = resolve(
        &Resolver::default(),
        &ctx,
        users_plan(source.clone(), user_fetch.clone(), false),
        "{}",
    )
    .await;
    assert!(output.starts_with(r#"{"data":{"users":[{"name":"Ann"}"#));

    let before = hook.before.lock().unwrap().clone();
    assert_eq!(before.len(), 4);
    assert_eq!(before[0], ("/data".to_string(), "{}".to_string()));
    assert_eq!(
        before[3],
        ("/data/users/2".to_string(), r#"{"id":"2"}"#.to_string())
    );

    let ctx = Context::new().with_before_fetch_hook(Arc::new(PanickingHook));
    let output = resolve(
        &Resolver::default(),
        &ctx,
        users_plan(source, user_fetch, false),
        "{}",
    )
    .await;
    assert_eq!(
        output,
        r#"{"data":{"users":[{"name":"Ann"},{"name":"Ann"},{"name":"Bob"}]}}"#
    );
}

async fn collect(mut receiver: mpsc::Receiver<Bytes>) -> Vec<String> {
    let mut documents = Vec::new();
    while let Some(document) = receiver.recv().await {
        documents.push(text(document));
    }
    documents
}

async fn stream(resolver: &Resolver, plan: Plan, data: &'static str) -> Vec<String> {
    let Plan::Streaming(response) = plan else {
        panic!("expected a streaming plan");
    };
    let (sender, receiver) = mpsc::channel(16);
    resolver
        .resolve_streaming_response(
            &Context::new(),
            &response,
            Some(Bytes::from_static(data.as_bytes())),
            &sender,
        )
        .await
        .unwrap();
    drop(sender);
    collect(receiver).await
}

#[tokio::test]
async fn deferred_fields_arrive_as_replace_patches() {
    let root = object(vec![
        Field::new("name", Node::string(&["name"])),
        Field::new("bio", Node::string(&["bio"])).deferred(),
    ])
    .into_node();
    let plan = postprocess::process(Plan::Synchronous(GraphQLResponse::new(root)));

    let documents = stream(&Resolver::default(), plan, r#"{"name":"Ada","bio":"hi"}"#).await;
    assert_eq!(
        documents,
        vec![
            r#"{"data":{"name":"Ada","bio":null}}"#.to_string(),
            r#"[{"op":"replace","path":"/data/bio","value":"hi"}]"#.to_string(),
        ]
    );
}

#[tokio::test]
async fn deferred_fetch_runs_with_the_patch() {
    let ids = StaticSource::new(r#"{"data":{"id":"1"}}"#);
    let bios = StaticSource::new(r#"{"data":{"bio":"hello"}}"#);
    let root = Object::new(vec![
        FieldSet::new(vec![Field::new("id", Node::string(&["id"]))]).with_buffer(1),
        FieldSet::new(vec![Field::new("bio", Node::string(&["bio"])).deferred()]).with_buffer(2),
    ])
    .with_fetch(Fetch::Parallel(vec![
        graphql_fetch(1, r#"{"q":"id"}"#, ids.clone()),
        graphql_fetch(2, r#"{"q":"bio"}"#, bios.clone()),
    ]))
    .into_node();
    let plan = postprocess::process(Plan::Synchronous(GraphQLResponse::new(root)));

    let documents = stream(&Resolver::default(), plan, "{}").await;
    assert_eq!(
        documents,
        vec![
            r#"{"data":{"id":"1","bio":null}}"#.to_string(),
            r#"[{"op":"replace","path":"/data/bio","value":"hello"}]"#.to_string(),
        ]
    );
    assert_eq!(ids.calls(), 1);
    assert_eq!(bios.calls(), 1);
}

fn streamed_names(initial_batch_size: usize) -> Plan {
    let root = object(vec![Field::new(
        "names",
        Array::new(&["names"], Node::string(&[])).into_node(),
    )
    .streamed(initial_batch_size)])
    .into_node();
    postprocess::process(Plan::Synchronous(GraphQLResponse::new(root)))
}

#[tokio::test]
async fn streamed_items_arrive_as_add_patches() {
    let documents = stream(
        &Resolver::default(),
        streamed_names(1),
        r#"{"names":["a","b","c"]}"#,
    )
    .await;
    assert_eq!(
        documents,
        vec![
            r#"{"data":{"names":["a"]}}"#.to_string(),
            r#"[{"op":"add","path":"/data/names/1","value":"b"}]"#.to_string(),
            r#"[{"op":"add","path":"/data/names/2","value":"c"}]"#.to_string(),
        ]
    );

    let documents = stream(
        &Resolver::default(),
        streamed_names(0),
        r#"{"names":["a","b"]}"#,
    )
    .await;
    assert_eq!(documents[0], r#"{"data":{"names":[]}}"#);
    assert_eq!(documents.len(), 3);
}

#[tokio::test]
async fn loader_leaves_streamed_items_to_their_patches() {
    let root_source =
        StaticSource::new(r#"{"data":{"users":[{"id":"1"},{"id":"2"},{"id":"3"}]}}"#);
    let names = names();
    let users = Array::new(&["users"], named_item(name_fetch(names.clone()))).into_node();
    let root = Object::new(vec![
        FieldSet::new(vec![Field::new("users", users).streamed(1)]).with_buffer(0),
    ])
    .with_fetch(graphql_fetch(0, "{}", root_source))
    .into_node();
    let plan = postprocess::process(Plan::Synchronous(GraphQLResponse::new(root)));

    let documents = stream(&Resolver::default(), plan, "{}").await;
    assert_eq!(
        documents,
        vec![
            r#"{"data":{"users":[{"name":"Ann"}]}}"#.to_string(),
            r#"[{"op":"add","path":"/data/users/1","value":{"name":"Bob"}}]"#.to_string(),
            r#"[{"op":"add","path":"/data/users/2","value":{"name":"Cid"}}]"#.to_string(),
        ]
    );
    assert_eq!(names.calls(), 3);
}

#[tokio::test]
async fn patches_are_batched_within_the_flush_interval() {
    let mut config = ResolverConfig::default();
    config.streaming.flush_interval = Duration::from_secs(3600);

    let documents = stream(
        &Resolver::new(config),
        streamed_names(0),
        r#"{"names":["a","b"]}"#,
    )
    .await;
    assert_eq!(
        documents,
        vec![
            r#"{"data":{"names":[]}}"#.to_string(),
            r#"[{"op":"add","path":"/data/names/0","value":"a"},{"op":"add","path":"/data/names/1","value":"b"}]"#.to_string(),
        ]
    );
}

#[tokio::test]
async fn unknown_patch_aborts_streaming() {
    let root = object(vec![Field::new(
        "later",
        Node::Null(Null {
            defer: Some(DeferMarker { patch_index: 5 }),
        }),
    )])
    .into_node();
    let response = GraphQLStreamingResponse {
        initial_response: GraphQLResponse::new(root),
        patches: Vec::new(),
        flush_interval: None,
    };
    let (sender, _receiver) = mpsc::channel(4);

    let error = Resolver::default()
        .resolve_streaming_response(&Context::new(), &response, None, &sender)
        .await
        .unwrap_err();
    assert!(matches!(error, ResolveError::MissingPatch(5)));
}

fn counter_subscription(source: Arc<dyn crate::connector::SubscriptionDataSource>) -> GraphQLSubscription {
    GraphQLSubscription {
        trigger: SubscriptionTrigger {
            input: InputTemplate::static_input(r#"{"query":"subscription{count}"}"#),
            source,
            process_response_config: ProcessResponseConfig::graphql(),
        },
        response: GraphQLResponse::new(
            object(vec![Field::new("count", Node::integer(&["count"]))]).into_node(),
        ),
    }
}

#[tokio::test]
async fn subscription_sends_a_document_per_event() {
    let source = EventSource::new(
        &[r#"{"data":{"count":1}}"#, r#"{"data":{"count":2}}"#],
        false,
    );
    let (sender, receiver) = mpsc::channel(16);

    Resolver::default()
        .resolve_subscription(&Context::new(), &counter_subscription(source.clone()), &sender)
        .await
        .unwrap();
    drop(sender);

    assert_eq!(
        collect(receiver).await,
        vec![
            r#"{"data":{"count":1}}"#.to_string(),
            r#"{"data":{"count":2}}"#.to_string(),
        ]
    );
    assert!(source.was_canceled());
}

#[tokio::test]
async fn shutdown_ends_subscriptions() {
    let source = EventSource::new(&[r#"{"data":{"count":1}}"#], true);
    let resolver = Resolver::default();
    let ctx = Context::new();
    let (sender, mut receiver) = mpsc::channel(16);
    let subscription = counter_subscription(source.clone());

    let (result, first) = tokio::join!(
        resolver.resolve_subscription(&ctx, &subscription, &sender),
        async {
            let first = receiver.recv().await;
            resolver.shutdown();
            first
        }
    );

    assert!(result.is_ok());
    assert_eq!(first.map(text), Some(r#"{"data":{"count":1}}"#.to_string()));
    assert!(resolver.is_shut_down());
    assert!(source.was_canceled());
}

#[tokio::test]
async fn subscription_failures_are_reported() {
    let (sender, _receiver) = mpsc::channel(4);
    let error = Resolver::default()
        .resolve_subscription(
            &Context::new(),
            &counter_subscription(Arc::new(FailingSubscription)),
            &sender,
        )
        .await
        .unwrap_err();
    assert!(matches!(error, ResolveError::Subscription(_)));

    let (sender, receiver) = mpsc::channel(4);
    drop(receiver);
    let source = EventSource::new(&[r#"{"data":{"count":1}}"#], true);
    let error = Resolver::default()
        .resolve_subscription(&Context::new(), &counter_subscription(source), &sender)
        .await
        .unwrap_err();
    assert!(matches!(error, ResolveError::ChannelClosed));
}
