//! End-to-end pipeline tests: wire envelope in, formatted body out.

use std::collections::HashMap;
use std::sync::Arc;

use gridway_rdbc::drivers::DriverRegistry;
use gridway_rdbc::registry::{DbConfig, DbSection};
use gridway_rdbc::testing::{MockConnectionFactory, MockScript};
use gridway_rdbc::types::{Row, SqlValue};
use gridway_server::format::{format_responses, JsonAffixes, RESPONSE_END, RESPONSE_START};
use gridway_server::envelope::{parse_ida, parse_rest};
use gridway_server::{
    RequestInput, ServerConfig, ServerContext, ServerObjectRegistry, TransactionCoordinator,
    Transport,
};
use serde_json::{json, Value};

async fn context(dir: &std::path::Path) -> (Arc<ServerContext>, Arc<MockScript>) {
    tokio::fs::write(
        dir.join("country.ds.xml"),
        r#"<DataSource ID="country" serverType="sql">
             <fields>
               <field name="id" type="sequence" primaryKey="true"/>
               <field name="name" type="text"/>
               <field name="continent" type="text"/>
             </fields>
           </DataSource>"#,
    )
    .await
    .unwrap();

    let factory = Arc::new(MockConnectionFactory::new());
    let script = factory.script();
    let mut drivers = DriverRegistry::new();
    drivers.register("mock", factory);

    let mut config = ServerConfig::default();
    config.data_source.path = dir.display().to_string();
    config.db = DbSection {
        default_database: Some("main".to_string()),
        databases: HashMap::from([(
            "main".to_string(),
            DbConfig {
                db_type: "mysql".to_string(),
                factory: "mock".to_string(),
                connection: Default::default(),
                pool: Default::default(),
            },
        )]),
    };

    (
        ServerContext::new(config, drivers, ServerObjectRegistry::new(), vec![]),
        script,
    )
}

fn ida_input(transaction: &str) -> RequestInput {
    RequestInput {
        method: "POST".into(),
        path: "/gridway/ida".into(),
        query: vec![
            ("isc_rpc".into(), "1".into()),
            ("isc_xhr".into(), "1".into()),
        ],
        body: format!(
            "_transaction={}",
            url::form_urlencoded::byte_serialize(transaction.as_bytes()).collect::<String>()
        ),
        content_type: Some("application/x-www-form-urlencoded".into()),
    }
}

#[tokio::test]
async fn test_ida_fetch_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, script) = context(dir.path()).await;
    script.push_query_result(vec![Row::from_pairs(vec![
        ("id".to_string(), SqlValue::Int64(1)),
        ("name".to_string(), SqlValue::String("Malta".into())),
        ("continent".to_string(), SqlValue::String("Europe".into())),
    ])]);

    let input = ida_input(
        r#"{"transactionNum": 3, "operations": [
            {"appID": "builtin", "operation": "country_fetch",
             "criteria": {"continent": "Europe"}, "startRow": 0, "endRow": 2}
        ]}"#,
    );
    let parsed = parse_ida(&input).unwrap();
    assert!(parsed.xhr);

    let format = parsed.data_format;
    let tx = parsed.transaction_num;
    let coordinator = TransactionCoordinator::new(ctx.clone());
    let responses = coordinator.run(parsed).await.unwrap();

    let formatted = format_responses(
        &responses,
        format,
        Transport::IdaXhr,
        &ctx.config,
        tx,
        None,
        &JsonAffixes::default(),
    );

    assert!(formatted.body.starts_with(RESPONSE_START));
    assert!(formatted.body.ends_with(RESPONSE_END));
    let inner =
        &formatted.body[RESPONSE_START.len()..formatted.body.len() - RESPONSE_END.len()];
    let decoded: Vec<Value> = serde_json::from_str(inner).unwrap();
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0]["status"], json!(0));
    assert_eq!(decoded[0]["startRow"], json!(0));
    assert_eq!(decoded[0]["endRow"], json!(1));
    assert_eq!(decoded[0]["totalRows"], json!(1));
    assert_eq!(decoded[0]["data"][0]["name"], json!("Malta"));

    // the criteria compiled to a parameterised predicate
    let (sql, params) = &script.statements()[1];
    assert!(sql.contains("WHERE (upper('' || continent) like upper(?) escape ?)"));
    assert_eq!(
        params,
        &vec![
            SqlValue::String("%Europe%".into()),
            SqlValue::String("~".into())
        ]
    );
    // mysql dialect paging
    assert!(sql.ends_with("LIMIT 2 OFFSET 0"));
}

#[tokio::test]
async fn test_rest_update_via_url_pk() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, script) = context(dir.path()).await;
    script.push_query_result(vec![Row::from_pairs(vec![
        ("id".to_string(), SqlValue::Int64(7)),
        ("name".to_string(), SqlValue::String("Malta".into())),
        ("continent".to_string(), SqlValue::String("Europe".into())),
    ])]);

    let input = RequestInput {
        method: "PUT".into(),
        path: "/gridway/rest/country/7".into(),
        query: vec![],
        body: r#"{"name": "Malta"}"#.into(),
        content_type: Some("application/json".into()),
    };
    let parsed = parse_rest(&input, &ctx.config).unwrap();
    let format = parsed.data_format;

    let coordinator = TransactionCoordinator::new(ctx.clone());
    let responses = coordinator.run(parsed).await.unwrap();

    let (sql, params) = &script.statements()[1];
    assert_eq!(sql, "UPDATE country SET name = ? WHERE id = ?");
    assert_eq!(
        params,
        &vec![SqlValue::String("Malta".into()), SqlValue::Int64(7)]
    );

    let formatted = format_responses(
        &responses,
        format,
        Transport::Rest,
        &ctx.config,
        None,
        None,
        &JsonAffixes::default(),
    );
    let decoded: Value = serde_json::from_str(&formatted.body).unwrap();
    assert_eq!(decoded["response"]["status"], json!(0));
    assert_eq!(decoded["response"]["data"][0]["id"], json!(7));
}

#[tokio::test]
async fn test_batch_slots_match_request_order() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, script) = context(dir.path()).await;
    // fetch result for op 1; op 2 update misses
    script.push_query_result(vec![]);
    script.push_execute_result(0);

    let input = ida_input(
        r#"{"operations": [
            {"appID": "a", "operation": "country_fetch"},
            {"appID": "a", "operation": "country_update",
             "criteria": {"id": 12}, "values": {"name": "x"}},
            "__ISC_NULL__"
        ]}"#,
    );
    let parsed = parse_ida(&input).unwrap();
    let coordinator = TransactionCoordinator::new(ctx.clone());
    let responses = coordinator.run(parsed).await.unwrap();

    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0].status().code(), 0);
    assert_eq!(responses[1].status().code(), -1);
    assert_eq!(responses[2].status().code(), 0);
    assert!(responses[1].to_json()["data"]
        .as_str()
        .unwrap()
        .starts_with("Row does not exists"));
}
