//! Tests against the bundled example configuration.

use api_load_test::{RequestBody, TestConfig, TestPlan};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

fn example_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("configs/shop.yaml")
}

#[test]
fn test_example_config_compiles() {
    let config = TestConfig::from_file(example_path()).unwrap();
    config.validate().unwrap();
    TestPlan::compile(&config).unwrap();

    for name in config.scenarios.keys() {
        let scenario = config.with_scenario(name).unwrap();
        scenario.validate().unwrap();
        TestPlan::compile(&scenario).unwrap();
    }
    assert_eq!(config.with_scenario("smoke_test").unwrap().total_requests(), 10);
}

#[test]
fn test_example_order_body() {
    let config = TestConfig::from_file(example_path()).unwrap();
    let plan = TestPlan::compile(&config).unwrap();
    let endpoint = plan
        .endpoints
        .iter()
        .find(|e| e.name == "Create Order")
        .unwrap();

    let mut rng = StdRng::seed_from_u64(11);
    let request = endpoint.materialize(&plan.registry, &mut rng).unwrap();
    assert_eq!(request.path, "/api/v1/orders");

    let Some(RequestBody::Json(body)) = request.body else {
        panic!("expected JSON body");
    };
    let reference = body["reference"].as_str().unwrap();
    assert!(reference.starts_with("ORD-") && reference.len() == 12);
    assert!(body["customer"]["id"].is_i64());
    assert!(body["email"].as_str().unwrap().contains('@'));
    assert!(body["items"][1]["gift"].is_boolean());
    assert!(body["vip"].is_boolean());
    assert_eq!(body["customer_since"].as_str().unwrap().len(), 10);
    assert!((0..=500).contains(&body["warehouse_stock"].as_i64().unwrap()));

    let price = body["items"][0]["price"].as_i64().unwrap();
    assert!((1000..=50000).contains(&price) && price % 50 == 0);
}

#[test]
fn test_example_search_params() {
    let config = TestConfig::from_file(example_path()).unwrap();
    let plan = TestPlan::compile(&config).unwrap();
    let endpoint = plan
        .endpoints
        .iter()
        .find(|e| e.name == "Search Items")
        .unwrap();

    let request = endpoint
        .materialize(&plan.registry, &mut StdRng::seed_from_u64(3))
        .unwrap();
    let param = |key: &str| {
        request
            .query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    };
    assert_eq!(param("limit"), Some("40"));
    assert_eq!(param("max_price"), Some("500"));
}
