//! Stdio mode end to end: NDJSON in, one JSON array out.

use proptest::prelude::*;
use serde_json::{json, Value};
use std::path::Path;
use tempfile::TempDir;

use cursor_stream::server::{stream_ndjson, LineMode};
use cursor_stream::{BridgeConfig, BridgeError, Completion};

fn ndjson(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for value in values {
        out.extend_from_slice(value.to_string().as_bytes());
        out.push(b'\n');
    }
    out
}

async fn run(
    input: Vec<u8>,
    output: &Path,
    config: &BridgeConfig,
    mode: LineMode,
) -> anyhow::Result<Completion> {
    let writer = tokio::fs::File::create(output).await?;
    stream_ndjson(std::io::Cursor::new(input), writer, config, mode).await
}

fn config(batch_size: usize) -> BridgeConfig {
    BridgeConfig {
        batch_size,
        ..BridgeConfig::default()
    }
}

#[tokio::test]
async fn test_stream_round_trips_values() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out.json");
    let values = vec![
        json!({"id": 1, "name": "alpha"}),
        json!([1, 2, 3]),
        json!(null),
        json!("tail"),
    ];

    let completion = run(ndjson(&values), &out, &config(3), LineMode::Parse)
        .await
        .unwrap();
    assert!(completion.is_finished());
    assert_eq!(completion.summary().items, 4);

    let written = std::fs::read_to_string(&out).unwrap();
    let parsed: Vec<Value> = serde_json::from_str(&written).unwrap();
    assert_eq!(parsed, values);
}

#[tokio::test]
async fn test_empty_input_writes_empty_array() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let out = dir.path().join("out.json");

    run(b"\n\n".to_vec(), &out, &config(4), LineMode::Parse).await?;
    assert_eq!(std::fs::read_to_string(&out)?, "[]");
    Ok(())
}

#[tokio::test]
async fn test_malformed_line_truncates_output() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out.json");
    let input = b"1\n2\n3\n{not json\n5\n".to_vec();

    let err = run(input, &out, &config(2), LineMode::Parse)
        .await
        .unwrap_err();
    let bridge_err = err.downcast_ref::<BridgeError>().expect("bridge error");
    assert!(matches!(bridge_err, BridgeError::Upstream(_)));
    assert!(err.to_string().contains("line 4"));

    let written = std::fs::read_to_string(&out).unwrap();
    assert!(!written.ends_with(']'), "array must stay open: {}", written);
    assert!(serde_json::from_str::<Vec<Value>>(&written).is_err());
}

#[tokio::test]
async fn test_raw_mode_keeps_line_text() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let out = dir.path().join("out.json");
    let input = b"{\"a\" : 1}\n  [2,  3]  \n".to_vec();

    run(input, &out, &config(16), LineMode::Raw).await?;
    assert_eq!(std::fs::read_to_string(&out)?, "[{\"a\" : 1},[2,  3]]");
    Ok(())
}

#[tokio::test]
async fn test_raw_mode_malformed_line_truncates_output() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out.json");
    let input = b"1\n{not json\n3\n".to_vec();

    let err = run(input, &out, &config(16), LineMode::Raw)
        .await
        .unwrap_err();
    let bridge_err = err.downcast_ref::<BridgeError>().expect("bridge error");
    assert!(matches!(bridge_err, BridgeError::Upstream(_)));
    assert!(err.to_string().contains("line 2"));

    let written = std::fs::read_to_string(&out).unwrap();
    assert!(!written.contains("not json"), "invalid line leaked: {}", written);
    assert!(!written.ends_with(']'), "array must stay open: {}", written);
}

#[tokio::test]
async fn test_pretty_output() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out.json");
    let cfg = BridgeConfig {
        batch_size: 1,
        pretty_print_newlines: true,
        ..BridgeConfig::default()
    };

    run(ndjson(&[json!(1), json!(2)]), &out, &cfg, LineMode::Parse)
        .await
        .unwrap();
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "[\n1,\n2\n]\n");
}

#[tokio::test]
async fn test_close_after_still_flushes() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out.json");
    let cfg = BridgeConfig {
        batch_size: 2,
        close_connection_after: true,
        ..BridgeConfig::default()
    };

    run(ndjson(&[json!("x"), json!("y"), json!("z")]), &out, &cfg, LineMode::Parse)
        .await
        .unwrap();
    assert_eq!(
        std::fs::read_to_string(&out).unwrap(),
        r#"["x","y","z"]"#
    );
}

fn json_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[a-z0-9 ]{0,12}".prop_map(Value::from),
        (any::<u16>(), "[a-z]{1,6}").prop_map(|(n, s)| json!({ "n": n, "s": s })),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_output_preserves_items_in_order(
        values in prop::collection::vec(json_value(), 0..60),
        batch_size in 1usize..9,
        pretty in any::<bool>(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.json");
        let cfg = BridgeConfig {
            batch_size,
            pretty_print_newlines: pretty,
            ..BridgeConfig::default()
        };

        let completion = rt
            .block_on(run(ndjson(&values), &out, &cfg, LineMode::Parse))
            .unwrap();
        prop_assert!(completion.is_finished());
        prop_assert_eq!(completion.summary().items, values.len() as u64);

        let written = std::fs::read_to_string(&out).unwrap();
        let parsed: Vec<Value> = serde_json::from_str(&written).unwrap();
        prop_assert_eq!(parsed, values);
    }
}
