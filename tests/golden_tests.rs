//! Golden tests - fixture-based tests that lock expected behavior
//!
//! Tool names are part of the wire contract: a client that learned
//! `get_widget_count` must keep finding it. Any change in the mapping will
//! cause these tests to fail.
//!
//! Run with: cargo test --test golden_tests

use serde::Deserialize;
use std::fs;

// ============================================================================
// TOOL NAME GOLDEN TESTS
// ============================================================================

mod tool_name_golden {
    use super::*;
    use hostbridge::mcp::to_snake_case;

    #[derive(Debug, Deserialize)]
    struct TestCase {
        name: String,
        input: String,
        expected: String,
    }

    #[derive(Debug, Deserialize)]
    struct Fixture {
        test_cases: Vec<TestCase>,
    }

    fn load() -> Fixture {
        let fixture_path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/tool_names.json");
        let content =
            fs::read_to_string(fixture_path).expect("Failed to read tool_names.json fixture");
        serde_json::from_str(&content).expect("Failed to parse fixture JSON")
    }

    #[test]
    fn test_tool_name_golden() {
        for case in load().test_cases {
            assert_eq!(
                to_snake_case(&case.input),
                case.expected,
                "Test case '{}' failed for input '{}'",
                case.name,
                case.input
            );
        }
    }

    #[test]
    fn test_golden_outputs_are_fixed_points() {
        for case in load().test_cases {
            assert_eq!(
                to_snake_case(&case.expected),
                case.expected,
                "Test case '{}' is not stable",
                case.name
            );
        }
    }
}

// ============================================================================
// WIRE SHAPE GOLDEN TESTS
// ============================================================================

mod wire_golden {
    use hostbridge::mcp::{CallToolResult, InitializeResult};
    use hostbridge::types::ServerIdentity;
    use serde_json::json;

    #[test]
    fn test_call_tool_result_shape() {
        let value = serde_json::to_value(CallToolResult::text("7")).unwrap();
        assert_eq!(
            value,
            json!({"content": [{"type": "text", "text": "7"}], "isError": false})
        );
    }

    #[test]
    fn test_initialize_result_shape() {
        let identity = ServerIdentity {
            name: "hostbridge".to_string(),
            version: "1.2.3".to_string(),
        };
        let value = serde_json::to_value(InitializeResult::for_identity(&identity)).unwrap();
        assert_eq!(value["protocolVersion"], "2024-11-05");
        assert_eq!(value["capabilities"]["tools"], json!({"listChanged": false}));
        assert_eq!(
            value["serverInfo"],
            json!({"name": "hostbridge", "version": "1.2.3"})
        );
    }
}
