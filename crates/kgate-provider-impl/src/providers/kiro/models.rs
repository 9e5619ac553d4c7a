use std::collections::HashMap;
use std::sync::OnceLock;

/// Upstream id used for any model the table does not know.
pub const DEFAULT_MODEL_ID: &str = "CLAUDE_SONNET_4_5_20250929_V1_0";

const MODEL_TABLE: &[(&str, &str)] = &[
    ("claude-sonnet-4-5", "CLAUDE_SONNET_4_5_20250929_V1_0"),
    ("claude-sonnet-4-5-20250929", "CLAUDE_SONNET_4_5_20250929_V1_0"),
    ("claude-sonnet-4-20250514", "CLAUDE_SONNET_4_20250514_V1_0"),
    ("amazonq-claude-sonnet-4-20250514", "CLAUDE_SONNET_4_20250514_V1_0"),
    ("claude-3-7-sonnet-20250219", "CLAUDE_3_7_SONNET_20250219_V1_0"),
    ("amazonq-claude-3-7-sonnet-20250219", "CLAUDE_3_7_SONNET_20250219_V1_0"),
    ("claude-opus-4-5", "claude-opus-4.5"),
    ("claude-haiku-4-5", "claude-haiku-4.5"),
];

fn model_map() -> &'static HashMap<&'static str, &'static str> {
    static MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    MAP.get_or_init(|| MODEL_TABLE.iter().copied().collect())
}

/// Maps a public model id to the upstream enum. Unknown ids fall back to
/// [`DEFAULT_MODEL_ID`].
pub fn map_model(model: &str) -> &'static str {
    model_map()
        .get(model.trim())
        .copied()
        .unwrap_or(DEFAULT_MODEL_ID)
}

/// Public model ids, in table order.
pub fn public_models() -> Vec<String> {
    MODEL_TABLE.iter().map(|(id, _)| id.to_string()).collect()
}
