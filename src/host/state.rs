//! The XML container the wrapper persists: the hosted plugin's path and its
//! own opaque state, base64 encoded.
//!
//! ```xml
//! <state><plugin_path>/path/Foo.vst3</plugin_path><inner_state>AAEC</inner_state></state>
//! ```

use base64::{engine::general_purpose, Engine as _};
use roxmltree::Document;

use crate::error::StateError;

pub const ROOT_TAG: &str = "state";
pub const PLUGIN_PATH_TAG: &str = "plugin_path";
pub const INNER_STATE_TAG: &str = "inner_state";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostedState {
    pub plugin_path: String,
    pub inner_state: Vec<u8>,
}

impl HostedState {
    pub fn to_xml(&self) -> String {
        let encoded = general_purpose::STANDARD.encode(&self.inner_state);
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<{ROOT_TAG}><{PLUGIN_PATH_TAG}>{}</{PLUGIN_PATH_TAG}><{INNER_STATE_TAG}>{}</{INNER_STATE_TAG}></{ROOT_TAG}>\n",
            escape_xml(&self.plugin_path),
            encoded
        )
    }

    /// `Ok(None)` when the document carries no plugin path, which restores
    /// nothing. An `inner_state` that is not valid base64 is treated as empty.
    pub fn from_xml(data: &[u8]) -> Result<Option<Self>, StateError> {
        let end = data
            .iter()
            .rposition(|&b| b != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        let text = std::str::from_utf8(&data[..end])?;
        let doc = Document::parse(text)?;

        let Some(plugin_path) = child_text(&doc, PLUGIN_PATH_TAG) else {
            return Ok(None);
        };

        let inner_state = match child_text(&doc, INNER_STATE_TAG) {
            Some(encoded) => general_purpose::STANDARD
                .decode(encoded.trim())
                .unwrap_or_else(|e| {
                    log::warn!("Ignoring undecodable hosted plugin state: {}", e);
                    Vec::new()
                }),
            None => Vec::new(),
        };

        Ok(Some(Self {
            plugin_path,
            inner_state,
        }))
    }
}

fn child_text(doc: &Document<'_>, name: &str) -> Option<String> {
    let node = doc
        .root_element()
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == name)?;
    Some(node.text().unwrap_or_default().to_string())
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}
