//! Unified tool catalog: the static browser tools plus published flows.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::broker::PeerClient;
use crate::channel::MessageKind;
use crate::config::TimeoutConfig;
use crate::error::Result;

use super::builtin::builtin_tools;
use super::flows::{parse_flow_listing, PublishedFlow};
use super::types::ToolDefinition;

/// Builds the tool listing on every request; nothing is cached, so newly
/// published flows show up on the next listing.
pub struct ToolCatalogService {
    peer: Arc<dyn PeerClient>,
    static_tools: Vec<ToolDefinition>,
    flow_list_timeout: Duration,
}

impl ToolCatalogService {
    pub fn new(peer: Arc<dyn PeerClient>, timeouts: &TimeoutConfig) -> Self {
        Self {
            peer,
            static_tools: builtin_tools(),
            flow_list_timeout: timeouts.flow_list(),
        }
    }

    /// Replace the static tool set.
    pub fn with_static_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.static_tools = tools;
        self
    }

    pub fn static_tools(&self) -> &[ToolDefinition] {
        &self.static_tools
    }

    /// Fetch the published flows from the peer. Errors propagate.
    pub async fn list_flows(&self) -> Result<Vec<PublishedFlow>> {
        let response = self
            .peer
            .request(
                serde_json::json!({}),
                MessageKind::ListPublishedFlows,
                self.flow_list_timeout,
            )
            .await?;
        parse_flow_listing(response)
    }

    /// Look up a published flow by slug.
    pub async fn resolve_flow(&self, slug: &str) -> Result<Option<PublishedFlow>> {
        Ok(self
            .list_flows()
            .await?
            .into_iter()
            .find(|flow| flow.slug == slug))
    }

    /// Tool definitions for the published flows; empty if the peer is
    /// absent, slow or failing.
    pub async fn dynamic_tools(&self) -> Vec<ToolDefinition> {
        match self.list_flows().await {
            Ok(flows) => flows.iter().map(PublishedFlow::to_tool_definition).collect(),
            Err(err) => {
                tracing::warn!(error = %err, "flow listing failed; serving static tools only");
                Vec::new()
            }
        }
    }

    /// The merged catalog. Static names win over same-named flows, and the
    /// first of several same-named flows wins.
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        let mut seen: HashSet<String> = self.static_tools.iter().map(|t| t.name.clone()).collect();
        let mut tools = self.static_tools.clone();
        for tool in self.dynamic_tools().await {
            if seen.insert(tool.name.clone()) {
                tools.push(tool);
            } else {
                tracing::debug!(tool = %tool.name, "dropping flow tool shadowed by an existing name");
            }
        }
        tools
    }
}
