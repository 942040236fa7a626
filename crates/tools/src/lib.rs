//! Built-in tools for the Threadline chat agent.
//!
//! Three tools ship with the agent: a DuckDuckGo web search, an Alpha
//! Vantage stock quote lookup, and a sandboxed arithmetic calculator.
//! Each can be switched off in the `[tools]` section of the config.

pub mod calculator;
pub mod stock_price;
pub mod web_search;

use threadline_config::ToolsConfig;
use threadline_core::tool::ToolRegistry;
use tracing::debug;

pub use calculator::CalculatorTool;
pub use stock_price::StockPriceTool;
pub use web_search::WebSearchTool;

/// Create a tool registry holding every enabled built-in tool.
pub fn default_registry(config: &ToolsConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    if config.web_search.enabled {
        registry.register(Box::new(WebSearchTool::from_config(&config.web_search)));
    }
    if config.stock_price.enabled {
        registry.register(Box::new(StockPriceTool::from_config(&config.stock_price)));
    }
    if config.calculator.enabled {
        registry.register(Box::new(CalculatorTool::from_config(&config.calculator)));
    }
    debug!(tools = ?registry.names(), "Tool registry built");
    registry
}
