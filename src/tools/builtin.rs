//! Built-in browser tools implemented by the extension.
//!
//! These are always listed, whether or not the extension is reachable, and
//! take precedence over any published flow with the same name.

use super::types::{ParameterBuilder, ToolDefinition};

pub const GET_WINDOWS_AND_TABS: &str = "get_windows_and_tabs";
pub const NAVIGATE: &str = "chrome_navigate";
pub const CLOSE_TABS: &str = "chrome_close_tabs";
pub const GO_BACK_OR_FORWARD: &str = "chrome_go_back_or_forward";
pub const SCREENSHOT: &str = "chrome_screenshot";
pub const GET_WEB_CONTENT: &str = "chrome_get_web_content";
pub const CLICK_ELEMENT: &str = "chrome_click_element";
pub const FILL_OR_SELECT: &str = "chrome_fill_or_select";
pub const KEYBOARD: &str = "chrome_keyboard";
pub const HISTORY: &str = "chrome_history";
pub const BOOKMARK_SEARCH: &str = "chrome_bookmark_search";
pub const NETWORK_REQUEST: &str = "chrome_network_request";
pub const CONSOLE: &str = "chrome_console";

/// The static tool set, in listing order.
pub fn builtin_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            GET_WINDOWS_AND_TABS,
            "Get all currently open browser windows and tabs",
            ParameterBuilder::new().build(),
        ),
        ToolDefinition::new(
            NAVIGATE,
            "Navigate to a URL or refresh the current tab",
            ParameterBuilder::new()
                .string("url", "URL to navigate to", false)
                .boolean("newWindow", "Open the URL in a new window", false)
                .number("width", "Viewport width in pixels", false)
                .number("height", "Viewport height in pixels", false)
                .boolean("refresh", "Reload the current tab instead of navigating", false)
                .build(),
        ),
        ToolDefinition::new(
            CLOSE_TABS,
            "Close one or more browser tabs",
            ParameterBuilder::new()
                .property(
                    "tabIds",
                    serde_json::json!({
                        "type": "array",
                        "items": {"type": "number"},
                        "description": "Ids of the tabs to close",
                    }),
                    false,
                )
                .string("url", "Close tabs matching this URL", false)
                .build(),
        ),
        ToolDefinition::new(
            GO_BACK_OR_FORWARD,
            "Navigate back or forward in browser history",
            ParameterBuilder::new()
                .boolean("isForward", "Go forward instead of back", false)
                .build(),
        ),
        ToolDefinition::new(
            SCREENSHOT,
            "Take a screenshot of the current page or an element",
            ParameterBuilder::new()
                .string("name", "Name for the screenshot", false)
                .string("selector", "CSS selector of the element to capture", false)
                .boolean("fullPage", "Capture the full scrollable page", false)
                .boolean("storeBase64", "Return the image as base64", false)
                .build(),
        ),
        ToolDefinition::new(
            GET_WEB_CONTENT,
            "Fetch the text or HTML content of a page",
            ParameterBuilder::new()
                .string("url", "URL to fetch; defaults to the active tab", false)
                .boolean("htmlContent", "Return visible HTML", false)
                .boolean("textContent", "Return visible text", false)
                .string("selector", "Restrict to an element", false)
                .build(),
        ),
        ToolDefinition::new(
            CLICK_ELEMENT,
            "Click an element on the current page",
            ParameterBuilder::new()
                .string("selector", "CSS selector of the element to click", false)
                .property(
                    "coordinates",
                    serde_json::json!({
                        "type": "object",
                        "properties": {
                            "x": {"type": "number"},
                            "y": {"type": "number"},
                        },
                        "description": "Viewport coordinates to click at",
                    }),
                    false,
                )
                .number("timeout", "Milliseconds to wait for the element", false)
                .build(),
        ),
        ToolDefinition::new(
            FILL_OR_SELECT,
            "Fill a form field or choose an option",
            ParameterBuilder::new()
                .string("selector", "CSS selector of the field", true)
                .string("value", "Value to fill or select", true)
                .build(),
        ),
        ToolDefinition::new(
            KEYBOARD,
            "Send keyboard input to the page",
            ParameterBuilder::new()
                .string("keys", "Keys or key combinations, e.g. \"Ctrl+C\"", true)
                .string("selector", "Element to focus first", false)
                .number("delay", "Delay between keystrokes in milliseconds", false)
                .build(),
        ),
        ToolDefinition::new(
            HISTORY,
            "Search browsing history",
            ParameterBuilder::new()
                .string("text", "Text to search for", false)
                .string("startTime", "Start of the time range", false)
                .string("endTime", "End of the time range", false)
                .number("maxResults", "Maximum number of entries", false)
                .build(),
        ),
        ToolDefinition::new(
            BOOKMARK_SEARCH,
            "Search bookmarks by keyword",
            ParameterBuilder::new()
                .string("query", "Keyword to match titles and URLs", false)
                .number("maxResults", "Maximum number of bookmarks", false)
                .build(),
        ),
        ToolDefinition::new(
            NETWORK_REQUEST,
            "Send an HTTP request from the browser context",
            ParameterBuilder::new()
                .string("url", "Request URL", true)
                .string_enum(
                    "method",
                    "HTTP method",
                    &["GET", "POST", "PUT", "PATCH", "DELETE"],
                    false,
                )
                .property(
                    "headers",
                    serde_json::json!({"type": "object", "description": "Request headers"}),
                    false,
                )
                .string("body", "Request body", false)
                .build(),
        ),
        ToolDefinition::new(
            CONSOLE,
            "Capture console output from a tab",
            ParameterBuilder::new()
                .string("url", "Tab URL to attach to; defaults to the active tab", false)
                .boolean("includeExceptions", "Include uncaught exceptions", false)
                .number("maxMessages", "Maximum number of messages", false)
                .build(),
        ),
    ]
}
