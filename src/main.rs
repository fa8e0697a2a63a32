use anyhow::{Context, Result};
use astrbot_mcp::config::{FileConfig, Settings};
use astrbot_mcp::jsonpath::SummaryOptions;
use astrbot_mcp::market::{self, MarketMode, MarketQuery};
use astrbot_mcp::message::{build_chain, MessagePart, SessionCache};
use astrbot_mcp::tools::{
    self, config as config_tools, control, conversation, direct::MessageType, logs,
    mcp_panel::{PanelAction, PanelRequest},
    plugin::{InstallOptions, PluginConfigAction, PluginConfigRequest},
    plugin_market, session, webchat::SendRequest, DEFAULT_LOG_TAIL,
};
use astrbot_mcp::AstrBotClient;
use clap::Parser;
use rmcp::schemars::JsonSchema;
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        AnnotateAble, ListResourcesResult, PaginatedRequestParam, RawResource,
        ReadResourceRequestParam, ReadResourceResult, ResourceContents, ServerCapabilities,
        ServerInfo,
    },
    service::RequestContext,
    tool, tool_handler, tool_router,
    transport::stdio,
    ErrorData as McpError, RoleServer, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

const INFO_URI: &str = "astrbot://info";

#[derive(Parser, Debug)]
#[command(
    name = "astrbot-mcp",
    version,
    about = "MCP server (stdio) for driving a running AstrBot instance"
)]
struct Cli {
    /// TOML file with the same keys as the ASTRBOT_* variables, in snake_case
    #[arg(long, env = "ASTRBOT_MCP_CONFIG")]
    config: Option<PathBuf>,

    /// AstrBot dashboard URL; overrides ASTRBOT_BASE_URL
    #[arg(long)]
    base_url: Option<String>,
}

#[derive(Clone)]
struct AppState {
    client: AstrBotClient,
    cache: Arc<SessionCache>,
    tool_router: ToolRouter<Self>,
}

// ==================== ARGUMENTS ====================

#[derive(Deserialize, Serialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
struct GetLogsArgs {
    /// 0 returns /api/log-history immediately; >0 listens on /api/live-log for that many seconds
    wait_seconds: Option<u64>,
    /// Stop the live window after this many events (default 200)
    max_events: Option<usize>,
}

/// Shared shape of both send tools: either an explicit chain or the shortcuts.
#[derive(Deserialize, Serialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
struct ChainArgs {
    /// Explicit message chain. Parts: {"type":"plain","text":..}, {"type":"reply","message_id":..},
    /// {"type":"image"|"file"|"record"|"video","file_path": local path or URL} or {"type":..,"url":..}
    message_chain: Option<Vec<MessagePart>>,
    /// Text shortcut, used only without message_chain
    message: Option<String>,
    images: Option<Vec<String>>,
    files: Option<Vec<String>>,
    videos: Option<Vec<String>>,
    records: Option<Vec<String>>,
}

impl ChainArgs {
    fn into_chain(self) -> Vec<MessagePart> {
        match self.message_chain {
            Some(chain) => chain,
            None => build_chain(
                self.message.as_deref(),
                &self.images.unwrap_or_default(),
                &self.files.unwrap_or_default(),
                &self.records.unwrap_or_default(),
                &self.videos.unwrap_or_default(),
            ),
        }
    }
}

#[derive(Deserialize, Serialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
struct SendMessageArgs {
    /// Platform id, e.g. "webchat" or a configured adapter id
    platform_id: String,
    #[serde(flatten)]
    chain: ChainArgs,
    /// Real group/user id; when set the message goes out directly instead of through WebChat
    target_id: Option<String>,
    /// GroupMessage (default) or FriendMessage, for direct sends
    message_type: Option<MessageType>,
    /// WebChat session to post into
    session_id: Option<String>,
    /// Alias of session_id
    conversation_id: Option<String>,
    /// Reuse the last WebChat session when none is given (default true)
    use_last_session: Option<bool>,
    /// Always start a new WebChat session
    new_session: Option<bool>,
    /// History message id to reply to
    reply_to_message_id: Option<String>,
    /// Reply to the last bot message saved in this session
    reply_to_last_saved_message: Option<bool>,
    /// Reply to the last user message saved in this session
    reply_to_last_user_message: Option<bool>,
    selected_provider: Option<String>,
    selected_model: Option<String>,
    /// Ask AstrBot for a streamed reply (default true)
    enable_streaming: Option<bool>,
}

#[derive(Deserialize, Serialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
struct SendDirectArgs {
    platform_id: String,
    /// Group or user id on the platform
    target_id: String,
    #[serde(flatten)]
    chain: ChainArgs,
    /// GroupMessage (default) or FriendMessage
    message_type: Option<MessageType>,
}

#[derive(Deserialize, Serialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
struct SessionMessagesArgs {
    /// Session id, e.g. the one returned by send_platform_message
    session_id: String,
    /// Rebuild the conversation from logs when the history is empty or unavailable (default true)
    log_fallback: Option<bool>,
    /// Newest messages to keep from the log fallback (default 100)
    max_log_messages: Option<usize>,
}

#[derive(Deserialize, Serialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
struct BrowseMarketArgs {
    /// latest (default) or search
    mode: Option<MarketMode>,
    /// Space separated terms; all must match (required for search)
    query: Option<String>,
    /// 1-based rank of the first plugin to return (default 1)
    start: Option<usize>,
    /// Plugins to return, 1..=200 (default 20)
    count: Option<usize>,
    custom_registry: Option<String>,
    force_refresh: Option<bool>,
}

#[derive(Deserialize, Serialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
struct InspectConfigArgs {
    /// Config id from list_astrbot_config_files (omit with system_config=true)
    conf_id: Option<String>,
    system_config: Option<bool>,
    /// Dot path, JSON Pointer or segment list; omit for the root
    path: Option<Value>,
    /// Include (truncated) values of children (default false)
    include_value: Option<bool>,
    /// Default 50
    max_children: Option<usize>,
    /// Hide values of password/token/key-like entries (default true)
    redact_secrets: Option<bool>,
    /// Default 200
    max_string_length: Option<usize>,
}

#[derive(Deserialize, Serialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
struct ApplyConfigArgs {
    conf_id: String,
    /// Edits applied in order:
    /// {"op":"set","path":..,"value":..}, {"op":"add_key","path":parent,"key":..,"value":..},
    /// {"op":"append","path":list,"value":..}
    ops: Vec<Value>,
    /// Create missing containers along the path (default false)
    create_missing: Option<bool>,
}

#[derive(Deserialize, Serialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
struct SearchConfigArgs {
    conf_id: Option<String>,
    system_config: Option<bool>,
    /// Substring of the key to look for
    key_query: String,
    /// Also require a primitive value containing this
    value_query: Option<String>,
    case_sensitive: Option<bool>,
    /// Default 50
    max_results: Option<usize>,
}

#[derive(Deserialize, Serialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
struct InstallPluginArgs {
    /// Repository URL (http(s), git@, ssh://) or a local .zip path
    source: String,
    /// GitHub proxy for URL installs
    proxy: Option<String>,
    /// Send a proxy with URL installs, falling back to the configured one (default true)
    prefer_proxy: Option<bool>,
    /// Attach the AstrBot log tail (default true)
    include_logs: Option<bool>,
    log_tail_limit: Option<usize>,
}

#[derive(Deserialize, Serialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
struct ConfigurePluginArgs {
    /// Echoed back; the plugin config API does not use it
    conf_id: String,
    /// Path whose first segment is the plugin name
    plugin_path: Value,
    /// inspect (default) or apply
    action: Option<PluginConfigAction>,
    /// Node to inspect inside the plugin config
    path: Option<Value>,
    include_value: Option<bool>,
    max_children: Option<usize>,
    redact_secrets: Option<bool>,
    max_string_length: Option<usize>,
    /// Same op format as apply_astrbot_config_ops; required for apply
    ops: Option<Vec<Value>>,
    /// Default true
    create_missing: Option<bool>,
    include_logs: Option<bool>,
    log_tail_limit: Option<usize>,
}

#[derive(Deserialize, Serialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
struct McpPanelArgs {
    /// list (default), add, update, delete or test
    action: Option<PanelAction>,
    /// Server name (add, update, delete)
    name: Option<String>,
    /// Server config object (add, test; merged on update)
    server_config: Option<Value>,
    active: Option<bool>,
    include_logs: Option<bool>,
    log_tail_limit: Option<usize>,
}

#[derive(Deserialize, Serialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
struct ListConversationsArgs {
    /// Default 1
    page: Option<u32>,
    /// Default 20, at most 100
    page_size: Option<u32>,
    /// Comma separated platform ids
    platforms: Option<String>,
    /// Comma separated message types
    message_types: Option<String>,
    search: Option<String>,
}

#[derive(Deserialize, Serialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
struct GetConversationArgs {
    /// Unified message origin of the conversation owner
    user_id: String,
    /// Conversation id
    cid: String,
}

fn render(value: Value) -> String {
    serde_json::to_string_pretty(&value)
        .unwrap_or_else(|e| format!("{{\"status\": \"error\", \"message\": \"{}\"}}", e))
}

fn summary_options(
    defaults: SummaryOptions,
    max_children: Option<usize>,
    include_value: Option<bool>,
    redact_secrets: Option<bool>,
    max_string_length: Option<usize>,
) -> SummaryOptions {
    SummaryOptions {
        max_children: max_children.unwrap_or(defaults.max_children),
        include_value: include_value.unwrap_or(defaults.include_value),
        redact_secrets: redact_secrets.unwrap_or(defaults.redact_secrets),
        max_string_length: max_string_length.unwrap_or(defaults.max_string_length),
    }
}

impl AppState {
    fn new(client: AstrBotClient) -> Self {
        Self {
            client,
            cache: Arc::new(SessionCache::new()),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl AppState {
    // ==================== LOGS / PLATFORMS ====================

    #[tool(
        description = "Read AstrBot logs: the recent history by default, or new lines for wait_seconds from the live log stream"
    )]
    async fn get_astrbot_logs(&self, Parameters(args): Parameters<GetLogsArgs>) -> String {
        render(
            logs::get_astrbot_logs(
                &self.client,
                args.wait_seconds.unwrap_or(0),
                args.max_events.unwrap_or(logs::DEFAULT_MAX_EVENTS),
            )
            .await,
        )
    }

    #[tool(description = "List the message platforms configured in AstrBot")]
    async fn get_message_platforms(&self) -> String {
        render(tools::platform_list(&self.client).await)
    }

    // ==================== MESSAGING ====================

    #[tool(
        description = "Send a message chain (text, replies, images, files, voice, video) through AstrBot's WebChat API and return the bot's reply. With target_id, sends directly to that platform group/user instead."
    )]
    async fn send_platform_message(&self, Parameters(args): Parameters<SendMessageArgs>) -> String {
        let mut req = SendRequest::new(args.platform_id, args.chain.into_chain());
        req.target_id = args.target_id;
        req.message_type = args.message_type.unwrap_or_default();
        req.session_id = args.session_id;
        req.conversation_id = args.conversation_id;
        req.use_last_session = args.use_last_session.unwrap_or(true);
        req.new_session = args.new_session.unwrap_or(false);
        req.reply_to_message_id = args.reply_to_message_id;
        req.reply_to_last_saved_message = args.reply_to_last_saved_message.unwrap_or(false);
        req.reply_to_last_user_message = args.reply_to_last_user_message.unwrap_or(false);
        req.selected_provider = args.selected_provider;
        req.selected_model = args.selected_model;
        req.enable_streaming = args.enable_streaming.unwrap_or(true);
        render(tools::webchat::send_platform_message(&self.client, &self.cache, &req).await)
    }

    #[tool(
        description = "Send a message chain straight to a platform group or user via /api/platform/send_message, bypassing the LLM"
    )]
    async fn send_platform_message_direct(
        &self,
        Parameters(args): Parameters<SendDirectArgs>,
    ) -> String {
        let chain = args.chain.into_chain();
        render(
            tools::direct::send_platform_message_direct(
                &self.client,
                &args.platform_id,
                &args.target_id,
                &chain,
                args.message_type.unwrap_or_default(),
            )
            .await,
        )
    }

    #[tool(
        description = "Read the message history of a platform session; falls back to reconstructing it from AstrBot logs"
    )]
    async fn get_platform_session_messages(
        &self,
        Parameters(args): Parameters<SessionMessagesArgs>,
    ) -> String {
        render(
            session::get_platform_session_messages(
                &self.client,
                &args.session_id,
                args.log_fallback.unwrap_or(true),
                args.max_log_messages
                    .unwrap_or(session::DEFAULT_MAX_LOG_MESSAGES),
            )
            .await,
        )
    }

    // ==================== CONTROL ====================

    #[tool(description = "Restart AstrBot core and wait (up to 60s) until it responds again")]
    async fn restart_astrbot(&self) -> String {
        render(control::restart_astrbot(&self.client, control::RestartPolling::default()).await)
    }

    // ==================== PLUGINS ====================

    #[tool(
        description = "Browse the AstrBot plugin market: newest first, or search by name/description/tags/author/repo"
    )]
    async fn browse_plugin_market(&self, Parameters(args): Parameters<BrowseMarketArgs>) -> String {
        let query = MarketQuery {
            mode: args.mode.unwrap_or_default(),
            query: args.query,
            start: args.start.unwrap_or(1),
            count: args.count.unwrap_or(20),
        };
        render(
            plugin_market::browse_plugin_market(
                &self.client,
                &query,
                args.custom_registry.as_deref(),
                args.force_refresh.unwrap_or(false),
                market::DEFAULT_REGISTRY_URL,
            )
            .await,
        )
    }

    #[tool(description = "Install an AstrBot plugin from a repository URL or a local .zip file")]
    async fn install_astrbot_plugin(
        &self,
        Parameters(args): Parameters<InstallPluginArgs>,
    ) -> String {
        let opts = InstallOptions {
            proxy: args.proxy.as_deref(),
            prefer_proxy: args.prefer_proxy.unwrap_or(true),
            include_logs: args.include_logs.unwrap_or(true),
            log_tail_limit: args.log_tail_limit.unwrap_or(DEFAULT_LOG_TAIL),
        };
        render(tools::plugin::install_astrbot_plugin(&self.client, &args.source, &opts).await)
    }

    #[tool(
        description = "Inspect or edit a plugin's JSON config with the same path syntax and ops as the AstrBot config tools"
    )]
    async fn configure_astrbot_plugin_json(
        &self,
        Parameters(args): Parameters<ConfigurePluginArgs>,
    ) -> String {
        let ops = args.ops.unwrap_or_default();
        let req = PluginConfigRequest {
            conf_id: &args.conf_id,
            plugin_path: &args.plugin_path,
            action: args.action.unwrap_or_default(),
            path: args.path.as_ref(),
            summary: summary_options(
                PluginConfigRequest::DEFAULT_SUMMARY,
                args.max_children,
                args.include_value,
                args.redact_secrets,
                args.max_string_length,
            ),
            ops: &ops,
            create_missing: args.create_missing.unwrap_or(true),
            include_logs: args.include_logs.unwrap_or(true),
            log_tail_limit: args.log_tail_limit.unwrap_or(DEFAULT_LOG_TAIL),
        };
        render(tools::plugin::configure_astrbot_plugin_json(&self.client, &req).await)
    }

    #[tool(description = "Manage AstrBot's MCP server panel: list, add, update, delete or test servers")]
    async fn manage_mcp_config_panel(&self, Parameters(args): Parameters<McpPanelArgs>) -> String {
        let req = PanelRequest {
            action: args.action.unwrap_or_default(),
            name: args.name.as_deref(),
            server_config: args.server_config.as_ref().and_then(Value::as_object),
            active: args.active,
            include_logs: args.include_logs.unwrap_or(true),
            log_tail_limit: args.log_tail_limit.unwrap_or(DEFAULT_LOG_TAIL),
        };
        render(tools::mcp_panel::manage_mcp_config_panel(&self.client, &req).await)
    }

    // ==================== CONFIG ====================

    #[tool(description = "List AstrBot config files (abconfs)")]
    async fn list_astrbot_config_files(&self) -> String {
        render(config_tools::list_astrbot_config_files(&self.client).await)
    }

    #[tool(
        description = "Summarize one node of an AstrBot config. Start with no path to see the top-level keys, then drill down."
    )]
    async fn inspect_astrbot_config(
        &self,
        Parameters(args): Parameters<InspectConfigArgs>,
    ) -> String {
        let opts = summary_options(
            SummaryOptions::default(),
            args.max_children,
            args.include_value,
            args.redact_secrets,
            args.max_string_length,
        );
        render(
            config_tools::inspect_astrbot_config(
                &self.client,
                args.conf_id.as_deref(),
                args.system_config.unwrap_or(false),
                args.path.as_ref(),
                &opts,
            )
            .await,
        )
    }

    #[tool(description = "Apply set/add_key/append edits to an AstrBot config, then save and hot reload it")]
    async fn apply_astrbot_config_ops(
        &self,
        Parameters(args): Parameters<ApplyConfigArgs>,
    ) -> String {
        render(
            config_tools::apply_astrbot_config_ops(
                &self.client,
                &args.conf_id,
                &args.ops,
                args.create_missing.unwrap_or(false),
            )
            .await,
        )
    }

    #[tool(
        description = "Find config paths by key substring (and optionally value substring) without returning the values"
    )]
    async fn search_astrbot_config_paths(
        &self,
        Parameters(args): Parameters<SearchConfigArgs>,
    ) -> String {
        let search = config_tools::ConfigSearch {
            key_query: &args.key_query,
            value_query: args.value_query.as_deref(),
            case_sensitive: args.case_sensitive.unwrap_or(false),
            max_results: args
                .max_results
                .unwrap_or(config_tools::DEFAULT_SEARCH_RESULTS),
        };
        render(
            config_tools::search_astrbot_config_paths(
                &self.client,
                args.conf_id.as_deref(),
                args.system_config.unwrap_or(false),
                &search,
            )
            .await,
        )
    }

    // ==================== CONVERSATIONS ====================

    #[tool(description = "List stored AstrBot conversations with paging and filters")]
    async fn list_astrbot_conversations(
        &self,
        Parameters(args): Parameters<ListConversationsArgs>,
    ) -> String {
        let filter = conversation::ConversationFilter {
            page: args.page.unwrap_or(1),
            page_size: args.page_size.unwrap_or(conversation::DEFAULT_PAGE_SIZE),
            platforms: args.platforms.as_deref(),
            message_types: args.message_types.as_deref(),
            search: args.search.as_deref(),
        };
        render(conversation::list_astrbot_conversations(&self.client, filter).await)
    }

    #[tool(description = "Read one stored AstrBot conversation including its history")]
    async fn get_astrbot_conversation(
        &self,
        Parameters(args): Parameters<GetConversationArgs>,
    ) -> String {
        render(conversation::get_astrbot_conversation(&self.client, &args.user_id, &args.cid).await)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for AppState {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some("MCP server for interacting with an existing AstrBot instance. Provides tools to read logs, list configured message platforms, send message chains (including files) via the web chat API or directly to platform targets, restart AstrBot core, read platform session message history and stored conversations, browse and install plugins, edit AstrBot and plugin configs by path, and manage AstrBot's MCP server panel.".into()),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            ..Default::default()
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult {
            resources: vec![RawResource::new(
                INFO_URI,
                "AstrBot MCP - server name and tool list".to_string(),
            )
            .no_annotation()],
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        ReadResourceRequestParam { uri }: ReadResourceRequestParam,
        _ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<ReadResourceResult, McpError> {
        let content = match uri.as_str() {
            INFO_URI => render(tools::server_info()),
            _ => {
                return Err(McpError::resource_not_found(
                    "Resource not found",
                    Some(serde_json::json!({ "uri": uri })),
                ));
            }
        };

        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(content, uri)],
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    astrbot_mcp::logging::init();

    let file = match &cli.config {
        Some(path) => FileConfig::load(path.clone())?,
        None => FileConfig::default(),
    };
    let cli_base_url = cli.base_url.clone();
    let settings = Settings::resolve(file, |name| match name {
        "ASTRBOT_BASE_URL" if cli_base_url.is_some() => cli_base_url.clone(),
        _ => std::env::var(name).ok(),
    })?;

    info!(
        "AstrBot MCP starting (base_url: {}, user: {})",
        settings.base_url,
        settings.username.as_deref().unwrap_or("<none>")
    );
    let client = AstrBotClient::new(settings).context("Failed to build HTTP client")?;
    let state = AppState::new(client);

    state.serve(stdio()).await?.waiting().await?;

    Ok(())
}
