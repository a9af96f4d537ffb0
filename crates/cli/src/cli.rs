use clap::Parser;

/// Terminal client for the data agent.
///
/// Questions are streamed to the agent service; generated SQL is executed
/// and the agent's analysis of the result is streamed back.
#[derive(Parser, Debug)]
#[command(name = "talkdata", about = "Chat with your data through the agent service")]
pub struct CliArgs {
    /// Environment profile (keys are read as {PROFILE}_{KEY} first)
    #[arg(long, env = "TALKDATA_PROFILE")]
    pub profile: Option<String>,

    /// Model name override
    #[arg(long)]
    pub model: Option<String>,

    /// Path to config file (default: ~/.config/talkdata/config.toml)
    #[arg(long)]
    pub config: Option<String>,

    /// Send requests without tool specifications
    #[arg(long)]
    pub no_tools: bool,
}
