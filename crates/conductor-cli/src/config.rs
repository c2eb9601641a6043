use clap::Parser;
use conductor_core::ConductorConfig;

/// Command-line arguments for the conductor demo.
///
/// Every flag can also be set through the environment (or a `.env` file).
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliArgs {
    /// Prefix for every key written to the ephemeral store.
    ///
    /// Environment variable: `CONDUCTOR_KEY_PREFIX`
    #[arg(long, env = "CONDUCTOR_KEY_PREFIX", default_value = "conductor")]
    pub key_prefix: String,

    /// Retention of batch and job records, in seconds.
    ///
    /// Environment variable: `CONDUCTOR_BATCH_TTL_SECS`
    #[arg(long, env = "CONDUCTOR_BATCH_TTL_SECS", default_value_t = 86_400)]
    pub batch_ttl_secs: u64,

    /// Retention of an unconsumed reply, in seconds.
    ///
    /// Environment variable: `CONDUCTOR_REPLY_TTL_SECS`
    #[arg(long, env = "CONDUCTOR_REPLY_TTL_SECS", default_value_t = 60)]
    pub reply_ttl_secs: u64,

    /// Default bound for a reply consumer's wait, in seconds.
    ///
    /// Environment variable: `CONDUCTOR_CONSUME_TIMEOUT_SECS`
    #[arg(long, env = "CONDUCTOR_CONSUME_TIMEOUT_SECS", default_value_t = 30)]
    pub consume_timeout_secs: u64,

    /// Make the second line of the demo script fail to synthesize.
    #[arg(long, default_value_t = false)]
    pub fail_line: bool,
}

impl TryFrom<CliArgs> for ConductorConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> anyhow::Result<Self> {
        if args.key_prefix.is_empty() {
            anyhow::bail!("key prefix must not be empty");
        }
        if args.consume_timeout_secs == 0 {
            anyhow::bail!("consume timeout must be at least one second");
        }
        Ok(ConductorConfig {
            key_prefix: args.key_prefix,
            batch_ttl_secs: args.batch_ttl_secs,
            reply_ttl_secs: args.reply_ttl_secs,
            consume_timeout_secs: args.consume_timeout_secs,
        })
    }
}
