use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::item::Category;
use crate::view::{CategoryFilter, ViewMode};

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "wlb",
    version,
    about = "Work Life Balancer: tasks and shared events from the terminal",
    disable_help_subcommand = true,
    infer_subcommands = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "wlbrc", global = true)]
    pub wlbrc: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show items for a time window and category
    #[command(alias = "ls")]
    List(ListArgs),

    /// Add an item
    Add(AddArgs),

    /// Mark an item completed
    Done { id: String },

    /// Mark an item not completed
    Undo { id: String },

    /// Flip an item's completed flag
    Toggle { id: String },

    /// Push an open item's due time back
    Snooze {
        id: String,
        #[arg(short, long)]
        minutes: Option<i64>,
    },

    /// Remove an item
    #[command(alias = "rm")]
    Delete { id: String },

    /// Sign in to the remote backend
    Login(LoginArgs),

    /// End the remote session
    Logout,

    /// Show who is signed in
    Whoami,

    /// Show or set the color theme
    Theme { id: Option<String> },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    #[arg(long, value_parser = parse_view_mode)]
    pub view: Option<ViewMode>,

    #[arg(short, long, value_parser = parse_category_filter)]
    pub category: Option<CategoryFilter>,
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    #[arg(required = true, num_args = 1..)]
    pub title: Vec<String>,

    #[arg(short, long, value_parser = parse_category, default_value = "work")]
    pub category: Category,

    /// Due time: now, today, tomorrow 9:30, 18:00, 2026-05-01 18:00, +2h
    #[arg(short = 'a', long = "at")]
    pub at: Option<String>,
}

#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = true, id = "credentials")]
pub struct LoginArgs {
    #[arg(long, requires = "password")]
    pub email: Option<String>,

    #[arg(long, requires = "email")]
    pub password: Option<String>,

    /// Access token from a browser sign-in (for example Google)
    #[arg(long, conflicts_with_all = ["email", "password"])]
    pub token: Option<String>,
}

fn parse_view_mode(s: &str) -> Result<ViewMode, String> {
    s.parse().map_err(|err: crate::error::TrackerError| err.to_string())
}

fn parse_category_filter(s: &str) -> Result<CategoryFilter, String> {
    s.parse().map_err(|err: crate::error::TrackerError| err.to_string())
}

fn parse_category(s: &str) -> Result<Category, String> {
    s.parse().map_err(|err: crate::error::TrackerError| err.to_string())
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` (or `rc.key:value`) overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else if let Some((k, v)) = rest.split_once(':') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                None
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&os(&["wlb", "rc.color=off", "list", "rc.default.view:all"]))
            .expect("preprocess");
        assert_eq!(pre.cleaned_args, os(&["wlb", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.default.view".to_string(), "all".to_string()),
            ]
        );
    }

    #[test]
    fn add_parses_title_words_category_and_time() {
        let cli = GlobalCli::try_parse_from(["wlb", "add", "Feed", "cat", "-c", "pet", "--at", "18:00"])
            .expect("parse");
        let Some(Command::Add(args)) = cli.command else {
            panic!("expected add");
        };
        assert_eq!(args.title.join(" "), "Feed cat");
        assert_eq!(args.category, Category::Pet);
        assert_eq!(args.at.as_deref(), Some("18:00"));
    }

    #[test]
    fn list_accepts_view_and_category() {
        let cli = GlobalCli::try_parse_from(["wlb", "ls", "--view", "completed", "--category", "personal"])
            .expect("parse");
        let Some(Command::List(args)) = cli.command else {
            panic!("expected list");
        };
        assert_eq!(args.view, Some(ViewMode::Completed));
        assert_eq!(args.category, Some(CategoryFilter::Only(Category::Life)));
    }

    #[test]
    fn unique_subcommand_prefixes_are_accepted() {
        let cli = GlobalCli::try_parse_from(["wlb", "tog", "3f2a"]).expect("parse");
        assert!(matches!(cli.command, Some(Command::Toggle { ref id }) if id == "3f2a"));
        assert!(GlobalCli::try_parse_from(["wlb", "d", "3f2a"]).is_err());
    }

    #[test]
    fn login_requires_one_credential_kind() {
        assert!(GlobalCli::try_parse_from(["wlb", "login"]).is_err());
        assert!(GlobalCli::try_parse_from(["wlb", "login", "--email", "a@b.c"]).is_err());
        assert!(GlobalCli::try_parse_from(["wlb", "login", "--token", "t", "--email", "a@b.c"]).is_err());
        assert!(GlobalCli::try_parse_from(["wlb", "login", "--token", "t"]).is_ok());
        assert!(
            GlobalCli::try_parse_from(["wlb", "login", "--email", "a@b.c", "--password", "pw"]).is_ok()
        );
    }
}
