use anyhow::{Context, anyhow};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::cli::{AddArgs, Command, ListArgs, LoginArgs};
use crate::collection::LoadOutcome;
use crate::context::AppContext;
use crate::datetime::{format_local, parse_datetime_input};
use crate::form::CreationForm;
use crate::identity::SignIn;
use crate::theme::Theme;
use crate::view::ViewFilter;

#[instrument(skip(ctx, command))]
pub async fn dispatch(ctx: &mut AppContext, command: Option<Command>) -> anyhow::Result<()> {
    let command = command.unwrap_or_else(|| Command::List(ListArgs::default()));
    debug!(?command, "dispatching command");

    match command {
        Command::List(args) => cmd_list(ctx, args).await,
        Command::Add(args) => cmd_add(ctx, args).await,
        Command::Done { id } => cmd_set_completed(ctx, &id, true).await,
        Command::Undo { id } => cmd_set_completed(ctx, &id, false).await,
        Command::Toggle { id } => cmd_toggle(ctx, &id).await,
        Command::Snooze { id, minutes } => cmd_snooze(ctx, &id, minutes).await,
        Command::Delete { id } => cmd_delete(ctx, &id).await,
        Command::Login(args) => cmd_login(ctx, args).await,
        Command::Logout => cmd_logout(ctx).await,
        Command::Whoami => cmd_whoami(ctx).await,
        Command::Theme { id } => cmd_theme(ctx, id),
    }
}

/// Loads the collection, surfacing a degraded load as a warning instead of
/// failing the command.
async fn load(ctx: &AppContext) -> LoadOutcome {
    let outcome = ctx.collection.load().await;
    match &outcome {
        LoadOutcome::Degraded { reason } => {
            eprintln!("warning: could not load events: {reason}");
        }
        LoadOutcome::Loaded { count } => debug!(count, "collection ready"),
        LoadOutcome::SignedOut => debug!("signed out"),
        LoadOutcome::Discarded => warn!("load result discarded"),
    }
    outcome
}

async fn require_signed_in(ctx: &AppContext) -> anyhow::Result<()> {
    if load(ctx).await == LoadOutcome::SignedOut {
        return Err(anyhow!("not signed in; run `wlb login` first"));
    }
    Ok(())
}

async fn cmd_list(ctx: &mut AppContext, args: ListArgs) -> anyhow::Result<()> {
    let defaults = ctx.config.default_view()?;
    let filter = ViewFilter::new(
        args.view.unwrap_or(defaults.mode),
        args.category.unwrap_or(defaults.category),
    );

    if load(ctx).await == LoadOutcome::SignedOut {
        ctx.renderer
            .print_identity(None, ctx.collection.store_name())?;
        return Ok(());
    }

    let items = ctx.collection.view(&filter, Utc::now(), &ctx.tz);
    ctx.renderer
        .print_items(&items, &filter, ctx.collection.is_loading())
}

async fn cmd_add(ctx: &mut AppContext, args: AddArgs) -> anyhow::Result<()> {
    let now = Utc::now();
    let mut form = CreationForm::new(now, ctx.tz);
    form.title = args.title.join(" ");
    form.category = args.category;
    if let Some(raw) = args.at.as_deref() {
        let due = parse_datetime_input(raw, now, &ctx.tz)
            .with_context(|| format!("invalid --at value: {raw}"))?;
        form.due_local = due.with_timezone(&ctx.tz).naive_local();
    }

    require_signed_in(ctx).await?;
    let item = form.submit_to(&ctx.collection).await?;
    info!(id = %item.id, "added item");
    println!(
        "Created {} {} due {}.",
        item.category,
        item.short_id(),
        format_local(item.due_at, &ctx.tz)
    );
    Ok(())
}

async fn cmd_set_completed(ctx: &mut AppContext, raw_id: &str, completed: bool) -> anyhow::Result<()> {
    require_signed_in(ctx).await?;
    let id = ctx.collection.resolve_id(raw_id)?;
    ctx.collection.set_completed(&id, completed).await?;
    if completed {
        println!("Completed {}.", short(&id));
    } else {
        println!("Reopened {}.", short(&id));
    }
    Ok(())
}

async fn cmd_toggle(ctx: &mut AppContext, raw_id: &str) -> anyhow::Result<()> {
    require_signed_in(ctx).await?;
    let id = ctx.collection.resolve_id(raw_id)?;
    let completed = ctx.collection.toggle(&id).await?;
    let state = if completed { "done" } else { "open" };
    println!("Marked {} {state}.", short(&id));
    Ok(())
}

async fn cmd_snooze(ctx: &mut AppContext, raw_id: &str, minutes: Option<i64>) -> anyhow::Result<()> {
    let minutes = match minutes {
        Some(m) if m > 0 => m,
        Some(m) => return Err(anyhow!("snooze minutes must be positive, got {m}")),
        None => ctx.config.snooze_minutes(),
    };

    require_signed_in(ctx).await?;
    let id = ctx.collection.resolve_id(raw_id)?;
    let due_at = ctx.collection.snooze(&id, minutes).await?;
    println!(
        "Snoozed {} by {minutes} min, now due {}.",
        short(&id),
        format_local(due_at, &ctx.tz)
    );
    Ok(())
}

async fn cmd_delete(ctx: &mut AppContext, raw_id: &str) -> anyhow::Result<()> {
    require_signed_in(ctx).await?;
    let id = ctx.collection.resolve_id(raw_id)?;
    ctx.collection.delete(&id).await?;
    println!("Deleted {}.", short(&id));
    Ok(())
}

async fn cmd_login(ctx: &mut AppContext, args: LoginArgs) -> anyhow::Result<()> {
    let request = match (args.email, args.password, args.token) {
        (_, _, Some(token)) => SignIn::AccessToken(token),
        (Some(email), Some(password), None) => SignIn::Password { email, password },
        _ => return Err(anyhow!("login needs --email and --password, or --token")),
    };

    let identity = ctx.identity.sign_in(request).await?;
    info!(user = %identity.user_id, "signed in");
    load(ctx).await;
    ctx.renderer
        .print_identity(Some(&identity), ctx.collection.store_name())
}

async fn cmd_logout(ctx: &mut AppContext) -> anyhow::Result<()> {
    ctx.identity.sign_out().await?;
    load(ctx).await;
    println!("Signed out.");
    Ok(())
}

async fn cmd_whoami(ctx: &mut AppContext) -> anyhow::Result<()> {
    let identity = ctx.identity.current_identity().await;
    ctx.renderer
        .print_identity(identity.as_ref(), ctx.collection.store_name())
}

fn cmd_theme(ctx: &mut AppContext, id: Option<String>) -> anyhow::Result<()> {
    let Some(raw) = id else {
        return ctx.renderer.print_themes(ctx.theme);
    };
    let theme: Theme = raw.parse()?;
    ctx.set_theme(theme)?;
    println!("Theme set to {} ({}).", theme.label(), theme.id());
    Ok(())
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
