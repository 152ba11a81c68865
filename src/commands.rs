//! Chat commands. Every command answers with one HTML reply; failures become
//! a short apology and are logged.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use teloxide::types::UserId;
use teloxide::utils::command::BotCommands;
use teloxide::utils::html;
use tracing::{error, info, warn};

use crate::context::BotContext;
use crate::directory::resolve_identity;
use crate::gateway::Identity;
use crate::inference::{build_prompt, SearchAnswer};
use crate::schedule::digest::UNKNOWN_ASSIGNER;
use crate::schedule::time::{self, TimeError};
use crate::store::{group_by_assignee, ReminderScope, StoreError, TaskGroup};

/// Per-assignee text budget of the `/tasks` listing.
pub const TASK_GROUP_BUDGET: usize = 1024;
/// Text budget of the source list under a `/search` answer.
pub const SOURCES_BUDGET: usize = 1024;

static SCHEDULE_ARGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^(\d{4}-\d{2}-\d{2} \d{2}:\d{2})\s+(.+)$").expect("schedule pattern is valid")
});

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "snake_case", description = "Commands:")]
pub enum Command {
    #[command(description = "show this help")]
    Help,
    #[command(description = "show bot and AI status")]
    Status,
    #[command(description = "search the web and answer: /search query")]
    Search(String),
    #[command(description = "schedule a message: /schedule YYYY-MM-DD HH:MM text")]
    Schedule(String),
    #[command(description = "list your scheduled messages in this chat")]
    Scheduled,
    #[command(description = "assign a task: /assign @user text (or reply with /assign text)")]
    Assign(String),
    #[command(description = "assign a task to every member of this chat")]
    AssignAll(String),
    #[command(description = "delete a task by id: /delete_task 12")]
    DeleteTask(String),
    #[command(description = "list all open tasks")]
    Tasks,
    #[command(description = "send the daily task digest now (owners only)")]
    Digest,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Help => "help",
            Command::Status => "status",
            Command::Search(_) => "search",
            Command::Schedule(_) => "schedule",
            Command::Scheduled => "scheduled",
            Command::Assign(_) => "assign",
            Command::AssignAll(_) => "assign_all",
            Command::DeleteTask(_) => "delete_task",
            Command::Tasks => "tasks",
            Command::Digest => "digest",
        }
    }
}

/// Who invoked a command, and where.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub user_id: i64,
    pub channel_id: i64,
    /// Author of the message the command replies to, if any.
    pub reply_to: Option<Identity>,
}

/// Run `cmd` and return the HTML reply.
pub async fn execute(ctx: &BotContext, cmd: Command, inv: &Invocation) -> String {
    let name = cmd.name();
    info!("⚙️ /{} from {} in {}", name, inv.user_id, inv.channel_id);

    let (result, apology) = match cmd {
        Command::Help => return help(ctx),
        Command::Status => return status(ctx).await,
        Command::Search(query) => return search(ctx, inv, &query).await,
        Command::Schedule(args) => (
            schedule(ctx, inv, &args).await,
            "Sorry, I couldn't schedule your message.",
        ),
        Command::Scheduled => (
            scheduled(ctx, inv).await,
            "Sorry, I couldn't retrieve your scheduled messages.",
        ),
        Command::Assign(args) => (assign(ctx, inv, &args).await, "Sorry, I couldn't assign the task."),
        Command::AssignAll(args) => (
            assign_all(ctx, inv, &args).await,
            "Sorry, I couldn't assign the task.",
        ),
        Command::DeleteTask(args) => (
            delete_task(ctx, &args).await,
            "Sorry, I couldn't delete the task.",
        ),
        Command::Tasks => (tasks(ctx).await, "Sorry, I couldn't retrieve the tasks."),
        Command::Digest => (digest(ctx, inv).await, "Sorry, the digest run failed."),
    };

    result.unwrap_or_else(|e| {
        error!("/{} failed: {}", name, e);
        apology.to_string()
    })
}

fn help(ctx: &BotContext) -> String {
    format!(
        "🤖 <b>Gatekeeper</b>\n\
         Mention me (@{}) followed by your question, or reply to one of my messages.\n\n{}",
        html::escape(&ctx.bot_username),
        html::escape(&Command::descriptions().to_string())
    )
}

async fn status(ctx: &BotContext) -> String {
    let telegram = match ctx.gateway.ping().await {
        Ok(rtt) => format!("✅ Connected ({}ms)", rtt.as_millis()),
        Err(e) => format!("❌ {}", html::escape(&e.to_string())),
    };
    let gemini = if ctx.inference.is_some() {
        "✅ Configured"
    } else {
        "❌ Not configured"
    };
    format!("🔧 <b>Bot status</b>\nTelegram: {telegram}\nGemini AI: {gemini}")
}

async fn search(ctx: &BotContext, inv: &Invocation, query: &str) -> String {
    const FAILED: &str = "Sorry, I couldn't perform the search. Please try again later.";

    let query = query.trim();
    if query.is_empty() {
        return "Usage: /search query".to_string();
    }
    let Some(inference) = ctx.inference.as_ref() else {
        warn!("/search without an inference backend");
        return FAILED.to_string();
    };

    ctx.gateway.indicate_typing(inv.channel_id).await;
    let prompt = build_prompt(ctx.config.personality.as_deref(), query);
    let timeout = ctx.config.inference_timeout;
    match tokio::time::timeout(timeout, inference.search(&prompt)).await {
        Ok(Ok(answer)) => render_search(&answer),
        Ok(Err(e)) => {
            error!("/search failed: {}", e);
            FAILED.to_string()
        }
        Err(_) => {
            warn!("/search timed out after {}s", timeout.as_secs());
            FAILED.to_string()
        }
    }
}

/// Answer followed by the sources that fit in [`SOURCES_BUDGET`]. When the
/// list overflows, the full list follows after a marker.
fn render_search(answer: &SearchAnswer) -> String {
    let mut out = format!(
        "🔎 <b>Search results</b>\n{}\n\n<b>Sources</b>\n",
        html::escape(&answer.text)
    );
    if answer.sources.is_empty() {
        out.push_str("No sources found.");
        return out;
    }

    let links: Vec<String> = answer
        .sources
        .iter()
        .map(|source| {
            format!(
                "<a href=\"{}\">{}</a>",
                html::escape(&source.uri).replace('"', "&quot;"),
                html::escape(&source.title)
            )
        })
        .collect();

    let mut used = 0;
    let mut shown = 0;
    for link in &links {
        let len = link.chars().count() + 1;
        if used + len > SOURCES_BUDGET {
            break;
        }
        out.push_str(link);
        out.push('\n');
        used += len;
        shown += 1;
    }
    if shown < links.len() {
        out.push_str("...\n\n<b>All sources</b>\n");
        out.push_str(&links.join("\n"));
    }
    out.trim_end().to_string()
}

async fn schedule(ctx: &BotContext, inv: &Invocation, args: &str) -> Result<String, StoreError> {
    let zone = ctx.config.timezone;
    let Some(caps) = SCHEDULE_ARGS.captures(args.trim()) else {
        return Ok(format!("Usage: /schedule YYYY-MM-DD HH:MM message (24h {zone} time)"));
    };
    let (when_local, message) = (caps[1].to_string(), caps[2].trim().to_string());

    let when_utc = match time::local_to_utc(&when_local, zone) {
        Ok(utc) => utc,
        Err(e @ TimeError::Nonexistent { .. }) => return Ok(html::escape(&e.to_string())),
        Err(TimeError::Format(_)) => {
            return Ok(format!("Invalid time format. Use YYYY-MM-DD HH:MM (24h {zone} time)."));
        }
    };

    let id = ctx
        .store
        .add_reminder(inv.user_id, inv.channel_id, &message, &when_utc)
        .await?;
    info!("⏰ Reminder #{} scheduled for {} UTC in {}", id, when_utc, inv.channel_id);

    let local = time::utc_to_local(&when_utc, zone).unwrap_or(when_local);
    Ok(format!("Message scheduled for {local} {zone} ({when_utc} UTC)!"))
}

async fn scheduled(ctx: &BotContext, inv: &Invocation) -> Result<String, StoreError> {
    let scope = ReminderScope::UserInChannel {
        user_id: inv.user_id,
        channel_id: inv.channel_id,
    };
    let reminders = ctx.store.list_reminders(scope).await?;
    if reminders.is_empty() {
        return Ok("You have no scheduled messages in this chat.".to_string());
    }

    let zone = ctx.config.timezone;
    let mut out = String::from("Your scheduled messages:");
    for reminder in reminders {
        let local = time::utc_to_local(&reminder.when_utc, zone)
            .unwrap_or_else(|_| format!("{} UTC", reminder.when_utc));
        out.push_str(&format!(
            "\n<b>{} {}:</b> {}",
            local,
            zone,
            html::escape(&reminder.message)
        ));
    }
    Ok(out)
}

/// Split `@name rest` or `12345 rest` into the target and the rest.
fn split_target(args: &str) -> Option<(&str, &str)> {
    let args = args.trim();
    let (first, rest) = args.split_once(char::is_whitespace)?;
    let is_target = first.starts_with('@') || first.parse::<i64>().is_ok();
    is_target.then(|| (first, rest.trim()))
}

async fn assign(ctx: &BotContext, inv: &Invocation, args: &str) -> Result<String, StoreError> {
    const USAGE: &str = "Usage: /assign @username task, /assign USER_ID task, or reply to someone with /assign task";

    let args = args.trim();
    let (assignee, task) = match &inv.reply_to {
        // The replied-to author is the assignee; all of the text is the task
        Some(identity) => (identity.clone(), args),
        None => {
            let Some((target, task)) = split_target(args) else {
                return Ok(USAGE.to_string());
            };
            if let Some(username) = target.strip_prefix('@') {
                match ctx.store.find_member_by_username(inv.channel_id, username).await? {
                    Some(member) => (member.identity, task),
                    None => {
                        return Ok(format!(
                            "I don't know @{} in this chat yet. They need to post here first.",
                            html::escape(username)
                        ));
                    }
                }
            } else {
                let user_id: i64 = target.parse().unwrap_or_default();
                match resolve_identity(&ctx.store, ctx.gateway.as_ref(), user_id).await {
                    Some(identity) => (identity, task),
                    None => return Ok(USAGE.to_string()),
                }
            }
        }
    };

    if task.is_empty() {
        return Ok(USAGE.to_string());
    }
    if assignee.is_bot || assignee.user_id == ctx.bot_user_id {
        return Ok("Bots can't take tasks.".to_string());
    }

    let id = ctx
        .store
        .add_task(inv.user_id, assignee.user_id, inv.channel_id, task)
        .await?;
    info!("📌 Task #{} assigned to {} by {}", id, assignee.user_id, inv.user_id);

    Ok(format!(
        "✅ Task #{} assigned to {}: {}",
        id,
        assignee.mention(),
        html::escape(task)
    ))
}

async fn assign_all(ctx: &BotContext, inv: &Invocation, args: &str) -> Result<String, StoreError> {
    let task = args.trim();
    if task.is_empty() {
        return Ok("Usage: /assign_all task".to_string());
    }

    let assignees: Vec<i64> = ctx
        .store
        .active_members(inv.channel_id)
        .await?
        .into_iter()
        .map(|m| m.identity.user_id)
        .filter(|&id| id != ctx.bot_user_id)
        .collect();
    if assignees.is_empty() {
        return Ok("I don't know any members of this chat yet.".to_string());
    }

    let ids = ctx
        .store
        .add_tasks(inv.user_id, &assignees, inv.channel_id, task)
        .await?;
    info!("📌 Task assigned to {} member(s) of {} by {}", ids.len(), inv.channel_id, inv.user_id);

    Ok(format!(
        "✅ Task assigned to {} member{}: {}",
        ids.len(),
        if ids.len() == 1 { "" } else { "s" },
        html::escape(task)
    ))
}

async fn delete_task(ctx: &BotContext, args: &str) -> Result<String, StoreError> {
    let Ok(id) = args.trim().trim_start_matches('#').parse::<i64>() else {
        return Ok("Usage: /delete_task TASK_ID".to_string());
    };
    if ctx.store.delete_task(id).await? {
        info!("🗑️ Task #{} deleted", id);
        Ok(format!("🗑️ Task {id} deleted."))
    } else {
        Ok(format!("Task {id} not found."))
    }
}

async fn tasks(ctx: &BotContext) -> Result<String, StoreError> {
    let all = ctx.store.all_tasks().await?;
    if all.is_empty() {
        return Ok("No tasks assigned yet.".to_string());
    }

    let mut names: HashMap<i64, String> = HashMap::new();
    let mut sections = Vec::new();
    for group in group_by_assignee(all) {
        let assignee = display_name(ctx, &mut names, group.assignee_id, || {
            format!("User {}", group.assignee_id)
        })
        .await;
        let mut lines = Vec::with_capacity(group.tasks.len());
        for task in &group.tasks {
            let assigner = display_name(ctx, &mut names, task.assigner_id, || {
                UNKNOWN_ASSIGNER.to_string()
            })
            .await;
            lines.push(format!(
                "<b>#{}</b>: {} <i>(by {})</i>",
                task.id,
                html::escape(&task.task),
                html::escape(&assigner)
            ));
        }
        sections.push(render_task_group(&assignee, &group, &lines));
    }
    Ok(sections.join("\n\n"))
}

async fn display_name(
    ctx: &BotContext,
    names: &mut HashMap<i64, String>,
    user_id: i64,
    fallback: impl FnOnce() -> String,
) -> String {
    if let Some(name) = names.get(&user_id) {
        return name.clone();
    }
    let name = match resolve_identity(&ctx.store, ctx.gateway.as_ref(), user_id).await {
        Some(identity) => identity.display_name,
        None => fallback(),
    };
    names.insert(user_id, name.clone());
    name
}

/// Header plus as many `lines` as fit in [`TASK_GROUP_BUDGET`] characters.
fn render_task_group(assignee: &str, group: &TaskGroup, lines: &[String]) -> String {
    let mut body = String::new();
    for line in lines {
        let line = format!("{line}\n");
        if body.chars().count() + line.chars().count() > TASK_GROUP_BUDGET {
            body.push_str("... (truncated)\n");
            break;
        }
        body.push_str(&line);
    }
    format!(
        "📋 <b>Tasks for {}</b> ({})\n{}",
        html::escape(assignee),
        group.tasks.len(),
        body.trim_end()
    )
}

async fn digest(ctx: &BotContext, inv: &Invocation) -> Result<String, StoreError> {
    if !ctx.config.is_owner(UserId(inv.user_id as u64)) {
        return Ok("Only the bot owners can trigger the digest.".to_string());
    }
    let report = ctx.digest.send_digests().await?;
    Ok(format!("📋 Digest sent: {report}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::Source;
    use crate::store::Task;

    fn parse(text: &str) -> Command {
        Command::parse(text, "gatekeeper_bot").unwrap()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse("/help"), Command::Help);
        assert_eq!(parse("/tasks@gatekeeper_bot"), Command::Tasks);
        assert_eq!(
            parse("/schedule 2024-01-01 09:00 stand-up now"),
            Command::Schedule("2024-01-01 09:00 stand-up now".to_string())
        );
        assert_eq!(parse("/assign_all write notes"), Command::AssignAll("write notes".to_string()));
        assert_eq!(parse("/delete_task 12"), Command::DeleteTask("12".to_string()));
        assert_eq!(parse("/search rust 2024"), Command::Search("rust 2024".to_string()));
        assert!(Command::parse("/unknown", "gatekeeper_bot").is_err());
    }

    #[test]
    fn test_schedule_pattern() {
        let caps = SCHEDULE_ARGS.captures("2024-01-01 09:00 ping\nteam").unwrap();
        assert_eq!(&caps[1], "2024-01-01 09:00");
        assert_eq!(&caps[2], "ping\nteam");
        assert!(SCHEDULE_ARGS.captures("tomorrow 09:00 ping").is_none());
        assert!(SCHEDULE_ARGS.captures("2024-01-01 09:00").is_none());
    }

    #[test]
    fn test_split_target() {
        assert_eq!(split_target("@mona fix the login"), Some(("@mona", "fix the login")));
        assert_eq!(split_target("  42  review"), Some(("42", "review")));
        assert_eq!(split_target("fix the login"), None);
        assert_eq!(split_target("@mona"), None);
    }

    #[test]
    fn test_task_group_truncates_at_budget() {
        let group = TaskGroup {
            assignee_id: 1,
            tasks: (1..=40)
                .map(|id| Task {
                    id,
                    assigner_id: 2,
                    assignee_id: 1,
                    channel_id: 3,
                    task: "x".repeat(50),
                })
                .collect(),
        };
        let lines: Vec<String> = group
            .tasks
            .iter()
            .map(|t| format!("<b>#{}</b>: {}", t.id, t.task))
            .collect();
        let text = render_task_group("Mona", &group, &lines);
        assert!(text.starts_with("📋 <b>Tasks for Mona</b> (40)\n"));
        assert!(text.ends_with("... (truncated)"));
        let body = text.split_once('\n').unwrap().1;
        assert!(body.chars().count() <= TASK_GROUP_BUDGET + "... (truncated)".len());
    }

    fn sources(count: usize) -> Vec<Source> {
        (0..count)
            .map(|i| Source {
                title: format!("Page {i}"),
                uri: format!("https://example.org/{i:03}"),
            })
            .collect()
    }

    #[test]
    fn test_search_without_sources() {
        let answer = SearchAnswer { text: "a < b".into(), sources: Vec::new() };
        assert_eq!(
            render_search(&answer),
            "🔎 <b>Search results</b>\na &lt; b\n\n<b>Sources</b>\nNo sources found."
        );
    }

    #[test]
    fn test_search_sources_within_budget() {
        let answer = SearchAnswer { text: "ok".into(), sources: sources(2) };
        let text = render_search(&answer);
        assert!(text.ends_with(
            "<b>Sources</b>\n<a href=\"https://example.org/000\">Page 0</a>\n\
             <a href=\"https://example.org/001\">Page 1</a>"
        ));
        assert!(!text.contains("All sources"));
    }

    #[test]
    fn test_search_source_overflow_lists_everything_after_marker() {
        // Links are 44 or 45 characters; 22 fit with their newlines
        let answer = SearchAnswer { text: "ok".into(), sources: sources(30) };
        let text = render_search(&answer);
        let (capped, full) = text.split_once("...\n\n<b>All sources</b>\n").unwrap();
        let capped_links = capped.split_once("<b>Sources</b>\n").unwrap().1;
        assert_eq!(capped_links.lines().count(), 22);
        assert!(capped_links.chars().count() <= SOURCES_BUDGET);
        assert_eq!(full.lines().count(), 30);
        assert!(full.ends_with("Page 29</a>"));
    }
}
