use poise::serenity_prelude as serenity;
use poise::CreateReply;
use serenity::{
    ComponentInteraction, ComponentInteractionDataKind, CreateActionRow,
    CreateInteractionResponse, CreateInteractionResponseMessage, CreateSelectMenu,
    CreateSelectMenuKind, CreateSelectMenuOption,
};
use tracing::{debug, error};

use crate::roster::{format_students, DisplayMode, Roster};
use crate::state::{AppState, Context};

pub const MENU_ID: &str = "roster-display-mode";

const EXPIRED: &str = "This lookup has expired. Run `/roster lookup` again.";

fn mode_menu() -> CreateActionRow {
    let options = DisplayMode::ALL
        .into_iter()
        .map(|mode| CreateSelectMenuOption::new(mode.label(), mode.value()))
        .collect();
    CreateActionRow::SelectMenu(
        CreateSelectMenu::new(MENU_ID, CreateSelectMenuKind::String { options })
            .placeholder("Change how results are shown"),
    )
}

/// Look up students by number
#[poise::command(slash_command, guild_only)]
pub async fn lookup(
    ctx: Context<'_>,
    #[description = "Student numbers, separated by commas or spaces"] numbers: String,
) -> Result<(), anyhow::Error> {
    let roster = match Roster::load(&ctx.data().roster_path).await {
        Ok(roster) => roster,
        Err(e) => {
            error!(error = %e, "Roster unavailable");
            ctx.send(
                CreateReply::default()
                    .content("The student roster could not be loaded.")
                    .ephemeral(true),
            )
            .await?;
            return Ok(());
        }
    };

    let students = roster.find(&numbers);
    if students.is_empty() {
        ctx.send(
            CreateReply::default()
                .content("No students matched those numbers.")
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    }

    let reply = ctx
        .send(
            CreateReply::default()
                .content(format_students(&students, DisplayMode::Default))
                .components(vec![mode_menu()])
                .ephemeral(true),
        )
        .await?;
    let message = reply.message().await?;

    debug!(count = students.len(), message = %message.id, "Roster lookup");
    ctx.data()
        .sessions
        .create(message.id.get(), ctx.author().id.get(), students)
        .await;
    Ok(())
}

/// Re-render a lookup in the chosen display mode, or retire the menu once
/// the session is gone.
pub async fn handle_menu(
    ctx: &serenity::Context,
    component: &ComponentInteraction,
    data: &AppState,
) -> Result<(), anyhow::Error> {
    let ComponentInteractionDataKind::StringSelect { values } = &component.data.kind else {
        return Ok(());
    };
    let mode = DisplayMode::parse(values.first().map(String::as_str).unwrap_or_default());

    let session = data
        .sessions
        .get(component.message.id.get(), component.user.id.get())
        .await;
    let message = match session {
        Some(students) => CreateInteractionResponseMessage::new()
            .content(format_students(&students, mode))
            .components(vec![mode_menu()]),
        None => CreateInteractionResponseMessage::new()
            .content(EXPIRED)
            .components(vec![]),
    };

    component
        .create_response(&ctx.http, CreateInteractionResponse::UpdateMessage(message))
        .await?;
    Ok(())
}
