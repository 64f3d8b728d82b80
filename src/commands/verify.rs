use poise::serenity_prelude as serenity;
use poise::CreateReply;
use serenity::{
    ActionRowComponent, ButtonStyle, ComponentInteraction, CreateActionRow, CreateButton,
    CreateInputText, CreateInteractionResponse, CreateInteractionResponseMessage, CreateMessage,
    CreateModal, EditInteractionResponse, InputTextStyle, ModalInteraction, ModalInteractionData,
    RoleId,
};
use tracing::{error, info, warn};

use super::require_admin;
use crate::state::{AppState, Context};
use crate::verify::{EmailPolicy, Verifier, VerifyError};

pub const EMAIL_BUTTON: &str = "verify-email";
pub const CODE_BUTTON: &str = "verify-code";
const EMAIL_MODAL: &str = "verify-email-modal";
const CODE_MODAL: &str = "verify-code-modal";

const EMAIL_FIELD: &str = "email";
const CODE_FIELD: &str = "code";
const NOT_CONFIGURED: &str = "Email verification is not configured on this bot.";

fn panel_text(policy: &EmailPolicy) -> String {
    [
        "# Member verification".to_string(),
        "Verify your school email address to start chatting.".to_string(),
        "### 1. Get a code".to_string(),
        format!(
            "Press **Get code** and enter your school address, like `{}`.",
            policy.example()
        ),
        "### 2. Enter the code".to_string(),
        "Press **Enter code** and type the six digits from the email.".to_string(),
        "-# The email often lands in the spam folder.".to_string(),
    ]
    .join("\n")
}

fn panel_buttons() -> CreateActionRow {
    CreateActionRow::Buttons(vec![
        CreateButton::new(EMAIL_BUTTON)
            .label("Get code")
            .emoji('✅')
            .style(ButtonStyle::Success),
        CreateButton::new(CODE_BUTTON)
            .label("Enter code")
            .emoji('📝')
            .style(ButtonStyle::Secondary),
    ])
}

fn email_modal(policy: &EmailPolicy) -> CreateModal {
    let label = "Your school email address";
    let input = CreateInputText::new(InputTextStyle::Short, label, EMAIL_FIELD)
        .placeholder(policy.example())
        .required(true);
    CreateModal::new(EMAIL_MODAL, "Email verification")
        .components(vec![CreateActionRow::InputText(input)])
}

fn code_modal() -> CreateModal {
    let label = "The code from the email";
    let input = CreateInputText::new(InputTextStyle::Short, label, CODE_FIELD)
        .min_length(6)
        .max_length(6)
        .required(true);
    CreateModal::new(CODE_MODAL, "Enter verification code")
        .components(vec![CreateActionRow::InputText(input)])
}

/// Post the verification panel in this channel (admin only)
#[poise::command(slash_command, guild_only)]
pub async fn panel(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    if !require_admin(&ctx).await? {
        return Ok(());
    }
    let Some(verifier) = ctx.data().verifier.as_ref() else {
        ctx.say(NOT_CONFIGURED).await?;
        return Ok(());
    };

    ctx.channel_id()
        .send_message(
            ctx.http(),
            CreateMessage::new()
                .content(panel_text(verifier.policy()))
                .components(vec![panel_buttons()]),
        )
        .await?;
    info!(channel = %ctx.channel_id(), "Verification panel posted");
    ctx.send(
        CreateReply::default()
            .content("Verification panel posted.")
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// Show a member's verified email address (admin only)
#[poise::command(slash_command, guild_only)]
pub async fn email(
    ctx: Context<'_>,
    #[description = "Member to look up"] member: serenity::User,
) -> Result<(), anyhow::Error> {
    if !require_admin(&ctx).await? {
        return Ok(());
    }
    let reply = match ctx.data().emails.get(member.id.get()).await {
        Ok(Some(record)) => format!("<@{}>'s email address: {}", member.id, record.email),
        Ok(None) => format!("<@{}> has not verified an email address.", member.id),
        Err(e) => {
            error!(user = %member.id, "Email lookup failed: {}", e);
            "The email directory could not be read.".to_string()
        }
    };
    info!(admin = %ctx.author().name, user = %member.id, "Email address looked up");
    ctx.send(CreateReply::default().content(reply).ephemeral(true)).await?;
    Ok(())
}

async fn reply_ephemeral(
    ctx: &serenity::Context,
    component: &ComponentInteraction,
    content: &str,
) -> Result<(), anyhow::Error> {
    component
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}

/// Panel buttons open the matching modal unless the member already has the role.
pub async fn handle_button(
    ctx: &serenity::Context,
    component: &ComponentInteraction,
    data: &AppState,
) -> Result<(), anyhow::Error> {
    let Some(verifier) = data.verifier.as_ref() else {
        return reply_ephemeral(ctx, component, NOT_CONFIGURED).await;
    };
    let role = RoleId::new(verifier.role_id());
    let verified = component
        .member
        .as_ref()
        .is_some_and(|m| m.roles.contains(&role));
    if verified {
        return reply_ephemeral(ctx, component, "You are already verified.").await;
    }

    let modal = if component.data.custom_id == EMAIL_BUTTON {
        email_modal(verifier.policy())
    } else {
        code_modal()
    };
    component
        .create_response(&ctx.http, CreateInteractionResponse::Modal(modal))
        .await?;
    Ok(())
}

fn field_value(data: &ModalInteractionData, field: &str) -> Option<String> {
    data.components
        .iter()
        .flat_map(|row| row.components.iter())
        .find_map(|component| match component {
            ActionRowComponent::InputText(input) if input.custom_id == field => input.value.clone(),
            _ => None,
        })
}

async fn request_code(verifier: &Verifier, user_id: u64, raw: &str) -> String {
    match verifier.request_code(user_id, raw).await {
        Ok(email) => format!(
            "A verification code was sent to **{}**.\nIt may be in your spam folder.",
            email
        ),
        Err(VerifyError::InvalidEmail(_)) => format!(
            "Enter your school email address (for example `{}`).",
            verifier.policy().example()
        ),
        Err(e) => {
            error!(user_id, "Could not send verification code: {}", e);
            "Sending the email failed. Please try again later.".to_string()
        }
    }
}

async fn confirm_code(
    ctx: &serenity::Context,
    modal: &ModalInteraction,
    verifier: &Verifier,
    code: &str,
) -> String {
    let user_id = modal.user.id;
    let email = match verifier.check_code(user_id.get(), code).await {
        Ok(email) => email,
        Err(VerifyError::CodeMismatch) => return "That code does not match.".to_string(),
        Err(_) => return "No pending verification was found. Request a new code.".to_string(),
    };
    let Some(guild_id) = modal.guild_id else {
        return "Verification only works inside a server.".to_string();
    };

    let role = RoleId::new(verifier.role_id());
    if let Err(e) = ctx
        .http
        .add_member_role(guild_id, user_id, role, Some("Email verified"))
        .await
    {
        error!(user = %user_id, "Role grant failed: {}", e);
        return "Granting the role failed. Please contact an admin.".to_string();
    }
    if let Err(e) = verifier.complete(user_id.get(), &email).await {
        // The role is in place; only the directory entry is missing.
        warn!(user = %user_id, "Verified email not saved: {}", e);
    }
    info!(user = %modal.user.name, "Member verified");
    "Verified! The role has been granted.".to_string()
}

/// Modal submissions from the panel. Both steps may outlast the 3-second
/// interaction window, so the reply is deferred first.
pub async fn handle_modal(
    ctx: &serenity::Context,
    modal: &ModalInteraction,
    data: &AppState,
) -> Result<(), anyhow::Error> {
    let custom_id = modal.data.custom_id.as_str();
    if custom_id != EMAIL_MODAL && custom_id != CODE_MODAL {
        return Ok(());
    }
    let defer = CreateInteractionResponseMessage::new().ephemeral(true);
    modal
        .create_response(&ctx.http, CreateInteractionResponse::Defer(defer))
        .await?;

    let reply = match data.verifier.as_ref() {
        None => NOT_CONFIGURED.to_string(),
        Some(verifier) if custom_id == EMAIL_MODAL => {
            let raw = field_value(&modal.data, EMAIL_FIELD).unwrap_or_default();
            request_code(verifier, modal.user.id.get(), &raw).await
        }
        Some(verifier) => {
            let code = field_value(&modal.data, CODE_FIELD).unwrap_or_default();
            confirm_code(ctx, modal, verifier, &code).await
        }
    };
    modal
        .edit_response(&ctx.http, EditInteractionResponse::new().content(reply))
        .await?;
    Ok(())
}
