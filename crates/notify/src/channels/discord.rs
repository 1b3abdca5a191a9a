//! Discord REST destination channel.
//!
//! Destinations are guild text or news channels addressed by their snowflake
//! id. Before posting, the channel is inspected and the bot's effective
//! permissions are computed from the guild roles, the bot member's roles and
//! the channel's permission overwrites.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::capabilities::{DestinationAccess, Permissions};
use crate::error::ChannelError;
use crate::events::IncidentNotice;
use crate::DestinationChannel;

/// Environment variable for the bot token.
const ENV_DISCORD_TOKEN: &str = "DISCORD_TOKEN";

/// Legacy name for the bot token.
const ENV_TOKEN: &str = "TOKEN";

/// Environment variable for the REST base URL.
const ENV_DISCORD_API_URL: &str = "DISCORD_API_URL";

/// Default REST base URL.
pub const DEFAULT_API_URL: &str = "https://discord.com/api/v10";

/// Channel kinds that accept notices.
const GUILD_TEXT: u8 = 0;
const GUILD_NEWS: u8 = 5;

/// Overwrite target kinds.
const OVERWRITE_ROLE: u8 = 0;
const OVERWRITE_MEMBER: u8 = 1;

/// Discord bot channel.
pub struct DiscordChannel {
    token: Option<String>,
    api_url: String,
    client: reqwest::Client,
    bot_user_id: OnceCell<u64>,
}

impl DiscordChannel {
    /// Create a new Discord channel from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let token = std::env::var(ENV_DISCORD_TOKEN)
            .or_else(|_| std::env::var(ENV_TOKEN))
            .ok()
            .filter(|t| !t.is_empty());
        let api_url =
            std::env::var(ENV_DISCORD_API_URL).unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        if token.is_some() {
            debug!("Discord destination channel enabled");
        } else {
            debug!("Discord destination channel disabled (DISCORD_TOKEN not set)");
        }

        Self::new(token, api_url)
    }

    /// Create a Discord channel with an explicit token and base URL.
    #[must_use]
    pub fn new(token: Option<String>, api_url: impl Into<String>) -> Self {
        Self {
            token,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            bot_user_id: OnceCell::new(),
        }
    }

    /// Replace the HTTP client (timeouts, proxies).
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn auth_header(&self) -> Result<String, ChannelError> {
        self.token
            .as_ref()
            .map(|t| format!("Bot {t}"))
            .ok_or_else(|| ChannelError::NotConfigured(ENV_DISCORD_TOKEN.to_string()))
    }

    /// GET a JSON resource. `Ok(None)` means the platform answered 404 or 403.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ChannelError> {
        let response = self
            .client
            .get(format!("{}{path}", self.api_url))
            .header(reqwest::header::AUTHORIZATION, self.auth_header()?)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(error_from_response(status, response).await),
        }
    }

    async fn bot_user_id(&self) -> Result<u64, ChannelError> {
        self.bot_user_id
            .get_or_try_init(|| async {
                let user: DiscordUser = self
                    .get_json("/users/@me")
                    .await?
                    .ok_or_else(|| ChannelError::Other("bot user is not visible".to_string()))?;
                parse_snowflake(&user.id)
            })
            .await
            .copied()
    }

    /// Render a notice as a single embed message.
    fn format_payload(notice: &IncidentNotice) -> DiscordMessage {
        let mut fields = vec![];
        if let Some(components) = notice.components_line() {
            fields.push(EmbedField {
                name: "Components affected".to_string(),
                value: components,
                inline: false,
            });
        }
        fields.push(EmbedField {
            name: "New comment".to_string(),
            value: truncate(&notice.body, MAX_FIELD_VALUE),
            inline: false,
        });
        fields.push(EmbedField {
            name: "Commented at".to_string(),
            value: discord_timestamp(notice.updated_at.timestamp()),
            inline: false,
        });

        DiscordMessage {
            embeds: vec![DiscordEmbed {
                title: truncate(&notice.title(), MAX_TITLE),
                description: format!(
                    "First seen: {}\nView at: {}",
                    discord_timestamp(notice.created_at.timestamp()),
                    notice.shortlink
                ),
                color: notice.severity().color(),
                fields,
                timestamp: Some(notice.timestamp().to_rfc3339()),
            }],
        }
    }
}

#[async_trait]
impl DestinationChannel for DiscordChannel {
    fn name(&self) -> &'static str {
        "discord"
    }

    fn enabled(&self) -> bool {
        self.token.is_some()
    }

    async fn inspect(&self, destination_id: u64) -> Result<DestinationAccess, ChannelError> {
        let Some(channel) = self
            .get_json::<DiscordChannelInfo>(&format!("/channels/{destination_id}"))
            .await?
        else {
            return Ok(DestinationAccess::Missing);
        };

        if channel.kind != GUILD_TEXT && channel.kind != GUILD_NEWS {
            return Ok(DestinationAccess::UnsupportedKind);
        }
        let Some(guild_id) = channel.guild_id.as_deref() else {
            return Ok(DestinationAccess::UnsupportedKind);
        };

        let bot_id = self.bot_user_id().await?;
        let Some(guild) = self
            .get_json::<DiscordGuild>(&format!("/guilds/{guild_id}"))
            .await?
        else {
            return Ok(DestinationAccess::Missing);
        };
        let Some(member) = self
            .get_json::<DiscordMember>(&format!("/guilds/{guild_id}/members/{bot_id}"))
            .await?
        else {
            return Ok(DestinationAccess::Missing);
        };

        let perms = effective_permissions(
            guild_id,
            &bot_id.to_string(),
            &guild,
            &member.roles,
            &channel.permission_overwrites,
        );
        debug!(destination_id, permissions = %perms, "Inspected destination");
        Ok(DestinationAccess::Granted(perms))
    }

    async fn send(
        &self,
        destination_id: u64,
        notice: &IncidentNotice,
    ) -> Result<(), ChannelError> {
        let payload = Self::format_payload(notice);

        debug!(
            channel = "discord",
            destination_id,
            update_id = %notice.update_id,
            "Sending notice"
        );

        let response = self
            .client
            .post(format!("{}/channels/{destination_id}/messages", self.api_url))
            .header(reqwest::header::AUTHORIZATION, self.auth_header()?)
            .json(&payload)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                debug!(channel = "discord", destination_id, "Notice sent successfully");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(ChannelError::NotFound(destination_id)),
            StatusCode::FORBIDDEN => Err(ChannelError::Forbidden(destination_id)),
            status => {
                let err = error_from_response(status, response).await;
                warn!(
                    channel = "discord",
                    destination_id,
                    error = %err,
                    "Discord message request failed"
                );
                Err(err)
            }
        }
    }
}

/// Compute the bot's permissions in a channel.
///
/// Base permissions are the `@everyone` role (whose id equals the guild id)
/// plus every role the member holds. The guild owner and administrators get
/// everything. Channel overwrites then apply in order: `@everyone`, the
/// member's roles combined, the member itself.
fn effective_permissions(
    guild_id: &str,
    member_id: &str,
    guild: &DiscordGuild,
    member_roles: &[String],
    overwrites: &[PermissionOverwrite],
) -> Permissions {
    if guild.owner_id.as_deref() == Some(member_id) {
        return Permissions::ALL;
    }

    let mut base = Permissions::NONE;
    for role in &guild.roles {
        if role.id == guild_id || member_roles.contains(&role.id) {
            base |= Permissions::parse(&role.permissions);
        }
    }
    if base.contains(Permissions::ADMINISTRATOR) {
        return Permissions::ALL;
    }

    let mut perms = base;
    if let Some(everyone) = overwrites.iter().find(|o| o.id == guild_id) {
        perms = perms.overwrite(
            Permissions::parse(&everyone.allow),
            Permissions::parse(&everyone.deny),
        );
    }

    let mut allow = Permissions::NONE;
    let mut deny = Permissions::NONE;
    for ow in overwrites
        .iter()
        .filter(|o| o.kind == OVERWRITE_ROLE && member_roles.contains(&o.id))
    {
        allow |= Permissions::parse(&ow.allow);
        deny |= Permissions::parse(&ow.deny);
    }
    perms = perms.overwrite(allow, deny);

    if let Some(own) = overwrites
        .iter()
        .find(|o| o.kind == OVERWRITE_MEMBER && o.id == member_id)
    {
        perms = perms.overwrite(
            Permissions::parse(&own.allow),
            Permissions::parse(&own.deny),
        );
    }

    perms
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
async fn error_from_response(status: StatusCode, response: reqwest::Response) -> ChannelError {
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = serde_json::from_str::<RateLimitBody>(&body)
            .map(|b| b.retry_after.ceil() as u64)
            .unwrap_or(1);
        return ChannelError::RateLimited { retry_after_secs };
    }
    ChannelError::Status {
        status: status.as_u16(),
        body,
    }
}

fn parse_snowflake(raw: &str) -> Result<u64, ChannelError> {
    raw.parse()
        .map_err(|_| ChannelError::Other(format!("invalid snowflake: {raw}")))
}

/// Render a unix timestamp with the client-side timestamp markup.
fn discord_timestamp(unix_secs: i64) -> String {
    format!("<t:{unix_secs}>")
}

const MAX_TITLE: usize = 256;
const MAX_FIELD_VALUE: usize = 1024;

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}

// =============================================================================
// Discord API types
// =============================================================================

#[derive(Debug, Serialize)]
struct DiscordMessage {
    embeds: Vec<DiscordEmbed>,
}

#[derive(Debug, Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    color: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbedField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DiscordChannelInfo {
    #[serde(rename = "type")]
    kind: u8,
    guild_id: Option<String>,
    #[serde(default)]
    permission_overwrites: Vec<PermissionOverwrite>,
}

#[derive(Debug, Deserialize)]
struct PermissionOverwrite {
    id: String,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    allow: String,
    #[serde(default)]
    deny: String,
}

#[derive(Debug, Deserialize)]
struct DiscordGuild {
    owner_id: Option<String>,
    #[serde(default)]
    roles: Vec<DiscordRole>,
}

#[derive(Debug, Deserialize)]
struct DiscordRole {
    id: String,
    permissions: String,
}

#[derive(Debug, Deserialize)]
struct DiscordMember {
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}
