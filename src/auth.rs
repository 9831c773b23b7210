use std::sync::Arc;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use ulid::Ulid;

use crate::engine::Engine;

/// What a connection is allowed to do, decided by its login user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Provisioning; also a trusted channel for the business named as the database.
    Admin,
    /// Web UI backend or voice tool layer; the database names the business.
    Channel,
    /// May only trigger the notification sweep.
    Scheduler,
    /// A business owner authenticating with their api key.
    Owner(Ulid),
}

impl Role {
    pub fn from_user(user: &str) -> Option<Role> {
        match user {
            "admin" => Some(Role::Admin),
            "channel" => Some(Role::Channel),
            "scheduler" => Some(Role::Scheduler),
            other => Ulid::from_string(other).ok().map(Role::Owner),
        }
    }
}

/// Shared secrets for the fixed login users. An unset secret disables that user.
#[derive(Debug, Clone)]
pub struct Secrets {
    pub admin_password: String,
    pub channel_secret: Option<String>,
    pub sweep_secret: Option<String>,
}

pub struct SlotlineAuthSource {
    engine: Arc<Engine>,
    secrets: Secrets,
}

impl std::fmt::Debug for SlotlineAuthSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotlineAuthSource").finish_non_exhaustive()
    }
}

impl SlotlineAuthSource {
    pub fn new(engine: Arc<Engine>, secrets: Secrets) -> Self {
        Self { engine, secrets }
    }

    fn expected_password(&self, role: Role) -> Option<String> {
        match role {
            Role::Admin => Some(self.secrets.admin_password.clone()),
            Role::Channel => self.secrets.channel_secret.clone(),
            Role::Scheduler => self.secrets.sweep_secret.clone(),
            Role::Owner(id) => self.engine.owner_api_key(&id),
        }
    }
}

fn refuse(msg: &str) -> PgWireError {
    metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
    PgWireError::UserError(Box::new(ErrorInfo::new("FATAL".into(), "28000".into(), msg.into())))
}

#[async_trait]
impl AuthSource for SlotlineAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().ok_or_else(|| refuse("no user given"))?;
        let role = Role::from_user(user).ok_or_else(|| refuse("unknown user"))?;
        let password = self
            .expected_password(role)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| refuse("login disabled for this user"))?;
        Ok(Password::new(None, password.into_bytes()))
    }
}
