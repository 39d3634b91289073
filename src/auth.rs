use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;
use ulid::Ulid;

use crate::model::Actor;

/// Shared cleartext password for every login name. Who the caller is
/// comes from the login name itself, see [`resolve_actor`].
#[derive(Debug)]
pub struct AgendaAuthSource {
    password: String,
}

impl AgendaAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for AgendaAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

/// Map a wire login name to an actor: `agent_<ULID>` and `client_<ULID>`
/// act as that party, anything else is the trusted backend.
pub fn resolve_actor(user: Option<&str>) -> Actor {
    let Some(user) = user else {
        return Actor::Service;
    };
    let parse = |rest: &str| Ulid::from_string(&rest.to_ascii_uppercase()).ok();
    if let Some(id) = user.strip_prefix("agent_").and_then(parse) {
        Actor::Agent(id)
    } else if let Some(id) = user.strip_prefix("client_").and_then(parse) {
        Actor::Client(id)
    } else {
        Actor::Service
    }
}
