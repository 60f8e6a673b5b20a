//! systemd-logind integration: the `logind_sessions_idle` activity probe,
//! the inhibitor-lock query used before suspending, and the D-Bus proxy for
//! the `PrepareForSleep` sleep-lifecycle signal consumed by the scheduler.

use zbus::zvariant::OwnedObjectPath;
use zbus::{proxy, Connection};

use super::{split_list, Activity, CheckError, ConfigurationError, Options};
use crate::engine::InhibitLock;

#[proxy(
    interface = "org.freedesktop.login1.Manager",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1"
)]
pub trait LogindManager {
    #[zbus(signal)]
    fn prepare_for_sleep(&self, start: bool) -> zbus::Result<()>;

    /// Returns `(what, who, why, mode, uid, pid)` tuples, one per active inhibitor.
    #[allow(clippy::type_complexity)]
    fn list_inhibitors(&self) -> zbus::Result<Vec<(String, String, String, String, u32, u32)>>;

    /// Returns `(id, uid, user, seat, session_path)` tuples, one per session.
    #[allow(clippy::type_complexity)]
    fn list_sessions(&self) -> zbus::Result<Vec<(String, u32, String, String, OwnedObjectPath)>>;
}

#[proxy(interface = "org.freedesktop.login1.Session", default_service = "org.freedesktop.login1")]
pub trait LogindSession {
    #[zbus(property)]
    fn idle_hint(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn name(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn state(&self) -> zbus::Result<String>;

    #[zbus(property, name = "Type")]
    fn session_type(&self) -> zbus::Result<String>;
}

/// Returns `true` if any active inhibitor lock blocks sleep in `block` mode.
///
/// Mirrors `tests/conftest.py`'s dbusmock shape for `ListInhibitors`
/// (`what, who, why, mode, uid, pid`): an inhibitor blocks suspension when
/// its `what` field contains `"sleep"` and its `mode` is `"block"`.
pub async fn has_inhibit_lock(connection: &Connection) -> zbus::Result<bool> {
    let proxy = LogindManagerProxy::new(connection).await?;
    let inhibitors = proxy.list_inhibitors().await?;
    Ok(inhibitors
        .iter()
        .any(|(what, _who, _why, mode, _uid, _pid)| what.contains("sleep") && mode == "block"))
}

/// Consults `ListInhibitors` over D-Bus before the engine commits to suspend.
/// Unreachable session manager fails open (treated as no lock), per §4.7.
pub struct LogindInhibitLock;

impl InhibitLock for LogindInhibitLock {
    fn is_locked(&self) -> bool {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let Ok(connection) = Connection::system().await else {
                    return false;
                };
                has_inhibit_lock(&connection).await.unwrap_or(false)
            })
        })
    }
}

/// Activity probe: any logind session of the configured types/states/classes
/// that is not marked idle counts as activity.
pub struct LogindSessionsIdle {
    name: String,
    types: Vec<String>,
    states: Vec<String>,
}

impl LogindSessionsIdle {
    pub fn from_config(name: &str, options: &Options) -> Result<Box<dyn Activity>, ConfigurationError> {
        let types = options
            .get("types")
            .map(|v| split_list(v))
            .unwrap_or_else(|| vec!["tty".into(), "x11".into(), "wayland".into()]);
        let states = options
            .get("states")
            .map(|v| split_list(v))
            .unwrap_or_else(|| vec!["active".into(), "online".into()]);
        Ok(Box::new(LogindSessionsIdle {
            name: name.to_string(),
            types,
            states,
        }))
    }

    async fn check_async(&self) -> Result<Option<String>, CheckError> {
        let connection = Connection::system()
            .await
            .map_err(|e| CheckError::temporary(format!("cannot connect to system bus: {e}")))?;
        let manager = LogindManagerProxy::new(&connection)
            .await
            .map_err(|e| CheckError::temporary(format!("cannot reach logind: {e}")))?;
        let sessions = manager
            .list_sessions()
            .await
            .map_err(|e| CheckError::temporary(format!("ListSessions failed: {e}")))?;

        for (id, _uid, _user, _seat, path) in sessions {
            let session = LogindSessionProxy::builder(&connection)
                .path(path)
                .map_err(|e| CheckError::temporary(format!("invalid session path: {e}")))?
                .build()
                .await
                .map_err(|e| CheckError::temporary(format!("cannot reach session: {e}")))?;

            let session_type = session
                .session_type()
                .await
                .map_err(|e| CheckError::temporary(format!("cannot read session type: {e}")))?;
            if !self.types.iter().any(|t| t == &session_type) {
                continue;
            }
            let state = session
                .state()
                .await
                .map_err(|e| CheckError::temporary(format!("cannot read session state: {e}")))?;
            if !self.states.iter().any(|s| s == &state) {
                continue;
            }
            let idle = session
                .idle_hint()
                .await
                .map_err(|e| CheckError::temporary(format!("cannot read idle hint: {e}")))?;
            if !idle {
                return Ok(Some(format!("session {id} ({session_type}) is not idle")));
            }
        }
        Ok(None)
    }
}

impl Activity for LogindSessionsIdle {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self) -> Result<Option<String>, CheckError> {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.check_async())
        })
    }
}
