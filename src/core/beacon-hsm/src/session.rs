//! Session lifecycle.
//!
//! Every operation walks the same stages:
//! `Unopened -> ModuleLoaded -> Authenticated -> {KeyResolved} -> OperationComplete -> Closed`.
//! The session is logged out and closed when its guard drops, on success and
//! on every error path.

use std::fmt;
use std::ops::Deref;

use beacon_crypto::{KeyClass, KeyLabel, Pin};
use tracing::{debug, warn};

use crate::error::HsmError;
use crate::module::{Module, Session};

/// Lifecycle stage reached by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Nothing acquired yet.
    Unopened,
    /// Module library loaded and initialized.
    ModuleLoaded,
    /// Session opened and user logged in.
    Authenticated,
    /// Key label resolved to an object.
    KeyResolved,
    /// The cryptographic call returned.
    OperationComplete,
    /// Session and module released.
    Closed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Unopened => "unopened",
            Stage::ModuleLoaded => "module-loaded",
            Stage::Authenticated => "authenticated",
            Stage::KeyResolved => "key-resolved",
            Stage::OperationComplete => "operation-complete",
            Stage::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A logged-in session that logs out when dropped.
pub struct SessionGuard<S: Session> {
    session: S,
}

impl<S: Session> SessionGuard<S> {
    /// Opens a session on `slot` and logs in with `pin`.
    ///
    /// If login fails the session is closed before the error is returned.
    pub fn open<M>(module: &M, slot: usize, pin: &Pin) -> Result<Self, HsmError>
    where
        M: Module<Session = S>,
    {
        let mut session = module.open_session(slot)?;
        session.login(pin)?;
        debug!(slot, "session authenticated");
        Ok(Self { session })
    }
}

impl<S: Session> Deref for SessionGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S: Session> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        if let Err(e) = self.session.logout() {
            warn!(error = %e, "logout failed while releasing session");
        }
    }
}

/// Borrowed view of an authenticated session used by one operation.
pub struct ActiveSession<'a, S: Session> {
    session: &'a S,
    stage: &'a mut Stage,
}

impl<'a, S: Session> ActiveSession<'a, S> {
    pub(crate) fn new(session: &'a S, stage: &'a mut Stage) -> Self {
        Self { session, stage }
    }

    /// The underlying session.
    pub fn session(&self) -> &S {
        self.session
    }

    /// Stage reached so far.
    pub fn stage(&self) -> Stage {
        *self.stage
    }

    /// Resolves `label` to a key object of `class`.
    pub fn resolve(&mut self, label: &KeyLabel, class: KeyClass) -> Result<S::Handle, HsmError> {
        let handle = self
            .session
            .find_key(label, class)?
            .ok_or_else(|| HsmError::KeyNotFound {
                label: label.to_string(),
                class,
            })?;
        debug!(label = %label, %class, "key resolved");
        *self.stage = Stage::KeyResolved;
        Ok(handle)
    }

    /// Resolves a public key: `label` as given, then the `-public` form.
    pub fn resolve_public(&mut self, label: &KeyLabel) -> Result<S::Handle, HsmError> {
        if let Some(handle) = self.session.find_key(label, KeyClass::Public)? {
            debug!(label = %label, "public key resolved");
            *self.stage = Stage::KeyResolved;
            return Ok(handle);
        }
        self.resolve(&label.public(), KeyClass::Public)
    }

    pub(crate) fn complete(&mut self) {
        *self.stage = Stage::OperationComplete;
    }
}
