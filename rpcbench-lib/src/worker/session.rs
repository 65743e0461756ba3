use std::{fmt, sync::Arc};

use arc_swap::ArcSwapOption;
use tonic::Status;

use crate::{client::ClientScenario, server::ServerScenario};

enum Occupant<T> {
    Starting,
    Running(Arc<T>),
}

/// Holds at most one scenario of a role for the lifetime of a worker.
///
/// The slot is claimed with a compare and swap before the scenario is
/// created, so of many concurrent setups exactly one gets to create it.
pub struct RoleSlot<T> {
    role: &'static str,
    occupant: ArcSwapOption<Occupant<T>>,
}

impl<T> RoleSlot<T> {
    pub fn new(role: &'static str) -> Self {
        Self {
            role,
            occupant: ArcSwapOption::empty(),
        }
    }

    /// Claim the empty slot. Fails with `already_exists` when the slot is
    /// claimed or filled already.
    pub fn claim(&self) -> Result<SlotClaim<'_, T>, Status> {
        let previous = self
            .occupant
            .compare_and_swap(&None::<Arc<Occupant<T>>>, Some(Arc::new(Occupant::Starting)));
        if previous.is_some() {
            return Err(Status::already_exists(format!(
                "{} already set up on this worker",
                self.role
            )));
        }
        Ok(SlotClaim {
            slot: self,
            filled: false,
        })
    }

    pub fn is_occupied(&self) -> bool {
        self.occupant.load().is_some()
    }

    /// The running scenario, if set up completed.
    pub fn get(&self) -> Option<Arc<T>> {
        match self.occupant.load_full()?.as_ref() {
            Occupant::Running(value) => Some(value.clone()),
            Occupant::Starting => None,
        }
    }
}

impl<T> fmt::Debug for RoleSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.occupant.load().as_deref() {
            None => "empty",
            Some(Occupant::Starting) => "starting",
            Some(Occupant::Running(_)) => "running",
        };
        f.debug_struct("RoleSlot")
            .field("role", &self.role)
            .field("state", &state)
            .finish()
    }
}

/// An exclusive claim on a [`RoleSlot`]; released again when dropped
/// without being filled.
#[must_use]
pub struct SlotClaim<'a, T> {
    slot: &'a RoleSlot<T>,
    filled: bool,
}

impl<T> SlotClaim<'_, T> {
    pub fn fill(mut self, value: Arc<T>) {
        self.slot.occupant.store(Some(Arc::new(Occupant::Running(value))));
        self.filled = true;
    }
}

impl<T> Drop for SlotClaim<'_, T> {
    fn drop(&mut self) {
        if !self.filled {
            self.slot.occupant.store(None);
        }
    }
}

/// Scenario slots of one worker process, one per role.
#[derive(Debug)]
pub struct WorkerSession {
    pub server: RoleSlot<ServerScenario>,
    pub client: RoleSlot<ClientScenario>,
}

impl Default for WorkerSession {
    fn default() -> Self {
        Self {
            server: RoleSlot::new("server"),
            client: RoleSlot::new("client"),
        }
    }
}
